//! Property tests for download invariants.
//!
//! Uses proptest to verify:
//! 1. Normalized series are strictly ascending and keep every distinct date
//! 2. Histogram bucketing neither loses nor invents values
//! 3. Summary counts are conserved for any outcome sequence
//! 4. Manifest rows are unique and survive catalog reordering
//! 5. Jitter samples stay inside their range

use std::collections::BTreeSet;

use chrono::NaiveDate;
use proptest::prelude::*;
use stockwatch_core::data::{JitterRange, Manifest, ManifestStatus, Outcome, RunSummary};
use stockwatch_core::domain::{normalize_bars, DailyBar, Market};
use stockwatch_core::stats::bucket_returns;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_bar() -> impl Strategy<Value = DailyBar> {
    (0u64..60, 1.0..500.0_f64).prop_map(|(day, px)| DailyBar {
        date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(day),
        open: px,
        high: px * 1.02,
        low: px * 0.98,
        close: px,
        volume: 1000,
    })
}

fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        (1usize..500).prop_map(|rows| Outcome::Success { rows }),
        Just(Outcome::Exists),
        Just(Outcome::Empty),
        "[a-z ]{0,80}".prop_map(Outcome::error),
    ]
}

// ── 1. Series normalization ──────────────────────────────────────────

proptest! {
    #[test]
    fn normalized_dates_strictly_ascend(bars in prop::collection::vec(arb_bar(), 0..80)) {
        let distinct: BTreeSet<NaiveDate> = bars.iter().map(|b| b.date).collect();
        let out = normalize_bars(bars);

        prop_assert_eq!(out.len(), distinct.len());
        prop_assert!(out.windows(2).all(|w| w[0].date < w[1].date));
    }
}

// ── 2. Histogram conservation ────────────────────────────────────────

proptest! {
    #[test]
    fn every_finite_value_lands_somewhere(values in prop::collection::vec(-250.0..400.0_f64, 0..200)) {
        let labelled = values.iter().enumerate().map(|(i, v)| (i.to_string(), *v));
        let hist = bucket_returns(labelled);

        let bucketed: usize = hist.buckets.iter().map(|b| b.members.len()).sum();
        prop_assert_eq!(bucketed + hist.overflow.len(), values.len());
        prop_assert_eq!(hist.total, values.len());

        for (i, bucket) in hist.buckets.iter().enumerate() {
            for (_, v) in &bucket.members {
                prop_assert!(*v < bucket.upper);
                // The first bucket also absorbs everything below -100%.
                prop_assert!(i == 0 || *v >= bucket.lower);
            }
        }
        prop_assert!(hist.overflow.iter().all(|(_, v)| *v >= 100.0));
    }
}

// ── 3. Summary conservation ──────────────────────────────────────────

proptest! {
    #[test]
    fn summary_counts_are_conserved(outcomes in prop::collection::vec(arb_outcome(), 0..100)) {
        let mut summary = RunSummary::new(Market::Us);
        for (i, outcome) in outcomes.iter().enumerate() {
            summary.record(&format!("T{i}"), outcome);
        }

        prop_assert_eq!(summary.total, outcomes.len());
        prop_assert!(summary.is_conserved());
        prop_assert_eq!(summary.failed.len(), summary.fail());
        prop_assert!(summary.error_reasons.keys().all(|k| k.chars().count() <= 50));
        prop_assert!((0.0..=100.0).contains(&summary.coverage()));
    }
}

// ── 4. Manifest reordering ───────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn manifest_rows_survive_reordering(
        on_disk in prop::collection::vec(any::<bool>(), 1..30),
        seed in any::<u64>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.csv");
        let profile = Market::Us.profile();
        let symbols: Vec<_> = (0..on_disk.len())
            .map(|i| profile.symbol(&format!("S{i:03}"), "Name", None))
            .collect();

        let first = Manifest::load_or_init(&path, &symbols, |s| {
            let idx: usize = s.ticker[1..].parse().unwrap();
            on_disk[idx]
        });
        let done = on_disk.iter().filter(|d| **d).count();
        prop_assert_eq!(first.counts().done, done);
        prop_assert_eq!(first.counts().pending, symbols.len() - done);

        // Rotate the catalog; statuses are keyed by code, not position.
        let mut reordered = symbols.clone();
        let len = reordered.len();
        reordered.rotate_left((seed as usize) % len);
        let again = Manifest::load_or_init(&path, &reordered, |_| false);

        prop_assert_eq!(again.len(), symbols.len());
        prop_assert_eq!(again.counts(), first.counts());
        for (i, s) in symbols.iter().enumerate() {
            let expected = if on_disk[i] { ManifestStatus::Done } else { ManifestStatus::Pending };
            prop_assert_eq!(again.status(&s.ticker), Some(expected));
        }
    }
}

// ── 5. Jitter bounds ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn jitter_samples_stay_in_range(min in 0u64..5_000, span in 0u64..5_000) {
        let range = JitterRange::millis(min, min + span);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let d = range.sample(&mut rng);
            prop_assert!(d >= range.min() && d <= range.max());
        }
    }
}
