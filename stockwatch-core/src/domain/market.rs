//! Markets and their per-market profile.
//!
//! Market-specific behavior (ticker spelling, series file naming, worker count,
//! fallback symbols) lives in a [`MarketProfile`]. The rest of the pipeline is
//! generic over it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::symbol::SymbolRecord;

/// The six regional equity markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    #[serde(rename = "tw-share")]
    Tw,
    #[serde(rename = "us-share")]
    Us,
    #[serde(rename = "hk-share")]
    Hk,
    #[serde(rename = "cn-share")]
    Cn,
    #[serde(rename = "jp-share")]
    Jp,
    #[serde(rename = "kr-share")]
    Kr,
}

impl Market {
    /// Run order used for `--market all`.
    pub const ALL: [Market; 6] = [
        Market::Tw,
        Market::Hk,
        Market::Cn,
        Market::Jp,
        Market::Kr,
        Market::Us,
    ];

    /// Stable code, also the on-disk directory name.
    pub fn code(self) -> &'static str {
        match self {
            Market::Tw => "tw-share",
            Market::Us => "us-share",
            Market::Hk => "hk-share",
            Market::Cn => "cn-share",
            Market::Jp => "jp-share",
            Market::Kr => "kr-share",
        }
    }

    pub fn profile(self) -> MarketProfile {
        MarketProfile::for_market(self)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
#[error("unknown market '{0}' (expected one of tw, us, hk, cn, jp, kr)")]
pub struct UnknownMarket(pub String);

impl FromStr for Market {
    type Err = UnknownMarket;

    /// Accepts both the short form (`tw`) and the directory code (`tw-share`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let short = lower.strip_suffix("-share").unwrap_or(&lower);
        match short {
            "tw" => Ok(Market::Tw),
            "us" => Ok(Market::Us),
            "hk" => Ok(Market::Hk),
            "cn" => Ok(Market::Cn),
            "jp" => Ok(Market::Jp),
            "kr" => Ok(Market::Kr),
            _ => Err(UnknownMarket(s.to_string())),
        }
    }
}

/// Where a market's symbol catalog comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    /// TWSE + TPEx open-data JSON.
    TaiwanOpenData,
    /// nasdaqtrader.com symbol directory files.
    NasdaqTrader,
    /// Eastmoney A-share list.
    Eastmoney,
    /// KRX market data service (KOSPI + KOSDAQ).
    Krx,
    /// JPX listed-issues workbook, falling back to the bundled reference list.
    Jpx,
    /// HKEXnews active-stock list, falling back to the bundled reference list.
    HkexNews,
}

/// How a raw exchange code becomes a provider ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerRule {
    /// Board decides the suffix: TPEx -> `.TWO`, anything else -> `.TW`.
    Taiwan,
    /// `$` and `.` become `-` (`BRK.B` -> `BRK-B`).
    UsClassShare,
    /// Numeric code rendered as four digits plus `.HK`.
    HongKong,
    /// `6xxxxx` -> `.SS`, everything else -> `.SZ`.
    ShanghaiShenzhen,
    /// Zero-padded to four digits plus `.T`.
    Tokyo,
    /// Zero-padded to six digits plus `.KS` / `.KQ` from the board.
    Korea,
}

impl TickerRule {
    /// Normalize a raw exchange code into the data provider's ticker format.
    pub fn apply(self, code: &str, board: Option<&str>) -> String {
        let code = code.trim();
        match self {
            TickerRule::Taiwan => {
                let suffix = match board {
                    Some(b) if b.eq_ignore_ascii_case("tpex") => ".TWO",
                    _ => ".TW",
                };
                format!("{code}{suffix}")
            }
            TickerRule::UsClassShare => code.replace(['$', '.'], "-"),
            TickerRule::HongKong => match code.parse::<u32>() {
                Ok(n) => format!("{n:04}.HK"),
                Err(_) => format!("{code}.HK"),
            },
            TickerRule::ShanghaiShenzhen => {
                if code.starts_with('6') {
                    format!("{code}.SS")
                } else {
                    format!("{code}.SZ")
                }
            }
            TickerRule::Tokyo => format!("{code:0>4}.T"),
            TickerRule::Korea => {
                let suffix = match board {
                    Some(b) if b.eq_ignore_ascii_case("kq") => "KQ",
                    _ => "KS",
                };
                format!("{code:0>6}.{suffix}")
            }
        }
    }
}

/// How a symbol's series file is named inside `<market>/dayK/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesNaming {
    /// `<ticker>_<name>.csv`
    TickerAndName,
    /// `<code>_<name>.csv`
    CodeAndName,
    /// `<ticker>.csv`
    TickerOnly,
}

impl SeriesNaming {
    pub fn file_name(self, symbol: &SymbolRecord) -> String {
        match self {
            SeriesNaming::TickerAndName => {
                with_name(&symbol.ticker, &safe_file_name(&symbol.display_name))
            }
            SeriesNaming::CodeAndName => {
                with_name(&symbol.code, &safe_file_name(&symbol.display_name))
            }
            SeriesNaming::TickerOnly => format!("{}.csv", symbol.ticker),
        }
    }

    /// Recover `(ticker_or_code, name)` from a series file stem.
    pub fn parse_stem(self, stem: &str) -> (String, String) {
        match self {
            SeriesNaming::TickerOnly => (stem.to_string(), stem.to_string()),
            SeriesNaming::TickerAndName | SeriesNaming::CodeAndName => match stem.split_once('_') {
                Some((ticker, name)) => (ticker.to_string(), name.to_string()),
                None => (stem.to_string(), stem.to_string()),
            },
        }
    }
}

fn with_name(prefix: &str, name: &str) -> String {
    if name.is_empty() {
        format!("{prefix}.csv")
    } else {
        format!("{prefix}_{name}.csv")
    }
}

/// Keep alphanumerics (any script), spaces, `_` and `-`; trim the result.
pub fn safe_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Per-market configuration consumed by the generic downloader.
#[derive(Debug, Clone)]
pub struct MarketProfile {
    pub market: Market,
    pub catalog: CatalogKind,
    pub ticker_rule: TickerRule,
    pub naming: SeriesNaming,
    /// Worker threads; kept low to stay under the provider's informal rate limit.
    pub workers: usize,
    /// `(code, name, board)` used when the catalog source is unreachable.
    pub seeds: &'static [(&'static str, &'static str, Option<&'static str>)],
}

impl MarketProfile {
    pub fn for_market(market: Market) -> Self {
        match market {
            Market::Tw => Self {
                market,
                catalog: CatalogKind::TaiwanOpenData,
                ticker_rule: TickerRule::Taiwan,
                naming: SeriesNaming::TickerAndName,
                workers: 3,
                seeds: &[("2330", "台積電", Some("TWSE")), ("2317", "鴻海", Some("TWSE"))],
            },
            Market::Us => Self {
                market,
                catalog: CatalogKind::NasdaqTrader,
                ticker_rule: TickerRule::UsClassShare,
                naming: SeriesNaming::TickerAndName,
                workers: 5,
                seeds: &[("AAPL", "Apple Inc", None), ("MSFT", "Microsoft Corporation", None)],
            },
            Market::Hk => Self {
                market,
                catalog: CatalogKind::HkexNews,
                ticker_rule: TickerRule::HongKong,
                naming: SeriesNaming::TickerOnly,
                workers: 4,
                seeds: &[("00700", "騰訊控股", None), ("00005", "滙豐控股", None)],
            },
            Market::Cn => Self {
                market,
                catalog: CatalogKind::Eastmoney,
                ticker_rule: TickerRule::ShanghaiShenzhen,
                naming: SeriesNaming::CodeAndName,
                workers: 4,
                seeds: &[("600519", "貴州茅台", None), ("000001", "平安銀行", None)],
            },
            Market::Jp => Self {
                market,
                catalog: CatalogKind::Jpx,
                ticker_rule: TickerRule::Tokyo,
                naming: SeriesNaming::TickerOnly,
                workers: 4,
                seeds: &[("7203", "TOYOTA MOTOR CORPORATION", Some("T"))],
            },
            Market::Kr => Self {
                market,
                catalog: CatalogKind::Krx,
                ticker_rule: TickerRule::Korea,
                naming: SeriesNaming::TickerOnly,
                workers: 4,
                seeds: &[("005930", "삼성전자", Some("KS"))],
            },
        }
    }

    /// Build a symbol record from a raw exchange code using this market's ticker rule.
    pub fn symbol(&self, code: &str, name: &str, board: Option<&str>) -> SymbolRecord {
        SymbolRecord {
            ticker: self.ticker_rule.apply(code, board),
            code: code.trim().to_string(),
            display_name: name.trim().to_string(),
            market: self.market,
            board: board.map(str::to_string),
        }
    }

    /// The hardcoded fallback catalog.
    pub fn seed_symbols(&self) -> Vec<SymbolRecord> {
        self.seeds
            .iter()
            .map(|(code, name, board)| self.symbol(code, name, *board))
            .collect()
    }
}
