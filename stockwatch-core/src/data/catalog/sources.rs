//! Market catalog sources.
//!
//! Each source fetches its listing, applies the market filter and returns
//! normalized symbols. Parsing is split from fetching so the filters can be
//! tested against captured payloads.
//!
//! Listing endpoints are public, unauthenticated and change without notice.

use std::borrow::Cow;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::CatalogSource;
use crate::data::provider::DataError;
use crate::domain::{dedup_by_ticker, Market, MarketProfile, SymbolRecord};

const TWSE_URL: &str = "https://openapi.twse.com.tw/v1/exchangeReport/STOCK_DAY_ALL";
const TPEX_URL: &str = "https://www.tpex.org.tw/openapi/v1/tpex_mainboard_daily_close_quotes";
const NASDAQ_LISTED_URL: &str = "https://www.nasdaqtrader.com/dynamic/symdir/nasdaqlisted.txt";
const OTHER_LISTED_URL: &str = "https://www.nasdaqtrader.com/dynamic/symdir/otherlisted.txt";
const EASTMONEY_URL: &str = "https://82.push2.eastmoney.com/api/qt/clist/get?pn=1&pz=10000&po=1&np=1&fltt=2&invt=2&fid=f12&fs=m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048&fields=f12,f14";
const KRX_URL: &str = "http://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd";
const JPX_URL: &str = "https://www.jpx.co.jp/markets/statistics-equities/misc/tvdivq0000001vg2-att/data_j.xls";
const HKEX_ACTIVE_URL: &str = "https://www1.hkexnews.hk/ncms/script/eds/activestock_sehk_e.json";

const JP_REFERENCE: &str = include_str!("../../../reference/jp_tse.csv");
const HK_REFERENCE: &str = include_str!("../../../reference/hk_main.csv");

/// Security-name keywords that mark a US listing as something other than common stock.
const US_EXCLUDED_KEYWORDS: [&str; 8] = [
    "WARRANT",
    "RIGHTS",
    "UNIT",
    "PREFERRED",
    "DEPOSITARY",
    "ADR",
    "FOREIGN",
    "DEBENTURE",
];

/// A-share code prefixes for main board, SME, ChiNext and STAR listings.
const CN_VALID_PREFIXES: [&str; 13] = [
    "000", "001", "002", "003", "300", "301", "302", "600", "601", "603", "605", "688", "689",
];

/// Build the HTTP client shared by the network sources.
pub fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, DataError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
        .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))
}

/// The production source for `profile`'s market.
///
/// JP and HK read the exchange listing and fall back to the bundled reference
/// list. A `reference_list` path replaces both for those markets.
pub fn standard_source(
    profile: &MarketProfile,
    client: reqwest::blocking::Client,
    reference_list: Option<PathBuf>,
) -> Box<dyn CatalogSource> {
    use crate::domain::CatalogKind;

    match profile.catalog {
        CatalogKind::TaiwanOpenData => Box::new(TaiwanOpenData::new(client)),
        CatalogKind::NasdaqTrader => Box::new(NasdaqTrader::new(client)),
        CatalogKind::Eastmoney => Box::new(Eastmoney::new(client)),
        CatalogKind::Krx => Box::new(Krx::new(client)),
        CatalogKind::Jpx => listing_or_reference(Box::new(Jpx::new(client)), profile.market, reference_list),
        CatalogKind::HkexNews => {
            listing_or_reference(Box::new(HkexNews::new(client)), profile.market, reference_list)
        }
    }
}

fn listing_or_reference(
    listing: Box<dyn CatalogSource>,
    market: Market,
    reference_list: Option<PathBuf>,
) -> Box<dyn CatalogSource> {
    let reference = ReferenceList::bundled(market);
    match reference_list {
        Some(path) => Box::new(reference.with_path(path)),
        None => Box::new(WithFallback::new(listing, Box::new(reference))),
    }
}

/// Use `fallback` when `primary` fails or lists nothing.
pub struct WithFallback {
    name: String,
    primary: Box<dyn CatalogSource>,
    fallback: Box<dyn CatalogSource>,
}

impl WithFallback {
    pub fn new(primary: Box<dyn CatalogSource>, fallback: Box<dyn CatalogSource>) -> Self {
        Self {
            name: format!("{}|{}", primary.name(), fallback.name()),
            primary,
            fallback,
        }
    }
}

impl CatalogSource for WithFallback {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        match self.primary.fetch() {
            Ok(symbols) if !symbols.is_empty() => return Ok(symbols),
            Ok(_) => tracing::warn!(
                source = self.primary.name(),
                fallback = self.fallback.name(),
                "catalog source listed nothing, using fallback"
            ),
            Err(e) => tracing::warn!(
                source = self.primary.name(),
                fallback = self.fallback.name(),
                error = %e,
                "catalog source failed, using fallback"
            ),
        }
        self.fallback.fetch()
    }
}

fn catalog_err(source_name: &str, reason: impl std::fmt::Display) -> DataError {
    DataError::Catalog {
        source_name: source_name.to_string(),
        reason: reason.to_string(),
    }
}

fn get_text(client: &reqwest::blocking::Client, url: &str, source_name: &str) -> Result<String, DataError> {
    let resp = client.get(url).send().map_err(DataError::from_reqwest)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(DataError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    resp.text().map_err(|e| catalog_err(source_name, e))
}

fn get_bytes(client: &reqwest::blocking::Client, url: &str, source_name: &str) -> Result<Vec<u8>, DataError> {
    let resp = client.get(url).send().map_err(DataError::from_reqwest)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(DataError::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    resp.bytes()
        .map(|b| b.to_vec())
        .map_err(|e| catalog_err(source_name, e))
}

// ── Taiwan ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TwseRow {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct TpexRow {
    #[serde(rename = "SecuritiesCompanyCode")]
    code: String,
    #[serde(rename = "CompanyName")]
    name: String,
}

/// Ordinary shares have 4-character codes and ETFs start with `00`; anything
/// else on these boards is a warrant or other derivative.
fn keep_tw_code(code: &str) -> bool {
    code.len() == 4 || code.starts_with("00")
}

pub fn parse_twse(json: &str) -> Result<Vec<SymbolRecord>, DataError> {
    let rows: Vec<TwseRow> = serde_json::from_str(json).map_err(|e| catalog_err("twse", e))?;
    let profile = Market::Tw.profile();
    Ok(rows
        .iter()
        .filter(|r| keep_tw_code(r.code.trim()))
        .map(|r| profile.symbol(&r.code, &r.name, Some("TWSE")))
        .collect())
}

pub fn parse_tpex(json: &str) -> Result<Vec<SymbolRecord>, DataError> {
    let rows: Vec<TpexRow> = serde_json::from_str(json).map_err(|e| catalog_err("tpex", e))?;
    let profile = Market::Tw.profile();
    Ok(rows
        .iter()
        .filter(|r| keep_tw_code(r.code.trim()))
        .map(|r| profile.symbol(&r.code, &r.name, Some("TPEx")))
        .collect())
}

/// TWSE listed and TPEx OTC boards. Each board fails independently.
pub struct TaiwanOpenData {
    client: reqwest::blocking::Client,
}

impl TaiwanOpenData {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl CatalogSource for TaiwanOpenData {
    fn name(&self) -> &str {
        "twse+tpex"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let boards: [(&str, &str, fn(&str) -> Result<Vec<SymbolRecord>, DataError>); 2] =
            [("twse", TWSE_URL, parse_twse), ("tpex", TPEX_URL, parse_tpex)];
        collect_boards(&boards, |url, name| get_text(&self.client, url, name))
    }
}

/// Run every board, keeping what succeeds. Errors only if all boards fail.
fn collect_boards<F>(
    boards: &[(&str, &str, fn(&str) -> Result<Vec<SymbolRecord>, DataError>)],
    fetch: F,
) -> Result<Vec<SymbolRecord>, DataError>
where
    F: Fn(&str, &str) -> Result<String, DataError>,
{
    let mut symbols = Vec::new();
    let mut last_err = None;
    for (name, url, parse) in boards {
        match fetch(url, name).and_then(|body| parse(&body)) {
            Ok(rows) => {
                tracing::debug!(board = name, rows = rows.len(), "catalog board fetched");
                symbols.extend(rows);
            }
            Err(e) => {
                tracing::warn!(board = name, error = %e, "catalog board failed");
                last_err = Some(e);
            }
        }
    }
    match (symbols.is_empty(), last_err) {
        (true, Some(e)) => Err(e),
        _ => Ok(dedup_by_ticker(symbols)),
    }
}

// ── United States ───────────────────────────────────────────────────

fn is_common_stock(name: &str, is_etf: bool) -> bool {
    if is_etf {
        return false;
    }
    let upper = name.to_uppercase();
    !US_EXCLUDED_KEYWORDS.iter().any(|kw| upper.contains(kw))
}

/// Parse a nasdaqtrader symbol directory file.
///
/// `symbol_column` and `keep` select the listing; the trailing
/// `File Creation Time` row is ignored.
fn parse_symbol_directory<K>(text: &str, symbol_column: &str, keep: K) -> Result<Vec<SymbolRecord>, DataError>
where
    K: Fn(&csv::StringRecord, &dyn Fn(&str) -> Option<usize>) -> bool,
{
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| catalog_err("nasdaqtrader", e))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let symbol_idx = column(symbol_column)
        .ok_or_else(|| catalog_err("nasdaqtrader", format!("missing column '{symbol_column}'")))?;
    let name_idx = column("Security Name")
        .ok_or_else(|| catalog_err("nasdaqtrader", "missing column 'Security Name'"))?;
    let test_idx = column("Test Issue");
    let etf_idx = column("ETF");

    let profile = Market::Us.profile();
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| catalog_err("nasdaqtrader", e))?;
        let field = |i: Option<usize>| i.and_then(|i| record.get(i)).unwrap_or("").trim();

        let symbol = field(Some(symbol_idx));
        if symbol.is_empty() || symbol.starts_with("File Creation Time") {
            continue;
        }
        if field(test_idx) != "N" {
            continue;
        }
        let name = field(Some(name_idx));
        if !is_common_stock(name, field(etf_idx) == "Y") {
            continue;
        }
        if !keep(&record, &column) {
            continue;
        }
        out.push(profile.symbol(symbol, name, None));
    }
    Ok(out)
}

/// NASDAQ listings on the Global Select (Q) and Global (G) tiers.
pub fn parse_nasdaq_listed(text: &str) -> Result<Vec<SymbolRecord>, DataError> {
    parse_symbol_directory(text, "Symbol", |record, column| {
        let category = column("Market Category").and_then(|i| record.get(i)).unwrap_or("");
        matches!(category.trim(), "Q" | "G")
    })
}

/// NYSE listings (exchange `N`) from the other-listed file.
pub fn parse_other_listed(text: &str) -> Result<Vec<SymbolRecord>, DataError> {
    parse_symbol_directory(text, "NASDAQ Symbol", |record, column| {
        let exchange = column("Exchange").and_then(|i| record.get(i)).unwrap_or("");
        exchange.trim() == "N"
    })
}

/// nasdaqtrader.com symbol directory.
pub struct NasdaqTrader {
    client: reqwest::blocking::Client,
}

impl NasdaqTrader {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl CatalogSource for NasdaqTrader {
    fn name(&self) -> &str {
        "nasdaqtrader"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let boards: [(&str, &str, fn(&str) -> Result<Vec<SymbolRecord>, DataError>); 2] = [
            ("nasdaq", NASDAQ_LISTED_URL, parse_nasdaq_listed),
            ("nyse", OTHER_LISTED_URL, parse_other_listed),
        ];
        collect_boards(&boards, |url, name| get_text(&self.client, url, name))
    }
}

// ── China ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EastmoneyResponse {
    data: Option<EastmoneyData>,
}

#[derive(Debug, Deserialize)]
struct EastmoneyData {
    diff: Vec<EastmoneyRow>,
}

#[derive(Debug, Deserialize)]
struct EastmoneyRow {
    f12: String,
    f14: String,
}

pub fn parse_eastmoney(json: &str) -> Result<Vec<SymbolRecord>, DataError> {
    let resp: EastmoneyResponse = serde_json::from_str(json).map_err(|e| catalog_err("eastmoney", e))?;
    let data = resp
        .data
        .ok_or_else(|| catalog_err("eastmoney", "response has no data"))?;
    let profile = Market::Cn.profile();
    Ok(data
        .diff
        .iter()
        .filter(|r| CN_VALID_PREFIXES.iter().any(|p| r.f12.starts_with(p)))
        .map(|r| profile.symbol(&r.f12, &r.f14, None))
        .collect())
}

/// Eastmoney A-share list (Shanghai and Shenzhen).
pub struct Eastmoney {
    client: reqwest::blocking::Client,
}

impl Eastmoney {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl CatalogSource for Eastmoney {
    fn name(&self) -> &str {
        "eastmoney"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let body = get_text(&self.client, EASTMONEY_URL, "eastmoney")?;
        Ok(dedup_by_ticker(parse_eastmoney(&body)?))
    }
}

// ── Korea ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct KrxResponse {
    #[serde(rename = "OutBlock_1")]
    rows: Vec<KrxRow>,
}

#[derive(Debug, Deserialize)]
struct KrxRow {
    #[serde(rename = "ISU_SRT_CD")]
    code: String,
    #[serde(rename = "ISU_ABBRV")]
    name: String,
}

/// Parse one KRX board listing; `board` is `KS` (KOSPI) or `KQ` (KOSDAQ).
pub fn parse_krx(json: &str, board: &str) -> Result<Vec<SymbolRecord>, DataError> {
    let resp: KrxResponse = serde_json::from_str(json).map_err(|e| catalog_err("krx", e))?;
    let profile = Market::Kr.profile();
    Ok(resp
        .rows
        .iter()
        .filter(|r| !r.code.trim().is_empty())
        .map(|r| profile.symbol(&r.code, &r.name, Some(board)))
        .collect())
}

/// KRX market data service, KOSPI and KOSDAQ.
pub struct Krx {
    client: reqwest::blocking::Client,
}

impl Krx {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }

    fn board(&self, market_id: &str, board: &str) -> Result<Vec<SymbolRecord>, DataError> {
        let resp = self
            .client
            .post(KRX_URL)
            .header("Referer", "http://data.krx.co.kr/contents/MDC/MDI/mdiLoader/index.cmd")
            .form(&[
                ("bld", "dbms/MDC/STAT/standard/MDCSTAT01901"),
                ("mktId", market_id),
                ("share", "1"),
                ("csvxls_isNo", "false"),
            ])
            .send()
            .map_err(DataError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DataError::Http {
                status: status.as_u16(),
                url: KRX_URL.to_string(),
            });
        }
        let body = resp.text().map_err(|e| catalog_err("krx", e))?;
        parse_krx(&body, board)
    }
}

impl CatalogSource for Krx {
    fn name(&self) -> &str {
        "krx"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let mut symbols = Vec::new();
        let mut last_err = None;
        for (market_id, board) in [("STK", "KS"), ("KSQ", "KQ")] {
            match self.board(market_id, board) {
                Ok(rows) => symbols.extend(rows),
                Err(e) => {
                    tracing::warn!(board, error = %e, "catalog board failed");
                    last_err = Some(e);
                }
            }
        }
        match (symbols.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(dedup_by_ticker(symbols)),
        }
    }
}

// ── Japan ───────────────────────────────────────────────────────────

/// Segment marker for domestic common stock (Prime, Standard, Growth).
const JPX_DOMESTIC_SEGMENT: &str = "内国株式";

/// Cell text of the first sheet of a JPX `.xls` listing.
pub fn read_jpx_workbook(bytes: Vec<u8>) -> Result<Vec<Vec<String>>, DataError> {
    use calamine::{open_workbook_from_rs, Reader, Xls};

    let mut workbook: Xls<_> = open_workbook_from_rs(Cursor::new(bytes)).map_err(|e| catalog_err("jpx", e))?;
    let sheet = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| catalog_err("jpx", "workbook has no sheets"))?
        .map_err(|e| catalog_err("jpx", e))?;
    Ok(sheet
        .rows()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect())
}

/// Keep 4-digit domestic stocks from the listed-issues sheet (board `T`).
///
/// Columns are found by their Japanese header; ETFs, REITs, PRO Market and
/// foreign listings are dropped by segment.
pub fn parse_jpx_rows(rows: &[Vec<String>]) -> Result<Vec<SymbolRecord>, DataError> {
    let (header, body) = rows
        .split_first()
        .ok_or_else(|| catalog_err("jpx", "sheet is empty"))?;
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| catalog_err("jpx", format!("missing column '{name}'")))
    };
    let code_idx = column("コード")?;
    let name_idx = column("銘柄名")?;
    let segment_idx = column("市場・商品区分")?;

    let profile = Market::Jp.profile();
    Ok(body
        .iter()
        .filter_map(|row| {
            let field = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
            let code = field(code_idx);
            let domestic = field(segment_idx).contains(JPX_DOMESTIC_SEGMENT);
            let numeric = code.len() == 4 && code.chars().all(|c| c.is_ascii_digit());
            (domestic && numeric).then(|| profile.symbol(code, field(name_idx), Some("T")))
        })
        .collect())
}

/// JPX listed-issues workbook.
pub struct Jpx {
    client: reqwest::blocking::Client,
}

impl Jpx {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl CatalogSource for Jpx {
    fn name(&self) -> &str {
        "jpx"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let bytes = get_bytes(&self.client, JPX_URL, "jpx")?;
        let rows = read_jpx_workbook(bytes)?;
        Ok(dedup_by_ticker(parse_jpx_rows(&rows)?))
    }
}

// ── Hong Kong ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HkexRow {
    c: String,
    n: String,
}

/// Parse the HKEXnews active-stock list.
///
/// Keeps codes up to 9999; 8000-8999 is GEM, the rest the main board.
/// Five-digit codes are warrants, CBBCs and other structured products.
pub fn parse_hkex_active(json: &str) -> Result<Vec<SymbolRecord>, DataError> {
    let rows: Vec<HkexRow> = serde_json::from_str(json).map_err(|e| catalog_err("hkexnews", e))?;
    let profile = Market::Hk.profile();
    Ok(rows
        .iter()
        .filter_map(|r| {
            let code = r.c.trim();
            let n: u32 = code.parse().ok()?;
            if n == 0 || n > 9999 {
                return None;
            }
            let board = if (8000..9000).contains(&n) { "GEM" } else { "MAIN" };
            Some(profile.symbol(code, r.n.trim(), Some(board)))
        })
        .collect())
}

/// HKEXnews securities list, main board and GEM.
pub struct HkexNews {
    client: reqwest::blocking::Client,
}

impl HkexNews {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl CatalogSource for HkexNews {
    fn name(&self) -> &str {
        "hkexnews"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let body = get_text(&self.client, HKEX_ACTIVE_URL, "hkexnews")?;
        Ok(dedup_by_ticker(parse_hkex_active(&body)?))
    }
}

// ── Reference datasets (JP, HK fallback) ────────────────────────────

/// A `code,name` CSV, bundled with the crate or read from a path.
///
/// The bundled lists cover the large caps only; they keep JP and HK runnable
/// when the exchange listing is unreachable.
pub struct ReferenceList {
    market: Market,
    bundled: &'static str,
    path: Option<PathBuf>,
}

impl ReferenceList {
    /// The dataset shipped for `market`. Markets without one yield no rows.
    pub fn bundled(market: Market) -> Self {
        let bundled = match market {
            Market::Jp => JP_REFERENCE,
            Market::Hk => HK_REFERENCE,
            _ => "code,name\n",
        };
        Self {
            market,
            bundled,
            path: None,
        }
    }

    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    fn text(&self) -> Result<Cow<'static, str>, DataError> {
        match &self.path {
            Some(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|e| DataError::io(path, e)),
            None => Ok(Cow::Borrowed(self.bundled)),
        }
    }
}

impl CatalogSource for ReferenceList {
    fn name(&self) -> &str {
        "reference-list"
    }

    fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
        let text = self.text()?;
        parse_reference(self.market, &text).map(dedup_by_ticker)
    }
}

/// Parse a `code,name` dataset. Header names are matched case-insensitively.
///
/// JP keeps only 4-digit numeric codes (board `T`); HK keeps numeric codes.
pub fn parse_reference(market: Market, text: &str) -> Result<Vec<SymbolRecord>, DataError> {
    let text = text.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| catalog_err("reference-list", e))?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();
    let code_idx = headers
        .iter()
        .position(|h| h == "code")
        .ok_or_else(|| catalog_err("reference-list", "missing column 'code'"))?;
    let name_idx = headers
        .iter()
        .position(|h| h == "name")
        .ok_or_else(|| catalog_err("reference-list", "missing column 'name'"))?;

    let profile = market.profile();
    let mut out = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| catalog_err("reference-list", e))?;
        let code = record.get(code_idx).unwrap_or("").trim();
        let name = record.get(name_idx).unwrap_or("").trim();
        let numeric = !code.is_empty() && code.chars().all(|c| c.is_ascii_digit());

        match market {
            Market::Jp if code.len() == 4 && numeric => out.push(profile.symbol(code, name, Some("T"))),
            Market::Jp => {}
            _ if numeric => out.push(profile.symbol(code, name, None)),
            _ => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twse_keeps_shares_and_etfs_only() {
        let json = r#"[
            {"Code":"2330","Name":"台積電","ClosingPrice":"593.00"},
            {"Code":"0050","Name":"元大台灣50"},
            {"Code":"00878","Name":"國泰永續高股息"},
            {"Code":"030001","Name":"某權證購01"}
        ]"#;
        let syms = parse_twse(json).unwrap();
        let tickers: Vec<_> = syms.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["2330.TW", "0050.TW", "00878.TW"]);
        assert_eq!(syms[0].board.as_deref(), Some("TWSE"));
    }

    #[test]
    fn tpex_rows_get_otc_suffix() {
        let json = r#"[{"SecuritiesCompanyCode":"6488","CompanyName":"環球晶"},{"SecuritiesCompanyCode":"7012345","CompanyName":"權證"}]"#;
        let syms = parse_tpex(json).unwrap();
        assert_eq!(syms.len(), 1);
        assert_eq!(syms[0].ticker, "6488.TWO");
    }

    #[test]
    fn one_failed_board_does_not_sink_the_catalog() {
        let boards: [(&str, &str, fn(&str) -> Result<Vec<SymbolRecord>, DataError>); 2] =
            [("twse", "a", parse_twse), ("tpex", "b", parse_tpex)];

        let syms = collect_boards(&boards, |url, _| {
            if url == "a" {
                Err(DataError::Timeout("slow".into()))
            } else {
                Ok(r#"[{"SecuritiesCompanyCode":"6488","CompanyName":"環球晶"}]"#.into())
            }
        })
        .unwrap();
        assert_eq!(syms.len(), 1);

        let all_failed = collect_boards(&boards, |_, _| Err(DataError::Timeout("slow".into())));
        assert!(all_failed.is_err());
    }

    const NASDAQ_LISTED: &str = "\
Symbol|Security Name|Market Category|Test Issue|Financial Status|Round Lot Size|ETF|NextShares
AAPL|Apple Inc. - Common Stock|Q|N|N|100|N|N
QQQ|Invesco QQQ Trust, Series 1|G|N|N|100|Y|N
ZXZZT|NASDAQ TEST STOCK|G|Y|N|100|N|N
ABCDW|Abc Acquisition Corp - Warrant|G|N|N|100|N|N
SMAL|Small Cap Co - Common Stock|S|N|N|100|N|N
BABA|Alibaba Group Holding Limited American Depositary Shares|Q|N|N|100|N|N
File Creation Time: 0502202418:02|||||||
";

    const OTHER_LISTED: &str = "\
ACT Symbol|Security Name|Exchange|CQS Symbol|ETF|Round Lot Size|Test Issue|NASDAQ Symbol
BRK.B|Berkshire Hathaway Inc. Class B|N|BRK.B|N|100|N|BRK.B
PBR$A|Petroleo Brasileiro Preferred|N|PBR$A|N|100|N|PBR$A
SPY|SPDR S&P 500 ETF Trust|P|SPY|Y|100|N|SPY
KO|Coca-Cola Company (The) Common Stock|N|KO|N|100|N|KO
XYZ|Xyz Corp|A|XYZ|N|100|N|XYZ
File Creation Time: 0502202418:02|||||||
";

    #[test]
    fn nasdaq_filters() {
        let syms = parse_nasdaq_listed(NASDAQ_LISTED).unwrap();
        let tickers: Vec<_> = syms.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAPL"]);
    }

    #[test]
    fn other_listed_filters_and_normalizes() {
        let syms = parse_other_listed(OTHER_LISTED).unwrap();
        let tickers: Vec<_> = syms.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["BRK-B", "KO"]);
    }

    #[test]
    fn eastmoney_prefix_filter_and_suffixes() {
        let json = r#"{"rc":0,"data":{"total":4,"diff":[
            {"f12":"600519","f14":"貴州茅台"},
            {"f12":"000001","f14":"平安銀行"},
            {"f12":"830799","f14":"艾融軟件"},
            {"f12":"688981","f14":"中芯國際"}
        ]}}"#;
        let syms = parse_eastmoney(json).unwrap();
        let tickers: Vec<_> = syms.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["600519.SS", "000001.SZ", "688981.SS"]);
        assert!(parse_eastmoney(r#"{"rc":0,"data":null}"#).is_err());
    }

    #[test]
    fn krx_rows_use_board_suffix() {
        let json = r#"{"OutBlock_1":[{"ISU_SRT_CD":"035720","ISU_ABBRV":"카카오"},{"ISU_SRT_CD":"","ISU_ABBRV":"?"}]}"#;
        let syms = parse_krx(json, "KQ").unwrap();
        assert_eq!(syms.len(), 1);
        assert_eq!(syms[0].ticker, "035720.KQ");
    }

    fn jpx_sheet(rows: &[[&str; 4]]) -> Vec<Vec<String>> {
        let header = ["日付", "コード", "銘柄名", "市場・商品区分"];
        std::iter::once(&header)
            .chain(rows)
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn jpx_keeps_domestic_four_digit_codes() {
        let sheet = jpx_sheet(&[
            ["20241031", "7203", "トヨタ自動車", "プライム（内国株式）"],
            ["20241031", "3923", "ラクス", "グロース（内国株式）"],
            ["20241031", "1306", "ＮＥＸＴ　ＦＵＮＤＳ　ＴＯＰＩＸ連動型上場投信", "ETF・ETN"],
            ["20241031", "8951", "日本ビルファンド投資法人", "REIT・ベンチャーファンド・カントリーファンド・インフラファンド"],
            ["20241031", "130A", "Veritas In Silico", "グロース（内国株式）"],
            ["20241031", "9973", "小僧寿し", "スタンダード（内国株式）"],
        ]);
        let syms = parse_jpx_rows(&sheet).unwrap();
        let tickers: Vec<_> = syms.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["7203.T", "3923.T", "9973.T"]);
        assert_eq!(syms[0].display_name, "トヨタ自動車");
    }

    #[test]
    fn jpx_sheet_without_expected_header_is_rejected() {
        assert!(parse_jpx_rows(&[]).is_err());
        let wrong = vec![vec!["Code".to_string(), "Name".to_string()]];
        assert!(parse_jpx_rows(&wrong).is_err());
        assert!(read_jpx_workbook(b"not a workbook".to_vec()).is_err());
    }

    #[test]
    fn hkex_active_list_boards() {
        let json = r#"[
            {"c":"00001","i":1,"n":"CKH HOLDINGS"},
            {"c":"00700","i":700,"n":"TENCENT"},
            {"c":"08083","i":8083,"n":"CHINA YOUZAN"},
            {"c":"12345","i":12345,"n":"SOME CBBC"},
            {"c":"ABCDE","i":0,"n":"bad"}
        ]"#;
        let syms = parse_hkex_active(json).unwrap();
        let tickers: Vec<_> = syms.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["0001.HK", "0700.HK", "8083.HK"]);
        assert_eq!(syms[1].board.as_deref(), Some("MAIN"));
        assert_eq!(syms[2].board.as_deref(), Some("GEM"));
        assert!(parse_hkex_active("{}").is_err());
    }

    enum Fixed {
        Listing(Vec<SymbolRecord>),
        Down,
    }

    impl CatalogSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn fetch(&self) -> Result<Vec<SymbolRecord>, DataError> {
            match self {
                Fixed::Listing(rows) => Ok(rows.clone()),
                Fixed::Down => Err(DataError::Timeout("listing".into())),
            }
        }
    }

    #[test]
    fn fallback_covers_failed_or_empty_listing() {
        let profile = Market::Hk.profile();
        let live = vec![profile.symbol("00700", "TENCENT", Some("MAIN"))];
        let bundled = || Box::new(ReferenceList::bundled(Market::Hk));

        let ok = WithFallback::new(Box::new(Fixed::Listing(live.clone())), bundled());
        assert_eq!(ok.fetch().unwrap(), live);

        let expected = ReferenceList::bundled(Market::Hk).fetch().unwrap();
        let down = WithFallback::new(Box::new(Fixed::Down), bundled());
        assert_eq!(down.fetch().unwrap(), expected);

        let empty = WithFallback::new(Box::new(Fixed::Listing(Vec::new())), bundled());
        assert_eq!(empty.fetch().unwrap(), expected);

        let both_down = WithFallback::new(Box::new(Fixed::Down), Box::new(Fixed::Down));
        assert!(both_down.fetch().is_err());
    }

    #[test]
    fn jp_and_hk_sources_prefer_listing_unless_overridden() {
        let client = http_client(Duration::from_secs(1)).unwrap();
        let jp = standard_source(&Market::Jp.profile(), client.clone(), None);
        assert_eq!(jp.name(), "jpx|reference-list");
        let hk = standard_source(&Market::Hk.profile(), client.clone(), None);
        assert_eq!(hk.name(), "hkexnews|reference-list");

        let pinned = standard_source(&Market::Jp.profile(), client, Some(PathBuf::from("tse.csv")));
        assert_eq!(pinned.name(), "reference-list");
    }

    #[test]
    fn reference_lists() {
        let jp = parse_reference(Market::Jp, "Code,Name\n7203,TOYOTA\n130A,Veritas\n25935,ETN\n").unwrap();
        assert_eq!(jp.len(), 1);
        assert_eq!(jp[0].ticker, "7203.T");

        let hk = parse_reference(Market::Hk, "code,name\n00700,騰訊控股\nABC,bad\n").unwrap();
        assert_eq!(hk.len(), 1);
        assert_eq!(hk[0].ticker, "0700.HK");
    }

    #[test]
    fn bundled_reference_lists_load() {
        for market in [Market::Jp, Market::Hk] {
            let syms = ReferenceList::bundled(market).fetch().unwrap();
            assert!(syms.len() > 10, "{market} reference list too small");
        }
    }

    #[test]
    fn reference_override_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jp.csv");
        std::fs::write(&path, "code,name\n9984,SoftBank Group Corp.\n").unwrap();

        let syms = ReferenceList::bundled(Market::Jp).with_path(path).fetch().unwrap();
        assert_eq!(syms.len(), 1);
        assert_eq!(syms[0].ticker, "9984.T");

        let missing = ReferenceList::bundled(Market::Jp).with_path(dir.path().join("nope.csv"));
        assert!(missing.fetch().is_err());
    }
}
