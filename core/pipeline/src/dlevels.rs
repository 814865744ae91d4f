//! DLevels web service client.
//!
//! Two endpoints are used: an autosearch that maps an NSE symbol to the
//! site's own stock key, and the "Fundamental Report" action that returns
//! the fundamentals for that key.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use valuestocks_common::{Error, Result};

use crate::nse::EquityListing;

/// Base URL of the DLevels web service.
pub const DLEVELS_BASE_URL: &str = "https://ws.dlevels.com/";

/// Default pause between consecutive requests.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(20);

/// Placeholder for valuation figures the service does not provide.
const NO_VALUE: &str = "0";
const NO_FAIR_RANGE: &str = "0-0";

/// Symbol with its DLevels key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicInfo {
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "DLEVEL_KEY")]
    pub dlevel_key: String,
}

/// Fundamentals of one stock, one CSV row.
///
/// Values are kept as the service reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedInfo {
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "SECTOR")]
    pub sector: String,
    #[serde(rename = "CMP")]
    pub cmp: String,
    #[serde(rename = "VALUATION")]
    pub valuation: String,
    #[serde(rename = "FAIRRANGE")]
    pub fair_range: String,
    #[serde(rename = "PE")]
    pub pe: String,
    #[serde(rename = "SECTORPE")]
    pub sector_pe: String,
    #[serde(rename = "MARKETCAP")]
    pub market_cap: String,
    #[serde(rename = "MKCAPTYPE")]
    pub market_cap_type: String,
    #[serde(rename = "TREND")]
    pub trend: String,
    #[serde(rename = "FUNDAMENTAL")]
    pub fundamental: String,
    #[serde(rename = "MOMENTUM")]
    pub momentum: String,
    #[serde(rename = "DERATIO")]
    pub de_ratio: String,
    #[serde(rename = "PRICETOSALES")]
    pub price_to_sales: String,
    #[serde(rename = "PLEDGE")]
    pub pledge: String,
    #[serde(rename = "QBS")]
    pub qbs: String,
    #[serde(rename = "QBS%")]
    pub qbs_percent: String,
    #[serde(rename = "AGS")]
    pub ags: String,
    #[serde(rename = "AGS%")]
    pub ags_percent: String,
    #[serde(rename = "VALUATION_DCF")]
    pub valuation_dcf: String,
    #[serde(rename = "VALUATION_GRAHAM")]
    pub valuation_graham: String,
    #[serde(rename = "VALUATION_EARNING")]
    pub valuation_earning: String,
    #[serde(rename = "VALUATION_BOOKVALUE")]
    pub valuation_book_value: String,
    #[serde(rename = "VALUATION_SALES")]
    pub valuation_sales: String,
}

impl AdvancedInfo {
    /// Build a row from the fields object of a fundamentals report.
    pub fn from_report(basic: &BasicInfo, fields: &Map<String, Value>) -> Self {
        let text = |key: &str| fields.get(key).map(value_text).unwrap_or_default();

        Self {
            symbol: basic.symbol.clone(),
            name: basic.name.clone(),
            sector: text("SECTOR"),
            cmp: text("LastClose"),
            valuation: text("valuation"),
            fair_range: NO_FAIR_RANGE.to_string(),
            pe: text("Pe"),
            sector_pe: NO_VALUE.to_string(),
            market_cap: text("MarketCap"),
            market_cap_type: text("MkCapType"),
            trend: text("technical_trend"),
            fundamental: text("stock_fundamental"),
            momentum: text("price_momentum"),
            de_ratio: text("Deratio"),
            price_to_sales: text("PriceToSales"),
            pledge: text("Pledge"),
            qbs: score_text(&text("Qbs")),
            qbs_percent: text("qbs_perc"),
            ags: score_text(&text("Ags")),
            ags_percent: text("ags_perc"),
            valuation_dcf: NO_VALUE.to_string(),
            valuation_graham: NO_VALUE.to_string(),
            valuation_earning: NO_VALUE.to_string(),
            valuation_book_value: NO_VALUE.to_string(),
            valuation_sales: NO_VALUE.to_string(),
        }
    }
}

/// Render a JSON scalar the way it appears in the CSV.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `"7/10"` becomes `"7(10)"`; spreadsheets read the former as a date.
fn score_text(raw: &str) -> String {
    if raw.is_empty() {
        String::new()
    } else {
        format!("{})", raw.replace('/', "("))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    response: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "EXCHANGE_NAME", default)]
    exchange_name: Option<String>,
    #[serde(rename = "Symbol_Name", default)]
    symbol_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    #[serde(default)]
    response: Vec<Value>,
}

/// Client for the DLevels web service.
pub struct DLevelsClient {
    http: Client,
    base: Url,
    throttle: Duration,
}

impl DLevelsClient {
    /// Create a client for the public service.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DLEVELS_BASE_URL)
    }

    /// Create a client for a service at `base`.
    ///
    /// # Errors
    /// - `Error::Config` if `base` is not a valid URL
    pub fn with_base_url(base: &str) -> Result<Self> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let base = Url::parse(&base)
            .map_err(|e| Error::Config(format!("Invalid DLevels URL {}: {}", base, e)))?;

        let http = Client::builder()
            .user_agent(concat!("valuestocks/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            throttle: DEFAULT_THROTTLE,
        })
    }

    /// Set the pause inserted by `throttle`.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Wait between consecutive requests.
    pub async fn throttle(&self) {
        if !self.throttle.is_zero() {
            tokio::time::sleep(self.throttle).await;
        }
    }

    fn url(&self, path_and_query: &str) -> Result<Url> {
        self.base
            .join(path_and_query)
            .map_err(|e| Error::InvalidInput(format!("Invalid request {}: {}", path_and_query, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("DLevels request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let summary = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                summary,
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Scrape(format!("Unexpected DLevels response: {}", e)))
    }

    /// Find the DLevels key for a listed symbol.
    ///
    /// Returns `None` when no search result carries the exact symbol.
    pub async fn lookup(&self, listing: &EquityListing) -> Result<Option<BasicInfo>> {
        let mut url = self.url("get-autosearch-stock")?;
        url.query_pairs_mut()
            .append_pair("term", &listing.symbol)
            .append_pair("pageName", "");

        let search: SearchResponse = self.get_json(url).await?;

        let found = search
            .response
            .into_iter()
            .find(|item| item.exchange_name.as_deref() == Some(listing.symbol.as_str()))
            .and_then(|item| item.symbol_name);

        Ok(found.map(|symbol_name| BasicInfo {
            symbol: listing.symbol.clone(),
            name: listing.name.clone(),
            dlevel_key: symbol_name.replace(' ', "_"),
        }))
    }

    /// Fetch the fundamentals report for a stock.
    ///
    /// # Errors
    /// - `Error::Scrape` if the report does not have its two-part shape
    pub async fn fundamentals(&self, basic: &BasicInfo) -> Result<AdvancedInfo> {
        let mut url = self.url("vs-api")?;
        url.query_pairs_mut()
            .append_pair("platform", "web")
            .append_pair("action", "Fundamental Report")
            .append_pair("param_list", &basic.dlevel_key.replace('_', " "));
        let report: ReportResponse = self.get_json(url).await?;

        if report.response.len() != 2 {
            return Err(Error::Scrape(format!(
                "Fundamentals report for {} has {} parts, expected 2",
                basic.symbol,
                report.response.len()
            )));
        }

        let fields = report.response[1]
            .get(0)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::Scrape(format!(
                    "Fundamentals report for {} has no fields object",
                    basic.symbol
                ))
            })?;

        Ok(AdvancedInfo::from_report(basic, fields))
    }
}
