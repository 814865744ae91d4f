//! NSE master equity list.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use valuestocks_common::{Error, Result};

use crate::csv_error;

/// Published list of every equity listed on NSE.
pub const NSE_EQUITY_LIST_URL: &str = "https://archives.nseindia.com/content/equities/EQUITY_L.csv";

/// Local cache of the downloaded list.
pub const EQUITY_LIST_FILE: &str = "01.MASTER_EQUITY_L.CSV";

/// HTTP client for the NSE archives, which refuse requests without a
/// browser-like user agent.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("Mozilla/5.0 (X11; Linux x86_64) valuestocks")
        .timeout(std::time::Duration::from_secs(60))
        .build()
        .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))
}

/// One row of the NSE equity list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityListing {
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "NAME OF COMPANY")]
    pub name: String,
    #[serde(rename = "SERIES")]
    pub series: String,
    #[serde(rename = "DATE OF LISTING", default)]
    pub date_of_listing: String,
    #[serde(rename = "PAID UP VALUE", default)]
    pub paid_up_value: String,
    #[serde(rename = "MARKET LOT", default)]
    pub market_lot: String,
    #[serde(rename = "ISIN NUMBER", default)]
    pub isin: String,
    #[serde(rename = "FACE VALUE", default)]
    pub face_value: String,
}

impl EquityListing {
    /// Only the rolling (`EQ`) and trade-for-trade (`BE`) series are scraped.
    pub fn is_tradable_series(&self) -> bool {
        matches!(self.series.as_str(), "EQ" | "BE")
    }
}

/// Parse the equity list CSV.
///
/// Headers and fields are trimmed; the published file pads some headers
/// with a leading space.
pub fn parse_equity_list<R: Read>(reader: R) -> Result<Vec<EquityListing>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<EquityListing>, _>>()
        .map_err(csv_error)
}

/// Load the equity list, downloading it to `cache_path` first if absent.
pub async fn load_equity_list(
    http: &reqwest::Client,
    cache_path: &Path,
    url: &str,
) -> Result<Vec<EquityListing>> {
    if tokio::fs::try_exists(cache_path).await? {
        info!("{} found", cache_path.display());
    } else {
        info!("{} not found, downloading from {}", cache_path.display(), url);
        let response = http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to fetch equity list: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                summary: format!("Equity list download from {} failed", url),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read equity list: {}", e)))?;
        tokio::fs::write(cache_path, &body).await?;
        info!("{} saved", cache_path.display());
    }

    let data = tokio::fs::read(cache_path).await?;
    let listings = parse_equity_list(data.as_slice())?;
    debug!("Loaded {} listings", listings.len());
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = "SYMBOL,NAME OF COMPANY, SERIES, DATE OF LISTING, PAID UP VALUE, MARKET LOT, ISIN NUMBER, FACE VALUE\n\
        20MICRONS,20 Microns Limited,EQ,06-OCT-2008,5,1,INE144J01027,5\n\
        ABAN,Aban Offshore Limited,BE,24-JUL-1995,2,1,INE421A01028,2\n\
        GOLDBEES,Nippon India ETF Gold BeES,ETF,08-MAR-2007,1,1,INF204KB17I5,1\n";

    #[test]
    fn test_parse_trims_padded_headers() {
        let listings = parse_equity_list(SAMPLE.as_bytes()).unwrap();

        assert_eq!(listings.len(), 3);
        assert_eq!(listings[0].symbol, "20MICRONS");
        assert_eq!(listings[0].name, "20 Microns Limited");
        assert_eq!(listings[0].series, "EQ");
        assert_eq!(listings[1].isin, "INE421A01028");
    }

    #[test]
    fn test_tradable_series() {
        let listings = parse_equity_list(SAMPLE.as_bytes()).unwrap();
        let tradable: Vec<_> = listings
            .iter()
            .filter(|l| l.is_tradable_series())
            .map(|l| l.symbol.as_str())
            .collect();
        assert_eq!(tradable, vec!["20MICRONS", "ABAN"]);
    }

    #[tokio::test]
    async fn test_downloads_once_then_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/content/equities/EQUITY_L.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join(EQUITY_LIST_FILE);
        let url = format!("{}/content/equities/EQUITY_L.csv", server.uri());
        let http = http_client().unwrap();

        let first = load_equity_list(&http, &cache, &url).await.unwrap();
        assert!(cache.exists());
        let second = load_equity_list(&http, &cache, &url).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join(EQUITY_LIST_FILE);
        let http = reqwest::Client::new();

        let result = load_equity_list(&http, &cache, &server.uri()).await;
        assert!(matches!(result, Err(Error::Api { status: 403, .. })));
        assert!(!cache.exists());
    }
}
