//! Scrape artifacts: the basic and advanced info CSVs.

use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use valuestocks_common::{RemotePath, Result};
use valuestocks_storage::{RemoteStore, StorageClient, TokenSource, TransferReport};

use crate::csv_error;
use crate::dlevels::{AdvancedInfo, BasicInfo, DLevelsClient};
use crate::nse::{self, EquityListing, EQUITY_LIST_FILE, NSE_EQUITY_LIST_URL};
use crate::watchlist::generate_watchlists;

/// Symbols with their DLevels keys, reused across runs.
pub const BASIC_INFO_FILE: &str = "02.MASTER_EQUITY_L_W_DLEVEL_INFO.CSV";

/// Remote folder receiving the advanced info CSVs.
pub const VALUE_STOCKS_FOLDER: &str = "/NSEBSEBhavcopy/ValueStocks";

/// Timestamp prefix of per-run artifacts.
pub const RUN_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const ADVANCED_INFO_SUFFIX: &str = "-3.DLEVEL_ADVANCED_INFO.CSV";
const ADVANCED_FAILURE_SUFFIX: &str = "-3.DLEVEL_ADVANCED_INFO_FAILURE.CSV";

/// Where and how a scrape runs.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Directory holding cached lists and generated files.
    pub work_dir: PathBuf,
    pub equity_list_url: String,
    /// Draw progress bars on the terminal.
    pub show_progress: bool,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            equity_list_url: NSE_EQUITY_LIST_URL.to_string(),
            show_progress: true,
        }
    }
}

/// Files produced by `build_advanced_info`.
#[derive(Debug, Default)]
pub struct AdvancedReport {
    pub advanced_file: Option<PathBuf>,
    pub failure_file: Option<PathBuf>,
    pub uploaded: Option<RemotePath>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of a full scrape run.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub advanced: AdvancedReport,
    /// Present when an advanced info CSV was produced.
    pub watchlists: Option<TransferReport>,
}

fn progress_bar(len: usize, show: bool, message: &'static str) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar.set_message(message);
    bar
}

pub(crate) fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(csv_error)
}

pub(crate) fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    for row in rows {
        writer.serialize(row).map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

/// Map tradable listings to their DLevels keys.
///
/// The result is cached in `BASIC_INFO_FILE` under the work directory; when
/// that file exists it is returned as-is. Symbols that cannot be resolved are
/// logged and left out.
pub async fn build_basic_info(
    dlevels: &DLevelsClient,
    listings: &[EquityListing],
    settings: &ScrapeSettings,
) -> Result<Vec<BasicInfo>> {
    let path = settings.work_dir.join(BASIC_INFO_FILE);
    if path.exists() {
        info!("Basic info {} found", path.display());
        return read_csv(&path);
    }

    info!("Basic info {} not found, building", path.display());
    debug!("Total symbols to process: {}", listings.len());

    let bar = progress_bar(listings.len(), settings.show_progress, "Building DLevel stock info");
    let mut rows = Vec::new();
    for listing in listings {
        if listing.is_tradable_series() {
            match dlevels.lookup(listing).await {
                Ok(Some(info)) => rows.push(info),
                Ok(None) => debug!("No DLevels match for {}", listing.symbol),
                Err(e) => warn!("Lookup failed for {}: {}", listing.symbol, e),
            }
            dlevels.throttle().await;
        } else {
            debug!("Skipping {}: series {}", listing.symbol, listing.series);
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    if rows.is_empty() {
        warn!("No basic info found, {} not written", path.display());
    } else {
        write_csv(&path, &rows)?;
        info!("Basic info for {} symbols written to {}", rows.len(), path.display());
    }

    Ok(rows)
}

/// Fetch fundamentals for every basic row and publish the result.
///
/// Writes `<stamp>-3.DLEVEL_ADVANCED_INFO.CSV` and uploads it to
/// `VALUE_STOCKS_FOLDER`. Rows whose fundamentals could not be fetched go to
/// `<stamp>-3.DLEVEL_ADVANCED_INFO_FAILURE.CSV`, which stays local.
pub async fn build_advanced_info<R: RemoteStore, S: TokenSource>(
    dlevels: &DLevelsClient,
    basics: &[BasicInfo],
    settings: &ScrapeSettings,
    run_stamp: &str,
    storage: &mut StorageClient<R, S>,
) -> Result<AdvancedReport> {
    let mut report = AdvancedReport::default();
    if basics.is_empty() {
        warn!(
            "Basic info not available, check that {} exists and contains data",
            BASIC_INFO_FILE
        );
        return Ok(report);
    }
    info!("Basic info available for {} symbols, building advanced info", basics.len());

    let bar = progress_bar(basics.len(), settings.show_progress, "Fetching fundamentals");
    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for basic in basics {
        debug!("Fetching advanced info for {} ({})", basic.symbol, basic.dlevel_key);
        match dlevels.fundamentals(basic).await {
            Ok(info) => rows.push(info),
            Err(e) => {
                warn!("Unable to get advanced info for {}: {}", basic.symbol, e);
                failures.push(basic.clone());
            }
        }
        dlevels.throttle().await;
        bar.inc(1);
    }
    bar.finish_and_clear();

    report.succeeded = rows.len();
    report.failed = failures.len();

    if !failures.is_empty() {
        let path = settings
            .work_dir
            .join(format!("{}{}", run_stamp, ADVANCED_FAILURE_SUFFIX));
        write_csv(&path, &failures)?;
        info!("{} failures written to {}", failures.len(), path.display());
        report.failure_file = Some(path);
    }

    if rows.is_empty() {
        warn!("No advanced info to write");
        return Ok(report);
    }

    let file_name = format!("{}{}", run_stamp, ADVANCED_INFO_SUFFIX);
    let path = settings.work_dir.join(&file_name);
    write_csv(&path, &rows)?;
    info!("Advanced info for {} symbols written to {}", rows.len(), path.display());
    report.advanced_file = Some(path.clone());

    let remote = RemotePath::parse(VALUE_STOCKS_FOLDER)?.join(&file_name)?;
    storage
        .upload_file(&path, &remote)
        .await
        .inspect_err(|e| error!("Failed to publish {}: {}", file_name, e))?;
    report.uploaded = Some(remote);

    Ok(report)
}

/// Load advanced info rows from a CSV written by `build_advanced_info`.
pub fn read_advanced_info(path: &Path) -> Result<Vec<AdvancedInfo>> {
    read_csv(path)
}

/// Run the whole scrape: equity list, basic info, advanced info, watchlists.
pub async fn run_scrape<R: RemoteStore, S: TokenSource>(
    settings: &ScrapeSettings,
    dlevels: &DLevelsClient,
    storage: &mut StorageClient<R, S>,
    run_at: NaiveDateTime,
) -> Result<ScrapeReport> {
    tokio::fs::create_dir_all(&settings.work_dir).await?;

    let http = nse::http_client()?;
    let listings = nse::load_equity_list(
        &http,
        &settings.work_dir.join(EQUITY_LIST_FILE),
        &settings.equity_list_url,
    )
    .await?;

    let basics = build_basic_info(dlevels, &listings, settings).await?;
    let stamp = run_at.format(RUN_STAMP_FORMAT).to_string();
    let advanced = build_advanced_info(dlevels, &basics, settings, &stamp, storage).await?;

    let watchlists = match &advanced.advanced_file {
        Some(path) => Some(generate_watchlists(path, &settings.work_dir, storage).await?),
        None => None,
    };

    Ok(ScrapeReport {
        advanced,
        watchlists,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;
    use valuestocks_storage::{MemoryStore, MemoryTokenSource, RetryPolicy};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EQUITY_CSV: &str = "SYMBOL,NAME OF COMPANY, SERIES, DATE OF LISTING, PAID UP VALUE, MARKET LOT, ISIN NUMBER, FACE VALUE\n\
        TCS,Tata Consultancy Services Limited,EQ,25-AUG-2004,1,1,INE467B01029,1\n\
        INFY,Infosys Limited,EQ,08-FEB-1995,5,1,INE009A01021,5\n\
        NOPE,Nope Limited,BE,01-JAN-2000,10,1,INE000000000,10\n\
        GOLDBEES,Nippon India ETF Gold BeES,ETF,08-MAR-2007,1,1,INF204KB17I5,1\n";

    fn settings(dir: &Path) -> ScrapeSettings {
        ScrapeSettings {
            work_dir: dir.to_path_buf(),
            equity_list_url: "http://127.0.0.1:9/unused".to_string(),
            show_progress: false,
        }
    }

    async fn storage(store: &MemoryStore) -> StorageClient<MemoryStore, MemoryTokenSource> {
        StorageClient::new(
            store.clone(),
            store.token_source(),
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
        .await
        .unwrap()
    }

    fn basic(symbol: &str, key: &str) -> BasicInfo {
        BasicInfo {
            symbol: symbol.to_string(),
            name: format!("{} Limited", symbol),
            dlevel_key: key.to_string(),
        }
    }

    async fn mount_dlevels(server: &MockServer) {
        for (symbol, name) in [("TCS", "Tata Consultancy"), ("INFY", "Infosys")] {
            Mock::given(method("GET"))
                .and(path("/get-autosearch-stock"))
                .and(query_param("term", symbol))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "response": [{ "EXCHANGE_NAME": symbol, "Symbol_Name": name }]
                })))
                .with_priority(1)
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/get-autosearch-stock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": [] })))
            .mount(server)
            .await;

        for (key, fundamental) in [
            ("Tata Consultancy", "Great Fundamentals"),
            ("Infosys", "Good Fundamentals"),
        ] {
            Mock::given(method("GET"))
                .and(path("/vs-api"))
                .and(query_param("param_list", key))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "response": [[{}], [{ "SECTOR": "IT", "stock_fundamental": fundamental }]]
                })))
                .with_priority(1)
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/vs-api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": [] })))
            .mount(server)
            .await;
    }

    async fn dlevels(server: &MockServer) -> DLevelsClient {
        DLevelsClient::with_base_url(&server.uri())
            .unwrap()
            .with_throttle(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_basic_info_is_built_then_cached() {
        let server = MockServer::start().await;
        mount_dlevels(&server).await;
        let client = dlevels(&server).await;

        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let listings = nse::parse_equity_list(EQUITY_CSV.as_bytes()).unwrap();

        let built = build_basic_info(&client, &listings, &settings).await.unwrap();
        assert_eq!(
            built,
            vec![
                BasicInfo {
                    symbol: "TCS".to_string(),
                    name: "Tata Consultancy Services Limited".to_string(),
                    dlevel_key: "Tata_Consultancy".to_string(),
                },
                BasicInfo {
                    symbol: "INFY".to_string(),
                    name: "Infosys Limited".to_string(),
                    dlevel_key: "Infosys".to_string(),
                },
            ]
        );
        assert!(dir.path().join(BASIC_INFO_FILE).exists());

        // Served from the cache file even with no listings.
        let cached = build_basic_info(&client, &[], &settings).await.unwrap();
        assert_eq!(cached, built);
    }

    #[tokio::test]
    async fn test_advanced_info_writes_uploads_and_records_failures() {
        let server = MockServer::start().await;
        mount_dlevels(&server).await;
        let client = dlevels(&server).await;

        let store = MemoryStore::new();
        let mut storage = storage(&store).await;
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let basics = vec![basic("TCS", "Tata_Consultancy"), basic("BAD", "Broken_Key")];
        let report = build_advanced_info(&client, &basics, &settings, "20250112-130626", &mut storage)
            .await
            .unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        let advanced = report.advanced_file.unwrap();
        assert!(advanced.ends_with("20250112-130626-3.DLEVEL_ADVANCED_INFO.CSV"));
        let rows = read_advanced_info(&advanced).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fundamental, "Great Fundamentals");

        let failures: Vec<BasicInfo> = read_csv(&report.failure_file.unwrap()).unwrap();
        assert_eq!(failures, vec![basic("BAD", "Broken_Key")]);

        assert_eq!(
            store.file_paths(),
            vec!["/NSEBSEBhavcopy/ValueStocks/20250112-130626-3.DLEVEL_ADVANCED_INFO.CSV".to_string()]
        );
    }

    #[tokio::test]
    async fn test_advanced_info_without_basics_does_nothing() {
        let server = MockServer::start().await;
        let client = dlevels(&server).await;
        let store = MemoryStore::new();
        let mut storage = storage(&store).await;
        let dir = tempfile::tempdir().unwrap();

        let report = build_advanced_info(&client, &[], &settings(dir.path()), "stamp", &mut storage)
            .await
            .unwrap();

        assert!(report.advanced_file.is_none());
        assert!(report.failure_file.is_none());
        assert!(store.file_paths().is_empty());
    }

    #[tokio::test]
    async fn test_full_run_publishes_csv_and_watchlists() {
        let server = MockServer::start().await;
        mount_dlevels(&server).await;
        let client = dlevels(&server).await;

        let store = MemoryStore::new();
        let mut storage = storage(&store).await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(EQUITY_LIST_FILE), EQUITY_CSV).unwrap();

        let run_at = NaiveDate::from_ymd_opt(2025, 1, 12)
            .unwrap()
            .and_hms_opt(13, 6, 26)
            .unwrap();
        let report = run_scrape(&settings(dir.path()), &client, &mut storage, run_at)
            .await
            .unwrap();

        assert_eq!(report.advanced.succeeded, 2);
        let watchlists = report.watchlists.unwrap();
        assert!(watchlists.is_complete());
        assert_eq!(watchlists.transferred.len(), 5);

        let great_and_good = store
            .read_file("/NSEBSEBhavcopy/Amibroker_Watchlists/Great and Good Fundamentals.tls")
            .unwrap();
        assert_eq!(String::from_utf8(great_and_good).unwrap(), "TCS\nINFY\n");
        assert!(store
            .file_paths()
            .contains(&"/NSEBSEBhavcopy/ValueStocks/20250112-130626-3.DLEVEL_ADVANCED_INFO.CSV".to_string()));
    }
}
