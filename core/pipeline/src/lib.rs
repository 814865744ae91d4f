//! ValueStocks fundamentals pipeline.
//!
//! Turns the NSE equity list into fundamentals CSVs scraped from DLevels,
//! derives Amibroker watchlists from them and loads them into SQLite.
//!
//! # Stages
//! - `nse`: the master equity list, cached on disk
//! - `dlevels`: symbol lookup and fundamentals report client
//! - `artifacts`: basic and advanced info CSVs, uploaded through storage
//! - `watchlist`: one `.tls` symbol list per fundamental class
//! - `import`: CSV to SQLite with dictionary tables

pub mod artifacts;
pub mod dlevels;
pub mod import;
pub mod nse;
pub mod watchlist;

pub use artifacts::{
    build_advanced_info, build_basic_info, read_advanced_info, run_scrape, AdvancedReport,
    ScrapeReport, ScrapeSettings,
};
pub use dlevels::{AdvancedInfo, BasicInfo, DLevelsClient};
pub use import::{ImportDate, Importer, Lookup};
pub use nse::{load_equity_list, EquityListing};
pub use watchlist::{generate_watchlists, Fundamental};

use valuestocks_common::Error;

pub(crate) fn db_error(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

pub(crate) fn csv_error(e: csv::Error) -> Error {
    Error::Serialization(format!("CSV error: {}", e))
}
