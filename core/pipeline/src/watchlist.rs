//! Amibroker watchlists derived from the advanced info CSV.
//!
//! A watchlist (`.tls`) is a plain list of symbols, one per line.

use std::path::Path;
use tracing::{error, info};

use valuestocks_common::{RemotePath, Result};
use valuestocks_storage::{RemoteStore, StorageClient, TokenSource, TransferReport};

use crate::artifacts::read_advanced_info;
use crate::dlevels::AdvancedInfo;

/// Remote folder receiving the watchlists.
pub const WATCHLIST_FOLDER: &str = "/NSEBSEBhavcopy/Amibroker_Watchlists";

/// Watchlist combining the two best classes.
pub const GREAT_AND_GOOD_FILE: &str = "Great and Good Fundamentals.tls";

/// Fundamental class reported by DLevels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fundamental {
    Good,
    Great,
    Moderate,
    Poor,
}

impl Fundamental {
    pub const ALL: [Fundamental; 4] = [
        Fundamental::Good,
        Fundamental::Great,
        Fundamental::Moderate,
        Fundamental::Poor,
    ];

    /// Label as it appears in the `FUNDAMENTAL` column.
    pub fn label(self) -> &'static str {
        match self {
            Fundamental::Good => "Good Fundamentals",
            Fundamental::Great => "Great Fundamentals",
            Fundamental::Moderate => "Moderate Fundamentals",
            Fundamental::Poor => "Poor Fundamentals",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }

    /// Name of this class's watchlist file.
    pub fn file_name(self) -> String {
        format!("{}.tls", self.label())
    }
}

/// Symbols whose fundamental class passes `accept`, in row order.
pub fn select_symbols<F>(rows: &[AdvancedInfo], accept: F) -> Vec<&str>
where
    F: Fn(Fundamental) -> bool,
{
    rows.iter()
        .filter(|row| Fundamental::from_label(&row.fundamental).is_some_and(&accept))
        .map(|row| row.symbol.as_str())
        .collect()
}

fn render(symbols: &[&str]) -> String {
    symbols.iter().map(|s| format!("{}\n", s)).collect()
}

/// Write one watchlist per fundamental class plus the combined great and
/// good list into `out_dir`, and upload each to `WATCHLIST_FOLDER`.
///
/// A watchlist that cannot be written or uploaded is recorded in the
/// report; the others are still produced.
pub async fn generate_watchlists<R: RemoteStore, S: TokenSource>(
    csv_path: &Path,
    out_dir: &Path,
    storage: &mut StorageClient<R, S>,
) -> Result<TransferReport> {
    info!("Generating watchlists from {}", csv_path.display());
    let rows = read_advanced_info(csv_path)
        .inspect_err(|e| error!("Error reading {}: {}", csv_path.display(), e))?;

    let mut lists: Vec<(String, Vec<&str>)> = Fundamental::ALL
        .into_iter()
        .map(|class| (class.file_name(), select_symbols(&rows, |f| f == class)))
        .collect();
    lists.push((
        GREAT_AND_GOOD_FILE.to_string(),
        select_symbols(&rows, |f| matches!(f, Fundamental::Great | Fundamental::Good)),
    ));

    let folder = RemotePath::parse(WATCHLIST_FOLDER)?;
    let mut report = TransferReport::default();
    for (file_name, symbols) in lists {
        let local = out_dir.join(&file_name);
        let published = async {
            tokio::fs::write(&local, render(&symbols)).await?;
            info!("Wrote {} symbols to {}", symbols.len(), local.display());

            let remote = folder.join(&file_name)?;
            storage.upload_file(&local, &remote).await?;
            Ok::<_, valuestocks_common::Error>(remote)
        }
        .await;

        match published {
            Ok(remote) => {
                info!("{} uploaded to {}", file_name, remote);
                report.transferred.push(remote.to_string_path());
            }
            Err(e) => {
                error!("Error publishing {}: {}", file_name, e);
                report.failed.push((file_name, e));
            }
        }
    }

    Ok(report)
}
