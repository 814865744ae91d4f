//! ValueStocks CLI - scrape fundamentals, publish artifacts, manage storage.
//!
//! This tool runs the fundamentals pipeline and exposes the storage client's
//! file operations from the command line. One storage client is built per
//! invocation and handed to whatever needs it.

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use valuestocks_common::RemotePath;
use valuestocks_pipeline::{
    generate_watchlists, run_scrape, DLevelsClient, ImportDate, Importer, ScrapeSettings,
};
use valuestocks_storage::{
    CredentialOverrides, Credentials, DropboxStorageClient, RetryPolicy, TransferReport,
};

#[derive(Parser)]
#[command(name = "valuestocks")]
#[command(about = "ValueStocks - NSE fundamentals pipeline and Dropbox storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append log lines to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    dropbox: DropboxArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Storage connection options. Credentials default to the
/// DROPBOX_REFRESH_TOKEN, DROPBOX_CLIENT_ID and DROPBOX_CLIENT_SECRET
/// environment variables (a `.env` file is honored).
#[derive(Args)]
struct DropboxArgs {
    /// Long-lived OAuth2 refresh token.
    #[arg(long, global = true)]
    refresh_token: Option<String>,

    /// OAuth2 client ID.
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// OAuth2 client secret.
    #[arg(long, global = true)]
    client_secret: Option<String>,

    /// Attempts per remote call, including the first.
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,

    /// Seconds to wait after the first failed attempt; doubles each retry.
    #[arg(long, global = true, default_value_t = 2.0)]
    retry_delay: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape fundamentals, publish the CSV and watchlists.
    Scrape {
        /// Directory for cached lists and generated files.
        #[arg(short, long, default_value = ".")]
        work_dir: PathBuf,

        /// Milliseconds to pause between DLevels requests.
        #[arg(long, default_value_t = 20)]
        throttle_ms: u64,

        /// Do not draw progress bars.
        #[arg(long)]
        no_progress: bool,
    },

    /// Generate and publish watchlists from an advanced info CSV.
    Watchlists {
        /// Advanced info CSV.
        csv: PathBuf,

        /// Directory to write the .tls files to.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Import an advanced info CSV into SQLite.
    Import {
        /// Advanced info CSV.
        csv: PathBuf,

        /// SQLite database file.
        #[arg(long, default_value = "ValueStocksDB.db")]
        db: PathBuf,

        /// Import timestamp as YYYYmmdd-HHMMSS (default: from the file name).
        #[arg(long)]
        date: Option<String>,
    },

    /// Upload a local file.
    Upload { local: PathBuf, remote: String },

    /// Download a remote file (default: into the current directory).
    Download {
        remote: String,
        local: Option<PathBuf>,
    },

    /// Upload a local folder recursively.
    UploadFolder {
        local: PathBuf,
        remote: String,

        /// Only files whose name matches this glob.
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Download a remote folder recursively.
    DownloadFolder {
        remote: String,
        local: PathBuf,

        /// Only files whose name matches this glob.
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// List files in a remote folder.
    Ls {
        #[arg(default_value = "/")]
        folder: String,

        /// Only files whose name matches this glob.
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Remove a remote file.
    Rm { remote: String },

    /// Rename a remote file within its folder.
    Mv { remote: String, new_name: String },

    /// Print the most recently modified file in a remote folder.
    Latest { folder: String },

    /// Check whether a remote path exists.
    Exists { remote: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Scrape {
            work_dir,
            throttle_ms,
            no_progress,
        } => cmd_scrape(&cli.dropbox, work_dir, throttle_ms, !no_progress).await,

        Commands::Watchlists { csv, out_dir } => {
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            let mut storage = connect(&cli.dropbox).await?;
            let report = generate_watchlists(&csv, &out_dir, &mut storage)
                .await
                .context("Failed to generate watchlists")?;
            print_report("Watchlists published", &report)
        }

        Commands::Import { csv, db, date } => cmd_import(&csv, &db, date.as_deref()),

        Commands::Upload { local, remote } => {
            let mut storage = connect(&cli.dropbox).await?;
            let entry = storage
                .upload_file(&local, &remote_path(&remote)?)
                .await
                .context("Upload failed")?;
            println!("Uploaded {} ({} bytes)", remote, entry.size);
            Ok(())
        }

        Commands::Download { remote, local } => {
            let mut storage = connect(&cli.dropbox).await?;
            let path = storage
                .download_file(&remote_path(&remote)?, local.as_deref())
                .await
                .context("Download failed")?;
            println!("Downloaded {} to {}", remote, path.display());
            Ok(())
        }

        Commands::UploadFolder {
            local,
            remote,
            pattern,
        } => {
            let mut storage = connect(&cli.dropbox).await?;
            let report = storage
                .upload_folder(&local, &remote_path(&remote)?, pattern.as_deref())
                .await
                .context("Folder upload failed")?;
            print_report("Uploaded", &report)
        }

        Commands::DownloadFolder {
            remote,
            local,
            pattern,
        } => {
            let mut storage = connect(&cli.dropbox).await?;
            let report = storage
                .download_folder(&remote_path(&remote)?, &local, pattern.as_deref())
                .await
                .context("Folder download failed")?;
            print_report("Downloaded", &report)
        }

        Commands::Ls { folder, pattern } => {
            let mut storage = connect(&cli.dropbox).await?;
            let files = storage
                .list_files(&remote_path(&folder)?, pattern.as_deref())
                .await
                .context("Listing failed")?;
            for (name, modified) in files {
                println!("{}  {}", modified.format("%Y-%m-%d %H:%M:%S"), name);
            }
            Ok(())
        }

        Commands::Rm { remote } => {
            let mut storage = connect(&cli.dropbox).await?;
            storage
                .remove_file(&remote_path(&remote)?)
                .await
                .context("Remove failed")?;
            println!("Removed {}", remote);
            Ok(())
        }

        Commands::Mv { remote, new_name } => {
            let mut storage = connect(&cli.dropbox).await?;
            let target = storage
                .rename_file(&remote_path(&remote)?, &new_name)
                .await
                .context("Rename failed")?;
            println!("Renamed {} to {}", remote, target);
            Ok(())
        }

        Commands::Latest { folder } => {
            let mut storage = connect(&cli.dropbox).await?;
            match storage
                .get_most_recent_file(&remote_path(&folder)?)
                .await
                .context("Listing failed")?
            {
                Some(path) => println!("{}", path),
                None => println!("No files in {}", folder),
            }
            Ok(())
        }

        Commands::Exists { remote } => {
            let mut storage = connect(&cli.dropbox).await?;
            let exists = storage
                .file_exists(&remote_path(&remote)?)
                .await
                .context("Existence check failed")?;
            println!("{}", exists);
            if !exists {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn log_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber, writing to stderr or appending to a file.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            let subscriber = FmtSubscriber::builder()
                .with_env_filter(log_filter(verbose))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(log_filter(verbose))
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn remote_path(raw: &str) -> Result<RemotePath> {
    RemotePath::parse(raw).with_context(|| format!("Invalid remote path: {}", raw))
}

/// Build the storage client from flags and environment.
async fn connect(args: &DropboxArgs) -> Result<DropboxStorageClient> {
    let credentials = Credentials::resolve(CredentialOverrides {
        refresh_token: args.refresh_token.clone(),
        client_id: args.client_id.clone(),
        client_secret: args.client_secret.clone(),
    })
    .context("Dropbox credentials are incomplete")?;

    let base_delay = Duration::try_from_secs_f64(args.retry_delay)
        .with_context(|| format!("Invalid retry delay: {}", args.retry_delay))?;
    let policy = RetryPolicy::new(args.max_attempts, base_delay);

    DropboxStorageClient::connect(credentials, policy)
        .await
        .context("Failed to connect to Dropbox")
}

fn print_report(action: &str, report: &TransferReport) -> Result<()> {
    println!("{} {} file(s)", action, report.transferred.len());
    for path in &report.transferred {
        println!("  {}", path);
    }

    if !report.is_complete() {
        for (path, error) in &report.failed {
            eprintln!("  FAILED {}: {}", path, error);
        }
        anyhow::bail!("{} file(s) failed", report.failed.len());
    }
    Ok(())
}

/// Run the full scrape.
async fn cmd_scrape(
    dropbox: &DropboxArgs,
    work_dir: PathBuf,
    throttle_ms: u64,
    show_progress: bool,
) -> Result<()> {
    let mut storage = connect(dropbox).await?;
    let dlevels = DLevelsClient::new()
        .context("Failed to create DLevels client")?
        .with_throttle(Duration::from_millis(throttle_ms));

    let settings = ScrapeSettings {
        work_dir,
        show_progress,
        ..Default::default()
    };

    info!("Starting scrape in {}", settings.work_dir.display());
    let report = run_scrape(&settings, &dlevels, &mut storage, Local::now().naive_local())
        .await
        .context("Scrape failed")?;

    let advanced = &report.advanced;
    println!(
        "Fundamentals: {} succeeded, {} failed",
        advanced.succeeded, advanced.failed
    );
    if let Some(path) = &advanced.advanced_file {
        println!("  Advanced info: {}", path.display());
    }
    if let Some(path) = &advanced.failure_file {
        println!("  Failures: {}", path.display());
    }
    if let Some(remote) = &advanced.uploaded {
        println!("  Published to: {}", remote);
    }

    match &report.watchlists {
        Some(watchlists) => print_report("Watchlists published", watchlists),
        None => Ok(()),
    }
}

/// Import a CSV into SQLite.
fn cmd_import(csv: &Path, db: &Path, date: Option<&str>) -> Result<()> {
    let file_name = csv
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let import_date = match date {
        Some(stamp) => ImportDate::from_file_name(stamp).context("Invalid --date")?,
        None => ImportDate::from_file_name(&file_name)
            .unwrap_or_else(|_| ImportDate::from_datetime(Local::now().naive_local())),
    };

    let mut importer = Importer::open(db)
        .with_context(|| format!("Failed to open database {}", db.display()))?;
    let count = importer
        .import_csv(csv, &import_date)
        .with_context(|| format!("Failed to import {}", csv.display()))?;

    println!(
        "Imported {} rows from {} into {} (date {})",
        count,
        csv.display(),
        db.display(),
        import_date.date
    );
    Ok(())
}
