//! ONS Ingest - catalog lookup and download tool

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ons_common::logging::{init_logging, LogConfig, LogLevel};
use ons_common::retry::RetryPolicy;
use ons_common::SystemClock;
use ons_ingest::{
    filter_by_year, CatalogClient, CatalogConfig, DownloadConfig, IngestionWindow,
    ResourceCatalog, ResourceDownloader, YEAR_GRANULARITY_FILTER,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ons-ingest")]
#[command(author, version, about = "ONS reservoir data ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// CKAN action API base URL
    #[arg(long, env = "ONS_CATALOG_URL", default_value = ons_ingest::catalog::DEFAULT_CATALOG_URL)]
    catalog_url: String,

    /// Resource format to keep
    #[arg(long, env = "ONS_RESOURCE_FORMAT", default_value = ons_ingest::catalog::DEFAULT_RESOURCE_FORMAT)]
    format: String,

    /// HTTP timeout in seconds
    #[arg(long, env = "ONS_HTTP_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the package's resources of the target format as JSON
    Resources {
        #[arg(long)]
        package_id: String,
    },

    /// Filter by year window, download and normalize into a local directory
    Download {
        #[arg(long)]
        package_id: String,

        /// Window start, DD-MM-YYYY
        #[arg(long)]
        start_date: Option<String>,

        /// Window end, DD-MM-YYYY
        #[arg(long)]
        end_date: Option<String>,

        /// Output directory
        #[arg(short, long, env = "ONS_STAGING_DIR", default_value = "./staging")]
        output: PathBuf,

        /// Total attempts per request
        #[arg(long, env = "ONS_MAX_RETRIES", default_value_t = 3)]
        max_retries: u32,

        #[arg(long, env = "ONS_DOWNLOAD_CONCURRENCY", default_value_t = 4)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("ons-ingest")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let timeout = Duration::from_secs(cli.timeout);
    let catalog = Arc::new(CatalogClient::new(CatalogConfig {
        base_url: cli.catalog_url,
        format: cli.format,
        timeout,
    })?);

    match cli.command {
        Command::Resources { package_id } => {
            let resources = catalog.list_resources(&package_id).await;
            println!("{}", serde_json::to_string_pretty(&resources)?);
        },
        Command::Download {
            package_id,
            start_date,
            end_date,
            output,
            max_retries,
            concurrency,
        } => {
            let window = IngestionWindow::parse(start_date.as_deref(), end_date.as_deref())?;
            let resources = catalog.list_resources(&package_id).await;
            let kept = filter_by_year(resources, &window, &SystemClock)?;
            info!(
                package = %package_id,
                kept = kept.len(),
                granularity = ?YEAR_GRANULARITY_FILTER,
                "Resources selected"
            );

            let downloader = ResourceDownloader::new(
                catalog,
                DownloadConfig {
                    staging_dir: output,
                    timeout,
                    retry: RetryPolicy::new(max_retries, RetryPolicy::default().base_delay),
                    concurrency,
                    ..DownloadConfig::default()
                },
            )?;
            let report = downloader.download_all(&kept).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        },
    }

    info!("Done");
    Ok(())
}
