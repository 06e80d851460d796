use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ctiharvest::{
    limits::{override_from_env, CollectMode, LimitOverrides},
    runner::{Runner, RunnerOptions},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Threat-intel article harvester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the seed sites and collect article links
    Collect {
        /// Text file with one seed url per line
        #[arg(short = 'b', long, default_value = "base_url.txt")]
        seed_file: PathBuf,
        /// Where the collected url list is written
        #[arg(short = 'o', long, default_value = "data/urls.txt")]
        out_file: PathBuf,
        /// Concurrency preset: auto | safe | aggressive
        #[arg(short = 'm', long, default_value = "auto")]
        mode: CollectMode,
        /// Override for the concurrent site limit
        #[arg(long)]
        max_sites: Option<i64>,
        /// Override for the concurrent pages-per-site limit
        #[arg(long)]
        max_pages: Option<i64>,
        /// Per-navigation timeout in seconds
        #[arg(short = 't', long, default_value_t = 20)]
        timeout_secs: u64,
    },
    /// Fetch each collected url and render it to a PDF
    Extract {
        /// Text file with one url per line
        #[arg(short = 'i', long)]
        url_file: PathBuf,
        /// Directory the rendered documents are written to
        #[arg(short = 'o', long, default_value = "output")]
        out_dir: PathBuf,
        /// Number of concurrent extraction workers
        #[arg(short = 'c', long)]
        workers: Option<i64>,
        /// Per-navigation timeout in seconds
        #[arg(short = 't', long, default_value_t = 30)]
        timeout_secs: u64,
        /// Retries per url on transient failure
        #[arg(short = 'r', long, default_value_t = 1)]
        retries: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Collect {
            seed_file,
            out_file,
            mode,
            max_sites,
            max_pages,
            timeout_secs,
        } => {
            let overrides = LimitOverrides {
                sites: max_sites.or_else(|| override_from_env("CTI_MAX_CONCURRENT_SITES")),
                pages_per_site: max_pages
                    .or_else(|| override_from_env("CTI_MAX_CONCURRENT_PAGES")),
                workers: None,
            };
            let options = RunnerOptions::default_builder()
                .mode(mode)
                .overrides(overrides)
                .timeout_secs(timeout_secs)
                .build()?;
            let runner = Runner::new(options)?;
            runner.run_collect(&seed_file, &out_file).await?;
        }
        Command::Extract {
            url_file,
            out_dir,
            workers,
            timeout_secs,
            retries,
        } => {
            let overrides = LimitOverrides {
                sites: None,
                pages_per_site: None,
                workers: workers.or_else(|| override_from_env("CTI_MAX_EXTRACT_WORKERS")),
            };
            let options = RunnerOptions::default_builder()
                .overrides(overrides)
                .timeout_secs(timeout_secs)
                .retries(retries)
                .build()?;
            let runner = Runner::new(options)?;
            let summary = runner.run_extract(&url_file, &out_dir).await?;
            println!(
                "done: {}/{} rendered, {} failed",
                summary.succeeded, summary.attempted, summary.failed
            );
        }
    }

    Ok(())
}
