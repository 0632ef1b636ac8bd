//! Command-line interface definitions for news_sift.
//!
//! Flags override the matching settings of the YAML config file. Provider
//! API keys are not flags; they come from the config file or from
//! `<PROVIDER>_API_KEY` environment variables.

use clap::Parser;

/// Command-line arguments for one news_sift run.
///
/// # Examples
///
/// ```sh
/// # Fetch, dedup, rank and write the feed
/// news_sift -c news_sift.yaml
///
/// # Same run without writing anything
/// news_sift -c news_sift.yaml --dry-run
///
/// # Show what each provider accepts
/// news_sift --list-providers
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file (providers, requests, tuning)
    #[arg(short, long, env = "NEWS_SIFT_CONFIG", default_value = "news_sift.yaml")]
    pub config: String,

    /// Directory for the exported feed; overrides `export.output_dir`
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Run the whole pipeline but skip the export
    #[arg(long)]
    pub dry_run: bool,

    /// Provider requests in flight at once; overrides `pipeline.workers`
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Similarity above which two articles count as duplicates
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Print every built-in provider and its parameters, then exit
    #[arg(long)]
    pub list_providers: bool,
}
