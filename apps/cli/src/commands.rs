//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use feeddigest_core::delivery::{CommandConverter, CommandTransport};
use feeddigest_core::digest::{self, BuildOutcome, DigestBuilder};
use feeddigest_core::ingest::IngestionRecorder;
use feeddigest_core::pipeline::{self, ProgressReporter, RunOptions, RunOutcome, RunReport};
use feeddigest_core::select;
use feeddigest_shared::{
    AppConfig, ConvertConfig, DIGEST_TAG, DeliveryConfig, DigestConfig, FeedItem, expand_home,
    init_config, load_config, load_config_from, validate_delivery,
};
use feeddigest_storage::EntryStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// feeddigest: deliver unread feed entries as a digest.
#[derive(Parser)]
#[command(
    name = "feeddigest",
    version,
    about = "Bundle unread feed entries into a periodic e-book digest.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.feeddigest/feeddigest.toml).
    #[arg(long, global = true, env = "FEEDDIGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Record feed items (a JSON object or array) into the entry store.
    Ingest {
        /// JSON file to read, or `-` for stdin.
        #[arg(default_value = "-")]
        input: String,
    },

    /// Show store counts and the last digest time.
    Status {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Build the digest document without marking anything as read.
    Build,

    /// Build, convert, deliver and commit a digest.
    Run {
        /// Convert and commit, but do not send.
        #[arg(long)]
        no_deliver: bool,
    },

    /// Mark the entries of a previously built digest as digested.
    Commit {
        /// Path to the digest's manifest.json.
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Tag entries as read so they are left out of future digests.
    MarkRead {
        /// Entry keys.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "feeddigest=info",
        1 => "feeddigest=debug",
        _ => "feeddigest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let config = || resolve_config(config_path.as_deref());

    match cli.command {
        Command::Ingest { input } => cmd_ingest(&config()?, &input),
        Command::Status { json } => cmd_status(&config()?, json),
        Command::Build => cmd_build(&config()?).await,
        Command::Run { no_deliver } => cmd_run(&config()?, !no_deliver).await,
        Command::Commit { manifest } => cmd_commit(&config()?, &manifest),
        Command::MarkRead { keys } => cmd_mark_read(&config()?, &keys),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config()?),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn open_store(config: &AppConfig) -> Result<EntryStore> {
    let path = expand_home(&config.store.path)?;
    Ok(EntryStore::open(path))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_ingest(config: &AppConfig, input: &str) -> Result<()> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| eyre!("failed to read stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(input).map_err(|e| eyre!("failed to read '{input}': {e}"))?
    };

    let items = parse_feed_items(&raw)?;
    info!(items = items.len(), "ingesting feed items");

    let store = open_store(config)?;
    let report = IngestionRecorder::new(&store).record_batch(&items)?;

    println!("Recorded {} entries", report.recorded.len());
    for failure in &report.failures {
        println!("  item {}: {}", failure.index, failure.error);
    }

    if !report.failures.is_empty() && report.recorded.is_empty() {
        return Err(eyre!("no feed items could be recorded"));
    }
    Ok(())
}

/// Accept a single feed item or an array of them.
fn parse_feed_items(raw: &str) -> Result<Vec<FeedItem>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| eyre!("input is not valid JSON: {e}"))?;
    let items = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(items)
}

fn cmd_status(config: &AppConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let status = select::status(&store, chrono::Utc::now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  Store:       {}", status.store_path.display());
    println!("  Entries:     {}", status.total);
    println!("  Digested:    {}", status.digested);
    println!("  Pending:     {}", status.pending);
    match status.last_digest {
        Some(ts) => println!("  Last digest: {}", ts.to_rfc3339()),
        None => println!("  Last digest: never"),
    }
    println!();
    Ok(())
}

async fn cmd_build(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let builder = DigestBuilder::new(DigestConfig::try_from(config)?)?;

    let reporter = CliProgress::new();
    reporter.phase("Building digest");
    let outcome = builder.build(&store).await;
    reporter.finish();

    match outcome? {
        BuildOutcome::Empty { .. } => {
            println!("Nothing to digest.");
        }
        BuildOutcome::Ready(digest) => {
            let written = builder.write_document(&digest)?;
            println!();
            println!("  Digest built (not committed)");
            println!("  Chapters: {}", digest.chapters.len());
            println!("  Document: {}", written.document_path.display());
            println!("  Manifest: {}", written.manifest_path.display());
            println!();
            println!(
                "  Run `feeddigest commit --manifest {}` once it has been delivered.",
                written.manifest_path.display()
            );
            println!();
        }
    }
    Ok(())
}

async fn cmd_run(config: &AppConfig, deliver: bool) -> Result<()> {
    let delivery = DeliveryConfig::from(config);
    if deliver {
        validate_delivery(&delivery)?;
    }

    let store = open_store(config)?;
    let builder = DigestBuilder::new(DigestConfig::try_from(config)?)?;
    let converter = CommandConverter::new(ConvertConfig::from(config));
    let options = RunOptions {
        deliver,
        recipients: delivery.recipients.clone(),
    };
    let transport = CommandTransport::new(delivery);

    info!(deliver, "starting digest run");

    let reporter = CliProgress::new();
    let outcome =
        pipeline::run_digest(&builder, &store, &converter, &transport, &options, &reporter).await;
    reporter.finish();

    match outcome? {
        RunOutcome::NothingToDigest => println!("Nothing to digest."),
        RunOutcome::Completed(report) => {
            println!();
            println!("  Digest {}", report.digest_id);
            println!("  Chapters:  {}", report.chapter_count);
            if report.degraded_count > 0 {
                println!("  Degraded:  {}", report.degraded_count);
            }
            println!("  Document:  {}", report.document_path.display());
            println!("  Converted: {}", report.converted_path.display());
            println!(
                "  Delivered: {}",
                if report.delivered { "yes" } else { "no" }
            );
            println!("  Marked:    {}", report.commit.newly_tagged);
            if !report.commit.deferred.is_empty() {
                println!("  Deferred:  {}", report.commit.deferred.len());
            }
            println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
            println!();
        }
    }
    Ok(())
}

fn cmd_commit(config: &AppConfig, manifest: &Path) -> Result<()> {
    let store = open_store(config)?;
    let summary = digest::commit_manifest(&store, manifest)?;

    println!(
        "Marked {} entries as digested; watermark is now {}",
        summary.newly_tagged,
        summary.watermark.last_digest.to_rfc3339()
    );
    for key in &summary.missing {
        println!("  not in store: {key}");
    }
    for key in &summary.deferred {
        println!("  left for next digest: {key}");
    }
    Ok(())
}

fn cmd_mark_read(config: &AppConfig, keys: &[String]) -> Result<()> {
    let store = open_store(config)?;
    let added = store.add_tag(keys, DIGEST_TAG)?;
    println!("Marked {added} of {} entries as read", keys.len());
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_item_and_arrays() {
        let one = parse_feed_items(r#"{"title":"T","link":"https://x","summary":"s"}"#).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].title.as_deref(), Some("T"));

        let many = parse_feed_items(r#"[{"title":"A"},{"title":"B","guid":"b"}]"#).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].guid.as_deref(), Some("b"));

        assert!(parse_feed_items("not json").is_err());
    }

    #[test]
    fn cli_parses_commands() {
        let cli = Cli::try_parse_from(["feeddigest", "-vv", "run", "--no-deliver"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Run { no_deliver: true }));

        let cli = Cli::try_parse_from(["feeddigest", "mark-read", "a", "b"]).unwrap();
        assert!(matches!(cli.command, Command::MarkRead { ref keys } if keys.len() == 2));

        assert!(Cli::try_parse_from(["feeddigest", "mark-read"]).is_err());
    }
}
