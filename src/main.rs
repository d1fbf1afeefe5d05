use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use typometer::config::{Config, ConfigStore, FileConfigStore};
use typometer::runtime::RateReading;
use typometer::{
    BatchReport, EditEvent, ErrorPatternAggregator, KeystrokeEvent, ManualClock, Millis, Session,
    SlidingWindowTracker, SqliteStore, TypingStats,
};

/// typing-performance metrics and error-pattern analytics
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// pattern database (defaults to the state directory)
    #[arg(global = true, long)]
    db: Option<PathBuf>,

    /// config file (defaults to the config directory)
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// user whose aggregates are read and written
    #[arg(global = true, short, long)]
    user: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// replay a scripted keystroke log against a target text
    Replay(ReplayArgs),
    /// print ranked error patterns
    Report(ReportArgs),
    /// replay editor inserts through the sliding-window tracker
    Ambient(AmbientArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// text the keystrokes are typed against
    #[arg(short, long)]
    text: String,

    /// CSV with `timestamp_ms,key` rows; `\b` is backspace, `\e` is escape
    #[arg(short, long)]
    keys: PathBuf,

    /// do not fold the session into the pattern database
    #[arg(long)]
    no_record: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[arg(value_enum)]
    kind: ReportKind,

    #[arg(short, long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Copy, Clone, ValueEnum, strum_macros::Display)]
enum ReportKind {
    WeakestKeys,
    SlowestKeys,
    Confusions,
    WeakestSequences,
    SlowestSequences,
}

#[derive(Args, Debug)]
struct AmbientArgs {
    /// CSV with `timestamp_ms,text,deleted` rows
    #[arg(short, long)]
    edits: PathBuf,

    /// sampling cadence for rate and trend readings
    #[arg(long, default_value_t = 1000)]
    sample_every_ms: Millis,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    timestamp_ms: Millis,
    key: String,
}

#[derive(Debug, Deserialize)]
struct EditRow {
    timestamp_ms: Millis,
    #[serde(default)]
    text: String,
    #[serde(default)]
    deleted: usize,
}

#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    stats: TypingStats,
    complete: bool,
    keystrokes: &'a [KeystrokeEvent],
    recorded: Option<BatchReport>,
}

#[derive(Debug, Serialize)]
struct AmbientOutput {
    at: Millis,
    #[serde(flatten)]
    reading: RateReading,
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> typometer::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, csv::Error>>()?;
    Ok(rows)
}

fn open_store(cli: &Cli) -> typometer::Result<SqliteStore> {
    match &cli.db {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn replay(cli: &Cli, cfg: &Config, args: &ReplayArgs) -> Result<(), Box<dyn Error>> {
    let rows: Vec<KeyRow> = read_rows(&args.keys)?;
    let mut session = Session::with_policy(args.text.as_str(), cfg.backspace_policy);
    let mut last_at = 0;

    for row in &rows {
        last_at = row.timestamp_ms;
        match row.key.as_str() {
            "\\b" => {
                session.backspace();
            }
            "\\e" => session.escape(),
            key => {
                if let Some(c) = key.chars().next() {
                    session.process_key(c, row.timestamp_ms);
                }
            }
        }
    }

    let recorded = if args.no_record || !session.is_complete() {
        None
    } else {
        let aggregator = ErrorPatternAggregator::new(open_store(cli)?, cfg.aggregator());
        Some(aggregator.record_session(&cfg.user, session.log()))
    };

    let output = ReplayOutput {
        stats: session.stats(last_at),
        complete: session.is_complete(),
        keystrokes: session.log(),
        recorded,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn report(cli: &Cli, cfg: &Config, args: &ReportArgs) -> Result<(), Box<dyn Error>> {
    let aggregator = ErrorPatternAggregator::new(open_store(cli)?, cfg.aggregator());
    let user = cfg.user.as_str();
    info!(user, kind = %args.kind, "building report");

    let limit = args.limit;
    let json = match args.kind {
        ReportKind::WeakestKeys => {
            serde_json::to_string_pretty(&aggregator.weakest_keys(user, limit)?)?
        }
        ReportKind::SlowestKeys => {
            serde_json::to_string_pretty(&aggregator.slowest_keys(user, limit)?)?
        }
        ReportKind::Confusions => {
            serde_json::to_string_pretty(&aggregator.top_confusions(user, limit)?)?
        }
        ReportKind::WeakestSequences => {
            serde_json::to_string_pretty(&aggregator.weakest_sequences(user, limit)?)?
        }
        ReportKind::SlowestSequences => {
            serde_json::to_string_pretty(&aggregator.slowest_sequences(user, limit)?)?
        }
    };
    println!("{json}");
    Ok(())
}

fn ambient(cfg: &Config, args: &AmbientArgs) -> Result<(), Box<dyn Error>> {
    if args.sample_every_ms <= 0 {
        return Err("sample-every-ms must be positive".into());
    }
    let rows: Vec<EditRow> = read_rows(&args.edits)?;
    let Some(first) = rows.first() else {
        return Ok(());
    };

    let clock = Arc::new(ManualClock::new(first.timestamp_ms));
    let tracker = SlidingWindowTracker::new(cfg.window(), clock.clone())?;
    let mut next_sample = first.timestamp_ms + args.sample_every_ms;

    let emit = |at: Millis| -> Result<(), Box<dyn Error>> {
        clock.set(at);
        let output = AmbientOutput {
            at,
            reading: RateReading::sample(&tracker),
        };
        println!("{}", serde_json::to_string(&output)?);
        Ok(())
    };

    for row in &rows {
        while next_sample <= row.timestamp_ms {
            emit(next_sample)?;
            next_sample += args.sample_every_ms;
        }
        clock.set(row.timestamp_ms);
        let edit = if row.deleted > 0 {
            EditEvent::Delete { len: row.deleted }
        } else {
            EditEvent::insert(row.text.as_str())
        };
        tracker.on_edit(&edit);
    }
    emit(next_sample)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    let store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };
    let mut cfg = store.load();
    if let Some(user) = &cli.user {
        cfg.user = user.clone();
    }
    cfg.validate()?;

    match &cli.command {
        Commands::Replay(args) => replay(&cli, &cfg, args),
        Commands::Report(args) => report(&cli, &cfg, args),
        Commands::Ambient(args) => ambient(&cfg, args),
    }
}
