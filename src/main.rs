//! CLI entry point for recollect.
//!
//! # Architecture overview
//!
//! `main.rs` is the thin coordination layer between the CLI surface and
//! the library crate:
//!
//! 1. Parse CLI arguments (via `clap`).
//! 2. Load and merge configuration from `~/.config/recollect/config.toml`
//!    (CLI flags win over config values).
//! 3. Dispatch: config subcommands (`init`, `get`, `set`, `unset`) are
//!    handled without touching the corpus; `search`, `analytics`, and
//!    `refresh` build an [`Engine`] over the resolved root first.
//!
//! # Exit codes
//!
//! Zero on success — including a search with zero hits. Non-zero only for
//! invalid arguments (bad date range, unknown preset) or corpus access
//! failures (missing root).

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser as ClapParser, Subcommand};
use tracing_subscriber::EnvFilter;

use recollect::config::{self, Config};
use recollect::engine::{Engine, EngineOptions};
use recollect::error::RecollectError;
use recollect::query::{DateRange, Filters, SearchRequest};

#[derive(ClapParser)]
#[command(name = "recollect", about = "Search and analytics for AI conversation transcripts")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Corpus root (defaults to config, then ~/.claude/projects)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Search the corpus
    Search {
        /// Query string
        query: String,
        /// Comma-separated repository (project) filter
        #[arg(long)]
        repos: Option<String>,
        /// Date range: a preset (today, yesterday, last7days, last30days,
        /// last90days, this-month, last-month, this-year, last-year) or
        /// explicit YYYY-MM-DD..YYYY-MM-DD
        #[arg(long)]
        range: Option<String>,
        /// Maximum number of hits
        #[arg(long)]
        limit: Option<usize>,
        /// Per-query deadline in milliseconds; exceeding it returns
        /// partial results
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Show analytics over the corpus
    Analytics {
        /// Optional date range (same forms as `search --range`)
        #[arg(long)]
        range: Option<String>,
    },
    /// Scan the corpus and update the index and analytics
    Refresh {
        /// Discard the index and analytics and re-ingest everything
        #[arg(long)]
        rebuild: bool,
    },
    /// Create a default config file
    Init,
    /// Get a config value (e.g. `recollect get root`)
    Get {
        /// Dotted config key; omit to list all values
        key: Option<String>,
    },
    /// Set a config value (e.g. `recollect set limit 25`)
    Set {
        key: String,
        value: String,
    },
    /// Remove a config value
    Unset {
        key: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(if e.is_user_error() { 2 } else { 1 });
    }
}

fn run(cli: Cli) -> Result<(), RecollectError> {
    match cli.command {
        Command::Init => return config::init(),
        Command::Get { ref key } => {
            return match key {
                Some(k) => config::get_value(k),
                None => config::list_values(),
            };
        }
        Command::Set { ref key, ref value } => return config::set_value(key, value),
        Command::Unset { ref key } => return config::unset_value(key),
        _ => {}
    }

    let config = Config::load();
    let mut options = EngineOptions::from_config(&config);
    if let Some(root) = &cli.root {
        options.root = root.clone();
    }
    let engine = Engine::new(options);
    if engine.index_recovered() {
        eprintln!("warning: index was corrupt and will be rebuilt");
    }

    match cli.command {
        Command::Search {
            query,
            repos,
            range,
            limit,
            deadline_ms,
        } => {
            engine.refresh(None)?;

            let mut filters = Filters::default();
            if let Some(repos) = repos {
                filters.repos = parse_repos(&repos);
            }
            if let Some(range) = range {
                filters.date_range = Some(parse_range(&range)?);
            }
            let request = SearchRequest {
                query,
                filters,
                limit: limit.or(config.limit).unwrap_or(10),
                deadline: deadline_ms.map(std::time::Duration::from_millis),
            };

            let response = engine.search(&request);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_search_results(&response);
            }
            engine.shutdown()?;
            Ok(())
        }
        Command::Analytics { range } => {
            engine.refresh(None)?;

            let scope = range.map(|r| parse_range(&r)).transpose()?;
            let snapshot = engine.analytics(scope);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_analytics(&snapshot);
            }
            engine.shutdown()?;
            Ok(())
        }
        Command::Refresh { rebuild } => {
            let report = if rebuild {
                engine.rebuild()?
            } else {
                engine.refresh(None)?
            };
            eprintln!(
                "{} added, {} updated, {} removed; {} ingested, {} unchanged",
                report.added, report.updated, report.removed, report.ingested, report.unchanged
            );
            engine.shutdown()?;
            Ok(())
        }
        // Config subcommands were dispatched above.
        Command::Init
        | Command::Get { .. }
        | Command::Set { .. }
        | Command::Unset { .. } => Ok(()),
    }
}

fn parse_repos(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Accept a preset name or an explicit `YYYY-MM-DD..YYYY-MM-DD` range
/// (either side may be omitted for an open bound).
fn parse_range(raw: &str) -> Result<DateRange, RecollectError> {
    if let Some((from_raw, to_raw)) = raw.split_once("..") {
        let parse_day = |s: &str| -> Result<Option<NaiveDate>, RecollectError> {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<NaiveDate>()
                .map(Some)
                .map_err(|_| RecollectError::InvalidDateRange(raw.to_string()))
        };
        return Ok(DateRange::from_days(
            parse_day(from_raw)?,
            parse_day(to_raw)?,
        ));
    }
    DateRange::from_preset(raw)
}

fn print_search_results(response: &recollect::query::SearchResponse) {
    if response.timed_out {
        eprintln!("(query deadline exceeded, partial results)");
    }
    if response.hits.is_empty() {
        println!("No matches ({} ms)", response.took_ms);
        return;
    }
    println!(
        "{} conversation(s), showing {} ({} ms)",
        response.total,
        response.hits.len(),
        response.took_ms
    );
    for (i, hit) in response.hits.iter().enumerate() {
        println!(
            "{:2}. [{}] {}  ({} matches, relevance {:.2})",
            i + 1,
            hit.project,
            hit.path,
            hit.matches,
            hit.relevance
        );
        if !hit.highlighted_preview.is_empty() {
            let one_line = hit.highlighted_preview.replace('\n', " ");
            println!("    {one_line}");
        }
    }
}

fn print_analytics(snapshot: &recollect::analytics::AnalyticsSnapshot) {
    if let Some(overview) = &snapshot.overview {
        println!("Conversations: {}", overview.total_conversations);
        println!("Messages:      {}", overview.total_messages);
        println!("Tool calls:    {}", overview.total_tool_invocations);
        println!("Projects:      {}", overview.active_projects);
    }
    if let Some(time) = &snapshot.time_patterns {
        if let Some(hour) = time.busiest_hour {
            println!("Busiest hour:  {hour:02}:00");
        }
        if let Some(day) = time.busiest_day {
            const DAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
            println!("Busiest day:   {}", DAYS[day as usize % 7]);
        }
        println!("Active days:   {}", time.total_active_days);
        println!(
            "Streak:        {} current / {} longest",
            time.streaks.current, time.streaks.longest
        );
    }
    if let Some(tools) = &snapshot.tool_usage {
        if !tools.by_tool.is_empty() {
            let mut ranked: Vec<_> = tools.by_tool.iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(a.1));
            let names: Vec<String> = ranked
                .iter()
                .take(5)
                .map(|(name, count)| format!("{name} ({count})"))
                .collect();
            println!("Top tools:     {}", names.join(", "));
        }
    }
    if let Some(content) = &snapshot.content_analysis {
        println!("Code blocks:   {}", content.total_code_blocks);
        println!(
            "Code/text:     {:.1}%",
            content.code_to_text_ratio * 100.0
        );
    }
    if let Some(actions) = &snapshot.user_actions {
        println!(
            "Slash cmds:    {} ({} distinct)",
            actions.slash_commands.total,
            actions.slash_commands.by_command.len()
        );
        println!(
            "Hooks:         {} ({} distinct)",
            actions.hooks.total,
            actions.hooks.by_hook.len()
        );
    }
}
