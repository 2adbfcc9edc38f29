//! Configuration loading and management.
//!
//! # Architecture overview
//!
//! Configuration lives in `~/.config/recollect/config.toml` and is purely
//! optional: every option has a built-in default, so the tool works with no
//! setup. Values flow into the rest of the system through two paths:
//!
//! 1. **`Config::load()`** — used at startup to resolve the corpus root,
//!    index and cache locations, and refresh tuning before building the
//!    engine. CLI flags override config values; the merge happens in
//!    `main`, so this module never sees the CLI.
//! 2. **`get_value` / `set_value` / `unset_value`** — used by the
//!    `recollect get/set/unset` subcommands to read and write individual
//!    dotted keys in the live file.
//!
//! # TRADE-OFFS
//!
//! - `toml_edit` backs the mutation helpers instead of plain `toml`
//!   because it preserves comments and formatting in the user's file. Two
//!   TOML dependencies, but hand-written comments survive `set`.
//! - Paths are stored as `Option<String>` rather than `Option<PathBuf>` so
//!   tilde expansion happens at point-of-use and serialization round-trips
//!   losslessly.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use toml_edit::DocumentMut;

use crate::analytics::cache::DEFAULT_REBUILD_THRESHOLD;
use crate::error::RecollectError;

/// Seconds between background index flushes when none is configured.
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;

/// Top-level config deserialized from `~/.config/recollect/config.toml`.
///
/// All fields are optional; a config file with a single key is valid and
/// common. `Config::load()` returns `Config::default()` when the file is
/// absent rather than erroring.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Corpus root holding `<project>/<conversation>.jsonl` trees.
    pub root: Option<String>,
    /// Index snapshot file location.
    pub index_path: Option<String>,
    /// Analytics cache file location.
    pub cache_path: Option<String>,
    /// Seconds between index flushes during long refreshes.
    pub flush_interval_secs: Option<u64>,
    /// Fraction of diverging conversations above which the analytics
    /// cache is rebuilt instead of incrementally refreshed.
    pub rebuild_threshold: Option<f64>,
    /// Default search result limit.
    pub limit: Option<usize>,
}

impl Config {
    /// Load config from `~/.config/recollect/config.toml`.
    ///
    /// A missing file is never an error. A file that fails to parse also
    /// falls back to defaults so one bad value cannot brick the tool.
    pub fn load() -> Config {
        let Some(path) = config_path().ok() else {
            return Config::default();
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Config::default();
        };
        toml::from_str(&content).unwrap_or_default()
    }

    /// The corpus root: configured value, else `~/.claude/projects`.
    pub fn root_path(&self) -> PathBuf {
        match &self.root {
            Some(root) => expand_tilde(root),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".claude/projects"),
        }
    }

    /// The index snapshot file: configured value, else
    /// `<data dir>/recollect/index.bin`.
    pub fn index_file(&self) -> PathBuf {
        match &self.index_path {
            Some(path) => expand_tilde(path),
            None => data_dir().join("index.bin"),
        }
    }

    /// The analytics cache file: configured value, else
    /// `<data dir>/recollect/analytics.json`.
    pub fn cache_file(&self) -> PathBuf {
        match &self.cache_path {
            Some(path) => expand_tilde(path),
            None => data_dir().join("analytics.json"),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS))
    }

    pub fn rebuild_threshold_value(&self) -> f64 {
        self.rebuild_threshold.unwrap_or(DEFAULT_REBUILD_THRESHOLD)
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recollect")
}

/// Print a config value by dotted key (e.g. `recollect get root`).
pub fn get_value(key: &str) -> Result<(), RecollectError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| RecollectError::Other(format!("Failed to parse config: {e}")))?;

    match resolve_key(&doc, key) {
        Some(item) => {
            println!("{}", format_item(item));
            Ok(())
        }
        None => Err(RecollectError::Other(format!("Key not found: {key}"))),
    }
}

/// Write a config value by dotted key (e.g. `recollect set limit 25`).
///
/// Values are type-inferred from their string representation: `true` /
/// `false` become booleans, numeric strings become integers or floats,
/// everything else stays a string.
pub fn set_value(key: &str, value: &str) -> Result<(), RecollectError> {
    let content = read_config_file().unwrap_or_default();
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| RecollectError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        if !table.contains_key(segment) {
            table.insert(segment, toml_edit::Item::Table(toml_edit::Table::new()));
        }
        table = table[segment]
            .as_table_mut()
            .ok_or_else(|| RecollectError::Other(format!("'{segment}' is not a table")))?;
    }

    table.insert(&field, toml_edit::Item::Value(infer_value(value)));
    write_config_file(&doc.to_string())
}

/// Remove a config value by dotted key. Errors if the key does not exist
/// so a typo gives feedback instead of silently succeeding.
pub fn unset_value(key: &str) -> Result<(), RecollectError> {
    let content = read_config_file()?;
    let mut doc: DocumentMut = content
        .parse()
        .map_err(|e| RecollectError::Other(format!("Failed to parse config: {e}")))?;

    let (table_path, field) = split_key(key)?;

    let mut table = doc.as_table_mut();
    for segment in &table_path {
        table = table
            .get_mut(segment)
            .and_then(|item| item.as_table_mut())
            .ok_or_else(|| RecollectError::Other(format!("Key not found: {key}")))?;
    }

    if table.remove(&field).is_none() {
        return Err(RecollectError::Other(format!("Key not found: {key}")));
    }
    write_config_file(&doc.to_string())
}

/// Print all config values in dotted `key = value` form, ready to be
/// pasted back into `recollect set`.
pub fn list_values() -> Result<(), RecollectError> {
    let content = read_config_file()?;
    let doc: DocumentMut = content
        .parse()
        .map_err(|e| RecollectError::Other(format!("Failed to parse config: {e}")))?;

    let mut entries = Vec::new();
    collect_entries(doc.as_table(), "", &mut entries);

    if entries.is_empty() {
        eprintln!("No config values set.");
    } else {
        for (key, value) in entries {
            println!("{key} = {value}");
        }
    }
    Ok(())
}

/// Write the default config template. All options are commented out so the
/// file documents what is available without changing any behavior. Errors
/// if the file already exists.
pub fn init() -> Result<(), RecollectError> {
    let path = config_path()?;
    if path.exists() {
        return Err(RecollectError::Other(format!(
            "Config file already exists: {}",
            path.display()
        )));
    }

    let template = r#"# Recollect configuration

# Corpus root containing <project>/<conversation>.jsonl transcripts
# root = "~/.claude/projects"

# Index snapshot location
# index_path = "~/.local/share/recollect/index.bin"

# Analytics cache location
# cache_path = "~/.local/share/recollect/analytics.json"

# Seconds between index flushes during long refreshes
# flush_interval_secs = 30

# Fraction of changed conversations that triggers a full analytics rebuild
# rebuild_threshold = 0.25

# Default search result limit
# limit = 10
"#;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, template)?;

    eprintln!("Created config file: {}", path.display());
    eprintln!();
    eprintln!("Edit it directly, or use:");
    eprintln!("  recollect set root ~/.claude/projects");
    eprintln!("  recollect set limit 25");
    eprintln!("  recollect get");

    Ok(())
}

// ── Private helpers ──────────────────────────────────────────────────────

fn config_path() -> Result<PathBuf, RecollectError> {
    let home = dirs::home_dir()
        .ok_or_else(|| RecollectError::Other("Cannot determine home directory".into()))?;
    Ok(home.join(".config/recollect/config.toml"))
}

fn read_config_file() -> Result<String, RecollectError> {
    let path = config_path()?;
    std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            RecollectError::Other(format!("Config file not found: {}", path.display()))
        } else {
            RecollectError::Io(e)
        }
    })
}

fn write_config_file(content: &str) -> Result<(), RecollectError> {
    let path = config_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(())
}

/// `"a.b.c"` → `(["a", "b"], "c")`; `"root"` → `([], "root")`.
fn split_key(key: &str) -> Result<(Vec<String>, String), RecollectError> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(RecollectError::Other(format!("Invalid key: {key}")));
    }
    let field = parts.last().map(|s| s.to_string()).unwrap_or_default();
    let table_path = parts[..parts.len() - 1]
        .iter()
        .map(|s| s.to_string())
        .collect();
    Ok((table_path, field))
}

fn resolve_key<'a>(doc: &'a DocumentMut, key: &str) -> Option<&'a toml_edit::Item> {
    let mut current: &toml_edit::Item = doc.as_item();
    for part in key.split('.') {
        current = current.as_table_like()?.get(part)?;
    }
    Some(current)
}

fn format_item(item: &toml_edit::Item) -> String {
    match item {
        toml_edit::Item::Value(v) => match v {
            toml_edit::Value::String(s) => s.value().clone(),
            toml_edit::Value::Integer(i) => i.value().to_string(),
            toml_edit::Value::Float(f) => f.value().to_string(),
            toml_edit::Value::Boolean(b) => b.value().to_string(),
            other => other.to_string(),
        },
        toml_edit::Item::Table(t) => {
            let mut entries = Vec::new();
            collect_entries(t, "", &mut entries);
            entries
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => other.to_string(),
    }
}

fn collect_entries(table: &toml_edit::Table, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, item) in table.iter() {
        let full_key = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        match item {
            toml_edit::Item::Value(v) => out.push((full_key, format_value(v))),
            toml_edit::Item::Table(t) => collect_entries(t, &full_key, out),
            _ => {}
        }
    }
}

fn format_value(v: &toml_edit::Value) -> String {
    match v {
        toml_edit::Value::String(s) => format!("\"{}\"", s.value()),
        toml_edit::Value::Integer(i) => i.value().to_string(),
        toml_edit::Value::Float(f) => f.value().to_string(),
        toml_edit::Value::Boolean(b) => b.value().to_string(),
        other => other.to_string(),
    }
}

/// Infer a TOML value type from a CLI string: boolean → integer → float
/// (only with a `.` present) → string.
fn infer_value(s: &str) -> toml_edit::Value {
    if s == "true" {
        return toml_edit::Value::from(true);
    }
    if s == "false" {
        return toml_edit::Value::from(false);
    }
    if let Ok(n) = s.parse::<i64>() {
        return toml_edit::Value::from(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        if s.contains('.') {
            return toml_edit::Value::from(f);
        }
    }
    toml_edit::Value::from(s)
}

/// Expand a leading `~` or `~/` to the home directory. Absolute and
/// relative paths pass through unchanged.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_key_simple() {
        let (table, field) = split_key("root").unwrap();
        assert!(table.is_empty());
        assert_eq!(field, "root");
    }

    #[test]
    fn test_split_key_dotted() {
        let (table, field) = split_key("a.b.c").unwrap();
        assert_eq!(table, vec!["a", "b"]);
        assert_eq!(field, "c");
    }

    #[test]
    fn test_split_key_empty_segment_errors() {
        assert!(split_key("a..b").is_err());
        assert!(split_key(".a").is_err());
        assert!(split_key("a.").is_err());
    }

    #[test]
    fn test_infer_value_types() {
        assert_eq!(infer_value("true").as_bool(), Some(true));
        assert_eq!(infer_value("42").as_integer(), Some(42));
        let f = infer_value("0.25").as_float().unwrap();
        assert!((f - 0.25).abs() < 1e-9);
        assert_eq!(infer_value("hello world").as_str(), Some("hello world"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/corpus"), home.join("corpus"));
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_tilde("rel/path"), PathBuf::from("rel/path"));
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
root = "~/transcripts"
flush_interval_secs = 60
rebuild_threshold = 0.5
limit = 25
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.root.as_deref(), Some("~/transcripts"));
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
        assert_eq!(config.rebuild_threshold_value(), 0.5);
        assert_eq!(config.limit, Some(25));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.root_path().ends_with(".claude/projects"));
        assert!(config.index_file().ends_with("recollect/index.bin"));
        assert!(config.cache_file().ends_with("recollect/analytics.json"));
        assert_eq!(
            config.flush_interval(),
            Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS)
        );
        assert_eq!(config.rebuild_threshold_value(), DEFAULT_REBUILD_THRESHOLD);
    }

    #[test]
    fn test_resolve_key_nested_and_missing() {
        let doc: DocumentMut = "root = \"x\"\n[tuning]\nlimit = 5".parse().unwrap();
        assert!(resolve_key(&doc, "root").is_some());
        assert!(resolve_key(&doc, "tuning.limit").is_some());
        assert!(resolve_key(&doc, "nonexistent").is_none());
    }
}
