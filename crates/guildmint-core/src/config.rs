//! Startup configuration.
//!
//! Read from a flat `KEY=VALUE` environment file. Empty lines and lines
//! beginning with `#` are ignored. Keys that exist in the built-in template
//! but are missing from the live file are appended back to it under an
//! auto-added comment block, so upgrades never require hand-editing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::constants::{DEFAULT_API_PORT, DEFAULT_API_SECRET, DEFAULT_MAX_BACKUPS};
use crate::error::MintError;

/// Template of every key the bot understands, with its default value.
/// Order is the order keys are appended to a live file that lacks them.
const TEMPLATE: &[(&str, &str)] = &[
    ("APP_ID", ""),
    ("BOT_TOKEN", ""),
    ("GUILD_ID", ""),
    ("DATABASE_PATH", "guildmint.sqlite3"),
    ("API_PORT", "5000"),
    ("API_SECRET_KEY", "change-me"),
    ("CORS_ORIGINS", ""),
    ("TWITCH_CLIENT_ID", ""),
    ("TWITCH_CLIENT_SECRET", ""),
    ("YOUTUBE_API_KEY", ""),
    ("OLLAMA_HOST", ""),
    ("OLLAMA_MODEL", ""),
    ("AI_ENABLED", "false"),
    ("AI_COMMAND_ENABLED", "false"),
    ("AI_MODERATION_ENABLED", "false"),
    ("AI_CONTENT_FILTER_ENABLED", "false"),
    ("LOG_LEVEL", "info"),
    ("BACKUP_DIR", "backups"),
    ("MAX_BACKUPS", "10"),
];

// ── Log level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Quiet,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" => Some(LogLevel::Verbose),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "critical" => Some(LogLevel::Critical),
            "quiet" => Some(LogLevel::Quiet),
            _ => None,
        }
    }

    /// Default `tracing` env-filter directive for this level.
    pub fn env_filter(self) -> &'static str {
        match self {
            LogLevel::Verbose => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
            LogLevel::Quiet => "off",
        }
    }
}

// ── AI feature toggles ───────────────────────────────────────────────────────

/// Master/per-feature switches for the (external) language-model providers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AiToggles {
    pub master: bool,
    pub command: bool,
    pub moderation: bool,
    pub content_filter: bool,
}

// ── Bot configuration ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub app_id: String,
    pub bot_token: String,
    pub guild_id: String,
    pub database_path: PathBuf,

    pub api_port: u16,
    pub api_secret: String,
    pub cors_origins: Vec<String>,

    pub twitch_client_id: Option<String>,
    pub twitch_client_secret: Option<String>,
    pub youtube_api_key: Option<String>,
    pub ollama_host: Option<String>,
    pub ollama_model: Option<String>,
    pub ai: AiToggles,

    pub log_level: LogLevel,
    pub backup_dir: PathBuf,
    pub max_backups: usize,
}

impl BotConfig {
    /// Load configuration from `path`, appending any template keys the live
    /// file is missing.
    pub fn load(path: &Path) -> Result<Self, MintError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| MintError::Config(format!("reading {}: {e}", path.display())))?;
        let mut values = parse_env(&raw);

        let missing: Vec<&(&str, &str)> = TEMPLATE
            .iter()
            .filter(|(k, _)| !values.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            append_missing_keys(path, &raw, &missing)?;
            for (k, v) in &missing {
                values.insert((*k).to_string(), (*v).to_string());
            }
        }

        Self::from_values(&values)
    }

    /// Build a configuration from an already-parsed key/value map.
    pub fn from_values(values: &HashMap<String, String>) -> Result<Self, MintError> {
        let required = |key: &'static str| -> Result<String, MintError> {
            match values.get(key) {
                Some(v) if !v.is_empty() => Ok(v.clone()),
                _ => Err(MintError::MissingConfigKey(key)),
            }
        };
        let optional = |key: &str| -> Option<String> {
            values.get(key).filter(|v| !v.is_empty()).cloned()
        };
        let flag = |key: &str| -> bool {
            matches!(
                values.get(key).map(|v| v.to_ascii_lowercase()).as_deref(),
                Some("1") | Some("true") | Some("yes") | Some("on")
            )
        };

        let api_secret =
            optional("API_SECRET_KEY").unwrap_or_else(|| DEFAULT_API_SECRET.to_string());
        if api_secret == DEFAULT_API_SECRET {
            warn!("API_SECRET_KEY is still the default — the dashboard API is unprotected");
        }

        let api_port = match optional("API_PORT") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| MintError::Config(format!("API_PORT is not a port: {p:?}")))?,
            None => DEFAULT_API_PORT,
        };

        let max_backups = match optional("MAX_BACKUPS") {
            Some(n) => n
                .parse::<usize>()
                .map_err(|_| MintError::Config(format!("MAX_BACKUPS is not a number: {n:?}")))?,
            None => DEFAULT_MAX_BACKUPS,
        };

        let log_level = match optional("LOG_LEVEL") {
            Some(l) => LogLevel::parse(&l)
                .ok_or_else(|| MintError::Config(format!("unknown LOG_LEVEL {l:?}")))?,
            None => LogLevel::Info,
        };

        let cors_origins = optional("CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(BotConfig {
            app_id: required("APP_ID")?,
            bot_token: required("BOT_TOKEN")?,
            guild_id: required("GUILD_ID")?,
            database_path: PathBuf::from(required("DATABASE_PATH")?),
            api_port,
            api_secret,
            cors_origins,
            twitch_client_id: optional("TWITCH_CLIENT_ID"),
            twitch_client_secret: optional("TWITCH_CLIENT_SECRET"),
            youtube_api_key: optional("YOUTUBE_API_KEY"),
            ollama_host: optional("OLLAMA_HOST"),
            ollama_model: optional("OLLAMA_MODEL"),
            ai: AiToggles {
                master: flag("AI_ENABLED"),
                command: flag("AI_COMMAND_ENABLED"),
                moderation: flag("AI_MODERATION_ENABLED"),
                content_filter: flag("AI_CONTENT_FILTER_ENABLED"),
            },
            log_level,
            backup_dir: PathBuf::from(optional("BACKUP_DIR").unwrap_or_else(|| "backups".into())),
            max_backups,
        })
    }
}

/// Parse `KEY=VALUE` lines. Comments (`#`) and blank lines are skipped;
/// values keep everything after the first `=`, trimmed, with optional
/// surrounding quotes removed.
pub fn parse_env(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let mut value = value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn append_missing_keys(
    path: &Path,
    raw: &str,
    missing: &[&(&str, &str)],
) -> Result<(), MintError> {
    let mut appended = String::new();
    if !raw.ends_with('\n') && !raw.is_empty() {
        appended.push('\n');
    }
    appended.push_str("\n# --- auto-added missing configuration keys ---\n");
    for (k, v) in missing {
        appended.push_str(&format!("{k}={v}\n"));
    }
    let mut contents = raw.to_string();
    contents.push_str(&appended);
    fs::write(path, contents)
        .map_err(|e| MintError::Config(format!("updating {}: {e}", path.display())))?;
    warn!(
        count = missing.len(),
        file = %path.display(),
        "appended missing configuration keys with defaults"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_env(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_comments_blanks_and_quotes() {
        let parsed = parse_env("# comment\n\nA=1\nB = \"two\"\nC='three'\nnot a pair\n");
        assert_eq!(parsed.get("A").unwrap(), "1");
        assert_eq!(parsed.get("B").unwrap(), "two");
        assert_eq!(parsed.get("C").unwrap(), "three");
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn appends_missing_template_keys() {
        let f = write_env("APP_ID=1\nBOT_TOKEN=t\nGUILD_ID=2\nDATABASE_PATH=db.sqlite3\n");
        let cfg = BotConfig::load(f.path()).unwrap();
        assert_eq!(cfg.api_port, 5000);

        let rewritten = std::fs::read_to_string(f.path()).unwrap();
        assert!(rewritten.contains("auto-added missing configuration keys"));
        assert!(rewritten.contains("LOG_LEVEL=info"));
        // Original keys are untouched.
        assert!(rewritten.starts_with("APP_ID=1\n"));
    }

    #[test]
    fn missing_required_key_fails() {
        let f = write_env("APP_ID=1\nGUILD_ID=2\nDATABASE_PATH=db.sqlite3\n");
        // BOT_TOKEN is appended with an empty default, which stays invalid.
        let err = BotConfig::load(f.path()).unwrap_err();
        assert!(matches!(err, MintError::MissingConfigKey("BOT_TOKEN")));
    }

    #[test]
    fn cors_origins_split_on_commas() {
        let f = write_env(
            "APP_ID=1\nBOT_TOKEN=t\nGUILD_ID=2\nDATABASE_PATH=db.sqlite3\n\
             CORS_ORIGINS=https://a.example, https://b.example\n",
        );
        let cfg = BotConfig::load(f.path()).unwrap();
        assert_eq!(cfg.cors_origins, vec!["https://a.example", "https://b.example"]);
    }
}
