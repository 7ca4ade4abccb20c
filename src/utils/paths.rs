use crate::constants::cache::APP_DIR_NAME;
use std::path::PathBuf;

/// Expands a leading `~/` using `HOME` from `lookup`.
pub fn expand_home_path(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if raw == "~" {
        if let Some(home) = lookup("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = lookup("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Treats blank, `undefined` and `null` values as unset.
pub fn lookup_path(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    let raw = lookup(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(expand_home_path(trimmed, |k| lookup(k)))
}

/// `SLACK_MCP_CACHE_DIR`, then `$XDG_CACHE_HOME/slack-bridge`, then
/// `$HOME/.cache/slack-bridge`, then the system temp dir.
pub fn resolve_cache_dir(lookup: &dyn Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup_path(lookup, "SLACK_MCP_CACHE_DIR") {
        return path;
    }
    if let Some(path) = lookup_path(lookup, "XDG_CACHE_HOME") {
        return path.join(APP_DIR_NAME);
    }
    if let Some(home) = lookup_path(lookup, "HOME") {
        return home.join(".cache").join(APP_DIR_NAME);
    }
    std::env::temp_dir().join(APP_DIR_NAME)
}
