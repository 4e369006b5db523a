//! Key lists: parsing, built-in NSE lists, and de-duplication

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::models::Key;

const EQUITIES: &str = include_str!("../data/equities.txt");
const INDICES: &str = include_str!("../data/indices.txt");

/// Equity symbols the NSE equity scraper walks by default.
pub fn builtin_equities() -> Vec<Key> {
    unique(parse_keys(EQUITIES))
}

/// Sector index names the NSE index scraper walks by default.
pub fn builtin_indices() -> Vec<Key> {
    unique(parse_keys(INDICES))
}

/// One key per line. Blank lines and `#` comments are skipped.
pub fn parse_keys(text: &str) -> Vec<Key> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_keys_file(path: &Path) -> Result<Vec<Key>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read keys file: {}", path.display()))?;
    Ok(unique(parse_keys(&text)))
}

/// Drop repeated keys, keeping the first occurrence and the original order.
/// Two equal keys would race for the same output file.
pub fn unique(keys: Vec<Key>) -> Vec<Key> {
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(keys.len());
    for key in keys {
        if seen.insert(key.clone()) {
            result.push(key);
        } else {
            warn!("Dropping duplicate key: {}", key);
        }
    }
    result
}
