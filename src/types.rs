use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

/// How source files contribute to an item's fingerprint.
///
/// - `Checksum`: hash the content of every matched source file (default).
/// - `ModifyDate`: use each file's mtime instead of its content. Cheaper, but
///   touching a file without changing it invalidates the cache.
/// - `None`: disable caching entirely; every evaluation reports "changed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    Checksum,
    ModifyDate,
    None,
}

impl Default for CacheMode {
    fn default() -> Self {
        CacheMode::Checksum
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "checksum" => Ok(CacheMode::Checksum),
            "modify-date" | "modifydate" => Ok(CacheMode::ModifyDate),
            "none" => Ok(CacheMode::None),
            other => Err(format!(
                "invalid cache mode: {other} (expected \"checksum\", \"modify-date\" or \"none\")"
            )),
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
///
/// This is intentionally minimal; it covers the forms used in build files.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
