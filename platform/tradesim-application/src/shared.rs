use std::path::{Path, PathBuf};

/// Epoch seconds or RFC 3339.
pub(crate) fn parse_timestamp_seconds(raw: &str) -> Result<i64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("timestamp cannot be empty".to_string());
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    let dt = chrono::DateTime::parse_from_rfc3339(trimmed)
        .map_err(|err| format!("invalid timestamp (expected epoch seconds or RFC3339): {err}"))?;
    Ok(dt.timestamp())
}

pub(crate) fn resolve_relative_to(anchor_file: &Path, target: &str) -> PathBuf {
    let p = PathBuf::from(target);
    if p.is_absolute() {
        p
    } else {
        anchor_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(p)
    }
}
