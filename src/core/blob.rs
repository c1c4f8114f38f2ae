//! Blob parameters: classification into a normalized record plus
//! constraint checks.
//!
//! Input is tried as a data URL, then bare base64, then a filesystem path.
//! Errors are returned as plain messages; the validator wraps them with the
//! parameter name.

use crate::core::manifest::BlobConstraints;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^data:([^;,]*)((?:;[^;,]+)*?);base64,(.*)$").unwrap()
});
static BASE64_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap());
static SIZE_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(b|kb|mb|gb)?\s*$").unwrap());

const MIN_BARE_BASE64: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlobKind {
    DataUrl,
    Base64,
    Path,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    #[serde(rename = "type")]
    pub kind: BlobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Classify a raw string.
pub fn classify(input: &str) -> Result<BlobRecord, String> {
    let trimmed = input.trim();
    if trimmed.starts_with("data:") {
        return classify_data_url(trimmed);
    }
    if let Some(bytes) = decode_bare_base64(trimmed) {
        return Ok(BlobRecord {
            kind: BlobKind::Base64,
            data: Some(trimmed.to_string()),
            path: None,
            mime_type: None,
            size: Some(bytes as u64),
        });
    }
    Ok(path_record(trimmed))
}

fn classify_data_url(input: &str) -> Result<BlobRecord, String> {
    let caps = DATA_URL
        .captures(input)
        .ok_or_else(|| "is not a valid data URL (expected data:<mime>;base64,<data>)".to_string())?;
    let mime = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let data = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
    let decoded = BASE64
        .decode(data.trim())
        .map_err(|e| format!("has an undecodable data URL payload: {}", e))?;
    Ok(BlobRecord {
        kind: BlobKind::DataUrl,
        data: Some(data.to_string()),
        path: None,
        mime_type: Some(if mime.is_empty() {
            "text/plain".to_string()
        } else {
            mime.to_ascii_lowercase()
        }),
        size: Some(decoded.len() as u64),
    })
}

/// Decoded length when `input` is plausibly bare base64.
fn decode_bare_base64(input: &str) -> Option<usize> {
    if input.len() < MIN_BARE_BASE64 || input.len() % 4 != 0 || !BASE64_BODY.is_match(input) {
        return None;
    }
    BASE64.decode(input).ok().map(|bytes| bytes.len())
}

fn path_record(raw: &str) -> BlobRecord {
    let path = Path::new(raw);
    let size = fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len());
    BlobRecord {
        kind: BlobKind::Path,
        data: None,
        path: Some(raw.to_string()),
        mime_type: mime_from_extension(path),
        size,
    }
}

pub fn mime_from_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    };
    Some(mime.to_string())
}

/// Normalize a blob argument and check it against `constraints`.
pub fn normalize(value: &Value, constraints: Option<&BlobConstraints>) -> Result<Value, String> {
    let record = match value {
        Value::String(s) => classify(s)?,
        Value::Object(_) => recheck(value)?,
        _ => return Err("must be a data URL, base64 string or path".to_string()),
    };
    if let Some(constraints) = constraints {
        check_constraints(&record, constraints)?;
    }
    serde_json::to_value(&record).map_err(|e| e.to_string())
}

/// Re-validate a record that arrived already normalized, e.g. from a chain.
fn recheck(value: &Value) -> Result<BlobRecord, String> {
    let record: BlobRecord = serde_json::from_value(value.clone())
        .map_err(|e| format!("is not a valid blob record: {}", e))?;
    match record.kind {
        BlobKind::DataUrl | BlobKind::Base64 if record.data.is_none() => {
            Err("record is missing its data".to_string())
        }
        BlobKind::Path => match &record.path {
            Some(p) => {
                let mut fresh = path_record(p);
                if fresh.mime_type.is_none() {
                    fresh.mime_type = record.mime_type;
                }
                Ok(fresh)
            }
            None => Err("record is missing its path".to_string()),
        },
        _ => Ok(record),
    }
}

pub fn check_constraints(record: &BlobRecord, constraints: &BlobConstraints) -> Result<(), String> {
    if let Some(limit) = &constraints.max_size {
        let max = parse_size(limit)?;
        if let Some(size) = record.size {
            if size > max {
                return Err(format!(
                    "exceeds maximum size of {} ({} bytes)",
                    describe_limit(limit),
                    size
                ));
            }
        }
    }

    if !constraints.allowed_types.is_empty() {
        let mime = record.mime_type.as_deref().unwrap_or("");
        let allowed = constraints
            .allowed_types
            .iter()
            .any(|pattern| mime_matches(pattern, mime));
        if !allowed {
            return Err(format!(
                "has type '{}', allowed types: {}",
                if mime.is_empty() { "unknown" } else { mime },
                constraints.allowed_types.join(", ")
            ));
        }
    }

    if !constraints.allowed_extensions.is_empty() {
        if let Some(path) = &record.path {
            let ext = Path::new(path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            let allowed = constraints
                .allowed_extensions
                .iter()
                .any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(&ext));
            if ext.is_empty() || !allowed {
                return Err(format!(
                    "has extension '{}', allowed extensions: {}",
                    ext,
                    constraints.allowed_extensions.join(", ")
                ));
            }
        }
    }
    Ok(())
}

fn mime_matches(pattern: &str, mime: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let mime = mime.to_ascii_lowercase();
    match pattern.strip_suffix("/*") {
        Some(major) => mime.split('/').next() == Some(major),
        None => pattern == mime,
    }
}

/// Bytes from a number or a size string such as `"10KB"` (binary multiples).
pub fn parse_size(limit: &Value) -> Result<u64, String> {
    match limit {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| format!("has an invalid maxSize constraint: {}", n)),
        Value::String(s) => {
            let caps = SIZE_STRING
                .captures(s)
                .ok_or_else(|| format!("has an invalid maxSize constraint: '{}'", s))?;
            let amount: f64 = caps[1]
                .parse()
                .map_err(|_| format!("has an invalid maxSize constraint: '{}'", s))?;
            let unit = caps
                .get(2)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let multiplier: u64 = match unit.as_str() {
                "kb" => 1024,
                "mb" => 1024 * 1024,
                "gb" => 1024 * 1024 * 1024,
                _ => 1,
            };
            Ok((amount * multiplier as f64) as u64)
        }
        other => Err(format!("has an invalid maxSize constraint: {}", other)),
    }
}

fn describe_limit(limit: &Value) -> String {
    match limit {
        Value::String(s) => s.trim().to_string(),
        other => format!("{} bytes", other),
    }
}
