use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};

/// Shown in text output wherever an average is missing. JSON output uses `null`.
pub const MISSING: &str = "--";

pub fn fixed(value: f64) -> String {
    format!("{value:.2}")
}

pub fn fixed_or_null(value: Option<f64>) -> Option<String> {
    value.map(fixed)
}

pub fn display(value: Option<f64>) -> String {
    value.map(fixed).unwrap_or_else(|| MISSING.to_string())
}

pub fn display_text(value: Option<&str>) -> &str {
    value.unwrap_or(MISSING)
}

pub fn timestamp(at: &DateTime<Local>) -> String {
    at.format("%d/%m/%Y %H:%M:%S").to_string()
}

pub fn serialize_fixed<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    fixed_or_null(*value).serialize(serializer)
}
