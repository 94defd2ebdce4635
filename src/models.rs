use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

use crate::format;

/// A single scored assessment.
///
/// `value` and `max` are kept optional: exports regularly carry placeholders
/// such as `"Abs"` or `"Disp"` instead of a score, and those grades are simply
/// left out of every average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    #[serde(default, deserialize_with = "lenient_number")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub coefficient: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl Grade {
    pub fn new(value: f64, max: f64) -> Self {
        Self {
            value: Some(value),
            max: Some(max),
            coefficient: None,
            date: String::new(),
            title: None,
            period: None,
            simulated: false,
        }
    }

    pub fn with_coefficient(mut self, coefficient: f64) -> Self {
        self.coefficient = Some(coefficient);
        self
    }

    pub fn dated(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Score rescaled to /20, or `None` when the grade cannot be averaged.
    pub fn normalized(&self) -> Option<f64> {
        match (self.value, self.max) {
            (Some(value), Some(max)) if value.is_finite() && max.is_finite() && max > 0.0 => {
                Some(value / max * 20.0).filter(|normalized| normalized.is_finite())
            }
            _ => None,
        }
    }

    /// Only a missing coefficient falls back to 1; zero stays zero.
    pub fn weight(&self) -> f64 {
        self.coefficient.unwrap_or(1.0)
    }

    pub fn parsed_date(&self) -> Option<NaiveDateTime> {
        parse_date(&self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub grades: Vec<Grade>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub coefficient: Option<f64>,
}

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grades: Vec::new(),
            coefficient: None,
        }
    }

    pub fn weight(&self) -> f64 {
        self.coefficient.unwrap_or(1.0)
    }
}

/// A grade carrying the name of the subject it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedGrade {
    #[serde(flatten)]
    pub grade: Grade,
    pub subject: String,
}

impl TaggedGrade {
    pub fn new(subject: impl Into<String>, grade: Grade) -> Self {
        Self {
            grade,
            subject: subject.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradesDataset {
    #[serde(default, deserialize_with = "null_as_default")]
    pub subjects: Vec<Subject>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub all_grades: Vec<TaggedGrade>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub periods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectAverage {
    pub name: String,
    pub average: f64,
    pub grade_count: usize,
    pub coefficient: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeAdded {
    pub subject: String,
    pub value: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionPoint {
    pub date: String,
    pub average: Option<f64>,
    pub grade_added: GradeAdded,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    #[serde(serialize_with = "format::serialize_fixed")]
    pub current_average: Option<f64>,
    #[serde(serialize_with = "format::serialize_fixed")]
    pub new_average: Option<f64>,
    #[serde(serialize_with = "format::serialize_fixed")]
    pub difference: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverageSummary {
    pub name: String,
    pub average: String,
    pub grade_count: usize,
    pub coefficient: f64,
}

impl From<SubjectAverage> for SubjectAverageSummary {
    fn from(subject: SubjectAverage) -> Self {
        Self {
            average: format::fixed(subject.average),
            name: subject.name,
            grade_count: subject.grade_count,
            coefficient: subject.coefficient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSubject {
    pub name: String,
    pub average: String,
}

impl From<SubjectAverage> for RankedSubject {
    fn from(subject: SubjectAverage) -> Self {
        Self {
            average: format::fixed(subject.average),
            name: subject.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionSummary {
    pub date: String,
    pub average: Option<String>,
    pub grade_added: GradeAdded,
}

impl From<EvolutionPoint> for EvolutionSummary {
    fn from(point: EvolutionPoint) -> Self {
        Self {
            date: point.date,
            average: format::fixed_or_null(point.average),
            grade_added: point.grade_added,
        }
    }
}

/// Display-ready snapshot. Averages are already rounded to two decimals, so
/// this cannot be turned back into an exact dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub general_average: Option<String>,
    pub total_grades: usize,
    pub total_subjects: usize,
    pub subject_averages: Vec<SubjectAverageSummary>,
    pub best_subject: Option<RankedSubject>,
    pub worst_subject: Option<RankedSubject>,
    pub evolution: Vec<EvolutionSummary>,
    pub last_update: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Number(f64),
    Text(String),
    Other(#[allow(dead_code)] IgnoredAny),
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawNumber>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawNumber::Number(number)) => Some(number).filter(|n| n.is_finite()),
        Some(RawNumber::Text(text)) => parse_number(&text),
        Some(RawNumber::Other(_)) | None => None,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawText {
    Text(String),
    Other(#[allow(dead_code)] IgnoredAny),
}

/// Anything but a string reads as an empty string.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawText>::deserialize(deserializer)? {
        Some(RawText::Text(text)) => text,
        Some(RawText::Other(_)) | None => String::new(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Parses a score as written in exports, accepting `12,5` as well as `12.5`.
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.naive_utc());
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(at) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(at);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
