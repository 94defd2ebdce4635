use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::models::{parse_number, Grade, GradesDataset, Subject, TaggedGrade};

pub fn load_json(path: &Path) -> Result<GradesDataset, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let dataset: GradesDataset =
        serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(
        path = %path.display(),
        subjects = dataset.subjects.len(),
        grades = dataset.all_grades.len(),
        "read grades dataset"
    );
    Ok(dataset)
}

pub fn write_json(path: &Path, dataset: &GradesDataset) -> Result<(), LoadError> {
    let text = serde_json::to_string_pretty(dataset).map_err(|source| LoadError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Groups grades by subject in first-seen order while keeping the flat list.
#[derive(Default)]
struct DatasetBuilder {
    subjects: Vec<Subject>,
    index: HashMap<String, usize>,
    all_grades: Vec<TaggedGrade>,
}

impl DatasetBuilder {
    fn push(&mut self, subject: &str, subject_coefficient: Option<f64>, grade: Grade) {
        let slot = match self.index.get(subject) {
            Some(&slot) => slot,
            None => {
                self.subjects.push(Subject::new(subject));
                self.index.insert(subject.to_string(), self.subjects.len() - 1);
                self.subjects.len() - 1
            }
        };
        let entry = &mut self.subjects[slot];
        if entry.coefficient.is_none() {
            entry.coefficient = subject_coefficient;
        }
        entry.grades.push(grade.clone());
        self.all_grades.push(TaggedGrade::new(subject, grade));
    }

    fn finish(self) -> GradesDataset {
        GradesDataset {
            subjects: self.subjects,
            all_grades: self.all_grades,
            periods: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct CsvRow {
    subject: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    max: Option<String>,
    #[serde(default)]
    coefficient: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    subject_coefficient: Option<String>,
}

/// Dataset built from a CSV export, with the file lines of dropped rows.
#[derive(Debug)]
pub struct CsvImport {
    pub dataset: GradesDataset,
    pub skipped_lines: Vec<u64>,
}

pub fn import_csv(path: &Path) -> Result<CsvImport, LoadError> {
    let file = fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_csv(file).map_err(|source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads one grade per row. Scores that do not parse are kept as absent
/// values; only rows without a subject are dropped.
pub fn read_csv<R: io::Read>(input: R) -> Result<CsvImport, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let headers = reader.headers()?.clone();
    let mut record = csv::StringRecord::new();
    let mut builder = DatasetBuilder::default();
    let mut periods: Vec<String> = Vec::new();
    let mut skipped_lines = Vec::new();

    while reader.read_record(&mut record)? {
        let row: CsvRow = record.deserialize(Some(&headers))?;
        if row.subject.is_empty() {
            let line = record.position().map_or(0, |position| position.line());
            warn!(line, "skipping grade without subject");
            skipped_lines.push(line);
            continue;
        }

        let number = |field: &Option<String>| field.as_deref().and_then(parse_number);
        let period = row.period.filter(|period| !period.is_empty());
        if let Some(period) = &period {
            if !periods.contains(period) {
                periods.push(period.clone());
            }
        }

        let grade = Grade {
            value: number(&row.value),
            max: number(&row.max),
            coefficient: number(&row.coefficient),
            date: row.date.unwrap_or_default(),
            title: row.title.filter(|title| !title.is_empty()),
            period,
            simulated: false,
        };
        builder.push(&row.subject, number(&row.subject_coefficient), grade);
    }

    let mut dataset = builder.finish();
    dataset.periods = periods;
    debug!(
        subjects = dataset.subjects.len(),
        grades = dataset.all_grades.len(),
        skipped = skipped_lines.len(),
        "imported grades from CSV"
    );
    Ok(CsvImport {
        dataset,
        skipped_lines,
    })
}

/// A realistic first term for a lycée student.
pub fn seed_dataset() -> GradesDataset {
    let grades: [(&str, f64, f64, f64, f64, &str, &str); 14] = [
        ("Mathématiques", 4.0, 14.0, 20.0, 2.0, "2024-09-20", "Fonctions affines"),
        ("Français", 3.0, 12.5, 20.0, 1.0, "2024-09-24", "Commentaire de texte"),
        ("Anglais", 2.0, 17.0, 20.0, 1.0, "2024-09-26", "Oral"),
        ("Physique-Chimie", 3.0, 8.0, 10.0, 1.0, "2024-10-01", "Interrogation"),
        ("Histoire-Géographie", 2.0, 11.0, 20.0, 1.0, "2024-10-03", "Croquis"),
        ("Mathématiques", 4.0, 9.5, 20.0, 1.0, "2024-10-08", "Interrogation"),
        ("SVT", 2.0, 15.0, 20.0, 2.0, "2024-10-10", "TP génétique"),
        ("Français", 3.0, 7.0, 10.0, 1.0, "2024-10-15", "Lecture"),
        ("Anglais", 2.0, 13.0, 20.0, 2.0, "2024-11-05", "Compréhension écrite"),
        ("Physique-Chimie", 3.0, 13.0, 20.0, 2.0, "2024-11-12", "Devoir surveillé"),
        ("Mathématiques", 4.0, 16.5, 20.0, 3.0, "2024-11-19", "Devoir surveillé"),
        ("Histoire-Géographie", 2.0, 14.0, 20.0, 2.0, "2024-11-26", "Composition"),
        ("SVT", 2.0, 28.0, 40.0, 1.0, "2024-12-03", "Exposé"),
        ("EPS", 1.0, 16.0, 20.0, 1.0, "2024-12-10", "Course d'orientation"),
    ];

    let mut builder = DatasetBuilder::default();
    for (subject, subject_coefficient, value, max, coefficient, date, title) in grades {
        let mut grade = Grade::new(value, max)
            .with_coefficient(coefficient)
            .dated(date)
            .titled(title);
        grade.period = Some("A001".to_string());
        builder.push(subject, Some(subject_coefficient), grade);
    }

    let mut dataset = builder.finish();
    dataset.periods = vec!["A001".to_string()];
    dataset
}
