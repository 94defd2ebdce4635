use std::fmt::Write;

use crate::calculator::GradeCalculator;
use crate::format;
use crate::models::{TaggedGrade, Trend, TrendDirection};

pub fn describe_trend(trend: Option<Trend>) -> String {
    match trend {
        Some(Trend {
            direction: TrendDirection::Up,
            difference,
        }) => format!("↗ +{difference:.2}"),
        Some(Trend {
            direction: TrendDirection::Down,
            difference,
        }) => format!("↘ {difference:.2}"),
        Some(Trend {
            direction: TrendDirection::Stable,
            ..
        }) => "→ stable".to_string(),
        None => format::MISSING.to_string(),
    }
}

pub fn recent_grades(calculator: &GradeCalculator, limit: usize) -> Vec<&TaggedGrade> {
    let mut recent: Vec<&TaggedGrade> = calculator.dataset().all_grades.iter().collect();
    recent.sort_by(|a, b| b.grade.parsed_date().cmp(&a.grade.parsed_date()));
    recent.truncate(limit);
    recent
}

pub fn build_report(label: Option<&str>, calculator: &GradeCalculator) -> String {
    let statistics = calculator.get_statistics();
    let trend = calculator.get_trend();

    let mut output = String::new();
    let label = label.unwrap_or("all periods");

    let _ = writeln!(output, "# Grade Report");
    let _ = writeln!(
        output,
        "Generated for {} (data loaded {})",
        label, statistics.last_update
    );
    if !calculator.dataset().periods.is_empty() {
        let _ = writeln!(
            output,
            "Periods: {}",
            calculator.dataset().periods.join(", ")
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## General Average");
    let _ = writeln!(
        output,
        "- {}/20 (trend {})",
        format::display_text(statistics.general_average.as_deref()),
        describe_trend(trend)
    );
    let _ = writeln!(
        output,
        "- {} grades across {} subjects",
        statistics.total_grades, statistics.total_subjects
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subjects");

    if statistics.subject_averages.is_empty() {
        let _ = writeln!(output, "No subject has a usable grade yet.");
    } else {
        let _ = writeln!(output, "| Subject | Average | Grades | Coefficient |");
        let _ = writeln!(output, "| --- | --- | --- | --- |");
        for subject in statistics.subject_averages.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} |",
                subject.name, subject.average, subject.grade_count, subject.coefficient
            );
        }
    }

    if let (Some(best), Some(worst)) = (&statistics.best_subject, &statistics.worst_subject) {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Strengths");
        let _ = writeln!(output, "- Best subject: {} ({})", best.name, best.average);
        let _ = writeln!(output, "- To improve: {} ({})", worst.name, worst.average);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Grades");

    let recent = recent_grades(calculator, 5);
    if recent.is_empty() {
        let _ = writeln!(output, "No grades recorded.");
    } else {
        for tagged in recent {
            let _ = writeln!(
                output,
                "- {} on {}: {}/{} ({})",
                tagged.subject,
                tagged.grade.date,
                format::display(tagged.grade.value),
                format::display(tagged.grade.max),
                tagged.grade.title.as_deref().unwrap_or("untitled")
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Evolution");

    if statistics.evolution.is_empty() {
        let _ = writeln!(output, "No grades recorded.");
    } else {
        for point in statistics.evolution.iter() {
            let _ = writeln!(
                output,
                "- {}: {} after {} in {}",
                point.date,
                format::display_text(point.average.as_deref()),
                format::display(point.grade_added.value),
                point.grade_added.subject
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::seed_dataset;
    use crate::models::GradesDataset;

    #[test]
    fn trend_labels_match_direction() {
        assert_eq!(
            describe_trend(Some(Trend {
                direction: TrendDirection::Up,
                difference: 0.5
            })),
            "↗ +0.50"
        );
        assert_eq!(
            describe_trend(Some(Trend {
                direction: TrendDirection::Down,
                difference: -1.25
            })),
            "↘ -1.25"
        );
        assert_eq!(describe_trend(None), "--");
    }

    #[test]
    fn report_lists_subjects_and_recent_grades() {
        let mut calculator = GradeCalculator::new();
        calculator.load_grades(seed_dataset());

        let report = build_report(Some("Trimestre 1"), &calculator);
        assert!(report.starts_with("# Grade Report"));
        assert!(report.contains("Generated for Trimestre 1"));
        assert!(report.contains("| Mathématiques |"));
        assert!(report.contains("- Best subject:"));
        assert!(report.contains("- EPS on 2024-12-10: 16.00/20.00"));
    }

    #[test]
    fn empty_report_uses_placeholders() {
        let mut calculator = GradeCalculator::new();
        calculator.load_grades(GradesDataset::default());

        let report = build_report(None, &calculator);
        assert!(report.contains("- --/20 (trend --)"));
        assert!(report.contains("No subject has a usable grade yet."));
        assert!(!report.contains("## Strengths"));
    }

    #[test]
    fn recent_grades_are_newest_first() {
        let mut calculator = GradeCalculator::new();
        calculator.load_grades(seed_dataset());
        let recent = recent_grades(&calculator, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].grade.date, "2024-12-10");
        assert_eq!(recent[1].grade.date, "2024-12-03");
    }
}
