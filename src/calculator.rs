use std::collections::HashMap;
use std::iter;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::CalculatorError;
use crate::format;
use crate::models::{
    EvolutionPoint, Grade, GradeAdded, GradesDataset, Simulation, Statistics, Subject,
    SubjectAverage, TaggedGrade, Trend, TrendDirection,
};

pub const DEFAULT_MAX: f64 = 20.0;
pub const DEFAULT_COEFFICIENT: f64 = 1.0;

/// Running `sum(value * weight) / sum(weight)`.
#[derive(Debug, Default, Clone, Copy)]
struct WeightedSum {
    points: f64,
    weights: f64,
}

impl WeightedSum {
    fn add(&mut self, value: f64, weight: f64) {
        self.points += value * weight;
        self.weights += weight;
    }

    fn add_grade(&mut self, grade: &Grade) {
        if let Some(normalized) = grade.normalized() {
            self.add(normalized, grade.weight());
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.weights > 0.0).then(|| self.points / self.weights)
    }
}

fn average_of<'a>(grades: impl IntoIterator<Item = &'a Grade>) -> Option<f64> {
    let mut sum = WeightedSum::default();
    for grade in grades {
        sum.add_grade(grade);
    }
    sum.mean()
}

/// Weighted mean of `(average, weight)` pairs; pairs without an average are skipped.
fn general_average_of(averages: impl IntoIterator<Item = (Option<f64>, f64)>) -> Option<f64> {
    let mut sum = WeightedSum::default();
    for (average, weight) in averages {
        if let Some(average) = average {
            sum.add(average, weight);
        }
    }
    sum.mean()
}

pub struct GradeCalculator {
    dataset: GradesDataset,
    loaded_at: DateTime<Local>,
}

impl Default for GradeCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl GradeCalculator {
    pub fn new() -> Self {
        Self {
            dataset: GradesDataset::default(),
            loaded_at: Local::now(),
        }
    }

    /// Replaces the whole working set.
    pub fn load_grades(&mut self, dataset: GradesDataset) {
        debug!(
            subjects = dataset.subjects.len(),
            grades = dataset.all_grades.len(),
            "loading grades"
        );
        *self = Self {
            dataset,
            loaded_at: Local::now(),
        };
    }

    pub fn dataset(&self) -> &GradesDataset {
        &self.dataset
    }

    /// Average of a subject on a /20 scale. `None` means there is nothing to
    /// average, which is not the same as a zero average.
    pub fn calculate_subject_average(subject: &Subject) -> Option<f64> {
        average_of(&subject.grades)
    }

    pub fn calculate_general_average(&self) -> Option<f64> {
        general_average_of(
            self.dataset
                .subjects
                .iter()
                .map(|subject| (Self::calculate_subject_average(subject), subject.weight())),
        )
    }

    pub fn get_all_subject_averages(&self) -> Vec<SubjectAverage> {
        self.dataset
            .subjects
            .iter()
            .filter_map(|subject| {
                Self::calculate_subject_average(subject).map(|average| SubjectAverage {
                    name: subject.name.clone(),
                    average,
                    grade_count: subject.grades.len(),
                    coefficient: subject.weight(),
                })
            })
            .collect()
    }

    pub fn get_best_subject(&self) -> Option<SubjectAverage> {
        best_of(self.get_all_subject_averages())
    }

    pub fn get_worst_subject(&self) -> Option<SubjectAverage> {
        worst_of(self.get_all_subject_averages())
    }

    /// Replays every grade in date order and records the general average as it
    /// stood after each one. Subject weights are taken from the loaded subjects;
    /// grades of subjects that are not loaded do not count.
    pub fn get_average_evolution(&self) -> Vec<EvolutionPoint> {
        let mut live_weights: HashMap<&str, f64> = HashMap::new();
        for subject in &self.dataset.subjects {
            live_weights
                .entry(subject.name.as_str())
                .or_insert_with(|| subject.weight());
        }

        let mut sorted: Vec<&TaggedGrade> = self.dataset.all_grades.iter().collect();
        sorted.sort_by_key(|tagged| {
            let date = tagged.grade.parsed_date();
            (date.is_none(), date)
        });

        let mut running: Vec<(&str, WeightedSum)> = Vec::new();
        let mut evolution = Vec::with_capacity(sorted.len());

        for tagged in sorted {
            let slot = match running
                .iter()
                .position(|(name, _)| *name == tagged.subject)
            {
                Some(slot) => slot,
                None => {
                    running.push((tagged.subject.as_str(), WeightedSum::default()));
                    running.len() - 1
                }
            };
            running[slot].1.add_grade(&tagged.grade);

            let average = general_average_of(running.iter().filter_map(|(name, sum)| {
                live_weights
                    .get(name)
                    .map(|weight| (sum.mean(), *weight))
            }));

            evolution.push(EvolutionPoint {
                date: tagged.grade.date.clone(),
                average,
                grade_added: GradeAdded {
                    subject: tagged.subject.clone(),
                    value: tagged.grade.value,
                    max: tagged.grade.max,
                },
            });
        }

        evolution
    }

    /// General average if one more grade were added to `subject_name`.
    /// Loaded data is left untouched.
    pub fn simulate_grade(
        &self,
        subject_name: &str,
        value: f64,
        max: f64,
        coefficient: f64,
    ) -> Result<Simulation, CalculatorError> {
        let target = self
            .dataset
            .subjects
            .iter()
            .position(|subject| subject.name == subject_name)
            .ok_or_else(|| CalculatorError::SubjectNotFound {
                name: subject_name.to_string(),
            })?;

        let synthetic = Grade {
            simulated: true,
            ..Grade::new(value, max)
                .with_coefficient(coefficient)
                .dated(Local::now().date_naive().to_string())
                .titled("Simulation")
        };

        let current_average = self.calculate_general_average();
        let new_average = general_average_of(self.dataset.subjects.iter().enumerate().map(
            |(index, subject)| {
                let average = if index == target {
                    average_of(subject.grades.iter().chain(iter::once(&synthetic)))
                } else {
                    Self::calculate_subject_average(subject)
                };
                (average, subject.weight())
            },
        ));

        debug!(subject = subject_name, value, max, coefficient, "simulated grade");

        Ok(Simulation {
            current_average,
            new_average,
            difference: current_average
                .zip(new_average)
                .map(|(current, new)| new - current),
        })
    }

    /// Direction of the last step of the evolution series. A change that rounds
    /// to 0.00 counts as stable.
    pub fn get_trend(&self) -> Option<Trend> {
        let evolution = self.get_average_evolution();
        let [.., previous, last] = evolution.as_slice() else {
            return None;
        };
        let difference = last.average? - previous.average?;
        let direction = if difference.abs() < 0.005 {
            TrendDirection::Stable
        } else if difference > 0.0 {
            TrendDirection::Up
        } else {
            TrendDirection::Down
        };
        Some(Trend {
            direction,
            difference,
        })
    }

    pub fn get_statistics(&self) -> Statistics {
        Statistics {
            general_average: format::fixed_or_null(self.calculate_general_average()),
            total_grades: self.dataset.all_grades.len(),
            total_subjects: self.dataset.subjects.len(),
            subject_averages: self
                .get_all_subject_averages()
                .into_iter()
                .map(Into::into)
                .collect(),
            best_subject: self.get_best_subject().map(Into::into),
            worst_subject: self.get_worst_subject().map(Into::into),
            evolution: self
                .get_average_evolution()
                .into_iter()
                .map(Into::into)
                .collect(),
            last_update: format::timestamp(&self.loaded_at),
        }
    }
}

// Strict comparisons: the first subject keeps the spot on ties.
fn best_of(averages: Vec<SubjectAverage>) -> Option<SubjectAverage> {
    averages
        .into_iter()
        .reduce(|best, current| if current.average > best.average { current } else { best })
}

fn worst_of(averages: Vec<SubjectAverage>) -> Option<SubjectAverage> {
    averages
        .into_iter()
        .reduce(|worst, current| if current.average < worst.average { current } else { worst })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(value: f64, max: f64, coefficient: f64, date: &str) -> Grade {
        Grade::new(value, max)
            .with_coefficient(coefficient)
            .dated(date)
    }

    fn subject(name: &str, coefficient: f64, grades: Vec<Grade>) -> Subject {
        Subject {
            coefficient: Some(coefficient),
            ..graded(name, grades)
        }
    }

    fn graded(name: &str, grades: Vec<Grade>) -> Subject {
        Subject {
            grades,
            ..Subject::new(name)
        }
    }

    fn dataset(subjects: Vec<Subject>) -> GradesDataset {
        let all_grades = subjects
            .iter()
            .flat_map(|subject| {
                subject
                    .grades
                    .iter()
                    .map(|grade| TaggedGrade::new(subject.name.clone(), grade.clone()))
            })
            .collect();
        GradesDataset {
            subjects,
            all_grades,
            periods: Vec::new(),
        }
    }

    fn loaded(subjects: Vec<Subject>) -> GradeCalculator {
        let mut calculator = GradeCalculator::new();
        calculator.load_grades(dataset(subjects));
        calculator
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected an average");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn subject_without_grades_has_no_average() {
        assert_eq!(
            GradeCalculator::calculate_subject_average(&Subject::new("Histoire")),
            None
        );
    }

    #[test]
    fn subject_with_only_unusable_grades_has_no_average() {
        let mut absent = Grade::new(0.0, 20.0);
        absent.value = None;
        let maths = graded("Maths", vec![absent, Grade::new(12.0, 0.0)]);
        assert_eq!(GradeCalculator::calculate_subject_average(&maths), None);
    }

    #[test]
    fn equal_weights_average_evenly() {
        let maths = graded("Maths", vec![
            grade(10.0, 20.0, 1.0, "2024-01-10"),
            grade(15.0, 20.0, 1.0, "2024-01-12"),
        ]);
        assert_close(GradeCalculator::calculate_subject_average(&maths), 12.5);
    }

    #[test]
    fn grade_coefficients_weight_the_average() {
        let maths = graded("Maths", vec![
            grade(18.0, 20.0, 2.0, "2024-01-10"),
            grade(10.0, 20.0, 1.0, "2024-01-12"),
        ]);
        assert_close(
            GradeCalculator::calculate_subject_average(&maths),
            (18.0 * 2.0 + 10.0) / 3.0,
        );
    }

    #[test]
    fn grades_are_normalized_to_twenty() {
        let physics = graded("Physique", vec![
            grade(5.0, 10.0, 1.0, "2024-01-10"),
            grade(40.0, 40.0, 1.0, "2024-01-11"),
        ]);
        assert_close(GradeCalculator::calculate_subject_average(&physics), 15.0);
    }

    #[test]
    fn missing_grade_coefficient_counts_as_one() {
        let french = graded("Français", vec![
            Grade::new(8.0, 20.0),
            grade(14.0, 20.0, 1.0, "2024-01-11"),
        ]);
        assert_close(GradeCalculator::calculate_subject_average(&french), 11.0);
    }

    #[test]
    fn zero_coefficients_are_not_promoted() {
        let sport = graded("EPS", vec![
            grade(4.0, 20.0, 0.0, "2024-01-10"),
            grade(16.0, 20.0, 1.0, "2024-01-11"),
        ]);
        assert_close(GradeCalculator::calculate_subject_average(&sport), 16.0);

        let only_zero = graded("EPS", vec![grade(4.0, 20.0, 0.0, "2024-01-10")]);
        assert_eq!(GradeCalculator::calculate_subject_average(&only_zero), None);
    }

    #[test]
    fn negative_coefficients_pass_through() {
        let maths = graded(
            "Maths",
            vec![
                grade(10.0, 20.0, 2.0, "2024-01-10"),
                grade(20.0, 20.0, -1.0, "2024-01-11"),
            ],
        );
        assert_close(GradeCalculator::calculate_subject_average(&maths), 0.0);
    }

    #[test]
    fn general_average_weights_subjects() {
        let calculator = loaded(vec![
            subject("S1", 1.0, vec![grade(10.0, 20.0, 1.0, "2024-01-10")]),
            subject("S2", 2.0, vec![grade(16.0, 20.0, 1.0, "2024-01-11")]),
        ]);
        assert_close(calculator.calculate_general_average(), 14.0);
    }

    #[test]
    fn subjects_without_average_do_not_dilute_general_average() {
        let calculator = loaded(vec![
            subject("S1", 1.0, vec![grade(10.0, 20.0, 1.0, "2024-01-10")]),
            subject("Vide", 5.0, Vec::new()),
        ]);
        assert_close(calculator.calculate_general_average(), 10.0);
    }

    #[test]
    fn general_average_is_none_without_data() {
        assert_eq!(GradeCalculator::new().calculate_general_average(), None);
        let calculator = loaded(vec![Subject::new("Vide")]);
        assert_eq!(calculator.calculate_general_average(), None);
    }

    #[test]
    fn subject_averages_keep_loaded_order_and_skip_empty() {
        let calculator = loaded(vec![
            subject("Maths", 3.0, vec![grade(12.0, 20.0, 1.0, "2024-01-10")]),
            Subject::new("Vide"),
            subject("Anglais", 1.0, vec![grade(17.0, 20.0, 1.0, "2024-01-11")]),
        ]);
        let averages = calculator.get_all_subject_averages();
        let names: Vec<&str> = averages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Maths", "Anglais"]);
        assert_eq!(averages[0].grade_count, 1);
        assert_eq!(averages[0].coefficient, 3.0);
    }

    #[test]
    fn best_and_worst_keep_first_on_ties() {
        let calculator = loaded(vec![
            subject("Maths", 1.0, vec![grade(16.0, 20.0, 1.0, "2024-01-10")]),
            subject("Physique", 1.0, vec![grade(16.0, 20.0, 1.0, "2024-01-11")]),
            subject("Histoire", 1.0, vec![grade(9.0, 20.0, 1.0, "2024-01-12")]),
            subject("Anglais", 1.0, vec![grade(9.0, 20.0, 1.0, "2024-01-13")]),
        ]);
        assert_eq!(calculator.get_best_subject().unwrap().name, "Maths");
        assert_eq!(calculator.get_worst_subject().unwrap().name, "Histoire");
    }

    #[test]
    fn best_and_worst_are_none_without_averages() {
        let calculator = loaded(vec![Subject::new("Vide")]);
        assert_eq!(calculator.get_best_subject(), None);
        assert_eq!(calculator.get_worst_subject(), None);
    }

    #[test]
    fn evolution_is_empty_without_grades() {
        assert!(GradeCalculator::new().get_average_evolution().is_empty());
    }

    #[test]
    fn evolution_has_one_point_per_grade_in_date_order() {
        let calculator = loaded(vec![
            subject(
                "Maths",
                1.0,
                vec![
                    grade(10.0, 20.0, 1.0, "2024-02-01"),
                    grade(20.0, 20.0, 1.0, "2024-01-01"),
                ],
            ),
            subject(
                "Anglais",
                2.0,
                vec![
                    grade(13.0, 20.0, 1.0, "2024-01-15"),
                    grade(7.0, 20.0, 1.0, "2024-01-15"),
                ],
            ),
        ]);

        let evolution = calculator.get_average_evolution();
        assert_eq!(evolution.len(), 4);
        let dates: Vec<&str> = evolution.iter().map(|p| p.date.as_str()).collect();
        assert_eq!(dates, ["2024-01-01", "2024-01-15", "2024-01-15", "2024-02-01"]);

        assert_close(evolution[0].average, 20.0);
        assert_close(evolution[1].average, (20.0 + 13.0 * 2.0) / 3.0);
        assert_close(evolution[2].average, (20.0 + 10.0 * 2.0) / 3.0);
        assert_close(evolution[3].average, (15.0 + 10.0 * 2.0) / 3.0);
        assert_eq!(evolution[3].grade_added.subject, "Maths");
        assert_eq!(evolution[3].grade_added.value, Some(10.0));
        assert_eq!(evolution[3].grade_added.max, Some(20.0));

        assert_close(
            evolution.last().unwrap().average,
            calculator.calculate_general_average().unwrap(),
        );
    }

    #[test]
    fn evolution_skips_subjects_missing_from_loaded_subjects() {
        let mut calculator = GradeCalculator::new();
        calculator.load_grades(GradesDataset {
            subjects: vec![subject(
                "Maths",
                1.0,
                vec![grade(12.0, 20.0, 1.0, "2024-01-02")],
            )],
            all_grades: vec![
                TaggedGrade::new("Latin", grade(4.0, 20.0, 1.0, "2024-01-01")),
                TaggedGrade::new("Maths", grade(12.0, 20.0, 1.0, "2024-01-02")),
            ],
            periods: Vec::new(),
        });

        let evolution = calculator.get_average_evolution();
        assert_eq!(evolution.len(), 2);
        assert_eq!(evolution[0].average, None);
        assert_close(evolution[1].average, 12.0);
    }

    #[test]
    fn evolution_repeats_average_for_unusable_grade() {
        let mut absent = grade(0.0, 20.0, 1.0, "2024-01-02");
        absent.value = None;
        let calculator = loaded(vec![graded(
            "Maths",
            vec![
                grade(14.0, 20.0, 1.0, "2024-01-01"),
                absent,
                grade(8.0, 20.0, 1.0, "2024-01-03"),
            ],
        )]);

        let evolution = calculator.get_average_evolution();
        assert_eq!(evolution.len(), 3);
        assert_close(evolution[0].average, 14.0);
        assert_close(evolution[1].average, 14.0);
        assert_eq!(evolution[1].grade_added.value, None);
        assert_close(evolution[2].average, 11.0);
    }

    #[test]
    fn evolution_puts_undated_grades_last() {
        let mut calculator = GradeCalculator::new();
        calculator.load_grades(GradesDataset {
            subjects: vec![Subject::new("Maths")],
            all_grades: vec![
                TaggedGrade::new("Maths", grade(8.0, 20.0, 1.0, "bientôt")),
                TaggedGrade::new("Maths", grade(16.0, 20.0, 1.0, "2024-01-02")),
            ],
            periods: Vec::new(),
        });

        let evolution = calculator.get_average_evolution();
        assert_eq!(evolution[0].date, "2024-01-02");
        assert_close(evolution[0].average, 16.0);
        assert_close(evolution[1].average, 12.0);
    }

    #[test]
    fn simulation_reports_before_after_and_delta() {
        let calculator = loaded(vec![
            subject("S1", 1.0, vec![grade(10.0, 20.0, 1.0, "2024-01-10")]),
            subject("S2", 2.0, vec![grade(16.0, 20.0, 1.0, "2024-01-11")]),
        ]);

        let simulation = calculator
            .simulate_grade("S1", 20.0, DEFAULT_MAX, DEFAULT_COEFFICIENT)
            .unwrap();
        assert_close(simulation.current_average, 14.0);
        assert_close(simulation.new_average, (15.0 + 32.0) / 3.0);
        assert_close(simulation.difference, (15.0 + 32.0) / 3.0 - 14.0);
    }

    #[test]
    fn simulation_does_not_touch_loaded_grades() {
        let calculator = loaded(vec![
            subject("S1", 1.0, vec![grade(10.0, 20.0, 1.0, "2024-01-10")]),
            subject("S2", 2.0, vec![grade(16.0, 20.0, 1.0, "2024-01-11")]),
        ]);
        let before = calculator.calculate_general_average();

        let first = calculator.simulate_grade("S2", 4.0, 10.0, 3.0).unwrap();
        let second = calculator.simulate_grade("S2", 4.0, 10.0, 3.0).unwrap();

        assert_eq!(first.new_average, second.new_average);
        assert_eq!(calculator.calculate_general_average(), before);
        assert_eq!(calculator.dataset().subjects[1].grades.len(), 1);
    }

    #[test]
    fn simulation_on_empty_subject_gives_new_average() {
        let calculator = loaded(vec![Subject::new("Maths")]);
        let simulation = calculator.simulate_grade("Maths", 15.0, 20.0, 1.0).unwrap();
        assert_eq!(simulation.current_average, None);
        assert_close(simulation.new_average, 15.0);
        assert_eq!(simulation.difference, None);
    }

    #[test]
    fn simulation_on_unknown_subject_is_an_error() {
        let calculator = loaded(vec![subject(
            "Maths",
            1.0,
            vec![grade(10.0, 20.0, 1.0, "2024-01-10")],
        )]);
        let result = calculator.simulate_grade("Latin", 12.0, 20.0, 1.0);
        assert!(matches!(
            result,
            Err(CalculatorError::SubjectNotFound { ref name }) if name == "Latin"
        ));
    }

    #[test]
    fn trend_follows_last_step() {
        let rising = loaded(vec![subject(
            "Maths",
            1.0,
            vec![
                grade(10.0, 20.0, 1.0, "2024-01-01"),
                grade(14.0, 20.0, 1.0, "2024-01-02"),
            ],
        )]);
        let trend = rising.get_trend().unwrap();
        assert_eq!(trend.direction, TrendDirection::Up);
        assert!((trend.difference - 2.0).abs() < 1e-9);

        let falling = loaded(vec![subject(
            "Maths",
            1.0,
            vec![
                grade(14.0, 20.0, 1.0, "2024-01-01"),
                grade(6.0, 20.0, 1.0, "2024-01-02"),
            ],
        )]);
        assert_eq!(falling.get_trend().unwrap().direction, TrendDirection::Down);

        let flat = loaded(vec![subject(
            "Maths",
            1.0,
            vec![
                grade(12.0, 20.0, 1.0, "2024-01-01"),
                grade(12.0, 20.0, 1.0, "2024-01-02"),
            ],
        )]);
        assert_eq!(flat.get_trend().unwrap().direction, TrendDirection::Stable);

        let single = loaded(vec![subject(
            "Maths",
            1.0,
            vec![grade(12.0, 20.0, 1.0, "2024-01-01")],
        )]);
        assert_eq!(single.get_trend(), None);
    }

    #[test]
    fn statistics_are_formatted_and_idempotent() {
        let calculator = loaded(vec![
            subject(
                "Maths",
                1.0,
                vec![
                    grade(18.0, 20.0, 2.0, "2024-01-10"),
                    grade(10.0, 20.0, 1.0, "2024-01-12"),
                ],
            ),
            Subject::new("Vide"),
        ]);

        let statistics = calculator.get_statistics();
        assert_eq!(statistics.general_average.as_deref(), Some("15.33"));
        assert_eq!(statistics.total_grades, 2);
        assert_eq!(statistics.total_subjects, 2);
        assert_eq!(statistics.subject_averages.len(), 1);
        assert_eq!(statistics.subject_averages[0].average, "15.33");
        assert_eq!(statistics.best_subject.as_ref().unwrap().average, "15.33");
        assert_eq!(statistics.evolution[0].average.as_deref(), Some("18.00"));

        assert_eq!(calculator.get_statistics(), statistics);
    }

    #[test]
    fn statistics_do_not_restore_exact_averages() {
        let calculator = loaded(vec![subject(
            "Maths",
            1.0,
            vec![
                grade(18.0, 20.0, 2.0, "2024-01-10"),
                grade(10.0, 20.0, 1.0, "2024-01-12"),
            ],
        )]);
        let exact = calculator.calculate_general_average().unwrap();
        let statistics = calculator.get_statistics();
        let reparsed: f64 = statistics.general_average.unwrap().parse().unwrap();
        assert_ne!(reparsed, exact);
        assert!((reparsed - exact).abs() < 0.005);
    }

    #[test]
    fn statistics_json_uses_camel_case_and_null() {
        let calculator = loaded(vec![Subject::new("Vide")]);
        let json = serde_json::to_value(calculator.get_statistics()).unwrap();
        assert!(json["generalAverage"].is_null());
        assert!(json["bestSubject"].is_null());
        assert_eq!(json["totalSubjects"], 1);
        assert!(json["lastUpdate"].is_string());
    }

    #[test]
    fn loading_replaces_previous_dataset() {
        let mut calculator = loaded(vec![subject(
            "Maths",
            1.0,
            vec![grade(10.0, 20.0, 1.0, "2024-01-10")],
        )]);
        calculator.load_grades(GradesDataset::default());
        assert_eq!(calculator.calculate_general_average(), None);
        assert!(calculator.get_all_subject_averages().is_empty());
    }
}
