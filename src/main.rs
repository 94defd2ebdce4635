use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

mod calculator;
mod error;
mod format;
mod loader;
mod logging;
mod models;
mod report;

use calculator::{GradeCalculator, DEFAULT_COEFFICIENT, DEFAULT_MAX};

#[derive(Parser)]
#[command(name = "ecole-grades")]
#[command(about = "Grade statistics for EcoleDirecte exports", long_about = None)]
struct Cli {
    /// Normalized grades dataset (JSON)
    #[arg(long, global = true, env = "ECOLE_GRADES_FILE", default_value = "grades.json")]
    grades: PathBuf,
    /// Log level or filter directive
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the general average and subject ranking
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// List subject averages
    Subjects {
        /// Sort from best to worst average
        #[arg(long)]
        ranked: bool,
    },
    /// Show how the general average moved grade after grade
    Evolution {
        #[arg(long)]
        last: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Predict the general average after one more grade
    Simulate {
        #[arg(long)]
        subject: String,
        #[arg(long, allow_negative_numbers = true)]
        value: f64,
        #[arg(long, default_value_t = DEFAULT_MAX)]
        max: f64,
        #[arg(long, default_value_t = DEFAULT_COEFFICIENT)]
        coefficient: f64,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        label: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Convert a CSV export into a grades dataset
    Import {
        #[arg(long)]
        csv: PathBuf,
        /// Defaults to the --grades path
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write a realistic sample dataset
    Seed {
        /// Defaults to the --grades path
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn load_calculator(path: &std::path::Path) -> anyhow::Result<GradeCalculator> {
    let dataset = loader::load_json(path)
        .with_context(|| format!("failed to load grades from {}", path.display()))?;
    let mut calculator = GradeCalculator::new();
    calculator.load_grades(dataset);
    Ok(calculator)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_level, cli.log_json)?;

    match cli.command {
        Commands::Stats { json } => {
            let calculator = load_calculator(&cli.grades)?;
            let statistics = calculator.get_statistics();

            if json {
                println!("{}", serde_json::to_string_pretty(&statistics)?);
                return Ok(());
            }

            println!(
                "General average: {}/20 (trend {})",
                format::display_text(statistics.general_average.as_deref()),
                report::describe_trend(calculator.get_trend())
            );
            println!(
                "{} grades across {} subjects",
                statistics.total_grades, statistics.total_subjects
            );
            if let Some(best) = &statistics.best_subject {
                println!("Best subject: {} ({})", best.name, best.average);
            }
            if let Some(worst) = &statistics.worst_subject {
                println!("To improve: {} ({})", worst.name, worst.average);
            }
            println!("Last update: {}", statistics.last_update);
        }
        Commands::Subjects { ranked } => {
            let calculator = load_calculator(&cli.grades)?;
            let mut averages = calculator.get_all_subject_averages();

            if averages.is_empty() {
                println!("No subject has a usable grade yet.");
                return Ok(());
            }

            if ranked {
                averages.sort_by(|a, b| b.average.total_cmp(&a.average));
            }
            for subject in averages.iter() {
                println!(
                    "- {}: {}/20 across {} grades (coefficient {})",
                    subject.name,
                    format::fixed(subject.average),
                    subject.grade_count,
                    subject.coefficient
                );
            }
        }
        Commands::Evolution { last, json } => {
            let calculator = load_calculator(&cli.grades)?;
            let mut evolution = calculator.get_statistics().evolution;
            if let Some(last) = last {
                let skip = evolution.len().saturating_sub(last);
                evolution.drain(..skip);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&evolution)?);
                return Ok(());
            }

            if evolution.is_empty() {
                println!("No grades recorded.");
                return Ok(());
            }
            for point in evolution.iter() {
                println!(
                    "{} {} ({} {}/{})",
                    point.date,
                    format::display_text(point.average.as_deref()),
                    point.grade_added.subject,
                    format::display(point.grade_added.value),
                    format::display(point.grade_added.max)
                );
            }
        }
        Commands::Simulate {
            subject,
            value,
            max,
            coefficient,
            json,
        } => {
            let calculator = load_calculator(&cli.grades)?;
            let simulation = calculator.simulate_grade(&subject, value, max, coefficient)?;
            info!(subject = %subject, value, max, coefficient, "simulation done");

            if json {
                println!("{}", serde_json::to_string_pretty(&simulation)?);
                return Ok(());
            }

            println!(
                "Adding {}/{} (coefficient {}) in {}:",
                value, max, coefficient, subject
            );
            println!(
                "{} -> {} ({})",
                format::display(simulation.current_average),
                format::display(simulation.new_average),
                simulation
                    .difference
                    .map(|difference| format!("{difference:+.2}"))
                    .unwrap_or_else(|| format::MISSING.to_string())
            );
        }
        Commands::Report { label, out } => {
            let calculator = load_calculator(&cli.grades)?;
            let report = report::build_report(label.as_deref(), &calculator);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            info!(path = %out.display(), "report written");
            println!("Report written to {}.", out.display());
        }
        Commands::Import { csv, out } => {
            let loader::CsvImport {
                dataset,
                skipped_lines,
            } = loader::import_csv(&csv)?;
            let out = out.unwrap_or(cli.grades);
            loader::write_json(&out, &dataset)?;
            info!(path = %out.display(), "dataset written");
            println!(
                "Imported {} grades in {} subjects from {} into {}.",
                dataset.all_grades.len(),
                dataset.subjects.len(),
                csv.display(),
                out.display()
            );
            if !skipped_lines.is_empty() {
                let lines: Vec<String> = skipped_lines.iter().map(u64::to_string).collect();
                println!("Skipped rows without subject on lines {}.", lines.join(", "));
            }
        }
        Commands::Seed { out } => {
            let out = out.unwrap_or(cli.grades);
            loader::write_json(&out, &loader::seed_dataset())?;
            println!("Seed data written to {}.", out.display());
        }
    }

    Ok(())
}
