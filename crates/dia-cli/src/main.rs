use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dia_collect::{
    check_runs, collect_best, collect_end_of_run, collect_over_time, collect_perf_agg,
    collect_solution_found, CheckReport, CollectSummary,
};
use dia_params::{Diagnostic, Experiment, Selection, Similarity, Treatment};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dia", version, about = "Diagnostic experiment data wrangling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Parameters identifying one experiment batch, shared by every subcommand.
#[derive(Args, Clone)]
struct ExperimentArgs {
    /// Selection scheme id: 0 truncation, 1 tournament, 2 fitness sharing,
    /// 3 lexicase, 4 nondominated sorting, 5 novelty
    selection: i64,
    /// Diagnostic id: 0 exploitation rate, 1 ordered exploitation,
    /// 2 contradictory objectives, 3 multipath exploration
    diagnostic: i64,
    /// Offset applied to every replicate seed
    seed_offset: i64,
    /// Number of objectives being optimized
    objectives: String,
    /// Satisfactory trait accuracy
    accuracy: String,
    /// Number of generations the runs were configured for
    generations: String,
    /// Similarity mode for fitness sharing: 0 genotypic, 1 phenotypic
    #[arg(long)]
    similarity: Option<String>,
    /// Look for the multi-valley-crossing variant directories
    #[arg(long)]
    valleys: bool,
    /// Extra path component between the replicate directory and data.csv
    #[arg(long)]
    subpath: Option<String>,
}

impl ExperimentArgs {
    fn experiment(&self) -> Result<Experiment> {
        let selection = Selection::from_id(self.selection)?;
        let similarity = self
            .similarity
            .as_deref()
            .map(Similarity::from_param)
            .transpose()?;
        let exp = Experiment {
            selection,
            similarity,
            diagnostic: Diagnostic::from_id(self.diagnostic)?,
            seed_offset: self.seed_offset,
            treatment: Treatment {
                objectives: self.objectives.clone(),
                accuracy: self.accuracy.clone(),
                generations: self.generations.clone(),
            },
            valleys: self.valleys,
            extra_subpath: self.subpath.clone(),
        };
        // Surface a bad scheme/similarity combination before any work.
        exp.scheme_name()?;
        Ok(exp)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List every replicate that still needs to run
    Check {
        data_dir: PathBuf,
        #[command(flatten)]
        exp: ExperimentArgs,
        #[arg(long)]
        json: bool,
    },
    /// Collect downsampled per-generation time series across replicates
    OverTime {
        data_dir: PathBuf,
        dump_dir: PathBuf,
        #[command(flatten)]
        exp: ExperimentArgs,
        /// Keep every Nth generation
        #[arg(long, default_value_t = 100)]
        resolution: usize,
        #[arg(long)]
        json: bool,
    },
    /// Collect the final-generation snapshot of every finished replicate
    EndOfRun {
        data_dir: PathBuf,
        dump_dir: PathBuf,
        #[command(flatten)]
        exp: ExperimentArgs,
        #[arg(long)]
        json: bool,
    },
    /// Collect each metric's best value and the generation it was reached
    Best {
        data_dir: PathBuf,
        dump_dir: PathBuf,
        #[command(flatten)]
        exp: ExperimentArgs,
        #[arg(long)]
        json: bool,
    },
    /// Collect the first generation each replicate found a full solution
    SolutionFound {
        data_dir: PathBuf,
        dump_dir: PathBuf,
        #[command(flatten)]
        exp: ExperimentArgs,
        #[arg(long)]
        json: bool,
    },
    /// Aggregate a metric's mean and deviation across replicates over time
    PerfAgg {
        data_dir: PathBuf,
        dump_dir: PathBuf,
        #[command(flatten)]
        exp: ExperimentArgs,
        /// Keep every Nth generation
        #[arg(long, default_value_t = 100)]
        resolution: usize,
        /// Metric to aggregate (defaults to pop_fit_avg)
        #[arg(long)]
        metric: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string()));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Check {
            data_dir,
            exp,
            json,
        } => {
            let exp = exp.experiment()?;
            if !json {
                print_experiment(&exp, &data_dir);
            }
            let report = check_runs(&exp, &data_dir)?;
            if json {
                let unfinished = report.unfinished();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "check",
                    "report": report,
                    "unfinished": unfinished,
                })));
            }
            print_check_report(&report);
        }
        Commands::OverTime {
            data_dir,
            dump_dir,
            exp,
            resolution,
            json,
        } => {
            let exp = exp.experiment()?;
            if !json {
                print_experiment(&exp, &data_dir);
            }
            let summary = collect_over_time(&exp, &data_dir, &dump_dir, resolution)?;
            if json {
                return Ok(Some(json_summary("over-time", &summary)));
            }
            print_summary(&summary);
        }
        Commands::EndOfRun {
            data_dir,
            dump_dir,
            exp,
            json,
        } => {
            let exp = exp.experiment()?;
            if !json {
                print_experiment(&exp, &data_dir);
            }
            let summary = collect_end_of_run(&exp, &data_dir, &dump_dir)?;
            if json {
                return Ok(Some(json_summary("end-of-run", &summary)));
            }
            print_summary(&summary);
        }
        Commands::Best {
            data_dir,
            dump_dir,
            exp,
            json,
        } => {
            let exp = exp.experiment()?;
            if !json {
                print_experiment(&exp, &data_dir);
            }
            let summary = collect_best(&exp, &data_dir, &dump_dir)?;
            if json {
                return Ok(Some(json_summary("best", &summary)));
            }
            print_summary(&summary);
        }
        Commands::SolutionFound {
            data_dir,
            dump_dir,
            exp,
            json,
        } => {
            let exp = exp.experiment()?;
            if !json {
                print_experiment(&exp, &data_dir);
            }
            let summary = collect_solution_found(&exp, &data_dir, &dump_dir)?;
            if json {
                return Ok(Some(json_summary("solution-found", &summary)));
            }
            print_summary(&summary);
        }
        Commands::PerfAgg {
            data_dir,
            dump_dir,
            exp,
            resolution,
            metric,
            json,
        } => {
            let exp = exp.experiment()?;
            if !json {
                print_experiment(&exp, &data_dir);
            }
            let summary =
                collect_perf_agg(&exp, &data_dir, &dump_dir, resolution, metric.as_deref())?;
            if json {
                return Ok(Some(json_summary("perf-agg", &summary)));
            }
            print_summary(&summary);
        }
    }
    Ok(None)
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Check { json, .. }
        | Commands::OverTime { json, .. }
        | Commands::EndOfRun { json, .. }
        | Commands::Best { json, .. }
        | Commands::SolutionFound { json, .. }
        | Commands::PerfAgg { json, .. } => *json,
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": { "code": code, "message": message }
    })
}

fn json_summary(command: &str, summary: &CollectSummary) -> Value {
    json!({
        "ok": true,
        "command": command,
        "summary": summary,
    })
}

fn print_experiment(exp: &Experiment, data_dir: &std::path::Path) {
    println!("data_dir: {}", data_dir.display());
    println!("scheme: {}", exp.scheme_name().unwrap_or("?"));
    println!("diagnostic: {}", exp.diagnostic.dir_name());
    println!("treatment: {}", exp.treatment.dir_token());
    println!("seed_offset: {}", exp.seed_offset);
    println!("valleys: {}", exp.valleys);
}

fn print_check_report(report: &CheckReport) {
    println!("complete: {}", report.complete);
    println!("directories missing: {:?}", report.missing_dirs);
    println!("data files missing: {:?}", report.missing_files);
    println!("did not finish: {:?}", report.incomplete);
    let unfinished = report.unfinished();
    if unfinished.is_empty() {
        println!("all runs finished");
    } else {
        let list = unfinished
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        println!("total unfinished runs:");
        println!("{}", list);
    }
}

fn print_summary(summary: &CollectSummary) {
    println!("output: {}", summary.output.display());
    println!("replicates: {}", summary.replicates);
    println!("rows: {}", summary.rows);
    if !summary.skipped.is_empty() {
        println!("skipped seeds: {:?}", summary.skipped);
    }
}
