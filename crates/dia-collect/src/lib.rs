//! Report assembly: walk every expected replicate location, reduce what is
//! there, and write one summary CSV per invocation.
//!
//! Two failure classes are kept strictly apart. Configuration problems
//! (unknown ids, missing base or dump directory, a non-numeric generation
//! count) abort before any replicate is touched. Per-replicate problems
//! (missing directory or file, short table, absent column) are logged by
//! seed, excluded from the aggregate, and surfaced in the final report.

use anyhow::{bail, Context, Result};
use csv::WriterBuilder;
use dia_params::{Experiment, METRIC_COLUMNS, POP_FIT_AVG, POP_OPT_MAX, REPLICATES};
use dia_table::{check_completeness, cross_replicate_mean_std, RunStatus, RunTable, TableError};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

type CsvWriter = csv::Writer<BufWriter<File>>;

fn require_dir(path: &Path, what: &str) -> Result<()> {
    if !path.is_dir() {
        bail!("{} directory does not exist: {}", what, path.display());
    }
    Ok(())
}

fn expected_last_generation(exp: &Experiment) -> Result<u64> {
    exp.treatment
        .generations
        .parse()
        .with_context(|| format!("generation count is not numeric: {}", exp.treatment.generations))
}

/// Output file name: `<report>-<diagnostic>-<scheme>.csv`, lowercased.
fn output_name(report: &str, exp: &Experiment) -> Result<String> {
    Ok(format!(
        "{}-{}-{}.csv",
        report,
        exp.diagnostic.dir_name().to_lowercase(),
        exp.scheme_name()?.to_lowercase()
    ))
}

fn open_writer(dump: &Path, name: &str) -> Result<(CsvWriter, PathBuf)> {
    let path = dump.join(name);
    let file = File::create(&path)
        .with_context(|| format!("cannot create output file: {}", path.display()))?;
    Ok((
        WriterBuilder::new().from_writer(BufWriter::new(file)),
        path,
    ))
}

/// Outcome of a completeness sweep over every expected replicate.
#[derive(Debug, Default, Serialize)]
pub struct CheckReport {
    pub complete: usize,
    pub missing_dirs: Vec<i64>,
    pub missing_files: Vec<i64>,
    pub incomplete: Vec<i64>,
}

impl CheckReport {
    /// Every seed that needs a rerun, sorted ascending across categories.
    pub fn unfinished(&self) -> Vec<i64> {
        let mut all: Vec<i64> = self
            .missing_dirs
            .iter()
            .chain(&self.missing_files)
            .chain(&self.incomplete)
            .copied()
            .collect();
        all.sort_unstable();
        all
    }

    pub fn is_clean(&self) -> bool {
        self.missing_dirs.is_empty() && self.missing_files.is_empty() && self.incomplete.is_empty()
    }
}

/// Classify every replicate location by completeness.
pub fn check_runs(exp: &Experiment, base: &Path) -> Result<CheckReport> {
    require_dir(base, "data")?;
    require_dir(&exp.scheme_dir(base)?, "selection scheme")?;
    let expected = expected_last_generation(exp)?;

    let mut report = CheckReport::default();
    for loc in exp.locations(base)? {
        let status = match check_completeness(&loc.path, expected) {
            Ok(status) => status,
            Err(err) => {
                // A table we cannot even parse needs a rerun just the same.
                warn!(seed = loc.seed, error = %err, "unreadable replicate table");
                RunStatus::Incomplete { last_gen: 0 }
            }
        };
        info!(seed = loc.seed, sweep = loc.sweep_value, ?status, "checked");
        match status {
            RunStatus::Complete => report.complete += 1,
            RunStatus::MissingDir => report.missing_dirs.push(loc.seed),
            RunStatus::MissingFile => report.missing_files.push(loc.seed),
            RunStatus::Incomplete { .. } => report.incomplete.push(loc.seed),
        }
    }
    report.missing_dirs.sort_unstable();
    report.missing_files.sort_unstable();
    report.incomplete.sort_unstable();
    Ok(report)
}

/// What a collector did: where it wrote, how much, and which seeds it had
/// to leave out.
#[derive(Debug, Serialize)]
pub struct CollectSummary {
    pub output: PathBuf,
    pub replicates: usize,
    pub rows: usize,
    pub skipped: Vec<i64>,
}

fn load_table(loc: &dia_params::ReplicateLocation, skipped: &mut Vec<i64>) -> Option<RunTable> {
    if !loc.path.is_file() {
        warn!(seed = loc.seed, path = %loc.path.display(), "replicate file missing");
        skipped.push(loc.seed);
        return None;
    }
    match RunTable::from_path(&loc.path) {
        Ok(table) if table.is_empty() => {
            warn!(seed = loc.seed, "replicate table has no data rows");
            skipped.push(loc.seed);
            None
        }
        Ok(table) => Some(table),
        Err(err) => {
            warn!(seed = loc.seed, error = %err, "replicate table unreadable");
            skipped.push(loc.seed);
            None
        }
    }
}

fn has_all_metrics(table: &RunTable, seed: i64, skipped: &mut Vec<i64>) -> bool {
    for metric in METRIC_COLUMNS {
        if !table.has_column(metric) {
            warn!(seed, metric, "replicate table lacks a required column");
            skipped.push(seed);
            return false;
        }
    }
    true
}

/// Downsampled time series for every replicate: `gen,trt` plus the full
/// metric vocabulary, one row per sampled generation per replicate.
pub fn collect_over_time(
    exp: &Experiment,
    base: &Path,
    dump: &Path,
    stride: usize,
) -> Result<CollectSummary> {
    require_dir(base, "data")?;
    require_dir(dump, "dump")?;
    require_dir(&exp.scheme_dir(base)?, "selection scheme")?;
    if stride == 0 {
        bail!("resolution must be at least 1");
    }

    let (mut writer, output) = open_writer(dump, &output_name("over-time", exp)?)?;
    let mut header = vec!["gen", "trt"];
    header.extend(METRIC_COLUMNS);
    writer.write_record(&header)?;

    let mut skipped = Vec::new();
    let mut replicates = 0usize;
    let mut rows = 0usize;
    for loc in exp.locations(base)? {
        let Some(table) = load_table(&loc, &mut skipped) else {
            continue;
        };
        if !has_all_metrics(&table, loc.seed, &mut skipped) {
            continue;
        }
        let sampled = table.downsample(stride)?;
        for row in 0..sampled.len() {
            let mut record = vec![sampled.generation(row)?.to_string(), loc.sweep_value.to_string()];
            for metric in METRIC_COLUMNS {
                record.push(sampled.value(row, metric)?.to_string());
            }
            writer.write_record(&record)?;
            rows += 1;
        }
        replicates += 1;
        info!(seed = loc.seed, sweep = loc.sweep_value, "collected time series");
    }
    writer.flush()?;
    Ok(CollectSummary {
        output,
        replicates,
        rows,
        skipped,
    })
}

/// Final-generation snapshot per replicate. Replicates that never reached
/// the expected final generation are logged and left out.
pub fn collect_end_of_run(exp: &Experiment, base: &Path, dump: &Path) -> Result<CollectSummary> {
    require_dir(base, "data")?;
    require_dir(dump, "dump")?;
    require_dir(&exp.scheme_dir(base)?, "selection scheme")?;
    let expected = expected_last_generation(exp)?;

    let (mut writer, output) = open_writer(dump, &output_name("eor", exp)?)?;
    let mut header = vec!["trt"];
    header.extend(METRIC_COLUMNS);
    writer.write_record(&header)?;

    let mut skipped = Vec::new();
    let mut replicates = 0usize;
    for loc in exp.locations(base)? {
        let Some(table) = load_table(&loc, &mut skipped) else {
            continue;
        };
        if !has_all_metrics(&table, loc.seed, &mut skipped) {
            continue;
        }
        let last = table.last_row()?;
        if last.generation()? != expected {
            warn!(seed = loc.seed, last_gen = last.generation()?, "run did not finish");
            skipped.push(loc.seed);
            continue;
        }
        let mut record = vec![loc.sweep_value.to_string()];
        for metric in METRIC_COLUMNS {
            record.push(last.get(metric)?.to_string());
        }
        writer.write_record(&record)?;
        replicates += 1;
    }
    writer.flush()?;
    Ok(CollectSummary {
        output,
        replicates,
        rows: replicates,
        skipped,
    })
}

/// Best value ever reached per metric per replicate, with the generation it
/// was first reached at: `trt,val,gen,col`. Metrics are visited in fixed
/// vocabulary order so the report layout never shifts between runs.
pub fn collect_best(exp: &Experiment, base: &Path, dump: &Path) -> Result<CollectSummary> {
    require_dir(base, "data")?;
    require_dir(dump, "dump")?;
    require_dir(&exp.scheme_dir(base)?, "selection scheme")?;

    let (mut writer, output) = open_writer(dump, &output_name("best", exp)?)?;
    writer.write_record(["trt", "val", "gen", "col"])?;

    let mut skipped = Vec::new();
    let mut replicates = 0usize;
    let mut rows = 0usize;
    for loc in exp.locations(base)? {
        let Some(table) = load_table(&loc, &mut skipped) else {
            continue;
        };
        if !has_all_metrics(&table, loc.seed, &mut skipped) {
            continue;
        }
        for metric in METRIC_COLUMNS {
            let (value, generation) = table.column_max(metric)?;
            writer.write_record([
                loc.sweep_value.to_string(),
                value.to_string(),
                generation.to_string(),
                metric.to_string(),
            ])?;
            rows += 1;
        }
        replicates += 1;
    }
    writer.flush()?;
    Ok(CollectSummary {
        output,
        replicates,
        rows,
        skipped,
    })
}

/// First generation at which each replicate hit a full optimal-trait count
/// (`pop_opt_max` equal to the objective count). One column per sweep
/// value; replicates that never got there contribute nothing, and shorter
/// columns are padded with empty cells.
pub fn collect_solution_found(exp: &Experiment, base: &Path, dump: &Path) -> Result<CollectSummary> {
    require_dir(base, "data")?;
    require_dir(dump, "dump")?;
    require_dir(&exp.scheme_dir(base)?, "selection scheme")?;
    let threshold: f64 = exp
        .treatment
        .objectives
        .parse()
        .with_context(|| format!("objective count is not numeric: {}", exp.treatment.objectives))?;

    let values = exp.selection.sweep_values();
    let mut columns: Vec<Vec<u64>> = vec![Vec::new(); values.len()];
    let mut skipped = Vec::new();
    let mut replicates = 0usize;
    for (i, loc) in exp.locations(base)?.into_iter().enumerate() {
        let Some(table) = load_table(&loc, &mut skipped) else {
            continue;
        };
        // Locations come out in seed order, one contiguous block per value.
        let block = i / REPLICATES;
        // Unsorted qualifying generations mean the producer wrote garbage;
        // that is corruption, not a rerun candidate, and it aborts.
        match table.first_generation_at(POP_OPT_MAX, threshold) {
            Ok(Some(generation)) => {
                columns[block].push(generation);
                replicates += 1;
            }
            Ok(None) => replicates += 1,
            Err(TableError::MissingColumn(column)) => {
                warn!(seed = loc.seed, %column, "replicate table lacks a required column");
                skipped.push(loc.seed);
            }
            Err(err) => return Err(err.into()),
        }
    }

    let (mut writer, output) = open_writer(dump, &output_name("ssf", exp)?)?;
    writer.write_record(values)?;
    let depth = columns.iter().map(Vec::len).max().unwrap_or(0);
    for row in 0..depth {
        let record: Vec<String> = columns
            .iter()
            .map(|col| col.get(row).map(u64::to_string).unwrap_or_default())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(CollectSummary {
        output,
        replicates,
        rows: depth,
        skipped,
    })
}

/// Cross-replicate mean and population standard deviation of one metric at
/// every sampled generation, per sweep value: `gen,agg,dev,trt`.
pub fn collect_perf_agg(
    exp: &Experiment,
    base: &Path,
    dump: &Path,
    stride: usize,
    metric: Option<&str>,
) -> Result<CollectSummary> {
    require_dir(base, "data")?;
    require_dir(dump, "dump")?;
    require_dir(&exp.scheme_dir(base)?, "selection scheme")?;
    if stride == 0 {
        bail!("resolution must be at least 1");
    }
    let metric = metric.unwrap_or(POP_FIT_AVG);

    let (mut writer, output) = open_writer(dump, &output_name("agg", exp)?)?;
    writer.write_record(["gen", "agg", "dev", "trt"])?;

    let values = exp.selection.sweep_values();
    let partition = exp.selection.seed_partition();
    let mut skipped = Vec::new();
    let mut replicates = 0usize;
    let mut rows = 0usize;
    for (block, seeds) in partition.iter().enumerate() {
        let sweep_value = values[block];
        let mut tables = Vec::with_capacity(seeds.len());
        for &s in seeds {
            let seed = s as i64 + exp.seed_offset;
            let loc = dia_params::ReplicateLocation {
                sweep_value,
                seed,
                path: exp.data_file(base, sweep_value, seed)?,
            };
            match load_table(&loc, &mut skipped) {
                Some(table) if !table.has_column(metric) => {
                    warn!(seed, metric, "replicate table lacks the aggregated column");
                    skipped.push(seed);
                }
                Some(table) => tables.push(table),
                None => {}
            }
        }
        if tables.is_empty() {
            warn!(sweep = sweep_value, "no usable replicates for sweep value");
            continue;
        }
        replicates += tables.len();
        // Length disagreement between replicates is corrupt input, not a
        // skippable replicate; it aborts rather than silently truncating.
        let points = cross_replicate_mean_std(&tables, metric, stride)?;
        for point in &points {
            writer.write_record([
                point.generation.to_string(),
                point.mean.to_string(),
                point.std_dev.to_string(),
                sweep_value.to_string(),
            ])?;
        }
        rows += points.len();
        info!(sweep = sweep_value, loaded = tables.len(), "aggregated sweep value");
    }
    writer.flush()?;
    Ok(CollectSummary {
        output,
        replicates,
        rows,
        skipped,
    })
}
