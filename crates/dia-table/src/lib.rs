//! Per-run table parsing and the reductions applied to it.
//!
//! A replicate's `data.csv` has one row per recorded generation: a `gen`
//! index column plus a fixed vocabulary of numeric metrics. Extra columns
//! are ignored; a missing required column is reported, never coerced.
//! Every operation here is a pure function of its inputs.

use csv::ReaderBuilder;
use dia_params::GENERATION;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("table has no data rows")]
    EmptyTable,
    #[error("required column missing: {0}")]
    MissingColumn(String),
    #[error("row {row}, column {column}: '{value}' is not numeric")]
    BadValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error("generation order violated: {generation} after {previous}")]
    UnsortedGenerations { previous: u64, generation: u64 },
    #[error("replicate tables disagree on row count: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("replicate tables disagree on generation at sampled row {row}")]
    GenerationMismatch { row: usize },
    #[error("stride must be at least 1")]
    ZeroStride,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Completeness classification of one replicate location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    MissingDir,
    MissingFile,
    Incomplete { last_gen: u64 },
    Complete,
}

/// Parsed per-generation table for one replicate.
#[derive(Debug, Clone)]
pub struct RunTable {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    gen_idx: Option<usize>,
    rows: Vec<Vec<f64>>,
}

impl RunTable {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TableError> {
        let mut rdr = ReaderBuilder::new().from_reader(reader);
        let columns: Vec<String> = rdr.headers()?.iter().map(String::from).collect();
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            index.insert(name.clone(), i);
        }
        let gen_idx = index.get(GENERATION).copied();

        let mut rows = Vec::new();
        for (row_no, record) in rdr.records().enumerate() {
            let record = record?;
            let mut row = Vec::with_capacity(columns.len());
            for (i, field) in record.iter().enumerate() {
                let v: f64 = field.trim().parse().map_err(|_| TableError::BadValue {
                    row: row_no,
                    column: columns.get(i).cloned().unwrap_or_default(),
                    value: field.to_string(),
                })?;
                row.push(v);
            }
            rows.push(row);
        }
        Ok(RunTable {
            columns,
            index,
            gen_idx,
            rows,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, TableError> {
        let file = fs::File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn col(&self, name: &str) -> Result<usize, TableError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    fn gen_col(&self) -> Result<usize, TableError> {
        self.gen_idx
            .ok_or_else(|| TableError::MissingColumn(GENERATION.to_string()))
    }

    /// Generation index of a row.
    pub fn generation(&self, row: usize) -> Result<u64, TableError> {
        Ok(self.rows[row][self.gen_col()?] as u64)
    }

    pub fn value(&self, row: usize, column: &str) -> Result<f64, TableError> {
        Ok(self.rows[row][self.col(column)?])
    }

    /// Generation index recorded in the final row.
    pub fn last_generation(&self) -> Result<u64, TableError> {
        if self.rows.is_empty() {
            return Err(TableError::EmptyTable);
        }
        self.generation(self.rows.len() - 1)
    }

    /// View of the final row. Fails on a table with no data rows.
    pub fn last_row(&self) -> Result<Row<'_>, TableError> {
        if self.rows.is_empty() {
            return Err(TableError::EmptyTable);
        }
        Ok(Row {
            table: self,
            row: self.rows.len() - 1,
        })
    }

    pub fn row(&self, row: usize) -> Row<'_> {
        Row { table: self, row }
    }

    /// Maximum of a column together with the generation it was first reached
    /// at. Ties break to the earliest generation so reports are reproducible.
    pub fn column_max(&self, column: &str) -> Result<(f64, u64), TableError> {
        let c = self.col(column)?;
        let g = self.gen_col()?;
        if self.rows.is_empty() {
            return Err(TableError::EmptyTable);
        }
        let mut best = self.rows[0][c];
        let mut best_gen = self.rows[0][g] as u64;
        for row in &self.rows[1..] {
            if row[c] > best {
                best = row[c];
                best_gen = row[g] as u64;
            }
        }
        Ok((best, best_gen))
    }

    /// First generation at which `column` equals `threshold` exactly, or
    /// `None` if it never does. The qualifying generations must come out
    /// non-decreasing in table order; anything else means the producing run
    /// wrote a corrupt table and is reported as such.
    pub fn first_generation_at(
        &self,
        column: &str,
        threshold: f64,
    ) -> Result<Option<u64>, TableError> {
        let c = self.col(column)?;
        let g = self.gen_col()?;
        let mut first: Option<u64> = None;
        let mut previous: Option<u64> = None;
        for row in &self.rows {
            if row[c] != threshold {
                continue;
            }
            let gen = row[g] as u64;
            if let Some(prev) = previous {
                if gen < prev {
                    return Err(TableError::UnsortedGenerations {
                        previous: prev,
                        generation: gen,
                    });
                }
            }
            previous = Some(gen);
            if first.is_none() {
                first = Some(gen);
            }
        }
        Ok(first)
    }

    /// Keep every `stride`-th row starting at row 0.
    pub fn downsample(&self, stride: usize) -> Result<RunTable, TableError> {
        if stride == 0 {
            return Err(TableError::ZeroStride);
        }
        Ok(RunTable {
            columns: self.columns.clone(),
            index: self.index.clone(),
            gen_idx: self.gen_idx,
            rows: self.rows.iter().step_by(stride).cloned().collect(),
        })
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a RunTable,
    row: usize,
}

impl Row<'_> {
    pub fn generation(&self) -> Result<u64, TableError> {
        self.table.generation(self.row)
    }

    pub fn get(&self, column: &str) -> Result<f64, TableError> {
        self.table.value(self.row, column)
    }
}

/// Classify one replicate location against the expected final generation.
///
/// An empty or header-only file is an incomplete run (generation count 0),
/// not an error: the producing job was killed before writing anything.
pub fn check_completeness(path: &Path, expected_last_gen: u64) -> Result<RunStatus, TableError> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    if !dir.is_dir() {
        return Ok(RunStatus::MissingDir);
    }
    if !path.is_file() {
        return Ok(RunStatus::MissingFile);
    }
    if fs::metadata(path)?.len() == 0 {
        return Ok(RunStatus::Incomplete { last_gen: 0 });
    }
    let table = RunTable::from_path(path)?;
    if table.is_empty() {
        return Ok(RunStatus::Incomplete { last_gen: 0 });
    }
    let last_gen = table.last_generation()?;
    if last_gen == expected_last_gen {
        Ok(RunStatus::Complete)
    } else {
        Ok(RunStatus::Incomplete { last_gen })
    }
}

/// One sampled generation of a cross-replicate aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeanStdPoint {
    pub generation: u64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Mean and population standard deviation of `column` across replicates at
/// every `stride`-th generation. All tables must agree on row count and
/// generation indexing after striding; a mismatch is a hard error rather
/// than a silent truncation.
pub fn cross_replicate_mean_std(
    tables: &[RunTable],
    column: &str,
    stride: usize,
) -> Result<Vec<MeanStdPoint>, TableError> {
    if tables.is_empty() {
        return Err(TableError::EmptyTable);
    }
    let sampled: Vec<RunTable> = tables
        .iter()
        .map(|t| t.downsample(stride))
        .collect::<Result<_, _>>()?;

    let expected = sampled[0].len();
    for t in &sampled[1..] {
        if t.len() != expected {
            return Err(TableError::LengthMismatch {
                expected,
                found: t.len(),
            });
        }
    }

    let n = sampled.len() as f64;
    let mut out = Vec::with_capacity(expected);
    for row in 0..expected {
        let generation = sampled[0].generation(row)?;
        for t in &sampled[1..] {
            if t.generation(row)? != generation {
                return Err(TableError::GenerationMismatch { row });
            }
        }
        let mut sum = 0.0;
        for t in &sampled {
            sum += t.value(row, column)?;
        }
        let mean = sum / n;
        let mut sq = 0.0;
        for t in &sampled {
            let d = t.value(row, column)? - mean;
            sq += d * d;
        }
        out.push(MeanStdPoint {
            generation,
            mean,
            std_dev: (sq / n).sqrt(),
        });
    }
    Ok(out)
}
