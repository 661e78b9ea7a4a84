//! Naming and addressing scheme for diagnostic experiment results.
//!
//! Every run of the upstream experiment writes its per-generation table to a
//! directory derived from (selection scheme, diagnostic, sweep value, seed).
//! This crate owns that derivation: the scheme/diagnostic vocabulary, the
//! sweep-value lists, the 50-seed-per-value partition, and the directory
//! template shared with the job-submission side. The template is a contract
//! and must be reproduced exactly, double underscores included.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Replicates run per sweep value.
pub const REPLICATES: usize = 50;

/// File each replicate writes its per-generation table to.
pub const DATA_FILE: &str = "data.csv";

/// Generation index column.
pub const GENERATION: &str = "gen";

// Population-level metrics.
pub const POP_FIT_AVG: &str = "pop_fit_avg";
pub const POP_FIT_MAX: &str = "pop_fit_max";
pub const POP_OPT_AVG: &str = "pop_opt_avg";
pub const POP_OPT_MAX: &str = "pop_opt_max";
pub const POP_UNI_OBJ: &str = "pop_uni_obj";
pub const POP_STR_AVG: &str = "pop_str_avg";
pub const POP_STR_MAX: &str = "pop_str_max";
// Elite solution metrics.
pub const ELE_AGG_PER: &str = "ele_agg_per";
pub const ELE_OPT_CNT: &str = "ele_opt_cnt";
// Trait coverage.
pub const UNI_STR_POS: &str = "uni_str_pos";
// Pareto front.
pub const PARETO_CNT: &str = "pareto_cnt";
// Novelty archive.
pub const ARCHIVE_CNT: &str = "archive_cnt";
pub const PMIN: &str = "pmin";
pub const ARC_ACTI_GENE: &str = "arc_acti_gene";
pub const OVERLAP: &str = "overlap";

/// Closed metric vocabulary, in report column order. Reports iterate this
/// list rather than whatever order a file's header happens to use, so output
/// layout is stable across runs.
pub const METRIC_COLUMNS: [&str; 15] = [
    POP_FIT_AVG,
    POP_FIT_MAX,
    POP_OPT_AVG,
    POP_OPT_MAX,
    POP_UNI_OBJ,
    POP_STR_AVG,
    POP_STR_MAX,
    ELE_AGG_PER,
    ELE_OPT_CNT,
    ARC_ACTI_GENE,
    OVERLAP,
    ARCHIVE_CNT,
    UNI_STR_POS,
    PMIN,
    PARETO_CNT,
];

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("unknown selection scheme id: {0}")]
    UnknownSelection(i64),
    #[error("unknown diagnostic id: {0}")]
    UnknownDiagnostic(i64),
    #[error("unknown similarity parameter '{0}': expected 0 (genotypic) or 1 (phenotypic)")]
    UnknownSimilarity(String),
    #[error("fitness sharing requires a similarity parameter")]
    MissingSimilarity,
}

/// Similarity mode for fitness sharing; selects between the two sharing
/// directory names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    Genotypic,
    Phenotypic,
}

impl Similarity {
    pub fn from_param(param: &str) -> Result<Self, ParamError> {
        match param {
            "0" => Ok(Similarity::Genotypic),
            "1" => Ok(Similarity::Phenotypic),
            other => Err(ParamError::UnknownSimilarity(other.to_string())),
        }
    }
}

/// Parent-selection scheme of a run. The integer ids match the CLI surface
/// of the job-submission scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Truncation,
    Tournament,
    FitnessSharing,
    Lexicase,
    NondominatedSorting,
    Novelty,
}

const TR_LIST: [&str; 9] = ["1", "2", "4", "8", "16", "32", "64", "128", "256"];
const TS_LIST: [&str; 9] = ["1", "2", "4", "8", "16", "32", "64", "128", "256"];
const FS_LIST: [&str; 7] = ["0.0", "0.1", "0.3", "0.6", "1.2", "2.5", "5.0"];
const LX_LIST: [&str; 1] = ["0.0"];
const NS_LIST: [&str; 7] = ["0", "1", "2", "4", "8", "15", "30"];

impl Selection {
    pub fn from_id(id: i64) -> Result<Self, ParamError> {
        match id {
            0 => Ok(Selection::Truncation),
            1 => Ok(Selection::Tournament),
            2 => Ok(Selection::FitnessSharing),
            3 => Ok(Selection::Lexicase),
            4 => Ok(Selection::NondominatedSorting),
            5 => Ok(Selection::Novelty),
            other => Err(ParamError::UnknownSelection(other)),
        }
    }

    /// Directory-name token for this scheme. Fitness sharing splits on
    /// similarity mode; every other scheme ignores it.
    pub fn dir_name(self, similarity: Option<Similarity>) -> Result<&'static str, ParamError> {
        match self {
            Selection::Truncation => Ok("TRUNCATION"),
            Selection::Tournament => Ok("TOURNAMENT"),
            Selection::FitnessSharing => match similarity {
                Some(Similarity::Genotypic) => Ok("FITSHARING_G"),
                Some(Similarity::Phenotypic) => Ok("FITSHARING_P"),
                None => Err(ParamError::MissingSimilarity),
            },
            Selection::Lexicase => Ok("LEXICASE"),
            Selection::NondominatedSorting => Ok("NONDOMINATEDSORTING"),
            Selection::Novelty => Ok("NOVELTY"),
        }
    }

    /// Token naming the swept variable inside replicate directory names.
    pub fn var_token(self) -> &'static str {
        match self {
            Selection::Truncation => "TR",
            Selection::Tournament => "T",
            Selection::FitnessSharing => "SIG",
            Selection::Lexicase => "EPS",
            Selection::NondominatedSorting => "SIG",
            Selection::Novelty => "NOV",
        }
    }

    /// Values the swept variable takes, in seed-block order.
    pub fn sweep_values(self) -> &'static [&'static str] {
        match self {
            Selection::Truncation => &TR_LIST,
            Selection::Tournament => &TS_LIST,
            Selection::FitnessSharing => &FS_LIST,
            Selection::Lexicase => &LX_LIST,
            Selection::NondominatedSorting => &FS_LIST,
            Selection::Novelty => &NS_LIST,
        }
    }

    /// Full seed range for this scheme, before any offset is applied.
    /// One contiguous block of [`REPLICATES`] seeds per sweep value.
    pub fn seeds(self) -> impl Iterator<Item = u32> {
        1..=(self.sweep_values().len() * REPLICATES) as u32
    }

    /// Seeds partitioned into one block per sweep value.
    pub fn seed_partition(self) -> Vec<Vec<u32>> {
        self.sweep_values()
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let start = (i * REPLICATES) as u32 + 1;
                (start..start + REPLICATES as u32).collect()
            })
            .collect()
    }
}

/// Synthetic test landscape a run was evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnostic {
    ExploitationRate,
    OrderedExploitation,
    ContradictoryObjectives,
    MultipathExploration,
}

impl Diagnostic {
    pub fn from_id(id: i64) -> Result<Self, ParamError> {
        match id {
            0 => Ok(Diagnostic::ExploitationRate),
            1 => Ok(Diagnostic::OrderedExploitation),
            2 => Ok(Diagnostic::ContradictoryObjectives),
            3 => Ok(Diagnostic::MultipathExploration),
            other => Err(ParamError::UnknownDiagnostic(other)),
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Diagnostic::ExploitationRate => "EXPLOITATION_RATE",
            Diagnostic::OrderedExploitation => "ORDERED_EXPLOITATION",
            Diagnostic::ContradictoryObjectives => "CONTRADICTORY_OBJECTIVES",
            Diagnostic::MultipathExploration => "MULTIPATH_EXPLORATION",
        }
    }
}

/// Treatment-level parameters baked into the second directory layer.
/// Kept as the literal strings the run producer was invoked with, since the
/// directory name must match byte for byte.
#[derive(Debug, Clone)]
pub struct Treatment {
    pub objectives: String,
    pub accuracy: String,
    pub generations: String,
}

impl Treatment {
    pub fn dir_token(&self) -> String {
        format!(
            "TRT_{}__ACC_{}__GEN_{}",
            self.objectives, self.accuracy, self.generations
        )
    }
}

/// One expected replicate result location. Derived, never mutated.
#[derive(Debug, Clone)]
pub struct ReplicateLocation {
    pub sweep_value: &'static str,
    pub seed: i64,
    pub path: PathBuf,
}

/// Immutable descriptor of one experiment batch. Built once per invocation
/// from CLI parameters; everything else is derived from it.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub selection: Selection,
    pub similarity: Option<Similarity>,
    pub diagnostic: Diagnostic,
    pub seed_offset: i64,
    pub treatment: Treatment,
    /// Multi-valley-crossing variant: replicate dirs carry a `__MVC` suffix.
    pub valleys: bool,
    /// Extra path component between the replicate dir and `data.csv`.
    pub extra_subpath: Option<String>,
}

impl Experiment {
    pub fn scheme_name(&self) -> Result<&'static str, ParamError> {
        self.selection.dir_name(self.similarity)
    }

    /// `<base>/<SCHEME>/TRT_<obj>__ACC_<acc>__GEN_<gens>/`
    pub fn scheme_dir(&self, base: &Path) -> Result<PathBuf, ParamError> {
        Ok(base
            .join(self.scheme_name()?)
            .join(self.treatment.dir_token()))
    }

    /// Replicate directory name: `DIA_<DIAGNOSTIC>__<VAR>_<value>__SEED_<seed>`
    /// plus the `__MVC` suffix for the valleys variant.
    pub fn replicate_dir_name(&self, sweep_value: &str, seed: i64) -> String {
        let mut name = format!(
            "DIA_{}__{}_{}__SEED_{}",
            self.diagnostic.dir_name(),
            self.selection.var_token(),
            sweep_value,
            seed
        );
        if self.valleys {
            name.push_str("__MVC");
        }
        name
    }

    /// Full path to one replicate's `data.csv`.
    pub fn data_file(&self, base: &Path, sweep_value: &str, seed: i64) -> Result<PathBuf, ParamError> {
        let mut dir = self
            .scheme_dir(base)?
            .join(self.replicate_dir_name(sweep_value, seed));
        if let Some(extra) = &self.extra_subpath {
            dir = dir.join(extra);
        }
        Ok(dir.join(DATA_FILE))
    }

    /// All expected replicate locations, ascending by seed. The sweep value
    /// for seed `s` is the one owning the block `(s - 1) / REPLICATES`.
    pub fn locations(&self, base: &Path) -> Result<Vec<ReplicateLocation>, ParamError> {
        let values = self.selection.sweep_values();
        let mut out = Vec::with_capacity(values.len() * REPLICATES);
        for s in self.selection.seeds() {
            let sweep_value = values[(s as usize - 1) / REPLICATES];
            let seed = s as i64 + self.seed_offset;
            out.push(ReplicateLocation {
                sweep_value,
                seed,
                path: self.data_file(base, sweep_value, seed)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment(selection: Selection, valleys: bool) -> Experiment {
        Experiment {
            selection,
            similarity: None,
            diagnostic: Diagnostic::MultipathExploration,
            seed_offset: 0,
            treatment: Treatment {
                objectives: "100".to_string(),
                accuracy: "99".to_string(),
                generations: "50000".to_string(),
            },
            valleys,
            extra_subpath: None,
        }
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert!(matches!(
            Selection::from_id(6),
            Err(ParamError::UnknownSelection(6))
        ));
        assert!(matches!(
            Selection::from_id(-1),
            Err(ParamError::UnknownSelection(-1))
        ));
        assert!(matches!(
            Diagnostic::from_id(4),
            Err(ParamError::UnknownDiagnostic(4))
        ));
        assert!(matches!(
            Similarity::from_param("2"),
            Err(ParamError::UnknownSimilarity(_))
        ));
    }

    #[test]
    fn fitness_sharing_needs_similarity() {
        assert!(matches!(
            Selection::FitnessSharing.dir_name(None),
            Err(ParamError::MissingSimilarity)
        ));
        assert_eq!(
            Selection::FitnessSharing
                .dir_name(Some(Similarity::Genotypic))
                .unwrap(),
            "FITSHARING_G"
        );
        assert_eq!(
            Selection::FitnessSharing
                .dir_name(Some(Similarity::Phenotypic))
                .unwrap(),
            "FITSHARING_P"
        );
        // Other schemes ignore the parameter.
        assert_eq!(
            Selection::Tournament
                .dir_name(Some(Similarity::Genotypic))
                .unwrap(),
            "TOURNAMENT"
        );
    }

    #[test]
    fn partition_matches_sweep_values() {
        for id in 0..6 {
            let sel = Selection::from_id(id).unwrap();
            let values = sel.sweep_values();
            let partition = sel.seed_partition();
            assert_eq!(values.len(), partition.len());
            for block in &partition {
                assert_eq!(block.len(), REPLICATES);
            }
            assert_eq!(sel.seeds().count(), values.len() * REPLICATES);
        }
    }

    #[test]
    fn seeds_map_to_their_block_sweep_value() {
        for id in 0..6 {
            let sel = Selection::from_id(id).unwrap();
            let exp = Experiment {
                similarity: if sel == Selection::FitnessSharing {
                    Some(Similarity::Phenotypic)
                } else {
                    None
                },
                ..experiment(sel, false)
            };
            let values = sel.sweep_values();
            for (i, block) in sel.seed_partition().iter().enumerate() {
                for &s in block {
                    let path = exp.data_file(Path::new("/data"), values[i], s as i64).unwrap();
                    let token = format!("_{}_{}__SEED_", sel.var_token(), values[i]);
                    assert!(path.to_string_lossy().contains(&token));
                }
            }
        }
    }

    #[test]
    fn path_template_is_exact() {
        let exp = experiment(Selection::Tournament, false);
        let path = exp.data_file(Path::new("/data"), "4", 103).unwrap();
        assert_eq!(
            path,
            PathBuf::from(
                "/data/TOURNAMENT/TRT_100__ACC_99__GEN_50000/\
                 DIA_MULTIPATH_EXPLORATION__T_4__SEED_103/data.csv"
            )
        );
    }

    #[test]
    fn valleys_variant_appends_mvc_suffix() {
        let exp = experiment(Selection::Novelty, true);
        let path = exp.data_file(Path::new("/data"), "8", 201).unwrap();
        assert!(path
            .to_string_lossy()
            .ends_with("DIA_MULTIPATH_EXPLORATION__NOV_8__SEED_201__MVC/data.csv"));
    }

    #[test]
    fn extra_subpath_sits_between_dir_and_file() {
        let mut exp = experiment(Selection::Truncation, false);
        exp.extra_subpath = Some("phase-2".to_string());
        let path = exp.data_file(Path::new("/data"), "1", 1).unwrap();
        assert!(path
            .to_string_lossy()
            .ends_with("DIA_MULTIPATH_EXPLORATION__TR_1__SEED_1/phase-2/data.csv"));
    }

    #[test]
    fn locations_are_ascending_by_seed_and_offset_applied() {
        let mut exp = experiment(Selection::Lexicase, false);
        exp.seed_offset = 1000;
        let locs = exp.locations(Path::new("/data")).unwrap();
        assert_eq!(locs.len(), REPLICATES);
        assert_eq!(locs[0].seed, 1001);
        assert_eq!(locs[49].seed, 1050);
        assert!(locs.windows(2).all(|w| w[0].seed < w[1].seed));
        assert!(locs.iter().all(|l| l.sweep_value == "0.0"));
    }
}
