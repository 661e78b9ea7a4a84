//! End-to-end collector tests over a synthetic result tree.

use dia_collect::{
    check_runs, collect_best, collect_end_of_run, collect_over_time, collect_perf_agg,
    collect_solution_found,
};
use dia_params::{
    Diagnostic, Experiment, Selection, Treatment, METRIC_COLUMNS, POP_FIT_AVG, POP_OPT_MAX,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Lexicase keeps the tree small: one sweep value ("0.0"), 50 seeds.
fn lexicase() -> Experiment {
    Experiment {
        selection: Selection::Lexicase,
        similarity: None,
        diagnostic: Diagnostic::MultipathExploration,
        seed_offset: 0,
        treatment: Treatment {
            objectives: "100".to_string(),
            accuracy: "99".to_string(),
            generations: "9".to_string(),
        },
        valleys: false,
        extra_subpath: None,
    }
}

/// Writes a replicate table with `rows` generations starting at 0.
/// `pop_fit_avg` tracks the generation, `pop_opt_max` jumps to 100 at
/// `solved_at`, everything else is half the generation.
fn write_data_csv(path: &Path, rows: u64, solved_at: Option<u64>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut out = String::from("gen");
    for metric in METRIC_COLUMNS {
        out.push(',');
        out.push_str(metric);
    }
    out.push('\n');
    for gen in 0..rows {
        out.push_str(&gen.to_string());
        for metric in METRIC_COLUMNS {
            let v = if metric == POP_OPT_MAX {
                match solved_at {
                    Some(at) if gen >= at => 100.0,
                    _ => 0.0,
                }
            } else if metric == POP_FIT_AVG {
                gen as f64
            } else {
                gen as f64 * 0.5
            };
            out.push(',');
            out.push_str(&v.to_string());
        }
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

/// Full tree: every seed complete, seeds 1-5 reach the optimum at
/// generation = seed.
fn build_clean_tree(exp: &Experiment, base: &Path) {
    for loc in exp.locations(base).unwrap() {
        let solved = (1..=5).contains(&loc.seed).then_some(loc.seed as u64);
        write_data_csv(&loc.path, 10, solved);
    }
}

/// Clean tree with three defects: seed 7 has no directory, seed 13 has a
/// directory but no data file, seed 21 stopped after generation 3.
fn build_dirty_tree(exp: &Experiment, base: &Path) {
    for loc in exp.locations(base).unwrap() {
        match loc.seed {
            7 => {}
            13 => fs::create_dir_all(loc.path.parent().unwrap()).unwrap(),
            21 => write_data_csv(&loc.path, 4, None),
            _ => write_data_csv(&loc.path, 10, None),
        }
    }
}

#[test]
fn check_runs_reports_each_problem_category_sorted() {
    let root = TempDir::new().unwrap();
    let exp = lexicase();
    build_dirty_tree(&exp, root.path());

    let report = check_runs(&exp, root.path()).unwrap();
    assert_eq!(report.complete, 47);
    assert_eq!(report.missing_dirs, vec![7]);
    assert_eq!(report.missing_files, vec![13]);
    assert_eq!(report.incomplete, vec![21]);
    assert_eq!(report.unfinished(), vec![7, 13, 21]);
    assert!(!report.is_clean());
}

#[test]
fn check_runs_needs_the_scheme_directory() {
    let root = TempDir::new().unwrap();
    let exp = lexicase();
    // Base exists but nothing under it.
    assert!(check_runs(&exp, root.path()).is_err());
    assert!(check_runs(&exp, &root.path().join("nope")).is_err());
}

#[test]
fn end_of_run_keeps_only_finished_replicates() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_dirty_tree(&exp, root.path());

    let summary = collect_end_of_run(&exp, root.path(), dump.path()).unwrap();
    assert_eq!(summary.replicates, 47);
    assert_eq!(summary.skipped, vec![7, 13, 21]);
    assert_eq!(
        summary.output,
        dump.path().join("eor-multipath_exploration-lexicase.csv")
    );

    let text = fs::read_to_string(&summary.output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 48);
    assert!(lines[0].starts_with("trt,pop_fit_avg,pop_fit_max"));
    // Every kept row snapshots generation 9: trt, then pop_fit_avg = 9.
    assert!(lines[1].starts_with("0.0,9,4.5"));
}

#[test]
fn over_time_downsamples_each_replicate() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_clean_tree(&exp, root.path());

    let summary = collect_over_time(&exp, root.path(), dump.path(), 3).unwrap();
    assert_eq!(summary.replicates, 50);
    // Generations 0, 3, 6, 9 survive the stride.
    assert_eq!(summary.rows, 50 * 4);

    let text = fs::read_to_string(&summary.output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("gen,trt,pop_fit_avg"));
    assert!(lines[1].starts_with("0,0.0,0"));
    assert!(lines[2].starts_with("3,0.0,3"));
    assert!(lines[4].starts_with("9,0.0,9"));
}

#[test]
fn best_emits_one_row_per_metric_in_fixed_order() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_clean_tree(&exp, root.path());

    let summary = collect_best(&exp, root.path(), dump.path()).unwrap();
    assert_eq!(summary.replicates, 50);
    assert_eq!(summary.rows, 50 * METRIC_COLUMNS.len());

    let text = fs::read_to_string(&summary.output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "trt,val,gen,col");
    // pop_fit_avg peaks at its final generation.
    assert_eq!(lines[1], "0.0,9,9,pop_fit_avg");
    assert_eq!(lines[2], "0.0,4.5,9,pop_fit_max");
}

#[test]
fn solution_found_records_first_qualifying_generation() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_clean_tree(&exp, root.path());

    let summary = collect_solution_found(&exp, root.path(), dump.path()).unwrap();
    assert_eq!(summary.replicates, 50);
    assert_eq!(summary.rows, 5);
    assert_eq!(
        summary.output,
        dump.path().join("ssf-multipath_exploration-lexicase.csv")
    );

    let text = fs::read_to_string(&summary.output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "0.0");
    assert_eq!(&lines[1..], ["1", "2", "3", "4", "5"]);
}

#[test]
fn perf_agg_means_and_deviations_per_sampled_generation() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_clean_tree(&exp, root.path());

    let summary = collect_perf_agg(&exp, root.path(), dump.path(), 1, None).unwrap();
    assert_eq!(summary.replicates, 50);
    assert_eq!(summary.rows, 10);

    let text = fs::read_to_string(&summary.output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "gen,agg,dev,trt");
    // All replicates share pop_fit_avg = gen, so the deviation is zero.
    assert_eq!(lines[1], "0,0,0,0.0");
    assert_eq!(lines[4], "3,3,0,0.0");
    assert_eq!(lines[10], "9,9,0,0.0");
}

#[test]
fn perf_agg_skips_a_replicate_missing_the_metric_column() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_clean_tree(&exp, root.path());

    // Seed 5's table has the right shape but not the aggregated metric.
    let loc = &exp.locations(root.path()).unwrap()[4];
    assert_eq!(loc.seed, 5);
    let mut out = String::from("gen,pop_opt_max\n");
    for gen in 0..10 {
        out.push_str(&format!("{},0\n", gen));
    }
    fs::write(&loc.path, out).unwrap();

    let summary = collect_perf_agg(&exp, root.path(), dump.path(), 1, None).unwrap();
    assert_eq!(summary.replicates, 49);
    assert_eq!(summary.skipped, vec![5]);
    assert_eq!(summary.rows, 10);

    // The 49 remaining replicates still agree exactly.
    let text = fs::read_to_string(&summary.output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[1], "0,0,0,0.0");
    assert_eq!(lines[10], "9,9,0,0.0");
}

#[test]
fn perf_agg_aborts_on_replicate_length_mismatch() {
    let root = TempDir::new().unwrap();
    let dump = TempDir::new().unwrap();
    let exp = lexicase();
    build_dirty_tree(&exp, root.path());

    // Seed 21 has 4 rows against everyone's 10; aggregation must refuse to
    // silently truncate.
    assert!(collect_perf_agg(&exp, root.path(), dump.path(), 1, None).is_err());
}

#[test]
fn collectors_reject_a_missing_dump_directory() {
    let root = TempDir::new().unwrap();
    let exp = lexicase();
    build_clean_tree(&exp, root.path());
    let gone = root.path().join("no-dump");
    assert!(collect_over_time(&exp, root.path(), &gone, 1).is_err());
    assert!(collect_best(&exp, root.path(), &gone).is_err());
}
