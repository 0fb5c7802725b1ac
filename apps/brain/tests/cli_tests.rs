//! Tests for configuration loading and the scripted commands.

use brain::cli::{StressPlan, run_demo, run_exec, run_stress};
use brain::config::{Overrides, Settings, load_config};
use brain_core::{BrainConfig, BrainError, ChangeEvent, NodeEvent, Value};
use std::io::Write;
use tempfile::NamedTempFile;

fn settings_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(text.as_bytes()).expect("write");
    file
}

// =============================================================================
// CONFIGURATION
// =============================================================================

#[test]
fn missing_file_means_defaults() {
    let config = load_config(None, Overrides::default()).expect("config");
    assert_eq!(config, BrainConfig::default());
}

#[test]
fn file_values_and_overrides_layer() {
    let file = settings_file("[engine]\npool_capacity = 8\nmax_eval_depth = 32\n");
    let overrides = Overrides {
        max_eval_depth: Some(16),
        ..Overrides::default()
    };

    let config = load_config(Some(file.path()), overrides).expect("config");
    assert_eq!(config.pool_capacity, 8);
    assert_eq!(config.max_eval_depth, 16);
    assert_eq!(
        config.lock_wait_warn_ms,
        BrainConfig::default().lock_wait_warn_ms
    );
}

#[test]
fn unknown_keys_are_rejected() {
    let result = Settings::from_toml("[engine]\npool_size = 8\n");
    assert!(matches!(result, Err(BrainError::Config(_))));
}

#[test]
fn invalid_values_are_rejected() {
    let file = settings_file("[engine]\nmax_lock_retries = 0\n");
    assert!(load_config(Some(file.path()), Overrides::default()).is_err());
}

#[test]
fn directories_are_not_config_files() {
    let dir = tempfile::tempdir().expect("dir");
    let result = Settings::from_file(dir.path());
    assert!(matches!(result, Err(BrainError::Config(_))));
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn demo_reorders_and_cleans_up() {
    let report = run_demo(BrainConfig::default()).expect("demo");
    assert_eq!(report.after_insert, vec![report.a, report.b]);
    assert_eq!(report.after_move, vec![report.b, report.a]);
    assert_eq!(report.after_delete, vec![report.b]);
    assert!(!report.dangling);
    assert!(
        report
            .events
            .contains(&ChangeEvent::Node(NodeEvent::Removed { id: report.a }))
    );
}

#[test]
fn stress_run_stays_consistent() {
    let plan = StressPlan {
        threads: 4,
        rounds: 300,
        nodes: 8,
        seed: 11,
    };
    let report = run_stress(BrainConfig::default(), &plan).expect("stress");
    assert!(report.consistent);
    assert_eq!(report.operations, 1_200);
    assert_eq!(report.stats.locks.acquired, report.stats.locks.released);
}

#[test]
fn stress_rejects_empty_plans() {
    let plan = StressPlan {
        threads: 0,
        rounds: 1,
        nodes: 8,
        seed: 0,
    };
    assert!(run_stress(BrainConfig::default(), &plan).is_err());
}

#[test]
fn exec_sums_through_both_paths() {
    let report = run_exec(BrainConfig::default(), &[1, 2, 3, 4, 5]).expect("exec");
    assert_eq!(
        report.values,
        vec![Value::Int(15), Value::Int(5), Value::Text("sum=15".to_string())]
    );
    assert_eq!(report.fast_path_sum, Some(15));
    assert!(report.mutated);
    assert!(report.stack.is_balanced());
    assert_eq!(report.reclaim.survived, 3);
    assert!(report.diagnostics.is_empty());
}
