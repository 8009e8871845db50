use gradeband::config::PipelineConfig;
use gradeband::forest::RandomForest;
use gradeband::pipeline::{self, PipelineOptions};
use gradeband::preprocess::Performance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

const HEADER: &str = "school;sex;age;studytime;failures;internet;Mjob;absences;G1;G2;G3";

/// A UCI-shaped course file whose final grade rises with study time and falls
/// with past failures.
fn synthetic_course(rows: usize, seed: u64) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut text = format!("{HEADER}\n");
    for i in 0..rows {
        let studytime = rng.gen_range(1..=4);
        let failures = if rng.gen_range(0..5) == 0 { rng.gen_range(1..=3) } else { 0 };
        let internet = if i % 4 == 0 { "no" } else { "yes" };
        let noise = rng.gen_range(-2..=2);
        let bonus = if internet == "yes" { 3 } else { 0 };
        let g3: i32 = (4 + 3 * studytime - 3 * failures + noise + bonus).clamp(0, 20);
        let mjob = ["teacher", "health", "services", "at_home", "other"][i % 5];
        writeln!(
            text,
            "\"{}\";\"{}\";{};{};{};\"{}\";\"{}\";{};{};{};{}",
            if i % 3 == 0 { "MS" } else { "GP" },
            if rng.gen_range(0..2) == 0 { "F" } else { "M" },
            rng.gen_range(15..=22),
            studytime,
            failures,
            internet,
            mjob,
            rng.gen_range(0..20),
            (g3 - 1).max(0),
            g3,
            g3
        )
        .unwrap();
    }
    text
}

fn write_courses(data_dir: &Path) {
    fs::create_dir_all(data_dir).unwrap();
    let mut math = synthetic_course(90, 7);
    // An exact duplicate row, which preprocessing must drop.
    let repeated = math.lines().nth(1).unwrap().to_string();
    math.push_str(&repeated);
    math.push('\n');
    fs::write(data_dir.join("student-mat.csv"), math).unwrap();
    fs::write(data_dir.join("student-por.csv"), synthetic_course(120, 11)).unwrap();
}

fn small_config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data.data_dir = root.join("data");
    config.output.results_dir = root.join("results");
    config.model.n_trees = 25;
    config
}

#[test]
fn offline_run_produces_metrics_predictions_and_charts() {
    let tmp = tempdir().expect("temporary directory");
    let config = small_config(tmp.path());
    write_courses(&config.data.data_dir);
    let model_path = tmp.path().join("forest.toml");

    let report = pipeline::run(
        &config,
        None,
        &PipelineOptions {
            save_model: Some(model_path.clone()),
        },
    )
    .expect("pipeline run");

    assert_eq!(report.raw_rows, 211);
    assert!(report.cleaned_rows <= 210);
    assert!(report.macro_columns.is_empty());

    let evaluation = &report.classifier.evaluation;
    assert!((0.0..=1.0).contains(&evaluation.accuracy));
    assert_eq!(evaluation.predicted.len(), evaluation.truth.len());
    assert_eq!(evaluation.confusion.total(), evaluation.truth.len());
    assert_eq!(
        evaluation.confusion.labels,
        Performance::names().map(str::to_string).to_vec()
    );

    assert!((0.0..=1.0).contains(&report.group_test.p_value));
    assert!(report.group_test.mean_first > report.group_test.mean_second);

    for chart in [
        &report.plots.grade_distribution,
        &report.plots.correlation_heatmap,
        &report.plots.studytime_boxplot,
    ] {
        assert!(chart.exists(), "{} missing", chart.display());
    }

    let predictions = fs::read_to_string(&report.predictions).expect("predictions file");
    let mut lines = predictions.lines();
    assert_eq!(lines.next(), Some("row,subject,actual,predicted"));
    assert_eq!(lines.count(), evaluation.test_rows.len());

    let restored = RandomForest::load(&model_path).expect("saved model");
    assert_eq!(restored.params, report.classifier.forest.params);
    assert_eq!(restored.n_features, report.feature_columns);
}

#[test]
fn runs_are_reproducible() {
    let first_dir = tempdir().unwrap();
    let second_dir = tempdir().unwrap();
    let mut reports = Vec::new();
    for dir in [&first_dir, &second_dir] {
        let config = small_config(dir.path());
        write_courses(&config.data.data_dir);
        reports.push(pipeline::run(&config, None, &PipelineOptions::default()).unwrap());
    }
    assert_eq!(
        reports[0].classifier.evaluation,
        reports[1].classifier.evaluation
    );
    assert_eq!(reports[0].group_test, reports[1].group_test);
}

#[test]
fn cli_reports_metrics_and_fails_cleanly_without_data() {
    let tmp = tempdir().expect("temporary directory");
    let data_dir = tmp.path().join("data");
    write_courses(&data_dir);
    let config_path = tmp.path().join("gradeband.toml");
    fs::write(&config_path, "[model]\nn_trees = 15\n").unwrap();

    let exe = env!("CARGO_BIN_EXE_gradeband");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "--offline",
            "--data-dir",
            data_dir.to_str().expect("path str"),
            "--results-dir",
            "out",
            "--config",
            config_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run gradeband cli");
    assert!(output.status.success(), "CLI failed: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Accuracy:"));
    assert!(stdout.contains("Welch's t-test"));
    assert!(tmp.path().join("out").join("studytime_boxplot.svg").exists());

    let missing = Command::new(exe)
        .current_dir(tmp.path())
        .args(["--offline", "--data-dir", "nowhere"])
        .output()
        .expect("run gradeband cli");
    assert_eq!(missing.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&missing.stderr).contains("missing"));
}
