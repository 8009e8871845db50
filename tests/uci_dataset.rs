use gradeband::config::DataConfig;
use gradeband::frame::text_column;
use gradeband::load::{SUBJECT_COLUMN, load_student_data};
use gradeband::preprocess::{LABEL_COLUMN, Performance, preprocess};
use std::path::PathBuf;

// The UCI files are not part of the repository. Drop student-mat.csv and
// student-por.csv into data/ to enable this test.
fn uci_config() -> Option<DataConfig> {
    let config = DataConfig {
        data_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data"),
        ..DataConfig::default()
    };
    if config.math_path().is_file() && config.language_path().is_file() {
        Some(config)
    } else {
        eprintln!("skipping: UCI student files not found in {}", config.data_dir.display());
        None
    }
}

#[test]
fn canonical_files_load_and_preprocess() {
    let Some(config) = uci_config() else {
        return;
    };

    let raw = load_student_data(&config, None).expect("load UCI files");
    assert_eq!(raw.height(), 1044);
    let subjects = text_column(&raw, SUBJECT_COLUMN).unwrap();
    assert_eq!(subjects.iter().filter(|s| s.as_deref() == Some("math")).count(), 395);
    assert_eq!(subjects.iter().filter(|s| s.as_deref() == Some("Portuguese")).count(), 649);

    let processed = preprocess(&raw).expect("preprocess UCI table");
    assert!(processed.encoded.height() <= 1044);
    for label in text_column(&processed.encoded, LABEL_COLUMN).unwrap() {
        let label = label.expect("every row is labelled");
        assert!(label.parse::<Performance>().is_ok(), "unexpected label {label}");
    }
    for column in processed.encoded.get_columns() {
        assert_eq!(column.null_count(), 0, "{} has gaps", column.name());
    }
}
