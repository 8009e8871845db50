//! Reading the two course files into one subject-tagged table.

use crate::config::DataConfig;
use crate::frame::column_names;
use crate::remote::{RemoteSource, fetch_first_available};
use polars::prelude::*;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

pub const SUBJECT_COLUMN: &str = "subject";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Math,
    Portuguese,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Math => "math",
            Subject::Portuguese => "Portuguese",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Required data file '{path}' is missing: {detail}")]
    MissingFile { path: PathBuf, detail: String },
    #[error("Failed to parse course file: {0}")]
    Polars(#[from] PolarsError),
    #[error("I/O error while loading course files: {0}")]
    Io(#[from] std::io::Error),
    #[error("Course files have different columns: '{first}' has [{first_columns}], '{second}' has [{second_columns}]")]
    SchemaMismatch {
        first: String,
        second: String,
        first_columns: String,
        second_columns: String,
    },
}

/// Parses one semicolon-delimited course file and appends the subject tag.
pub fn read_course_file(path: &Path, subject: Subject) -> Result<DataFrame, LoadError> {
    if !path.is_file() {
        return Err(LoadError::MissingFile {
            path: path.to_path_buf(),
            detail: "no such file".to_string(),
        });
    }
    let mut df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b';')),
        )
        .finish()?;

    let tags = vec![subject.as_str(); df.height()];
    df.with_column(Column::new(SUBJECT_COLUMN.into(), tags))?;
    log::debug!(
        "Read {} {subject} rows with {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// Row-wise union of two tables with the same column set.
///
/// The second table is reordered to the first table's column order. Columns
/// whose inferred types disagree are widened: numeric pairs to `Float64`,
/// anything else to `String`.
pub fn concat_course_tables(first: &DataFrame, second: &DataFrame) -> Result<DataFrame, LoadError> {
    let mut first_names = column_names(first);
    let mut second_names = column_names(second);
    first_names.sort();
    second_names.sort();
    if first_names != second_names {
        return Err(LoadError::SchemaMismatch {
            first: Subject::Math.to_string(),
            second: Subject::Portuguese.to_string(),
            first_columns: first_names.join(", "),
            second_columns: second_names.join(", "),
        });
    }

    let mut left = Vec::with_capacity(first.width());
    let mut right = Vec::with_capacity(first.width());
    for column in first.get_columns() {
        let other = second.column(column.name().as_str())?;
        if column.dtype() == other.dtype() {
            left.push(column.clone());
            right.push(other.clone());
        } else {
            let widened = widen(column.dtype(), other.dtype());
            log::debug!(
                "Column '{}' is {} in one file and {} in the other; reading both as {widened}",
                column.name(),
                column.dtype(),
                other.dtype()
            );
            left.push(column.cast(&widened)?);
            right.push(other.cast(&widened)?);
        }
    }

    let mut combined = DataFrame::new(left)?;
    combined.vstack_mut(&DataFrame::new(right)?)?;
    Ok(combined)
}

fn widen(a: &DataType, b: &DataType) -> DataType {
    if a.is_primitive_numeric() && b.is_primitive_numeric() {
        DataType::Float64
    } else {
        DataType::String
    }
}

/// Makes sure `target` exists locally, downloading it from the first mirror
/// that serves `file_name` when it does not. The body is written to a
/// temporary file in the target directory and renamed into place.
pub fn ensure_local_file(
    target: &Path,
    file_name: &str,
    mirrors: &[String],
    source: Option<&dyn RemoteSource>,
) -> Result<PathBuf, LoadError> {
    if target.is_file() {
        return Ok(target.to_path_buf());
    }
    let Some(source) = source else {
        return Err(LoadError::MissingFile {
            path: target.to_path_buf(),
            detail: "file not found and downloads are disabled".to_string(),
        });
    };
    if mirrors.is_empty() {
        return Err(LoadError::MissingFile {
            path: target.to_path_buf(),
            detail: "file not found and no download mirror is configured".to_string(),
        });
    }

    let urls: Vec<String> = mirrors
        .iter()
        .map(|base| format!("{}/{file_name}", base.trim_end_matches('/')))
        .collect();
    let (url, body) =
        fetch_first_available(source, &urls).map_err(|e| LoadError::MissingFile {
            path: target.to_path_buf(),
            detail: format!("every mirror failed; last error: {e}"),
        })?;

    let directory = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&directory)?;
    let mut staged = NamedTempFile::new_in(&directory)?;
    staged.write_all(&body)?;
    staged.flush()?;
    staged.persist(target).map_err(|e| e.error)?;

    println!("> Downloaded {} ({} bytes) from {url}", target.display(), body.len());
    Ok(target.to_path_buf())
}

/// Loads (downloading first if allowed and needed) both course files and
/// returns their subject-tagged union. The row count is the sum of the two
/// source row counts.
pub fn load_student_data(
    config: &DataConfig,
    source: Option<&dyn RemoteSource>,
) -> Result<DataFrame, LoadError> {
    let math_path = ensure_local_file(
        &config.math_path(),
        &config.math_file,
        &config.mirrors,
        source,
    )?;
    let language_path = ensure_local_file(
        &config.language_path(),
        &config.language_file,
        &config.mirrors,
        source,
    )?;

    let math = read_course_file(&math_path, Subject::Math)?;
    let language = read_course_file(&language_path, Subject::Portuguese)?;
    let combined = concat_course_tables(&math, &language)?;

    log::info!(
        "Loaded {} math + {} Portuguese = {} rows",
        math.height(),
        language.height(),
        combined.height()
    );
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::text_column;
    use crate::remote::testing::StubSource;
    use tempfile::tempdir;

    const MATH: &str = "school;age;internet;G3\nGP;15;yes;12\nMS;16;no;8\n";
    const LANGUAGE: &str = "school;internet;age;G3\nGP;yes;17;15.5\n";

    fn config_in(dir: &Path) -> DataConfig {
        DataConfig {
            data_dir: dir.to_path_buf(),
            ..DataConfig::default()
        }
    }

    #[test]
    fn union_tags_every_row_with_its_subject() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(config.math_path(), MATH).unwrap();
        fs::write(config.language_path(), LANGUAGE).unwrap();

        let df = load_student_data(&config, None).unwrap();
        assert_eq!(df.height(), 3);
        assert_eq!(
            column_names(&df),
            vec!["school", "age", "internet", "G3", SUBJECT_COLUMN]
        );
        let subjects = text_column(&df, SUBJECT_COLUMN).unwrap();
        assert_eq!(
            subjects,
            vec![
                Some("math".to_string()),
                Some("math".to_string()),
                Some("Portuguese".to_string())
            ]
        );
        // G3 is integer in one file and decimal in the other.
        assert_eq!(df.column("G3").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn missing_file_without_mirrors_is_reported() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(config.math_path(), MATH).unwrap();
        match load_student_data(&config, None) {
            Err(LoadError::MissingFile { path, .. }) => assert_eq!(path, config.language_path()),
            other => panic!("expected MissingFile, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(config.math_path(), MATH).unwrap();
        fs::write(config.language_path(), "school;age;G3\nGP;17;15\n").unwrap();
        assert!(matches!(
            load_student_data(&config, None),
            Err(LoadError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn download_uses_backup_mirror_and_caches_the_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("student-mat.csv");
        let mirrors = vec![
            "https://primary.example/uci/".to_string(),
            "https://backup.example/uci".to_string(),
        ];
        let source =
            StubSource::default().with("https://backup.example/uci/student-mat.csv", MATH.as_bytes());

        let path = ensure_local_file(&target, "student-mat.csv", &mirrors, Some(&source)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), MATH);
        assert_eq!(
            source.requested(),
            vec![
                "https://primary.example/uci/student-mat.csv",
                "https://backup.example/uci/student-mat.csv"
            ]
        );

        ensure_local_file(&target, "student-mat.csv", &mirrors, Some(&source)).unwrap();
        assert_eq!(source.requested().len(), 2);
    }

    #[test]
    fn failed_download_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("student-por.csv");
        let mirrors = vec!["https://primary.example".to_string()];
        let source = StubSource::default();
        assert!(matches!(
            ensure_local_file(&target, "student-por.csv", &mirrors, Some(&source)),
            Err(LoadError::MissingFile { .. })
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
