//! Pipeline configuration.
//!
//! Every constant the pipeline relies on (file names, World Bank settings,
//! model parameters, chart names) lives in one immutable [`PipelineConfig`]
//! value. Defaults reproduce the standard run; a TOML file may override any
//! subset of fields.

use crate::forest::{ForestParams, ParamGrid};
use crate::train::TrainerConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub macro_features: MacroFeatureConfig,
    pub model: ModelSettings,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

/// Where the two course files live and where to fetch them from when absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub math_file: String,
    pub language_file: String,
    /// Base URLs tried in order (primary first, then backup). The file name is
    /// appended to each. Empty means local files are required.
    pub mirrors: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            math_file: "student-mat.csv".to_string(),
            language_file: "student-por.csv".to_string(),
            mirrors: Vec::new(),
        }
    }
}

impl DataConfig {
    pub fn math_path(&self) -> PathBuf {
        self.data_dir.join(&self.math_file)
    }

    pub fn language_path(&self) -> PathBuf {
        self.data_dir.join(&self.language_file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndicatorSpec {
    /// World Bank indicator code, e.g. `SE.XPD.TOTL.GD.ZS`.
    pub code: String,
    /// Column name the aggregated indicator is published under.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacroFeatureConfig {
    pub enabled: bool,
    /// ISO3 country codes queried; their mean stands in for the students' country.
    pub countries: Vec<String>,
    pub indicators: Vec<IndicatorSpec>,
    pub start_year: i32,
    pub end_year: i32,
    /// API base URLs tried in order (primary first, then backup).
    pub endpoints: Vec<String>,
    /// Per-country aggregation over the year window: `mean` or `median`.
    pub aggregation: String,
}

const EUROPE_20: [&str; 20] = [
    "PRT", "ESP", "FRA", "DEU", "ITA", "GBR", "IRL", "BEL", "NLD", "LUX", "CHE", "AUT", "DNK",
    "SWE", "NOR", "FIN", "CZE", "POL", "HUN", "GRC",
];

impl Default for MacroFeatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            countries: EUROPE_20.iter().map(|c| c.to_string()).collect(),
            indicators: vec![
                IndicatorSpec {
                    code: "SE.XPD.TOTL.GD.ZS".to_string(),
                    name: "edu_spend_pct_gdp".to_string(),
                },
                IndicatorSpec {
                    code: "SE.TER.ENRR".to_string(),
                    name: "tertiary_enrollment".to_string(),
                },
            ],
            start_year: 2010,
            end_year: 2019,
            endpoints: vec![
                "https://api.worldbank.org/v2".to_string(),
                "http://api.worldbank.org/v2".to_string(),
            ],
            aggregation: "mean".to_string(),
        }
    }
}

impl MacroFeatureConfig {
    pub fn indicator_names(&self) -> Vec<String> {
        self.indicators.iter().map(|i| i.name.clone()).collect()
    }
}

/// Grid values as written in TOML. A `max_depth` of 0 means "unlimited".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridSettings {
    pub n_trees: Vec<usize>,
    pub max_depth: Vec<usize>,
    pub min_samples_split: Vec<usize>,
    pub folds: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        let grid = ParamGrid::default();
        Self {
            n_trees: grid.n_trees,
            max_depth: grid.max_depth.iter().map(|d| d.unwrap_or(0)).collect(),
            min_samples_split: grid.min_samples_split,
            folds: grid.folds,
        }
    }
}

impl GridSettings {
    pub fn to_param_grid(&self) -> ParamGrid {
        ParamGrid {
            n_trees: self.n_trees.clone(),
            max_depth: self.max_depth.iter().map(|&d| depth_limit(d)).collect(),
            min_samples_split: self.min_samples_split.clone(),
            folds: self.folds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSettings {
    pub target: String,
    pub test_fraction: f64,
    pub seed: u64,
    pub stratify: bool,
    pub n_trees: usize,
    /// 0 means "unlimited".
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub grid_search: bool,
    pub grid: GridSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let forest = ForestParams::default();
        Self {
            target: "performance".to_string(),
            test_fraction: 0.2,
            seed: forest.seed,
            stratify: true,
            n_trees: forest.n_trees,
            max_depth: forest.max_depth.unwrap_or(0),
            min_samples_split: forest.min_samples_split,
            grid_search: false,
            grid: GridSettings::default(),
        }
    }
}

impl ModelSettings {
    pub fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            max_depth: depth_limit(self.max_depth),
            min_samples_split: self.min_samples_split,
            seed: self.seed,
        }
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            target: self.target.clone(),
            test_fraction: self.test_fraction,
            seed: self.seed,
            stratify: self.stratify,
            forest: self.forest_params(),
            grid: self.grid_search.then(|| self.grid.to_param_grid()),
        }
    }
}

fn depth_limit(depth: usize) -> Option<usize> {
    (depth > 0).then_some(depth)
}

/// Which columns the group comparison and the charts read.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub group_column: String,
    pub first_group: String,
    pub second_group: String,
    pub grade_column: String,
    pub studytime_column: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            group_column: "internet".to_string(),
            first_group: "yes".to_string(),
            second_group: "no".to_string(),
            grade_column: "G3".to_string(),
            studytime_column: "studytime".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub results_dir: PathBuf,
    pub grade_distribution_file: String,
    pub correlation_heatmap_file: String,
    pub studytime_boxplot_file: String,
    pub predictions_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            grade_distribution_file: "grade_distribution.svg".to_string(),
            correlation_heatmap_file: "correlation_heatmap.svg".to_string(),
            studytime_boxplot_file: "studytime_boxplot.svg".to_string(),
            predictions_file: "predictions.csv".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn grade_distribution_path(&self) -> PathBuf {
        self.results_dir.join(&self.grade_distribution_file)
    }

    pub fn correlation_heatmap_path(&self) -> PathBuf {
        self.results_dir.join(&self.correlation_heatmap_file)
    }

    pub fn studytime_boxplot_path(&self) -> PathBuf {
        self.results_dir.join(&self.studytime_boxplot_file)
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.results_dir.join(&self.predictions_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_standard_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.data.math_path(), PathBuf::from("data/student-mat.csv"));
        assert_eq!(config.data.language_path(), PathBuf::from("data/student-por.csv"));
        assert_eq!(config.macro_features.countries.len(), 20);
        assert_eq!(config.macro_features.countries[0], "PRT");
        assert_eq!(
            config.macro_features.indicator_names(),
            vec!["edu_spend_pct_gdp", "tertiary_enrollment"]
        );
        assert_eq!(config.model.test_fraction, 0.2);
        assert_eq!(config.model.seed, 42);
        assert!(config.model.stratify);
        assert_eq!(config.analysis.group_column, "internet");
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [data]
            data_dir = "/tmp/uci"
            mirrors = ["https://primary.example/data", "https://backup.example/data"]

            [model]
            n_trees = 50
            max_depth = 8
            grid_search = true

            [model.grid]
            max_depth = [0, 4]
            "#,
        )
        .unwrap();

        assert_eq!(config.data.data_dir, PathBuf::from("/tmp/uci"));
        assert_eq!(config.data.math_file, "student-mat.csv");
        assert_eq!(config.data.mirrors.len(), 2);

        let trainer = config.model.trainer_config();
        assert_eq!(trainer.forest.n_trees, 50);
        assert_eq!(trainer.forest.max_depth, Some(8));
        let grid = trainer.grid.expect("grid search was enabled");
        assert_eq!(grid.max_depth, vec![None, Some(4)]);
        assert_eq!(grid.n_trees, vec![100, 200]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml_str("[model]\ntrees = 3\n").is_err());
    }

    #[test]
    fn zero_depth_means_unlimited() {
        let settings = ModelSettings::default();
        assert_eq!(settings.forest_params().max_depth, None);
        assert!(settings.trainer_config().grid.is_none());
    }
}
