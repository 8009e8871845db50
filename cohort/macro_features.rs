//! Country-level indicators from the World Bank v2 API.
//!
//! Indicators are fetched for a list of countries over a year window, reduced
//! to one value per country, and then averaged across countries into constant
//! columns on the student table (the student data has no country field).

use crate::config::MacroFeatureConfig;
use crate::remote::{RemoteError, RemoteSource};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

const PER_PAGE: usize = 1000;

#[derive(Error, Debug)]
pub enum MacroError {
    #[error("Unsupported aggregation strategy '{0}'; expected 'mean' or 'median'")]
    UnsupportedStrategy(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Polars error while merging macro features: {0}")]
    Polars(#[from] PolarsError),
}

/// How a country's values across the year window collapse to one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Mean,
    Median,
}

impl FromStr for Aggregation {
    type Err = MacroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Aggregation::Mean),
            "median" => Ok(Aggregation::Median),
            other => Err(MacroError::UnsupportedStrategy(other.to_string())),
        }
    }
}

impl Aggregation {
    /// `None` for an empty slice.
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregation::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
        }
    }
}

/// One `(country, year, value)` data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub country: String,
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountryRow {
    pub country: String,
    /// Aligned with [`MacroTable::indicator_names`].
    pub values: Vec<Option<f64>>,
}

/// One row per country, one aggregated value per indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroTable {
    pub indicator_names: Vec<String>,
    pub rows: Vec<CountryRow>,
}

impl MacroTable {
    pub fn empty(indicator_names: Vec<String>) -> Self {
        Self {
            indicator_names,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cross-country mean of each indicator over the countries that have it.
    pub fn column_means(&self) -> Vec<(String, Option<f64>)> {
        self.indicator_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let present: Vec<f64> = self.rows.iter().filter_map(|row| row.values[i]).collect();
                (name.clone(), Aggregation::Mean.apply(&present))
            })
            .collect()
    }
}

pub fn indicator_url(
    endpoint: &str,
    countries: &[String],
    code: &str,
    start_year: i32,
    end_year: i32,
    page: usize,
) -> String {
    format!(
        "{}/country/{}/indicator/{code}?format=json&date={start_year}:{end_year}&per_page={PER_PAGE}&page={page}",
        endpoint.trim_end_matches('/'),
        countries.join(";")
    )
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    #[serde(default)]
    pages: Option<u32>,
    #[serde(default)]
    message: Option<Vec<ApiMessage>>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    id: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct CountryRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    countryiso3code: Option<String>,
    #[serde(default)]
    country: Option<CountryRef>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    value: Option<f64>,
}

// An error response is a one-element array, so the entries slot may be absent.
#[derive(Debug, Deserialize)]
struct IndicatorPage(PageMeta, #[serde(default)] Option<Vec<Entry>>);

impl Entry {
    fn into_observation(self) -> Option<Observation> {
        let value = self.value.filter(|v| v.is_finite())?;
        let country = self
            .countryiso3code
            .filter(|code| !code.is_empty())
            .or_else(|| self.country.map(|c| c.id).filter(|id| !id.is_empty()))?;
        let year = self.date?.trim().parse().ok()?;
        Some(Observation {
            country,
            year,
            value,
        })
    }
}

/// Parses one response page into its observations and the total page count.
///
/// The body is `[meta, entries]`; `entries` is `null` when nothing matched and
/// entries with a `null` value are skipped. An error payload (`[{"message": …}]`)
/// is reported as malformed.
pub fn parse_indicator_page(url: &str, body: &[u8]) -> Result<(Vec<Observation>, usize), RemoteError> {
    let malformed = |message: String| RemoteError::Malformed {
        url: url.to_string(),
        message,
    };
    let IndicatorPage(meta, entries) =
        serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;
    if let Some(messages) = meta.message {
        let detail: Vec<String> = messages
            .iter()
            .map(|m| format!("{} {}", m.id, m.value).trim().to_string())
            .collect();
        return Err(malformed(format!("API error: {}", detail.join("; "))));
    }
    let pages = meta.pages.map_or(1, |p| p.max(1) as usize);
    let observations = entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(Entry::into_observation)
        .collect();
    Ok((observations, pages))
}

fn fetch_pages(
    source: &dyn RemoteSource,
    config: &MacroFeatureConfig,
    endpoint: &str,
    code: &str,
) -> Result<Vec<Observation>, RemoteError> {
    let page_url = |page| indicator_url(endpoint, &config.countries, code, config.start_year, config.end_year, page);
    let url = page_url(1);
    let (mut observations, pages) = parse_indicator_page(&url, &source.fetch(&url)?)?;
    for page in 2..=pages {
        let url = page_url(page);
        let (more, _) = parse_indicator_page(&url, &source.fetch(&url)?)?;
        observations.extend(more);
    }
    log::debug!("Indicator {code}: {} observations over {pages} page(s) from {endpoint}", observations.len());
    Ok(observations)
}

/// Fetches every page of one indicator from the first endpoint that serves a
/// complete, well-formed series. A transport error, an HTTP error status or an
/// unreadable page all move on to the next endpoint.
pub fn fetch_indicator(
    source: &dyn RemoteSource,
    config: &MacroFeatureConfig,
    code: &str,
) -> Result<Vec<Observation>, RemoteError> {
    let mut last_error = RemoteError::NoSources;
    for endpoint in &config.endpoints {
        match fetch_pages(source, config, endpoint, code) {
            Ok(observations) => return Ok(observations),
            Err(e) => {
                log::warn!("{e}");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// Reduces per-indicator observations to one row per country (sorted by code).
pub fn aggregate(
    indicator_names: Vec<String>,
    observations: &[Vec<Observation>],
    strategy: Aggregation,
) -> MacroTable {
    let mut by_country: BTreeMap<&str, Vec<Vec<f64>>> = BTreeMap::new();
    for (i, series) in observations.iter().enumerate() {
        for obs in series {
            let slots = by_country
                .entry(obs.country.as_str())
                .or_insert_with(|| vec![Vec::new(); indicator_names.len()]);
            if let Some(slot) = slots.get_mut(i) {
                slot.push(obs.value);
            }
        }
    }
    let rows = by_country
        .into_iter()
        .map(|(country, values)| CountryRow {
            country: country.to_string(),
            values: values.iter().map(|v| strategy.apply(v)).collect(),
        })
        .collect();
    MacroTable {
        indicator_names,
        rows,
    }
}

/// Fetches and aggregates all configured indicators.
///
/// Only an unknown aggregation name is an error. A remote failure on every
/// endpoint, or a query that matches nothing, yields an empty table with the
/// expected indicator names so the caller can carry on without macro columns.
pub fn fetch_macro_table(
    config: &MacroFeatureConfig,
    source: &dyn RemoteSource,
) -> Result<MacroTable, MacroError> {
    let strategy: Aggregation = config.aggregation.parse()?;
    let names = config.indicator_names();

    let mut observations = Vec::with_capacity(config.indicators.len());
    for indicator in &config.indicators {
        match fetch_indicator(source, config, &indicator.code) {
            Ok(series) => observations.push(series),
            Err(e) => {
                log::warn!(
                    "World Bank query for {} failed on every endpoint ({e}); continuing without macro features",
                    indicator.code
                );
                return Ok(MacroTable::empty(names));
            }
        }
    }

    let table = aggregate(names, &observations, strategy);
    if table.is_empty() {
        log::warn!("World Bank query returned no data; continuing without macro features");
    } else {
        log::info!(
            "Aggregated {} indicator(s) for {} countries ({strategy:?})",
            table.indicator_names.len(),
            table.rows.len()
        );
    }
    Ok(table)
}

/// Adds the cross-country mean of each indicator as a constant `Float64`
/// column. Indicators without any value are skipped.
pub fn broadcast_onto(df: &DataFrame, table: &MacroTable) -> Result<DataFrame, MacroError> {
    let mut merged = df.clone();
    for (name, mean) in table.column_means() {
        match mean {
            Some(value) => {
                merged.with_column(Column::new(name.as_str().into(), vec![value; df.height()]))?;
            }
            None => log::debug!("Indicator '{name}' has no values; not merged"),
        }
    }
    Ok(merged)
}
