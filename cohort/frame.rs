//! Small conversions between polars frames and plain vectors.
//!
//! Numeric reads go through a `Float64` cast; text reads go through a `String`
//! cast, so integer-coded columns can be treated as categories when needed.

use polars::prelude::*;

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

pub fn is_text(column: &Column) -> bool {
    matches!(column.dtype(), DataType::String)
}

/// Values of a column cast to `f64`; unparsable or missing entries are `None`.
pub fn float_values(column: &Column) -> PolarsResult<Vec<Option<f64>>> {
    let casted = column.cast(&DataType::Float64)?;
    let values = casted.f64()?.into_iter().collect();
    Ok(values)
}

pub fn float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    float_values(df.column(name)?)
}

pub fn text_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<String>>> {
    let casted = df.column(name)?.cast(&DataType::String)?;
    let values = casted
        .str()?
        .into_iter()
        .map(|value| value.map(str::to_string))
        .collect();
    Ok(values)
}

/// Keeps the rows whose mask entry is `true`.
pub fn filter_rows(df: &DataFrame, keep: &[bool]) -> PolarsResult<DataFrame> {
    let mask = BooleanChunked::from_slice(PlSmallStr::from_static("keep"), keep);
    df.filter(&mask)
}
