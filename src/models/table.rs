use crate::error::{RecError, Result, Stage};
use ndarray::{Array2, ArrayView1, Axis};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Rectangular, fully numeric table of interaction events, one row per event.
///
/// Produced by the upstream preprocessing step: identifiers and categoricals are already
/// integer encoded and missing values imputed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureTable {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(RecError::dimension_mismatch(
                Stage::Data,
                "table width",
                columns.len(),
                values.ncols(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(RecError::schema(Stage::Data, format!("duplicate column '{}'", name)));
            }
        }

        if let Some(((row, col), _)) = values.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(RecError::schema(
                Stage::Data,
                format!("non-finite value in column '{}' at row {}", columns[col], row),
            ));
        }

        Ok(Self { columns, values })
    }

    /// Builds a table from row-major records.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let width = columns.len();
        let mut flat = Vec::with_capacity(rows.len() * width);
        for (line, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(RecError::schema(
                    Stage::Data,
                    format!("row {} has {} fields, expected {}", line, row.len(), width),
                ));
            }
            flat.extend_from_slice(row);
        }
        let values = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| RecError::schema(Stage::Data, e.to_string()))?;
        Self::new(columns, values)
    }

    /// Reads a cleaned CSV with a header row and numeric cells.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_csv_limited(path, None)
    }

    /// Like [`FeatureTable::from_csv`], keeping at most `max_rows` leading data rows.
    pub fn from_csv_limited<P: AsRef<Path>>(path: P, max_rows: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;
        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let limit = max_rows.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        for (line, record) in reader.records().take(limit).enumerate() {
            let record = record?;
            let row = record
                .iter()
                .zip(&columns)
                .map(|(cell, column)| {
                    cell.trim().parse::<f64>().map_err(|_| {
                        RecError::schema(
                            Stage::Data,
                            format!(
                                "non-numeric value '{}' in column '{}' at row {}",
                                cell, column, line
                            ),
                        )
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.push(row);
        }

        let table = Self::from_rows(columns, &rows)?;
        info!(
            "Loaded feature table from {} ({} rows, {} columns)",
            path.display(),
            table.n_rows(),
            table.n_columns()
        );
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| RecError::schema(Stage::Data, format!("missing column '{}'", name)))
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        let index = self.column_index(name)?;
        Ok(self.values.column(index))
    }

    /// Copies the named columns, in the given order, into a new row-major matrix.
    pub fn select(&self, names: &[String]) -> Result<Array2<f64>> {
        let indices = names
            .iter()
            .map(|name| self.column_index(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.values.select(Axis(1), &indices))
    }
}
