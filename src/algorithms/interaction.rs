use crate::config::ColumnSchema;
use crate::error::{RecError, Result, Stage};
use crate::models::{ConfidenceWeights, FeatureTable, InteractionRecord};
use crate::utils::validation::{as_index, as_label, validate_schema};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Sparse user × item confidence matrix in compressed sparse row form.
///
/// Duplicate (user, item) events are summed, zero entries are dropped and column
/// indices within a row are strictly increasing. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl InteractionMatrix {
    /// Builds the matrix from already-weighted records, rejecting out-of-range indices.
    pub fn from_records<I>(n_users: usize, n_items: usize, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = InteractionRecord>,
    {
        // keyed by (user, item), so iteration order is already CSR order
        let mut entries: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for record in records {
            if record.user_id >= n_users {
                return Err(RecError::schema(
                    Stage::Retrieval,
                    format!("user_id {} outside [0, {})", record.user_id, n_users),
                ));
            }
            if record.item_id >= n_items {
                return Err(RecError::schema(
                    Stage::Retrieval,
                    format!("item_id {} outside [0, {})", record.item_id, n_items),
                ));
            }
            if !(record.confidence >= 0.0) || !record.confidence.is_finite() {
                return Err(RecError::schema(
                    Stage::Retrieval,
                    format!(
                        "confidence {} for ({}, {}) is not a finite non-negative value",
                        record.confidence, record.user_id, record.item_id
                    ),
                ));
            }
            *entries.entry((record.user_id, record.item_id)).or_insert(0.0) += record.confidence;
        }

        let mut indptr = vec![0usize; n_users + 1];
        let mut indices = Vec::with_capacity(entries.len());
        let mut data = Vec::with_capacity(entries.len());
        for ((user, item), confidence) in entries {
            if confidence != 0.0 {
                indices.push(item);
                data.push(confidence);
                indptr[user + 1] += 1;
            }
        }
        for user in 0..n_users {
            indptr[user + 1] += indptr[user];
        }

        Ok(Self {
            n_rows: n_users,
            n_cols: n_items,
            indptr,
            indices,
            data,
        })
    }

    /// Builds the matrix from the feature table's (user, item, label) columns.
    ///
    /// Identifiers are dense, so the shape is (max user id + 1, max item id + 1). A dense
    /// id space cannot be larger than the number of rows, which rejects stray ids before
    /// anything is allocated for them.
    pub fn from_table(
        table: &FeatureTable,
        schema: &ColumnSchema,
        weights: &ConfidenceWeights,
    ) -> Result<Self> {
        validate_schema(table, schema)?;
        let users = table.column(&schema.user_column)?;
        let items = table.column(&schema.item_column)?;
        let labels = table.column(&schema.label_column)?;

        let mut records = Vec::with_capacity(table.n_rows());
        for row in 0..table.n_rows() {
            let (user_id, item_id, label) =
                match (as_index(users[row]), as_index(items[row]), as_label(labels[row])) {
                    (Some(u), Some(i), Some(l)) => (u, i, l),
                    _ => {
                        return Err(RecError::schema(
                            Stage::Retrieval,
                            format!("row {} has invalid user/item/label encoding", row),
                        ))
                    }
                };
            records.push(InteractionRecord::new(user_id, item_id, label, weights));
        }

        let n_users = records.iter().map(|r| r.user_id + 1).max().unwrap_or(0);
        let n_items = records.iter().map(|r| r.item_id + 1).max().unwrap_or(0);
        for (column, size) in [(&schema.user_column, n_users), (&schema.item_column, n_items)] {
            if size > table.n_rows() {
                return Err(RecError::schema(
                    Stage::Data,
                    format!(
                        "column '{}' implies {} ids from {} rows; ids are not densely encoded",
                        column,
                        size,
                        table.n_rows()
                    ),
                ));
            }
        }
        let matrix = Self::from_records(n_users, n_items, records)?;
        info!(
            "Built interaction matrix: {} users x {} items, {} non-zeros",
            matrix.n_rows,
            matrix.n_cols,
            matrix.nnz()
        );
        Ok(matrix)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn n_users(&self) -> usize {
        self.n_rows
    }

    pub fn n_items(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Column indices and confidences of row `row`. Panics if `row` is out of range.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.indptr[row]..self.indptr[row + 1];
        (&self.indices[range.clone()], &self.data[range])
    }

    pub fn row_len(&self, row: usize) -> usize {
        self.indptr[row + 1] - self.indptr[row]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row >= self.n_rows {
            return 0.0;
        }
        let (cols, values) = self.row(row);
        cols.binary_search(&col).map(|pos| values[pos]).unwrap_or(0.0)
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.n_rows && self.row(row).0.binary_search(&col).is_ok()
    }

    /// Item-major copy of the matrix, used when solving for item factors.
    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.n_cols + 1];
        for &col in &self.indices {
            counts[col + 1] += 1;
        }
        for col in 0..self.n_cols {
            counts[col + 1] += counts[col];
        }

        let indptr = counts.clone();
        let mut next = counts;
        let mut indices = vec![0usize; self.nnz()];
        let mut data = vec![0.0f64; self.nnz()];
        // rows are visited in order, so each transposed row stays sorted
        for row in 0..self.n_rows {
            let (cols, values) = self.row(row);
            for (&col, &value) in cols.iter().zip(values) {
                let slot = next[col];
                indices[slot] = row;
                data[slot] = value;
                next[col] += 1;
            }
        }

        debug!("Transposed interaction matrix ({} non-zeros)", self.nnz());
        Self {
            n_rows: self.n_cols,
            n_cols: self.n_rows,
            indptr,
            indices,
            data,
        }
    }
}
