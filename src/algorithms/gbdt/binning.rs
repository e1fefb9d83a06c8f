use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Maps a raw feature value to one of at most `max_bin` ordered bins.
///
/// Bin `b` holds values in `(upper_bounds[b-1], upper_bounds[b]]`; the last bound is +inf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinMapper {
    upper_bounds: Vec<f64>,
}

impl BinMapper {
    pub fn fit(values: ArrayView1<'_, f64>, max_bin: usize) -> Self {
        let max_bin = max_bin.max(1);
        let mut sorted: Vec<f64> = values.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let mut distinct = sorted.clone();
        distinct.dedup();

        let mut upper_bounds = Vec::new();
        if distinct.len() <= max_bin {
            for pair in distinct.windows(2) {
                upper_bounds.push((pair[0] + pair[1]) / 2.0);
            }
        } else {
            let n = sorted.len();
            for b in 1..max_bin {
                let idx = b * n / max_bin;
                if idx == 0 || idx >= n {
                    continue;
                }
                let (lo, hi) = (sorted[idx - 1], sorted[idx]);
                if lo < hi {
                    let bound = (lo + hi) / 2.0;
                    if upper_bounds.last().map_or(true, |&last| bound > last) {
                        upper_bounds.push(bound);
                    }
                }
            }
        }
        upper_bounds.push(f64::INFINITY);

        Self { upper_bounds }
    }

    pub fn n_bins(&self) -> usize {
        self.upper_bounds.len()
    }

    pub fn bin(&self, value: f64) -> u8 {
        self.upper_bounds.partition_point(|&bound| bound < value) as u8
    }

    /// Raw-value threshold equivalent to "bin <= `bin`".
    pub fn threshold(&self, bin: usize) -> f64 {
        self.upper_bounds[bin]
    }
}

/// Column-major binned copy of a training partition.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    n_rows: usize,
    columns: Vec<Vec<u8>>,
    mappers: Vec<BinMapper>,
}

impl BinnedMatrix {
    /// Fits one mapper per column of `features` and bins every row.
    pub fn build(features: &Array2<f64>, max_bin: usize) -> Self {
        let mappers: Vec<BinMapper> = features
            .columns()
            .into_iter()
            .map(|column| BinMapper::fit(column, max_bin))
            .collect();
        let columns = features
            .columns()
            .into_iter()
            .zip(&mappers)
            .map(|(column, mapper)| column.iter().map(|&v| mapper.bin(v)).collect())
            .collect();

        Self {
            n_rows: features.nrows(),
            columns,
            mappers,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, feature: usize) -> &[u8] {
        &self.columns[feature]
    }

    pub fn mapper(&self, feature: usize) -> &BinMapper {
        &self.mappers[feature]
    }
}
