use super::binning::BinnedMatrix;
use super::{RegressionTree, TreeNode};
use rayon::prelude::*;

/// Tree-shape constraints for one boosting round.
#[derive(Debug, Clone, Copy)]
pub struct GrowthParams {
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian_in_leaf: f64,
    pub lambda_l2: f64,
    pub min_gain_to_split: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

#[derive(Debug)]
struct Leaf {
    node: usize,
    depth: usize,
    rows: Vec<usize>,
    sum_gradient: f64,
    sum_hessian: f64,
    best: Option<SplitCandidate>,
}

#[derive(Clone, Copy, Default)]
struct Bucket {
    gradient: f64,
    hessian: f64,
    count: usize,
}

fn leaf_score(gradient: f64, hessian: f64, lambda: f64) -> f64 {
    gradient * gradient / (hessian + lambda)
}

/// Grows one tree leaf-wise: the leaf with the largest gain is split until `num_leaves`
/// is reached or no split clears the constraints.
pub struct TreeGrower<'a> {
    data: &'a BinnedMatrix,
    gradients: &'a [f64],
    hessians: &'a [f64],
    features: &'a [usize],
    params: GrowthParams,
}

impl<'a> TreeGrower<'a> {
    pub fn new(
        data: &'a BinnedMatrix,
        gradients: &'a [f64],
        hessians: &'a [f64],
        features: &'a [usize],
        params: GrowthParams,
    ) -> Self {
        Self {
            data,
            gradients,
            hessians,
            features,
            params,
        }
    }

    pub fn grow(&self, rows: Vec<usize>) -> RegressionTree {
        let mut nodes = vec![TreeNode::Leaf { value: 0.0 }];
        let mut leaves = vec![self.make_leaf(0, 0, rows)];

        while leaves.len() < self.params.num_leaves {
            let chosen = leaves
                .iter()
                .enumerate()
                .filter_map(|(pos, leaf)| leaf.best.map(|split| (pos, split.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
            let Some((position, _)) = chosen else {
                break;
            };

            let leaf = leaves.swap_remove(position);
            let Some(split) = leaf.best else {
                break;
            };
            let column = self.data.column(split.feature);
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .iter()
                .partition(|&&row| usize::from(column[row]) <= split.bin);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(TreeNode::Leaf { value: 0.0 });
            nodes.push(TreeNode::Leaf { value: 0.0 });
            nodes[leaf.node] = TreeNode::Split {
                feature: split.feature,
                threshold: self.data.mapper(split.feature).threshold(split.bin),
                gain: split.gain,
                left,
                right,
            };

            leaves.push(self.make_leaf(left, leaf.depth + 1, left_rows));
            leaves.push(self.make_leaf(right, leaf.depth + 1, right_rows));
        }

        for leaf in &leaves {
            let value = -leaf.sum_gradient / (leaf.sum_hessian + self.params.lambda_l2)
                * self.params.learning_rate;
            nodes[leaf.node] = TreeNode::Leaf {
                value: if value.is_finite() { value } else { 0.0 },
            };
        }
        RegressionTree::new(nodes)
    }

    fn make_leaf(&self, node: usize, depth: usize, rows: Vec<usize>) -> Leaf {
        let sum_gradient = rows.iter().map(|&r| self.gradients[r]).sum();
        let sum_hessian = rows.iter().map(|&r| self.hessians[r]).sum();
        let can_split = self.params.max_depth.map_or(true, |max| depth < max)
            && rows.len() >= 2 * self.params.min_data_in_leaf.max(1);
        let best = if can_split {
            self.best_split(&rows, sum_gradient, sum_hessian)
        } else {
            None
        };
        Leaf {
            node,
            depth,
            rows,
            sum_gradient,
            sum_hessian,
            best,
        }
    }

    /// Histogram split search, one feature per rayon task.
    fn best_split(
        &self,
        rows: &[usize],
        sum_gradient: f64,
        sum_hessian: f64,
    ) -> Option<SplitCandidate> {
        let parent = leaf_score(sum_gradient, sum_hessian, self.params.lambda_l2);
        let per_feature: Vec<Option<SplitCandidate>> = self
            .features
            .par_iter()
            .map(|&feature| {
                self.best_split_for_feature(feature, rows, sum_gradient, sum_hessian, parent)
            })
            .collect();

        // sequential reduction keeps tie-breaking independent of scheduling
        per_feature
            .into_iter()
            .flatten()
            .fold(None, |best: Option<SplitCandidate>, candidate| match best {
                Some(current) if current.gain >= candidate.gain => Some(current),
                _ => Some(candidate),
            })
    }

    fn best_split_for_feature(
        &self,
        feature: usize,
        rows: &[usize],
        sum_gradient: f64,
        sum_hessian: f64,
        parent: f64,
    ) -> Option<SplitCandidate> {
        let n_bins = self.data.mapper(feature).n_bins();
        if n_bins < 2 {
            return None;
        }
        let column = self.data.column(feature);
        let mut histogram = vec![Bucket::default(); n_bins];
        for &row in rows {
            let bucket = &mut histogram[usize::from(column[row])];
            bucket.gradient += self.gradients[row];
            bucket.hessian += self.hessians[row];
            bucket.count += 1;
        }

        let params = &self.params;
        let mut best: Option<SplitCandidate> = None;
        let mut left = Bucket::default();
        for (bin, bucket) in histogram.iter().enumerate().take(n_bins - 1) {
            left.gradient += bucket.gradient;
            left.hessian += bucket.hessian;
            left.count += bucket.count;
            if bucket.count == 0 {
                continue;
            }

            let right_count = rows.len() - left.count;
            let right_gradient = sum_gradient - left.gradient;
            let right_hessian = sum_hessian - left.hessian;
            if left.count < params.min_data_in_leaf
                || right_count < params.min_data_in_leaf
                || right_count == 0
                || left.hessian < params.min_sum_hessian_in_leaf
                || right_hessian < params.min_sum_hessian_in_leaf
            {
                continue;
            }

            let gain = leaf_score(left.gradient, left.hessian, params.lambda_l2)
                + leaf_score(right_gradient, right_hessian, params.lambda_l2)
                - parent;
            if !gain.is_finite() || gain <= params.min_gain_to_split {
                continue;
            }
            if best.map_or(true, |current| gain > current.gain) {
                best = Some(SplitCandidate { feature, bin, gain });
            }
        }
        best
    }
}
