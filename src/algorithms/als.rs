//! Alternating least squares for implicit feedback.
//!
//! Minimises `Σ c(u,i)·(p(u,i) − x_u·y_i)² + λ(‖X‖² + ‖Y‖²)` with `c = 1 + α·confidence`
//! and `p = 1` on observed entries. Every iteration is split into a user phase and an
//! item phase; each phase solves all of its rows in parallel against factors that are
//! frozen for the whole phase, and the next phase starts only once every row is written.

use super::initializer::initial_factors;
use super::interaction::InteractionMatrix;
use crate::config::AlsConfig;
use crate::error::{RecError, Result, Stage};
use crate::models::LatentFactors;
use crate::utils::AbortHandle;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Relative increase of the objective tolerated as floating-point noise.
const OBJECTIVE_TOLERANCE: f64 = 1e-9;

/// Non-fatal report that the objective went up between two iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceWarning {
    pub iteration: usize,
    pub previous: f64,
    pub current: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlsReport {
    pub initial_objective: f64,
    /// Objective after each completed iteration.
    pub objective_history: Vec<f64>,
    pub iterations_run: usize,
    pub converged_early: bool,
    pub warnings: Vec<ConvergenceWarning>,
}

impl AlsReport {
    pub fn final_objective(&self) -> f64 {
        self.objective_history
            .last()
            .copied()
            .unwrap_or(self.initial_objective)
    }

    /// Appends the objective reached by `iteration`. A rise over the previous value is
    /// kept as a warning; it never stops training.
    pub fn record(&mut self, iteration: usize, current: f64) {
        let previous = self.final_objective();
        if current > previous + OBJECTIVE_TOLERANCE * previous.abs().max(1.0) {
            warn!(
                "ALS objective increased at iteration {}: {:.6} -> {:.6}",
                iteration, previous, current
            );
            self.warnings.push(ConvergenceWarning {
                iteration,
                previous,
                current,
            });
        }
        self.objective_history.push(current);
        self.iterations_run = iteration;
    }
}

#[derive(Debug, Clone)]
pub struct AlsTrainer {
    config: AlsConfig,
}

impl AlsTrainer {
    pub fn new(config: AlsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AlsConfig {
        &self.config
    }

    pub fn fit(&self, matrix: &InteractionMatrix) -> Result<(LatentFactors, AlsReport)> {
        self.fit_with_abort(matrix, &AbortHandle::new())
    }

    pub fn fit_with_abort(
        &self,
        matrix: &InteractionMatrix,
        abort: &AbortHandle,
    ) -> Result<(LatentFactors, AlsReport)> {
        let (users, items) = initial_factors(
            matrix.n_users(),
            matrix.n_items(),
            self.config.factors,
            self.config.seed,
        );
        self.run(matrix, users, items, abort)
    }

    /// Continues training from previously fitted factors.
    pub fn resume(
        &self,
        matrix: &InteractionMatrix,
        factors: LatentFactors,
        abort: &AbortHandle,
    ) -> Result<(LatentFactors, AlsReport)> {
        let checks = [
            ("user factor rows", matrix.n_users(), factors.n_users()),
            ("item factor rows", matrix.n_items(), factors.n_items()),
            ("factor dimension", self.config.factors, factors.factors()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(RecError::dimension_mismatch(Stage::Retrieval, what, expected, found));
            }
        }
        self.run(matrix, factors.user_factors, factors.item_factors, abort)
    }

    fn run(
        &self,
        matrix: &InteractionMatrix,
        mut users: Array2<f64>,
        mut items: Array2<f64>,
        abort: &AbortHandle,
    ) -> Result<(LatentFactors, AlsReport)> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads())
            .build()
            .map_err(|e| RecError::InvalidConfig(format!("ALS thread pool: {}", e)))?;

        let item_user = matrix.transpose();
        let (reg, alpha) = (self.config.regularization, self.config.alpha);

        let mut report = AlsReport {
            initial_objective: objective(matrix, &users, &items, reg, alpha),
            ..AlsReport::default()
        };

        info!(
            "Training ALS: {} users x {} items, {} factors, {} iterations, lambda={}, alpha={}",
            matrix.n_users(),
            matrix.n_items(),
            self.config.factors,
            self.config.iterations,
            reg,
            alpha
        );

        for iteration in 1..=self.config.iterations {
            let started = Instant::now();

            check_abort(abort)?;
            users = pool.install(|| solve_phase(matrix, &items, reg, alpha))?;

            check_abort(abort)?;
            items = pool.install(|| solve_phase(&item_user, &users, reg, alpha))?;

            let previous = report.final_objective();
            let current = objective(matrix, &users, &items, reg, alpha);
            report.record(iteration, current);
            debug!(
                "ALS iteration {}: objective {:.6} ({:?})",
                iteration,
                current,
                started.elapsed()
            );

            if let Some(threshold) = self.config.convergence_threshold {
                let change = (previous - current).abs() / previous.abs().max(f64::EPSILON);
                if change < threshold {
                    info!(
                        "ALS converged after {} iterations (relative change {:.3e})",
                        iteration, change
                    );
                    report.converged_early = true;
                    break;
                }
            }
        }

        let factors = LatentFactors::new(users, items)?;
        info!(
            "ALS finished after {} iterations, objective {:.6}",
            report.iterations_run,
            report.final_objective()
        );
        Ok((factors, report))
    }
}

fn check_abort(abort: &AbortHandle) -> Result<()> {
    if abort.is_aborted() {
        warn!("ALS training aborted, discarding partial factors");
        return Err(RecError::Aborted {
            stage: Stage::Retrieval,
        });
    }
    Ok(())
}

/// `Aᵗ A` as a nalgebra matrix.
fn gram(factors: &Array2<f64>) -> DMatrix<f64> {
    let product = factors.t().dot(factors);
    DMatrix::from_fn(product.nrows(), product.ncols(), |r, c| product[[r, c]])
}

/// Solves every row of `rows` against the frozen `fixed` factors. One half-iteration.
pub fn solve_phase(
    rows: &InteractionMatrix,
    fixed: &Array2<f64>,
    regularization: f64,
    alpha: f64,
) -> Result<Array2<f64>> {
    let k = fixed.ncols();
    let fixed_gram = gram(fixed);

    let solved = (0..rows.n_users())
        .into_par_iter()
        .map(|row| {
            let (cols, confidences) = rows.row(row);
            solve_row(&fixed_gram, fixed, cols, confidences, regularization, alpha)
        })
        .collect::<Result<Vec<DVector<f64>>>>()?;

    let flat: Vec<f64> = solved.iter().flat_map(|v| v.iter().copied()).collect();
    Array2::from_shape_vec((rows.n_users(), k), flat).map_err(|e| RecError::Numerical {
        stage: Stage::Retrieval,
        message: e.to_string(),
    })
}

/// Weighted ridge regression for a single row:
/// `(YᵗY + Σ_obs (c−1) y yᵗ + λI) x = Σ_obs c y`.
///
/// `λ > 0` makes the system positive definite, so rows without observations solve to zero.
pub fn solve_row(
    fixed_gram: &DMatrix<f64>,
    fixed: &Array2<f64>,
    cols: &[usize],
    confidences: &[f64],
    regularization: f64,
    alpha: f64,
) -> Result<DVector<f64>> {
    let k = fixed_gram.nrows();
    let mut a = fixed_gram.clone();
    let mut b = DVector::<f64>::zeros(k);

    for (&col, &confidence) in cols.iter().zip(confidences) {
        let c = 1.0 + alpha * confidence;
        let y = fixed.row(col);
        for r in 0..k {
            b[r] += c * y[r];
            let scaled = (c - 1.0) * y[r];
            for s in 0..k {
                a[(r, s)] += scaled * y[s];
            }
        }
    }
    for d in 0..k {
        a[(d, d)] += regularization;
    }

    let cholesky = a.cholesky().ok_or_else(|| RecError::Numerical {
        stage: Stage::Retrieval,
        message: "per-row system is not positive definite".to_string(),
    })?;
    Ok(cholesky.solve(&b))
}

fn dot(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.dot(&b)
}

/// Full confidence-weighted objective over every (user, item) pair.
///
/// Unobserved pairs contribute `(x·y)²` each, which sums to `⟨XᵗX, YᵗY⟩`; observed pairs
/// then swap their `s²` term for `c(1 − s)²`.
pub fn objective(
    matrix: &InteractionMatrix,
    users: &Array2<f64>,
    items: &Array2<f64>,
    regularization: f64,
    alpha: f64,
) -> f64 {
    let xtx = users.t().dot(users);
    let yty = items.t().dot(items);
    let mut loss = (&xtx * &yty).sum();

    for user in 0..matrix.n_users() {
        let (cols, confidences) = matrix.row(user);
        let x = users.row(user);
        for (&item, &confidence) in cols.iter().zip(confidences) {
            let s = dot(x, items.row(item));
            let c = 1.0 + alpha * confidence;
            loss += c * (1.0 - s).powi(2) - s * s;
        }
    }

    let penalty =
        users.iter().map(|v| v * v).sum::<f64>() + items.iter().map(|v| v * v).sum::<f64>();
    loss + regularization * penalty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionRecord;

    fn small_config(factors: usize, iterations: usize) -> AlsConfig {
        AlsConfig {
            factors,
            iterations,
            num_threads: 2,
            ..AlsConfig::default()
        }
    }

    fn five_by_five() -> InteractionMatrix {
        let pairs = [
            (0, 0), (0, 1), (1, 1), (1, 2), (2, 0),
            (2, 3), (3, 3), (3, 4), (4, 2), (4, 4),
        ];
        let records = pairs.iter().map(|&(u, i)| InteractionRecord {
            user_id: u,
            item_id: i,
            confidence: 1.0,
            label: 1,
        });
        InteractionMatrix::from_records(5, 5, records).unwrap()
    }

    /// Brute-force objective over the dense matrix, used to check the closed form.
    fn dense_objective(
        m: &InteractionMatrix,
        x: &Array2<f64>,
        y: &Array2<f64>,
        reg: f64,
        alpha: f64,
    ) -> f64 {
        let mut loss = 0.0;
        for u in 0..m.n_users() {
            for i in 0..m.n_items() {
                let conf = m.get(u, i);
                let p = if conf > 0.0 { 1.0 } else { 0.0 };
                let c = 1.0 + alpha * conf;
                let s = x.row(u).dot(&y.row(i));
                loss += c * (p - s) * (p - s);
            }
        }
        loss + reg * (x.iter().map(|v| v * v).sum::<f64>() + y.iter().map(|v| v * v).sum::<f64>())
    }

    #[test]
    fn test_objective_matches_dense_computation() {
        let matrix = five_by_five();
        let (x, y) = initial_factors(5, 5, 3, 1);
        let x = x * 50.0;
        let y = y * 50.0;
        let fast = objective(&matrix, &x, &y, 0.1, 2.0);
        let slow = dense_objective(&matrix, &x, &y, 0.1, 2.0);
        assert!((fast - slow).abs() < 1e-9 * slow.abs().max(1.0));
    }

    #[test]
    fn test_empty_row_solves_to_finite_zero() {
        let (_, fixed) = initial_factors(1, 4, 3, 3);
        let g = gram(&fixed);
        let solution = solve_row(&g, &fixed, &[], &[], 0.1, 1.0).unwrap();
        assert_eq!(solution.len(), 3);
        assert!(solution.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_row_solve_is_finite_for_zero_factors() {
        // all-zero fixed factors make YᵗY singular; the ridge term alone must keep it solvable
        let fixed = Array2::<f64>::zeros((4, 3));
        let g = gram(&fixed);
        let solution = solve_row(&g, &fixed, &[0, 2], &[1.0, 3.0], 0.1, 1.0).unwrap();
        assert!(solution.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_objective_is_non_increasing() {
        let trainer = AlsTrainer::new(small_config(3, 20)).unwrap();
        let (factors, report) = trainer.fit(&five_by_five()).unwrap();

        assert_eq!(report.iterations_run, 20);
        assert!(report.warnings.is_empty());
        let mut previous = report.initial_objective;
        for &current in &report.objective_history {
            assert!(current <= previous + 1e-9 * previous.abs().max(1.0));
            previous = current;
        }
        assert_eq!((factors.n_users(), factors.n_items(), factors.factors()), (5, 5, 3));
    }

    #[test]
    fn test_objective_rise_is_recorded_without_stopping() {
        let mut report = AlsReport {
            initial_objective: 10.0,
            ..AlsReport::default()
        };
        for (iteration, objective) in [8.0, 9.0, 7.0, 7.0 + 1e-12].into_iter().enumerate() {
            report.record(iteration + 1, objective);
        }

        assert_eq!(report.iterations_run, 4);
        assert_eq!(report.objective_history, vec![8.0, 9.0, 7.0, 7.0 + 1e-12]);
        assert_eq!(
            report.warnings,
            vec![ConvergenceWarning {
                iteration: 2,
                previous: 8.0,
                current: 9.0,
            }]
        );
        assert_eq!(report.final_objective(), 7.0 + 1e-12);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let trainer = AlsTrainer::new(small_config(4, 5)).unwrap();
        let (a, _) = trainer.fit(&five_by_five()).unwrap();
        let (b, _) = trainer.fit(&five_by_five()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_observed_entries_score_higher() {
        let trainer = AlsTrainer::new(small_config(4, 20)).unwrap();
        let matrix = five_by_five();
        let (factors, _) = trainer.fit(&matrix).unwrap();
        let observed = factors.user(0).dot(&factors.item(0));
        let unobserved = factors.user(0).dot(&factors.item(3));
        assert!(observed > unobserved);
    }

    #[test]
    fn test_convergence_threshold_stops_early() {
        let mut config = small_config(3, 200);
        config.convergence_threshold = Some(1e-3);
        let trainer = AlsTrainer::new(config).unwrap();
        let (_, report) = trainer.fit(&five_by_five()).unwrap();
        assert!(report.converged_early);
        assert!(report.iterations_run < 200);
    }

    #[test]
    fn test_resume_rejects_mismatched_shapes() {
        let trainer = AlsTrainer::new(small_config(3, 2)).unwrap();
        let factors = LatentFactors::new(Array2::zeros((4, 3)), Array2::zeros((5, 3))).unwrap();
        let err = trainer
            .resume(&five_by_five(), factors, &AbortHandle::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RecError::DimensionMismatch { stage: Stage::Retrieval, expected: 5, found: 4, .. }
        ));
    }

    #[test]
    fn test_abort_discards_partial_state() {
        let trainer = AlsTrainer::new(small_config(3, 5)).unwrap();
        let abort = AbortHandle::new();
        abort.abort();
        let result = trainer.fit_with_abort(&five_by_five(), &abort);
        assert!(matches!(result, Err(RecError::Aborted { stage: Stage::Retrieval })));
    }
}
