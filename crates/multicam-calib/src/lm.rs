//! Sparse Levenberg-Marquardt refinement on top of `tiny-solver`.
//!
//! A [`LeastSquares`] collects named parameter blocks with their initial
//! values and residual blocks referring to them by name. Jacobians come from
//! the solver's automatic differentiation of the factors in
//! [`crate::factors`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tiny_solver::factors::{na, FactorImpl};
use tiny_solver::Optimizer;

/// Stop after `max_iters` iterations or once an iteration lowers the
/// squared error by less than `eps` relative to its current value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TermCriteria {
    pub max_iters: usize,
    pub eps: f64,
}

impl TermCriteria {
    pub const fn new(max_iters: usize, eps: f64) -> Self {
        Self { max_iters, eps }
    }
}

impl Default for TermCriteria {
    fn default() -> Self {
        Self::new(80, 1e-6)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("problem has no residuals")]
    Empty,
    #[error("residual refers to unknown parameter block {0}")]
    UnknownBlock(String),
    #[error("initial value of parameter block {0} is not finite")]
    NonFinite(String),
    #[error("optimizer did not return a solution")]
    NoSolution,
    #[error("solution of parameter block {0} is missing or not finite")]
    InvalidSolution(String),
}

/// Named parameter blocks plus the residual blocks constraining them.
pub struct LeastSquares {
    problem: tiny_solver::Problem,
    initial: HashMap<String, na::DVector<f64>>,
    residual_blocks: usize,
    unknown: Option<String>,
}

impl Default for LeastSquares {
    fn default() -> Self {
        Self::new()
    }
}

impl LeastSquares {
    pub fn new() -> Self {
        Self {
            problem: tiny_solver::Problem::new(),
            initial: HashMap::new(),
            residual_blocks: 0,
            unknown: None,
        }
    }

    /// Register a parameter block. Registering a name twice replaces its
    /// initial value.
    pub fn add_block(&mut self, name: impl Into<String>, initial: &[f64]) {
        self.initial
            .insert(name.into(), na::DVector::from_row_slice(initial));
    }

    /// Add `dim` residuals computed by `factor` from the named blocks, in
    /// order. Blocks must be registered first.
    pub fn add_residual(
        &mut self,
        dim: usize,
        blocks: &[&str],
        factor: Box<dyn FactorImpl + Send>,
    ) {
        if self.unknown.is_none() {
            if let Some(name) = blocks.iter().find(|b| !self.initial.contains_key(**b)) {
                self.unknown = Some((*name).to_string());
            }
        }
        self.problem.add_residual_block(dim, blocks, factor, None);
        self.residual_blocks += 1;
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residual_blocks
    }

    /// Minimize the squared residuals; returns the refined value of every
    /// block.
    pub fn solve(self, criteria: TermCriteria) -> Result<HashMap<String, Vec<f64>>, SolveError> {
        if self.residual_blocks == 0 {
            return Err(SolveError::Empty);
        }
        if let Some(name) = self.unknown {
            return Err(SolveError::UnknownBlock(name));
        }
        if let Some((name, _)) = self
            .initial
            .iter()
            .find(|(_, v)| v.iter().any(|x| !x.is_finite()))
        {
            return Err(SolveError::NonFinite(name.clone()));
        }

        let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
        let options = tiny_solver::OptimizerOptions {
            max_iteration: criteria.max_iters.max(1),
            verbosity_level: 0,
            min_rel_error_decrease_threshold: criteria.eps,
            min_abs_error_decrease_threshold: f64::EPSILON,
            min_error_threshold: f64::EPSILON,
            ..Default::default()
        };
        let solution = optimizer
            .optimize(&self.problem, &self.initial, Some(options))
            .ok_or(SolveError::NoSolution)?;

        let mut out = HashMap::with_capacity(self.initial.len());
        for (name, init) in &self.initial {
            let value = solution
                .get(name)
                .filter(|v| v.len() == init.len() && v.iter().all(|x| x.is_finite()))
                .ok_or_else(|| SolveError::InvalidSolution(name.clone()))?;
            out.insert(name.clone(), value.iter().copied().collect());
        }
        log::trace!(
            "lm finished: {} blocks, {} residual blocks",
            out.len(),
            self.residual_blocks
        );
        Ok(out)
    }
}

/// Refined value of `name`, as returned by [`LeastSquares::solve`].
pub(crate) fn block<'a>(
    solution: &'a HashMap<String, Vec<f64>>,
    name: &str,
) -> Result<&'a [f64], SolveError> {
    solution
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| SolveError::InvalidSolution(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_solver::factors::Factor;

    /// `y = a * x + b` through one sample.
    #[derive(Debug, Clone)]
    struct LineSample {
        x: f64,
        y: f64,
    }

    impl<T: na::RealField> Factor<T> for LineSample {
        fn residual_func(&self, params: &[na::DVector<T>]) -> na::DVector<T> {
            let a = params[0][0].clone();
            let b = params[1][0].clone();
            let x: T = na::convert(self.x);
            let y: T = na::convert(self.y);
            na::DVector::from_vec(vec![a * x + b - y])
        }
    }

    #[test]
    fn recovers_shared_and_per_line_parameters() {
        let offsets = [1.0, -2.0, 0.5];
        let mut ls = LeastSquares::new();
        ls.add_block("slope", &[0.0]);
        for (k, b) in offsets.iter().enumerate() {
            let name = format!("offset{k}");
            ls.add_block(name.as_str(), &[0.0]);
            for i in 0..6 {
                let x = i as f64;
                ls.add_residual(
                    1,
                    &["slope", name.as_str()],
                    Box::new(LineSample { x, y: 0.75 * x + b }),
                );
            }
        }
        assert_eq!(ls.num_residual_blocks(), 18);
        let sol = ls.solve(TermCriteria::new(50, 1e-12)).expect("solve");
        assert!((block(&sol, "slope").expect("slope")[0] - 0.75).abs() < 1e-6);
        for (k, b) in offsets.iter().enumerate() {
            let got = block(&sol, &format!("offset{k}")).expect("offset")[0];
            assert!((got - b).abs() < 1e-6, "offset {k}: {got}");
        }
    }

    #[test]
    fn empty_problem_is_an_error() {
        let mut ls = LeastSquares::new();
        ls.add_block("slope", &[0.0]);
        assert_eq!(ls.solve(TermCriteria::default()), Err(SolveError::Empty));
    }

    #[test]
    fn unregistered_block_is_an_error() {
        let mut ls = LeastSquares::new();
        ls.add_block("slope", &[0.0]);
        ls.add_residual(1, &["slope", "offset"], Box::new(LineSample { x: 1.0, y: 1.0 }));
        assert_eq!(
            ls.solve(TermCriteria::default()),
            Err(SolveError::UnknownBlock("offset".into()))
        );
    }

    #[test]
    fn non_finite_start_is_an_error() {
        let mut ls = LeastSquares::new();
        ls.add_block("slope", &[f64::NAN]);
        ls.add_block("offset", &[0.0]);
        ls.add_residual(1, &["slope", "offset"], Box::new(LineSample { x: 1.0, y: 1.0 }));
        assert_eq!(
            ls.solve(TermCriteria::default()),
            Err(SolveError::NonFinite("slope".into()))
        );
    }
}
