//! Solve requests as they arrive from a front-end: equation text, initial value
//! text, an end point instead of a step count, and a domain switch.

use crate::equation_engine::{parse_value, CompiledDerivative};
use crate::integrator::{solve, validate_step, SolveError, Trajectory};
use crate::solvers::Method;
use crate::traits::Scalar;
use anyhow::{Context, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Value domain of `y` for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Real,
    /// Default: the initial value is always promoted to a complex number.
    #[default]
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    /// Right-hand side `f(x, y)`, e.g. `"x + y"` or `"j*y"`.
    pub equation: String,
    pub x0: f64,
    /// Initial value text, e.g. `"1"` or `"1+2j"`.
    pub y0: String,
    pub x_end: f64,
    pub h: f64,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub domain: Domain,
}

/// Largest step count a request may ask for. Keeps the trajectory within what
/// a wasm32 address space can hold.
pub const MAX_STEPS: usize = 10_000_000;

/// Number of whole steps of size `h` from `x0` towards `x_end`.
///
/// The quotient is truncated toward zero, so an end point that is not a whole
/// number of steps away is not reached: x0 = 0, x_end = 0.35, h = 0.1 gives 3
/// steps and a last sample at x = 0.3. An end point behind `x0` (relative to the
/// sign of `h`) by at least one full step is rejected.
pub fn step_count(x0: f64, x_end: f64, h: f64) -> Result<usize, SolveError> {
    validate_step(h)?;
    let steps = ((x_end - x0) / h).trunc();
    if !steps.is_finite() {
        return Err(SolveError::invalid_step(format!(
            "step count from x0 = {x0} to x_end = {x_end} is not finite"
        )));
    }
    if steps < 0.0 {
        return Err(SolveError::invalid_step(format!(
            "x_end = {x_end} lies behind x0 = {x0} for h = {h} (step count {steps})"
        )));
    }
    if steps > MAX_STEPS as f64 {
        return Err(SolveError::invalid_step(format!(
            "step count {steps} exceeds the limit of {MAX_STEPS}"
        )));
    }
    Ok(steps as usize)
}

/// A typed trajectory in the domain the request asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Solution {
    Real(Trajectory<f64>),
    Complex(Trajectory<Complex64>),
}

impl Solution {
    pub fn len(&self) -> usize {
        match self {
            Solution::Real(t) => t.len(),
            Solution::Complex(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn report(&self) -> TrajectoryReport {
        match self {
            Solution::Real(t) => TrajectoryReport::from_trajectory(t),
            Solution::Complex(t) => TrajectoryReport::from_trajectory(t),
        }
    }
}

impl std::fmt::Display for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Solution::Real(t) => std::fmt::Display::fmt(t, f),
            Solution::Complex(t) => std::fmt::Display::fmt(t, f),
        }
    }
}

/// Flat, plot-friendly view of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectoryReport {
    pub method: Method,
    pub method_name: String,
    pub h: f64,
    pub x: Vec<f64>,
    pub y_re: Vec<f64>,
    pub y_im: Vec<f64>,
}

impl TrajectoryReport {
    pub fn from_trajectory<T: Scalar>(trajectory: &Trajectory<T>) -> Self {
        Self {
            method: trajectory.method(),
            method_name: trajectory.method().display_name().to_string(),
            h: trajectory.step_size(),
            x: trajectory.xs(),
            y_re: trajectory.real_parts(),
            y_im: trajectory.imag_parts(),
        }
    }
}

impl SolveRequest {
    pub fn steps(&self) -> Result<usize, SolveError> {
        step_count(self.x0, self.x_end, self.h)
    }

    /// Compiles the equation, parses `y0` and integrates up to `x_end`.
    pub fn run(&self) -> Result<Solution> {
        let steps = self.steps()?;
        match self.domain {
            Domain::Real => self.run_in::<f64>(steps).map(Solution::Real),
            Domain::Complex => self.run_in::<Complex64>(steps).map(Solution::Complex),
        }
    }

    fn run_in<T: Scalar>(&self, steps: usize) -> Result<Trajectory<T>> {
        let f = CompiledDerivative::<T>::compile(&self.equation)?;
        let y0 = parse_value::<T>(&self.y0).context("Invalid initial value y0")?;
        let trajectory = solve(&f, self.x0, y0, self.h, steps, self.method)?;
        Ok(trajectory)
    }
}
