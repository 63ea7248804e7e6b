//! Fixed-step integration of `dy/dx = f(x, y)` over a single scalar unknown.

use crate::solvers::Method;
use crate::traits::{Derivative, Scalar};
use num_complex::Complex64;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised by [`solve`].
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("invalid step: {reason}")]
    InvalidStep { reason: String },

    /// The right-hand side failed or produced a non-finite value. `x` and `y` are
    /// the arguments of the failing stage evaluation.
    #[error("evaluation of f failed at step {step} (x = {x}, y = {y}): {source}")]
    EvaluationFailure {
        step: usize,
        x: f64,
        y: Complex64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl SolveError {
    pub(crate) fn invalid_step(reason: impl Into<String>) -> Self {
        SolveError::InvalidStep {
            reason: reason.into(),
        }
    }
}

/// One sample of the solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct State<T> {
    pub x: f64,
    pub y: T,
}

/// The samples `(x_i, y_i)` for `i = 0..=n` produced by one call to [`solve`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory<T> {
    method: Method,
    step_size: f64,
    states: Vec<State<T>>,
}

impl<T: Scalar> Trajectory<T> {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn states(&self) -> &[State<T>] {
        &self.states
    }

    /// Number of samples, always `steps() + 1`.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// A trajectory always holds its initial condition.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn steps(&self) -> usize {
        self.states.len() - 1
    }

    pub fn initial(&self) -> State<T> {
        self.states[0]
    }

    pub fn last(&self) -> State<T> {
        self.states[self.states.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &State<T>> {
        self.states.iter()
    }

    pub fn xs(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.x).collect()
    }

    pub fn ys(&self) -> Vec<T> {
        self.states.iter().map(|s| s.y).collect()
    }

    /// Real components of `y`, the part a 2D plot of the solution shows.
    pub fn real_parts(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.y.to_complex().re).collect()
    }

    pub fn imag_parts(&self) -> Vec<f64> {
        self.states.iter().map(|s| s.y.to_complex().im).collect()
    }

    pub fn into_states(self) -> Vec<State<T>> {
        self.states
    }
}

impl<'a, T> IntoIterator for &'a Trajectory<T> {
    type Item = &'a State<T>;
    type IntoIter = std::slice::Iter<'a, State<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}

/// One line per sample in the form `x = 0.1000, y = 1.1`.
impl<T: Scalar> fmt::Display for Trajectory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for state in &self.states {
            writeln!(f, "x = {:.4}, y = {}", state.x, state.y)?;
        }
        Ok(())
    }
}

/// Integrates `dy/dx = f(x, y)` from `(x0, y0)` over `n` steps of size `h`.
///
/// `h` may be negative to integrate towards smaller `x`; it must be finite and
/// non-zero. The sample abscissae are computed as `x0 + i*h` so they do not
/// drift over long runs.
///
/// A failing or non-finite evaluation of `f` aborts the whole run; no partial
/// trajectory is returned.
pub fn solve<T, D>(
    f: &D,
    x0: f64,
    y0: T,
    h: f64,
    n: usize,
    method: Method,
) -> Result<Trajectory<T>, SolveError>
where
    T: Scalar,
    D: Derivative<T> + ?Sized,
{
    validate_step(h)?;

    let samples = n
        .checked_add(1)
        .ok_or_else(|| SolveError::invalid_step(format!("step count {n} is too large")))?;
    let mut states = Vec::new();
    states.try_reserve_exact(samples).map_err(|err| {
        SolveError::invalid_step(format!("cannot store {samples} samples: {err}"))
    })?;
    states.push(State { x: x0, y: y0 });

    let mut y = y0;
    for i in 0..n {
        let x = x0 + i as f64 * h;
        let mut eval = |sx: f64, sy: T| evaluate_stage(f, i, sx, sy);
        y = method.step(&mut eval, x, y, h)?;
        states.push(State {
            x: x0 + (i + 1) as f64 * h,
            y,
        });
    }

    Ok(Trajectory {
        method,
        step_size: h,
        states,
    })
}

pub(crate) fn validate_step(h: f64) -> Result<(), SolveError> {
    if !h.is_finite() {
        return Err(SolveError::invalid_step(format!(
            "step size must be finite (got h = {h})"
        )));
    }
    if h == 0.0 {
        return Err(SolveError::invalid_step("step size must be non-zero"));
    }
    Ok(())
}

fn evaluate_stage<T, D>(f: &D, step: usize, x: f64, y: T) -> Result<T, SolveError>
where
    T: Scalar,
    D: Derivative<T> + ?Sized,
{
    let failure = |source: Box<dyn std::error::Error + Send + Sync + 'static>| {
        SolveError::EvaluationFailure {
            step,
            x,
            y: y.to_complex(),
            source,
        }
    };

    let value = f.evaluate(x, y).map_err(|err| failure(err.into()))?;
    if !value.is_finite() {
        return Err(failure(
            format!("derivative is not finite ({value})").into(),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Fallible;

    const METHODS: [Method; 3] = Method::ALL;

    fn final_error(method: Method, h: f64, n: usize) -> f64 {
        let traj = solve(&|_x: f64, y: f64| y, 0.0, 1.0, h, n, method).expect("solve");
        let last = traj.last();
        (last.y - last.x.exp()).abs()
    }

    #[test]
    fn zero_derivative_keeps_initial_value() {
        for method in METHODS {
            let traj = solve(&|_x: f64, _y: f64| 0.0, 2.0, 3.5, 0.25, 8, method).expect("solve");
            for (i, state) in traj.iter().enumerate() {
                assert_eq!(state.y, 3.5);
                assert!((state.x - (2.0 + 0.25 * i as f64)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn constant_derivative_is_integrated_exactly() {
        for method in METHODS {
            let traj = solve(&|_x: f64, _y: f64| 1.0, 0.0, 2.0, 0.5, 6, method).expect("solve");
            for state in &traj {
                let exact = state.x + 2.0;
                assert!((state.y - exact).abs() < 1e-12, "{method:?} at x = {}", state.x);
            }
        }
    }

    #[test]
    fn trajectory_has_n_plus_one_samples() {
        for method in METHODS {
            for n in [0usize, 1, 2, 7, 50] {
                let traj = solve(&|x: f64, y: f64| x * y, 0.0, 1.0, 0.01, n, method).expect("solve");
                assert_eq!(traj.len(), n + 1);
                assert_eq!(traj.steps(), n);
            }
        }
    }

    #[test]
    fn zero_steps_returns_initial_condition_only() {
        let traj = solve(&|_x: f64, y: f64| y, 1.5, -2.0, 0.1, 0, Method::Heun).expect("solve");
        assert_eq!(traj.states(), &[State { x: 1.5, y: -2.0 }]);
    }

    #[test]
    fn abscissae_follow_x0_plus_i_h() {
        let x0 = 0.3;
        let h = 0.1;
        let traj = solve(&|x: f64, _y: f64| x.sin(), x0, 0.0, h, 1000, Method::Rk4).expect("solve");
        assert_eq!(traj.initial(), State { x: x0, y: 0.0 });
        for (i, state) in traj.iter().enumerate() {
            let expected = x0 + i as f64 * h;
            assert!((state.x - expected).abs() <= 1e-9 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn exponential_scenario_matches_reference_values() {
        let f = |_x: f64, y: f64| y;
        let euler = solve(&f, 0.0, 1.0, 0.1, 10, Method::Euler).expect("euler");
        let rk4 = solve(&f, 0.0, 1.0, 0.1, 10, Method::Rk4).expect("rk4");

        // (1.1)^10
        assert!((euler.last().y - 2.5937424601).abs() < 1e-9);
        assert!((rk4.last().y - std::f64::consts::E).abs() < 1e-4);
        assert!((rk4.last().x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn error_ordering_and_convergence_rates() {
        let (euler, heun, rk4) = (
            final_error(Method::Euler, 0.1, 10),
            final_error(Method::Heun, 0.1, 10),
            final_error(Method::Rk4, 0.1, 10),
        );
        assert!(euler > 10.0 * heun, "euler {euler} heun {heun}");
        assert!(heun > 10.0 * rk4, "heun {heun} rk4 {rk4}");

        let euler_ratio = euler / final_error(Method::Euler, 0.05, 20);
        let heun_ratio = heun / final_error(Method::Heun, 0.05, 20);
        let rk4_ratio = rk4 / final_error(Method::Rk4, 0.05, 20);

        assert!((1.6..2.4).contains(&euler_ratio), "euler ratio {euler_ratio}");
        assert!((3.2..4.8).contains(&heun_ratio), "heun ratio {heun_ratio}");
        assert!((12.0..20.0).contains(&rk4_ratio), "rk4 ratio {rk4_ratio}");
    }

    #[test]
    fn negative_step_integrates_backwards() {
        for method in METHODS {
            let traj = solve(&|_x: f64, _y: f64| 1.0, 1.0, 1.0, -0.1, 5, method).expect("solve");
            let xs = traj.xs();
            for pair in xs.windows(2) {
                assert!(pair[1] < pair[0]);
                assert!((pair[0] - pair[1] - 0.1).abs() < 1e-12);
            }
            assert!((traj.last().x - 0.5).abs() < 1e-12);
            assert!((traj.last().y - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn complex_initial_value_keeps_imaginary_part() {
        let y0 = Complex64::new(1.0, 2.0);
        let exact = y0 * 1.0f64.exp();
        let tolerances = [(Method::Euler, 0.4), (Method::Heun, 2e-2), (Method::Rk4, 1e-5)];

        for (method, tol) in tolerances {
            let traj = solve(&|_x: f64, y: Complex64| y, 0.0, y0, 0.1, 10, method).expect("solve");
            let last = traj.last().y;
            assert!(last.im > 1.0, "{method:?} lost the imaginary part");
            assert!((last - exact).norm() < tol, "{method:?}: {last} vs {exact}");
            // y0 * e^x keeps the ratio im/re = 2 for every sample.
            for state in &traj {
                assert!((state.y.im - 2.0 * state.y.re).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn complex_rotation_stays_on_unit_circle_with_rk4() {
        // y' = i*y, y(0) = 1 gives y = e^{ix}.
        let i = Complex64::new(0.0, 1.0);
        let traj = solve(&|_x: f64, y: Complex64| i * y, 0.0, Complex64::new(1.0, 0.0), 0.01, 100, Method::Rk4)
            .expect("solve");
        let last = traj.last().y;
        assert!((last.re - 1.0f64.cos()).abs() < 1e-9);
        assert!((last.im - 1.0f64.sin()).abs() < 1e-9);
        assert_eq!(traj.imag_parts()[100], last.im);
    }

    #[test]
    fn zero_or_non_finite_step_is_rejected() {
        for h in [0.0, -0.0, f64::NAN, f64::INFINITY] {
            let err = solve(&|_x: f64, y: f64| y, 0.0, 1.0, h, 3, Method::Euler).unwrap_err();
            assert!(matches!(err, SolveError::InvalidStep { .. }), "h = {h}");
        }
    }

    #[test]
    fn unallocatable_step_count_is_rejected() {
        for n in [usize::MAX, usize::MAX / 8] {
            let err = solve(&|_x: f64, _y: f64| 0.0, 0.0, 1.0, 0.1, n, Method::Euler).unwrap_err();
            assert!(matches!(err, SolveError::InvalidStep { .. }), "n = {n}: {err}");
        }
    }

    #[test]
    fn non_finite_derivative_aborts_at_first_step() {
        for method in METHODS {
            let err = solve(&|_x: f64, y: f64| 1.0 / y, 0.0, 0.0, 0.1, 10, method).unwrap_err();
            match err {
                SolveError::EvaluationFailure { step, x, y, .. } => {
                    assert_eq!(step, 0);
                    assert_eq!(x, 0.0);
                    assert_eq!(y, Complex64::new(0.0, 0.0));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn derivative_error_is_wrapped_with_failing_stage() {
        // With y' = 1 and h = 0.5 the predictor of step 1 lands on (1.0, 1.0),
        // the first stage above the limit.
        let f = Fallible(|_x: f64, y: f64| {
            if y > 0.8 {
                anyhow::bail!("y out of range: {y}")
            }
            Ok(1.0)
        });
        let err = solve(&f, 0.0, 0.0, 0.5, 4, Method::Heun).unwrap_err();
        match &err {
            SolveError::EvaluationFailure { step, x, y, source } => {
                assert_eq!(*step, 1);
                assert!((x - 1.0).abs() < 1e-12);
                assert!((y.re - 1.0).abs() < 1e-12);
                assert!(source.to_string().contains("out of range"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("step 1"));
    }

    #[test]
    fn display_renders_one_line_per_sample() {
        let traj = solve(&|_x: f64, _y: f64| 1.0, 0.0, 1.0, 0.5, 2, Method::Euler).expect("solve");
        let text = traj.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["x = 0.0000, y = 1", "x = 0.5000, y = 1.5", "x = 1.0000, y = 2"]);
    }
}
