use crate::traits::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A fixed-step rule mapping `(x, y)` to the value of `y` at `x + h`.
///
/// `eval` computes f(x, y) for a stage. Errors from it are returned untouched
/// so the caller decides how to report the failing stage.
pub trait Steppable<T: Scalar> {
    /// Number of right-hand side evaluations per step.
    const STAGES: usize;

    fn step<E, F>(&self, eval: &mut F, x: f64, y: T, h: f64) -> Result<T, E>
    where
        F: FnMut(f64, T) -> Result<T, E>;
}

/// Explicit (forward) Euler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euler;

impl<T: Scalar> Steppable<T> for Euler {
    const STAGES: usize = 1;

    fn step<E, F>(&self, eval: &mut F, x: f64, y: T, h: f64) -> Result<T, E>
    where
        F: FnMut(f64, T) -> Result<T, E>,
    {
        // y_next = y + h*f(x, y)
        let slope = eval(x, y)?;
        Ok(y + T::from_real(h) * slope)
    }
}

/// Heun's method (improved Euler): Euler predictor, trapezoidal corrector.
#[derive(Debug, Clone, Copy, Default)]
pub struct Heun;

impl<T: Scalar> Steppable<T> for Heun {
    const STAGES: usize = 2;

    fn step<E, F>(&self, eval: &mut F, x: f64, y: T, h: f64) -> Result<T, E>
    where
        F: FnMut(f64, T) -> Result<T, E>,
    {
        let dt = T::from_real(h);
        let half_dt = T::from_real(h * 0.5);

        // f(x, y) feeds both the predictor and the corrector.
        let slope = eval(x, y)?;
        let predicted = y + dt * slope;
        let end_slope = eval(x + h, predicted)?;

        Ok(y + half_dt * (slope + end_slope))
    }
}

/// Classic Runge-Kutta 4th Order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RK4;

impl<T: Scalar> Steppable<T> for RK4 {
    const STAGES: usize = 4;

    fn step<E, F>(&self, eval: &mut F, x: f64, y: T, h: f64) -> Result<T, E>
    where
        F: FnMut(f64, T) -> Result<T, E>,
    {
        let dt = T::from_real(h);
        let half = T::from_real(0.5);
        let two = T::from_real(2.0);
        let sixth = T::from_real(1.0 / 6.0);
        let mid = x + h * 0.5;

        // k1 = h*f(x, y)
        let k1 = dt * eval(x, y)?;
        // k2 = h*f(x + h/2, y + k1/2)
        let k2 = dt * eval(mid, y + k1 * half)?;
        // k3 = h*f(x + h/2, y + k2/2)
        let k3 = dt * eval(mid, y + k2 * half)?;
        // k4 = h*f(x + h, y + k3)
        let k4 = dt * eval(x + h, y + k3)?;

        Ok(y + sixth * (k1 + two * k2 + two * k3 + k4))
    }
}

/// The closed set of step rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Euler,
    Heun,
    #[default]
    Rk4,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Euler, Method::Heun, Method::Rk4];

    /// Global order of accuracy (power of h in the final-point error).
    pub fn order(self) -> u32 {
        match self {
            Method::Euler => 1,
            Method::Heun => 2,
            Method::Rk4 => 4,
        }
    }

    /// Right-hand side evaluations per step.
    pub fn stages(self) -> usize {
        match self {
            Method::Euler => <Euler as Steppable<f64>>::STAGES,
            Method::Heun => <Heun as Steppable<f64>>::STAGES,
            Method::Rk4 => <RK4 as Steppable<f64>>::STAGES,
        }
    }

    /// Human readable name used in reports and plot legends.
    pub fn display_name(self) -> &'static str {
        match self {
            Method::Euler => "Euler's Method",
            Method::Heun => "Improved Euler (Heun's Method)",
            Method::Rk4 => "Runge-Kutta 4th Order (RK4)",
        }
    }

    /// Advances one step with the selected rule.
    pub fn step<T, E, F>(self, eval: &mut F, x: f64, y: T, h: f64) -> Result<T, E>
    where
        T: Scalar,
        F: FnMut(f64, T) -> Result<T, E>,
    {
        match self {
            Method::Euler => Euler.step(eval, x, y, h),
            Method::Heun => Heun.step(eval, x, y, h),
            Method::Rk4 => RK4.step(eval, x, y, h),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Method {
    type Err = anyhow::Error;

    /// Accepts method names as well as the numeric menu codes `1`, `2` and `3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "euler" => Ok(Method::Euler),
            "2" | "heun" | "improved-euler" | "improved_euler" => Ok(Method::Heun),
            "3" | "rk4" | "runge-kutta" | "runge_kutta" => Ok(Method::Rk4),
            other => Err(anyhow::anyhow!(
                "Unknown method '{}'; expected euler, heun or rk4 (or 1, 2, 3)",
                other
            )),
        }
    }
}
