use anyhow::Result;
use num_complex::Complex64;
use num_traits::Num;
use std::fmt::{Debug, Display};
use std::ops::Neg;

/// A trait for the value domain of the dependent variable `y`.
///
/// Implemented for `f64` (real runs) and `Complex64` (complex runs). The domain is
/// picked once by the type of `y0` and every stage of a solve stays inside it.
/// The elementary functions are the ones the equation engine can call.
pub trait Scalar: Num + Neg<Output = Self> + Copy + Debug + Display + 'static {
    /// Embeds a real number into the domain.
    fn from_real(value: f64) -> Self;

    /// Builds `re + im*i`. Returns `None` when the domain cannot hold a non-zero
    /// imaginary part.
    fn from_parts(re: f64, im: f64) -> Option<Self>;

    /// Widens the value to a complex number (lossless for both domains).
    fn to_complex(self) -> Complex64;

    fn is_finite(self) -> bool;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn log10(self) -> Self;
    fn sqrt(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn sinh(self) -> Self;
    fn cosh(self) -> Self;
    fn pow(self, exponent: Self) -> Self;
}

impl Scalar for f64 {
    fn from_real(value: f64) -> Self {
        value
    }

    fn from_parts(re: f64, im: f64) -> Option<Self> {
        if im == 0.0 {
            Some(re)
        } else {
            None
        }
    }

    fn to_complex(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }

    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn log10(self) -> Self {
        f64::log10(self)
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }

    fn sin(self) -> Self {
        f64::sin(self)
    }

    fn cos(self) -> Self {
        f64::cos(self)
    }

    fn tan(self) -> Self {
        f64::tan(self)
    }

    fn sinh(self) -> Self {
        f64::sinh(self)
    }

    fn cosh(self) -> Self {
        f64::cosh(self)
    }

    fn pow(self, exponent: Self) -> Self {
        f64::powf(self, exponent)
    }
}

impl Scalar for Complex64 {
    fn from_real(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }

    fn from_parts(re: f64, im: f64) -> Option<Self> {
        Some(Complex64::new(re, im))
    }

    fn to_complex(self) -> Complex64 {
        self
    }

    fn is_finite(self) -> bool {
        Complex64::is_finite(self)
    }

    fn exp(self) -> Self {
        Complex64::exp(self)
    }

    fn ln(self) -> Self {
        Complex64::ln(self)
    }

    fn log10(self) -> Self {
        Complex64::ln(self).unscale(std::f64::consts::LN_10)
    }

    fn sqrt(self) -> Self {
        Complex64::sqrt(self)
    }

    fn sin(self) -> Self {
        Complex64::sin(self)
    }

    fn cos(self) -> Self {
        Complex64::cos(self)
    }

    fn tan(self) -> Self {
        Complex64::tan(self)
    }

    fn sinh(self) -> Self {
        Complex64::sinh(self)
    }

    fn cosh(self) -> Self {
        Complex64::cosh(self)
    }

    fn pow(self, exponent: Self) -> Self {
        // Integer powers go through repeated multiplication so that y^2 of a
        // complex value has no spurious rounding from the polar form.
        if exponent.im == 0.0
            && exponent.re.fract() == 0.0
            && exponent.re.abs() <= i32::MAX as f64
        {
            self.powi(exponent.re as i32)
        } else {
            self.powc(exponent)
        }
    }
}

/// The right-hand side `f(x, y)` of a scalar ODE `dy/dx = f(x, y)`.
///
/// Implementations must be deterministic: the integrator may evaluate the same
/// `(x, y)` more than once and expects the same answer each time.
pub trait Derivative<T: Scalar> {
    /// Evaluates dy/dx at `(x, y)`.
    fn evaluate(&self, x: f64, y: T) -> Result<T>;
}

impl<T, F> Derivative<T> for F
where
    T: Scalar,
    F: Fn(f64, T) -> T,
{
    fn evaluate(&self, x: f64, y: T) -> Result<T> {
        Ok(self(x, y))
    }
}

/// Adapter for right-hand sides that can fail, e.g. `|x, y| checked(x, y)`.
pub struct Fallible<F>(pub F);

impl<T, F, E> Derivative<T> for Fallible<F>
where
    T: Scalar,
    F: Fn(f64, T) -> std::result::Result<T, E>,
    E: Into<anyhow::Error>,
{
    fn evaluate(&self, x: f64, y: T) -> Result<T> {
        (self.0)(x, y).map_err(Into::into)
    }
}
