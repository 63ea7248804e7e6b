//! Compiled-equation wrapper exposed to JavaScript.

use js_sys::Float64Array;
use num_complex::Complex64;
use slope_core::equation_engine::CompiledDerivative;
use slope_core::request::{step_count, Domain, TrajectoryReport};
use slope_core::traits::{Derivative, Scalar};
use slope_core::{solve, Method, Trajectory};
use wasm_bindgen::prelude::*;

/// An equation compiled once and solved for many initial conditions.
#[wasm_bindgen]
pub struct WasmSolver {
    pub(crate) equation: EquationType,
    pub(crate) method: Method,
}

pub(crate) enum EquationType {
    Real(CompiledDerivative<f64>),
    Complex(CompiledDerivative<Complex64>),
}

pub(crate) fn build_equation(equation: &str, domain: Domain) -> anyhow::Result<EquationType> {
    Ok(match domain {
        Domain::Real => EquationType::Real(CompiledDerivative::compile(equation)?),
        Domain::Complex => EquationType::Complex(CompiledDerivative::compile(equation)?),
    })
}

pub(crate) fn parse_domain(domain: &str) -> anyhow::Result<Domain> {
    match domain {
        "real" => Ok(Domain::Real),
        "" | "complex" => Ok(Domain::Complex),
        other => Err(anyhow::anyhow!("Unknown domain '{}'", other)),
    }
}

pub(crate) fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

fn integrate<T: Scalar>(
    f: &CompiledDerivative<T>,
    method: Method,
    x0: f64,
    y0: T,
    x_end: f64,
    h: f64,
) -> anyhow::Result<Trajectory<T>> {
    let steps = step_count(x0, x_end, h)?;
    Ok(solve(f, x0, y0, h, steps, method)?)
}

impl WasmSolver {
    pub(crate) fn solve_report(
        &self,
        x0: f64,
        y0_re: f64,
        y0_im: f64,
        x_end: f64,
        h: f64,
    ) -> anyhow::Result<TrajectoryReport> {
        match &self.equation {
            EquationType::Real(f) => {
                let y0 = f64::from_parts(y0_re, y0_im).ok_or_else(|| {
                    anyhow::anyhow!("Real-valued equation given a complex initial value")
                })?;
                let trajectory = integrate(f, self.method, x0, y0, x_end, h)?;
                Ok(TrajectoryReport::from_trajectory(&trajectory))
            }
            EquationType::Complex(f) => {
                let y0 = Complex64::new(y0_re, y0_im);
                let trajectory = integrate(f, self.method, x0, y0, x_end, h)?;
                Ok(TrajectoryReport::from_trajectory(&trajectory))
            }
        }
    }

    pub(crate) fn evaluate_parts(&self, x: f64, y_re: f64, y_im: f64) -> anyhow::Result<[f64; 2]> {
        let value = match &self.equation {
            EquationType::Real(f) => {
                let y = f64::from_parts(y_re, y_im).ok_or_else(|| {
                    anyhow::anyhow!("Real-valued equation given a complex argument")
                })?;
                f.evaluate(x, y)?.to_complex()
            }
            EquationType::Complex(f) => f.evaluate(x, Complex64::new(y_re, y_im))?,
        };
        Ok([value.re, value.im])
    }
}

#[wasm_bindgen]
impl WasmSolver {
    #[wasm_bindgen(constructor)]
    pub fn new(equation: &str, method_name: &str, domain: &str) -> Result<WasmSolver, JsValue> {
        console_error_panic_hook::set_once();

        let method: Method = method_name.parse().map_err(to_js_error)?;
        let domain = parse_domain(domain).map_err(to_js_error)?;
        let equation = build_equation(equation, domain).map_err(to_js_error)?;

        Ok(WasmSolver { equation, method })
    }

    pub fn method_name(&self) -> String {
        self.method.display_name().to_string()
    }

    pub fn set_method(&mut self, method_name: &str) -> Result<(), JsValue> {
        self.method = method_name.parse().map_err(to_js_error)?;
        Ok(())
    }

    /// Solves from `(x0, y0_re + y0_im*i)` up to `x_end` and returns the report
    /// object `{ method, methodName, h, x, yRe, yIm }`.
    pub fn solve(
        &self,
        x0: f64,
        y0_re: f64,
        y0_im: f64,
        x_end: f64,
        h: f64,
    ) -> Result<JsValue, JsValue> {
        let report = self
            .solve_report(x0, y0_re, y0_im, x_end, h)
            .map_err(to_js_error)?;
        serde_wasm_bindgen::to_value(&report)
            .map_err(|err| JsValue::from_str(&format!("Failed to serialize trajectory: {err}")))
    }

    /// Evaluates f(x, y) and returns `[re, im]`.
    pub fn evaluate(&self, x: f64, y_re: f64, y_im: f64) -> Result<Float64Array, JsValue> {
        let parts = self.evaluate_parts(x, y_re, y_im).map_err(to_js_error)?;
        Ok(Float64Array::from(&parts[..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasm_solver_solves_exponential_with_rk4() {
        let solver = WasmSolver::new("y", "rk4", "real").expect("solver");
        let report = solver.solve_report(0.0, 1.0, 0.0, 1.0, 0.1).expect("solve");

        assert_eq!(report.x.len(), 11);
        assert!((report.y_re[10] - std::f64::consts::E).abs() < 1e-4);
        assert!(report.y_im.iter().all(|&im| im == 0.0));
    }

    #[test]
    fn wasm_solver_accepts_menu_codes_and_switches_method() {
        let mut solver = WasmSolver::new("1", "1", "complex").expect("solver");
        assert_eq!(solver.method, Method::Euler);
        assert_eq!(solver.method_name(), "Euler's Method");

        solver.set_method("heun").expect("method");
        assert_eq!(solver.method, Method::Heun);
    }

    #[test]
    fn wasm_solver_keeps_complex_initial_value() {
        let solver = WasmSolver::new("y", "heun", "complex").expect("solver");
        let report = solver.solve_report(0.0, 1.0, 2.0, 0.5, 0.1).expect("solve");

        assert_eq!(report.y_im.len(), 6);
        assert!(report.y_im[5] > 2.0);
    }

    #[test]
    fn real_solver_rejects_complex_initial_value() {
        let solver = WasmSolver::new("y", "euler", "real").expect("solver");
        assert!(solver.solve_report(0.0, 1.0, 2.0, 1.0, 0.1).is_err());
    }

    #[test]
    fn evaluate_parts_uses_domain_arithmetic() {
        let solver = WasmSolver::new("j * y", "rk4", "complex").expect("solver");
        let parts = solver.evaluate_parts(0.0, 1.0, 2.0).expect("evaluate");
        assert_eq!(parts, [-2.0, 1.0]);
    }

    #[test]
    fn build_equation_rejects_imaginary_constants_for_real_domain() {
        assert!(build_equation("y + 2j", Domain::Real).is_err());
        assert!(build_equation("y + 2j", Domain::Complex).is_ok());
    }

    #[test]
    fn parse_domain_defaults_to_complex() {
        assert_eq!(parse_domain("").expect("domain"), Domain::Complex);
        assert_eq!(parse_domain("real").expect("domain"), Domain::Real);
        assert!(parse_domain("quaternion").is_err());
    }
}
