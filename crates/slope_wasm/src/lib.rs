//! WASM bridge: solve requests and compiled solvers for JavaScript front-ends.

mod system;

pub use system::WasmSolver;

use slope_core::request::{step_count, SolveRequest, TrajectoryReport};
use system::to_js_error;
use wasm_bindgen::prelude::*;

pub(crate) fn run_request(request: &SolveRequest) -> anyhow::Result<TrajectoryReport> {
    Ok(request.run()?.report())
}

/// Runs a `{ equation, x0, y0, xEnd, h, method?, domain? }` request and returns
/// the trajectory report.
#[wasm_bindgen]
pub fn solve_request(request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let request: SolveRequest = serde_wasm_bindgen::from_value(request)
        .map_err(|err| JsValue::from_str(&format!("Invalid solve request: {err}")))?;
    let report = run_request(&request).map_err(to_js_error)?;
    serde_wasm_bindgen::to_value(&report)
        .map_err(|err| JsValue::from_str(&format!("Failed to serialize trajectory: {err}")))
}

/// Number of steps a solve from `x0` to `x_end` takes (truncated toward zero).
#[wasm_bindgen]
pub fn count_steps(x0: f64, x_end: f64, h: f64) -> Result<u32, JsValue> {
    let steps = step_count(x0, x_end, h).map_err(|err| to_js_error(err.into()))?;
    u32::try_from(steps).map_err(|_| JsValue::from_str("Step count exceeds u32 range"))
}
