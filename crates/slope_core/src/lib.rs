pub mod equation_engine;
pub mod integrator;
pub mod request;
pub mod solvers;
/// The `slope_core` crate integrates scalar first-order ODEs `dy/dx = f(x, y)`
/// with fixed-step Euler, Heun and RK4 rules. It is generic over the value
/// domain of `y`, supporting both real (`f64`) and complex (`Complex64`) runs.
///
/// Key components:
/// - **Traits**: `Scalar` (value domain abstraction), `Derivative` (the right-hand side f).
/// - **Solvers**: Step rules (Euler, Heun, RK4) and the `Method` selector.
/// - **Integrator**: `solve`, producing an immutable `Trajectory`.
/// - **Equation Engine**: A small parser and bytecode VM for user-entered equations.
/// - **Request**: Serializable solve requests that run from equation text to a report.
pub mod traits;

pub use integrator::{solve, SolveError, State, Trajectory};
pub use solvers::Method;
pub use traits::{Derivative, Fallible, Scalar};
