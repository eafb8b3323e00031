//! Calling into compiled models and integrators.
//!
//! The compiled code exposes three C routines:
//!
//! - `rhs(in, out)`: residual of the DAE, `in = [x | z | u | p | xdot]`, `out` has `nx + nz`
//!   entries;
//! - `rhs_jac(in, out)`: its Jacobian with respect to `in`, `(nx+nz) * (2nx+nz+nu+np)` entries;
//! - `integrate(buffer, cold_start)`: one integration step, in place on a buffer laid out as
//!   described by [`StateLayout`].

pub mod integrator;
pub mod layout;
pub mod load;

pub use integrator::{DaeIntegrator, NamedValues};
pub use layout::StateLayout;
pub use load::{IntegrateFn, NativeRoutines, RhsFn};
