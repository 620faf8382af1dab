use crate::CoreError;

/// Floating point type used throughout the engine.
pub type Real = f64;

/// Small-value cutoff used where the engine guards against division by a
/// vanishing quantity in single-precision-scaled data (trip limits,
/// conductances, fluid pressures).
pub const EPS_F32: Real = f32::EPSILON as Real;

/// Machine epsilon for `Real`.
pub const EPS: Real = f64::EPSILON;

/// Upper clamp applied to any conductance before it is stamped into the
/// system of equations.
pub const CONDUCTANCE_LIMIT: Real = 1.0e15;

/// One tolerance pair for everything
#[derive(Clone, Copy, Debug)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

/// Clamp `value` into `[low, high]`.
pub fn limit_range(low: Real, value: Real, high: Real) -> Real {
    value.max(low).min(high)
}

/// True when `value` lies in `[low, high]`.
pub fn in_range(low: Real, value: Real, high: Real) -> bool {
    low <= value && value <= high
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, CoreError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}
