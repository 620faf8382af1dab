//! Solver configuration.

use nf_core::Real;
use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

/// Tuning knobs for the network solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Identifier for diagnostics.
    pub name: String,
    /// Per-node successive-change threshold for convergence detection.
    pub convergence_tolerance: Real,
    /// A factored diagonal below this makes the matrix singular.
    pub min_linear_diagonal: Real,
    /// Iteration cap on minor steps per major step.
    pub max_minor_steps: usize,
    /// Islands larger than this disable per-island decomposition for the
    /// step and the system is factored as a single block.
    pub decomposition_limit: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            name: "network".into(),
            convergence_tolerance: 1e-3,
            min_linear_diagonal: 1e-3,
            max_minor_steps: 20,
            decomposition_limit: usize::MAX,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> SolverResult<()> {
        let fail = |what| {
            Err(SolverError::InvalidConfig {
                name: self.name.clone(),
                what,
            })
        };
        if !(self.convergence_tolerance > 0.0) {
            return fail("convergence tolerance must be positive");
        }
        if !(self.min_linear_diagonal > 0.0) {
            return fail("minimum linear diagonal must be positive");
        }
        if self.max_minor_steps < 1 {
            return fail("max minor steps must be at least 1");
        }
        if self.decomposition_limit < 1 {
            return fail("decomposition limit must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SolverConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_tolerance_rejected() {
        let config = SolverConfig {
            convergence_tolerance: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
