//! Trace compound bookkeeping, separate from the bulk fluid.
//!
//! Trace compounds ride along with bulk flows in quantities too small to
//! affect the mixture properties, so they are tracked as standalone masses
//! on each capacitive node.

use nf_core::{Real, EPS};
use serde::{Deserialize, Serialize};

use crate::error::{FluidError, FluidResult};

/// Names of the trace compounds carried by a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    pub names: Vec<String>,
}

impl TraceConfig {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn num_types(&self) -> usize {
        self.names.len()
    }
}

/// Per-node trace compound masses, kg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceCompounds {
    masses: Vec<Real>,
}

impl TraceCompounds {
    pub fn new(config: &TraceConfig) -> Self {
        Self {
            masses: vec![0.0; config.num_types()],
        }
    }

    pub fn masses(&self) -> &[Real] {
        &self.masses
    }

    pub fn set_mass(&mut self, index: usize, mass: Real) -> FluidResult<()> {
        let slot = self.masses.get_mut(index).ok_or(FluidError::OutOfBounds {
            what: "trace compound index out of range",
        })?;
        *slot = mass;
        Ok(())
    }

    /// Zero every compound mass.
    pub fn set_masses_zero(&mut self) {
        for m in &mut self.masses {
            *m = 0.0;
        }
    }

    /// Remove the fraction of each compound carried away by a bulk outflow
    /// of `out_moles` from contents holding `content_moles`.
    pub fn flow_out(&mut self, out_moles: Real, content_moles: Real) {
        if content_moles <= EPS {
            return;
        }
        let keep = (1.0 - out_moles / content_moles).clamp(0.0, 1.0);
        for m in &mut self.masses {
            *m *= keep;
        }
    }

    /// Integrate standalone inflow rates (kg/s) over the step.
    pub fn flow_in(&mut self, rates: &[Real], dt: Real) {
        for (m, r) in self.masses.iter_mut().zip(rates) {
            *m += r * dt;
        }
    }

    /// Clamp compound masses non-negative.
    pub fn limit_positive(&mut self) {
        for m in &mut self.masses {
            if *m < 0.0 {
                *m = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TraceConfig {
        TraceConfig::new(vec!["CO".into(), "NH3".into()])
    }

    #[test]
    fn flow_in_and_out() {
        let mut tc = TraceCompounds::new(&config());
        tc.flow_in(&[1.0e-6, 2.0e-6], 10.0);
        assert!((tc.masses()[0] - 1.0e-5).abs() < 1e-18);

        // Half the contents flow out, half of each compound leaves.
        tc.flow_out(0.5, 1.0);
        assert!((tc.masses()[0] - 0.5e-5).abs() < 1e-18);
        assert!((tc.masses()[1] - 1.0e-5).abs() < 1e-18);
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut tc = TraceCompounds::new(&config());
        assert!(tc.set_mass(5, 1.0).is_err());
    }

    #[test]
    fn limit_positive_clamps() {
        let mut tc = TraceCompounds::new(&config());
        tc.flow_in(&[-1.0, 0.0], 1.0);
        tc.limit_positive();
        assert_eq!(tc.masses()[0], 0.0);
    }
}
