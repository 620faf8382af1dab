//! Gas species property table.

use nf_core::Real;
use serde::{Deserialize, Serialize};

/// Universal gas constant, kJ/(kgmol·K). With pressure in kPa and volume
/// in m³ this gives moles in kgmol directly: n = P·V/(R·T).
pub const GAS_CONSTANT: Real = 8.314462618;

/// Supported gas species with ideal-gas properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    N2,
    O2,
    /// Standard dry air treated as a single pseudo-species.
    Air,
    H2O,
    CO2,
    H2,
    CH4,
}

impl Species {
    /// Molecular weight, kg/kgmol.
    pub fn molecular_weight(self) -> Real {
        match self {
            Species::N2 => 28.0134,
            Species::O2 => 31.9988,
            Species::Air => 28.9651,
            Species::H2O => 18.0153,
            Species::CO2 => 44.0095,
            Species::H2 => 2.01588,
            Species::CH4 => 16.0425,
        }
    }

    /// Specific heat at constant pressure, kJ/(kg·K), near room temperature.
    pub fn specific_heat(self) -> Real {
        match self {
            Species::N2 => 1.040,
            Species::O2 => 0.918,
            Species::Air => 1.005,
            Species::H2O => 1.864,
            Species::CO2 => 0.846,
            Species::H2 => 14.304,
            Species::CH4 => 2.226,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn air_density_at_stp_is_sane() {
        // rho = P*MW/(R*T) at 101.325 kPa, 288.15 K
        let rho = 101.325 * Species::Air.molecular_weight() / (GAS_CONSTANT * 288.15);
        assert!((rho - 1.225).abs() < 0.01, "rho = {rho}");
    }
}
