//! Ideal-gas mixture state.
//!
//! Pressure is kPa, temperature K, mass kg, enthalpy kJ/kg, heat kW. All
//! fluids in the engine are mixtures over a shared species table carried
//! by an `Arc<FluidConfig>`, regardless of how many constituents are
//! actually present.

use std::sync::Arc;

use nf_core::{Real, EPS};
use serde::{Deserialize, Serialize};

use crate::error::{FluidError, FluidResult};
use crate::species::{Species, GAS_CONSTANT};
use crate::trace::TraceConfig;

/// Species table shared by every fluid object in one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidConfig {
    pub species: Vec<Species>,
    pub trace: Option<TraceConfig>,
}

impl FluidConfig {
    pub fn new(species: Vec<Species>) -> FluidResult<Self> {
        if species.is_empty() {
            return Err(FluidError::InvalidConfig {
                what: "species list is empty",
            });
        }
        Ok(Self {
            species,
            trace: None,
        })
    }

    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn num_species(&self) -> usize {
        self.species.len()
    }
}

/// Initial state for a fluid object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FluidInput {
    /// K
    pub temperature: Real,
    /// kPa
    pub pressure: Real,
    /// kg/s
    pub flow_rate: Real,
    /// kg
    pub mass: Real,
    pub mass_fractions: Vec<Real>,
}

impl FluidInput {
    /// Pure single-species state at the given temperature and pressure.
    pub fn pure(temperature: Real, pressure: Real) -> Self {
        Self {
            temperature,
            pressure,
            flow_rate: 0.0,
            mass: 0.0,
            mass_fractions: vec![1.0],
        }
    }
}

/// A mixture of the configured species with an ideal-gas equation of state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fluid {
    #[serde(skip, default = "default_config")]
    config: Arc<FluidConfig>,
    mass: Real,
    mass_fractions: Vec<Real>,
    temperature: Real,
    pressure: Real,
    flow_rate: Real,
    /// Stored specific enthalpy, kJ/kg. Updated when temperature or the
    /// mixture changes, so callers can read the pre-update value during
    /// flow integration.
    specific_enthalpy: Real,
}

fn default_config() -> Arc<FluidConfig> {
    Arc::new(FluidConfig {
        species: vec![Species::Air],
        trace: None,
    })
}

impl Fluid {
    pub fn new(config: Arc<FluidConfig>, input: &FluidInput) -> FluidResult<Self> {
        if input.mass_fractions.len() != config.num_species() {
            return Err(FluidError::InvalidConfig {
                what: "mass fraction count does not match species count",
            });
        }
        if input.mass_fractions.iter().any(|&x| x < 0.0) {
            return Err(FluidError::InvalidConfig {
                what: "negative mass fraction",
            });
        }
        let sum: Real = input.mass_fractions.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(FluidError::InvalidConfig {
                what: "mass fractions do not sum to 1",
            });
        }
        let mut fluid = Self {
            config,
            mass: input.mass,
            mass_fractions: input.mass_fractions.clone(),
            temperature: input.temperature,
            pressure: input.pressure,
            flow_rate: input.flow_rate,
            specific_enthalpy: 0.0,
        };
        fluid.specific_enthalpy = fluid.compute_specific_enthalpy(input.temperature);
        Ok(fluid)
    }

    pub fn config(&self) -> &Arc<FluidConfig> {
        &self.config
    }

    pub fn mass(&self) -> Real {
        self.mass
    }

    pub fn mass_fractions(&self) -> &[Real] {
        &self.mass_fractions
    }

    pub fn temperature(&self) -> Real {
        self.temperature
    }

    pub fn pressure(&self) -> Real {
        self.pressure
    }

    pub fn flow_rate(&self) -> Real {
        self.flow_rate
    }

    pub fn specific_enthalpy(&self) -> Real {
        self.specific_enthalpy
    }

    /// Mixture molecular weight, kg/kgmol. Zero for an empty mixture.
    pub fn mweight(&self) -> Real {
        let mut sum = 0.0;
        for (x, s) in self.mass_fractions.iter().zip(&self.config.species) {
            sum += x / s.molecular_weight();
        }
        if sum <= EPS {
            0.0
        } else {
            1.0 / sum
        }
    }

    /// Mixture specific heat at constant pressure, kJ/(kg·K).
    pub fn specific_heat(&self) -> Real {
        self.mass_fractions
            .iter()
            .zip(&self.config.species)
            .map(|(x, s)| x * s.specific_heat())
            .sum()
    }

    /// Adiabatic index cp/cv of the mixture.
    pub fn gamma(&self) -> Real {
        let cp = self.specific_heat();
        let mw = self.mweight();
        if mw <= EPS {
            return 1.0;
        }
        let cv = cp - GAS_CONSTANT / mw;
        if cv <= EPS {
            1.0
        } else {
            cp / cv
        }
    }

    /// Moles of the current contents, kgmol.
    pub fn mole(&self) -> Real {
        let mw = self.mweight();
        if mw <= EPS {
            0.0
        } else {
            self.mass / mw
        }
    }

    /// Density at the given temperature and pressure, kg/m³.
    pub fn compute_density(&self, temperature: Real, pressure: Real) -> Real {
        let mw = self.mweight();
        if mw <= EPS || temperature <= EPS {
            return 0.0;
        }
        pressure * mw / (GAS_CONSTANT * temperature)
    }

    /// Density at the current state, kg/m³.
    pub fn density(&self) -> Real {
        self.compute_density(self.temperature, self.pressure)
    }

    /// Pressure at the given temperature and density, kPa.
    pub fn compute_pressure(&self, temperature: Real, density: Real) -> Real {
        let mw = self.mweight();
        if mw <= EPS {
            return 0.0;
        }
        density * GAS_CONSTANT * temperature / mw
    }

    /// Inverse enthalpy lookup: temperature for the given specific enthalpy.
    pub fn compute_temperature(&self, enthalpy: Real) -> Real {
        let cp = self.specific_heat();
        if cp <= EPS {
            self.temperature
        } else {
            enthalpy / cp
        }
    }

    /// Specific enthalpy of the current mixture at the given temperature.
    pub fn compute_specific_enthalpy(&self, temperature: Real) -> Real {
        self.specific_heat() * temperature
    }

    pub fn set_mass(&mut self, mass: Real) {
        self.mass = mass;
    }

    pub fn set_mass_and_fractions(&mut self, mass: Real, fractions: &[Real]) {
        self.mass = mass;
        self.mass_fractions.copy_from_slice(fractions);
        self.specific_enthalpy = self.compute_specific_enthalpy(self.temperature);
    }

    pub fn set_temperature(&mut self, temperature: Real) {
        self.temperature = temperature;
        self.specific_enthalpy = self.compute_specific_enthalpy(temperature);
    }

    pub fn set_pressure(&mut self, pressure: Real) {
        self.pressure = pressure;
    }

    pub fn set_flow_rate(&mut self, flow_rate: Real) {
        self.flow_rate = flow_rate;
    }

    /// Empty the fluid: zero mass, fractions and flow rate. Temperature and
    /// pressure are left in place for the next accumulation to overwrite.
    pub fn reset_state(&mut self) {
        self.mass = 0.0;
        self.flow_rate = 0.0;
        for x in &mut self.mass_fractions {
            *x = 0.0;
        }
        self.specific_enthalpy = 0.0;
    }

    /// Copy another fluid's state into this one (shared config assumed).
    pub fn set_state(&mut self, other: &Fluid) {
        self.mass = other.mass;
        self.mass_fractions.copy_from_slice(&other.mass_fractions);
        self.temperature = other.temperature;
        self.pressure = other.pressure;
        self.flow_rate = other.flow_rate;
        self.specific_enthalpy = other.specific_enthalpy;
    }

    /// Blend an incoming fluid into this accumulation state, weighting by
    /// flow rate. Used by nodes to collect the mixture of all inflows.
    pub fn add_state(&mut self, other: &Fluid, flow_rate: Real) {
        let total = self.flow_rate + flow_rate;
        if total.abs() <= EPS {
            return;
        }
        let w_old = self.flow_rate / total;
        let w_new = flow_rate / total;
        for (x, xo) in self.mass_fractions.iter_mut().zip(&other.mass_fractions) {
            *x = *x * w_old + *xo * w_new;
        }
        let enthalpy = self.specific_enthalpy * w_old + other.specific_enthalpy * w_new;
        self.flow_rate = total;
        // Temperature from the blended enthalpy and the blended mixture.
        let t = self.compute_temperature(enthalpy);
        self.temperature = t;
        self.specific_enthalpy = self.compute_specific_enthalpy(t);
    }

    /// Mass-weighted mixture update: combine `old_mass` of the current
    /// contents with `in_mass` of the inflow fluid, leaving temperature for
    /// the caller's enthalpy bookkeeping.
    pub fn mix_masses(&mut self, old_mass: Real, inflow: &Fluid, in_mass: Real) {
        let new_mass = (old_mass + in_mass).max(EPS);
        for (x, xi) in self.mass_fractions.iter_mut().zip(&inflow.mass_fractions) {
            *x = (*x * old_mass + *xi * in_mass) / new_mass;
        }
        normalize_fractions(&mut self.mass_fractions);
        self.mass = new_mass;
    }

    /// Remove negative or dirty-zero fractions and renormalize. Returns
    /// true when anything changed.
    pub fn normalize(&mut self) -> bool {
        normalize_fractions(&mut self.mass_fractions)
    }
}

/// Clamp negative entries to zero and rescale to sum 1. Returns true when
/// the array was modified. An all-zero array is left untouched.
pub(crate) fn normalize_fractions(fractions: &mut [Real]) -> bool {
    let mut changed = false;
    for x in fractions.iter_mut() {
        if *x < 0.0 {
            *x = 0.0;
            changed = true;
        }
    }
    let sum: Real = fractions.iter().sum();
    if sum <= EPS {
        return changed;
    }
    if (sum - 1.0).abs() > EPS {
        for x in fractions.iter_mut() {
            *x /= sum;
        }
        changed = true;
    }
    changed
}

/// Temperature after isentropic expansion or compression from `p1` to
/// `p2`, blended toward the current temperature by `scale` in [0, 1].
pub fn isentropic_temperature(scale: Real, p1: Real, p2: Real, fluid: &Fluid) -> Real {
    let t = fluid.temperature();
    if scale <= 0.0 || p1 <= EPS || p2 <= EPS {
        return t;
    }
    let gamma = fluid.gamma();
    if gamma <= 1.0 {
        return t;
    }
    let t2 = t * (p2 / p1).powf((gamma - 1.0) / gamma);
    t + scale * (t2 - t)
}
