//! nf-fluids: bulk fluid state and the fluid node kind.
//!
//! This crate carries the fluid interface the network core touches: an
//! ideal-gas mixture state (pressure in kPa, temperature in K, enthalpy in
//! kJ/kg), optional trace compounds, and the capacitive/pass-through fluid
//! node with its conservation machinery. A real-gas property backend is a
//! host concern and stays outside the engine.

pub mod error;
pub mod node;
pub mod species;
pub mod state;
pub mod trace;

pub use error::{FluidError, FluidResult};
pub use node::FluidNode;
pub use species::{Species, GAS_CONSTANT};
pub use state::{isentropic_temperature, Fluid, FluidConfig, FluidInput};
pub use trace::{TraceCompounds, TraceConfig};
