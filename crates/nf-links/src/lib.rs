//! nf-links: the link contract and the core link library.
//!
//! Links are the active elements of a network: each one contributes a
//! small dense admittance stamp and a source vector to the system of
//! equations, may reject a solution it finds unacceptable, and transports
//! flows between its port nodes once a solution is accepted.

pub mod capacitor;
pub mod conductor;
pub mod contract;
pub mod converter;
pub mod core;
pub mod distributed;
pub mod error;
pub mod fluid_capacitor;
pub mod fluid_conductor;
pub mod potential;
pub mod selector;
pub mod source;
pub mod switch;
pub mod trip;

pub use capacitor::Capacitor;
pub use conductor::Conductor;
pub use contract::{AsAny, Link, PortDirection, SolutionResult};
pub use converter::{
    ConverterCoupling, ConverterInput, ConverterInputConfig, ConverterOutput,
    ConverterOutputConfig, LimitState, RegulatorType,
};
pub use core::{Blockage, LinkCore};
pub use distributed::{DistributedInterface, DistributedInterfaceConfig, InterfacePair, InterfaceRole};
pub use error::{LinkError, LinkResult};
pub use fluid_capacitor::FluidCapacitor;
pub use fluid_conductor::FluidConductor;
pub use potential::PotentialSource;
pub use selector::Selector;
pub use source::CurrentSource;
pub use switch::{Switch, SwitchConfig, SwitchInput};
pub use trip::{TripLogic, TripMgr, TripSense};
