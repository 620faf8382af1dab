//! Power converter input/output link pair.
//!
//! The output side regulates voltage, current or power on its node and
//! reports its drawn power back to the input side; the input side
//! presents that power as a load on its own node and supplies the input
//! voltage. The two sides exchange data through a shared coupling handle
//! and may live anywhere in the same network.

use std::sync::{Arc, Mutex};

use nf_core::{limit_range, Real, CONDUCTANCE_LIMIT, EPS, EPS_F32};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};

use crate::contract::{Link, PortDirection, SolutionResult};
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};
use crate::trip::{TripLogic, TripSense};

/// Output regulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegulatorType {
    /// Regulate output voltage to the setpoint.
    Voltage,
    /// Like `Voltage`, with the setpoint scaled by the input voltage.
    Transformer,
    /// Regulate output current to the setpoint.
    Current,
    /// Regulate output power to the setpoint.
    Power,
}

/// Active limiting mode of a converter output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LimitState {
    #[default]
    NoLimit,
    LimitOv,
    LimitUv,
    LimitOc,
}

#[derive(Debug, Default)]
struct CouplingInner {
    input_voltage: Real,
    input_voltage_valid: bool,
    input_power: Real,
    input_registered: bool,
    output_registered: bool,
}

/// Shared handle pairing a converter input with a converter output.
///
/// Whichever side registers second leads the interface and drives the
/// data exchange each minor step. The mutex keeps links `Send` so whole
/// networks can run on worker threads.
#[derive(Debug, Clone, Default)]
pub struct ConverterCoupling {
    inner: Arc<Mutex<CouplingInner>>,
}

impl ConverterCoupling {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_input(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.input_registered = true;
        inner.input_voltage_valid = true;
        inner.output_registered
    }

    fn register_output(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.output_registered = true;
        inner.input_registered
    }

    fn set_input_voltage(&self, voltage: Real, valid: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.input_voltage = voltage;
        inner.input_voltage_valid = valid;
    }

    fn input_voltage(&self) -> (Real, bool) {
        let inner = self.inner.lock().unwrap();
        (inner.input_voltage, inner.input_voltage_valid)
    }

    fn set_input_power(&self, power: Real) {
        self.inner.lock().unwrap().input_power = power;
    }

    fn input_power(&self) -> Real {
        self.inner.lock().unwrap().input_power
    }
}

/// Configuration for the input side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterInputConfig {
    pub name: String,
    pub trip_priority: usize,
    /// Zero disables the trip.
    pub under_voltage_trip_limit: Real,
    /// Zero disables the trip.
    pub over_voltage_trip_limit: Real,
}

/// Converter input side: a constant-power load on its node, supplying the
/// sensed input voltage to its paired output.
#[derive(Debug)]
pub struct ConverterInput {
    core: LinkCore,
    enabled: bool,
    input_power: Real,
    input_voltage_valid: bool,
    under_voltage_trip: TripLogic,
    over_voltage_trip: TripLogic,
    leads_interface: bool,
    coupling: ConverterCoupling,
}

impl ConverterInput {
    pub fn new(
        config: ConverterInputConfig,
        enabled: bool,
        input_power: Real,
        coupling: ConverterCoupling,
        port0: usize,
        num_nodes: usize,
    ) -> LinkResult<Self> {
        if config.trip_priority < 1 {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "trip priority can't be less than 1",
            });
        }
        if input_power < 0.0 {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "input power < 0",
            });
        }
        let priority = config.trip_priority;
        let core = LinkCore::new(config.name, vec![port0], num_nodes)?;
        let leads_interface = coupling.register_input();
        coupling.set_input_power(input_power);
        Ok(Self {
            core,
            enabled,
            input_power,
            input_voltage_valid: true,
            under_voltage_trip: TripLogic::new(
                TripSense::Below,
                config.under_voltage_trip_limit,
                priority,
            ),
            over_voltage_trip: TripLogic::new(
                TripSense::Above,
                config.over_voltage_trip_limit,
                priority,
            ),
            leads_interface,
            coupling,
        })
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_tripped(&self) -> bool {
        self.under_voltage_trip.is_tripped() || self.over_voltage_trip.is_tripped()
    }

    pub fn leads_interface(&self) -> bool {
        self.leads_interface
    }

    fn update_load(&mut self) {
        self.input_power = self.coupling.input_power();
        let voltage = self.core.potential(0);
        let draw = if self.enabled && !self.is_tripped() && voltage > EPS_F32 {
            self.input_power / voltage
        } else {
            0.0
        };
        self.core.set_source(0, -draw);
        // Publish the sensed input voltage for the output side.
        self.coupling
            .set_input_voltage(voltage, self.input_voltage_valid);
    }
}

impl<N: NetworkNode> Link<N> for ConverterInput {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn is_non_linear(&self) -> bool {
        true
    }

    fn step(&mut self, _dt: Real, _nodes: &mut [N]) {
        self.input_voltage_valid = true;
        self.update_load();
    }

    fn minor_step(&mut self, _dt: Real, _minor_step: usize, _nodes: &mut [N]) {
        self.update_load();
    }

    fn confirm_solution_acceptable(
        &mut self,
        converged_step: usize,
        _absolute_step: usize,
    ) -> SolutionResult {
        // The verdict depends on converged values; hold off on first pass.
        if converged_step == 0 {
            return SolutionResult::Delay;
        }
        let mut result = SolutionResult::Confirm;
        let voltage = self.core.potential(0);
        self.under_voltage_trip
            .check_for_trip(&mut result, voltage, converged_step);
        self.over_voltage_trip
            .check_for_trip(&mut result, voltage, converged_step);

        // A fresh power demand from the output side means our stamped
        // load is stale; hold acceptance until the next minor step has
        // picked it up.
        if self.enabled && !self.is_tripped() {
            let pending = self.coupling.input_power();
            if (pending - self.input_power).abs() > 1e-6 * pending.abs().max(1.0) {
                result = result.worst(SolutionResult::Delay);
            }
        }

        self.input_voltage_valid = result != SolutionResult::Reject;
        self.coupling
            .set_input_voltage(voltage, self.input_voltage_valid);
        result
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        let draw = -self.core.source()[0];
        self.core.set_flux(-draw);
        self.core.set_potential_drop(self.core.potential(0));
        let n0 = self.core.port_node(0);
        if draw > 0.0 {
            let _ = nodes[n0].base_mut().collect_outflux(draw);
            self.core.set_port_direction(0, PortDirection::Sink);
        } else {
            self.core.set_port_direction(0, PortDirection::None);
        }
    }

    fn restart(&mut self) {
        self.input_voltage_valid = true;
    }
}

/// Configuration for the output side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterOutputConfig {
    pub name: String,
    pub regulator_type: RegulatorType,
    /// Conductance of the output channel.
    pub output_conductance: Real,
    /// Voltage conversion efficiency, in (0, 1].
    pub converter_efficiency: Real,
    pub trip_priority: usize,
    /// Zero disables the trip.
    pub over_voltage_trip_limit: Real,
    /// Zero disables the trip.
    pub under_voltage_trip_limit: Real,
    /// Zero disables the trip.
    pub over_current_trip_limit: Real,
    /// Limit output current or voltage instead of tripping.
    pub enable_limiting: bool,
    /// Cap on bias/limit state flips per major step.
    pub state_flips_limit: usize,
}

impl ConverterOutputConfig {
    pub fn new(name: impl Into<String>, regulator_type: RegulatorType) -> Self {
        Self {
            name: name.into(),
            regulator_type,
            output_conductance: 100.0,
            converter_efficiency: 1.0,
            trip_priority: 2,
            over_voltage_trip_limit: 0.0,
            under_voltage_trip_limit: 0.0,
            over_current_trip_limit: 0.0,
            enable_limiting: false,
            state_flips_limit: 4,
        }
    }
}

/// Converter output side: a one-port regulated source on the output node.
///
/// Voltage regulators become current sources at the over-current limit;
/// current and power regulators become voltage sources at the over- and
/// under-voltage limits. Any limit-state or bias transition rejects the
/// solution so the network re-solves with the new source character.
#[derive(Debug)]
pub struct ConverterOutput {
    core: LinkCore,
    regulator_type: RegulatorType,
    output_conductance: Real,
    converter_efficiency: Real,
    enable_limiting: bool,
    state_flips_limit: usize,
    enabled: bool,
    input_voltage: Real,
    input_voltage_valid: bool,
    output_power_available: bool,
    setpoint: Real,
    reset_trips_command: bool,
    input_power: Real,
    input_power_valid: bool,
    output_channel_loss: Real,
    load_resistance: Real,
    total_power_loss: Real,
    over_voltage_trip: TripLogic,
    under_voltage_trip: TripLogic,
    over_current_trip: TripLogic,
    leads_interface: bool,
    reverse_bias_state: bool,
    reverse_bias_flips: usize,
    limit_state: LimitState,
    limit_state_flips: usize,
    source_voltage: Real,
    coupling: Option<ConverterCoupling>,
}

impl ConverterOutput {
    /// Create the output side. `coupling` is `None` for an output driven
    /// by externally written input voltage/power.
    pub fn new(
        config: ConverterOutputConfig,
        enabled: bool,
        input_voltage: Real,
        setpoint: Real,
        coupling: Option<ConverterCoupling>,
        port0: usize,
        num_nodes: usize,
    ) -> LinkResult<Self> {
        Self::validate(&config, input_voltage, setpoint)?;
        let core = LinkCore::new(config.name, vec![port0], num_nodes)?;
        let leads_interface = coupling.as_ref().is_some_and(|c| c.register_output());
        let priority = config.trip_priority;
        Ok(Self {
            core,
            regulator_type: config.regulator_type,
            output_conductance: config.output_conductance,
            converter_efficiency: config.converter_efficiency,
            enable_limiting: config.enable_limiting,
            state_flips_limit: config.state_flips_limit,
            enabled,
            input_voltage,
            input_voltage_valid: true,
            output_power_available: input_voltage > 0.0,
            setpoint,
            reset_trips_command: false,
            input_power: 0.0,
            input_power_valid: true,
            output_channel_loss: 0.0,
            load_resistance: 0.0,
            total_power_loss: 0.0,
            over_voltage_trip: TripLogic::new(
                TripSense::Above,
                config.over_voltage_trip_limit,
                priority,
            ),
            under_voltage_trip: TripLogic::new(
                TripSense::Below,
                config.under_voltage_trip_limit,
                priority,
            ),
            over_current_trip: TripLogic::new(
                TripSense::Above,
                config.over_current_trip_limit,
                priority,
            ),
            leads_interface,
            reverse_bias_state: false,
            reverse_bias_flips: 0,
            limit_state: LimitState::NoLimit,
            limit_state_flips: 0,
            source_voltage: 0.0,
            coupling,
        })
    }

    fn validate(
        config: &ConverterOutputConfig,
        input_voltage: Real,
        setpoint: Real,
    ) -> LinkResult<()> {
        let fail = |cause| {
            Err(LinkError::InitFailure {
                link: config.name.clone(),
                cause,
            })
        };
        if config.output_conductance < EPS {
            return fail("output conductance below epsilon");
        }
        if config.converter_efficiency < EPS {
            return fail("converter efficiency below epsilon");
        }
        if config.converter_efficiency > 1.0 {
            return fail("converter efficiency > 1");
        }
        if config.trip_priority < 1 {
            return fail("trip priority can't be less than 1");
        }
        if input_voltage < 0.0 {
            return fail("input voltage < 0");
        }
        if setpoint < 0.0 {
            return fail("setpoint < 0");
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_setpoint(&mut self, setpoint: Real) {
        self.setpoint = setpoint.max(0.0);
    }

    /// Externally drive the input voltage when there is no paired input.
    pub fn set_input_voltage(&mut self, voltage: Real) {
        self.input_voltage = voltage;
    }

    pub fn command_reset_trips(&mut self) {
        self.reset_trips_command = true;
    }

    pub fn limit_state(&self) -> LimitState {
        self.limit_state
    }

    pub fn limit_state_flips(&self) -> usize {
        self.limit_state_flips
    }

    pub fn reverse_bias_state(&self) -> bool {
        self.reverse_bias_state
    }

    pub fn reverse_bias_flips(&self) -> usize {
        self.reverse_bias_flips
    }

    pub fn input_power(&self) -> Real {
        self.input_power
    }

    pub fn total_power_loss(&self) -> Real {
        self.total_power_loss
    }

    pub fn leads_interface(&self) -> bool {
        self.leads_interface
    }

    pub fn flux(&self) -> Real {
        self.core.flux()
    }

    fn is_voltage_regulator(&self) -> bool {
        matches!(
            self.regulator_type,
            RegulatorType::Voltage | RegulatorType::Transformer
        )
    }

    pub fn is_any_trip(&self) -> bool {
        self.over_voltage_trip.is_tripped()
            || self.under_voltage_trip.is_tripped()
            || self.over_current_trip.is_tripped()
    }

    fn reset_trips(&mut self) {
        self.over_voltage_trip.reset_trip();
        self.under_voltage_trip.reset_trip();
        self.over_current_trip.reset_trip();
    }

    fn compute_flux(&mut self) {
        let flux = self.core.source()[0] - self.core.admittance_at(0, 0) * self.core.potential(0);
        self.core.set_flux(flux);
    }

    /// Load resistance estimate for power regulation, from the network
    /// capacitance (Thevenin resistance) the output node reported.
    fn estimate_load<N: NetworkNode>(&mut self, nodes: &mut [N]) {
        if self.regulator_type == RegulatorType::Power {
            let node = nodes[self.core.port_node(0)].base_mut();
            let capacitance = node.network_capacitance();
            if capacitance > EPS {
                self.load_resistance = capacitance;
            }
            node.request_network_capacitance(1.0);
        }
    }

    /// Source effects (conductance, source voltage, source current) from
    /// the regulator type and limit state.
    fn compute_regulation_sources(&mut self) -> (Real, Real) {
        let mut conductance = 0.0;
        let mut source_current = 0.0;
        if self.is_voltage_regulator() {
            if self.limit_state == LimitState::LimitOc {
                source_current = self.over_current_trip.limit();
                conductance = EPS_F32;
            } else {
                conductance = self.core.apply_blockage(self.output_conductance);
                self.source_voltage = self.setpoint;
                if self.regulator_type == RegulatorType::Transformer {
                    self.source_voltage *= self.input_voltage;
                }
            }
        } else if self.limit_state == LimitState::LimitOv {
            conductance = self.core.apply_blockage(self.output_conductance);
            self.source_voltage = self.over_voltage_trip.limit();
        } else if self.limit_state == LimitState::LimitUv {
            conductance = self.core.apply_blockage(self.output_conductance);
            self.source_voltage = self.under_voltage_trip.limit();
        } else {
            // A small conductance to Ground helps the network converge
            // when the downstream circuit is open-circuited. It is not
            // subject to the blockage malfunction.
            conductance = EPS_F32;
            if self.regulator_type == RegulatorType::Current {
                source_current = if self.limit_state == LimitState::LimitOc {
                    self.core.apply_blockage(self.over_current_trip.limit())
                } else {
                    self.core.apply_blockage(self.setpoint)
                };
            } else if self.setpoint > 0.0 && self.load_resistance > 0.0 {
                source_current = self
                    .core
                    .apply_blockage((self.setpoint / self.load_resistance).sqrt());
            }
        }
        (conductance, source_current)
    }

    fn update_contributions<N: NetworkNode>(&mut self, minor_step: usize, nodes: &mut [N]) {
        self.source_voltage = 0.0;
        if self.core.is_port_on_ground(0) {
            self.input_voltage = 0.0;
            self.input_power = 0.0;
            self.core.set_admittance(0, 0, 0.0);
            self.core.set_source(0, 0.0);
            return;
        }

        self.compute_input_power();

        // If we lead the interface, drive the exchange with the input
        // side; otherwise it has already pushed our input voltage.
        if let Some(coupling) = &self.coupling {
            let (voltage, valid) = coupling.input_voltage();
            self.input_voltage = voltage;
            self.input_voltage_valid = valid;
            if self.leads_interface {
                coupling.set_input_power(self.input_power);
            }
        } else {
            self.input_voltage_valid = true;
        }

        // Whether the output channel is powered is latched on the first
        // minor step and used for the entire major step.
        if minor_step == 1 {
            self.output_power_available = self.input_voltage > 0.0;
        }

        self.estimate_load(nodes);
        let mut conductance = 0.0;
        let mut source_current = 0.0;
        self.source_voltage = 0.0;
        if self.enabled && self.output_power_available && !self.is_any_trip() {
            (conductance, source_current) = self.compute_regulation_sources();
        }

        // Reverse bias zeroes the conductance to block negative current.
        if self.reverse_bias_state {
            conductance = 0.0;
        }

        let conductance = limit_range(0.0, conductance, CONDUCTANCE_LIMIT);
        self.core.set_admittance(0, 0, conductance);
        self.core
            .set_source(0, self.source_voltage * conductance + source_current);
    }

    /// Output current, powers and losses from the last solution.
    fn compute_input_power(&mut self) {
        if self.core.is_port_on_ground(0) || !self.input_power_valid {
            self.core.set_flux(0.0);
            self.output_channel_loss = 0.0;
            self.input_power = 0.0;
            self.total_power_loss = 0.0;
            return;
        }
        self.compute_flux();
        let power = self.core.flux() * self.core.potential(0);
        self.output_channel_loss =
            self.core.flux() * self.core.flux() / self.output_conductance.max(EPS);
        self.input_power = (power + self.output_channel_loss)
            / limit_range(EPS, self.converter_efficiency, 1.0);
        self.total_power_loss = self.input_power - power;
    }

    fn effective_voltage_setpoint(&self) -> Real {
        let mut setpoint = self.setpoint;
        if self.regulator_type == RegulatorType::Transformer {
            setpoint *= self.input_voltage;
        }
        setpoint
    }

    fn effective_current_setpoint(&self) -> Real {
        if self.regulator_type == RegulatorType::Current {
            self.core.apply_blockage(self.setpoint)
        } else if self.setpoint > 0.0 && self.load_resistance > 0.0 {
            self.core
                .apply_blockage((self.setpoint / self.load_resistance).sqrt())
        } else {
            0.0
        }
    }

    /// Ideal regulated voltage in the current state; zero when this output
    /// cannot regulate its node voltage. Used by distributed interfaces
    /// to advertise supply strength.
    pub fn control_voltage(&self) -> Real {
        let mut result = 0.0;
        if self.core.apply_blockage(self.output_conductance) >= EPS {
            result = self.source_voltage;
            if !self.is_voltage_regulator()
                && self.enable_limiting
                && self.limit_state != LimitState::LimitOv
            {
                result = self.source_voltage.max(self.under_voltage_trip.limit());
            }
        }
        result
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Update the forward/reverse bias state, rejecting the solution when
    /// it changes. Forward→reverse flips are only allowed on a converged
    /// minor step, a limited number of times per major step; reverse→
    /// forward may happen on any minor step.
    fn update_bias(
        &mut self,
        result: &mut SolutionResult,
        converged_step: usize,
        no_reverse_bias: bool,
    ) {
        let last_bias = self.reverse_bias_state;

        if self.limit_state == LimitState::LimitOc
            || (self.limit_state == LimitState::NoLimit && !self.is_voltage_regulator())
        {
            // Not acting as a voltage source: bias is meaningless.
            self.reverse_bias_state = false;
        } else if self.core.potential(0) <= self.source_voltage {
            self.reverse_bias_state = false;
        } else if converged_step > 0
            && self.reverse_bias_flips < self.state_flips_limit
            && !(self.reverse_bias_state || no_reverse_bias)
        {
            self.reverse_bias_state = true;
            self.reverse_bias_flips += 1;
        }

        if last_bias != self.reverse_bias_state {
            self.input_power = 0.0;
            *result = SolutionResult::Reject;
        }
    }

    fn reject_with_limit_state(&mut self, result: &mut SolutionResult, state: LimitState) {
        *result = SolutionResult::Reject;
        self.limit_state = state;
        if state != LimitState::NoLimit {
            self.limit_state_flips += 1;
        }
    }

    /// Limit-state transitions for voltage regulators: NoLimit ↔ LimitOc.
    fn update_current_limit_state(
        &mut self,
        result: &mut SolutionResult,
        voltage: Real,
        current: Real,
    ) {
        let can_oc_limit =
            self.over_current_trip.limit() > 0.0 && self.limit_state_flips < self.state_flips_limit;

        if self.limit_state == LimitState::LimitOc && voltage > self.effective_voltage_setpoint() {
            self.reject_with_limit_state(result, LimitState::NoLimit);
        } else if self.limit_state == LimitState::NoLimit
            && can_oc_limit
            && current > self.over_current_trip.limit()
        {
            self.reject_with_limit_state(result, LimitState::LimitOc);
        }
    }

    /// Limit-state transitions for current/power regulators, walking
    /// between NoLimit, LimitOv, LimitUv and LimitOc as the operating
    /// point moves. Returns true when the transition should suppress an
    /// immediate flip into reverse bias.
    fn update_voltage_limit_state(
        &mut self,
        result: &mut SolutionResult,
        voltage: Real,
        current: Real,
    ) -> bool {
        let mut no_reverse_bias = false;
        let flips_ok = self.limit_state_flips < self.state_flips_limit;
        let can_ov_limit = self.over_voltage_trip.limit() > 0.0 && flips_ok;
        let can_uv_limit = self.under_voltage_trip.limit() > 0.0 && flips_ok;
        let can_oc_limit = self.over_current_trip.limit() > 0.0 && flips_ok && can_uv_limit;

        match self.limit_state {
            LimitState::LimitOc => {
                if can_ov_limit && voltage > self.over_voltage_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::LimitOv);
                } else if voltage > self.under_voltage_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::NoLimit);
                }
            }
            LimitState::LimitUv => {
                if can_oc_limit && current > self.over_current_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::LimitOc);
                } else if can_ov_limit && voltage > self.over_voltage_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::LimitOv);
                } else if voltage > self.under_voltage_trip.limit()
                    || current < self.effective_current_setpoint()
                {
                    self.reject_with_limit_state(result, LimitState::NoLimit);
                }
            }
            LimitState::LimitOv => {
                if can_uv_limit && voltage < self.under_voltage_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::LimitUv);
                } else {
                    let setpoint = self.effective_current_setpoint();
                    if current > setpoint || setpoint == 0.0 {
                        // Step down through LimitUv rather than jumping
                        // straight back to NoLimit.
                        self.reject_with_limit_state(result, LimitState::LimitUv);
                    }
                }
            }
            LimitState::NoLimit => {
                // On the transition from current source to voltage-
                // limiting source, suppress reverse bias for one minor
                // step so the voltage source gets a chance to control the
                // output.
                if can_ov_limit && voltage > self.over_voltage_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::LimitOv);
                    no_reverse_bias = true;
                } else if can_uv_limit && voltage < self.under_voltage_trip.limit() {
                    self.reject_with_limit_state(result, LimitState::LimitUv);
                    no_reverse_bias = true;
                }
            }
        }
        no_reverse_bias
    }

    fn update_limit_state(
        &mut self,
        result: &mut SolutionResult,
        voltage: Real,
        current: Real,
    ) -> bool {
        let mut no_reverse_bias = false;
        if self.enabled && self.enable_limiting {
            if self.is_voltage_regulator() {
                self.update_current_limit_state(result, voltage, current);
            } else {
                no_reverse_bias = self.update_voltage_limit_state(result, voltage, current);
            }
        } else {
            self.limit_state = LimitState::NoLimit;
        }
        no_reverse_bias
    }
}

impl<N: NetworkNode> Link<N> for ConverterOutput {
    fn core(&self) -> &LinkCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LinkCore {
        &mut self.core
    }

    fn is_non_linear(&self) -> bool {
        true
    }

    fn step(&mut self, _dt: Real, nodes: &mut [N]) {
        if self.reset_trips_command {
            self.reset_trips_command = false;
            self.reset_trips();
        }
        self.reverse_bias_flips = 0;
        self.limit_state_flips = 0;
        self.update_contributions(1, nodes);
    }

    fn minor_step(&mut self, _dt: Real, minor_step: usize, nodes: &mut [N]) {
        self.update_contributions(minor_step, nodes);
    }

    fn confirm_solution_acceptable(
        &mut self,
        converged_step: usize,
        _absolute_step: usize,
    ) -> SolutionResult {
        if self.core.is_port_on_ground(0) {
            self.input_power_valid = false;
            return SolutionResult::Confirm;
        }

        let mut result = SolutionResult::Confirm;
        self.update_bias(&mut result, converged_step, false);

        // After the network has converged, compute currents and powers and
        // check for trips and limit transitions.
        if converged_step > 0 && result != SolutionResult::Reject {
            self.compute_input_power();

            let sensed_vout = limit_range(
                -(f32::MAX as Real),
                self.core.potential(0),
                f32::MAX as Real,
            );
            let sensed_iout = limit_range(-(f32::MAX as Real), self.core.flux(), f32::MAX as Real);

            // When limiting handles a quantity, its trip is suppressed; a
            // trip priority of 1 should not be combined with limiting or a
            // false trip can accompany the limit-state change.
            if self.enabled {
                if !(self.enable_limiting && !self.is_voltage_regulator()) {
                    self.over_voltage_trip
                        .check_for_trip(&mut result, sensed_vout, converged_step);
                    self.under_voltage_trip
                        .check_for_trip(&mut result, sensed_vout, converged_step);
                }
                if !self.enable_limiting {
                    self.over_current_trip
                        .check_for_trip(&mut result, sensed_iout, converged_step);
                }
            }
            let no_reverse_bias = self.update_limit_state(&mut result, sensed_vout, sensed_iout);
            self.update_bias(&mut result, converged_step, no_reverse_bias);
        }

        self.input_power_valid = result != SolutionResult::Reject;

        // An invalid voltage from the input side means it rejected the
        // last minor step and hasn't recomputed yet.
        if let Some(coupling) = &self.coupling {
            self.input_voltage_valid = coupling.input_voltage().1;
        }
        if !self.input_voltage_valid {
            result = SolutionResult::Reject;
        }
        result
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        if self.core.is_port_on_ground(0) {
            self.core.set_flux(0.0);
            self.core.set_potential_drop(0.0);
            return;
        }
        self.compute_flux();
        self.core.set_potential_drop(-self.core.potential(0));
        let flux = self.core.flux();
        if flux > 0.0 {
            let n0 = self.core.port_node(0);
            let _ = nodes[n0].base_mut().collect_influx(flux);
            self.core.set_port_direction(0, PortDirection::Source);
        } else {
            self.core.set_port_direction(0, PortDirection::None);
        }
    }

    fn restart(&mut self) {
        self.input_voltage_valid = true;
        self.reset_trips_command = false;
        self.input_power_valid = true;
        self.output_channel_loss = 0.0;
        self.reverse_bias_state = false;
        self.reverse_bias_flips = 0;
        self.limit_state_flips = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_graph::BasicNode;

    fn nodes() -> Vec<BasicNode> {
        vec![
            BasicNode::new("out", 0.0),
            BasicNode::new("in", 0.0),
            BasicNode::new("ground", 0.0),
        ]
    }

    fn voltage_output(setpoint: Real) -> ConverterOutput {
        ConverterOutput::new(
            ConverterOutputConfig::new("cnv_out", RegulatorType::Voltage),
            true,
            120.0,
            setpoint,
            None,
            0,
            3,
        )
        .unwrap()
    }

    #[test]
    fn voltage_regulator_stamps_setpoint_source() {
        let mut out = voltage_output(100.0);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);
        assert_eq!(out.core.admittance_at(0, 0), 100.0);
        assert_eq!(out.core.source()[0], 100.0 * 100.0);
    }

    #[test]
    fn disabled_output_contributes_nothing() {
        let mut out = voltage_output(100.0);
        out.set_enabled(false);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);
        assert_eq!(out.core.admittance_at(0, 0), 0.0);
        assert_eq!(out.core.source()[0], 0.0);
    }

    #[test]
    fn no_input_voltage_means_no_output_power() {
        let mut out = voltage_output(100.0);
        out.set_input_voltage(0.0);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);
        assert!(!out.output_power_available);
        assert_eq!(out.core.source()[0], 0.0);
    }

    #[test]
    fn over_current_limit_transition_rejects() {
        let mut cfg = ConverterOutputConfig::new("cnv_out", RegulatorType::Voltage);
        cfg.enable_limiting = true;
        cfg.over_current_trip_limit = 10.0;
        let mut out = ConverterOutput::new(cfg, true, 120.0, 100.0, None, 0, 3).unwrap();
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);

        // Solved voltage sagging under a heavy load: current above limit.
        out.core.set_port_potential(0, 99.0);
        let result = Link::<BasicNode>::confirm_solution_acceptable(&mut out, 1, 2);
        assert_eq!(result, SolutionResult::Reject);
        assert_eq!(out.limit_state(), LimitState::LimitOc);
        assert_eq!(out.limit_state_flips(), 1);

        // Next minor step stamps a current source at the OC limit.
        Link::<BasicNode>::minor_step(&mut out, 0.01, 2, &mut n);
        assert!((out.core.source()[0] - 10.0).abs() < 1e-9);
        assert!(out.core.admittance_at(0, 0) < 1e-6);
    }

    #[test]
    fn reverse_bias_blocks_backfeed() {
        let mut out = voltage_output(100.0);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);

        // Node voltage above the source: flip to reverse on a converged
        // step and reject.
        out.core.set_port_potential(0, 150.0);
        let result = Link::<BasicNode>::confirm_solution_acceptable(&mut out, 1, 2);
        assert_eq!(result, SolutionResult::Reject);
        assert!(out.reverse_bias_state());
        assert_eq!(out.reverse_bias_flips(), 1);

        // Re-stamped with zero conductance.
        Link::<BasicNode>::minor_step(&mut out, 0.01, 2, &mut n);
        assert_eq!(out.core.admittance_at(0, 0), 0.0);

        // Voltage back below source: recover to forward on any minor step.
        out.core.set_port_potential(0, 50.0);
        let result = Link::<BasicNode>::confirm_solution_acceptable(&mut out, 0, 3);
        assert_eq!(result, SolutionResult::Reject);
        assert!(!out.reverse_bias_state());
    }

    #[test]
    fn bias_flips_capped_per_major_step() {
        let mut out = voltage_output(100.0);
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);

        for _ in 0..10 {
            out.core.set_port_potential(0, 150.0);
            let _ = Link::<BasicNode>::confirm_solution_acceptable(&mut out, 1, 2);
            out.core.set_port_potential(0, 50.0);
            let _ = Link::<BasicNode>::confirm_solution_acceptable(&mut out, 0, 3);
        }
        assert!(out.reverse_bias_flips() <= 4);

        // A new major step resets the counter.
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);
        assert_eq!(out.reverse_bias_flips(), 0);
    }

    #[test]
    fn coupling_pairs_input_and_output() {
        let coupling = ConverterCoupling::new();
        let mut n = nodes();

        let mut input = ConverterInput::new(
            ConverterInputConfig {
                name: "cnv_in".into(),
                trip_priority: 1,
                under_voltage_trip_limit: 0.0,
                over_voltage_trip_limit: 0.0,
            },
            true,
            0.0,
            coupling.clone(),
            1,
            3,
        )
        .unwrap();

        let out = ConverterOutput::new(
            ConverterOutputConfig::new("cnv_out", RegulatorType::Voltage),
            true,
            0.0,
            100.0,
            Some(coupling.clone()),
            0,
            3,
        )
        .unwrap();

        // Output registered second: it leads the interface.
        assert!(out.leads_interface());
        assert!(!input.leads_interface());

        // The input publishes its node voltage for the output to consume.
        input.core.set_port_potential(0, 28.0);
        Link::<BasicNode>::minor_step(&mut input, 0.01, 2, &mut n);
        assert_eq!(coupling.input_voltage().0, 28.0);
    }

    #[test]
    fn current_regulator_voltage_limits() {
        let mut cfg = ConverterOutputConfig::new("cnv_out", RegulatorType::Current);
        cfg.enable_limiting = true;
        cfg.over_voltage_trip_limit = 110.0;
        cfg.under_voltage_trip_limit = 20.0;
        let mut out = ConverterOutput::new(cfg, true, 120.0, 50.0, None, 0, 3).unwrap();
        let mut n = nodes();
        Link::<BasicNode>::step(&mut out, 0.01, &mut n);

        // Unlimited: a current source at the setpoint.
        assert!((out.core.source()[0] - 50.0).abs() < 1e-9);

        // Open-circuited output runs the voltage up past the OV limit.
        out.core.set_port_potential(0, 150.0);
        let result = Link::<BasicNode>::confirm_solution_acceptable(&mut out, 1, 2);
        assert_eq!(result, SolutionResult::Reject);
        assert_eq!(out.limit_state(), LimitState::LimitOv);

        // Re-stamped as a voltage source at the OV limit.
        Link::<BasicNode>::minor_step(&mut out, 0.01, 2, &mut n);
        assert_eq!(out.core.admittance_at(0, 0), 100.0);
        assert!((out.core.source()[0] - 110.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn efficiency_bounds_validated() {
        let mut cfg = ConverterOutputConfig::new("bad", RegulatorType::Voltage);
        cfg.converter_efficiency = 1.5;
        assert!(ConverterOutput::new(cfg, true, 0.0, 0.0, None, 0, 3).is_err());

        let mut cfg = ConverterOutputConfig::new("bad", RegulatorType::Voltage);
        cfg.converter_efficiency = 0.0;
        assert!(ConverterOutput::new(cfg, true, 0.0, 0.0, None, 0, 3).is_err());
    }

    #[test]
    fn constant_power_input_draws_from_node() {
        let coupling = ConverterCoupling::new();
        coupling.set_input_power(280.0);
        let mut input = ConverterInput::new(
            ConverterInputConfig {
                name: "cnv_in".into(),
                trip_priority: 1,
                under_voltage_trip_limit: 0.0,
                over_voltage_trip_limit: 0.0,
            },
            true,
            280.0,
            coupling,
            0,
            3,
        )
        .unwrap();
        let mut n = nodes();
        input.core.set_port_potential(0, 28.0);
        Link::<BasicNode>::minor_step(&mut input, 0.01, 2, &mut n);
        // 280 W at 28 V = 10 A drawn.
        assert!((input.core.source()[0] + 10.0).abs() < 1e-9);

        Link::<BasicNode>::compute_flows(&mut input, 0.01, &mut n);
        assert!((n[0].outflux_rate() - 10.0).abs() < 1e-9);
    }
}
