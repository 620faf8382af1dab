//! Switch/breaker link with priority-gated trip logic.

use nf_core::{Real, EPS_F32};
use nf_graph::NetworkNode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::contract::{Link, SolutionResult};
use crate::core::LinkCore;
use crate::error::{LinkError, LinkResult};
use crate::trip::{TripLogic, TripMgr, TripSense};

/// Configuration for a switch link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    /// Closed-position resistance.
    pub resistance: Real,
    /// Priority of this switch's trips in the network, >= 1.
    pub trip_priority: usize,
}

/// Initial state for a switch link. Trip limits of zero disable the
/// corresponding trip function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchInput {
    /// true = closed
    pub position: bool,
    pub position_command: bool,
    pub reset_trips_command: bool,
    pub under_voltage_trip_limit: Real,
    pub under_voltage_trip_reset: Real,
    pub over_voltage_trip_limit: Real,
    pub over_voltage_trip_reset: Real,
    pub pos_over_current_trip_limit: Real,
    pub neg_over_current_trip_limit: Real,
}

/// A commandable breaker: a 2×2 conductance stamp when closed, with
/// voltage and current trip functions that open it. The trip functions
/// latch on any converged minor step; the owned trip manager serializes
/// when a latched trip may actually fire against the network's
/// converged-step counter, so competing trips fire in priority order.
/// Voltage trips re-close automatically when their reset limit clears,
/// unless the position command was pulled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Switch {
    core: LinkCore,
    pub malf_fail_closed: bool,
    pub malf_fail_open: bool,
    resistance: Real,
    position: bool,
    position_command: bool,
    reset_trips_command: bool,
    under_voltage_trip: TripLogic,
    under_voltage_reset: TripLogic,
    over_voltage_trip: TripLogic,
    over_voltage_reset: TripLogic,
    pos_over_current_trip: TripLogic,
    neg_over_current_trip: TripLogic,
    trip_mgr: TripMgr,
    just_tripped: bool,
}

impl Switch {
    pub fn new(
        config: SwitchConfig,
        input: SwitchInput,
        ports: [usize; 2],
        num_nodes: usize,
    ) -> LinkResult<Self> {
        if config.resistance < EPS_F32 {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "resistance is below epsilon",
            });
        }
        if input.under_voltage_trip_reset < input.under_voltage_trip_limit {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "undervolt trip reset < trip limit",
            });
        }
        if input.over_voltage_trip_limit != 0.0
            && input.over_voltage_trip_reset > input.over_voltage_trip_limit
        {
            return Err(LinkError::InitFailure {
                link: config.name,
                cause: "overvolt trip reset > trip limit",
            });
        }
        let priority = config.trip_priority;
        // The manager owns the priority; the trip functions latch on any
        // converged step and wait for their turn.
        let trip_mgr = TripMgr::new(format!("{}_trip_mgr", config.name), priority)?;
        let core = LinkCore::new(config.name, ports.to_vec(), num_nodes)?;
        Ok(Self {
            core,
            malf_fail_closed: false,
            malf_fail_open: false,
            resistance: config.resistance,
            position: input.position,
            position_command: input.position_command,
            reset_trips_command: input.reset_trips_command,
            under_voltage_trip: TripLogic::new(
                TripSense::Below,
                input.under_voltage_trip_limit,
                1,
            ),
            under_voltage_reset: TripLogic::new(
                TripSense::Above,
                input.under_voltage_trip_reset,
                priority,
            ),
            over_voltage_trip: TripLogic::new(TripSense::Above, input.over_voltage_trip_limit, 1),
            over_voltage_reset: TripLogic::new(
                TripSense::Below,
                input.over_voltage_trip_reset,
                priority,
            ),
            pos_over_current_trip: TripLogic::new(
                TripSense::Above,
                input.pos_over_current_trip_limit,
                1,
            ),
            neg_over_current_trip: TripLogic::new(
                TripSense::Below,
                input.neg_over_current_trip_limit,
                1,
            ),
            trip_mgr,
            just_tripped: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.position
    }

    pub fn is_tripped(&self) -> bool {
        self.under_voltage_trip.is_tripped()
            || self.over_voltage_trip.is_tripped()
            || self.pos_over_current_trip.is_tripped()
            || self.neg_over_current_trip.is_tripped()
    }

    pub fn is_waiting_to_trip(&self) -> bool {
        self.trip_mgr.is_waiting_to_trip()
    }

    pub fn set_position_command(&mut self, closed: bool) {
        self.position_command = closed;
    }

    pub fn command_reset_trips(&mut self) {
        self.reset_trips_command = true;
    }

    fn reset_trips(&mut self) {
        self.just_tripped = false;
        self.trip_mgr.reset_trips();
        self.under_voltage_trip.reset_trip();
        self.under_voltage_reset.reset_trip();
        self.over_voltage_trip.reset_trip();
        self.over_voltage_reset.reset_trip();
        self.pos_over_current_trip.reset_trip();
        self.neg_over_current_trip.reset_trip();
    }

    /// Quietly re-apply the same limits `new` validates, in case state was
    /// poked to invalid values between updates.
    fn apply_constraints(&mut self) {
        if self.resistance < EPS_F32 {
            self.resistance = EPS_F32;
        }
        if self.under_voltage_reset.limit() < self.under_voltage_trip.limit() {
            self.under_voltage_reset
                .set_limit(self.under_voltage_trip.limit());
        }
        if self.over_voltage_trip.limit() != 0.0
            && self.over_voltage_reset.limit() > self.over_voltage_trip.limit()
        {
            self.over_voltage_reset
                .set_limit(self.over_voltage_trip.limit());
        }
    }

    /// Update position from command, malfunctions and trip state. Runs
    /// before the network solution each minor step.
    fn update_state(&mut self) {
        self.apply_constraints();

        // An open command clears trips.
        if self.is_tripped() && !self.position_command {
            self.reset_trips();
        }
        if self.reset_trips_command {
            self.reset_trips();
            self.reset_trips_command = false;
        }

        if self.malf_fail_closed {
            self.position = true;
        } else if self.malf_fail_open {
            self.position = false;
        } else if !(self.is_tripped() || self.trip_mgr.is_waiting_to_trip()) {
            self.position = self.position_command;
        }
    }

    /// Update the trip logic from the solved current and input voltage.
    /// Runs after the network solution on each converged minor step.
    fn update_trips(&mut self, current: Real, voltage: Real, converged_step: usize) -> SolutionResult {
        self.just_tripped = false;

        if converged_step == 0 {
            return SolutionResult::Delay;
        }

        let voltage_tripped =
            self.under_voltage_trip.is_tripped() || self.over_voltage_trip.is_tripped();
        let current_tripped =
            self.pos_over_current_trip.is_tripped() || self.neg_over_current_trip.is_tripped();

        if voltage_tripped && !(self.malf_fail_open || current_tripped) {
            // Tripped open on voltage: check the reset functions. A reset
            // firing rejects the solution and clears its trip.
            let mut result = SolutionResult::Confirm;
            if self.under_voltage_trip.is_tripped()
                && self
                    .under_voltage_reset
                    .check_for_trip(&mut result, voltage, converged_step)
            {
                self.under_voltage_reset.reset_trip();
                self.under_voltage_trip.reset_trip();
                warn!(
                    switch = self.core.name(),
                    voltage, converged_step, "input under-voltage trip reset"
                );
            }
            if self.over_voltage_trip.is_tripped()
                && self
                    .over_voltage_reset
                    .check_for_trip(&mut result, voltage, converged_step)
            {
                self.over_voltage_reset.reset_trip();
                self.over_voltage_trip.reset_trip();
                warn!(
                    switch = self.core.name(),
                    voltage, converged_step, "input over-voltage trip reset"
                );
            }

            if result == SolutionResult::Reject {
                self.just_tripped = true;
                self.trip_mgr.reset_trips();
                // On voltage-trip reset the switch closes again if still
                // commanded closed.
                if self.position_command {
                    self.position = true;
                }
            }
            result
        } else if self.position_command && !self.is_tripped() && !self.malf_fail_closed {
            // Latch any violated trip function, then let the manager
            // decide whether this converged step is this switch's turn.
            let mut raw = SolutionResult::Confirm;
            self.under_voltage_trip
                .check_for_trip(&mut raw, voltage, converged_step);
            self.over_voltage_trip
                .check_for_trip(&mut raw, voltage, converged_step);
            self.pos_over_current_trip
                .check_for_trip(&mut raw, current, converged_step);
            self.neg_over_current_trip
                .check_for_trip(&mut raw, current, converged_step);

            self.trip_mgr.compute_trip_state(self.is_tripped());
            let result = self.trip_mgr.verify_time_to_trip(converged_step);
            match result {
                SolutionResult::Reject => {
                    self.just_tripped = true;
                    self.position = false;
                    warn!(
                        switch = self.core.name(),
                        current,
                        voltage,
                        converged_step,
                        under_voltage = self.under_voltage_trip.is_tripped(),
                        over_voltage = self.over_voltage_trip.is_tripped(),
                        positive_over_current = self.pos_over_current_trip.is_tripped(),
                        negative_over_current = self.neg_over_current_trip.is_tripped(),
                        "switch tripped open"
                    );
                }
                SolutionResult::Delay | SolutionResult::Confirm => {
                    // Not our turn yet: revert the latches so a higher-
                    // priority link can clear the condition first.
                    if self.trip_mgr.is_waiting_to_trip() {
                        self.under_voltage_trip.reset_trip();
                        self.over_voltage_trip.reset_trip();
                        self.pos_over_current_trip.reset_trip();
                        self.neg_over_current_trip.reset_trip();
                    }
                }
            }
            result
        } else {
            SolutionResult::Confirm
        }
    }

    fn build_conductance(&mut self) {
        let conductance = if self.position {
            self.core.apply_blockage(1.0 / self.resistance)
        } else {
            0.0
        };
        self.core.stamp_conductance(conductance);
    }

    fn current(&self) -> Real {
        self.core.delta_potential() * self.core.admittance_at(0, 0)
    }
}

impl<N: NetworkNode> Link<N> for Switch {
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
        self.update_state();
        self.build_conductance();
    }

    fn minor_step(&mut self, _dt: Real, _minor_step: usize, _nodes: &mut [N]) {
        self.update_state();
        self.build_conductance();
    }

    fn confirm_solution_acceptable(
        &mut self,
        converged_step: usize,
        _absolute_step: usize,
    ) -> SolutionResult {
        if converged_step == 0 {
            return SolutionResult::Delay;
        }
        let current = self.current();
        let voltage = self.core.potential(0);
        self.update_trips(current, voltage, converged_step)
    }

    fn compute_flows(&mut self, _dt: Real, nodes: &mut [N]) {
        let drop = self.core.delta_potential();
        self.core.set_potential_drop(drop);
        self.core.set_flux(drop * self.core.admittance_at(0, 0));
        self.core.compute_power();
        self.core.transport_flux(nodes);
    }

    fn restart(&mut self) {
        self.trip_mgr.reset_trips();
        self.just_tripped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(priority: usize, oc_limit: Real) -> Switch {
        Switch::new(
            SwitchConfig {
                name: format!("brk_p{priority}"),
                resistance: 0.01,
                trip_priority: priority,
            },
            SwitchInput {
                position: true,
                position_command: true,
                pos_over_current_trip_limit: oc_limit,
                ..Default::default()
            },
            [0, 1],
            3,
        )
        .unwrap()
    }

    #[test]
    fn closed_switch_conducts_open_does_not() {
        let mut sw = breaker(1, 0.0);
        sw.update_state();
        sw.build_conductance();
        assert!(sw.core.admittance_at(0, 0) > 0.0);

        sw.set_position_command(false);
        sw.update_state();
        sw.build_conductance();
        assert_eq!(sw.core.admittance_at(0, 0), 0.0);
    }

    #[test]
    fn over_current_trips_at_priority() {
        let mut sw = breaker(2, 10.0);
        sw.update_state();
        sw.build_conductance();

        // Overcurrent below the priority gate: the manager holds the
        // trip and the latch is reverted.
        assert_eq!(sw.update_trips(50.0, 100.0, 1), SolutionResult::Delay);
        assert!(sw.is_waiting_to_trip());
        assert!(!sw.is_tripped());
        assert!(sw.is_closed());

        // At priority: trip open.
        assert_eq!(sw.update_trips(50.0, 100.0, 2), SolutionResult::Reject);
        assert!(sw.just_tripped);
        assert!(!sw.is_closed());
        assert!(sw.is_tripped());
    }

    #[test]
    fn waiting_trip_forgotten_when_condition_clears() {
        let mut sw = breaker(3, 10.0);
        sw.update_state();
        sw.build_conductance();

        assert_eq!(sw.update_trips(50.0, 100.0, 1), SolutionResult::Delay);
        assert!(sw.is_waiting_to_trip());

        // A higher-priority link cleared the overcurrent before this
        // switch's turn: no trip, wait state dropped.
        assert_eq!(sw.update_trips(1.0, 100.0, 2), SolutionResult::Confirm);
        assert!(!sw.is_waiting_to_trip());
        assert!(!sw.is_tripped());
        assert!(sw.is_closed());
    }

    #[test]
    fn open_command_clears_trips() {
        let mut sw = breaker(1, 10.0);
        sw.update_trips(50.0, 100.0, 1);
        assert!(sw.is_tripped());

        sw.set_position_command(false);
        sw.update_state();
        assert!(!sw.is_tripped());
    }

    #[test]
    fn fail_malfs_override_command() {
        let mut sw = breaker(1, 0.0);
        sw.malf_fail_open = true;
        sw.update_state();
        assert!(!sw.is_closed());

        sw.malf_fail_open = false;
        sw.malf_fail_closed = true;
        sw.set_position_command(false);
        sw.update_state();
        assert!(sw.is_closed());
    }

    #[test]
    fn invalid_config_rejected() {
        assert!(Switch::new(
            SwitchConfig {
                name: "bad".into(),
                resistance: 0.0,
                trip_priority: 1,
            },
            SwitchInput::default(),
            [0, 1],
            3,
        )
        .is_err());

        assert!(Switch::new(
            SwitchConfig {
                name: "bad".into(),
                resistance: 1.0,
                trip_priority: 0,
            },
            SwitchInput::default(),
            [0, 1],
            3,
        )
        .is_err());
    }
}
