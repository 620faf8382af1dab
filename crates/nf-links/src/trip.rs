//! Trip logic and the priority-gated trip manager.

use nf_core::Real;
use serde::{Deserialize, Serialize};

use crate::contract::SolutionResult;
use crate::error::{LinkError, LinkResult};

/// Which side of the limit constitutes a trip condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripSense {
    /// Trip when the sensed value exceeds the limit.
    Above,
    /// Trip when the sensed value falls below the limit.
    Below,
}

/// A single trip function: compares a sensed value against a limit and
/// latches when the network has converged far enough for its priority.
///
/// A limit of exactly zero disables the trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripLogic {
    limit: Real,
    sense: TripSense,
    priority: usize,
    tripped: bool,
}

impl TripLogic {
    pub fn new(sense: TripSense, limit: Real, priority: usize) -> Self {
        Self {
            limit,
            sense,
            priority,
            tripped: false,
        }
    }

    pub fn limit(&self) -> Real {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Real) {
        self.limit = limit;
    }

    pub fn is_enabled(&self) -> bool {
        self.limit != 0.0
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn reset_trip(&mut self) {
        self.tripped = false;
    }

    fn condition(&self, value: Real) -> bool {
        match self.sense {
            TripSense::Above => value > self.limit,
            TripSense::Below => value < self.limit,
        }
    }

    /// Check the sensed value against the trip condition, folding the
    /// outcome into `result`: `Reject` when the trip fires on this
    /// converged step, `Delay` while the condition holds but the priority
    /// gate hasn't opened yet. Returns true when the trip fires.
    pub fn check_for_trip(
        &mut self,
        result: &mut SolutionResult,
        value: Real,
        converged_step: usize,
    ) -> bool {
        let mut fired = false;
        if self.is_enabled() && !self.tripped && self.condition(value) {
            if converged_step >= self.priority {
                self.tripped = true;
                *result = result.worst(SolutionResult::Reject);
                fired = true;
            } else {
                *result = result.worst(SolutionResult::Delay);
            }
        }
        fired
    }
}

/// Serializes competing trip events across links.
///
/// Each link owns one manager; the solver's converged-step counter gates
/// when a waiting trip may fire, so concurrent trip candidates fire in
/// deterministic priority order rather than registration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripMgr {
    name: String,
    trip_occurred: bool,
    waiting_to_trip: bool,
    time_to_trip: bool,
    trip_priority: usize,
}

impl TripMgr {
    pub fn new(name: impl Into<String>, trip_priority: usize) -> LinkResult<Self> {
        let name = name.into();
        if trip_priority < 1 {
            return Err(LinkError::InitFailure {
                link: name,
                cause: "trip priority can't be less than 1",
            });
        }
        Ok(Self {
            name,
            trip_occurred: false,
            waiting_to_trip: false,
            time_to_trip: false,
            trip_priority,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_waiting_to_trip(&self) -> bool {
        self.waiting_to_trip
    }

    pub fn is_time_to_trip(&self) -> bool {
        self.time_to_trip
    }

    /// Record whether the owning link's trip condition holds, updating the
    /// waiting state.
    pub fn compute_trip_state(&mut self, tripped: bool) {
        self.trip_occurred = tripped;
        if self.trip_occurred {
            self.waiting_to_trip = !self.time_to_trip;
        } else {
            self.reset_trips();
        }
    }

    /// Verify whether the solution can be confirmed given a waiting trip:
    /// `Reject` when this manager's priority gate opens (the trip fires),
    /// `Delay` while it waits, `Confirm` when nothing is waiting.
    pub fn verify_time_to_trip(&mut self, converged_step: usize) -> SolutionResult {
        let mut result = SolutionResult::Confirm;
        if self.waiting_to_trip {
            if converged_step >= self.trip_priority {
                self.time_to_trip = true;
                result = SolutionResult::Reject;
            } else {
                self.time_to_trip = false;
                result = SolutionResult::Delay;
            }
        }
        result
    }

    pub fn reset_trips(&mut self) {
        self.waiting_to_trip = false;
        self.time_to_trip = false;
        self.trip_occurred = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_waits_below_priority_then_fires() {
        let mut trip = TripLogic::new(TripSense::Above, 10.0, 2);
        let mut result = SolutionResult::Confirm;

        assert!(!trip.check_for_trip(&mut result, 12.0, 1));
        assert_eq!(result, SolutionResult::Delay);
        assert!(!trip.is_tripped());

        assert!(trip.check_for_trip(&mut result, 12.0, 2));
        assert_eq!(result, SolutionResult::Reject);
        assert!(trip.is_tripped());

        // Latched: no further firing.
        let mut result = SolutionResult::Confirm;
        assert!(!trip.check_for_trip(&mut result, 12.0, 3));
        assert_eq!(result, SolutionResult::Confirm);
    }

    #[test]
    fn zero_limit_disables_trip() {
        let mut trip = TripLogic::new(TripSense::Above, 0.0, 1);
        let mut result = SolutionResult::Confirm;
        assert!(!trip.check_for_trip(&mut result, 1e9, 5));
        assert_eq!(result, SolutionResult::Confirm);
    }

    #[test]
    fn below_sense_trips_under_limit() {
        let mut trip = TripLogic::new(TripSense::Below, 5.0, 1);
        let mut result = SolutionResult::Confirm;
        assert!(trip.check_for_trip(&mut result, 4.0, 1));
        assert!(trip.is_tripped());
    }

    #[test]
    fn manager_priority_gates_firing() {
        let mut mgr = TripMgr::new("brk", 2).unwrap();
        mgr.compute_trip_state(true);
        assert!(mgr.is_waiting_to_trip());

        assert_eq!(mgr.verify_time_to_trip(1), SolutionResult::Delay);
        assert_eq!(mgr.verify_time_to_trip(2), SolutionResult::Reject);
        assert!(mgr.is_time_to_trip());

        // Once time-to-trip is set the link has fired; waiting clears.
        mgr.compute_trip_state(true);
        assert!(!mgr.is_waiting_to_trip());
        assert_eq!(mgr.verify_time_to_trip(3), SolutionResult::Confirm);

        // A cleared condition resets everything.
        mgr.compute_trip_state(false);
        assert!(!mgr.is_time_to_trip());
    }

    #[test]
    fn manager_rejects_priority_below_one() {
        assert!(TripMgr::new("bad", 0).is_err());
    }

    proptest::proptest! {
        #[test]
        fn trip_never_fires_below_priority(
            priority in 1usize..10,
            converged_step in 0usize..10,
            value in 10.0..1e6f64,
        ) {
            let mut trip = TripLogic::new(TripSense::Above, 5.0, priority);
            let mut result = SolutionResult::Confirm;
            let fired = trip.check_for_trip(&mut result, value, converged_step);
            proptest::prop_assert_eq!(fired, converged_step >= priority);
            proptest::prop_assert_eq!(trip.is_tripped(), converged_step >= priority);
        }
    }
}
