//! Mission phases and the actions each transition triggers.
//!
//! This module is pure: it decides what happens, the supervisor does it.

use serde::Serialize;

/// Mission phase. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionState {
    Idle = 0,
    LiftOff = 1,
    StartOfExperiment = 2,
    StartOfDataStorage = 3,
    Terminated = 4,
}

/// A debounced event line from the launch vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    LiftOff,
    StartOfExperiment,
    StartOfDataStorage,
}

impl Signal {
    pub fn label(self) -> &'static str {
        match self {
            Signal::LiftOff => "LO",
            Signal::StartOfExperiment => "SOE",
            Signal::StartOfDataStorage => "SODS",
        }
    }
}

/// What can move the mission forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Signal(Signal),
    /// Operator reboot/shutdown/rebuild or a termination signal.
    Terminate,
}

/// Side effect requested by a transition, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ForceBurnLow,
    StartCamera,
    StopCamera,
    StartProducers,
    StopProducers,
    FireBurnWire,
    StartSupervision,
    StopSupervision,
    StartHeartbeat,
    StopHeartbeat,
    /// Report the new state to the other node.
    AnnounceState,
}

impl MissionState {
    pub fn as_str(self) -> &'static str {
        match self {
            MissionState::Idle => "idle",
            MissionState::LiftOff => "lift_off",
            MissionState::StartOfExperiment => "start_of_experiment",
            MissionState::StartOfDataStorage => "start_of_data_storage",
            MissionState::Terminated => "terminated",
        }
    }

    /// Short form used in status packets.
    pub fn label(self) -> &'static str {
        match self {
            MissionState::Idle => "IDLE",
            MissionState::LiftOff => "LO",
            MissionState::StartOfExperiment => "SOE",
            MissionState::StartOfDataStorage => "SODS",
            MissionState::Terminated => "TERM",
        }
    }

    /// The event line polled in this state, if any.
    pub fn awaited_signal(self) -> Option<Signal> {
        match self {
            MissionState::Idle => Some(Signal::LiftOff),
            MissionState::LiftOff => Some(Signal::StartOfExperiment),
            MissionState::StartOfExperiment => Some(Signal::StartOfDataStorage),
            MissionState::StartOfDataStorage | MissionState::Terminated => None,
        }
    }

    /// Whether producers are supervised (checked and respawned) in this state.
    pub fn supervises_producers(self) -> bool {
        matches!(
            self,
            MissionState::LiftOff | MissionState::StartOfExperiment
        )
    }

    /// Apply `event`. Returns the next state when the event moves the mission
    /// forward by exactly one phase (or terminates it); `None` otherwise.
    pub fn next(self, event: Event) -> Option<MissionState> {
        match (self, event) {
            (MissionState::Terminated, _) => None,
            (_, Event::Terminate) => Some(MissionState::Terminated),
            (state, Event::Signal(signal)) if state.awaited_signal() == Some(signal) => {
                Some(match signal {
                    Signal::LiftOff => MissionState::LiftOff,
                    Signal::StartOfExperiment => MissionState::StartOfExperiment,
                    Signal::StartOfDataStorage => MissionState::StartOfDataStorage,
                })
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for MissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed action set for a transition. The burn-wire is always forced low
/// first; `flight_mode` decides whether entering the experiment phase fires
/// it.
pub fn transition_actions(from: MissionState, to: MissionState, flight_mode: bool) -> Vec<Action> {
    let mut actions = vec![Action::ForceBurnLow];
    match (from, to) {
        (MissionState::Idle, MissionState::LiftOff) => {
            actions.extend([Action::StartCamera, Action::StartSupervision]);
        }
        (MissionState::LiftOff, MissionState::StartOfExperiment) => {
            actions.push(Action::StartProducers);
            if flight_mode {
                actions.push(Action::FireBurnWire);
            }
        }
        (MissionState::StartOfExperiment, MissionState::StartOfDataStorage) => {
            actions.extend([
                Action::StopSupervision,
                Action::StopProducers,
                Action::StartHeartbeat,
            ]);
        }
        (_, MissionState::Terminated) => {
            actions.extend([
                Action::StopSupervision,
                Action::StopHeartbeat,
                Action::StopProducers,
                Action::StopCamera,
            ]);
        }
        _ => {}
    }
    actions.push(Action::AnnounceState);
    actions
}

/// Current phase plus the flight-mode flag that shapes its actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mission {
    state: MissionState,
    flight_mode: bool,
}

impl Mission {
    pub fn new(flight_mode: bool) -> Self {
        Self {
            state: MissionState::Idle,
            flight_mode,
        }
    }

    pub fn state(&self) -> MissionState {
        self.state
    }

    pub fn flight_mode(&self) -> bool {
        self.flight_mode
    }

    pub fn set_flight_mode(&mut self, on: bool) {
        self.flight_mode = on;
    }

    /// Feed one event. Returns the state after the event and the actions to
    /// run; the action list is empty when nothing changed.
    pub fn update(&mut self, event: Event) -> (MissionState, Vec<Action>) {
        match self.state.next(event) {
            Some(to) => {
                let actions = transition_actions(self.state, to, self.flight_mode);
                self.state = to;
                (to, actions)
            }
            None => (self.state, Vec::new()),
        }
    }
}
