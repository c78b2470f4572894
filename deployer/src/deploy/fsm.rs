//! Finite state machine for the update pipeline

use crate::models::deployment::StepName;

/// State of one pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Not dispatched yet
    Pending,

    /// Command in flight
    Running,

    /// Command exited 0
    Succeeded,

    /// Command failed or timed out
    Failed,
}

/// Step event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// Hand the step to the executor
    Dispatch,

    /// The executor reported success
    Succeed,

    /// The executor reported failure
    Fail,
}

/// Pipeline FSM over [`StepName::SEQUENCE`].
///
/// Steps run strictly in order. Once a step fails the pipeline is halted:
/// no later step can be dispatched.
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    states: [StepState; 4],
    halted: bool,
}

impl PipelineFsm {
    /// Create a new FSM with every step pending
    pub fn new() -> Self {
        Self {
            states: [StepState::Pending; 4],
            halted: false,
        }
    }

    fn index(step: StepName) -> usize {
        match step {
            StepName::Status => 0,
            StepName::Config => 1,
            StepName::Pull => 2,
            StepName::Up => 3,
        }
    }

    /// Get the state of a step
    pub fn state(&self, step: StepName) -> StepState {
        self.states[Self::index(step)]
    }

    /// True once a step failed
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True when every step succeeded
    pub fn is_complete(&self) -> bool {
        self.states.iter().all(|s| *s == StepState::Succeeded)
    }

    /// The step to dispatch next, if the pipeline may continue
    pub fn next_step(&self) -> Option<StepName> {
        if self.halted {
            return None;
        }
        for step in StepName::SEQUENCE {
            match self.state(step) {
                StepState::Succeeded => continue,
                StepState::Pending => return Some(step),
                StepState::Running | StepState::Failed => return None,
            }
        }
        None
    }

    /// Process an event for `step` and transition its state
    pub fn process(&mut self, step: StepName, event: StepEvent) -> Result<(), String> {
        let current = self.state(step);
        let new_state = match (current, event) {
            (StepState::Pending, StepEvent::Dispatch) if self.next_step() == Some(step) => {
                StepState::Running
            }
            (StepState::Running, StepEvent::Succeed) => StepState::Succeeded,
            (StepState::Running, StepEvent::Fail) => {
                self.halted = true;
                StepState::Failed
            }
            (state, event) => {
                return Err(format!(
                    "Invalid transition for step {}: {:?} -> {:?}",
                    step, state, event
                ));
            }
        };

        self.states[Self::index(step)] = new_state;
        Ok(())
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
