use serde::{Deserialize, Serialize};
use state_machines::state_machine;

state_machine! {
    name: ProcessingMachine,
    state: ProcessingState,
    initial: Pending,
    states: [Pending, Processing, Completed, Failed, Skipped],
    events {
        start { transition: { from: Pending, to: Processing } }
        complete { transition: { from: Processing, to: Completed } }
        fail { transition: { from: Processing, to: Failed } }
        skip {
            transition: { from: Pending, to: Skipped }
            transition: { from: Processing, to: Skipped }
        }
        retry { transition: { from: Failed, to: Pending } }
    }
}

/// A fresh machine in the `Pending` state, the only legal starting point for an
/// entity's processing lifecycle.
pub fn pending() -> ProcessingMachine<(), Pending> {
    ProcessingMachine::new(())
}

/// Wire/persistence representation of `ProcessingState`, stored alongside the entity
/// row rather than the zero-sized typed machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        ProcessingStatus::Pending
    }
}
