mod machine;
mod state;

pub use machine::Machine;
pub use state::{MachineStateMachine, MachineStatus, Transition, TransitionError};
