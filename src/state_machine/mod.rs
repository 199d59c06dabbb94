mod item;
mod state;

pub use item::{ItemParseError, MARKER_LABEL, WorkItem, blocked_group_of, branch_for};
pub use state::{CycleSignal, ItemState, StateMachine};
