//! Join orchestration
//!
//! [`orchestrator`] decides how two participants are connected, performs the
//! underlying media operation off the caller's task and keeps both join graphs
//! symmetric. Its results are [`Joint`] / [`Unjoint`] completion tasks.

pub mod orchestrator;
pub mod task;

pub use task::{CompletionTask, Joint, Unjoint};
