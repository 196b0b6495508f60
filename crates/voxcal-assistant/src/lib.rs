//! Orchestration facade for voxcal.
//!
//! Ties the calendar session and per-conversation slot filling into one
//! scheduling turn, and carries the binary's configuration and tracing setup.

pub mod bootstrap;
pub mod config;
pub mod scheduling_assistant;

pub use bootstrap::init_tracing;
pub use config::{AssistantConfig, CliDisplayMode};
pub use scheduling_assistant::{
    SchedulingAssistant, TurnOutcome, CREATE_FAILED_MESSAGE, END_BEFORE_START_MESSAGE,
    LOGIN_REQUIRED_MESSAGE,
};
