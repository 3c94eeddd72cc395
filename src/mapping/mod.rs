//! Action side of the pipeline
//!
//! Turns logical button transitions into timed output actions. Every
//! physical control ends up as one or more [`button::LogicalButton`]s; their
//! slots drive the [`output::OutputDispatcher`], their deferred work is queued
//! on the [`scheduler::Scheduler`] and mouse movement is integrated by the
//! [`mouse::MouseDispatcher`]. All of it runs on the poll thread.

pub mod button;
pub mod engine;
pub mod error;
pub mod mouse;
pub mod output;
pub mod scheduler;
pub mod slot;
pub mod tuning;
pub mod turbo;

pub use button::{ButtonKey, ControlOrigin, LogicalButton, SetChange, SetChangeCondition};
pub use engine::{ActionContext, ActionEngine, ActivationEffects};
pub use error::MappingError;
pub use output::{ChannelOutput, OutputAction, OutputBackend, OutputDispatcher};
pub use tuning::{OutputTuningConfig, TuningSnapshot};
