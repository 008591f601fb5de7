//! Stream consumers.
//!
//! Each configured stream gets one [`ConsumerRunner`]: a poll loop that claims
//! tasks, hands them to the stream's [`TaskHandler`] and settles each one with
//! an acknowledgement, a delayed requeue or a dead letter. Runners for
//! different streams run concurrently; within a runner, tasks are handled one
//! at a time in claim order.
//!
//! # Module Structure
//!
//! - [`config`]: batch size, timeouts, attempts and backoff
//! - [`handler`]: the handler trait and the per-stream handlers
//! - [`runner`]: the poll loop and its settlement rules

pub mod config;
pub mod handler;
pub mod runner;


pub use config::RunnerConfig;
pub use handler::{
    CommandExecutor, CommandSpec, EMULATION_RUN_ID_VAR, EmulationHandler, Emulator,
    PublicationHandler, TEST_RUN_ID_VAR, TaskHandler, TestExecutor, TestRunHandler,
};
pub use runner::{BatchOutcome, ConsumerRunner, RunnerState, RunnerStats};
