//! Overhave worker - queue consumers, scenario publication and feature
//! synchronization for a BDD test management service.
//!
//! Tasks for test runs, emulation sessions and scenario publication arrive on
//! durable streams. One consumer runner per stream claims them, hands them to
//! the stream's handler and settles each with an acknowledgement, a delayed
//! requeue or a dead letter.

pub mod auth;
pub mod config;
pub mod error;
pub mod persistence;
pub mod publication;
pub mod queue;
pub mod retry;
pub mod server;
pub mod sync;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;
