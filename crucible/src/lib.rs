//! Multi-agent deliberation pipeline.
//!
//! Every unit of a project hierarchy (milestone, phase, task) is planned by a
//! creator agent and challenged by a second agent until the draft is approved
//! or the round budget runs out, at which point a tiebreaker decides. Tasks
//! then go through the same cycle for implementation and review.
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, resume selection,
//!   decision decoding, invariants). No I/O.
//! - **[`io`]**: Side-effecting operations (state store, agent processes,
//!   templates, activity log). Behind traits so tests can script them.
//!
//! Orchestration modules ([`cycle`], [`orchestrator`], [`looping`], [`init`],
//! [`status`], [`validate`]) combine the two to implement CLI commands.

pub mod core;
pub mod cycle;
pub mod error;
pub mod exit_codes;
pub mod init;
pub mod io;
pub mod logging;
pub mod looping;
pub mod orchestrator;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
