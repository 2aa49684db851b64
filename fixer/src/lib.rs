//! Plan/execute/replan loop for automated GitHub issue fixes.
//!
//! The crate drives a language model through a bounded control loop: a
//! planner decomposes the goal into an ordered step list, a step executor
//! works through one step at a time with side-effecting tools, and a
//! replanner revises the remaining work after every step until it declares
//! a final response or the iteration budget runs out. Every run terminates
//! with a structured [`core::types::RunOutcome`]; failures are folded into
//! it instead of escaping to the caller.
//!
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (loop state, outcome
//!   synthesis). No I/O, fully testable in isolation.
//! - **[`model`] / [`tools`]**: Collaborator seams (language-model
//!   backends, the GitHub-backed tool registry). Trait-based to enable
//!   scripted fakes in tests.
//! - **[`io`]**: Side-effecting support (config, run artifacts, child
//!   processes).
//!
//! Orchestration modules ([`planner`], [`step`], [`replanner`],
//! [`looping`]) coordinate core logic with the collaborators.

pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod model;
pub mod planner;
pub mod prompts;
pub mod replanner;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
