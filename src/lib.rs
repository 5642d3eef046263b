//! Credit ledger and job-orchestration core for the video generation
//! service.
//!
//! Two cooperating pieces:
//! - [`ledger::Ledger`] authorizes and settles credit consumption for gated
//!   actions, across the database track (authenticated users, durable
//!   balance) and the cookie track (anonymous visitors, client-held token).
//! - [`orchestrator::Orchestrator`] creates batches of asynchronous
//!   generation jobs against the external provider and drives polling until
//!   each job reaches a terminal state.
//!
//! Web handlers are expected to resolve the caller's [`model::Identity`]
//! upstream and consume this crate as a library.

pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod usage;
pub mod visitor;

pub use error::{Error, Result};
