// src/exec/mod.rs

//! Remote-call layer.
//!
//! `stafcmd` elements submit `(location, service, request)` triples through
//! a [`RemoteCallBackend`]; completions come back to the owning job as
//! `JobEvent::RequestCompleted`.
//!
//! - [`backend`] provides the `RemoteCallBackend` trait and the production
//!   `LocalServiceBackend`.
//! - [`executor_loop`] owns the loop that tracks in-flight requests and
//!   cancels them on demand.
//! - [`task_runner`] runs a single request against one of the built-in
//!   local services.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{LocalServiceBackend, RemoteCallBackend};
pub use executor_loop::spawn_executor;
