//! Core domain logic for the agent panel: command execution, the action
//! result model, the branch guard, the publish flow, audits, routines, and
//! the stores that back them. Everything here is synchronous and transport
//! agnostic; the HTTP layer lives in `panel-server`.

pub mod audit;
pub mod confirm;
pub mod error;
pub mod exec;
pub mod guard;
pub mod job;
pub mod logfile;
pub mod patch;
pub mod publish;
pub mod redact;
pub mod repos;
pub mod result;
pub mod routine;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PanelError, Result};
