//! Support Router: turns support-mailbox issue reports into GitHub issues
//! placed at the top of the ZenHub "New Issues" pipeline.

pub mod classifier;
pub mod config;
pub mod error;
pub mod github;
pub mod mailbox;
pub mod normalizer;
pub mod router;
pub mod zenhub;

pub use config::RouterConfig;
pub use error::{Error, Result};
pub use router::{IssueRouter, MessageOutcome, RunReport};
