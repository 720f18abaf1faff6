//! Traffic Warden - outbound traffic guard for cloud servers
//!
//! Every cycle the warden:
//! - Lists servers for each provider credential
//! - Classifies outbound traffic against the included quota
//! - Shuts down servers past the kill threshold
//! - Keeps one chat message per report slot up to date

pub mod chat;
pub mod config;
pub mod error;
pub mod executor;
pub mod pointer;
pub mod provider;
pub mod reconciler;
pub mod report;
pub mod scheduler;
pub mod usage;
pub mod warden;

pub use error::{Result, WardenError};
