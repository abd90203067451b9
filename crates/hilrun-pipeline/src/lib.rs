//! hilrun pipeline engine
//!
//! This crate provides the generic engine that hosts deploy, boot and test
//! steps. It knows nothing about any specific deployment method.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 JobRunner                    │
//! │   Created -> Validated | Invalid             │
//! │           -> Running -> Complete|Incomplete  │
//! │                    │                         │
//! │                    ▼                         │
//! │  ┌────────────────────────────────────────┐  │
//! │  │ Pipeline (root)                        │  │
//! │  │  1 action                              │  │
//! │  │  2 composite ── Pipeline               │  │
//! │  │                  2.1 action            │  │
//! │  │                  2.2 action            │  │
//! │  └────────────────────────────────────────┘  │
//! │                    │                         │
//! │        JobContext: Job + NamespaceStore      │
//! │        Job: definition, device, protocols    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Validation walks the tree pre-order and collects every error. Run walks
//! it in the same order, threading a connection handle and a deadline.
//! Actions exchange data only through the [`NamespaceStore`].

pub mod action;
pub mod deadline;
pub mod error;
pub mod events;
pub mod job;
pub mod namespace;
pub mod pipeline;
pub mod protocol;
pub mod runner;

pub use action::*;
pub use deadline::*;
pub use error::*;
pub use events::*;
pub use job::*;
pub use namespace::*;
pub use pipeline::*;
pub use protocol::*;
pub use runner::*;
