//! autoqa-daemon - AutoQA event daemon library
//!
//! Runs the reconciliation pipeline against live provider events. Events
//! arrive as [`EventRecord`](autoqa_core::events::EventRecord)s from any
//! transport; the daemon binary reads them as newline-delimited JSON.
//!
//! # Architecture
//!
//! ```text
//! EventRecord ──► router::EventRouter ──► queue::WorkQueue ──► pipeline::Pipeline
//!                   (claim, classify)      (lanes, cancel)      │
//!                                                               ├─ github::GitHubRestForge
//!                                                               ├─ artifacts (zip → JUnit)
//!                                                               ├─ enrichment::HttpEnricher
//!                                                               └─ autoqa_core::store::Store
//! ```
//!
//! # Runtime Requirements
//!
//! The queue spawns onto the ambient tokio runtime; call into this crate
//! from within one.
//!
//! # Modules
//!
//! - [`router`]: delivery deduplication, classification and dispatch
//! - [`queue`]: keyed, bounded work queue with per-lane cancellation
//! - [`pipeline`]: issue, pull request and CI run handlers with failure
//!   dispositions
//! - [`github`]: GitHub REST provider and App authentication
//! - [`artifacts`]: CI artifact selection and report extraction
//! - [`enrichment`]: HTTP checklist enrichment

pub mod artifacts;
pub mod enrichment;
pub mod github;
pub mod pipeline;
pub mod queue;
pub mod router;
