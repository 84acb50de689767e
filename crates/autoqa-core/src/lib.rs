#![allow(clippy::doc_markdown)]

//! autoqa-core - checklist extraction, test manifests and CI reconciliation
//!
//! This crate holds the deterministic half of AutoQA: everything that turns
//! issue text, pull request diffs and CI test reports into checklists,
//! manifests, compliance reports and merge decisions. Provider access,
//! persistence and text enrichment are consumed through traits so the same
//! pipeline runs against GitHub in the daemon and against local files in
//! the CLI.
//!
//! # Pipeline
//!
//! ```text
//! issue text --> checklist::extract_items ------> Checklist (C1..Cn)
//!                                                     |
//! PR diff ----> manifest::ManifestGenerator ------> TestManifest (T1..Tn)
//!                                                     |
//! JUnit XML --> ingest::ingest_reports -----------> CiRunResults
//!                                                     |
//!               reconcile::Reconciler ------------> ComplianceReport (v1..vn)
//!                                                     |
//!               gate::evaluate -------------------> MergeDecision
//! ```
//!
//! # Modules
//!
//! - [`model`]: Documents exchanged between stages
//! - [`events`]: Inbound event records and their classification
//! - [`checklist`]: Acceptance-criteria extraction and optional enrichment
//! - [`manifest`]: Diff symbol extraction, test proposal and linkage
//! - [`ingest`]: JUnit parsing into normalized outcomes
//! - [`reconcile`]: Outcome matching and compliance scoring
//! - [`gate`]: Merge eligibility and idempotent merge execution
//! - [`forge`]: Provider trait and an in-memory provider
//! - [`store`]: Persistence trait and an in-memory store
//! - [`github`]: Installation token provider trait and cache
//! - [`retry`]: Bounded retries with backoff and effect lookups
//! - [`config`]: TOML configuration with environment overrides
//! - [`log`]: Secret redaction for logs and comments
//! - [`error`]: Failure taxonomy shared by the stages

pub mod checklist;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod forge;
pub mod gate;
pub mod github;
pub mod ingest;
pub mod log;
pub mod manifest;
pub mod model;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod text;
