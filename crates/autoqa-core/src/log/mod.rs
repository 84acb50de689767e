//! Log hygiene helpers.
//!
//! Provider error bodies, enrichment responses and configuration values can
//! echo credentials back. Everything from outside the process passes
//! through [`redact`] (or [`redact_body`] for response bodies) before it is
//! logged or written into a comment.

mod redact;

pub use redact::{MAX_LOGGED_BODY_LEN, SecretRedactor, redact, redact_body};
