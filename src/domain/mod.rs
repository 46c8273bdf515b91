//! Domain types for the submission core.
//!
//! This module contains the core data structures:
//! - Submission: one user-authored issue report awaiting delivery
//! - SubmissionId: timestamp-derived unique identifier

pub mod submission;

// Re-export commonly used types
pub use submission::{Submission, SubmissionError, SubmissionId};
