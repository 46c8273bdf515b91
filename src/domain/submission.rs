//! The unit of work: one user-authored issue report.
//!
//! A submission carries free-form text, a reference to a recorded voice
//! memo, or both. It is created on the authoring screen and either sent
//! immediately or parked in the durable queue until connectivity returns.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing a submission
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("submission has neither text nor an audio recording")]
    Empty,
}

/// Per-process tiebreak so two submissions created in the same
/// millisecond still get distinct, ordered ids.
static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Unique submission identifier, derived from the creation timestamp.
///
/// Ids are monotonic within a process and never reused: epoch
/// milliseconds plus a four-digit sequence suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    /// Allocate the next id
    pub fn next() -> Self {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
        Self(format!("{}-{:04}", Utc::now().timestamp_millis(), seq))
    }

    /// View the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pending or in-flight issue report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    /// Unique id, assigned at creation
    pub id: SubmissionId,

    /// Free-form issue text (trimmed; absent if blank)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Local path to a recorded voice memo, if one was attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<PathBuf>,

    /// Locale hint forwarded to the server for transcription/translation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,

    /// When the user created the report
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// Create a new submission, rejecting empty payloads.
    ///
    /// Whitespace-only text counts as absent; at least one of text or
    /// audio must remain after normalization.
    pub fn new(
        text: Option<String>,
        audio_ref: Option<PathBuf>,
        language_code: Option<String>,
    ) -> Result<Self, SubmissionError> {
        let text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if text.is_none() && audio_ref.is_none() {
            return Err(SubmissionError::Empty);
        }

        Ok(Self {
            id: SubmissionId::next(),
            text,
            audio_ref,
            language_code,
            created_at: Utc::now(),
        })
    }

    /// Short human-readable label for logs and status output
    pub fn summary(&self) -> String {
        match (&self.text, &self.audio_ref) {
            (Some(text), Some(audio)) => {
                format!("\"{}\" + {}", truncate(text, 32), audio.display())
            }
            (Some(text), None) => format!("\"{}\"", truncate(text, 32)),
            (None, Some(audio)) => audio.display().to_string(),
            (None, None) => "<empty>".to_string(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_submission_rejected() {
        let result = Submission::new(None, None, None);
        assert!(matches!(result, Err(SubmissionError::Empty)));

        // Whitespace-only text is still empty
        let result = Submission::new(Some("   \n".to_string()), None, None);
        assert!(matches!(result, Err(SubmissionError::Empty)));
    }

    #[test]
    fn test_text_is_trimmed() {
        let s = Submission::new(Some("  fever  ".to_string()), None, None).unwrap();
        assert_eq!(s.text.as_deref(), Some("fever"));
    }

    #[test]
    fn test_audio_only_is_valid() {
        let s = Submission::new(None, Some(PathBuf::from("rec1.wav")), None).unwrap();
        assert!(s.text.is_none());
        assert_eq!(s.audio_ref, Some(PathBuf::from("rec1.wav")));
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let a = Submission::new(Some("a".to_string()), None, None).unwrap();
        let b = Submission::new(Some("b".to_string()), None, None).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serde_round_trip() {
        let s = Submission::new(
            Some("fever".to_string()),
            Some(PathBuf::from("rec1.wav")),
            Some("en".to_string()),
        )
        .unwrap();

        let json = serde_json::to_string(&s).unwrap();
        let back: Submission = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.text, s.text);
        assert_eq!(back.audio_ref, s.audio_ref);
    }
}
