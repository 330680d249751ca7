//! Best-effort source code analysis.
//!
//! The control surface talks to an [`Analyzer`] only through the trait, so
//! the backend can be swapped (or left unavailable) without touching the
//! facade. Three backends ship:
//!
//! - [`UnavailableAnalyzer`]: always reports unavailable.
//! - [`LocalAnalyzer`]: offline heuristics, see [`lint`].
//! - [`GeminiAnalyzer`]: local heuristics plus an AI review.

pub mod lint;
pub mod review;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use lint::LocalAnalyzer;
pub use review::GeminiAnalyzer;

use crate::config::{AnalysisBackend, AnalysisConfig};

/// Errors reported by analyzers.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// The backend is switched off or lacks a credential.
    #[error("analyzer not configured: {0}")]
    NotConfigured(String),

    /// A built-in rule failed to compile.
    #[error("invalid analysis rule: {0}")]
    Rule(#[from] regex::Error),

    /// The review request could not be sent or timed out.
    #[error("review request failed: {0}")]
    Request(String),

    /// The review service answered with something unusable.
    #[error("unexpected review response: {0}")]
    BadResponse(String),
}

/// Result type for analyzer operations.
pub type Result<T> = std::result::Result<T, AnalyzerError>;

/// Location and message of a source that does not parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxIssue {
    /// What is wrong.
    pub msg: String,
    /// 1-based line.
    pub lineno: usize,
    /// 1-based column.
    pub offset: usize,
}

/// Size metrics for a source that parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CodeMetrics {
    /// Number of lines.
    pub lines: usize,
    /// Number of function definitions.
    pub functions: usize,
    /// Number of class definitions.
    pub classes: usize,
}

/// Category of a [`Note`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// Lines containing TODO or FIXME.
    Todos,
    /// Lines over the configured length limit.
    LongLines,
    /// `except:` clauses without an exception type.
    BareExcept,
}

/// A finding, with the 1-based lines it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    /// What was found.
    #[serde(rename = "type")]
    pub kind: NoteKind,
    /// Where it was found.
    pub lines: Vec<usize>,
}

/// The result of analyzing one source text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CodeReport {
    /// Set when the source does not parse; nothing else is computed then.
    pub syntax_error: Option<SyntaxIssue>,
    /// Size metrics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CodeMetrics>,
    /// Findings, in a fixed order.
    pub notes: Vec<Note>,
    /// Free-form review text from an AI backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_review: Option<String>,
}

impl CodeReport {
    /// Lines recorded for a note kind, if any.
    #[must_use]
    pub fn note(&self, kind: NoteKind) -> Option<&[usize]> {
        self.notes
            .iter()
            .find(|n| n.kind == kind)
            .map(|n| n.lines.as_slice())
    }
}

/// A code review backend.
#[async_trait]
pub trait Analyzer: Send + Sync + Debug {
    /// Backend name (for logging).
    fn name(&self) -> &'static str;

    /// Analyze `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce a report.
    async fn analyze(&self, source: &str) -> Result<CodeReport>;
}

/// An analyzer that is never available.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableAnalyzer;

#[async_trait]
impl Analyzer for UnavailableAnalyzer {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn analyze(&self, _source: &str) -> Result<CodeReport> {
        Err(AnalyzerError::NotConfigured(
            "code analysis is disabled".to_string(),
        ))
    }
}

/// Build the analyzer selected by configuration.
///
/// # Errors
///
/// Returns an error if a backend cannot be constructed.
pub fn from_config(config: &AnalysisConfig) -> Result<Arc<dyn Analyzer>> {
    Ok(match config.backend {
        AnalysisBackend::Disabled => Arc::new(UnavailableAnalyzer),
        AnalysisBackend::Local => Arc::new(LocalAnalyzer::from_config(config)?),
        AnalysisBackend::Gemini => Arc::new(GeminiAnalyzer::from_config(config)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_analyzer() {
        let err = UnavailableAnalyzer.analyze("x = 1").await.unwrap_err();
        assert!(matches!(err, AnalyzerError::NotConfigured(_)));
    }

    #[test]
    fn test_from_config_selects_backend() {
        let mut config = AnalysisConfig::default();
        assert_eq!(from_config(&config).unwrap().name(), "local");

        config.backend = AnalysisBackend::Disabled;
        assert_eq!(from_config(&config).unwrap().name(), "unavailable");

        config.backend = AnalysisBackend::Gemini;
        assert_eq!(from_config(&config).unwrap().name(), "gemini");
    }

    #[test]
    fn test_report_serialization() {
        let report = CodeReport {
            syntax_error: None,
            metrics: Some(CodeMetrics {
                lines: 3,
                functions: 1,
                classes: 0,
            }),
            notes: vec![Note {
                kind: NoteKind::BareExcept,
                lines: vec![2],
            }],
            ai_review: None,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "syntax_error": null,
                "metrics": {"lines": 3, "functions": 1, "classes": 0},
                "notes": [{"type": "bare_except", "lines": [2]}],
            })
        );
        assert_eq!(report.note(NoteKind::BareExcept), Some(&[2][..]));
        assert_eq!(report.note(NoteKind::Todos), None);
    }
}
