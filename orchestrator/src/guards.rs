//! Workflow guards enforced by the orchestrator itself, not the planner
//! (`spec.md` §4.7 "Workflow guards").

use serde_json::Value;

/// A `synthesize` call's decoded arguments relevant to the workflow
/// guards. The rest of the argument object passes through to the worker
/// untouched.
#[derive(Debug, Clone, Copy)]
pub struct SynthesizeRequest {
    pub requested_verse: Option<u32>,
    pub requires_preprocessing: bool,
}

impl SynthesizeRequest {
    pub fn from_arguments(arguments: &Value) -> Self {
        Self {
            requested_verse: arguments.get("verse_number").and_then(Value::as_u64).map(|v| v as u32),
            requires_preprocessing: arguments.get("target").and_then(Value::as_str) == Some("complex"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizeGuardFailure {
    NoScoreUploaded,
    PreprocessingRequiredForComplexScore,
    VerseChangeRequiresRepreprocess,
}

impl SynthesizeGuardFailure {
    pub fn code(self) -> &'static str {
        match self {
            SynthesizeGuardFailure::NoScoreUploaded => "no_score_uploaded",
            SynthesizeGuardFailure::PreprocessingRequiredForComplexScore => {
                "preprocessing_required_for_complex_score"
            }
            SynthesizeGuardFailure::VerseChangeRequiresRepreprocess => {
                "verse_change_requires_repreprocess"
            }
        }
    }
}

/// Whether the requested verse, given the score's current preprocessing
/// marker, requires a reparse (cheap, orchestrator-performed) rather than
/// an outright rejection (`spec.md` §4.7 "If no preprocess has occurred, a
/// reparse is performed instead").
pub fn verse_requires_reparse(
    requested_verse: u32,
    selected_verse_number: u32,
    preprocessed_for_verse_number: Option<u32>,
) -> bool {
    preprocessed_for_verse_number.is_none() && requested_verse != selected_verse_number
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_target_and_verse_from_arguments() {
        let args = serde_json::json!({"target": "complex", "verse_number": 2});
        let req = SynthesizeRequest::from_arguments(&args);
        assert_eq!(req.requested_verse, Some(2));
        assert!(req.requires_preprocessing);
    }

    #[test]
    fn default_target_does_not_require_preprocessing() {
        let args = serde_json::json!({});
        let req = SynthesizeRequest::from_arguments(&args);
        assert!(!req.requires_preprocessing);
        assert_eq!(req.requested_verse, None);
    }

    #[test]
    fn verse_change_before_any_preprocess_reparses() {
        assert!(verse_requires_reparse(2, 1, None));
        assert!(!verse_requires_reparse(1, 1, None));
    }

    #[test]
    fn verse_change_after_preprocess_does_not_reparse() {
        assert!(!verse_requires_reparse(2, 1, Some(1)));
    }
}
