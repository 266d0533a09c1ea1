//! Cringe filter: the quality gate a draft must pass before it is posted.
//!
//! One structured model call scores a tweet between 0 and 1 and explains
//! why. The reply must parse into exactly a score and a reason; anything
//! else is an error, never a silent pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::openai::{LanguageModel, Schema};
use crate::prompts::cringe_prompt;

/// Parsed reply of the scoring call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CringeScore {
    pub score: f64,
    pub reason: String,
}

/// Outcome of gating one draft.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub rejected: bool,
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("cringe score reply is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("cringe score {0} is outside 0..=1")]
    OutOfRange(f64),
}

/// Schema the scoring call is constrained to.
pub fn cringe_schema() -> Schema {
    Schema {
        name: "cringe_level",
        schema: json!({
            "type": "object",
            "properties": {
                "score": {"type": "number"},
                "reason": {"type": "string"},
            },
            "required": ["score", "reason"],
            "additionalProperties": false,
        }),
    }
}

/// Turn the structured reply into a score, or fail.
pub fn parse_score(value: Value) -> Result<CringeScore, GateError> {
    let parsed: CringeScore = serde_json::from_value(value)?;
    if !parsed.score.is_finite() || !(0.0..=1.0).contains(&parsed.score) {
        return Err(GateError::OutOfRange(parsed.score));
    }
    Ok(parsed)
}

/// A draft is rejected only when its score is strictly above the threshold.
pub fn is_rejected(score: f64, threshold: f64) -> bool {
    score > threshold
}

pub struct QualityGate {
    model: Arc<dyn LanguageModel>,
    threshold: f64,
}

impl QualityGate {
    pub fn new(model: Arc<dyn LanguageModel>, threshold: f64) -> Self {
        QualityGate { model, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score `tweet` with one structured model call.
    pub async fn analyze(&self, tweet: &str) -> Result<CringeScore> {
        let reply = self
            .model
            .complete_structured(&cringe_prompt(tweet), &cringe_schema())
            .await
            .context("cringe scoring call")?;
        Ok(parse_score(reply)?)
    }

    pub async fn evaluate(&self, tweet: &str) -> Result<Verdict> {
        let CringeScore { score, reason } = self.analyze(tweet).await?;
        Ok(Verdict {
            rejected: is_rejected(score, self.threshold),
            score,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallKind, ScriptedModel};

    #[test]
    fn threshold_is_exclusive() {
        assert!(!is_rejected(0.7, 0.7));
        assert!(is_rejected(0.7000001, 0.7));
        assert!(!is_rejected(0.0, 0.0));
        assert!(is_rejected(1.0, 0.99));
    }

    #[test]
    fn well_formed_scores_parse() {
        let parsed = parse_score(json!({"score": 0.25, "reason": "mild"})).unwrap();
        assert_eq!(
            parsed,
            CringeScore {
                score: 0.25,
                reason: "mild".to_string()
            }
        );
    }

    #[test]
    fn partial_or_extra_fields_are_rejected() {
        assert!(matches!(
            parse_score(json!({"score": 0.25})),
            Err(GateError::Malformed(_))
        ));
        assert!(matches!(
            parse_score(json!({"score": "high", "reason": "x"})),
            Err(GateError::Malformed(_))
        ));
        assert!(matches!(
            parse_score(json!({"score": 0.1, "reason": "x", "mood": "smug"})),
            Err(GateError::Malformed(_))
        ));
    }

    #[test]
    fn scores_outside_the_unit_range_are_rejected() {
        assert!(matches!(
            parse_score(json!({"score": 1.5, "reason": "off the charts"})),
            Err(GateError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_score(json!({"score": -0.1, "reason": "negative"})),
            Err(GateError::OutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn evaluate_applies_the_threshold() {
        let model = Arc::new(ScriptedModel::relevant().with_scores([0.5, 0.51]));
        let gate = QualityGate::new(model.clone(), 0.5);

        let passed = gate.evaluate("fine tweet").await.unwrap();
        assert!(!passed.rejected);
        assert_eq!(passed.score, 0.5);

        let rejected = gate.evaluate("worse tweet").await.unwrap();
        assert!(rejected.rejected);
        let prompts = model.prompts(CallKind::Structured);
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("worse tweet"));
    }

    #[tokio::test]
    async fn unparseable_reply_raises() {
        let model = Arc::new(ScriptedModel::relevant().with_raw_scores([json!({"reason": "?"})]));
        let gate = QualityGate::new(model, 0.7);
        let err = gate.evaluate("tweet").await.unwrap_err();
        assert!(err.downcast_ref::<GateError>().is_some());
    }
}
