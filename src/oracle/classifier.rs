//! Turn classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::{OracleClient, OracleTask};
use crate::assessment::Category;
use crate::error::{OracleError, OracleResult};
use crate::prompts::{render, CLASSIFY_PROMPT};

/// How the patient's message relates to the question last asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    NormalYes,
    NormalNo,
    Drift,
    Ambiguous,
    Clarify,
}

impl Verdict {
    /// Graph edge category for this verdict.
    pub fn to_category(self) -> Category {
        match self {
            Verdict::NormalYes => Category::Yes,
            Verdict::NormalNo => Category::No,
            Verdict::Drift | Verdict::Ambiguous => Category::Other,
            Verdict::Clarify => Category::Clarify,
        }
    }

    /// Whether the message answered the question.
    pub fn is_answer(self) -> bool {
        matches!(self, Verdict::NormalYes | Verdict::NormalNo)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::NormalYes => "NORMAL_y",
            Verdict::NormalNo => "NORMAL_n",
            Verdict::Drift => "DRIFT",
            Verdict::Ambiguous => "AMBIGUOUS",
            Verdict::Clarify => "CLARIFY",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal_y" | "normal_yes" => Ok(Verdict::NormalYes),
            "normal_n" | "normal_no" => Ok(Verdict::NormalNo),
            "drift" => Ok(Verdict::Drift),
            "ambiguous" => Ok(Verdict::Ambiguous),
            "clarify" => Ok(Verdict::Clarify),
            _ => Err(format!("Unknown classification: {}", s)),
        }
    }
}

/// Question context for one classification call.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyRequest<'a> {
    pub user_text: &'a str,
    pub phase_display: &'a str,
    /// Questionnaire wording of the current node.
    pub question_original: &'a str,
    /// The assistant's last message, i.e. how the question was actually asked.
    pub last_asked: &'a str,
    pub transcript: &'a str,
}

/// Classifies a user message against the question last asked.
#[derive(Clone)]
pub struct TurnClassifier {
    oracle: OracleClient,
}

impl TurnClassifier {
    pub fn new(oracle: OracleClient) -> Self {
        Self { oracle }
    }

    pub async fn classify(&self, request: ClassifyRequest<'_>) -> OracleResult<Verdict> {
        let prompt = render(
            CLASSIFY_PROMPT,
            &[
                ("phase", request.phase_display),
                ("question_original", request.question_original),
                ("question", request.last_asked),
                ("message", request.user_text),
                ("conversation", request.transcript),
            ],
        );

        let value = self.oracle.request(OracleTask::Classify, prompt).await?;
        let verdict = parse_verdict(&value)?;

        info!(
            phase = %request.phase_display,
            verdict = %verdict,
            "Turn classified"
        );
        Ok(verdict)
    }
}

fn parse_verdict(value: &Value) -> OracleResult<Verdict> {
    let raw = value.as_str().ok_or_else(|| {
        OracleError::contract(
            OracleTask::Classify.to_string(),
            format!("expected a string category, got {}", value),
        )
    })?;

    raw.parse().map_err(|e: String| {
        warn!(category = %raw, "Classifier returned an unknown category");
        OracleError::contract(OracleTask::Classify.to_string(), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipeConfig;
    use crate::oracle::{MockPipeRunner, PipeTable};
    use serde_json::json;
    use std::sync::Arc;

    fn classifier_replying(reply: &'static str) -> TurnClassifier {
        let mut runner = MockPipeRunner::new();
        runner
            .expect_run_pipe()
            .returning(move |_, _| Ok(reply.to_string()));
        TurnClassifier::new(OracleClient::new(
            Arc::new(runner),
            PipeTable::from_config(&PipeConfig::default()).unwrap(),
        ))
    }

    fn request() -> ClassifyRequest<'static> {
        ClassifyRequest {
            user_text: "most days, honestly",
            phase_display: "PHQ9",
            question_original: "Little interest or pleasure in doing things",
            last_asked: "Have you lost interest in things you used to enjoy?",
            transcript: "",
        }
    }

    #[test]
    fn test_verdict_parsing_accepts_aliases() {
        assert_eq!("NORMAL_y".parse::<Verdict>(), Ok(Verdict::NormalYes));
        assert_eq!("normal_no".parse::<Verdict>(), Ok(Verdict::NormalNo));
        assert_eq!(" Drift ".parse::<Verdict>(), Ok(Verdict::Drift));
        assert!("MAYBE".parse::<Verdict>().is_err());
    }

    #[test]
    fn test_verdict_categories() {
        assert_eq!(Verdict::NormalYes.to_category(), Category::Yes);
        assert_eq!(Verdict::NormalNo.to_category(), Category::No);
        assert_eq!(Verdict::Drift.to_category(), Category::Other);
        assert_eq!(Verdict::Ambiguous.to_category(), Category::Other);
        assert_eq!(Verdict::Clarify.to_category(), Category::Clarify);
        assert!(!Verdict::Clarify.is_answer());
    }

    #[test]
    fn test_parse_verdict_rejects_non_strings() {
        assert!(parse_verdict(&json!({"category": "DRIFT"})).is_err());
        assert_eq!(parse_verdict(&json!("AMBIGUOUS")).unwrap(), Verdict::Ambiguous);
    }

    #[tokio::test]
    async fn test_classify_returns_verdict() {
        let classifier = classifier_replying(r#"{"response": "NORMAL_y"}"#);
        assert_eq!(
            classifier.classify(request()).await.unwrap(),
            Verdict::NormalYes
        );
    }

    #[tokio::test]
    async fn test_classify_unknown_category_is_contract_violation() {
        let classifier = classifier_replying(r#"{"response": "SOMETIMES"}"#);
        let err = classifier.classify(request()).await.unwrap_err();
        assert!(matches!(err, OracleError::ContractViolation { .. }));
    }
}
