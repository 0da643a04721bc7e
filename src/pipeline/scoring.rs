//! Final scoring pass for a completed questionnaire.
//!
//! The oracle scores the phase transcript once; the result is folded over the
//! provisional records written during the turn loop. Records whose final score
//! differs from the provisional one are flagged dirty. The outcome is a
//! [`Finalization`] write-set that the pipeline commits with the rest of the turn.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::assessment::{QuestionScore, Questionnaire, ScoreSheet};
use crate::conversation::detailed_map;
use crate::error::{AppResult, OracleError, OracleResult, PipelineError};
use crate::oracle::{OracleClient, OracleTask};
use crate::prompts::{render, SCORE_PROMPT};
use crate::storage::{
    Assessment, AssessmentRecord, AssessmentResult, AssessmentStatus, ChatMessage, Finalization,
    Storage,
};

/// Remark stored on a question the oracle left out.
pub const DEFAULTED_REMARK: &str = "defaulted: not scored by oracle";

/// Scores completed phases and builds their final records and result.
#[derive(Clone)]
pub struct ScoringEngine {
    oracle: OracleClient,
    storage: Arc<dyn Storage>,
}

impl ScoringEngine {
    pub fn new(oracle: OracleClient, storage: Arc<dyn Storage>) -> Self {
        Self { oracle, storage }
    }

    /// Score `assessment` from the phase transcript.
    ///
    /// `pending` is a provisional record produced in the current turn and not
    /// yet committed. Fails with `DuplicateFinalization` if the assessment was
    /// already finalized.
    pub async fn finalize(
        &self,
        phase: &dyn Questionnaire,
        assessment: &Assessment,
        transcript: &[ChatMessage],
        pending: Option<&AssessmentRecord>,
    ) -> AppResult<Finalization> {
        let already_scored = assessment.status != AssessmentStatus::Pending
            || self.storage.get_result(&assessment.id).await?.is_some();
        if already_scored {
            return Err(PipelineError::DuplicateFinalization {
                phase: assessment.phase.clone(),
                session_id: assessment.session_id.clone(),
            }
            .into());
        }

        let mut existing = self.storage.get_records(&assessment.id).await?;
        if let Some(record) = pending {
            existing.retain(|r| r.question_number != record.question_number);
            existing.push(record.clone());
        }

        let prompt = render(
            SCORE_PROMPT,
            &[
                ("phase", phase.display_name()),
                ("questions_json", &phase.questions_json().to_string()),
                ("conversation_json", &detailed_map(transcript).to_string()),
            ],
        );
        let response = self.oracle.request(OracleTask::Score, prompt).await?;

        let sheet = parse_score_sheet(phase, &response)?;
        let finalization = build_finalization(phase, &assessment.id, &sheet, &existing);

        info!(
            assessment_id = %assessment.id,
            phase = %assessment.phase,
            total_score = finalization.result.total_score,
            severity = %finalization.result.severity_label,
            dirty = finalization.records.iter().filter(|r| r.is_dirty).count(),
            "Assessment scored"
        );

        Ok(finalization)
    }
}

/// Validate the oracle's score mapping and fill in omitted questions.
pub fn parse_score_sheet(phase: &dyn Questionnaire, response: &Value) -> OracleResult<ScoreSheet> {
    let task = OracleTask::Score.to_string();
    let entries = response
        .as_object()
        .ok_or_else(|| OracleError::contract(&task, "expected an object of question scores"))?;

    let bounds = phase.score_bounds();
    let numbers = phase.graph().question_numbers();
    let mut sheet = ScoreSheet::new();

    for (qid, raw) in entries {
        if !numbers.contains(&qid.as_str()) {
            warn!(phase = %phase.name(), question = %qid, "Ignoring score for unknown question");
            continue;
        }
        let score: QuestionScore = serde_json::from_value(raw.clone()).map_err(|e| {
            OracleError::contract(&task, format!("question {}: {}", qid, e))
        })?;
        if !bounds.contains(score.score) {
            return Err(OracleError::contract(
                &task,
                format!(
                    "question {} scored {} outside {}..={}",
                    qid, score.score, bounds.low, bounds.high
                ),
            ));
        }
        sheet.insert(qid.clone(), score);
    }

    for number in numbers {
        if !sheet.contains_key(number) {
            warn!(phase = %phase.name(), question = %number, "Oracle omitted a question, using lowest score");
            sheet.insert(
                number.to_string(),
                QuestionScore::new(bounds.low).with_remark(DEFAULTED_REMARK),
            );
        }
    }

    Ok(sheet)
}

/// Fold the final sheet over existing records into the finalization write-set.
pub fn build_finalization(
    phase: &dyn Questionnaire,
    assessment_id: &str,
    sheet: &ScoreSheet,
    existing: &[AssessmentRecord],
) -> Finalization {
    let now = Utc::now();
    let by_number: HashMap<&str, &AssessmentRecord> = existing
        .iter()
        .map(|r| (r.question_number.as_str(), r))
        .collect();

    let records = phase
        .graph()
        .question_numbers()
        .into_iter()
        .filter_map(|number| {
            let score = sheet.get(number)?;
            let mut record = match by_number.get(number) {
                Some(record) => (*record).clone(),
                None => {
                    let text = phase.graph().question_text(number).unwrap_or_default();
                    let mut fresh = AssessmentRecord::provisional(assessment_id, number, text, score.score);
                    fresh.provisional_score = None;
                    fresh
                }
            };
            record.is_dirty = record
                .provisional_score
                .is_some_and(|provisional| provisional != score.score);
            record.score = score.score;
            record.remark = score.remark.clone();
            record.snippet = score.snippet.clone();
            record.keywords = score.keywords.clone();
            record.is_final = true;
            record.updated_at = now;
            Some(record)
        })
        .collect();

    let total = phase.total_score(sheet);
    let label = phase.severity(total, sheet);

    Finalization {
        assessment_id: assessment_id.to_string(),
        records,
        result: AssessmentResult::new(assessment_id, total, label),
        completed_at: now,
    }
}
