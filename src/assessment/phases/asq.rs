//! Ask Suicide-Screening Questions.
//!
//! Q1-Q4 are always asked; Q5 only once any earlier answer was positive. The
//! positive/negative flag is remembered by the node id suffix (`y`/`n`), so two
//! nodes share each question number on the branching part of the graph.

use crate::assessment::graph::{QuestionGraph, QuestionNode, END};
use crate::assessment::scoring::{ScoreBounds, ScoreSheet};
use crate::error::GraphError;

use super::Questionnaire;

const RETRY_LIMIT: u32 = 1;

const Q2: &str =
    "In the past few weeks, have you felt that you or your family would be better off if you were dead?";
const Q3: &str = "In the past week, have you been having thoughts about killing yourself?";
const Q4A: &str = "Have you ever tried to kill yourself?";

#[derive(Debug)]
pub struct Asq {
    graph: QuestionGraph,
}

impl Asq {
    pub const NAME: &'static str = "assessment.asq";

    pub fn new() -> Result<Self, GraphError> {
        let nodes = vec![
            QuestionNode::new(
                "1",
                "1",
                "In the past few weeks, have you wished you were dead?",
                "2y",
                "2n",
                END,
            ),
            QuestionNode::new("2y", "2", Q2, "3y", "3y", END),
            QuestionNode::new("2n", "2", Q2, "3y", "3n", END),
            QuestionNode::new("3y", "3", Q3, "4ya", "4ya", END),
            QuestionNode::new("3n", "3", Q3, "4ya", "4na", END),
            QuestionNode::new("4ya", "4a", Q4A, "4yb", "5y", "5y"),
            QuestionNode::new("4na", "4a", Q4A, "4yb", END, END),
            QuestionNode::new("4yb", "4b", "How?", "4yc", "4yc", "5y"),
            QuestionNode::new("4nb", "4b", "How?", "4nc", "4nc", "5y"),
            QuestionNode::linear("4yc", "4c", "When?", "5y"),
            QuestionNode::linear("4nc", "4c", "When?", END),
            QuestionNode::linear(
                "5y",
                "5",
                "Are you having thoughts of killing yourself right now?",
                END,
            ),
        ]
        .into_iter()
        .map(|n| n.with_retry_limit(RETRY_LIMIT))
        .collect();

        Ok(Self {
            graph: QuestionGraph::new(Self::NAME, nodes)?,
        })
    }
}

impl Questionnaire for Asq {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "ASQ"
    }

    fn description(&self) -> &str {
        "The ASQ is a brief suicide risk screening tool; a positive answer to the final question indicates an acute risk."
    }

    fn graph(&self) -> &QuestionGraph {
        &self.graph
    }

    fn score_bounds(&self) -> ScoreBounds {
        ScoreBounds::new(0, 1)
    }

    fn labels(&self) -> &[&'static str] {
        &["No", "Yes"]
    }

    fn severity(&self, _total: i64, sheet: &ScoreSheet) -> String {
        if sheet.values().all(|s| s.score == 0) {
            return "Negative".to_string();
        }
        match sheet.get("5") {
            Some(q5) if q5.score == 1 => "Acute positive screen".to_string(),
            _ => "Non-acute positive screen".to_string(),
        }
    }
}
