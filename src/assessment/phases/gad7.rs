use crate::assessment::graph::{QuestionGraph, QuestionNode, END};
use crate::assessment::scoring::{ScoreBounds, ScoreSheet, SeverityBands};
use crate::error::GraphError;

use super::phq9::FREQUENCY_LABELS;
use super::Questionnaire;

const SEVERITY: SeverityBands = SeverityBands::new(
    &[
        (4, "Minimal anxiety"),
        (9, "Mild anxiety"),
        (14, "Moderate anxiety"),
    ],
    "Severe anxiety",
);

/// GAD-7: seven anxiety items; a negative or unclear first answer ends the phase.
#[derive(Debug)]
pub struct Gad7 {
    graph: QuestionGraph,
}

impl Gad7 {
    pub const NAME: &'static str = "assessment.gad7";

    pub fn new() -> Result<Self, GraphError> {
        let nodes = vec![
            QuestionNode::new("1", "1", "Feeling nervous, anxious or on edge?", "2", END, END),
            QuestionNode::linear("2", "2", "Not being able to stop or control worrying?", "3"),
            QuestionNode::linear("3", "3", "Worrying too much about different things?", "4"),
            QuestionNode::linear("4", "4", "Trouble relaxing?", "5"),
            QuestionNode::linear("5", "5", "Being so restless that it is hard to sit still?", "6"),
            QuestionNode::linear("6", "6", "Becoming easily annoyed or irritable?", "7"),
            QuestionNode::linear("7", "7", "Feeling afraid as if something awful might happen?", END),
        ];

        Ok(Self {
            graph: QuestionGraph::new(Self::NAME, nodes)?,
        })
    }
}

impl Questionnaire for Gad7 {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "GAD7"
    }

    fn description(&self) -> &str {
        "The GAD-7 is a self-reported questionnaire for screening and severity measuring of generalized anxiety disorder."
    }

    fn graph(&self) -> &QuestionGraph {
        &self.graph
    }

    fn score_bounds(&self) -> ScoreBounds {
        ScoreBounds::new(0, 3)
    }

    fn labels(&self) -> &[&'static str] {
        &FREQUENCY_LABELS
    }

    fn severity(&self, total: i64, _sheet: &ScoreSheet) -> String {
        SEVERITY.classify(total).to_string()
    }
}
