use crate::assessment::graph::{QuestionGraph, QuestionNode, END};
use crate::assessment::scoring::{ScoreBounds, ScoreSheet};
use crate::error::GraphError;

use super::Questionnaire;

/// Free-form follow-up questions. Answers are recorded but not scored.
#[derive(Debug)]
pub struct Monitoring {
    graph: QuestionGraph,
}

impl Monitoring {
    pub const NAME: &'static str = "monitoring";

    pub fn new() -> Result<Self, GraphError> {
        let nodes = vec![
            QuestionNode::linear(
                "1",
                "1",
                "Have you noticed any improvement or worsening in your [specific symptoms, e.g., anxiety, depression, psychosis]?",
                "2a",
            ),
            QuestionNode::new(
                "2a",
                "2a",
                "Have you experienced any new symptoms since your last visit?",
                "2b",
                "3",
                "3",
            ),
            QuestionNode::linear("2b", "2b", "What are the new symptoms?", "3"),
            QuestionNode::linear(
                "3",
                "3",
                "Have you been taking your prescribed medications as directed?",
                "4",
            ),
            QuestionNode::linear("4", "4", "Have you missed any doses? If yes, how often?", "5a"),
            QuestionNode::new(
                "5a",
                "5a",
                "Have you experienced any side effects from the medication?",
                "5b",
                "6",
                "6",
            ),
            QuestionNode::linear("5b", "5b", "What side effects have you experienced?", "6"),
            QuestionNode::linear(
                "6",
                "6",
                "Have you used any substances (e.g., alcohol, drugs) since your last visit?",
                END,
            ),
        ];

        Ok(Self {
            graph: QuestionGraph::new(Self::NAME, nodes)?,
        })
    }
}

impl Questionnaire for Monitoring {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "Monitoring"
    }

    fn graph(&self) -> &QuestionGraph {
        &self.graph
    }

    fn score_bounds(&self) -> ScoreBounds {
        ScoreBounds::new(0, 0)
    }

    fn labels(&self) -> &[&'static str] {
        &[]
    }

    fn severity(&self, _total: i64, _sheet: &ScoreSheet) -> String {
        "Not applicable".to_string()
    }

    fn total_score(&self, _sheet: &ScoreSheet) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::graph::{Category, Target};
    use crate::assessment::scoring::QuestionScore;

    #[test]
    fn test_follow_up_branches() {
        let monitoring = Monitoring::new().unwrap();
        let graph = monitoring.graph();
        assert_eq!(graph.next("2a", Category::Yes, 0).unwrap(), Target::from("2b"));
        assert_eq!(graph.next("2a", Category::No, 0).unwrap(), Target::from("3"));
        assert_eq!(graph.next("5a", Category::Yes, 0).unwrap(), Target::from("5b"));
        assert_eq!(graph.next("5a", Category::No, 0).unwrap(), Target::from("6"));
        assert_eq!(monitoring.question_count(), 8);
    }

    #[test]
    fn test_never_scores() {
        let monitoring = Monitoring::new().unwrap();
        let mut sheet = ScoreSheet::new();
        sheet.insert("1".to_string(), QuestionScore::new(0));
        assert_eq!(monitoring.total_score(&sheet), 0);
        assert_eq!(monitoring.severity(0, &sheet), "Not applicable");
        assert!(monitoring.supports_scoring());
    }
}
