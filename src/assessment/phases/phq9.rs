use crate::assessment::graph::{QuestionGraph, QuestionNode, END};
use crate::assessment::scoring::{ScoreBounds, ScoreSheet, SeverityBands};
use crate::error::GraphError;

use super::Questionnaire;

/// Frequency labels shared by PHQ-9 and GAD-7.
pub(crate) const FREQUENCY_LABELS: [&str; 4] = [
    "Not at all",
    "Several days",
    "More than half the days",
    "Nearly every day",
];

const SEVERITY: SeverityBands = SeverityBands::new(
    &[
        (4, "Minimal depression"),
        (9, "Mild depression"),
        (14, "Moderate depression"),
        (19, "Moderately severe depression"),
    ],
    "Severe depression",
);

/// PHQ-9: nine linear depression items, each scored 0-3.
#[derive(Debug)]
pub struct Phq9 {
    graph: QuestionGraph,
}

impl Phq9 {
    pub const NAME: &'static str = "assessment.phq9";

    pub fn new() -> Result<Self, GraphError> {
        let items = [
            "Little interest or pleasure in doing things",
            "Feeling down, depressed, or hopeless",
            "Trouble falling or staying asleep, or sleeping too much",
            "Feeling tired or having little energy",
            "Poor appetite or overeating",
            "Feeling bad about yourself - or that you are a failure or have let yourself or your family down",
            "Trouble concentrating on things, such as reading the newspaper or watching television",
            "Moving or speaking so slowly that other people could have noticed. Or the opposite - being so fidgety or restless that you have been moving around a lot more than usual",
            "Thoughts that you would be better off dead, or of hurting yourself",
        ];

        let nodes = items
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let id = (i + 1).to_string();
                let next = if i + 1 == items.len() {
                    END.to_string()
                } else {
                    (i + 2).to_string()
                };
                QuestionNode::linear(id.clone(), id, *text, &next)
            })
            .collect();

        Ok(Self {
            graph: QuestionGraph::new(Self::NAME, nodes)?,
        })
    }
}

impl Questionnaire for Phq9 {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn display_name(&self) -> &str {
        "PHQ9"
    }

    fn description(&self) -> &str {
        "The PHQ-9 is a multipurpose instrument for screening, diagnosing, monitoring, and measuring the severity of depression."
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::graph::{Category, Target};

    #[test]
    fn test_linear_walk_to_end() {
        let phq9 = Phq9::new().unwrap();
        let graph = phq9.graph();
        assert_eq!(graph.base(), "1");
        assert_eq!(phq9.question_count(), 9);

        let mut at = Target::from(graph.base());
        let mut steps = 0;
        while let Target::Node(id) = at {
            at = graph.next(&id, Category::No, 0).unwrap();
            steps += 1;
        }
        assert_eq!(steps, 9);
    }

    #[test]
    fn test_severity_bands() {
        let phq9 = Phq9::new().unwrap();
        let empty = ScoreSheet::new();
        assert_eq!(phq9.severity(0, &empty), "Minimal depression");
        assert_eq!(phq9.severity(4, &empty), "Minimal depression");
        assert_eq!(phq9.severity(5, &empty), "Mild depression");
        assert_eq!(phq9.severity(14, &empty), "Moderate depression");
        assert_eq!(phq9.severity(19, &empty), "Moderately severe depression");
        assert_eq!(phq9.severity(20, &empty), "Severe depression");
        assert_eq!(phq9.severity(27, &empty), "Severe depression");
    }

    #[test]
    fn test_node_one_skips_after_third_unclear_answer() {
        let phq9 = Phq9::new().unwrap();
        let graph = phq9.graph();
        assert_eq!(graph.node("1").unwrap().retry_limit, 2);
        assert_eq!(graph.next("1", Category::Other, 3).unwrap(), Target::from("2"));
    }
}
