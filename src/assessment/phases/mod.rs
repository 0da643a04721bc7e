//! Questionnaire definitions.
//!
//! Every phase is a unit-like struct implementing [`Questionnaire`]; the graph
//! is built and validated once when the phase is constructed.

pub mod asq;
pub mod gad7;
pub mod monitoring;
pub mod phq9;

use serde_json::{json, Map, Value};

use super::graph::{Category, QuestionGraph};
use super::scoring::{sum_scores, ScoreBounds, ScoreSheet};

pub use asq::Asq;
pub use gad7::Gad7;
pub use monitoring::Monitoring;
pub use phq9::Phq9;

/// Trait implemented by each assessment phase.
pub trait Questionnaire: Send + Sync + std::fmt::Debug {
    /// Stable system name, e.g. `assessment.phq9`.
    fn name(&self) -> &str;

    /// Human-readable name shown to patients and the oracle.
    fn display_name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// The question graph for this phase.
    fn graph(&self) -> &QuestionGraph;

    fn score_bounds(&self) -> ScoreBounds;

    /// Label per score value, lowest first.
    fn labels(&self) -> &[&'static str];

    fn supports_scoring(&self) -> bool {
        true
    }

    /// Severity band for a total score.
    fn severity(&self, total: i64, sheet: &ScoreSheet) -> String;

    fn total_score(&self, sheet: &ScoreSheet) -> i64 {
        sum_scores(sheet)
    }

    /// System name without its namespace.
    fn short_name(&self) -> &str {
        self.name().rsplit('.').next().unwrap_or_else(|| self.name())
    }

    /// Number of distinct question numbers.
    fn question_count(&self) -> usize {
        self.graph().question_numbers().len()
    }

    /// Highest attainable total.
    fn cap(&self) -> i64 {
        self.question_count() as i64 * self.score_bounds().high
    }

    fn base_node(&self) -> &str {
        self.graph().base()
    }

    /// Score written during the turn loop, before the final scoring pass.
    ///
    /// `None` means the category does not settle the question.
    fn provisional_score(&self, category: Category) -> Option<i64> {
        let bounds = self.score_bounds();
        match category {
            Category::Yes => Some((bounds.low + 1).min(bounds.high)),
            Category::No => Some(bounds.low),
            Category::Other | Category::Clarify => None,
        }
    }

    /// Question catalogue handed to the scoring oracle.
    fn questions_json(&self) -> Value {
        let bounds = self.score_bounds();
        let mut catalogue = Map::new();
        for number in self.graph().question_numbers() {
            let text = self.graph().question_text(number).unwrap_or_default();
            catalogue.insert(
                number.to_string(),
                json!({
                    "qid": number,
                    "text": text,
                    "labels": self.labels(),
                    "score_range": [bounds.low, bounds.high],
                }),
            );
        }
        Value::Object(catalogue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::graph::Target;
    use std::collections::{HashSet, VecDeque};

    fn all_phases() -> Vec<Box<dyn Questionnaire>> {
        vec![
            Box::new(Phq9::new().unwrap()),
            Box::new(Gad7::new().unwrap()),
            Box::new(Asq::new().unwrap()),
            Box::new(Monitoring::new().unwrap()),
        ]
    }

    #[test]
    fn test_every_reachable_path_terminates() {
        for phase in all_phases() {
            let graph = phase.graph();
            let bound = graph.nodes().len();
            // (node, steps) frontier over yes/no/forced-other moves
            let mut queue = VecDeque::from([(graph.base().to_string(), 0usize)]);
            let mut visited = HashSet::new();

            while let Some((node_id, steps)) = queue.pop_front() {
                assert!(steps <= bound, "{}: path too long", phase.name());
                if !visited.insert((node_id.clone(), steps)) {
                    continue;
                }
                let limit = graph.node(&node_id).unwrap().retry_limit;
                for (category, retries) in [
                    (Category::Yes, 0),
                    (Category::No, 0),
                    (Category::Other, limit + 1),
                ] {
                    match graph.next(&node_id, category, retries).unwrap() {
                        Target::Node(next) => {
                            assert_ne!(next, node_id);
                            queue.push_back((next, steps + 1));
                        }
                        Target::End => {}
                    }
                }
            }
            assert!(graph.longest_path() <= bound);
        }
    }

    #[test]
    fn test_no_accidental_self_loops() {
        for phase in all_phases() {
            let graph = phase.graph();
            for node in graph.nodes() {
                for r in 0..6 {
                    for category in [Category::Yes, Category::No] {
                        let next = graph.next(&node.node_id, category, r).unwrap();
                        assert_ne!(next.node_id(), Some(node.node_id.as_str()));
                    }
                }
            }
        }
    }

    #[test]
    fn test_retry_budget_monotonicity() {
        for phase in all_phases() {
            let graph = phase.graph();
            for node in graph.nodes() {
                for r in 0..=node.retry_limit {
                    let next = graph.next(&node.node_id, Category::Other, r).unwrap();
                    assert_eq!(next.node_id(), Some(node.node_id.as_str()));
                }
                let forced = graph
                    .next(&node.node_id, Category::Other, node.retry_limit + 1)
                    .unwrap();
                assert_ne!(forced.node_id(), Some(node.node_id.as_str()));
            }
        }
    }

    #[test]
    fn test_short_name_and_cap() {
        let phq9 = Phq9::new().unwrap();
        assert_eq!(phq9.short_name(), "phq9");
        assert_eq!(phq9.cap(), 27);

        let monitoring = Monitoring::new().unwrap();
        assert_eq!(monitoring.short_name(), "monitoring");
        assert_eq!(monitoring.cap(), 0);
    }

    #[test]
    fn test_provisional_scores_stay_in_bounds() {
        for phase in all_phases() {
            let bounds = phase.score_bounds();
            for category in [Category::Yes, Category::No] {
                let score = phase.provisional_score(category).unwrap();
                assert!(bounds.contains(score), "{}", phase.name());
            }
            assert_eq!(phase.provisional_score(Category::Clarify), None);
            assert_eq!(phase.provisional_score(Category::Other), None);
        }
    }

    #[test]
    fn test_questions_json_lists_each_question_once() {
        let asq = Asq::new().unwrap();
        let json = asq.questions_json();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 7);
        assert_eq!(json["4b"]["text"], "How?");
        assert_eq!(json["1"]["labels"], serde_json::json!(["No", "Yes"]));
        assert_eq!(json["1"]["score_range"], serde_json::json!([0, 1]));
    }
}
