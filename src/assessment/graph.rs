//! Static question graphs.
//!
//! Each phase owns one graph. Nodes live in a flat arena and are addressed by
//! their `node_id`; the branch a patient is on (for instance a positive flag in
//! the screening instrument) is carried by which node id they sit at, never by
//! extra session state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Wire and storage spelling of the terminal marker.
pub const END: &str = "END";

/// Destination of an edge: another node in the same graph, or the end of the phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Target {
    Node(String),
    End,
}

impl Target {
    pub fn is_end(&self) -> bool {
        matches!(self, Target::End)
    }

    /// The node id, or `None` at the end of the phase.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Target::Node(id) => Some(id),
            Target::End => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(id) => write!(f, "{}", id),
            Target::End => write!(f, "{}", END),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        if s == END {
            Target::End
        } else {
            Target::Node(s.to_string())
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        if s == END {
            Target::End
        } else {
            Target::Node(s)
        }
    }
}

impl From<Target> for String {
    fn from(t: Target) -> Self {
        t.to_string()
    }
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Target::from(s))
    }
}

/// Graph-level answer category a classified turn is reduced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Yes,
    No,
    Other,
    Clarify,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Yes => write!(f, "yes"),
            Category::No => write!(f, "no"),
            Category::Other => write!(f, "other"),
            Category::Clarify => write!(f, "clarify"),
        }
    }
}

/// One question within a phase's graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionNode {
    pub node_id: String,
    /// Display identifier; several nodes may share one.
    pub question_number: String,
    pub text: String,
    pub transition_yes: Target,
    pub transition_no: Target,
    pub transition_other: Target,
    /// Unclear answers tolerated before `transition_other` is forced.
    pub retry_limit: u32,
}

impl QuestionNode {
    /// Default number of unclear answers tolerated on a node.
    pub const DEFAULT_RETRY_LIMIT: u32 = 2;

    pub fn new(
        node_id: impl Into<String>,
        question_number: impl Into<String>,
        text: impl Into<String>,
        yes: &str,
        no: &str,
        other: &str,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            question_number: question_number.into(),
            text: text.into(),
            transition_yes: Target::from(yes),
            transition_no: Target::from(no),
            transition_other: Target::from(other),
            retry_limit: Self::DEFAULT_RETRY_LIMIT,
        }
    }

    /// Node whose three edges all lead to the same place.
    pub fn linear(
        node_id: impl Into<String>,
        question_number: impl Into<String>,
        text: impl Into<String>,
        next: &str,
    ) -> Self {
        Self::new(node_id, question_number, text, next, next, next)
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    fn edges(&self) -> [(&'static str, &Target); 3] {
        [
            ("yes", &self.transition_yes),
            ("no", &self.transition_no),
            ("other", &self.transition_other),
        ]
    }
}

/// Validated, immutable question graph for one phase.
#[derive(Debug, Clone)]
pub struct QuestionGraph {
    phase: String,
    nodes: Vec<QuestionNode>,
    index: HashMap<String, usize>,
    base: String,
}

impl QuestionGraph {
    /// Build a graph whose base node is the first node given.
    ///
    /// Rejects duplicate ids, dangling edges, yes/no/other edges that loop back
    /// to their own node, and any cycle among forward edges, so every path from
    /// the base node reaches `END` in a bounded number of steps.
    pub fn new(phase: impl Into<String>, nodes: Vec<QuestionNode>) -> Result<Self, GraphError> {
        let phase = phase.into();
        let base = nodes
            .first()
            .map(|n| n.node_id.clone())
            .ok_or_else(|| GraphError::InvalidGraphDefinition {
                phase: phase.clone(),
                node_id: END.to_string(),
                reason: "graph has no nodes".to_string(),
            })?;

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.node_id == END {
                return Err(invalid(&phase, &node.node_id, "END is reserved"));
            }
            if index.insert(node.node_id.clone(), i).is_some() {
                return Err(invalid(&phase, &node.node_id, "duplicate node id"));
            }
        }

        let graph = Self {
            phase,
            nodes,
            index,
            base,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Re-run the structural checks performed at construction.
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.nodes {
            for (label, target) in node.edges() {
                if let Target::Node(id) = target {
                    if id == &node.node_id {
                        return Err(invalid(
                            &self.phase,
                            &node.node_id,
                            &format!("{} transition loops back to itself", label),
                        ));
                    }
                    if !self.index.contains_key(id) {
                        return Err(invalid(
                            &self.phase,
                            &node.node_id,
                            &format!("{} transition targets unknown node '{}'", label, id),
                        ));
                    }
                }
            }
        }
        self.check_acyclic()
    }

    /// Iterative three-colour DFS over the forward edges.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks = vec![Mark::White; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if marks[start] != Mark::White {
                continue;
            }
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Grey;

            while let Some((at, edge)) = stack.pop() {
                let edges = self.nodes[at].edges();
                if edge == edges.len() {
                    marks[at] = Mark::Black;
                    continue;
                }
                stack.push((at, edge + 1));

                let Target::Node(id) = edges[edge].1 else {
                    continue;
                };
                let next = self.index[id];
                match marks[next] {
                    Mark::Grey => {
                        return Err(invalid(
                            &self.phase,
                            &self.nodes[at].node_id,
                            &format!("cycle through node '{}'", id),
                        ));
                    }
                    Mark::White => {
                        marks[next] = Mark::Grey;
                        stack.push((next, 0));
                    }
                    Mark::Black => {}
                }
            }
        }
        Ok(())
    }

    /// Transition function.
    ///
    /// `yes`/`no` always leave the node, `clarify` always stays, and `other`
    /// stays while `retry_count <= retry_limit` and follows `transition_other`
    /// once the budget is exceeded.
    pub fn next(
        &self,
        node_id: &str,
        category: Category,
        retry_count: u32,
    ) -> Result<Target, GraphError> {
        let node = self.node(node_id)?;
        let target = match category {
            Category::Yes => node.transition_yes.clone(),
            Category::No => node.transition_no.clone(),
            Category::Clarify => Target::Node(node.node_id.clone()),
            Category::Other if retry_count <= node.retry_limit => {
                Target::Node(node.node_id.clone())
            }
            Category::Other => node.transition_other.clone(),
        };
        Ok(target)
    }

    pub fn node(&self, node_id: &str) -> Result<&QuestionNode, GraphError> {
        self.index
            .get(node_id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| GraphError::UnknownNode {
                phase: self.phase.clone(),
                node_id: node_id.to_string(),
            })
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn nodes(&self) -> &[QuestionNode] {
        &self.nodes
    }

    /// Distinct question numbers in declaration order.
    pub fn question_numbers(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.question_number.as_str())
            .filter(|q| seen.insert(*q))
            .collect()
    }

    /// Text of the first node carrying the given question number.
    pub fn question_text(&self, question_number: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.question_number == question_number)
            .map(|n| n.text.as_str())
    }

    /// Length of the longest forward path from the base node to `END`.
    pub fn longest_path(&self) -> usize {
        fn depth(
            graph: &QuestionGraph,
            at: usize,
            memo: &mut HashMap<usize, usize>,
        ) -> usize {
            if let Some(&d) = memo.get(&at) {
                return d;
            }
            let d = graph.nodes[at]
                .edges()
                .iter()
                .map(|(_, t)| match t {
                    Target::Node(id) => 1 + depth(graph, graph.index[id.as_str()], memo),
                    Target::End => 1,
                })
                .max()
                .unwrap_or(1);
            memo.insert(at, d);
            d
        }

        let mut memo = HashMap::new();
        depth(self, self.index[self.base.as_str()], &mut memo)
    }
}

fn invalid(phase: &str, node_id: &str, reason: &str) -> GraphError {
    GraphError::InvalidGraphDefinition {
        phase: phase.to_string(),
        node_id: node_id.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_step() -> QuestionGraph {
        QuestionGraph::new(
            "test.phase",
            vec![
                QuestionNode::new("1", "1", "First?", "2", "3", "3"),
                QuestionNode::linear("2", "2", "Second?", "3"),
                QuestionNode::linear("3", "3", "Third?", END).with_retry_limit(0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_target_round_trips_through_strings() {
        assert_eq!(Target::from("END"), Target::End);
        assert_eq!(Target::from("2a"), Target::Node("2a".to_string()));
        assert_eq!(Target::End.to_string(), "END");
        let json = serde_json::to_string(&Target::Node("4yb".to_string())).unwrap();
        assert_eq!(json, "\"4yb\"");
        let back: Target = serde_json::from_str("\"END\"").unwrap();
        assert!(back.is_end());
    }

    #[test]
    fn test_yes_no_follow_edges() {
        let graph = three_step();
        assert_eq!(graph.next("1", Category::Yes, 0).unwrap(), Target::from("2"));
        assert_eq!(graph.next("1", Category::No, 0).unwrap(), Target::from("3"));
        assert_eq!(graph.next("3", Category::Yes, 5).unwrap(), Target::End);
    }

    #[test]
    fn test_clarify_is_self_loop() {
        let graph = three_step();
        for r in 0..12 {
            assert_eq!(
                graph.next("2", Category::Clarify, r).unwrap(),
                Target::from("2")
            );
        }
    }

    #[test]
    fn test_other_respects_retry_limit() {
        let graph = three_step();
        assert_eq!(graph.next("1", Category::Other, 0).unwrap(), Target::from("1"));
        assert_eq!(graph.next("1", Category::Other, 2).unwrap(), Target::from("1"));
        assert_eq!(graph.next("1", Category::Other, 3).unwrap(), Target::from("3"));

        // retry_limit 0 tolerates exactly one unclear answer
        assert_eq!(graph.next("3", Category::Other, 0).unwrap(), Target::from("3"));
        assert_eq!(graph.next("3", Category::Other, 1).unwrap(), Target::End);
    }

    #[test]
    fn test_unknown_node() {
        let graph = three_step();
        let err = graph.next("9", Category::Yes, 0).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownNode {
                phase: "test.phase".to_string(),
                node_id: "9".to_string()
            }
        );
    }

    #[test]
    fn test_rejects_yes_self_loop() {
        let err = QuestionGraph::new(
            "bad",
            vec![QuestionNode::new("1", "1", "Q", "1", END, END)],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidGraphDefinition { .. }));
        assert!(err.to_string().contains("yes transition loops back"));
    }

    #[test]
    fn test_rejects_dangling_edge() {
        let err = QuestionGraph::new(
            "bad",
            vec![QuestionNode::new("1", "1", "Q", "2", END, END)],
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown node '2'"));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = QuestionGraph::new(
            "bad",
            vec![
                QuestionNode::linear("1", "1", "Q1", "2"),
                QuestionNode::new("2", "2", "Q2", "1", END, END),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let err = QuestionGraph::new(
            "bad",
            vec![
                QuestionNode::linear("1", "1", "Q1", END),
                QuestionNode::linear("1", "1", "Q1 again", END),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        assert!(QuestionGraph::new("empty", vec![]).is_err());
    }

    #[test]
    fn test_question_numbers_dedupe_in_order() {
        let graph = QuestionGraph::new(
            "branchy",
            vec![
                QuestionNode::new("1", "1", "Q1", "2y", "2n", END),
                QuestionNode::linear("2y", "2", "Q2", END),
                QuestionNode::linear("2n", "2", "Q2", END),
            ],
        )
        .unwrap();
        assert_eq!(graph.question_numbers(), vec!["1", "2"]);
        assert_eq!(graph.question_text("2"), Some("Q2"));
        assert_eq!(graph.longest_path(), 2);
    }
}
