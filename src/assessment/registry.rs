use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::phases::{Asq, Gad7, Monitoring, Phq9, Questionnaire};
use crate::error::GraphError;

/// Result of advancing along the phase sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum PhaseStep {
    Phase(String),
    End,
}

impl fmt::Display for PhaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseStep::Phase(name) => write!(f, "{}", name),
            PhaseStep::End => write!(f, "END"),
        }
    }
}

/// Catalogue of known phases plus the ordered sequence patients walk through.
#[derive(Debug, Clone)]
pub struct PhaseRegistry {
    phases: HashMap<String, Arc<dyn Questionnaire>>,
    order: Vec<String>,
    sequence: Vec<String>,
}

impl PhaseRegistry {
    /// Registry with every built-in phase and the given sequence.
    pub fn with_sequence<S: AsRef<str>>(sequence: &[S]) -> Result<Self, GraphError> {
        let builtins: Vec<Arc<dyn Questionnaire>> = vec![
            Arc::new(Phq9::new()?),
            Arc::new(Gad7::new()?),
            Arc::new(Monitoring::new()?),
            Arc::new(Asq::new()?),
        ];
        Self::new(builtins, sequence)
    }

    /// Registry with the default PHQ-9, GAD-7, monitoring sequence.
    pub fn with_defaults() -> Result<Self, GraphError> {
        Self::with_sequence(&[Phq9::NAME, Gad7::NAME, Monitoring::NAME])
    }

    /// Build a registry, checking that the sequence is non-empty, names only
    /// registered phases, and lists each phase at most once.
    pub fn new<S: AsRef<str>>(
        phases: Vec<Arc<dyn Questionnaire>>,
        sequence: &[S],
    ) -> Result<Self, GraphError> {
        let mut map = HashMap::with_capacity(phases.len());
        let mut order = Vec::with_capacity(phases.len());
        for phase in phases {
            let name = phase.name().to_string();
            if map.insert(name.clone(), phase).is_some() {
                return Err(GraphError::InvalidSequence {
                    reason: format!("phase {} registered twice", name),
                });
            }
            order.push(name);
        }

        if sequence.is_empty() {
            return Err(GraphError::InvalidSequence {
                reason: "sequence is empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut seq = Vec::with_capacity(sequence.len());
        for name in sequence {
            let name = name.as_ref();
            if !map.contains_key(name) {
                return Err(GraphError::UnknownPhase {
                    name: name.to_string(),
                });
            }
            if !seen.insert(name) {
                return Err(GraphError::InvalidSequence {
                    reason: format!("phase {} appears more than once", name),
                });
            }
            seq.push(name.to_string());
        }

        Ok(Self {
            phases: map,
            order,
            sequence: seq,
        })
    }

    pub fn first(&self) -> &str {
        &self.sequence[0]
    }

    pub fn last(&self) -> &str {
        &self.sequence[self.sequence.len() - 1]
    }

    /// Phase after `current`; `END` past the last one unless `wrap` is set.
    pub fn next(&self, current: &str, wrap: bool) -> Result<PhaseStep, GraphError> {
        let at = self
            .sequence
            .iter()
            .position(|n| n == current)
            .ok_or_else(|| GraphError::UnknownPhase {
                name: current.to_string(),
            })?;

        if at + 1 < self.sequence.len() {
            Ok(PhaseStep::Phase(self.sequence[at + 1].clone()))
        } else if wrap {
            Ok(PhaseStep::Phase(self.sequence[0].clone()))
        } else {
            Ok(PhaseStep::End)
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Questionnaire>, GraphError> {
        self.phases
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::UnknownPhase {
                name: name.to_string(),
            })
    }

    pub fn first_phase(&self) -> Result<Arc<dyn Questionnaire>, GraphError> {
        self.get(self.first())
    }

    /// Every registered phase in registration order, sequenced or not.
    pub fn all(&self) -> Vec<Arc<dyn Questionnaire>> {
        self.order
            .iter()
            .filter_map(|name| self.phases.get(name).cloned())
            .collect()
    }

    pub fn sequence(&self) -> &[String] {
        &self.sequence
    }

    pub fn is_sequenced(&self, name: &str) -> bool {
        self.sequence.iter().any(|n| n == name)
    }

    /// Check every registered graph and that each one is filed under its own phase.
    pub fn validate(&self) -> Result<(), GraphError> {
        for phase in self.all() {
            let graph = phase.graph();
            if graph.phase() != phase.name() {
                return Err(GraphError::InvalidGraphDefinition {
                    phase: phase.name().to_string(),
                    node_id: graph.base().to_string(),
                    reason: format!("graph is labelled '{}'", graph.phase()),
                });
            }
            graph.validate()?;
        }
        Ok(())
    }
}
