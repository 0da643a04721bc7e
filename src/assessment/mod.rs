//! Assessment phase definitions: question graphs, questionnaires, the phase
//! sequence, and pure score aggregation.

pub mod graph;
pub mod phases;
pub mod registry;
pub mod scoring;

pub use graph::{Category, QuestionGraph, QuestionNode, Target, END};
pub use phases::Questionnaire;
pub use registry::{PhaseRegistry, PhaseStep};
pub use scoring::{QuestionScore, ScoreBounds, ScoreSheet, SeverityBands};
