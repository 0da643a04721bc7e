use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Inclusive per-question score range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBounds {
    pub low: i64,
    pub high: i64,
}

impl ScoreBounds {
    pub const fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Final score for one question as returned by the scoring pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub score: i64,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl QuestionScore {
    pub fn new(score: i64) -> Self {
        Self {
            score,
            remark: String::new(),
            snippet: String::new(),
            keywords: Vec::new(),
        }
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }
}

/// Per-question scores keyed by question number.
pub type ScoreSheet = BTreeMap<String, QuestionScore>;

/// Sum of all question scores.
pub fn sum_scores(sheet: &ScoreSheet) -> i64 {
    sheet.values().map(|s| s.score).sum()
}

/// Ordered cut-offs mapping a total to a label.
///
/// Each band is `(inclusive upper bound, label)`; totals above every bound
/// fall into `above`.
#[derive(Debug, Clone, Copy)]
pub struct SeverityBands {
    bands: &'static [(i64, &'static str)],
    above: &'static str,
}

impl SeverityBands {
    pub const fn new(bands: &'static [(i64, &'static str)], above: &'static str) -> Self {
        Self { bands, above }
    }

    pub fn classify(&self, total: i64) -> &'static str {
        self.bands
            .iter()
            .find(|(upper, _)| total <= *upper)
            .map(|(_, label)| *label)
            .unwrap_or(self.above)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANDS: SeverityBands = SeverityBands::new(&[(4, "Low"), (9, "Mid")], "High");

    #[test]
    fn test_bands_are_inclusive_upper_bounds() {
        assert_eq!(BANDS.classify(0), "Low");
        assert_eq!(BANDS.classify(4), "Low");
        assert_eq!(BANDS.classify(5), "Mid");
        assert_eq!(BANDS.classify(9), "Mid");
        assert_eq!(BANDS.classify(10), "High");
    }

    #[test]
    fn test_sum_scores() {
        let mut sheet = ScoreSheet::new();
        sheet.insert("1".to_string(), QuestionScore::new(2));
        sheet.insert("2".to_string(), QuestionScore::new(3));
        assert_eq!(sum_scores(&sheet), 5);
        assert_eq!(sum_scores(&ScoreSheet::new()), 0);
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = ScoreBounds::new(0, 3);
        assert!(bounds.contains(0));
        assert!(bounds.contains(3));
        assert!(!bounds.contains(4));
        assert!(!bounds.contains(-1));
    }

    #[test]
    fn test_question_score_deserializes_with_defaults() {
        let score: QuestionScore = serde_json::from_str(r#"{"score": 2}"#).unwrap();
        assert_eq!(score, QuestionScore::new(2));
    }
}
