use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Classify,
    RetrieveKnowledge,
    FetchRegional,
    SynthesizeDiagnosis,
    EvaluateAlert,
    Done,
    Failed,
}

impl Stage {
    /// Working stages in execution order
    pub const ORDER: [Stage; 5] = [
        Stage::Classify,
        Stage::RetrieveKnowledge,
        Stage::FetchRegional,
        Stage::SynthesizeDiagnosis,
        Stage::EvaluateAlert,
    ];

    pub fn next(self) -> Stage {
        match self {
            Stage::Classify => Stage::RetrieveKnowledge,
            Stage::RetrieveKnowledge => Stage::FetchRegional,
            Stage::FetchRegional => Stage::SynthesizeDiagnosis,
            Stage::SynthesizeDiagnosis => Stage::EvaluateAlert,
            Stage::EvaluateAlert => Stage::Done,
            Stage::Done => Stage::Done,
            Stage::Failed => Stage::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "CLASSIFY",
            Stage::RetrieveKnowledge => "RETRIEVE_KNOWLEDGE",
            Stage::FetchRegional => "FETCH_REGIONAL",
            Stage::SynthesizeDiagnosis => "SYNTHESIZE_DIAGNOSIS",
            Stage::EvaluateAlert => "EVALUATE_ALERT",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_walks_to_done() {
        let mut stage = Stage::Classify;
        for expected in Stage::ORDER {
            assert_eq!(stage, expected);
            stage = stage.next();
        }
        assert_eq!(stage, Stage::Done);
        assert_eq!(Stage::Failed.next(), Stage::Failed);
        assert!(Stage::Failed.is_terminal());
    }
}
