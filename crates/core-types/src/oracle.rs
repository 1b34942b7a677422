// In crates/core-types/src/oracle.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Side;

/// The oracle's directional opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bias {
    Long,
    Short,
    Neutral,
}

impl Bias {
    pub fn side(&self) -> Option<Side> {
        match self {
            Bias::Long => Some(Side::Long),
            Bias::Short => Some(Side::Short),
            Bias::Neutral => None,
        }
    }
}

/// A structured qualitative assessment from the language-model oracle.
///
/// `rationale` is kept for the audit trail only. Control decisions read `bias`
/// and `confidence` and nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleAssessment {
    pub bias: Bias,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
}

/// The outcome of one oracle call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OracleReading {
    Assessment(OracleAssessment),
    Failed { reason: String },
    TimedOut,
}

impl OracleReading {
    pub fn assessment(&self) -> Option<&OracleAssessment> {
        match self {
            OracleReading::Assessment(a) => Some(a),
            _ => None,
        }
    }
}
