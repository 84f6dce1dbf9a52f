use shared::{CropStatus, PredictionResponse};

pub const DEFAULT_THRESHOLD: f64 = 0.6;

const HEALTHY_LABEL: &str = "Healthy";
const DISEASED_LABEL: &str = "Disease Detected";
const HEALTHY_RECOMMENDATION: &str = "Your crop looks healthy. Keep monitoring regularly.";
const DISEASED_RECOMMENDATION: &str =
    "Disease signs detected. Isolate the plant and consult an agronomist immediately.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub status: CropStatus,
    pub confidence: f64,
    pub disease_name: &'static str,
    pub recommendation: &'static str,
}

/// Maps P(diseased) to a two-class decision. Confidence is reported for the
/// winning class, so the healthy branch reports `1 - p`.
pub fn decide(probability: f64, threshold: f64) -> Decision {
    let p = probability.clamp(0.0, 1.0);
    if p >= threshold {
        Decision {
            status: CropStatus::Affected,
            confidence: p,
            disease_name: DISEASED_LABEL,
            recommendation: DISEASED_RECOMMENDATION,
        }
    } else {
        Decision {
            status: CropStatus::Healthy,
            confidence: 1.0 - p,
            disease_name: HEALTHY_LABEL,
            recommendation: HEALTHY_RECOMMENDATION,
        }
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

impl From<Decision> for PredictionResponse {
    fn from(decision: Decision) -> Self {
        PredictionResponse {
            status: decision.status,
            confidence: round4(decision.confidence),
            disease_name: decision.disease_name.to_string(),
            recommendation: decision.recommendation.to_string(),
        }
    }
}
