use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CropStatus {
    Healthy,
    Affected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub status: CropStatus,
    /// Probability of the reported class, rounded to 4 decimal places.
    pub confidence: f64,
    pub disease_name: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn crop_status_uses_lowercase_names() {
        assert_eq!(CropStatus::Affected.to_string(), "affected");
        assert_eq!(CropStatus::from_str("healthy").unwrap(), CropStatus::Healthy);
        assert_eq!(
            serde_json::to_string(&CropStatus::Healthy).unwrap(),
            "\"healthy\""
        );
    }

    #[test]
    fn prediction_response_wire_shape() {
        let response = PredictionResponse {
            status: CropStatus::Affected,
            confidence: 0.8123,
            disease_name: "Disease Detected".into(),
            recommendation: "Isolate".into(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "affected");
        assert_eq!(value["confidence"], 0.8123);
        assert_eq!(value["disease_name"], "Disease Detected");
        assert_eq!(value["recommendation"], "Isolate");
    }

    #[test]
    fn health_ok_serializes_to_status_ok() {
        let value = serde_json::to_value(HealthResponse::ok()).unwrap();
        assert_eq!(value, serde_json::json!({"status": "ok"}));
    }
}
