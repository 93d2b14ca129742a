use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::parse_timestamp;

/// Models added within this many days are flagged as new.
pub const NEW_MODEL_WINDOW_DAYS: i64 = 30;

/// Model details as returned by `/chat/chat_types/details` and `/llm/details`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDetails {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub date_added: Option<String>,
    #[serde(default)]
    pub is_multi: bool,
    #[serde(default)]
    pub model_params: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A selectable model, shaped for pickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatModel {
    /// The `llm_type` sent with generate calls.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub purposes: Vec<String>,
    pub is_new: bool,
    pub is_multimodal: bool,
    pub model_params: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ChatModel {
    pub fn from_details(details: ModelDetails, now: DateTime<Utc>) -> Self {
        let is_new = details
            .date_added
            .as_deref()
            .and_then(parse_timestamp)
            .map(|added| is_within_new_window(added, now))
            .unwrap_or(false);

        let name = if details.name.is_empty() {
            details.id.clone()
        } else {
            details.name
        };

        Self {
            id: details.id,
            name,
            description: details.description,
            purposes: details.capabilities,
            is_new,
            is_multimodal: details.is_multi,
            model_params: details.model_params,
        }
    }
}

fn is_within_new_window(added: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    // Whole days, rounded toward negative infinity like a floor division.
    let seconds = (now - added).num_seconds();
    let days = seconds.div_euclid(86_400);
    days <= NEW_MODEL_WINDOW_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn details(date_added: Option<&str>) -> ModelDetails {
        ModelDetails {
            id: "VertexAI-Chat".to_string(),
            name: "Gemini".to_string(),
            description: Some("General purpose".to_string()),
            capabilities: vec!["chat".to_string()],
            date_added: date_added.map(str::to_string),
            is_multi: true,
            model_params: None,
        }
    }

    #[test]
    fn test_is_new_window_edges() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();

        let day_30 = (now - Duration::days(30)).to_rfc3339();
        assert!(ChatModel::from_details(details(Some(&day_30)), now).is_new);

        let just_over = (now - Duration::days(31)).to_rfc3339();
        assert!(!ChatModel::from_details(details(Some(&just_over)), now).is_new);

        let today = now.to_rfc3339();
        assert!(ChatModel::from_details(details(Some(&today)), now).is_new);
    }

    #[test]
    fn test_missing_or_bad_date_is_not_new() {
        let now = Utc::now();
        assert!(!ChatModel::from_details(details(None), now).is_new);
        assert!(!ChatModel::from_details(details(Some("soon")), now).is_new);
    }

    #[test]
    fn test_maps_capabilities_and_params() {
        let mut d = details(None);
        let mut params = serde_json::Map::new();
        params.insert("temperature".to_string(), serde_json::json!(0.2));
        d.model_params = Some(params);

        let model = ChatModel::from_details(d, Utc::now());
        assert_eq!(model.purposes, vec!["chat".to_string()]);
        assert!(model.is_multimodal);
        assert_eq!(
            model.model_params.and_then(|p| p.get("temperature").cloned()),
            Some(serde_json::json!(0.2))
        );
    }
}
