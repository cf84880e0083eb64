use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::error::{AppError, AppResult};

/// User reaction to an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Like,
    Dislike,
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Like => write!(f, "like"),
            Action::Dislike => write!(f, "dislike"),
        }
    }
}

/// Interaction event posted by the web front end and carried on the queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractEvent {
    /// Identifier of user
    pub user_id: String,
    /// Identifiers of interacted items
    pub item_ids: Vec<String>,
    /// Positive or negative reaction for each item, index-aligned with `item_ids`
    pub actions: Vec<Action>,
    /// Seconds since the Unix epoch, stamped by the collector
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl InteractEvent {
    /// Checks that the event can be exploded into log rows
    pub fn validate(&self) -> AppResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("user_id must not be empty".to_string()));
        }
        if self.item_ids.is_empty() {
            return Err(AppError::InvalidInput("item_ids must not be empty".to_string()));
        }
        if self.item_ids.len() != self.actions.len() {
            return Err(AppError::InvalidInput(format!(
                "item_ids and actions differ in length ({} vs {})",
                self.item_ids.len(),
                self.actions.len()
            )));
        }
        Ok(())
    }

    /// Explodes the event into one log row per (item, action) pair
    ///
    /// Events without a timestamp get `0.0`, which orders them before
    /// anything stamped by the collector.
    pub fn into_rows(self) -> Vec<InteractionRow> {
        let timestamp = self.timestamp.unwrap_or_default();
        let user_id = self.user_id;
        self.item_ids
            .into_iter()
            .zip(self.actions)
            .map(|(item_id, action)| InteractionRow {
                user_id: user_id.clone(),
                item_id,
                action,
                timestamp,
            })
            .collect()
    }
}

/// One row of the interaction log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRow {
    pub user_id: String,
    pub item_id: String,
    pub action: Action,
    pub timestamp: f64,
}

/// New catalog items announced to the recommendations service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItemsEvent {
    pub item_ids: Vec<String>,
}

/// Body of `/recs/{user_id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecommendationsResponse {
    /// List of recommended items
    #[serde(default)]
    pub item_ids: Vec<String>,
}

/// Current time as fractional seconds since the Unix epoch
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(items: &[&str], actions: Vec<Action>) -> InteractEvent {
        InteractEvent {
            user_id: "u1".to_string(),
            item_ids: items.iter().map(|s| s.to_string()).collect(),
            actions,
            timestamp: Some(1700000000.5),
        }
    }

    #[test]
    fn test_action_wire_format() {
        assert_eq!(serde_json::to_value(Action::Like).unwrap(), json!("like"));
        assert_eq!(
            serde_json::from_value::<Action>(json!("dislike")).unwrap(),
            Action::Dislike
        );
        assert!(serde_json::from_value::<Action>(json!("love")).is_err());
    }

    #[test]
    fn test_interact_event_without_timestamp() {
        let parsed: InteractEvent = serde_json::from_value(json!({
            "user_id": "u1",
            "item_ids": ["10", "20"],
            "actions": ["like", "dislike"]
        }))
        .unwrap();
        assert_eq!(parsed.timestamp, None);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_length_mismatch() {
        let e = event(&["10", "20"], vec![Action::Like]);
        assert!(matches!(e.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_empty_items() {
        let e = event(&[], vec![]);
        assert!(matches!(e.validate(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_blank_user() {
        let mut e = event(&["10"], vec![Action::Like]);
        e.user_id = "  ".to_string();
        assert!(e.validate().is_err());
    }

    #[test]
    fn test_into_rows_explodes_pairs() {
        let rows = event(&["10", "20"], vec![Action::Like, Action::Dislike]).into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].item_id, "10");
        assert_eq!(rows[0].action, Action::Like);
        assert_eq!(rows[1].item_id, "20");
        assert_eq!(rows[1].action, Action::Dislike);
        assert!(rows.iter().all(|r| r.user_id == "u1" && r.timestamp == 1700000000.5));
    }

    #[test]
    fn test_recommendations_response_defaults_to_empty() {
        let parsed: RecommendationsResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.item_ids.is_empty());
    }
}
