use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// The triggering event a law is evaluated against.
///
/// `data` supports dot-separated paths such as `"poll.options.count"`.
/// Read-only once handed to a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawContext {
    /// `None` for system-triggered events such as scheduled checks.
    pub user_id: Option<i64>,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Json>,
    #[serde(default)]
    pub session: Option<Json>,
}

impl Default for LawContext {
    fn default() -> Self {
        Self::new("")
    }
}

impl LawContext {
    /// A system event (no acting user) stamped with the current time.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            user_id: None,
            action: action.into(),
            timestamp: Utc::now(),
            data: Map::new(),
            session: None,
        }
    }

    #[must_use]
    pub fn for_user(user_id: i64, action: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(action)
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_session(mut self, session: Json) -> Self {
        self.session = Some(session);
        self
    }

    /// Set a value at a dot-separated path. Creates intermediate objects as needed.
    #[must_use]
    pub fn set(mut self, path: &str, value: impl Into<Json>) -> Self {
        self.insert(path, value.into());
        self
    }

    pub fn insert(&mut self, path: &str, value: Json) {
        let segments: Vec<&str> = path.split('.').collect();
        Self::insert_recursive(&mut self.data, &segments, value);
    }

    /// Look up a value by dot-separated path. Intermediate objects are
    /// returned as well as leaves.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Json> {
        let segments: Vec<&str> = path.split('.').collect();
        Self::get_recursive(&self.data, &segments)
    }

    fn insert_recursive(map: &mut Map<String, Json>, segments: &[&str], value: Json) {
        match segments {
            [] => {}
            [last] => {
                map.insert((*last).to_owned(), value);
            }
            [first, rest @ ..] => {
                let entry = map
                    .entry((*first).to_owned())
                    .or_insert_with(|| Json::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Json::Object(Map::new());
                }
                if let Json::Object(nested) = entry {
                    Self::insert_recursive(nested, rest, value);
                }
            }
        }
    }

    fn get_recursive<'a>(map: &'a Map<String, Json>, segments: &[&str]) -> Option<&'a Json> {
        match segments {
            [] => None,
            [last] => map.get(*last),
            [first, rest @ ..] => match map.get(*first)? {
                Json::Object(nested) => Self::get_recursive(nested, rest),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_and_get_nested() {
        let ctx = LawContext::new("vote").set("poll.id", 4);
        assert_eq!(ctx.get("poll.id"), Some(&json!(4)));
        assert_eq!(ctx.get("poll"), Some(&json!({"id": 4})));
    }

    #[test]
    fn get_missing_returns_none() {
        let ctx = LawContext::new("vote").set("poll.id", 4);
        assert_eq!(ctx.get("poll.title"), None);
        assert_eq!(ctx.get("poll.id.deeper"), None);
        assert_eq!(ctx.get("nothing"), None);
    }

    #[test]
    fn overwrite_leaf_with_nested() {
        let ctx = LawContext::new("x")
            .set("user", "old")
            .set("user.age", 30);
        assert_eq!(ctx.get("user.age"), Some(&json!(30)));
    }

    #[test]
    fn user_context() {
        let ctx = LawContext::for_user(9, "create_party");
        assert_eq!(ctx.user_id, Some(9));
        assert_eq!(ctx.action, "create_party");
        assert!(LawContext::new("time_check").user_id.is_none());
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let ctx: LawContext = serde_json::from_str(
            r#"{"user_id": null, "action": "time_check", "timestamp": "2024-05-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(ctx.data.is_empty());
        assert_eq!(ctx.session, None);
    }
}
