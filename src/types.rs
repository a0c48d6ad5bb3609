use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-assigned user identity, monotonic via the directory shard's
/// auto-increment.
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(rename = "name")]
    pub login: String,
}

/// A single dialogue message. Immutable once written; owned by exactly one
/// shard at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: UserId,
    pub to: UserId,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Message {
    /// Primary key of the message table on every shard.
    pub fn key(&self) -> (UserId, UserId, DateTime<Utc>) {
        (self.from, self.to, self.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_wire_format() {
        let user = User {
            id: 7,
            login: "alice".to_string(),
        };
        let json = serde_json::to_value(&user).unwrap();
        // the HTTP layer serializes `login` under `name`
        assert_eq!(json, serde_json::json!({"id": 7, "name": "alice"}));
    }

    #[test]
    fn test_message_round_trip() {
        let msg = Message {
            from: 1,
            to: 2,
            text: "hello".to_string(),
            at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
