//! Payload builders

use serde_json::{json, Value};

pub fn event_fields(name: &str) -> Value {
    json!({
        "name": name,
        "timezone": "America/Los_Angeles",
        "datetime": "2026-07-13T16:00:00Z",
        "notes": "recording secretary: check quorum"
    })
}

pub fn motion_fields(event_id: &Value, title: &str) -> Value {
    json!({
        "eventId": event_id,
        "title": title,
        "type": "motion",
        "movedBy": 10,
        "secondedBy": 11
    })
}

pub fn strawpoll_fields(event_id: &Value, title: &str, options: &[&str]) -> Value {
    json!({
        "eventId": event_id,
        "title": title,
        "type": "strawpoll",
        "choice": "multiple",
        "options": options,
        "voters": "anyone"
    })
}
