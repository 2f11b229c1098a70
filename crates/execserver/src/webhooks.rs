//! Mapping of third-party webhook payloads into trigger seed data.

use serde_json::{Map, Value};

fn field(body: &Value, key: &str) -> Value {
    body.get(key).cloned().unwrap_or(Value::Null)
}

fn seed(key: &str, data: Map<String, Value>) -> Map<String, Value> {
    let mut initial = Map::new();
    initial.insert(key.to_string(), Value::Object(data));
    initial
}

/// `{googleForm: {...}}` from a Google Forms Apps Script submission.
pub fn google_form_seed(body: Value) -> Map<String, Value> {
    let mut form = Map::new();
    for key in [
        "formId",
        "formTitle",
        "responseId",
        "timestamp",
        "respondentEmail",
        "responses",
    ] {
        form.insert(key.to_string(), field(&body, key));
    }
    // workflows written against the Apps Script payload reference `timeStamp`
    form.insert("timeStamp".to_string(), field(&body, "timestamp"));
    form.insert("raw".to_string(), body);
    seed("googleForm", form)
}

/// `{stripe: {...}}` from a Stripe event object.
pub fn stripe_seed(body: Value) -> Map<String, Value> {
    let mut event = Map::new();
    event.insert("eventId".to_string(), field(&body, "id"));
    event.insert("eventType".to_string(), field(&body, "type"));
    event.insert("timestamp".to_string(), field(&body, "created"));
    event.insert("livemode".to_string(), field(&body, "livemode"));
    event.insert("raw".to_string(), body);
    seed("stripe", event)
}
