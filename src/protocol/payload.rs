/// Inbound device payload handling
///
/// Devices answer with free-form text. The text is matched case-insensitively
/// for an affirmative marker; anything else counts as a failure. Payloads may
/// also carry an explicit `outcome` tag and the `seq` of the command they
/// answer, which take precedence over the text.
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Substrings that mark a response as a success.
pub const SUCCESS_MARKERS: &[&str] = &["acierto", "success"];

/// Resolved result of an outstanding command.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[display("success")]
    Success,
    #[display("failure")]
    Failure,
}

/// Application-level event name carried by a gateway message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Response,
    ResultPayload,
    Status,
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "response" => Self::Response,
            "resultPayload" | "result_payload" => Self::ResultPayload,
            "status" => Self::Status,
            other => Self::Other(other.to_string()),
        }
    }

    /// Only answer events may resolve an outstanding command.
    pub fn is_answer(&self) -> bool {
        matches!(self, Self::Response | Self::ResultPayload)
    }
}

/// Decoded view of a device answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAnswer {
    pub outcome: Outcome,
    /// Sequence number of the command this answer claims to resolve.
    pub seq: Option<u64>,
    pub text: String,
}

/// Classify free text by the success markers.
pub fn classify_text(text: &str) -> Outcome {
    let lowered = text.to_lowercase();
    if SUCCESS_MARKERS.iter().any(|m| lowered.contains(m)) {
        Outcome::Success
    } else {
        Outcome::Failure
    }
}

fn parse_tag(value: &Value) -> Option<Outcome> {
    match value.as_str()?.to_lowercase().as_str() {
        "success" | "acierto" => Some(Outcome::Success),
        "failure" | "error" | "fallo" => Some(Outcome::Failure),
        _ => None,
    }
}

/// Decode a raw payload into an answer.
///
/// Non-JSON payloads are treated as the message text. JSON objects are read
/// for `outcome`/`result`, `message`/`mensaje` and `seq`; a JSON payload
/// without any usable field is a failure.
pub fn parse_answer(raw: &str) -> DeviceAnswer {
    let trimmed = raw.trim();
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return DeviceAnswer {
            outcome: classify_text(trimmed),
            seq: None,
            text: trimmed.to_string(),
        };
    };

    match value {
        Value::Object(map) => {
            let text = map
                .get("message")
                .or_else(|| map.get("mensaje"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let tagged = map
                .get("outcome")
                .or_else(|| map.get("result"))
                .and_then(parse_tag);
            let seq = map.get("seq").and_then(Value::as_u64);
            let outcome = tagged.unwrap_or_else(|| classify_text(&text));
            DeviceAnswer { outcome, seq, text }
        }
        Value::String(text) => DeviceAnswer {
            outcome: classify_text(&text),
            seq: None,
            text,
        },
        other => DeviceAnswer {
            outcome: Outcome::Failure,
            seq: None,
            text: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_markers() {
        assert_eq!(classify_text("acierto en 1.2s"), Outcome::Success);
        assert_eq!(classify_text("ACIERTO"), Outcome::Success);
        assert_eq!(classify_text("Jump SUCCESS"), Outcome::Success);
        assert_eq!(classify_text("fallo"), Outcome::Failure);
        assert_eq!(classify_text(""), Outcome::Failure);
    }

    #[test]
    fn test_plain_and_json_payloads() {
        let plain = parse_answer("acierto en 1.2s");
        assert_eq!(plain.outcome, Outcome::Success);
        assert_eq!(plain.text, "acierto en 1.2s");

        let json = parse_answer(r#"{"message":"Acierto 0.8s","seq":7}"#);
        assert_eq!(json.outcome, Outcome::Success);
        assert_eq!(json.seq, Some(7));

        let quoted = parse_answer(r#""success""#);
        assert_eq!(quoted.outcome, Outcome::Success);
    }

    #[test]
    fn test_explicit_tag_wins() {
        let answer = parse_answer(r#"{"outcome":"failure","message":"acierto"}"#);
        assert_eq!(answer.outcome, Outcome::Failure);

        let answer = parse_answer(r#"{"result":"success","message":"timeout"}"#);
        assert_eq!(answer.outcome, Outcome::Success);
    }

    #[test]
    fn test_malformed_is_failure() {
        assert_eq!(parse_answer(r#"{"foo":1}"#).outcome, Outcome::Failure);
        assert_eq!(parse_answer("42").outcome, Outcome::Failure);
        assert_eq!(parse_answer(r#"{"message":5}"#).outcome, Outcome::Failure);
    }

    #[test]
    fn test_event_kinds() {
        assert!(EventKind::parse("response").is_answer());
        assert!(EventKind::parse("resultPayload").is_answer());
        assert!(!EventKind::parse("status").is_answer());
        assert_eq!(
            EventKind::parse("heartbeat"),
            EventKind::Other("heartbeat".to_string())
        );
    }
}
