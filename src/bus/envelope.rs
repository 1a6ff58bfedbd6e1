//! Envelope codec for bus messages.

use super::BusError;
use crate::domain::{ProbeResult, Target};

use serde::{Deserialize, Serialize};

/// One target paired with one of its probe results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "website")]
    pub target: Target,
    pub result: ProbeResult,
}

impl Envelope {
    pub fn new(target: Target, result: ProbeResult) -> Self {
        Self { target, result }
    }

    /// The message key: all results of one target share it.
    pub fn key(&self) -> &str {
        self.target.id()
    }

    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(self).map_err(BusError::Serialize)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(payload).map_err(BusError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_decode_wire_payload() {
        let payload = json!({
            "website": {
                "id": "55065fa3a951948bbb31caf615859b0dbedbb8c5",
                "url": "http://foo.org",
                "method": "GET",
                "match_regexp": "foo*",
            },
            "result": {
                "elapsed": 250_000_000u64,
                "status": null,
                "matched": null,
                "unreachable": true,
                "at": "2021-03-04T05:06:07Z",
            },
        });

        let envelope = Envelope::decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.key(), "55065fa3a951948bbb31caf615859b0dbedbb8c5");
        assert_eq!(envelope.target.match_regexp(), Some("foo*"));
        assert_eq!(envelope.result.elapsed, Duration::from_millis(250));
        assert!(envelope.result.unreachable);
        assert_eq!(envelope.result.status, None);
    }

    #[test]
    fn test_encode_uses_website_field() {
        let target = Target::new("https://bar.org", "HEAD", "").unwrap();
        let envelope = Envelope::new(target, ProbeResult::completed(Duration::ZERO, 204, None));

        let value: serde_json::Value = serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        assert_eq!(value["website"]["method"], "HEAD");
        assert_eq!(value["website"]["match_regexp"], serde_json::Value::Null);
        assert_eq!(value["result"]["status"], 204);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode(b"not json"),
            Err(BusError::Deserialize(_))
        ));
        assert!(matches!(
            Envelope::decode(br#"{"website": {"id": "x", "url": "mailto:a@b", "method": "GET", "match_regexp": null}, "result": {}}"#),
            Err(BusError::Deserialize(_))
        ));
    }
}
