use serde::{Deserialize, Serialize};

use crate::NegotiationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpKind::Offer => f.write_str("offer"),
            SdpKind::Answer => f.write_str("answer"),
        }
    }
}

/// Immutable description blob; serializes as `{"type": ..., "sdp": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(rename = "sdp")]
    pub body: String,
}

impl SessionDescription {
    /// Accepts text that at least looks like SDP: non-empty and opening with a
    /// version line. Deeper validation is left to the engine.
    pub fn parse(kind: SdpKind, text: &str) -> Result<Self, NegotiationError> {
        let trimmed = text.trim_start();
        if trimmed.is_empty() {
            return Err(NegotiationError::InvalidDescription(format!(
                "empty {kind} description"
            )));
        }
        if !trimmed.starts_with("v=") {
            return Err(NegotiationError::InvalidDescription(format!(
                "{kind} description does not start with a version line"
            )));
        }
        Ok(Self {
            kind,
            body: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_garbage_text_are_rejected() {
        for text in ["", "   \r\n", "hello", "{\"offer\":1}"] {
            assert!(matches!(
                SessionDescription::parse(SdpKind::Offer, text),
                Err(NegotiationError::InvalidDescription(_))
            ));
        }
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let desc = SessionDescription::parse(SdpKind::Answer, "v=0\r\n").unwrap();
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["sdp"], "v=0\r\n");
    }
}
