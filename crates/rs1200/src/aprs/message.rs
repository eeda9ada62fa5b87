/**
 * APRS messages (`:` data type).
 *
 * The addressee is a fixed-width nine-byte field padded with spaces,
 * then a colon, then up to 67 characters of text, then an optional
 * `{XXXXX` message id. Bodies of exactly `ackXXXXX` / `rejXXXXX` are
 * acknowledgements and rejects for the id they carry. Addressees of the
 * form `BLNn` are bulletins, `ANN*` announcements.
 */
use serde::Serialize;

use super::AprsError;

/// Maximum message text length per the APRS spec.
pub const MAX_BODY: usize = 67;

/// Maximum message-id length.
pub const MAX_ID: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Ack,
    Reject,
    Bulletin,
    Announcement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AprsMessage {
    pub addressee: String,
    pub kind: MessageKind,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl AprsMessage {
    pub(crate) fn decode(body: &[u8]) -> Result<Self, AprsError> {
        if body.len() < 10 || body[9] != b':' {
            return Err(AprsError::BadMessage);
        }
        let addressee = String::from_utf8_lossy(&body[..9])
            .trim_end()
            .to_string();
        if addressee.is_empty() {
            return Err(AprsError::BadMessage);
        }
        let text = &body[10..];

        // ack / rej never carry an id suffix; the id *is* the body.
        if let Some(id) = text.strip_prefix(b"ack") {
            if (1..=MAX_ID).contains(&id.len()) && id.is_ascii() {
                return Ok(AprsMessage {
                    addressee,
                    kind: MessageKind::Ack,
                    body: String::new(),
                    id: Some(String::from_utf8_lossy(id).to_string()),
                });
            }
        }
        if let Some(id) = text.strip_prefix(b"rej") {
            if (1..=MAX_ID).contains(&id.len()) && id.is_ascii() {
                return Ok(AprsMessage {
                    addressee,
                    kind: MessageKind::Reject,
                    body: String::new(),
                    id: Some(String::from_utf8_lossy(id).to_string()),
                });
            }
        }

        let (text, id) = match text.iter().rposition(|&b| b == b'{') {
            Some(at) if text.len() - at - 1 <= MAX_ID => (
                &text[..at],
                Some(String::from_utf8_lossy(&text[at + 1..]).to_string()),
            ),
            _ => (text, None),
        };

        let kind = if addressee.starts_with("BLN") {
            MessageKind::Bulletin
        } else if addressee.starts_with("ANN") {
            MessageKind::Announcement
        } else {
            MessageKind::Message
        };

        let mut body = String::from_utf8_lossy(text).to_string();
        body.truncate(MAX_BODY);
        Ok(AprsMessage { addressee, kind, body, id })
    }

    /// The information field for this message, `:` included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(80);
        out.push(b':');
        out.extend_from_slice(format!("{:<9}", self.addressee).as_bytes());
        out.push(b':');
        match self.kind {
            MessageKind::Ack => {
                out.extend_from_slice(b"ack");
                if let Some(id) = &self.id {
                    out.extend_from_slice(id.as_bytes());
                }
            }
            MessageKind::Reject => {
                out.extend_from_slice(b"rej");
                if let Some(id) = &self.id {
                    out.extend_from_slice(id.as_bytes());
                }
            }
            _ => {
                let body: String =
                    self.body.chars().take(MAX_BODY).collect();
                out.extend_from_slice(body.as_bytes());
                if let Some(id) = &self.id {
                    out.push(b'{');
                    out.extend_from_slice(id.as_bytes());
                }
            }
        }
        out
    }

    /// Build an acknowledgment for a received message.
    pub fn ack(addressee: &str, id: &str) -> Self {
        AprsMessage {
            addressee: addressee.to_string(),
            kind: MessageKind::Ack,
            body: String::new(),
            id: Some(id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_message_with_id() {
        let msg =
            AprsMessage::decode(b"K1FSY-9  :QSL? see you at the club{042")
                .unwrap();
        assert_eq!(msg.addressee, "K1FSY-9");
        assert_eq!(msg.kind, MessageKind::Message);
        assert_eq!(msg.body, "QSL? see you at the club");
        assert_eq!(msg.id.as_deref(), Some("042"));
    }

    #[test]
    fn message_without_id() {
        let msg = AprsMessage::decode(b"W1AW     :hello there").unwrap();
        assert_eq!(msg.id, None);
        assert_eq!(msg.body, "hello there");
    }

    #[test]
    fn body_may_contain_colons_and_braces() {
        let msg =
            AprsMessage::decode(b"W1AW     :time: 12:30 {x} ok{99").unwrap();
        assert_eq!(msg.body, "time: 12:30 {x} ok");
        assert_eq!(msg.id.as_deref(), Some("99"));
    }

    #[test]
    fn ack_and_rej() {
        let ack = AprsMessage::decode(b"K1FSY-9  :ack042").unwrap();
        assert_eq!(ack.kind, MessageKind::Ack);
        assert_eq!(ack.id.as_deref(), Some("042"));

        let rej = AprsMessage::decode(b"K1FSY-9  :rej042").unwrap();
        assert_eq!(rej.kind, MessageKind::Reject);
        assert_eq!(rej.id.as_deref(), Some("042"));
    }

    #[test]
    fn overlong_ack_id_is_a_message() {
        let msg = AprsMessage::decode(b"W1AW     :acknowledged!").unwrap();
        assert_eq!(msg.kind, MessageKind::Message);
        assert_eq!(msg.body, "acknowledged!");
    }

    #[test]
    fn bulletin() {
        let msg =
            AprsMessage::decode(b"BLN3     :Club meeting Tuesday 1900")
                .unwrap();
        assert_eq!(msg.kind, MessageKind::Bulletin);
    }

    #[test]
    fn malformed_rejected() {
        assert!(AprsMessage::decode(b"TOO SHORT").is_err());
        assert!(AprsMessage::decode(b"NOCOLONXXXhello").is_err());
    }

    #[test]
    fn encode_round_trip() {
        let msg = AprsMessage {
            addressee: "W1ABC".to_string(),
            kind: MessageKind::Message,
            body: "Hello".to_string(),
            id: Some("001".to_string()),
        };
        let encoded = msg.encode();
        assert_eq!(encoded, b":W1ABC    :Hello{001");
        let decoded = AprsMessage::decode(&encoded[1..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encode_ack() {
        let ack = AprsMessage::ack("K1FSY-9", "042");
        assert_eq!(ack.encode(), b":K1FSY-9  :ack042");
    }
}
