use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{RelayError, Result};

/// Content submitted by a client, after decoding at the transport boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    Text(String),
    Image { name: String, bytes: Arc<Vec<u8>> },
}

// Wire shape sent by chat clients. Image is tried first since an image frame
// never carries a `message` field.
#[derive(Deserialize)]
#[serde(untagged)]
enum InboundWire {
    Image { image: String, image_name: String },
    Text { message: String },
}

impl InboundContent {
    /// Decode a text frame into content. Anything that does not match one of
    /// the known shapes is a parse error; no field is silently defaulted.
    pub fn decode(raw: &str, max_image_bytes: usize) -> Result<Self> {
        let wire: InboundWire = serde_json::from_str(raw)
            .map_err(|e| RelayError::MessageParseError(format!("Invalid JSON: {}", e)))?;

        match wire {
            InboundWire::Text { message } => Ok(InboundContent::Text(message)),
            InboundWire::Image { image, image_name } => {
                // Reject before decoding when even the encoded form is too large
                if image.len() / 4 * 3 > max_image_bytes + 3 {
                    return Err(RelayError::MessageTooLarge(image.len() / 4 * 3));
                }
                let bytes = BASE64.decode(image.as_bytes()).map_err(|e| {
                    RelayError::MessageParseError(format!("Invalid image encoding: {}", e))
                })?;
                if bytes.len() > max_image_bytes {
                    return Err(RelayError::MessageTooLarge(bytes.len()));
                }
                Ok(InboundContent::Image {
                    name: image_name,
                    bytes: Arc::new(bytes),
                })
            }
        }
    }
}

/// Event fanned out to every recipient by the broadcast router
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message {
        sender_ip: IpAddr,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Image {
        sender_ip: IpAddr,
        #[serde(serialize_with = "serialize_base64")]
        image: Arc<Vec<u8>>,
        image_name: String,
        timestamp: DateTime<Utc>,
    },
    UserJoined {
        message: String,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        message: String,
        timestamp: DateTime<Utc>,
    },
    UserBanned {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl OutboundEvent {
    pub fn chat(sender_ip: IpAddr, message: String) -> Self {
        OutboundEvent::Message {
            sender_ip,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn image(sender_ip: IpAddr, image_name: String, image: Arc<Vec<u8>>) -> Self {
        OutboundEvent::Image {
            sender_ip,
            image,
            image_name,
            timestamp: Utc::now(),
        }
    }

    pub fn joined(address: IpAddr) -> Self {
        OutboundEvent::UserJoined {
            message: format!("User from {} joined the chat", address),
            timestamp: Utc::now(),
        }
    }

    pub fn left(address: IpAddr) -> Self {
        OutboundEvent::UserLeft {
            message: format!("User from {} left the chat", address),
            timestamp: Utc::now(),
        }
    }

    pub fn banned(address: IpAddr) -> Self {
        OutboundEvent::UserBanned {
            message: format!("User from {} was banned for policy violation", address),
            timestamp: Utc::now(),
        }
    }

    /// Wire name of this event's `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Message { .. } => "message",
            OutboundEvent::Image { .. } => "image",
            OutboundEvent::UserJoined { .. } => "user_joined",
            OutboundEvent::UserLeft { .. } => "user_left",
            OutboundEvent::UserBanned { .. } => "user_banned",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RelayError::MessageParseError(e.to_string()))
    }
}

fn serialize_base64<S: Serializer>(bytes: &Arc<Vec<u8>>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(bytes.as_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_message() {
        let content = InboundContent::decode(r#"{"message": "hello"}"#, 1024).unwrap();
        assert_eq!(content, InboundContent::Text("hello".to_string()));
    }

    #[test]
    fn test_decode_image_message() {
        let raw = format!(
            r#"{{"image": "{}", "image_name": "cat.png"}}"#,
            BASE64.encode([0x89, b'P', b'N', b'G'])
        );
        match InboundContent::decode(&raw, 1024).unwrap() {
            InboundContent::Image { name, bytes } => {
                assert_eq!(name, "cat.png");
                assert_eq!(bytes.as_slice(), &[0x89, b'P', b'N', b'G']);
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_shapes() {
        assert!(InboundContent::decode("not json", 1024).is_err());
        assert!(InboundContent::decode(r#"{"text": "hello"}"#, 1024).is_err());
        assert!(InboundContent::decode(r#"{"image": "aGk="}"#, 1024).is_err());
        assert!(InboundContent::decode(r#"{"image": "***", "image_name": "x.png"}"#, 1024).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_image() {
        let raw = format!(
            r#"{{"image": "{}", "image_name": "big.bin"}}"#,
            BASE64.encode(vec![0u8; 64])
        );
        match InboundContent::decode(&raw, 32) {
            Err(RelayError::MessageTooLarge(_)) => {}
            other => panic!("expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_outbound_wire_shape() {
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&OutboundEvent::chat(ip, "hi".to_string()).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["sender_ip"], "10.0.0.7");
        assert_eq!(json["message"], "hi");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));

        let json: serde_json::Value =
            serde_json::from_str(&OutboundEvent::banned(ip).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "user_banned");
        assert_eq!(json["message"], "User from 10.0.0.7 was banned for policy violation");

        let image = OutboundEvent::image(ip, "a.gif".to_string(), Arc::new(b"GIF8".to_vec()));
        let json: serde_json::Value = serde_json::from_str(&image.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["image"], BASE64.encode(b"GIF8"));
        assert_eq!(json["image_name"], "a.gif");
    }
}
