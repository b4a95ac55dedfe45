//! Data messages exchanged over a WebSocket.
//!
//! A [`Message`] is the payload of one Text or Binary frame. Control frames
//! never surface as messages: [`WebSocket::message`] answers pings, skips
//! pongs and turns Close into [`Error::Closed`].
//!
//! # Examples
//!
//! ```
//! use trellis_core::{Message, MessageType};
//!
//! let msg = Message::text(r#"{"op":"join","room":"lobby"}"#);
//! assert_eq!(msg.message_type(), MessageType::Text);
//!
//! let value: serde_json::Value = msg.json().unwrap();
//! assert_eq!(value["room"], "lobby");
//! ```
//!
//! [`WebSocket::message`]: crate::websocket::WebSocket::message
//! [`Error::Closed`]: crate::Error::Closed

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::frame::{Frame, Opcode};

/// The kind of data a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
}

impl MessageType {
    /// The frame opcode used to send this kind of message.
    pub fn opcode(self) -> Opcode {
        match self {
            MessageType::Text => Opcode::Text,
            MessageType::Binary => Opcode::Binary,
        }
    }
}

/// A complete WebSocket data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw payload bytes.
    pub data: Bytes,

    /// Text or binary.
    pub msg_type: MessageType,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(text.into()),
            msg_type: MessageType::Text,
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            msg_type: MessageType::Binary,
        }
    }

    /// Converts a data frame. Returns `None` for control frames.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        let msg_type = match frame.opcode {
            Opcode::Text => MessageType::Text,
            Opcode::Binary => MessageType::Binary,
            _ => return None,
        };
        Some(Self {
            data: frame.payload,
            msg_type,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn opcode(&self) -> Opcode {
        self.msg_type.opcode()
    }

    pub fn is_text(&self) -> bool {
        self.msg_type == MessageType::Text
    }

    pub fn is_binary(&self) -> bool {
        self.msg_type == MessageType::Binary
    }

    /// The payload as a string, for text messages holding valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        if self.is_text() {
            std::str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Deserializes the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message() {
        let msg = Message::text("Hello, World!");
        assert!(msg.is_text());
        assert_eq!(msg.as_text(), Some("Hello, World!"));
        assert_eq!(msg.opcode(), Opcode::Text);
    }

    #[test]
    fn test_binary_message() {
        let msg = Message::binary(vec![1, 2, 3, 4, 5]);
        assert!(msg.is_binary());
        assert_eq!(msg.as_bytes(), &[1, 2, 3, 4, 5]);
        assert_eq!(msg.as_text(), None);
        assert_eq!(msg.opcode(), Opcode::Binary);
    }

    #[test]
    fn test_from_frame() {
        let frame = Frame {
            opcode: Opcode::Text,
            masked: true,
            payload: Bytes::from_static(b"hi"),
        };
        let msg = Message::from_frame(frame).unwrap();
        assert_eq!(msg, Message::text("hi"));

        let ping = Frame {
            opcode: Opcode::Ping,
            masked: true,
            payload: Bytes::new(),
        };
        assert!(Message::from_frame(ping).is_none());
    }

    #[test]
    fn test_json_parsing() {
        let msg = Message::text(r#"{"key":"value","number":42}"#);
        let json: serde_json::Value = msg.json().unwrap();
        assert_eq!(json["key"], "value");
        assert_eq!(json["number"], 42);

        assert!(Message::text("not json").json::<serde_json::Value>().is_err());
    }
}
