// ABOUTME: Wire protocol for the interactive terminal channel between console and backend
// Tagged JSON envelope or raw byte passthrough, selected by `Framing`

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================
// Base Message Types
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    // Client → backend
    Input(InputMessage),
    Resize(ResizeMessage),

    // Backend → client
    Output(OutputMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputMessage {
    #[serde(with = "utf8_lossy")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeMessage {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    #[serde(with = "utf8_lossy")]
    pub data: Vec<u8>,
}

/// Frame as it travels over the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

// The JSON envelope carries terminal data as a string
mod utf8_lossy {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        String::deserialize(deserializer).map(String::into_bytes)
    }
}

// ============================================
// Helper functions
// ============================================

impl Message {
    /// Create an input message
    pub fn input(data: impl Into<Vec<u8>>) -> Self {
        Message::Input(InputMessage { data: data.into() })
    }

    /// Create a resize message
    pub fn resize(cols: u16, rows: u16) -> Self {
        Message::Resize(ResizeMessage { cols, rows })
    }

    /// Create an output message
    pub fn output(data: impl Into<Vec<u8>>) -> Self {
        Message::Output(OutputMessage { data: data.into() })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Input(_) => "input",
            Message::Resize(_) => "resize",
            Message::Output(_) => "output",
        }
    }
}

// ============================================
// Framing
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// `{"type": "input" | "resize" | "output", ...}` JSON text frames
    #[default]
    Tagged,
    /// Untyped bytes; resize cannot be expressed
    Raw,
}

impl Framing {
    /// `Ok(None)` when this framing has no way to express the message
    pub fn encode(self, message: &Message) -> Result<Option<WireFrame>, serde_json::Error> {
        match self {
            Framing::Tagged => serde_json::to_string(message).map(|json| Some(WireFrame::Text(json))),
            Framing::Raw => Ok(match message {
                Message::Input(input) => Some(WireFrame::Binary(input.data.clone())),
                Message::Output(output) => Some(WireFrame::Binary(output.data.clone())),
                Message::Resize(_) => None,
            }),
        }
    }

    /// Normalize an inbound frame to the bytes the terminal buffer receives
    pub fn decode(self, frame: WireFrame) -> Vec<u8> {
        match frame {
            WireFrame::Binary(bytes) => bytes,
            WireFrame::Text(text) => match self {
                Framing::Tagged => match serde_json::from_str::<Message>(&text) {
                    Ok(Message::Output(output)) => output.data,
                    _ => text.into_bytes(),
                },
                Framing::Raw => text.into_bytes(),
            },
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Tagged => f.write_str("tagged"),
            Framing::Raw => f.write_str("raw"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_input_envelope() {
        let frame = Framing::Tagged.encode(&Message::input("ls\n")).unwrap();
        assert_eq!(
            frame,
            Some(WireFrame::Text(r#"{"type":"input","data":"ls\n"}"#.to_string()))
        );
    }

    #[test]
    fn test_tagged_resize_envelope() {
        let frame = Framing::Tagged.encode(&Message::resize(120, 40)).unwrap();
        assert_eq!(
            frame,
            Some(WireFrame::Text(r#"{"type":"resize","cols":120,"rows":40}"#.to_string()))
        );
    }

    #[test]
    fn test_raw_framing_omits_resize() {
        assert_eq!(Framing::Raw.encode(&Message::resize(80, 24)).unwrap(), None);
        assert_eq!(
            Framing::Raw.encode(&Message::input(vec![0x03])).unwrap(),
            Some(WireFrame::Binary(vec![0x03]))
        );
    }

    #[test]
    fn test_decode_binary_passthrough() {
        let bytes = vec![0x1b, b'[', b'H', 0xff];
        assert_eq!(Framing::Tagged.decode(WireFrame::Binary(bytes.clone())), bytes);
        assert_eq!(Framing::Raw.decode(WireFrame::Binary(bytes.clone())), bytes);
    }

    #[test]
    fn test_decode_tagged_output_and_plain_text() {
        let tagged = WireFrame::Text(r#"{"type":"output","data":"hello"}"#.to_string());
        assert_eq!(Framing::Tagged.decode(tagged), b"hello".to_vec());

        // Backends that answer with bare text still reach the terminal
        let plain = WireFrame::Text("Error: no such container".to_string());
        assert_eq!(Framing::Tagged.decode(plain), b"Error: no such container".to_vec());
    }

    #[test]
    fn test_decode_raw_keeps_json_text_verbatim() {
        let text = r#"{"type":"output","data":"x"}"#.to_string();
        assert_eq!(
            Framing::Raw.decode(WireFrame::Text(text.clone())),
            text.into_bytes()
        );
    }
}
