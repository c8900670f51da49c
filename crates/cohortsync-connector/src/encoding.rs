//! Character set transcoding
//!
//! External databases may store text in a legacy charset. Values read back
//! are decoded into UTF-8 and filter literals sent to the source are encoded
//! the other way.

use encoding_rs::Encoding;

use crate::error::{ConnectorError, ConnectorResult};

/// Converts between the external charset and UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCodec {
    encoding: &'static Encoding,
}

impl Default for TextCodec {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl TextCodec {
    /// Resolve a WHATWG label such as `utf-8`, `latin1` or `windows-1252`.
    pub fn for_label(label: &str) -> ConnectorResult<Self> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        Encoding::for_label(trimmed.as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| ConnectorError::Encoding {
                label: trimmed.to_string(),
            })
    }

    /// Canonical name of the charset.
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn is_utf8(&self) -> bool {
        self.encoding == encoding_rs::UTF_8
    }

    /// Decode raw column bytes. Malformed sequences become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.encoding.decode(bytes);
        text.into_owned()
    }

    /// Encode a value for the source charset.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.encoding.encode(text);
        bytes.into_owned()
    }

    /// Restrict a value to the characters the source charset can represent.
    ///
    /// Used on filter literals: the driver sends UTF-8, so unrepresentable
    /// characters are replaced rather than silently matching nothing.
    pub fn narrow(&self, text: &str) -> String {
        if self.is_utf8() {
            return text.to_string();
        }
        self.decode(&self.encode(text))
    }
}
