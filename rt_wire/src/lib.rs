//! Hand-rolled wire codec for the reverse-tunnel handshake.
//!
//! The handshake body carries exactly three string fields in a fixed order;
//! there is no need for a general-purpose message format to parse it. Each
//! field is written as a little-endian `u32` byte length followed by that
//! many UTF-8 bytes, one after another — the same "length prefix, then exact
//! byte count" idiom the RESP parser uses for bulk strings, just without the
//! `$`/`\r\n` framing since there's no human ever reading this wire directly.

use std::fmt;

const LEN_PREFIX_BYTES: usize = 4;

#[derive(Debug, PartialEq, Eq)]
pub enum WireError {
    /// Buffer ended before a length prefix or its payload could be read.
    Truncated,
    /// A length prefix claimed more bytes than remain in the buffer.
    LengthOverflow,
    /// Field bytes were not valid UTF-8.
    InvalidUtf8,
    /// Trailing bytes remained after all expected fields were consumed.
    TrailingBytes,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            WireError::Truncated => "truncated handshake payload",
            WireError::LengthOverflow => "field length exceeds remaining payload",
            WireError::InvalidUtf8 => "field is not valid utf-8",
            WireError::TrailingBytes => "unexpected trailing bytes after handshake payload",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for WireError {}

/// Body of a `POST /reverse_connections/request` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeRequest {
    pub node_uuid: String,
    pub cluster_uuid: String,
    pub tenant_uuid: String,
}

impl HandshakeRequest {
    pub fn new(node_uuid: impl Into<String>, cluster_uuid: impl Into<String>, tenant_uuid: impl Into<String>) -> Self {
        Self {
            node_uuid: node_uuid.into(),
            cluster_uuid: cluster_uuid.into(),
            tenant_uuid: tenant_uuid.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            3 * LEN_PREFIX_BYTES + self.node_uuid.len() + self.cluster_uuid.len() + self.tenant_uuid.len(),
        );
        write_field(&mut buf, &self.node_uuid);
        write_field(&mut buf, &self.cluster_uuid);
        write_field(&mut buf, &self.tenant_uuid);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = 0usize;
        let node_uuid = read_field(bytes, &mut cursor)?;
        let cluster_uuid = read_field(bytes, &mut cursor)?;
        let tenant_uuid = read_field(bytes, &mut cursor)?;
        if cursor != bytes.len() {
            return Err(WireError::TrailingBytes);
        }
        Ok(Self {
            node_uuid,
            cluster_uuid,
            tenant_uuid,
        })
    }
}

/// Status carried in the handshake response. `Accepted` is the sole success value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Accepted,
    InvalidArgument,
}

impl HandshakeStatus {
    fn to_byte(self) -> u8 {
        match self {
            HandshakeStatus::Accepted => 0,
            HandshakeStatus::InvalidArgument => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(HandshakeStatus::Accepted),
            1 => Ok(HandshakeStatus::InvalidArgument),
            _ => Err(WireError::InvalidUtf8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: HandshakeStatus,
    pub message: String,
}

impl HandshakeResponse {
    pub fn accepted() -> Self {
        Self {
            status: HandshakeStatus::Accepted,
            message: String::new(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self {
            status: HandshakeStatus::InvalidArgument,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + LEN_PREFIX_BYTES + self.message.len());
        buf.push(self.status.to_byte());
        write_field(&mut buf, &self.message);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let status_byte = *bytes.first().ok_or(WireError::Truncated)?;
        let status = HandshakeStatus::from_byte(status_byte)?;
        let mut cursor = 1usize;
        let message = read_field(bytes, &mut cursor)?;
        if cursor != bytes.len() {
            return Err(WireError::TrailingBytes);
        }
        Ok(Self { status, message })
    }
}

fn write_field(buf: &mut Vec<u8>, value: &str) {
    let len = value.len() as u32;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn read_field(bytes: &[u8], cursor: &mut usize) -> Result<String, WireError> {
    let start = *cursor;
    let len_bytes = bytes
        .get(start..start + LEN_PREFIX_BYTES)
        .ok_or(WireError::Truncated)?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    let field_start = start + LEN_PREFIX_BYTES;
    let field_end = field_start.checked_add(len).ok_or(WireError::LengthOverflow)?;
    let field_bytes = bytes
        .get(field_start..field_end)
        .ok_or(WireError::LengthOverflow)?;
    let value = std::str::from_utf8(field_bytes)
        .map_err(|_| WireError::InvalidUtf8)?
        .to_string();
    *cursor = field_end;
    Ok(value)
}
