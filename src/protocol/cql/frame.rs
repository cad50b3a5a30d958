use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use super::types;
use crate::constants::TABULAR;
use crate::ProtocolError;

pub const REQUEST_VERSION: u8 = 0x04;
pub const RESPONSE_VERSION: u8 = 0x84;
pub const HEADER_LEN: usize = 9;

/// Frames larger than this are rejected (protocol limit)
pub const MAX_BODY_LEN: usize = 256 * 1024 * 1024;

pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            0x0D => Opcode::Batch,
            0x0E => Opcode::AuthChallenge,
            0x0F => Opcode::AuthResponse,
            0x10 => Opcode::AuthSuccess,
            other => {
                return Err(ProtocolError::malformed(
                    TABULAR,
                    format!("unknown opcode {other:#04x}"),
                ))
            }
        })
    }
}

/// One native-protocol frame: 9-byte header plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Frame {
    pub fn request(
        stream: i16,
        opcode: Opcode,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: REQUEST_VERSION,
            flags: 0,
            stream,
            opcode,
            body: body.into(),
        }
    }

    pub fn response(
        stream: i16,
        opcode: Opcode,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: RESPONSE_VERSION,
            flags: 0,
            stream,
            opcode,
            body: body.into(),
        }
    }

    pub fn is_response(&self) -> bool {
        self.version & 0x80 != 0
    }

    pub fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        dst.reserve(HEADER_LEN + self.body.len());
        dst.put_u8(self.version);
        dst.put_u8(self.flags);
        dst.put_i16(self.stream);
        dst.put_u8(self.opcode as u8);
        dst.put_i32(self.body.len() as i32);
        dst.put_slice(&self.body);
    }

    /// Decode one frame from the front of `src`; `Ok(None)` until it is complete.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let version = src[0];
        if version & 0x7F != REQUEST_VERSION {
            return Err(ProtocolError::malformed(
                TABULAR,
                format!("unsupported protocol version {version:#04x}"),
            ));
        }
        let flags = src[1];
        let stream = i16::from_be_bytes([src[2], src[3]]);
        let opcode = Opcode::try_from(src[4])?;
        let len = i32::from_be_bytes([src[5], src[6], src[7], src[8]]);
        if len < 0 || len as usize > MAX_BODY_LEN {
            return Err(ProtocolError::malformed(
                TABULAR,
                format!("invalid body length {len}"),
            ));
        }
        let len = len as usize;
        if src.len() < HEADER_LEN + len {
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(Frame {
            version,
            flags,
            stream,
            opcode,
            body,
        }))
    }

    /// Response body with the optional tracing id, warnings and custom payload stripped.
    ///
    /// Compressed bodies are rejected since STARTUP never negotiates compression.
    pub fn payload(&self) -> Result<(Bytes, Vec<String>), ProtocolError> {
        if self.flags & FLAG_COMPRESSION != 0 {
            return Err(ProtocolError::unexpected(
                TABULAR,
                "compressed frame without negotiated compression",
            ));
        }
        let mut body = self.body.clone();
        if !self.is_response() {
            return Ok((body, Vec::new()));
        }
        if self.flags & FLAG_TRACING != 0 {
            if body.remaining() < 16 {
                return Err(ProtocolError::malformed(TABULAR, "truncated tracing id"));
            }
            body.advance(16);
        }
        let mut warnings = Vec::new();
        if self.flags & FLAG_WARNING != 0 {
            warnings = types::get_string_list(&mut body)?;
        }
        if self.flags & FLAG_CUSTOM_PAYLOAD != 0 {
            let n = types::get_short(&mut body)?;
            for _ in 0..n {
                types::get_string(&mut body)?;
                types::get_bytes(&mut body)?;
            }
        }
        Ok((body, warnings))
    }
}
