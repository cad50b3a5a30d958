//! Request and response bodies for the opcodes the harness exchanges.

use std::collections::HashMap;

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use super::frame::Frame;
use super::frame::Opcode;
use super::result::QueryResult;
use super::types;
use super::types::Consistency;
use crate::constants::CQL_VERSION;
use crate::constants::TABULAR;
use crate::ProtocolError;

type Result<T> = std::result::Result<T, ProtocolError>;

const QUERY_FLAG_VALUES: u8 = 0x01;
const QUERY_FLAG_PAGE_SIZE: u8 = 0x04;
const QUERY_FLAG_PAGING_STATE: u8 = 0x08;
const QUERY_FLAG_SERIAL_CONSISTENCY: u8 = 0x10;
const QUERY_FLAG_DEFAULT_TIMESTAMP: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryParams {
    pub consistency: Consistency,
    pub page_size: Option<i32>,
    pub paging_state: Option<Bytes>,
}

/// QUERY body: a literal statement, never bound values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub statement: String,
    pub params: QueryParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// Server to client messages
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ready,
    /// Authenticator class name
    Authenticate(String),
    AuthChallenge(Option<Bytes>),
    AuthSuccess,
    Supported(HashMap<String, Vec<String>>),
    Result(QueryResult),
    Error(ErrorBody),
    Event,
}

impl Query {
    pub fn new(
        statement: impl Into<String>,
        params: QueryParams,
    ) -> Self {
        Self {
            statement: statement.into(),
            params,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.statement.len() + 16);
        types::put_long_string(&mut dst, &self.statement);
        dst.put_u16(self.params.consistency as u16);

        let mut flags = 0u8;
        if self.params.page_size.is_some() {
            flags |= QUERY_FLAG_PAGE_SIZE;
        }
        if self.params.paging_state.is_some() {
            flags |= QUERY_FLAG_PAGING_STATE;
        }
        dst.put_u8(flags);
        if let Some(page_size) = self.params.page_size {
            dst.put_i32(page_size);
        }
        if let Some(state) = &self.params.paging_state {
            types::put_bytes(&mut dst, Some(state.as_ref()));
        }
        dst.freeze()
    }

    pub fn decode(mut body: Bytes) -> Result<Query> {
        let src = &mut body;
        let statement = types::get_long_string(src)?;
        let consistency = Consistency::try_from(types::get_short(src)?)?;
        let flags = types::get_u8(src)?;
        if flags & QUERY_FLAG_VALUES != 0 {
            return Err(ProtocolError::unexpected(
                TABULAR,
                "bound values are not supported",
            ));
        }
        let page_size = if flags & QUERY_FLAG_PAGE_SIZE != 0 {
            Some(types::get_int(src)?)
        } else {
            None
        };
        let paging_state = if flags & QUERY_FLAG_PAGING_STATE != 0 {
            types::get_bytes(src)?
        } else {
            None
        };
        if flags & QUERY_FLAG_SERIAL_CONSISTENCY != 0 {
            types::get_short(src)?;
        }
        if flags & QUERY_FLAG_DEFAULT_TIMESTAMP != 0 {
            types::get_int(src)?;
            types::get_int(src)?;
        }
        Ok(Query {
            statement,
            params: QueryParams {
                consistency,
                page_size,
                paging_state,
            },
        })
    }
}

/// STARTUP body: `{CQL_VERSION: 3.0.0}`, no compression
pub fn startup_body() -> Bytes {
    let mut dst = BytesMut::new();
    types::put_string_map(&mut dst, [("CQL_VERSION", CQL_VERSION)].into_iter());
    dst.freeze()
}

pub fn decode_startup(mut body: Bytes) -> Result<HashMap<String, String>> {
    types::get_string_map(&mut body)
}

/// PasswordAuthenticator SASL PLAIN token: `\0user\0password`
pub fn auth_response_body(
    username: &str,
    password: &str,
) -> Bytes {
    let mut token = Vec::with_capacity(username.len() + password.len() + 2);
    token.push(0);
    token.extend_from_slice(username.as_bytes());
    token.push(0);
    token.extend_from_slice(password.as_bytes());

    let mut dst = BytesMut::new();
    types::put_bytes(&mut dst, Some(token.as_slice()));
    dst.freeze()
}

/// Inverse of [`auth_response_body`]; `None` when the token is not SASL PLAIN shaped
pub fn decode_auth_response(mut body: Bytes) -> Result<Option<(String, String)>> {
    let Some(token) = types::get_bytes(&mut body)? else {
        return Ok(None);
    };
    let mut parts = token.split(|b| *b == 0);
    let (Some(authzid), Some(user), Some(pass), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Ok(None);
    };
    if !authzid.is_empty() {
        return Ok(None);
    }
    Ok(Some((
        String::from_utf8_lossy(user).into_owned(),
        String::from_utf8_lossy(pass).into_owned(),
    )))
}

impl ErrorBody {
    pub fn new(
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Code and message; the code-specific trailer is not needed
    pub fn decode(mut body: Bytes) -> Result<ErrorBody> {
        let code = types::get_int(&mut body)?;
        let message = types::get_string(&mut body)?;
        Ok(ErrorBody { code, message })
    }

    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::new();
        dst.put_i32(self.code);
        types::put_string(&mut dst, &self.message);
        dst.freeze()
    }
}

impl From<ErrorBody> for ProtocolError {
    fn from(e: ErrorBody) -> Self {
        ProtocolError::Server {
            code: e.code,
            message: e.message,
        }
    }
}

impl Response {
    /// Decode a response frame (tracing, warnings and custom payload already skipped)
    pub fn decode(frame: &Frame) -> Result<Response> {
        if !frame.is_response() {
            return Err(ProtocolError::unexpected(
                TABULAR,
                format!("request frame {:?} where a response was expected", frame.opcode),
            ));
        }
        let (mut body, _warnings) = frame.payload()?;
        Ok(match frame.opcode {
            Opcode::Ready => Response::Ready,
            Opcode::Authenticate => Response::Authenticate(types::get_string(&mut body)?),
            Opcode::AuthChallenge => Response::AuthChallenge(types::get_bytes(&mut body)?),
            Opcode::AuthSuccess => Response::AuthSuccess,
            Opcode::Supported => Response::Supported(types::get_string_multimap(&mut body)?),
            Opcode::Result => Response::Result(QueryResult::decode(body)?),
            Opcode::Error => Response::Error(ErrorBody::decode(body)?),
            Opcode::Event => Response::Event,
            other => {
                return Err(ProtocolError::unexpected(
                    TABULAR,
                    format!("{other:?} is not a response opcode"),
                ))
            }
        })
    }

    /// Frame this response would travel in
    pub fn into_frame(
        self,
        stream: i16,
    ) -> Frame {
        let (opcode, body) = match self {
            Response::Ready => (Opcode::Ready, Bytes::new()),
            Response::Authenticate(class) => {
                let mut dst = BytesMut::new();
                types::put_string(&mut dst, &class);
                (Opcode::Authenticate, dst.freeze())
            }
            Response::AuthChallenge(token) => {
                let mut dst = BytesMut::new();
                types::put_bytes(&mut dst, token.as_deref());
                (Opcode::AuthChallenge, dst.freeze())
            }
            Response::AuthSuccess => {
                let mut dst = BytesMut::new();
                types::put_bytes(&mut dst, None);
                (Opcode::AuthSuccess, dst.freeze())
            }
            Response::Supported(options) => {
                let mut dst = BytesMut::new();
                types::put_string_multimap(&mut dst, &options);
                (Opcode::Supported, dst.freeze())
            }
            Response::Result(result) => (Opcode::Result, result.encode()),
            Response::Error(error) => (Opcode::Error, error.encode()),
            Response::Event => (Opcode::Event, Bytes::new()),
        };
        Frame::response(stream, opcode, body)
    }
}
