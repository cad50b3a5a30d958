//! RESP2 codec.
//!
//! Replies are decoded incrementally: [`Reply::decode`] returns `Ok(None)` until the buffer
//! holds a complete value and only then consumes it, so a session can keep appending socket
//! reads to the same `BytesMut`.

use std::borrow::Cow;
use std::fmt;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use crate::constants::KEYVALUE;
use crate::ProtocolError;

#[cfg(test)]
#[path = "resp_test.rs"]
mod resp_test;

const CRLF: &[u8] = b"\r\n";

/// Nesting deeper than this is treated as a malformed frame
const MAX_DEPTH: usize = 32;

/// Largest bulk string accepted (same ceiling as the reference server's proto-max-bulk-len)
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Status(String),
    /// `-ERR ...`, text kept verbatim
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$n` payload, `None` for the `$-1` null bulk
    Bulk(Option<Bytes>),
    /// `*n` items, `None` for the `*-1` null array
    Array(Option<Vec<Reply>>),
}

/// A client command: an array of bulk strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn status(text: impl Into<String>) -> Self {
        Reply::Status(text.into())
    }

    pub fn error(text: impl Into<String>) -> Self {
        Reply::Error(text.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn null() -> Self {
        Reply::Bulk(None)
    }

    pub fn array(items: Vec<Reply>) -> Self {
        Reply::Array(Some(items))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Bulk(None) | Reply::Array(None))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Text of a status or UTF-8 bulk reply
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Reply::Status(s) => Some(Cow::Borrowed(s.as_str())),
            Reply::Bulk(Some(b)) => Some(String::from_utf8_lossy(b)),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(i) => Some(*i),
            Reply::Bulk(Some(b)) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(Some(items)) => Some(items),
            _ => None,
        }
    }

    pub fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        match self {
            Reply::Status(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            Reply::Error(s) => {
                dst.put_u8(b'-');
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            Reply::Integer(i) => {
                dst.put_u8(b':');
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Reply::Bulk(None) => dst.put_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                dst.put_u8(b'$');
                dst.put_slice(data.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                dst.put_slice(data);
                dst.put_slice(CRLF);
            }
            Reply::Array(None) => dst.put_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                dst.put_u8(b'*');
                dst.put_slice(items.len().to_string().as_bytes());
                dst.put_slice(CRLF);
                for item in items {
                    item.encode(dst);
                }
            }
        }
    }

    /// Decode one reply from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are needed.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Reply>, ProtocolError> {
        match parse(&src[..], 0, 0)? {
            Some((reply, consumed)) => {
                src.advance(consumed);
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{s}"),
            Reply::Error(s) => write!(f, "(error) {s}"),
            Reply::Integer(i) => write!(f, "(integer) {i}"),
            Reply::Bulk(None) | Reply::Array(None) => write!(f, "(nil)"),
            Reply::Bulk(Some(b)) => write!(f, "\"{}\"", String::from_utf8_lossy(b)),
            Reply::Array(Some(items)) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl Command {
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Self {
            args: vec![Bytes::copy_from_slice(name.as_ref())],
        }
    }

    pub fn arg(
        mut self,
        arg: impl AsRef<[u8]>,
    ) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    /// Build from whitespace-free tokens, e.g. `Command::from_args(["CONFIG", "GET", "m*"])`
    pub fn from_args<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        Self {
            args: args
                .into_iter()
                .map(|a| Bytes::copy_from_slice(a.as_ref()))
                .collect(),
        }
    }

    /// Upper-cased command name, e.g. `CONFIG`
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
            .unwrap_or_default()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn encode(
        &self,
        dst: &mut BytesMut,
    ) {
        dst.put_u8(b'*');
        dst.put_slice(self.args.len().to_string().as_bytes());
        dst.put_slice(CRLF);
        for arg in &self.args {
            dst.put_u8(b'$');
            dst.put_slice(arg.len().to_string().as_bytes());
            dst.put_slice(CRLF);
            dst.put_slice(arg);
            dst.put_slice(CRLF);
        }
    }

    /// Decode a command sent by a client (array of bulk strings)
    pub fn decode(src: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        let reply = match Reply::decode(src)? {
            Some(r) => r,
            None => return Ok(None),
        };
        match reply {
            Reply::Array(Some(items)) if !items.is_empty() => {
                let mut args = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Reply::Bulk(Some(b)) => args.push(b),
                        other => {
                            return Err(ProtocolError::malformed(
                                KEYVALUE,
                                format!("command argument must be a bulk string, got {other:?}"),
                            ))
                        }
                    }
                }
                Ok(Some(Command { args }))
            }
            other => Err(ProtocolError::malformed(
                KEYVALUE,
                format!("command must be a non-empty array, got {other:?}"),
            )),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

fn find_crlf(
    buf: &[u8],
    from: usize,
) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == CRLF)
        .map(|p| from + p)
}

fn parse_line(
    buf: &[u8],
    pos: usize,
) -> Option<(&[u8], usize)> {
    find_crlf(buf, pos).map(|end| (&buf[pos..end], end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            ProtocolError::malformed(
                KEYVALUE,
                format!("invalid integer {:?}", String::from_utf8_lossy(line)),
            )
        })
}

fn parse(
    buf: &[u8],
    pos: usize,
    depth: usize,
) -> Result<Option<(Reply, usize)>, ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::malformed(KEYVALUE, "reply nested too deeply"));
    }
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, next)) = parse_line(buf, pos + 1) else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(Some((
            Reply::Status(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            Reply::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((Reply::Integer(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Reply::Bulk(None), next)));
            }
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::malformed(
                    KEYVALUE,
                    format!("bulk length {len} exceeds limit"),
                ));
            }
            let len = len as usize;
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != CRLF {
                return Err(ProtocolError::malformed(
                    KEYVALUE,
                    "bulk string not terminated by CRLF",
                ));
            }
            Ok(Some((
                Reply::Bulk(Some(Bytes::copy_from_slice(&buf[next..end]))),
                end + 2,
            )))
        }
        b'*' => {
            let count = parse_int(line)?;
            if count < 0 {
                return Ok(Some((Reply::Array(None), next)));
            }
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            let mut cursor = next;
            for _ in 0..count {
                match parse(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), cursor)))
        }
        other => Err(ProtocolError::malformed(
            KEYVALUE,
            format!("unknown type byte {:?}", other as char),
        )),
    }
}
