//! Provides the binary messages exchanged between peers.
//!
//! The messages are encoded in the protocol buffers wire format, so that peers implemented in
//! other languages can talk to us:
//!
//! ```text
//! message Request {
//!     string group = 1;
//!     string key = 2;
//! }
//!
//! message Response {
//!     bytes value = 1;
//! }
//! ```
//!
//! As these two messages are all we need, they are encoded by hand. When decoding, unknown
//! fields are skipped, truncated or otherwise malformed input is reported as error.
//!
//! # Examples
//! ```
//! # use geecache::proto::Response;
//! let response = Response::new("abc");
//! let data = response.encode();
//! assert_eq!(&data[..], &[0x0A, 0x03, b'a', b'b', b'c']);
//!
//! assert_eq!(Response::decode(&data).unwrap(), response);
//! ```
use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};

use crate::ByteView;

const WIRE_TYPE_VARINT: u8 = 0;
const WIRE_TYPE_FIXED64: u8 = 1;
const WIRE_TYPE_LEN: u8 = 2;
const WIRE_TYPE_FIXED32: u8 = 5;

/// Represents a request for the value of a key within a group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    /// Contains the name of the group.
    pub group: String,

    /// Contains the key to fetch.
    pub key: String,
}

/// Represents the value returned by a peer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Contains the raw bytes of the value.
    pub value: Bytes,
}

impl Request {
    /// Creates a new request for the given group and key.
    pub fn new(group: impl Into<String>, key: impl Into<String>) -> Self {
        Request {
            group: group.into(),
            key: key.into(),
        }
    }

    /// Encodes this request into its binary representation.
    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.group.len() + self.key.len() + 8);
        put_len_delimited(&mut buffer, 1, self.group.as_bytes());
        put_len_delimited(&mut buffer, 2, self.key.as_bytes());

        buffer.freeze()
    }

    /// Decodes a request from the given data.
    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let mut request = Request::default();
        let mut reader = Reader::new(data);
        while let Some((field, wire_type)) = reader.tag()? {
            match (field, wire_type) {
                (1, WIRE_TYPE_LEN) => request.group = reader.string().context("Invalid group")?,
                (2, WIRE_TYPE_LEN) => request.key = reader.string().context("Invalid key")?,
                _ => reader.skip(wire_type)?,
            }
        }

        Ok(request)
    }
}

impl Response {
    /// Creates a new response carrying the given value.
    pub fn new(value: impl Into<Bytes>) -> Self {
        Response {
            value: value.into(),
        }
    }

    /// Encodes this response into its binary representation.
    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.value.len() + 6);
        put_len_delimited(&mut buffer, 1, &self.value);

        buffer.freeze()
    }

    /// Decodes a response from the given data.
    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let mut response = Response::default();
        let mut reader = Reader::new(data);
        while let Some((field, wire_type)) = reader.tag()? {
            match (field, wire_type) {
                (1, WIRE_TYPE_LEN) => {
                    response.value = Bytes::copy_from_slice(reader.len_delimited()?)
                }
                _ => reader.skip(wire_type)?,
            }
        }

        Ok(response)
    }
}

impl From<ByteView> for Response {
    fn from(view: ByteView) -> Self {
        Response {
            value: view.into_bytes(),
        }
    }
}

impl From<Response> for ByteView {
    fn from(response: Response) -> Self {
        ByteView::from(response.value)
    }
}

fn put_varint(buffer: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buffer.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buffer.put_u8(value as u8);
}

fn put_len_delimited(buffer: &mut BytesMut, field: u32, data: &[u8]) {
    put_varint(buffer, ((field as u64) << 3) | WIRE_TYPE_LEN as u64);
    put_varint(buffer, data.len() as u64);
    buffer.put_slice(data);
}

/// Walks over the fields of an encoded message.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data }
    }

    fn varint(&mut self) -> anyhow::Result<u64> {
        let mut result = 0u64;
        for shift in (0..64).step_by(7) {
            let (byte, rest) = self
                .data
                .split_first()
                .context("Unexpected end of message within a varint")?;
            self.data = rest;

            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }

        Err(anyhow::anyhow!("Varint exceeds 64 bits"))
    }

    /// Reads the next tag, returning **None** once the message is completely consumed.
    fn tag(&mut self) -> anyhow::Result<Option<(u64, u8)>> {
        if self.data.is_empty() {
            return Ok(None);
        }

        let tag = self.varint()?;
        if tag >> 3 == 0 {
            return Err(anyhow::anyhow!("Invalid field number 0"));
        }

        Ok(Some((tag >> 3, (tag & 0x07) as u8)))
    }

    fn take(&mut self, len: usize) -> anyhow::Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(anyhow::anyhow!(
                "Unexpected end of message: {} bytes required but only {} present",
                len,
                self.data.len()
            ));
        }

        let (result, rest) = self.data.split_at(len);
        self.data = rest;

        Ok(result)
    }

    fn len_delimited(&mut self) -> anyhow::Result<&'a [u8]> {
        let len = usize::try_from(self.varint()?).context("Length exceeds the address space")?;
        self.take(len)
    }

    fn string(&mut self) -> anyhow::Result<String> {
        Ok(String::from_utf8(self.len_delimited()?.to_vec())?)
    }

    fn skip(&mut self, wire_type: u8) -> anyhow::Result<()> {
        match wire_type {
            WIRE_TYPE_VARINT => {
                let _ = self.varint()?;
            }
            WIRE_TYPE_FIXED64 => {
                let _ = self.take(8)?;
            }
            WIRE_TYPE_LEN => {
                let _ = self.len_delimited()?;
            }
            WIRE_TYPE_FIXED32 => {
                let _ = self.take(4)?;
            }
            _ => return Err(anyhow::anyhow!("Unsupported wire type: {}", wire_type)),
        }

        Ok(())
    }
}
