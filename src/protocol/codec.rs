//! Primitive encoding over a duplex byte stream.
//!
//! [`WireWriter`] and [`WireReader`] wrap any [`Write`]/[`Read`] and provide the primitive value
//! encodings every frame of the protocol is built from.
//!
//! # Binary Format
//!
//! - Fixed-width numbers (`u8`, `i16`, `i32`, `i64`, `f64`) and booleans are big-endian with no
//!   length prefix, encoded through `bincode`'s fixed-int configuration.
//! - Compressed integers store non-negative magnitudes up to [`MAX_COMPRESSED`]. The two high bits
//!   of the first byte hold the number of bytes that follow; the remaining bits are the value,
//!   big-endian.
//! - Strings are a compressed byte length followed by UTF-8 bytes. Nullable strings are a boolean
//!   presence flag followed by a string when present.
//!
//! A [`CodecError`] raised while decoding means the stream position is no longer known. Callers
//! must treat the underlying connection as unusable.
use std::io::{self, Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_std_read, encode_into_std_write,
};
use thiserror::Error;

/// Largest value a compressed integer can carry.
pub const MAX_COMPRESSED: u32 = 0x3FFF_FFFF;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("stream I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode value: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("failed to encode value: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("value {0} does not fit in a compressed integer")]
    CompressedOverflow(u64),

    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("unknown protocol version code {0}")]
    UnknownVersion(u32),

    #[error("unknown response status {0:#04x}")]
    UnknownStatus(u8),

    #[error("column {column} expected {expected}, found {found}")]
    ColumnType {
        column: usize,
        expected: &'static str,
        found: String,
    },

    #[error("row has {found} columns, expected {expected}")]
    ColumnCount { expected: usize, found: usize },
}

fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Encodes primitive values onto a byte sink.
pub struct WireWriter<W: Write> {
    inner: W,
    config: Configuration<BigEndian, Fixint>,
}

impl<W: Write> WireWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            config: wire_config(),
        }
    }

    fn fixed<T: Encode>(&mut self, value: T) -> Result<(), CodecError> {
        encode_into_std_write(value, &mut self.inner, self.config)?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_i16(&mut self, value: i16) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_i32(&mut self, value: i32) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_i64(&mut self, value: i64) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.fixed(value)
    }

    pub fn write_compressed(&mut self, value: u32) -> Result<(), CodecError> {
        let bytes = value.to_be_bytes();
        match value {
            0..0x40 => self.inner.write_all(&bytes[3..])?,
            0x40..0x4000 => self.inner.write_all(&[0x40 | bytes[2], bytes[3]])?,
            0x4000..0x40_0000 => self.inner.write_all(&[0x80 | bytes[1], bytes[2], bytes[3]])?,
            0x40_0000..=MAX_COMPRESSED => {
                self.inner
                    .write_all(&[0xC0 | bytes[0], bytes[1], bytes[2], bytes[3]])?
            }
            _ => return Err(CodecError::CompressedOverflow(value.into())),
        }
        Ok(())
    }

    /// Writes a collection length as a compressed integer.
    pub fn write_len(&mut self, len: usize) -> Result<(), CodecError> {
        let value = u32::try_from(len).map_err(|_| CodecError::CompressedOverflow(len as u64))?;
        self.write_compressed(value)
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_len(value.len())?;
        self.inner.write_all(value.as_bytes())?;
        Ok(())
    }

    pub fn write_nullable_str(&mut self, value: Option<&str>) -> Result<(), CodecError> {
        self.write_bool(value.is_some())?;
        if let Some(value) = value {
            self.write_str(value)?;
        }
        Ok(())
    }

    /// Writes bytes verbatim, without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Decodes primitive values from a byte source.
pub struct WireReader<R: Read> {
    inner: R,
    config: Configuration<BigEndian, Fixint>,
}

impl<R: Read> WireReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            config: wire_config(),
        }
    }

    fn fixed<T: Decode<()>>(&mut self) -> Result<T, CodecError> {
        Ok(decode_from_std_read(&mut self.inner, self.config)?)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.fixed()
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.fixed()
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        self.fixed()
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.fixed()
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.fixed()
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.fixed()
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        self.fixed()
    }

    pub fn read_compressed(&mut self) -> Result<u32, CodecError> {
        let mut first = [0_u8; 1];
        self.inner.read_exact(&mut first)?;

        let trailing = usize::from(first[0] >> 6);
        let mut rest = [0_u8; 3];
        self.inner.read_exact(&mut rest[..trailing])?;

        Ok(rest[..trailing]
            .iter()
            .fold(u32::from(first[0] & 0x3F), |acc, b| (acc << 8) | u32::from(*b)))
    }

    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        Ok(self.read_compressed()? as usize)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_len()?;
        // Read through `take` so a corrupt length cannot force a huge allocation up front.
        let mut buf = Vec::new();
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("string truncated after {} of {len} bytes", buf.len()),
            )));
        }
        Ok(String::from_utf8(buf)?)
    }

    pub fn read_nullable_string(&mut self) -> Result<Option<String>, CodecError> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        self.inner.read_exact(buf)?;
        Ok(())
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
