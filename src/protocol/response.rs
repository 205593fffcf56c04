use std::io::{Read, Write};

use super::{CodecError, TableId, WireReader, WireWriter};

/// First byte of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Done,
    /// Recoverable failure; the connection stays usable.
    Error,
    /// Failure after which the server drops the connection.
    Fatal,
}

impl TryFrom<u8> for ResponseStatus {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0x0 => Ok(ResponseStatus::Done),
            0x1 => Ok(ResponseStatus::Error),
            0x2 => Ok(ResponseStatus::Fatal),
            other => Err(CodecError::UnknownStatus(other)),
        }
    }
}

impl From<ResponseStatus> for u8 {
    fn from(value: ResponseStatus) -> Self {
        match value {
            ResponseStatus::Done => 0x0,
            ResponseStatus::Error => 0x1,
            ResponseStatus::Fatal => 0x2,
        }
    }
}

impl ResponseStatus {
    pub fn read<R: Read>(input: &mut WireReader<R>) -> Result<Self, CodecError> {
        input.read_u8()?.try_into()
    }

    pub fn write<W: Write>(self, out: &mut WireWriter<W>) -> Result<(), CodecError> {
        out.write_u8(self.into())
    }
}

/// Error detail following an `Error` or `Fatal` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    pub code: u32,
    pub message: String,
}

impl ServerFailure {
    pub fn read<R: Read>(input: &mut WireReader<R>) -> Result<Self, CodecError> {
        Ok(Self {
            code: input.read_compressed()?,
            message: input.read_string()?,
        })
    }

    pub fn write<W: Write>(&self, out: &mut WireWriter<W>) -> Result<(), CodecError> {
        out.write_compressed(self.code)?;
        out.write_str(&self.message)
    }
}

/// Tables whose cached contents stopped being authoritative, in the order the server listed
/// them. Duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationList(Vec<TableId>);

impl InvalidationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: TableId) {
        if !self.0.contains(&table) {
            self.0.push(table);
        }
    }

    pub fn contains(&self, table: TableId) -> bool {
        self.0.contains(&table)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = TableId> + '_ {
        self.0.iter().copied()
    }

    pub fn read<R: Read>(input: &mut WireReader<R>) -> Result<Self, CodecError> {
        let len = input.read_len()?;
        let mut list = Self::new();
        for _ in 0..len {
            list.push(TableId::read(input)?);
        }
        Ok(list)
    }

    pub fn write<W: Write>(&self, out: &mut WireWriter<W>) -> Result<(), CodecError> {
        out.write_len(self.0.len())?;
        for table in &self.0 {
            table.write(out)?;
        }
        Ok(())
    }
}

impl FromIterator<TableId> for InvalidationList {
    fn from_iter<I: IntoIterator<Item = TableId>>(iter: I) -> Self {
        let mut list = Self::new();
        for table in iter {
            list.push(table);
        }
        list
    }
}
