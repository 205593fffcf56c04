//! Entity rows and their declarative column layout.
//!
//! A [`Row`] is one immutable record of a table, identified by a primary key of its own
//! [`RowKey`] type. Its columns are declared once in [`Row::COLUMNS`]; each [`ColumnSpec`] carries
//! the column's wire type and the [`VersionSpan`] in which it exists. The default [`Row::read`]
//! and [`Row::write`] walk that declaration, so every versioned field is gated identically on the
//! encode and decode path.
//!
//! # Example
//! ```rust
//! use mgmt_client::{
//!     ColumnSpec, ColumnType, OrderBy, ProtocolVersion, RawRow, Row, TableId, Value,
//!     protocol::CodecError,
//! };
//!
//! struct Server {
//!     id: i32,
//!     hostname: String,
//! }
//!
//! impl Row for Server {
//!     type Key = i32;
//!     const TABLE_ID: TableId = TableId(7);
//!     const COLUMNS: &'static [ColumnSpec] = &[
//!         ColumnSpec::new("id", ColumnType::Int).unique(),
//!         ColumnSpec::new("hostname", ColumnType::Text).unique(),
//!     ];
//!     const DEFAULT_ORDER: &'static [OrderBy] = &[OrderBy::asc(1)];
//!
//!     fn key(&self) -> i32 {
//!         self.id
//!     }
//!
//!     fn column(&self, index: usize) -> Option<Value> {
//!         match index {
//!             0 => Some(Value::Int(self.id)),
//!             1 => Some(Value::Text(self.hostname.clone())),
//!             _ => None,
//!         }
//!     }
//!
//!     fn init(raw: &RawRow) -> Result<Self, CodecError> {
//!         Ok(Self {
//!             id: raw.int(0)?,
//!             hostname: raw.text(1)?,
//!         })
//!     }
//! }
//!
//! let mut out = mgmt_client::protocol::WireWriter::new(Vec::new());
//! Server { id: 1, hostname: "www1".into() }
//!     .write(&mut out, ProtocolVersion::CURRENT)
//!     .unwrap();
//! ```
use std::{
    cmp::Reverse,
    fmt,
    hash::{Hash, Hasher},
    io::{Read, Write},
    sync::Arc,
};

use crate::{
    error::{ClientError, InvariantViolation},
    protocol::{CodecError, ProtocolVersion, TableId, VersionSpan, WireReader, WireWriter},
};

/// A single column value, as produced by [`Row::column`] and consumed by [`Row::init`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Text(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Wire representation of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    /// Fixed-width `i32`.
    Int,
    /// Non-negative `i32` sent as a compressed integer.
    Compressed,
    Long,
    Text,
    NullableText,
    NullableInt,
}

impl ColumnType {
    /// Value a column takes when it is absent from the exchange version.
    pub fn default_value(self) -> Value {
        match self {
            ColumnType::Bool => Value::Bool(false),
            ColumnType::Int | ColumnType::Compressed => Value::Int(0),
            ColumnType::Long => Value::Long(0),
            ColumnType::Text => Value::Text(String::new()),
            ColumnType::NullableText | ColumnType::NullableInt => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    None,
    /// No two rows share a value; enables [`Table::get_unique_row`](crate::Table::get_unique_row).
    Unique,
    /// Rows are grouped by value on demand.
    Indexed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub index: IndexKind,
    pub span: VersionSpan,
}

impl ColumnSpec {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            index: IndexKind::None,
            span: VersionSpan::ALWAYS,
        }
    }

    pub const fn unique(self) -> Self {
        Self {
            index: IndexKind::Unique,
            ..self
        }
    }

    pub const fn indexed(self) -> Self {
        Self {
            index: IndexKind::Indexed,
            ..self
        }
    }

    pub const fn since(self, version: ProtocolVersion) -> Self {
        Self {
            span: VersionSpan {
                since: version,
                removed_in: self.span.removed_in,
            },
            ..self
        }
    }

    pub const fn removed_in(self, version: ProtocolVersion) -> Self {
        Self {
            span: VersionSpan {
                since: self.span.since,
                removed_in: Some(version),
            },
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One term of a table's default ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: usize,
    pub direction: Direction,
}

impl OrderBy {
    pub const fn asc(column: usize) -> Self {
        Self {
            column,
            direction: Direction::Ascending,
        }
    }

    pub const fn desc(column: usize) -> Self {
        Self {
            column,
            direction: Direction::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SortTerm {
    Asc(Value),
    Desc(Reverse<Value>),
}

/// Sort key of a row under `order`; comparing keys gives the table's default order.
pub(crate) fn sort_key<R: Row>(row: &R, order: &[OrderBy]) -> Vec<SortTerm> {
    order
        .iter()
        .map(|term| {
            let value = row.column(term.column).unwrap_or(Value::Null);
            match term.direction {
                Direction::Ascending => SortTerm::Asc(value),
                Direction::Descending => SortTerm::Desc(Reverse(value)),
            }
        })
        .collect()
}

/// A row in tabular form: one [`Value`] per declared column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow(pub Vec<Value>);

impl RawRow {
    pub fn get(&self, column: usize) -> Result<&Value, CodecError> {
        self.0.get(column).ok_or(CodecError::ColumnCount {
            expected: column + 1,
            found: self.0.len(),
        })
    }

    fn mismatch(&self, column: usize, expected: &'static str) -> CodecError {
        CodecError::ColumnType {
            column,
            expected,
            found: self.0.get(column).map_or("nothing", Value::kind).to_string(),
        }
    }

    pub fn bool(&self, column: usize) -> Result<bool, CodecError> {
        match self.get(column)? {
            Value::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(column, "bool")),
        }
    }

    pub fn int(&self, column: usize) -> Result<i32, CodecError> {
        match self.get(column)? {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch(column, "int")),
        }
    }

    pub fn long(&self, column: usize) -> Result<i64, CodecError> {
        match self.get(column)? {
            Value::Long(v) => Ok(*v),
            _ => Err(self.mismatch(column, "long")),
        }
    }

    pub fn text(&self, column: usize) -> Result<String, CodecError> {
        match self.get(column)? {
            Value::Text(v) => Ok(v.clone()),
            _ => Err(self.mismatch(column, "text")),
        }
    }

    pub fn nullable_text(&self, column: usize) -> Result<Option<String>, CodecError> {
        match self.get(column)? {
            Value::Null => Ok(None),
            Value::Text(v) => Ok(Some(v.clone())),
            _ => Err(self.mismatch(column, "nullable text")),
        }
    }

    pub fn nullable_int(&self, column: usize) -> Result<Option<i32>, CodecError> {
        match self.get(column)? {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            _ => Err(self.mismatch(column, "nullable int")),
        }
    }
}

/// Primary key of a row.
///
/// A key carries no wire format of its own: it is sent the way [`Row::KEY_COLUMN`] is declared.
pub trait RowKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// The value the key column holds for this key.
    fn to_value(&self) -> Value;
}

impl RowKey for i32 {
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
}

impl RowKey for i64 {
    fn to_value(&self) -> Value {
        Value::Long(*self)
    }
}

impl RowKey for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

/// Contract every entity type implements to be held by a [`Table`](crate::Table).
pub trait Row: Sized + Send + Sync + 'static {
    type Key: RowKey;

    /// Identifier shared with the server for this entity's table.
    const TABLE_ID: TableId;
    /// Column layout, in positional order.
    const COLUMNS: &'static [ColumnSpec];
    /// Ordering used whenever rows are returned as a set.
    const DEFAULT_ORDER: &'static [OrderBy];
    /// Position of the primary key in `COLUMNS`.
    const KEY_COLUMN: usize = 0;

    fn key(&self) -> Self::Key;

    /// Positional accessor. Must return `Some` for every index below `COLUMNS.len()` and `None`
    /// beyond it.
    fn column(&self, index: usize) -> Option<Value>;

    /// Hydrates a row from one value per declared column.
    fn init(raw: &RawRow) -> Result<Self, CodecError>;

    fn read<Rd: Read>(
        input: &mut WireReader<Rd>,
        version: ProtocolVersion,
    ) -> Result<Self, CodecError> {
        let raw = read_columns(Self::COLUMNS, input, version)?;
        Self::init(&raw)
    }

    fn write<W: Write>(
        &self,
        out: &mut WireWriter<W>,
        version: ProtocolVersion,
    ) -> Result<(), CodecError> {
        write_columns(Self::COLUMNS, |i| self.column(i), out, version)
    }

    /// Writes `key` as a command argument, encoded like the key column.
    fn write_key<W: Write>(key: &Self::Key, out: &mut WireWriter<W>) -> Result<(), CodecError> {
        let column = Self::COLUMNS
            .get(Self::KEY_COLUMN)
            .ok_or(CodecError::ColumnCount {
                expected: Self::KEY_COLUMN + 1,
                found: Self::COLUMNS.len(),
            })?;
        write_value(column.ty, Self::KEY_COLUMN, &key.to_value(), out)
    }
}

/// Checked positional access: an index outside the declared columns is an invariant violation.
pub fn column_value<R: Row>(row: &R, index: usize) -> Result<Value, ClientError> {
    if index >= R::COLUMNS.len() {
        return Err(InvariantViolation::ColumnOutOfRange {
            table: R::TABLE_ID,
            column: index,
            columns: R::COLUMNS.len(),
        }
        .into());
    }
    row.column(index).ok_or_else(|| {
        InvariantViolation::ColumnOutOfRange {
            table: R::TABLE_ID,
            column: index,
            columns: R::COLUMNS.len(),
        }
        .into()
    })
}

/// Every column of `row`, in positional order.
pub fn values<R: Row>(row: &R) -> RawRow {
    RawRow(
        (0..R::COLUMNS.len())
            .map(|i| row.column(i).unwrap_or(Value::Null))
            .collect(),
    )
}

/// Rows are the same row when their keys are equal.
pub fn same_row<R: Row>(a: &R, b: &R) -> bool {
    a.key() == b.key()
}

/// Wraps a shared row so that equality and hashing follow its primary key.
#[derive(Debug)]
pub struct ByKey<R>(pub Arc<R>);

impl<R> Clone for ByKey<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<R: Row> PartialEq for ByKey<R> {
    fn eq(&self, other: &Self) -> bool {
        same_row(self.0.as_ref(), other.0.as_ref())
    }
}

impl<R: Row> Eq for ByKey<R> {}

impl<R: Row> Hash for ByKey<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.key().hash(state)
    }
}

pub fn write_value<W: Write>(
    ty: ColumnType,
    column: usize,
    value: &Value,
    out: &mut WireWriter<W>,
) -> Result<(), CodecError> {
    match (ty, value) {
        (ColumnType::Bool, Value::Bool(v)) => out.write_bool(*v),
        (ColumnType::Int, Value::Int(v)) => out.write_i32(*v),
        (ColumnType::Compressed, Value::Int(v)) => {
            let v = u32::try_from(*v).map_err(|_| CodecError::CompressedOverflow(*v as u64))?;
            out.write_compressed(v)
        }
        (ColumnType::Long, Value::Long(v)) => out.write_i64(*v),
        (ColumnType::Text, Value::Text(v)) => out.write_str(v),
        (ColumnType::NullableText, Value::Null) | (ColumnType::NullableInt, Value::Null) => {
            out.write_bool(false)
        }
        (ColumnType::NullableText, Value::Text(v)) => out.write_nullable_str(Some(v)),
        (ColumnType::NullableInt, Value::Int(v)) => {
            out.write_bool(true)?;
            out.write_i32(*v)
        }
        (ty, value) => Err(CodecError::ColumnType {
            column,
            expected: type_name(ty),
            found: value.kind().to_string(),
        }),
    }
}

pub fn read_value<Rd: Read>(ty: ColumnType, input: &mut WireReader<Rd>) -> Result<Value, CodecError> {
    Ok(match ty {
        ColumnType::Bool => Value::Bool(input.read_bool()?),
        ColumnType::Int => Value::Int(input.read_i32()?),
        // Compressed magnitudes never exceed 0x3FFF_FFFF, so they always fit an i32.
        ColumnType::Compressed => Value::Int(input.read_compressed()? as i32),
        ColumnType::Long => Value::Long(input.read_i64()?),
        ColumnType::Text => Value::Text(input.read_string()?),
        ColumnType::NullableText => input.read_nullable_string()?.into(),
        ColumnType::NullableInt => {
            if input.read_bool()? {
                Value::Int(input.read_i32()?)
            } else {
                Value::Null
            }
        }
    })
}

fn type_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Bool => "bool",
        ColumnType::Int => "int",
        ColumnType::Compressed => "compressed int",
        ColumnType::Long => "long",
        ColumnType::Text => "text",
        ColumnType::NullableText => "nullable text",
        ColumnType::NullableInt => "nullable int",
    }
}

/// Writes every column present in `version`, in declaration order.
pub fn write_columns<W, F>(
    columns: &[ColumnSpec],
    value_of: F,
    out: &mut WireWriter<W>,
    version: ProtocolVersion,
) -> Result<(), CodecError>
where
    W: Write,
    F: Fn(usize) -> Option<Value>,
{
    for (i, column) in columns.iter().enumerate() {
        if !column.span.contains(version) {
            continue;
        }
        let value = value_of(i).ok_or(CodecError::ColumnCount {
            expected: columns.len(),
            found: i,
        })?;
        write_value(column.ty, i, &value, out)?;
    }
    Ok(())
}

/// Reads every column present in `version`; absent columns take their type's default.
pub fn read_columns<Rd: Read>(
    columns: &[ColumnSpec],
    input: &mut WireReader<Rd>,
    version: ProtocolVersion,
) -> Result<RawRow, CodecError> {
    columns
        .iter()
        .map(|column| {
            if column.span.contains(version) {
                read_value(column.ty, input)
            } else {
                Ok(column.ty.default_value())
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .map(RawRow)
}
