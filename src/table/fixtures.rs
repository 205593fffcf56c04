//! Entity types used by the tests.
use crate::{
    protocol::{CodecError, ProtocolVersion, TableId},
    table::row::{ColumnSpec, ColumnType, OrderBy, RawRow, Row, Value},
};

pub const ACCOUNTS: TableId = TableId(10);
pub const FILES: TableId = TableId(11);

/// Mail/shell account; `quota` was dropped in V6 and `email` added in V7.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i32,
    pub username: String,
    pub server: i32,
    pub quota: i32,
    pub email: Option<String>,
    pub disabled: bool,
    pub created: i64,
}

pub fn account(id: i32, username: &str, server: i32) -> Account {
    Account {
        id,
        username: username.to_string(),
        server,
        quota: 0,
        email: None,
        disabled: false,
        created: 1_600_000_000 + i64::from(id),
    }
}

impl Row for Account {
    type Key = i32;
    const TABLE_ID: TableId = ACCOUNTS;
    const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::new("id", ColumnType::Int).unique(),
        ColumnSpec::new("username", ColumnType::Text).unique(),
        ColumnSpec::new("server", ColumnType::Compressed).indexed(),
        ColumnSpec::new("quota", ColumnType::Int).removed_in(ProtocolVersion::V6),
        ColumnSpec::new("email", ColumnType::NullableText).since(ProtocolVersion::V7),
        ColumnSpec::new("disabled", ColumnType::Bool),
        ColumnSpec::new("created", ColumnType::Long),
    ];
    const DEFAULT_ORDER: &'static [OrderBy] = &[OrderBy::asc(2), OrderBy::asc(1)];

    fn key(&self) -> i32 {
        self.id
    }

    fn column(&self, index: usize) -> Option<Value> {
        Some(match index {
            0 => self.id.into(),
            1 => self.username.as_str().into(),
            2 => self.server.into(),
            3 => self.quota.into(),
            4 => self.email.clone().into(),
            5 => self.disabled.into(),
            6 => self.created.into(),
            _ => return None,
        })
    }

    fn init(raw: &RawRow) -> Result<Self, CodecError> {
        Ok(Self {
            id: raw.int(0)?,
            username: raw.text(1)?,
            server: raw.int(2)?,
            quota: raw.int(3)?,
            email: raw.nullable_text(4)?,
            disabled: raw.bool(5)?,
            created: raw.long(6)?,
        })
    }
}

/// The same entity as compiled into a client that only knew protocol V5.
#[derive(Debug, Clone)]
pub struct AccountV5 {
    pub id: i32,
    pub username: String,
    pub server: i32,
    pub quota: i32,
    pub disabled: bool,
    pub created: i64,
}

impl Row for AccountV5 {
    type Key = i32;
    const TABLE_ID: TableId = ACCOUNTS;
    const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::new("id", ColumnType::Int).unique(),
        ColumnSpec::new("username", ColumnType::Text).unique(),
        ColumnSpec::new("server", ColumnType::Compressed).indexed(),
        ColumnSpec::new("quota", ColumnType::Int),
        ColumnSpec::new("disabled", ColumnType::Bool),
        ColumnSpec::new("created", ColumnType::Long),
    ];
    const DEFAULT_ORDER: &'static [OrderBy] = &[OrderBy::asc(2), OrderBy::asc(1)];

    fn key(&self) -> i32 {
        self.id
    }

    fn column(&self, index: usize) -> Option<Value> {
        Some(match index {
            0 => self.id.into(),
            1 => self.username.as_str().into(),
            2 => self.server.into(),
            3 => self.quota.into(),
            4 => self.disabled.into(),
            5 => self.created.into(),
            _ => return None,
        })
    }

    fn init(raw: &RawRow) -> Result<Self, CodecError> {
        Ok(Self {
            id: raw.int(0)?,
            username: raw.text(1)?,
            server: raw.int(2)?,
            quota: raw.int(3)?,
            disabled: raw.bool(4)?,
            created: raw.long(5)?,
        })
    }
}

/// Distribution manifest entry, large enough in number to be spooled to disk.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: i64,
    pub path: String,
    pub size: i64,
    pub mode: i32,
}

pub const FILE_RECORD_LENGTH: usize = 64;

pub fn file_entry(id: i64) -> FileEntry {
    FileEntry {
        id,
        path: format!("/usr/share/dist/{id:06}"),
        size: id * 13,
        mode: if id % 2 == 0 { 0o644 } else { 0o755 },
    }
}

impl Row for FileEntry {
    type Key = i64;
    const TABLE_ID: TableId = FILES;
    const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::new("id", ColumnType::Long).unique(),
        ColumnSpec::new("path", ColumnType::Text).unique(),
        ColumnSpec::new("size", ColumnType::Long),
        ColumnSpec::new("mode", ColumnType::Int).indexed(),
    ];
    const DEFAULT_ORDER: &'static [OrderBy] = &[OrderBy::asc(0)];

    fn key(&self) -> i64 {
        self.id
    }

    fn column(&self, index: usize) -> Option<Value> {
        Some(match index {
            0 => self.id.into(),
            1 => self.path.as_str().into(),
            2 => self.size.into(),
            3 => self.mode.into(),
            _ => return None,
        })
    }

    fn init(raw: &RawRow) -> Result<Self, CodecError> {
        Ok(Self {
            id: raw.long(0)?,
            path: raw.text(1)?,
            size: raw.long(2)?,
            mode: raw.int(3)?,
        })
    }
}

pub const HOSTS: TableId = TableId(12);

/// Virtual host keyed by a compressed id that sits after its name.
#[derive(Debug, Clone)]
pub struct Host {
    pub hostname: String,
    pub id: i32,
}

pub fn host(id: i32, hostname: &str) -> Host {
    Host {
        hostname: hostname.to_string(),
        id,
    }
}

impl Row for Host {
    type Key = i32;
    const TABLE_ID: TableId = HOSTS;
    const COLUMNS: &'static [ColumnSpec] = &[
        ColumnSpec::new("hostname", ColumnType::Text).unique(),
        ColumnSpec::new("id", ColumnType::Compressed).unique(),
    ];
    const DEFAULT_ORDER: &'static [OrderBy] = &[OrderBy::asc(0)];
    const KEY_COLUMN: usize = 1;

    fn key(&self) -> i32 {
        self.id
    }

    fn column(&self, index: usize) -> Option<Value> {
        Some(match index {
            0 => self.hostname.as_str().into(),
            1 => self.id.into(),
            _ => return None,
        })
    }

    fn init(raw: &RawRow) -> Result<Self, CodecError> {
        Ok(Self {
            hostname: raw.text(0)?,
            id: raw.int(1)?,
        })
    }
}
