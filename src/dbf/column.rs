use num_enum::FromPrimitive;
use strum::{Display, EnumString};

use crate::dbf::error::{XbaseError, XbaseResult};
use crate::dbf::header::{FileType, Header, DESCRIPTOR_SIZE, HEADER_TERMINATOR};
use crate::util;

pub const COLUMN_NAME_SIZE: usize = 11;

/// Column type code, the single ASCII byte at descriptor offset 11.
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Display, EnumString, FromPrimitive, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum ColumnType {
    Character = b'C',
    Currency = b'Y',
    Date = b'D',
    DateTime = b'T',
    Float = b'F',
    General = b'G',
    Integer = b'I',
    Logical = b'L',
    Memo = b'M',
    Numeric = b'N',
    Picture = b'P',
    Blob = b'B',
    Varbinary = b'Q',
    Varchar = b'V',
    NullFlags = b'0',
    #[default]
    UNDEF = 0x01,
}

impl ColumnType {
    /// Slot holds a block id into the memo companion file.
    pub fn is_memo(&self) -> bool {
        matches!(
            self,
            ColumnType::Memo | ColumnType::General | ColumnType::Picture | ColumnType::Blob
        )
    }

    /// Memo content is an opaque byte blob rather than text.
    pub fn is_binary_memo(&self) -> bool {
        matches!(self, ColumnType::General | ColumnType::Picture | ColumnType::Blob)
    }
}

/// Column flags at descriptor offset 18.
pub const COLUMN_FLAG_SYSTEM: u8 = 0x01;
pub const COLUMN_FLAG_NULLABLE: u8 = 0x02;
pub const COLUMN_FLAG_BINARY: u8 = 0x04;
pub const COLUMN_FLAG_AUTOINC: u8 = 0x0c;

/// One 32-byte column descriptor.
///
/// The on-disk name padding is preserved in `name_raw` so an emitted schema
/// reproduces the source bytes; `name()` trims the trailing nulls.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Column {
    pub name_raw: [u8; COLUMN_NAME_SIZE], // column name, null-padded
    pub col_type: ColumnType,             // type code
    pub displacement: u32,                // slot offset within the row frame
    pub length: u8,                       // slot width in bytes
    pub decimals: u8,                     // decimal count
    pub flags: u8,                        // column flags
    pub autoinc_next: u32,                // next autoincrement value
    pub autoinc_step: u16,                // autoincrement step
}

impl Column {
    pub fn new(name: &str, col_type: ColumnType, length: u8, decimals: u8) -> XbaseResult<Column> {
        if name.is_empty() || name.len() > COLUMN_NAME_SIZE || !name.is_ascii() {
            return Err(XbaseError::MalformedSchema(format!(
                "column name {:?} must be 1..={} ascii bytes",
                name, COLUMN_NAME_SIZE
            )));
        }
        if length == 0 {
            return Err(XbaseError::MalformedSchema(format!(
                "column {:?} has zero length",
                name
            )));
        }
        let mut name_raw = [0u8; COLUMN_NAME_SIZE];
        name_raw[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            name_raw,
            col_type,
            length,
            decimals,
            ..Column::default()
        })
    }

    pub fn parse(buf: &[u8]) -> XbaseResult<Column> {
        if buf.len() < DESCRIPTOR_SIZE {
            return Err(XbaseError::MalformedSchema(format!(
                "descriptor needs {} bytes, got {}",
                DESCRIPTOR_SIZE,
                buf.len()
            )));
        }

        let mut name_raw = [0u8; COLUMN_NAME_SIZE];
        name_raw.copy_from_slice(&buf[..COLUMN_NAME_SIZE]);

        // everything after the first null is padding; the run before it must
        // be printable ascii
        let end = name_raw.iter().position(|&b| b == 0).unwrap_or(COLUMN_NAME_SIZE);
        if name_raw[..end].iter().any(|&b| b > 0x7f) {
            return Err(XbaseError::MalformedSchema(format!(
                "column name bytes {:02x?} are not ascii",
                &name_raw[..end]
            )));
        }

        let col_type: ColumnType = buf[COLUMN_NAME_SIZE].into();
        if col_type == ColumnType::UNDEF {
            return Err(XbaseError::MalformedSchema(format!(
                "unknown column type code 0x{:02x}",
                buf[COLUMN_NAME_SIZE]
            )));
        }

        let column = Self {
            name_raw,
            col_type,
            displacement: util::u32_val(buf, 12),
            length: buf[16],
            decimals: buf[17],
            flags: buf[18],
            autoinc_next: util::u32_val(buf, 19),
            autoinc_step: util::u16_val(buf, 23),
        };

        if column.length == 0 {
            return Err(XbaseError::MalformedSchema(format!(
                "column {:?} has zero length",
                column.name()
            )));
        }

        Ok(column)
    }

    pub fn emit(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        buf[..COLUMN_NAME_SIZE].copy_from_slice(&self.name_raw);
        buf[COLUMN_NAME_SIZE] = self.col_type as u8;
        buf[12..16].copy_from_slice(&self.displacement.to_le_bytes());
        buf[16] = self.length;
        buf[17] = self.decimals;
        buf[18] = self.flags;
        buf[19..23].copy_from_slice(&self.autoinc_next.to_le_bytes());
        buf[23..25].copy_from_slice(&self.autoinc_step.to_le_bytes());
        buf
    }

    /// Column name with the trailing null padding removed.
    pub fn name(&self) -> &str {
        let end = self
            .name_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COLUMN_NAME_SIZE);
        std::str::from_utf8(&self.name_raw[..end]).unwrap_or("")
    }

    pub fn is_nullable(&self) -> bool {
        self.flags & COLUMN_FLAG_NULLABLE > 0
    }
}

/// The parsed schema shared by the table facade and every detached row.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TableDef {
    pub file_type: FileType, // dialect the schema was read under
    pub row_length: u16,     // frame size, status byte included
    pub columns: Vec<Column>,
}

impl TableDef {
    /// Assemble a schema for table creation: slot displacements and the row
    /// length are computed here, never trusted from the caller.
    pub fn new(file_type: FileType, columns: Vec<Column>) -> XbaseResult<TableDef> {
        if columns.is_empty() {
            return Err(XbaseError::MalformedSchema("a table needs at least one column".into()));
        }
        let mut tabdef = Self {
            file_type,
            row_length: 0,
            columns,
        };
        tabdef.assign_displacements();
        Ok(tabdef)
    }

    /// Parse the descriptor array that follows the header, up to the 0x0d
    /// terminator.
    pub fn parse(buf: &[u8], header: &Header) -> XbaseResult<TableDef> {
        let mut columns = Vec::new();
        let mut off = 0usize;
        loop {
            if off >= buf.len() {
                return Err(XbaseError::MalformedSchema(
                    "descriptor array is missing the 0x0d terminator".into(),
                ));
            }
            if buf[off] == HEADER_TERMINATOR {
                break;
            }
            columns.push(Column::parse(&buf[off..])?);
            off += DESCRIPTOR_SIZE;
        }

        let mut tabdef = Self {
            file_type: header.file_type,
            row_length: 0,
            columns,
        };
        tabdef.assign_displacements();

        if tabdef.row_length != header.row_length {
            return Err(XbaseError::MalformedSchema(format!(
                "columns imply row_length {}, header says {}",
                tabdef.row_length, header.row_length
            )));
        }

        Ok(tabdef)
    }

    /// Emit the descriptor array with its 0x0d terminator. Dialect backfill
    /// up to first_row is file layout, not schema, and is left to the writer.
    pub fn emit(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.columns.len() * DESCRIPTOR_SIZE + 1);
        for col in &self.columns {
            buf.extend_from_slice(&col.emit());
        }
        buf.push(HEADER_TERMINATOR);
        buf
    }

    /// Slots are laid out back to back after the status byte; stored
    /// displacements are normalized to the law
    /// `columns[i].displacement == 1 + sum(columns[..i].length)`.
    fn assign_displacements(&mut self) {
        let mut off = 1u32;
        for col in &mut self.columns {
            col.displacement = off;
            off += col.length as u32;
        }
        self.row_length = off as u16;
    }

    pub fn columns_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Position of a descriptor previously handed out by this schema,
    /// matched on the padded on-disk name.
    pub fn column_position_of(&self, column: &Column) -> Option<usize> {
        self.columns.iter().position(|c| c.name_raw == column.name_raw)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }
}
