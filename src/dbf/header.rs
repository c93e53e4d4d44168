use chrono::{Datelike, NaiveDate};
use num_enum::FromPrimitive;
use strum::{Display, EnumString};

use crate::dbf::error::{XbaseError, XbaseResult};
use crate::util;

pub const HEADER_SIZE: usize = 32;
pub const DESCRIPTOR_SIZE: usize = 32;
pub const HEADER_TERMINATOR: u8 = 0x0d;
pub const EOF_MARKER: u8 = 0x1a;

/// Structural index flag (*.cdx attached)
pub const TABLE_FLAG_CDX: u8 = 0x01;
/// A memo companion file (*.fpt) belongs to the table
pub const TABLE_FLAG_MEMO: u8 = 0x02;
/// The table is part of a database container (*.dbc)
pub const TABLE_FLAG_DBC: u8 = 0x04;

/// File-type flag at offset 0, identifies the xbase dialect.
#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Display, EnumString, FromPrimitive, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum FileType {
    FoxBase = 0x02,
    FoxBasePlus = 0x03,
    VisualFoxPro = 0x30,
    VisualFoxProAutoInc = 0x31,
    VisualFoxProVar = 0x32,
    DBaseSqlTable = 0x43,
    FoxBasePlusMemo = 0x83,
    DBaseMemo = 0x8b,
    DBaseSqlTableMemo = 0xcb,
    FoxPro2Memo = 0xf5,
    FoxBaseSimple = 0xfb,
    #[default]
    UNDEF = 0x00,
}

impl FileType {
    /// Visual FoxPro headers carry a 263-byte zero backfill between the 0x0d
    /// terminator and the first row.
    pub fn descriptor_backfill(&self) -> u16 {
        match self {
            FileType::VisualFoxPro | FileType::VisualFoxProAutoInc | FileType::VisualFoxProVar => 263,
            _ => 0,
        }
    }

    /// Smallest admissible first_row offset for the dialect: the 32-byte
    /// prelude, the terminator byte, and the dialect backfill.
    pub fn min_first_row(&self) -> u16 {
        HEADER_SIZE as u16 + 1 + self.descriptor_backfill()
    }
}

/// The 32-byte prelude of a tablefile.
///
/// `first_row` is authoritative: the column count is derived from it with the
/// dialect-specific backfill, never assumed from the descriptor array alone.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Header {
    pub file_type: FileType,
    pub year: u8, // years since 2000
    pub month: u8,
    pub day: u8,
    pub row_count: u32,
    pub first_row: u16,
    pub row_length: u16, // includes the leading status byte
    pub reserved: [u8; 16],
    pub table_flags: u8,
    pub code_page: u8,
}

impl Header {
    pub fn parse(buf: &[u8]) -> XbaseResult<Header> {
        if buf.len() < HEADER_SIZE {
            return Err(XbaseError::MalformedHeader(format!(
                "prelude needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let header = Self {
            file_type: buf[0].into(),
            year: buf[1],
            month: buf[2],
            day: buf[3],
            row_count: util::u32_val(buf, 4),
            first_row: util::u16_val(buf, 8),
            row_length: util::u16_val(buf, 10),
            reserved: buf[12..28].try_into().unwrap(),
            table_flags: buf[28],
            code_page: buf[29],
        };

        if header.row_length == 0 {
            return Err(XbaseError::MalformedHeader("row_length is zero".into()));
        }
        if header.first_row < header.file_type.min_first_row() {
            return Err(XbaseError::MalformedHeader(format!(
                "first_row {} below the {} dialect minimum {}",
                header.first_row,
                header.file_type,
                header.file_type.min_first_row()
            )));
        }

        Ok(header)
    }

    pub fn emit(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.file_type as u8;
        buf[1] = self.year;
        buf[2] = self.month;
        buf[3] = self.day;
        buf[4..8].copy_from_slice(&self.row_count.to_le_bytes());
        buf[8..10].copy_from_slice(&self.first_row.to_le_bytes());
        buf[10..12].copy_from_slice(&self.row_length.to_le_bytes());
        buf[12..28].copy_from_slice(&self.reserved);
        buf[28] = self.table_flags;
        buf[29] = self.code_page;
        buf
    }

    /// Last-modified date; the two-digit year is 2000-based.
    pub fn modified_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2000 + self.year as i32, self.month as u32, self.day as u32)
    }

    pub fn set_modified_date(&mut self, date: NaiveDate) {
        self.year = (date.year() - 2000).clamp(0, 99) as u8;
        self.month = date.month() as u8;
        self.day = date.day() as u8;
    }

    pub fn columns_count(&self) -> u16 {
        (self.first_row - self.file_type.min_first_row()) / DESCRIPTOR_SIZE as u16
    }

    /// Size of the data file implied by the header, without the trailing EOF
    /// marker.
    pub fn file_size(&self) -> u64 {
        self.first_row as u64 + self.row_count as u64 * self.row_length as u64
    }

    pub fn has_memo(&self) -> bool {
        self.table_flags & TABLE_FLAG_MEMO > 0
    }
}

#[cfg(test)]
mod header_tests {

    use std::env::set_var;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn sample() -> Header {
        Header {
            file_type: FileType::VisualFoxPro,
            year: 24,
            month: 7,
            day: 15,
            row_count: 3,
            first_row: 296 + 2 * 32,
            row_length: 1 + 5 + 8,
            reserved: [0u8; 16],
            table_flags: TABLE_FLAG_MEMO,
            code_page: 0x03,
        }
    }

    #[test]
    fn header_round_trip() {
        setup();
        let hdr = sample();
        let parsed = Header::parse(&hdr.emit()).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn zero_row_length_fails() {
        setup();
        let mut hdr = sample();
        hdr.row_length = 0;
        assert!(matches!(
            Header::parse(&hdr.emit()),
            Err(XbaseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn first_row_below_dialect_minimum_fails() {
        setup();
        let mut hdr = sample();
        hdr.first_row = 290; // below the Visual FoxPro minimum of 296
        assert!(matches!(
            Header::parse(&hdr.emit()),
            Err(XbaseError::MalformedHeader(_))
        ));
    }

    #[test]
    fn short_prelude_fails() {
        setup();
        assert!(Header::parse(&[0u8; 16]).is_err());
    }

    #[test]
    fn modified_date_is_2000_based() {
        setup();
        let hdr = sample();
        assert_eq!(
            hdr.modified_date(),
            NaiveDate::from_ymd_opt(2024, 7, 15)
        );
    }

    #[test]
    fn columns_count_follows_dialect() {
        setup();
        let hdr = sample();
        assert_eq!(hdr.columns_count(), 2);

        let plain = Header {
            file_type: FileType::FoxBasePlus,
            first_row: 33 + 3 * 32,
            row_length: 10,
            ..Header::default()
        };
        assert_eq!(plain.columns_count(), 3);
    }

    #[test]
    fn file_size_counts_rows() {
        setup();
        let hdr = sample();
        assert_eq!(hdr.file_size(), (296 + 64) as u64 + 3 * 14);
    }

    #[test]
    fn memo_flag() {
        setup();
        assert!(sample().has_memo());
        let mut hdr = sample();
        hdr.table_flags = TABLE_FLAG_CDX;
        assert!(!hdr.has_memo());
    }
}
