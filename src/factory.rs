use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use bytes::Bytes;
use chrono::Local;
use log::{debug, info};

use crate::dbf::column::{Column, TableDef};
use crate::dbf::error::{XbaseError, XbaseResult};
use crate::dbf::header::{
    FileType, Header, DESCRIPTOR_SIZE, EOF_MARKER, HEADER_SIZE, TABLE_FLAG_MEMO,
};
use crate::dbf::memo::{
    MemoBlock, MemoHeader, MemoStore, DEFAULT_MEMO_BLOCK_SIZE, MEMO_BLOCK_HEADER_SIZE,
    MEMO_HEADER_SIZE,
};
use crate::dbf::table::{BlockStore, Table};

fn io_err(position: u32, source: io::Error) -> XbaseError {
    XbaseError::Io { position, source }
}

/// Serialize the file prelude: header, descriptor array with terminator and
/// the dialect backfill up to first_row.
fn emit_prelude(header: &Header, tabdef: &TableDef) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header.first_row as usize);
    buf.extend_from_slice(&header.emit());
    buf.extend_from_slice(&tabdef.emit());
    buf.resize(header.first_row as usize, 0);
    buf
}

fn header_for(tabdef: &TableDef) -> Header {
    let mut header = Header {
        file_type: tabdef.file_type,
        row_count: 0,
        first_row: tabdef.file_type.min_first_row() + (tabdef.columns.len() * DESCRIPTOR_SIZE) as u16,
        row_length: tabdef.row_length,
        table_flags: if tabdef.columns.iter().any(|c| c.col_type.is_memo()) {
            TABLE_FLAG_MEMO
        } else {
            0
        },
        code_page: 0x03, // Windows ANSI Latin I
        ..Header::default()
    };
    header.set_modified_date(Local::now().date_naive());
    header
}

/// File-backed table storage. Owns the *.dbf handle, seeks frames in and
/// out, and keeps the trailing 0x1a marker behind the last row.
#[derive(Debug)]
pub struct DatafileFactory {
    pub target: PathBuf, // target datafile
    file: File,          // tablefile descriptor
    pub size: u64,       // file size
    first_row: u16,
    row_length: u16,
}

impl DatafileFactory {
    /// Open an existing tablefile and assemble the table facade. The memo
    /// companion (same stem, *.fpt) is attached when the header carries the
    /// memo flag and the file is present; without it memo columns stay raw
    /// block ids.
    pub fn open_table(target: PathBuf) -> XbaseResult<Table<DatafileFactory>> {
        let mut file = Self::do_open_file(&target)?;
        let size = file
            .metadata()
            .map_err(|e| io_err(0, e))?
            .len();
        info!("load {:?}, size = {}", target, size);

        let mut prelude = [0u8; HEADER_SIZE];
        file.read_exact(&mut prelude).map_err(|e| io_err(0, e))?;
        let header = Header::parse(&prelude)?;

        let mut descriptors = vec![0u8; header.first_row as usize - HEADER_SIZE];
        file.read_exact(&mut descriptors).map_err(|e| io_err(0, e))?;
        let tabdef = TableDef::parse(&descriptors, &header)?;

        let memo: Option<Box<dyn MemoStore>> = if header.has_memo() {
            match Self::discover_memo(&target)? {
                Some(memo_file) => Some(Box::new(memo_file)),
                None => {
                    debug!("memo flag is set but no memo file next to {:?}", target);
                    None
                }
            }
        } else {
            None
        };

        let factory = Self {
            target,
            file,
            size,
            first_row: header.first_row,
            row_length: header.row_length,
        };
        Ok(Table::new(factory, header, tabdef, memo))
    }

    /// Create a fresh tablefile (and memo companion when the schema needs
    /// one) and hand back the empty table.
    pub fn create_table(
        target: PathBuf,
        file_type: FileType,
        columns: Vec<Column>,
    ) -> XbaseResult<Table<DatafileFactory>> {
        let tabdef = TableDef::new(file_type, columns)?;
        let header = header_for(&tabdef);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .map_err(|e| io_err(0, e))?;

        let mut image = emit_prelude(&header, &tabdef);
        image.push(EOF_MARKER);
        file.write_all(&image).map_err(|e| io_err(0, e))?;
        info!("created {:?}, {} columns", target, tabdef.columns_count());

        let memo: Option<Box<dyn MemoStore>> = if header.has_memo() {
            let memo_target = target.with_extension("fpt");
            Some(Box::new(MemoFile::create(
                memo_target,
                DEFAULT_MEMO_BLOCK_SIZE,
            )?))
        } else {
            None
        };

        let factory = Self {
            target,
            file,
            size: image.len() as u64,
            first_row: header.first_row,
            row_length: header.row_length,
        };
        Ok(Table::new(factory, header, tabdef, memo))
    }

    fn do_open_file(target: &PathBuf) -> XbaseResult<File> {
        match OpenOptions::new().read(true).write(true).open(target) {
            Ok(file) => Ok(file),
            Err(e) => {
                debug!("read-write open of {:?} failed ({}), retrying read-only", target, e);
                OpenOptions::new()
                    .read(true)
                    .open(target)
                    .map_err(|e| io_err(0, e))
            }
        }
    }

    fn discover_memo(target: &PathBuf) -> XbaseResult<Option<MemoFile>> {
        for ext in ["fpt", "FPT"] {
            let candidate = target.with_extension(ext);
            if candidate.exists() {
                return MemoFile::open(candidate).map(Some);
            }
        }
        Ok(None)
    }

    fn row_offset(&self, position: u32) -> u64 {
        self.first_row as u64 + position as u64 * self.row_length as u64
    }
}

impl BlockStore for DatafileFactory {
    fn read_row(&mut self, position: u32) -> XbaseResult<Bytes> {
        self.file
            .seek(SeekFrom::Start(self.row_offset(position)))
            .map_err(|e| io_err(position, e))?;
        let mut frame = vec![0u8; self.row_length as usize];
        self.file
            .read_exact(&mut frame)
            .map_err(|e| io_err(position, e))?;
        Ok(Bytes::from(frame))
    }

    fn write_row(&mut self, position: u32, frame: &[u8]) -> XbaseResult<()> {
        let offset = self.row_offset(position);
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| io_err(position, e))?;
        self.file
            .write_all(frame)
            .map_err(|e| io_err(position, e))?;

        // an append moves the end-of-file marker behind the new row
        let end = offset + frame.len() as u64;
        if end >= self.size {
            self.file
                .write_all(&[EOF_MARKER])
                .map_err(|e| io_err(position, e))?;
            self.size = end + 1;
        }
        Ok(())
    }

    fn update_header(&mut self, header: &[u8]) -> XbaseResult<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_err(0, e))?;
        self.file.write_all(header).map_err(|e| io_err(0, e))
    }
}

/// File-backed memo storage over the *.fpt companion.
#[derive(Debug)]
pub struct MemoFile {
    pub target: PathBuf,
    file: File,
    header: MemoHeader,
}

impl MemoFile {
    pub fn open(target: PathBuf) -> XbaseResult<MemoFile> {
        let mut file = DatafileFactory::do_open_file(&target)?;
        let mut prelude = [0u8; MEMO_HEADER_SIZE];
        file.read_exact(&mut prelude).map_err(|e| io_err(0, e))?;
        let header = MemoHeader::parse(&prelude)?;
        debug!("memo {:?}, block_size = {}", target, header.block_size);
        Ok(Self {
            target,
            file,
            header,
        })
    }

    pub fn create(target: PathBuf, block_size: u16) -> XbaseResult<MemoFile> {
        let header = MemoHeader::new(block_size);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .map_err(|e| io_err(0, e))?;
        file.write_all(&header.emit()).map_err(|e| io_err(0, e))?;
        // the header owns its blocks in full
        let owned = header.next_free as u64 * header.block_size as u64;
        if owned > MEMO_HEADER_SIZE as u64 {
            file.set_len(owned).map_err(|e| io_err(0, e))?;
        }
        Ok(Self {
            target,
            file,
            header,
        })
    }

    fn block_offset(&self, id: u32) -> u64 {
        id as u64 * self.header.block_size as u64
    }
}

impl MemoStore for MemoFile {
    fn read_block(&mut self, id: u32) -> XbaseResult<MemoBlock> {
        if id == 0 {
            return Err(io_err(
                id,
                io::Error::new(io::ErrorKind::InvalidData, "block 0 is the header"),
            ));
        }
        self.file
            .seek(SeekFrom::Start(self.block_offset(id)))
            .map_err(|e| io_err(id, e))?;

        let mut head = [0u8; MEMO_BLOCK_HEADER_SIZE];
        self.file.read_exact(&mut head).map_err(|e| io_err(id, e))?;
        let length = u32::from_be_bytes(head[4..8].try_into().unwrap()) as usize;

        let mut buf = Vec::with_capacity(MEMO_BLOCK_HEADER_SIZE + length);
        buf.extend_from_slice(&head);
        buf.resize(MEMO_BLOCK_HEADER_SIZE + length, 0);
        self.file
            .read_exact(&mut buf[MEMO_BLOCK_HEADER_SIZE..])
            .map_err(|e| io_err(id, e))?;

        MemoBlock::parse(&buf, id)
    }

    fn write_block(&mut self, block: &MemoBlock) -> XbaseResult<u32> {
        let id = self.header.next_free;
        let blocks = block.blocks_used(self.header.block_size);

        self.file
            .seek(SeekFrom::Start(self.block_offset(id)))
            .map_err(|e| io_err(id, e))?;
        let mut buf = block.emit();
        buf.resize(blocks as usize * self.header.block_size as usize, 0);
        self.file.write_all(&buf).map_err(|e| io_err(id, e))?;

        self.header.next_free += blocks;
        self.file
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_err(0, e))?;
        self.file
            .write_all(&self.header.emit())
            .map_err(|e| io_err(0, e))?;
        Ok(id)
    }
}

/// Table storage held entirely in memory: the full file image in one byte
/// vector. Serves the tests and ephemeral tables.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buf: Vec<u8>,
    first_row: u16,
    row_length: u16,
}

impl MemoryStore {
    /// Assemble a table over an existing in-memory file image.
    pub fn open_table(image: Vec<u8>) -> XbaseResult<Table<MemoryStore>> {
        let header = Header::parse(&image)?;
        if image.len() < header.first_row as usize {
            return Err(XbaseError::MalformedHeader(format!(
                "image of {} bytes ends before first_row {}",
                image.len(),
                header.first_row
            )));
        }
        let tabdef = TableDef::parse(&image[HEADER_SIZE..header.first_row as usize], &header)?;
        let store = Self {
            buf: image,
            first_row: header.first_row,
            row_length: header.row_length,
        };
        Ok(Table::new(store, header, tabdef, None))
    }

    /// Build an empty in-memory table for the given schema.
    pub fn create_table(file_type: FileType, columns: Vec<Column>) -> XbaseResult<Table<MemoryStore>> {
        let tabdef = TableDef::new(file_type, columns)?;
        let header = header_for(&tabdef);
        let mut image = emit_prelude(&header, &tabdef);
        image.push(EOF_MARKER);
        let store = Self {
            buf: image,
            first_row: header.first_row,
            row_length: header.row_length,
        };
        Ok(Table::new(store, header, tabdef, None))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn row_offset(&self, position: u32) -> usize {
        self.first_row as usize + position as usize * self.row_length as usize
    }
}

impl BlockStore for MemoryStore {
    fn read_row(&mut self, position: u32) -> XbaseResult<Bytes> {
        let offset = self.row_offset(position);
        let end = offset + self.row_length as usize;
        if end > self.buf.len() {
            return Err(io_err(
                position,
                io::Error::new(io::ErrorKind::UnexpectedEof, "row frame past the image end"),
            ));
        }
        Ok(Bytes::copy_from_slice(&self.buf[offset..end]))
    }

    fn write_row(&mut self, position: u32, frame: &[u8]) -> XbaseResult<()> {
        let offset = self.row_offset(position);
        let end = offset + frame.len();
        if self.buf.len() < end + 1 {
            self.buf.resize(end + 1, 0);
            self.buf[end] = EOF_MARKER;
        }
        self.buf[offset..end].copy_from_slice(frame);
        Ok(())
    }

    fn update_header(&mut self, header: &[u8]) -> XbaseResult<()> {
        self.buf[..header.len()].copy_from_slice(header);
        Ok(())
    }
}

#[cfg(test)]
mod factory_tests {

    use std::env::set_var;

    use super::*;
    use crate::dbf::column::ColumnType;
    use crate::dbf::table::ReadOptions;
    use crate::dbf::value::Value;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn temp_target(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("xbr_{}_{}.dbf", std::process::id(), name));
        path
    }

    fn people_columns() -> Vec<Column> {
        vec![
            Column::new("NAME", ColumnType::Character, 8, 0).unwrap(),
            Column::new("AGE", ColumnType::Numeric, 3, 0).unwrap(),
        ]
    }

    #[test]
    fn create_write_reopen_read() {
        setup();
        let target = temp_target("roundtrip");

        {
            let mut table =
                DatafileFactory::create_table(target.clone(), FileType::VisualFoxPro, people_columns())
                    .unwrap();
            let mut row = table.new_row();
            row.set_value(0, Value::Character("Alice".into())).unwrap();
            row.set_value(1, Value::Integer(31)).unwrap();
            table.append_row(&mut row).unwrap();
        }

        let mut table = DatafileFactory::open_table(target.clone()).unwrap();
        assert_eq!(table.rows_count(), 1);
        assert_eq!(table.column_names(), vec!["NAME", "AGE"]);
        let rows = table.rows(ReadOptions::default()).unwrap();
        assert_eq!(rows[0].field(0).unwrap().value, Value::Character("Alice   ".into()));
        assert_eq!(rows[0].field(1).unwrap().value, Value::Integer(31));

        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn eof_marker_follows_last_row() {
        setup();
        let target = temp_target("eofmark");

        let mut table =
            DatafileFactory::create_table(target.clone(), FileType::FoxBasePlus, people_columns())
                .unwrap();
        let mut row = table.new_row();
        row.set_value(0, Value::Character("Bob".into())).unwrap();
        table.append_row(&mut row).unwrap();
        drop(table);

        let image = std::fs::read(&target).unwrap();
        assert_eq!(*image.last().unwrap(), EOF_MARKER);
        // prelude + one row + the marker
        let first_row = 33 + 2 * 32;
        assert_eq!(image.len(), first_row + 12 + 1);

        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn memo_companion_round_trip() {
        setup();
        let target = temp_target("memo");
        let columns = vec![
            Column::new("NAME", ColumnType::Character, 5, 0).unwrap(),
            Column::new("NOTE", ColumnType::Memo, 4, 0).unwrap(),
        ];

        {
            let mut table =
                DatafileFactory::create_table(target.clone(), FileType::VisualFoxPro, columns).unwrap();
            let mut row = table.new_row();
            row.set_value(0, Value::Character("intro".into())).unwrap();
            row.set_value(1, Value::Memo("stored out of line".into())).unwrap();
            table.append_row(&mut row).unwrap();
        }

        assert!(target.with_extension("fpt").exists());

        let mut table = DatafileFactory::open_table(target.clone()).unwrap();
        let rows = table.rows(ReadOptions::default()).unwrap();
        assert_eq!(
            rows[0].field(1).unwrap().value,
            Value::Memo("stored out of line".into())
        );

        std::fs::remove_file(&target).ok();
        std::fs::remove_file(target.with_extension("fpt")).ok();
    }

    #[test]
    fn missing_memo_file_leaves_raw_block_ids() {
        setup();
        let target = temp_target("nomemo");
        let columns = vec![Column::new("NOTE", ColumnType::Memo, 4, 0).unwrap()];

        {
            let mut table =
                DatafileFactory::create_table(target.clone(), FileType::VisualFoxPro, columns).unwrap();
            let mut row = table.new_row();
            row.set_value(0, Value::Memo("gone".into())).unwrap();
            table.append_row(&mut row).unwrap();
        }
        std::fs::remove_file(target.with_extension("fpt")).unwrap();

        let mut table = DatafileFactory::open_table(target.clone()).unwrap();
        let rows = table.rows(ReadOptions::default()).unwrap();
        assert!(matches!(rows[0].field(0).unwrap().value, Value::Block(_)));

        std::fs::remove_file(&target).ok();
    }

    #[test]
    fn memory_image_round_trip() {
        setup();
        let mut table = MemoryStore::create_table(FileType::FoxBasePlus, people_columns()).unwrap();
        let mut row = table.new_row();
        row.set_value(0, Value::Character("Carol".into())).unwrap();
        row.set_value(1, Value::Integer(28)).unwrap();
        table.append_row(&mut row).unwrap();

        let image = table.store_mut().as_bytes().to_vec();
        assert_eq!(*image.last().unwrap(), EOF_MARKER);

        let mut reopened = MemoryStore::open_table(image).unwrap();
        assert_eq!(reopened.rows_count(), 1);
        let rows = reopened.rows(ReadOptions::default()).unwrap();
        assert_eq!(rows[0].field(1).unwrap().value, Value::Integer(28));
    }

    #[test]
    fn memory_read_past_image_fails() {
        setup();
        let mut table = MemoryStore::create_table(FileType::FoxBasePlus, people_columns()).unwrap();
        assert!(table.store_mut().read_row(0).is_err());
    }
}
