use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Local;
use derivative::Derivative;
use log::debug;

use crate::dbf::column::{Column, TableDef};
use crate::dbf::error::{XbaseError, XbaseResult};
use crate::dbf::header::Header;
use crate::dbf::memo::{MemoBlock, MemoStore};
use crate::dbf::row::Row;
use crate::dbf::value::{self, Value};

/// Random-access storage for row frames, consumed by the table facade.
/// Implemented over a seekable file by the factory and over a byte vector
/// for in-memory tables.
pub trait BlockStore {
    fn read_row(&mut self, position: u32) -> XbaseResult<Bytes>;
    fn write_row(&mut self, position: u32, frame: &[u8]) -> XbaseResult<()>;
    fn update_header(&mut self, header: &[u8]) -> XbaseResult<()>;
}

/// Fallible value converter applied during projection. Pure with respect to
/// the row: it sees one value and returns its replacement.
pub type ConvertFn =
    Box<dyn Fn(&Value) -> Result<Value, Box<dyn std::error::Error + Send + Sync>>>;

/// Per-column projection rule. Affects map and tree views only, never the
/// on-disk bytes.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct Modification {
    pub trim_spaces: bool,
    pub external_key: Option<String>,
    #[derivative(Debug = "ignore")]
    pub convert: Option<ConvertFn>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TableOptions {
    pub trim_spaces_default: bool,
    pub strict_projection: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOptions {
    pub skip_invalid: bool,
    pub skip_deleted: bool,
}

/// The table facade: schema, cursor state and the modification table over a
/// block store. One cursor per table; not safe to share across workers.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Table<S: BlockStore> {
    #[derivative(Debug = "ignore")]
    store: S,
    #[derivative(Debug = "ignore")]
    memo: Option<Box<dyn MemoStore>>,
    header: Header,
    tabdef: Arc<TableDef>,
    mods: Vec<Modification>,
    options: TableOptions,
    row_pointer: u32,
}

impl<S: BlockStore> Table<S> {
    pub fn new(store: S, header: Header, tabdef: TableDef, memo: Option<Box<dyn MemoStore>>) -> Table<S> {
        let mods = (0..tabdef.columns.len()).map(|_| Modification::default()).collect();
        Self {
            store,
            memo,
            header,
            tabdef: Arc::new(tabdef),
            mods,
            options: TableOptions::default(),
            row_pointer: 0,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn tabdef(&self) -> Arc<TableDef> {
        self.tabdef.clone()
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn attach_memo_store(&mut self, store: Box<dyn MemoStore>) {
        self.memo = Some(store);
    }

    pub fn options(&self) -> TableOptions {
        self.options
    }

    pub fn set_trim_spaces_default(&mut self, trim: bool) {
        self.options.trim_spaces_default = trim;
    }

    pub fn set_strict_projection(&mut self, strict: bool) {
        self.options.strict_projection = strict;
    }

    // --- schema access ---------------------------------------------------

    pub fn columns(&self) -> &[Column] {
        &self.tabdef.columns
    }

    pub fn columns_count(&self) -> usize {
        self.tabdef.columns_count()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.tabdef.column_names()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.tabdef.column_position(name)
    }

    pub fn column_position_of(&self, column: &Column) -> Option<usize> {
        self.tabdef.column_position_of(column)
    }

    // --- cursor ----------------------------------------------------------

    pub fn pointer(&self) -> u32 {
        self.row_pointer
    }

    pub fn rows_count(&self) -> u32 {
        self.header.row_count
    }

    pub fn bof(&self) -> bool {
        self.row_pointer == 0
    }

    pub fn eof(&self) -> bool {
        self.row_pointer >= self.header.row_count
    }

    /// Move the cursor by `n` rows, clamping into `[0, row_count]`.
    pub fn skip(&mut self, n: i64) {
        let dest = (self.row_pointer as i64 + n).clamp(0, self.header.row_count as i64);
        self.row_pointer = dest as u32;
    }

    /// Park the cursor on an absolute position, clamped like `skip`.
    pub fn goto(&mut self, position: u32) {
        self.row_pointer = position.min(self.header.row_count);
    }

    // --- row io ----------------------------------------------------------

    /// Read and decode the row under the cursor. Does not advance.
    pub fn row(&mut self) -> XbaseResult<Row> {
        if self.eof() {
            return Err(XbaseError::InvalidPosition(self.row_pointer as usize));
        }
        let frame = self.store.read_row(self.row_pointer)?;
        let memo: Option<&mut dyn MemoStore> = match &mut self.memo {
            Some(store) => Some(store.as_mut()),
            None => None,
        };
        Row::parse(&frame, self.tabdef.clone(), self.row_pointer, memo)
    }

    /// Read from the cursor to EOF, advancing over every frame. Decode
    /// errors abort the iteration unless `skip_invalid` is set; deleted rows
    /// are filtered out when `skip_deleted` is set.
    pub fn rows(&mut self, options: ReadOptions) -> XbaseResult<Vec<Row>> {
        let mut out = Vec::new();
        while !self.eof() {
            let result = self.row();
            self.row_pointer += 1;
            match result {
                Ok(row) => {
                    if options.skip_deleted && row.deleted {
                        continue;
                    }
                    out.push(row);
                }
                Err(e) => {
                    if !options.skip_invalid {
                        return Err(e);
                    }
                    debug!("dropping row {}: {}", self.row_pointer - 1, e);
                }
            }
        }
        Ok(out)
    }

    /// A fresh row over this table's schema, every field at its null
    /// default. The position is provisional until the row is written;
    /// `append_row` is the authoritative append.
    pub fn new_row(&self) -> Row {
        Row::new(self.tabdef.clone(), self.header.row_count)
    }

    /// Encode and write a row at its position. A position at or past
    /// `row_count` is an append: the row count and the header's modified
    /// date are updated and the header is rewritten.
    pub fn write_row(&mut self, row: &Row) -> XbaseResult<()> {
        let row = self.flush_memo(row)?;
        let frame = row.to_bytes()?;
        self.store.write_row(row.position, &frame)?;
        if row.position >= self.header.row_count {
            self.header.row_count = row.position + 1;
            self.header.set_modified_date(Local::now().date_naive());
            self.store.update_header(&self.header.emit())?;
        }
        Ok(())
    }

    /// Append: assign the next free position, then write.
    pub fn append_row(&mut self, row: &mut Row) -> XbaseResult<()> {
        row.position = self.header.row_count;
        self.write_row(row)
    }

    /// Replace unflushed memo content with block ids assigned by the memo
    /// store. The caller's row is left untouched.
    fn flush_memo(&mut self, row: &Row) -> XbaseResult<Row> {
        let mut row = row.clone();
        for (i, field) in row.fields.iter_mut().enumerate() {
            let col = match self.tabdef.columns.get(i) {
                Some(col) if col.col_type.is_memo() => col,
                _ => continue,
            };
            let block = match &field.value {
                Value::Memo(s) => MemoBlock::text(s),
                Value::Blob(b) => MemoBlock::binary(b.clone()),
                _ => continue,
            };
            let store = self.memo.as_deref_mut().ok_or_else(|| XbaseError::ValueEncode {
                index: i,
                name: col.name().to_string(),
                reason: "memo content without a memo store".into(),
            })?;
            field.value = Value::Block(store.write_block(&block)?);
        }
        Ok(row)
    }

    // --- modifications ---------------------------------------------------

    /// Install a projection rule for the column at `pos`. A position outside
    /// the schema is silently ignored so callers may configure columns
    /// optimistically.
    pub fn set_column_modification(&mut self, pos: usize, modification: Modification) {
        match self.mods.get_mut(pos) {
            Some(slot) => *slot = modification,
            None => debug!("ignoring modification for missing column {}", pos),
        }
    }

    pub fn get_column_modification(&self, pos: usize) -> Option<&Modification> {
        self.mods.get(pos)
    }

    // --- projection ------------------------------------------------------

    /// Projection key and value of one field: trim first (per-column OR
    /// table default), then the convert hook, keyed by the external key when
    /// one is set.
    fn project_field(&self, row: &Row, index: usize) -> XbaseResult<(String, Value)> {
        let col = &self.tabdef.columns[index];
        let modification = &self.mods[index];

        let key = modification
            .external_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .cloned()
            .unwrap_or_else(|| col.name().to_string());

        let mut value = row.field(index)?.value.clone();
        if modification.trim_spaces || self.options.trim_spaces_default {
            value = value.trimmed();
        }
        if let Some(convert) = &modification.convert {
            value = convert(&value).map_err(|e| XbaseError::Projection {
                key: key.clone(),
                cause: e.to_string(),
            })?;
        }
        Ok((key, value))
    }

    pub fn to_map(&self, row: &Row) -> XbaseResult<BTreeMap<String, Value>> {
        let mut map = BTreeMap::new();
        for index in 0..self.tabdef.columns.len() {
            let (key, value) = self.project_field(row, index)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Rebuild a row from a key/value map. Keys follow the same external-key
    /// rules as `to_map`; missing keys leave the field at its null default.
    /// No coercion happens here, the value codec polices tags on encode.
    pub fn row_from_map(&self, map: &BTreeMap<String, Value>) -> Row {
        let mut row = self.new_row();
        for (index, col) in self.tabdef.columns.iter().enumerate() {
            let key = self.mods[index]
                .external_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| col.name());
            if let Some(value) = map.get(key) {
                row.fields[index].value = value.clone();
            }
        }
        row
    }

    /// Project a row onto the JSON-equivalent tree, in schema order. With
    /// `strict_projection` set, lossy values (dates, timestamps, memo
    /// content) are rejected instead of degraded to strings.
    pub fn to_json(&self, row: &Row) -> XbaseResult<serde_json::Value> {
        let mut object = serde_json::Map::new();
        for index in 0..self.tabdef.columns.len() {
            let (key, value) = self.project_field(row, index)?;
            let json = value::value_to_json(&value, self.options.strict_projection).map_err(
                |cause| XbaseError::Projection {
                    key: key.clone(),
                    cause,
                },
            )?;
            object.insert(key, json);
        }
        Ok(serde_json::Value::Object(object))
    }

    /// Inverse tree projection: the JSON object becomes a value map, then a
    /// row.
    pub fn row_from_json(&self, json: &serde_json::Value) -> XbaseResult<Row> {
        let object = json.as_object().ok_or_else(|| XbaseError::Projection {
            key: String::new(),
            cause: "expected a JSON object".into(),
        })?;
        let mut map = BTreeMap::new();
        for (key, jv) in object {
            let value = value::json_to_value(jv).map_err(|cause| XbaseError::Projection {
                key: key.clone(),
                cause,
            })?;
            map.insert(key.clone(), value);
        }
        Ok(self.row_from_map(&map))
    }
}

#[cfg(test)]
mod table_tests {

    use std::env::set_var;

    use chrono::Local;

    use super::*;
    use crate::dbf::column::ColumnType;
    use crate::dbf::header::FileType;
    use crate::dbf::memo::MemoryMemoStore;
    use crate::dbf::row::ROW_DELETED;
    use crate::factory::MemoryStore;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn people_table() -> Table<MemoryStore> {
        let columns = vec![
            Column::new("FIRSTNAME", ColumnType::Character, 9, 0).unwrap(),
            Column::new("AGE", ColumnType::Numeric, 3, 0).unwrap(),
        ];
        let mut table = MemoryStore::create_table(FileType::VisualFoxPro, columns).unwrap();

        for (name, age) in [("Alice", 31i64), ("  Bob", 45), ("Carol", 28)] {
            let mut row = table.new_row();
            row.set_value(0, Value::Character(name.into())).unwrap();
            row.set_value(1, Value::Integer(age)).unwrap();
            table.append_row(&mut row).unwrap();
        }
        table.goto(0);
        table
    }

    #[test]
    fn cursor_clamps_on_skip() {
        setup();
        let mut table = people_table();
        assert!(table.bof());

        table.skip(2);
        assert_eq!(table.pointer(), 2);
        table.skip(100);
        assert_eq!(table.pointer(), 3);
        assert!(table.eof());
        table.skip(-100);
        assert_eq!(table.pointer(), 0);
    }

    #[test]
    fn row_reads_without_advancing() {
        setup();
        let mut table = people_table();
        table.skip(1);
        let row = table.row().unwrap();
        assert_eq!(row.position, 1);
        assert_eq!(table.pointer(), 1);
        assert_eq!(
            row.field(0).unwrap().value,
            Value::Character("  Bob    ".into())
        );
    }

    #[test]
    fn read_past_eof_fails() {
        setup();
        let mut table = people_table();
        table.skip(3);
        assert!(matches!(
            table.row(),
            Err(XbaseError::InvalidPosition(3))
        ));
    }

    #[test]
    fn rows_filters_deleted() {
        setup();
        let mut table = people_table();

        // flag the middle row as deleted on disk
        let mut row = table.new_row();
        row.position = 1;
        row.deleted = true;
        row.set_value(0, Value::Character("  Bob".into())).unwrap();
        row.set_value(1, Value::Integer(45)).unwrap();
        table.write_row(&row).unwrap();

        table.goto(0);
        let all = table.rows(ReadOptions::default()).unwrap();
        assert_eq!(all.len(), 3);

        table.goto(0);
        let live = table
            .rows(ReadOptions {
                skip_deleted: true,
                ..ReadOptions::default()
            })
            .unwrap();
        assert_eq!(live.len(), 2);

        // filtering preserves the order of the unfiltered read
        let names: Vec<_> = live
            .iter()
            .map(|r| r.field(0).unwrap().value.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                Value::Character("Alice    ".into()),
                Value::Character("Carol    ".into())
            ]
        );
    }

    #[test]
    fn rows_skip_invalid_drops_bad_frames() {
        setup();
        let mut table = people_table();

        // corrupt the status byte of row 1
        let mut frame = vec![0xffu8];
        frame.extend_from_slice(&[b' '; 12]);
        table.store_mut().write_row(1, &frame).unwrap();

        table.goto(0);
        assert!(table.rows(ReadOptions::default()).is_err());

        table.goto(0);
        let rows = table
            .rows(ReadOptions {
                skip_invalid: true,
                ..ReadOptions::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn append_law() {
        setup();
        let mut table = people_table();
        assert_eq!(table.rows_count(), 3);

        let mut row = table.new_row();
        row.set_value(0, Value::Character("Dave".into())).unwrap();
        row.set_value(1, Value::Integer(52)).unwrap();
        table.append_row(&mut row).unwrap();

        assert_eq!(table.rows_count(), 4);
        assert_eq!(row.position, 3);
        assert_eq!(
            table.header().modified_date(),
            Some(Local::now().date_naive())
        );

        table.goto(3);
        let back = table.row().unwrap();
        assert_eq!(
            back.field(0).unwrap().value,
            Value::Character("Dave     ".into())
        );
        assert_eq!(back.field(1).unwrap().value, Value::Integer(52));
    }

    #[test]
    fn update_in_place_keeps_row_count() {
        setup();
        let mut table = people_table();
        table.goto(2);
        let mut row = table.row().unwrap();
        row.set_value(1, Value::Integer(29)).unwrap();
        table.write_row(&row).unwrap();

        assert_eq!(table.rows_count(), 3);
        table.goto(2);
        assert_eq!(table.row().unwrap().field(1).unwrap().value, Value::Integer(29));
    }

    #[test]
    fn external_key_and_trim_projection() {
        setup();
        let mut table = people_table();
        table.set_column_modification(
            0,
            Modification {
                trim_spaces: true,
                external_key: Some("first".into()),
                convert: None,
            },
        );

        table.goto(1);
        let row = table.row().unwrap();
        let map = table.to_map(&row).unwrap();
        assert_eq!(map.get("first"), Some(&Value::Character("Bob".into())));
        assert!(!map.contains_key("FIRSTNAME"));
        assert_eq!(map.get("AGE"), Some(&Value::Integer(45)));
    }

    #[test]
    fn trim_default_composes_as_or() {
        setup();
        let mut table = people_table();
        table.goto(1);
        let row = table.row().unwrap();

        let padded = table.to_map(&row).unwrap();
        assert_eq!(
            padded.get("FIRSTNAME"),
            Some(&Value::Character("  Bob    ".into()))
        );

        // no per-column trim, the table default alone must apply
        table.set_trim_spaces_default(true);
        let trimmed = table.to_map(&row).unwrap();
        assert_eq!(trimmed.get("FIRSTNAME"), Some(&Value::Character("Bob".into())));
    }

    #[test]
    fn convert_runs_after_trim() {
        setup();
        let mut table = people_table();
        table.set_column_modification(
            0,
            Modification {
                trim_spaces: true,
                external_key: None,
                convert: Some(Box::new(|v| match v {
                    Value::Character(s) => Ok(Value::Character(s.to_uppercase())),
                    other => Ok(other.clone()),
                })),
            },
        );

        table.goto(1);
        let row = table.row().unwrap();
        let map = table.to_map(&row).unwrap();
        // "  Bob    " trims to "Bob" before the convert sees it
        assert_eq!(map.get("FIRSTNAME"), Some(&Value::Character("BOB".into())));
    }

    #[test]
    fn convert_errors_surface_as_projection() {
        setup();
        let mut table = people_table();
        table.set_column_modification(
            1,
            Modification {
                convert: Some(Box::new(|_| Err("nope".into()))),
                ..Modification::default()
            },
        );
        table.goto(0);
        let row = table.row().unwrap();
        assert!(matches!(
            table.to_map(&row),
            Err(XbaseError::Projection { ref key, .. }) if key == "AGE"
        ));
    }

    #[test]
    fn modification_out_of_range_is_ignored() {
        setup();
        let mut table = people_table();
        table.set_column_modification(9, Modification::default());
        assert!(table.get_column_modification(9).is_none());
        assert!(table.get_column_modification(0).is_some());
    }

    #[test]
    fn projection_round_trip_without_modifications() {
        setup();
        let mut table = people_table();
        table.goto(0);
        let row = table.row().unwrap();
        let rebuilt = table.row_from_map(&table.to_map(&row).unwrap());
        assert_eq!(rebuilt.fields, row.fields);
    }

    #[test]
    fn json_round_trip() {
        setup();
        let mut table = people_table();
        table.goto(0);
        let row = table.row().unwrap();

        let json = table.to_json(&row).unwrap();
        assert_eq!(json["FIRSTNAME"], serde_json::json!("Alice    "));
        assert_eq!(json["AGE"], serde_json::json!(31));

        let rebuilt = table.row_from_json(&json).unwrap();
        assert_eq!(rebuilt.fields, row.fields);
    }

    #[test]
    fn strict_projection_rejects_lossy_values() {
        setup();
        let columns = vec![Column::new("BORN", ColumnType::Date, 8, 0).unwrap()];
        let mut table = MemoryStore::create_table(FileType::FoxBasePlus, columns).unwrap();

        let mut row = table.new_row();
        row.set_value(0, Value::Date(chrono::NaiveDate::from_ymd_opt(2001, 2, 3).unwrap()))
            .unwrap();
        table.append_row(&mut row).unwrap();

        table.goto(0);
        let row = table.row().unwrap();
        assert!(table.to_json(&row).is_ok());

        table.set_strict_projection(true);
        assert!(matches!(
            table.to_json(&row),
            Err(XbaseError::Projection { .. })
        ));
    }

    #[test]
    fn memo_content_round_trip() {
        setup();
        let columns = vec![
            Column::new("TITLE", ColumnType::Character, 5, 0).unwrap(),
            Column::new("BODY", ColumnType::Memo, 4, 0).unwrap(),
        ];
        let mut table = MemoryStore::create_table(FileType::VisualFoxPro, columns).unwrap();
        table.attach_memo_store(Box::new(MemoryMemoStore::default()));

        let mut row = table.new_row();
        row.set_value(0, Value::Character("intro".into())).unwrap();
        row.set_value(1, Value::Memo("a note that does not fit a slot".into()))
            .unwrap();
        table.append_row(&mut row).unwrap();

        table.goto(0);
        let back = table.row().unwrap();
        assert_eq!(
            back.field(1).unwrap().value,
            Value::Memo("a note that does not fit a slot".into())
        );
    }

    #[test]
    fn memo_content_without_store_fails() {
        setup();
        let columns = vec![Column::new("BODY", ColumnType::Memo, 4, 0).unwrap()];
        let mut table = MemoryStore::create_table(FileType::VisualFoxPro, columns).unwrap();

        let mut row = table.new_row();
        row.set_value(0, Value::Memo("text".into())).unwrap();
        assert!(matches!(
            table.append_row(&mut row),
            Err(XbaseError::ValueEncode { .. })
        ));
    }

    #[test]
    fn deleted_row_survives_write_and_read() {
        setup();
        let mut table = people_table();
        let mut frame_check = table.new_row();
        frame_check.deleted = true;
        frame_check.set_value(0, Value::Character("Ghost".into())).unwrap();
        table.append_row(&mut frame_check).unwrap();

        let raw = table.store_mut().read_row(3).unwrap();
        assert_eq!(raw[0], ROW_DELETED);

        table.goto(3);
        assert!(table.row().unwrap().deleted);
    }
}
