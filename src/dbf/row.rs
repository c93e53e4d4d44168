use std::sync::Arc;

use bytes::Bytes;
use derivative::Derivative;

use crate::dbf::column::{Column, TableDef};
use crate::dbf::error::{XbaseError, XbaseResult};
use crate::dbf::memo::{MemoKind, MemoStore};
use crate::dbf::value::{self, Value};

/// Status byte of a live row frame
pub const ROW_ACTIVE: u8 = 0x20;
/// Status byte of a row flagged as deleted
pub const ROW_DELETED: u8 = 0x2a;

/// One field: the owning column's ordinal and the decoded host value.
/// Fields reference their column by index, never by ownership.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub column: usize,
    pub value: Value,
}

/// A detached row. It carries the schema it was decoded under so field
/// lookups work without the table, but never the table itself.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Row {
    /// logical position, 0-based from the start of the row section
    pub position: u32,
    /// deleted flag from the leading status byte
    pub deleted: bool,
    /// one field per column, in schema order
    pub fields: Vec<Field>,
    #[derivative(Debug = "ignore")]
    tabdef: Arc<TableDef>,
}

impl Row {
    /// A fresh row with every field at its type default (null).
    pub fn new(tabdef: Arc<TableDef>, position: u32) -> Row {
        let fields = (0..tabdef.columns.len())
            .map(|i| Field {
                column: i,
                value: Value::Null,
            })
            .collect();
        Self {
            position,
            deleted: false,
            fields,
            tabdef,
        }
    }

    /// Decode one row frame. Memo-type slots resolve through `memo` when a
    /// store is attached, otherwise they stay raw block ids.
    pub fn parse(
        buf: &[u8],
        tabdef: Arc<TableDef>,
        position: u32,
        mut memo: Option<&mut dyn MemoStore>,
    ) -> XbaseResult<Row> {
        let need = tabdef.row_length as usize;
        if buf.len() < need {
            return Err(XbaseError::ShortRow {
                got: buf.len(),
                need,
            });
        }

        let deleted = match buf[0] {
            ROW_ACTIVE => false,
            ROW_DELETED => true,
            status => {
                return Err(XbaseError::MalformedRow {
                    position,
                    reason: format!("unknown status byte 0x{:02x}", status),
                })
            }
        };

        let mut fields = Vec::with_capacity(tabdef.columns.len());
        let mut off = 1usize;
        for (i, col) in tabdef.columns.iter().enumerate() {
            let len = col.length as usize;
            let mut val = value::decode(col, i, &buf[off..off + len])?;
            if col.col_type.is_memo() {
                let block_id = match &val {
                    Value::Block(id) => Some(*id),
                    _ => None,
                };
                if let (Some(id), Some(store)) = (block_id, memo.as_deref_mut()) {
                    val = resolve_block(col, i, id, store)?;
                }
            }
            fields.push(Field {
                column: i,
                value: val,
            });
            off += len;
        }

        Ok(Self {
            position,
            deleted,
            fields,
            tabdef,
        })
    }

    /// Encode the row back into a frame. Every slot is rewritten; memo
    /// content must already be flushed down to block ids.
    pub fn to_bytes(&self) -> XbaseResult<Bytes> {
        if self.fields.len() != self.tabdef.columns.len() {
            return Err(XbaseError::MalformedRow {
                position: self.position,
                reason: format!(
                    "row has {} fields, schema has {} columns",
                    self.fields.len(),
                    self.tabdef.columns.len()
                ),
            });
        }

        let mut buf = vec![0u8; self.tabdef.row_length as usize];
        buf[0] = if self.deleted { ROW_DELETED } else { ROW_ACTIVE };

        let mut off = 1usize;
        for (i, (field, col)) in self.fields.iter().zip(self.tabdef.columns.iter()).enumerate() {
            if field.column != i {
                return Err(XbaseError::MalformedRow {
                    position: self.position,
                    reason: format!("field {} declares column {}", i, field.column),
                });
            }
            let slot = value::encode(col, i, &field.value)?;
            let len = col.length as usize;
            if slot.len() != len {
                return Err(XbaseError::ValueEncode {
                    index: i,
                    name: col.name().to_string(),
                    reason: format!("encoded {} bytes into a {}-byte slot", slot.len(), len),
                });
            }
            buf[off..off + len].copy_from_slice(&slot);
            off += len;
        }

        Ok(Bytes::from(buf))
    }

    pub fn tabdef(&self) -> &Arc<TableDef> {
        &self.tabdef
    }

    pub fn column(&self, pos: usize) -> XbaseResult<&Column> {
        self.tabdef
            .columns
            .get(pos)
            .ok_or(XbaseError::InvalidPosition(pos))
    }

    /// Field access is range-checked on both ends: `0 <= pos < len`.
    pub fn field(&self, pos: usize) -> XbaseResult<&Field> {
        self.fields.get(pos).ok_or(XbaseError::InvalidPosition(pos))
    }

    pub fn set_value(&mut self, pos: usize, value: Value) -> XbaseResult<()> {
        match self.fields.get_mut(pos) {
            Some(field) => {
                field.value = value;
                Ok(())
            }
            None => Err(XbaseError::InvalidPosition(pos)),
        }
    }

    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.tabdef
            .column_position(name)
            .map(|pos| &self.fields[pos].value)
    }
}

fn resolve_block(col: &Column, index: usize, id: u32, store: &mut dyn MemoStore) -> XbaseResult<Value> {
    let block = store.read_block(id).map_err(|e| XbaseError::ValueDecode {
        index,
        name: col.name().to_string(),
        reason: e.to_string(),
    })?;
    Ok(match block.kind {
        MemoKind::Text => Value::Memo(String::from_utf8_lossy(&block.data).into_owned()),
        MemoKind::Binary => Value::Blob(block.data),
    })
}
