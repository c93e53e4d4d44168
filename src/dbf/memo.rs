use std::io;

use crate::dbf::error::{XbaseError, XbaseResult};

pub const MEMO_HEADER_SIZE: usize = 512;
pub const MEMO_BLOCK_HEADER_SIZE: usize = 8;
pub const DEFAULT_MEMO_BLOCK_SIZE: u16 = 64;

// the memo companion file is big-endian, unlike the table file

const BLOCK_TAG_BINARY: u32 = 0;
const BLOCK_TAG_TEXT: u32 = 1;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoKind {
    Text,
    Binary,
}

impl MemoKind {
    fn from_tag(tag: u32) -> MemoKind {
        match tag {
            BLOCK_TAG_TEXT => MemoKind::Text,
            _ => MemoKind::Binary,
        }
    }

    fn tag(&self) -> u32 {
        match self {
            MemoKind::Text => BLOCK_TAG_TEXT,
            MemoKind::Binary => BLOCK_TAG_BINARY,
        }
    }
}

/// One resolved memo block: the 8-byte block header tells text from binary,
/// the payload is `length` bytes after it.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoBlock {
    pub kind: MemoKind,
    pub data: Vec<u8>,
}

impl MemoBlock {
    pub fn text(content: &str) -> MemoBlock {
        Self {
            kind: MemoKind::Text,
            data: content.as_bytes().to_vec(),
        }
    }

    pub fn binary(data: Vec<u8>) -> MemoBlock {
        Self {
            kind: MemoKind::Binary,
            data,
        }
    }

    /// Parse a block starting at the block header. `id` is only used for
    /// error context.
    pub fn parse(buf: &[u8], id: u32) -> XbaseResult<MemoBlock> {
        if buf.len() < MEMO_BLOCK_HEADER_SIZE {
            return Err(block_corrupt(id, "block header is truncated"));
        }
        let tag = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let length = u32::from_be_bytes(buf[4..8].try_into().unwrap()) as usize;
        if buf.len() < MEMO_BLOCK_HEADER_SIZE + length {
            return Err(block_corrupt(id, "block payload overruns the file"));
        }
        Ok(Self {
            kind: MemoKind::from_tag(tag),
            data: buf[MEMO_BLOCK_HEADER_SIZE..MEMO_BLOCK_HEADER_SIZE + length].to_vec(),
        })
    }

    pub fn emit(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MEMO_BLOCK_HEADER_SIZE + self.data.len());
        buf.extend_from_slice(&self.kind.tag().to_be_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Number of whole blocks the emitted form occupies.
    pub fn blocks_used(&self, block_size: u16) -> u32 {
        let total = (MEMO_BLOCK_HEADER_SIZE + self.data.len()) as u32;
        total.div_ceil(block_size as u32)
    }
}

fn block_corrupt(id: u32, reason: &str) -> XbaseError {
    XbaseError::Io {
        position: id,
        source: io::Error::new(io::ErrorKind::InvalidData, reason.to_string()),
    }
}

/// The 512-byte memo file header.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoHeader {
    pub next_free: u32,  // next free block id
    pub block_size: u16, // bytes per block
}

impl MemoHeader {
    pub fn new(block_size: u16) -> MemoHeader {
        Self {
            // the header itself occupies the leading blocks
            next_free: (MEMO_HEADER_SIZE as u32).div_ceil(block_size as u32),
            block_size,
        }
    }

    pub fn parse(buf: &[u8]) -> XbaseResult<MemoHeader> {
        if buf.len() < MEMO_HEADER_SIZE {
            return Err(XbaseError::MalformedHeader(format!(
                "memo header needs {} bytes, got {}",
                MEMO_HEADER_SIZE,
                buf.len()
            )));
        }
        let header = Self {
            next_free: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            block_size: u16::from_be_bytes(buf[6..8].try_into().unwrap()),
        };
        if header.block_size == 0 {
            return Err(XbaseError::MalformedHeader("memo block size is zero".into()));
        }
        Ok(header)
    }

    pub fn emit(&self) -> [u8; MEMO_HEADER_SIZE] {
        let mut buf = [0u8; MEMO_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.next_free.to_be_bytes());
        buf[6..8].copy_from_slice(&self.block_size.to_be_bytes());
        buf
    }
}

/// Random-access block storage for memo content. Implemented over the *.fpt
/// companion by the factory; absent stores leave memo columns as raw block
/// ids.
pub trait MemoStore {
    fn read_block(&mut self, id: u32) -> XbaseResult<MemoBlock>;
    fn write_block(&mut self, block: &MemoBlock) -> XbaseResult<u32>;
}

/// Memo storage held entirely in memory, for tests and ephemeral tables.
#[derive(Debug, Default)]
pub struct MemoryMemoStore {
    blocks: Vec<MemoBlock>,
}

impl MemoStore for MemoryMemoStore {
    fn read_block(&mut self, id: u32) -> XbaseResult<MemoBlock> {
        if id == 0 {
            return Err(block_corrupt(id, "block 0 is the header"));
        }
        self.blocks
            .get(id as usize - 1)
            .cloned()
            .ok_or_else(|| block_corrupt(id, "no such block"))
    }

    fn write_block(&mut self, block: &MemoBlock) -> XbaseResult<u32> {
        self.blocks.push(block.clone());
        Ok(self.blocks.len() as u32)
    }
}

#[cfg(test)]
mod memo_tests {

    use std::env::set_var;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    #[test]
    fn block_round_trip() {
        setup();
        let block = MemoBlock::text("a longer piece of text");
        let parsed = MemoBlock::parse(&block.emit(), 1).unwrap();
        assert_eq!(parsed, block);
        assert_eq!(parsed.kind, MemoKind::Text);
    }

    #[test]
    fn binary_block_tag() {
        setup();
        let block = MemoBlock::binary(vec![0, 159, 146, 150]);
        let buf = block.emit();
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), 0);
        assert_eq!(MemoBlock::parse(&buf, 3).unwrap().kind, MemoKind::Binary);
    }

    #[test]
    fn truncated_block_fails() {
        setup();
        let mut buf = MemoBlock::text("hello").emit();
        buf.truncate(buf.len() - 2);
        assert!(MemoBlock::parse(&buf, 1).is_err());
    }

    #[test]
    fn blocks_used_rounds_up() {
        setup();
        let block = MemoBlock::binary(vec![0u8; 57]);
        assert_eq!(block.blocks_used(64), 2); // 8 + 57 > 64
        let small = MemoBlock::binary(vec![0u8; 56]);
        assert_eq!(small.blocks_used(64), 1);
    }

    #[test]
    fn header_round_trip() {
        setup();
        let hdr = MemoHeader::new(64);
        assert_eq!(hdr.next_free, 8);
        let parsed = MemoHeader::parse(&hdr.emit()).unwrap();
        assert_eq!(parsed, hdr);
    }

    #[test]
    fn zero_block_size_fails() {
        setup();
        let buf = [0u8; MEMO_HEADER_SIZE];
        assert!(MemoHeader::parse(&buf).is_err());
    }

    #[test]
    fn memory_store_assigns_sequential_ids() {
        setup();
        let mut store = MemoryMemoStore::default();
        let a = store.write_block(&MemoBlock::text("a")).unwrap();
        let b = store.write_block(&MemoBlock::text("b")).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.read_block(2).unwrap(), MemoBlock::text("b"));
        assert!(store.read_block(9).is_err());
    }
}
