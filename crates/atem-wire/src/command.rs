//! コマンドブロックの分割と組み立て
//!
//! ## Wire Format
//! ```text
//! [length: u16 BE (ヘッダー 8 バイト込み)][reserved: 2bytes][tag: 4bytes][body...]
//! ```
//!
//! 1 つのパケットペイロードには 0 個以上のコマンドブロックが連続して格納される。

use alloc::vec::Vec;

use crate::error::WireError;

/// 4 文字の ASCII コマンド名（例: `LOCK`, `FTDa`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Tag(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// 未解釈のコマンドブロック
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub tag: Tag,
    pub body: Vec<u8>,
}

impl RawCommand {
    /// コマンドヘッダー長（length: 2 + reserved: 2 + tag: 4）
    pub const HEADER_LEN: usize = 8;

    pub fn new(tag: Tag, body: Vec<u8>) -> Self {
        RawCommand { tag, body }
    }

    /// ヘッダー込みのエンコード長
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.body.len()
    }

    /// `out` の末尾にコマンドブロックを書き込む
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        encode_block(self.tag, &self.body, out);
    }
}

/// タグとボディからコマンドブロックを書き込む
pub(crate) fn encode_block(tag: Tag, body: &[u8], out: &mut Vec<u8>) {
    let len = (RawCommand::HEADER_LEN + body.len()) as u16;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&tag.0);
    out.extend_from_slice(body);
}

/// ペイロードからコマンドブロックを順に取り出すイテレータ
///
/// ブロックの長さが不正な場合は `Err` を 1 度だけ返し、以降は何も返さない
/// （後続ブロックの境界が分からなくなるため）。
pub struct CommandIter<'a> {
    payload: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> CommandIter<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        CommandIter {
            payload,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for CommandIter<'_> {
    type Item = Result<RawCommand, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.payload.len() {
            return None;
        }

        let rest = &self.payload[self.offset..];
        if rest.len() < RawCommand::HEADER_LEN {
            self.failed = true;
            return Some(Err(WireError::TruncatedCommand(self.offset)));
        }

        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        if len < RawCommand::HEADER_LEN || len > rest.len() {
            self.failed = true;
            return Some(Err(WireError::TruncatedCommand(self.offset)));
        }

        let tag = Tag([rest[4], rest[5], rest[6], rest[7]]);
        let body = rest[RawCommand::HEADER_LEN..len].to_vec();
        self.offset += len;

        Some(Ok(RawCommand { tag, body }))
    }
}
