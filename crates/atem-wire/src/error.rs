//! atem-wire エラー型

use thiserror::Error;

use crate::command::Tag;

/// Wire Format の解析エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// パケットがヘッダー長に満たない
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    /// ヘッダーの length フィールドが実際のデータグラム長を超えている
    #[error("declared packet length {declared} exceeds datagram length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// コマンドブロックが途中で切れている
    #[error("command block truncated at payload offset {0}")]
    TruncatedCommand(usize),
    /// 既知コマンドのボディが短すぎる
    #[error("command {tag} body too short: {len} bytes")]
    CommandTooShort { tag: Tag, len: usize },
    /// ペイロードが 1 パケットに収まらない
    #[error("payload of {0} bytes does not fit in a single packet")]
    PayloadTooLarge(usize),
}
