//! atem-session エラー型

use atem_wire::{Tag, WireError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// 確立済みセッションがない状態で送信しようとした
    #[error("no established session")]
    NotEstablished,
    /// 1 パケットに収まらないメッセージ
    #[error("message {tag} of {len} bytes does not fit in a packet")]
    MessageTooLarge { tag: Tag, len: usize },
    /// 受信データグラムのヘッダーが不正
    #[error(transparent)]
    Wire(#[from] WireError),
}
