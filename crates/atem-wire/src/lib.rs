//! # atem-wire
//!
//! スイッチャー制御プロトコルの Wire Format 実装。
//!
//! UDP パケットヘッダーの解析/生成と、ペイロード内のコマンドブロックの
//! 分割・型付きメッセージへの変換を担当する。セッション管理は一切行わない
//! （`atem-session` クレートが担当）。
//!
//! ## パケットの Wire Format
//!
//! ```text
//! [flags: 5bit][length: 11bit]  (u16 BE, length はヘッダー込みの全長)
//! [session_id: u16 BE]
//! [ack_number: u16 BE]
//! [reserved: 4bytes]
//! [packet_number: u16 BE]
//! [payload: variable]
//! ```
//!
//! ## コマンドブロックの Wire Format
//!
//! ```text
//! [length: u16 BE][reserved: 2bytes][tag: 4bytes ASCII][body: variable]
//! ```

#![no_std]
extern crate alloc;

pub mod command;
pub mod error;
pub mod message;
pub mod packet;

pub use command::{CommandIter, RawCommand, Tag};
pub use error::WireError;
pub use message::{
    Command, InitiationComplete, InputProperties, LockObtained, LockRequest, LockStateChanged,
    Message, MessageKind, ProtocolVersion, StartDataTransfer, TransferChunkRequest,
    TransferCompleted, TransferData, TransferError,
};
pub use packet::{is_newer, Flags, Packet, SessionId};

/// スイッチャーの待ち受け UDP ポート
pub const DEFAULT_PORT: u16 = 9910;
