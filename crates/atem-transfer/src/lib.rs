//! # atem-transfer
//!
//! 静止画・ラベル画像のアップロードを制御メッセージと同じセッションに
//! 混ぜて流すための転送オーケストレーション。
//!
//! ## 転送の流れ
//!
//! ```text
//! enqueue            → LOCK(store, lock=1)        （ロック未取得なら）
//! LKOB(store)        → FTSD(id, store, index, size, mode)
//! FTCD(id, size, n)  → FTDa × n                   （1 チャンク 1 パケット）
//! FTDC(id)           → 次の転送の FTSD、なければ LOCK(store, lock=0)
//! ```
//!
//! スイッチャーはストアごとに同時に 1 つの転送しか受け付けないため、
//! 転送はストア単位のキューで直列化される。I/O は行わず、反応はすべて
//! `Action` として呼び出し側（`atem-client`）に返す。

pub mod orchestrator;
pub mod transfer;

pub use orchestrator::{Action, LockState, TransferOrchestrator};
pub use transfer::{Transfer, TransferId, TransferMode, TransferRequest, TransferSummary};

/// 静止画（メディアプール）のストア番号
pub const STILL_STORE: u16 = 0;

/// ラベル画像用の予約ストア番号
pub const LABEL_STORE: u16 = 0xFFFF;
