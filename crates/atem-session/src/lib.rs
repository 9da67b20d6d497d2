//! # atem-session
//!
//! UDP 上の論理セッションを維持するコア状態機械。
//!
//! ## 概要
//!
//! UDP は到達も順序も保証しないため、セッションの確立・維持・喪失検出を
//! すべて時刻ベースで行う。I/O は一切行わず、呼び出し側（`atem-net` /
//! `atem-wasm`）が受信データグラムと現在時刻を渡し、送信すべきデータグラムを
//! 受け取る。
//!
//! ### キーコンセプト
//!
//! - **ハンドシェイク ID**: クライアントが生成する ID（最上位ビット 0）
//! - **リモート割り当て ID**: スイッチャーが割り当てる ID（最上位ビット 1）
//! - **旧 ID**: 一世代前のセッション ID。これを持つパケットは古いので破棄する
//! - **喪失検出**: 最も古い未 ACK パケットが ACK_TIMEOUT_MS を超えたらセッション喪失
//! - **ハートビート**: 送信が途絶えたら空の ACK 要求パケットを積む
//!
//! ## セッションの状態遷移
//!
//! ```text
//! NoSession → AwaitingHandshake (初回 tick でハンドシェイク送信)
//!           → Established (リモート割り当て ID を持つパケットを受信)
//!           → AwaitingHandshake (タイムアウト/切断、旧 ID を記録して新しい ID で再開)
//! ```

pub mod connection;
pub mod engine;
pub mod error;
pub mod identity;

pub use connection::{Connection, ConnectionStats, Receipt};
pub use engine::{Inbound, PacketDisposition, SessionEngine, SessionState, TickOutcome};
pub use error::SessionError;

/// 最古の未 ACK パケットがこれを超えたらセッション喪失とみなす（ミリ秒）
pub const ACK_TIMEOUT_MS: u64 = 1500;

/// 送信が途絶えてからハートビートを積むまでの間隔（ミリ秒）
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// 送信済み未 ACK パケットを再送するまでの間隔（ミリ秒）
pub const RETRANSMIT_INTERVAL_MS: u64 = 100;

/// 1 パケットの最大バイト数（ヘッダー込み）
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1416;

/// セッション層の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// セッション喪失とみなす未 ACK 時間
    pub ack_timeout_ms: u64,
    /// ハートビート間隔
    pub heartbeat_interval_ms: u64,
    /// 再送間隔（0 なら tick ごとに再送）
    pub retransmit_interval_ms: u64,
    /// メッセージをまとめるときのパケット最大長
    pub max_packet_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            ack_timeout_ms: ACK_TIMEOUT_MS,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            retransmit_interval_ms: RETRANSMIT_INTERVAL_MS,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}
