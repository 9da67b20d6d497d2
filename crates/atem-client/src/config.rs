//! クライアント設定

use atem_session::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// クライアント設定
///
/// JSON から読み込む場合、省略したフィールドはデフォルト値になる。
///
/// ```json
/// { "tick_interval_ms": 20, "reconnect_delay_ms": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 再送ドライバの周期
    pub tick_interval_ms: u64,
    /// 最古の未 ACK パケットがこれを超えたらセッション喪失
    pub ack_timeout_ms: u64,
    /// 送信が途絶えたときのハートビート間隔
    pub heartbeat_interval_ms: u64,
    /// 未 ACK パケットの再送間隔
    pub retransmit_interval_ms: u64,
    /// ソケット障害後の再接続間隔
    pub reconnect_delay_ms: u64,
    /// スイッチャーの UDP ポート
    pub port: u16,
    /// 1 パケットの最大バイト数
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            tick_interval_ms: 20,
            ack_timeout_ms: atem_session::ACK_TIMEOUT_MS,
            heartbeat_interval_ms: atem_session::HEARTBEAT_INTERVAL_MS,
            retransmit_interval_ms: atem_session::RETRANSMIT_INTERVAL_MS,
            reconnect_delay_ms: 5000,
            port: atem_wire::DEFAULT_PORT,
            max_packet_size: atem_session::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl ClientConfig {
    /// JSON 文字列から読み込む
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ack_timeout_ms: self.ack_timeout_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            retransmit_interval_ms: self.retransmit_interval_ms,
            max_packet_size: self.max_packet_size,
        }
    }
}
