//! セッション状態機械と再送ドライバ
//!
//! 受信データグラムごとに `handle_datagram`、一定周期で `tick` を呼び出す。
//! どちらも同じ実行コンテキストから呼ぶこと（内部にロックはない）。

use atem_wire::{CommandIter, Message, Packet, SessionId, WireError};

use crate::connection::{Connection, ConnectionStats, Receipt};
use crate::error::SessionError;
use crate::identity::{next_handshake_id, random_u16};
use crate::EngineConfig;

/// 外から見たセッション状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// まだ何も送っていない
    NoSession,
    /// ハンドシェイク送信済み、リモート割り当て ID 待ち
    AwaitingHandshake,
    /// セッション確立済み
    Established,
}

impl core::fmt::Display for SessionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            SessionState::NoSession => "no-session",
            SessionState::AwaitingHandshake => "awaiting-handshake",
            SessionState::Established => "established",
        };
        f.write_str(name)
    }
}

enum Phase {
    Idle,
    Handshake {
        id: SessionId,
        started_ms: u64,
        /// スイッチャーがハンドシェイクを受け取った（以降はキープアライブを送る）
        acknowledged: bool,
    },
    Established(Connection),
}

/// 受信パケットの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// 現在のセッションのパケット
    Current,
    /// 現在のセッションのパケットだが重複または空
    Duplicate,
    /// 現在のセッションの欠番より先のパケット（ACK せず破棄、再送を待つ）
    OutOfOrder,
    /// ハンドシェイクへの応答
    HandshakeAcknowledged,
    /// 新しいセッションとして採用した
    Adopted,
    /// 一世代前のセッションのパケット（破棄）
    Stale,
    /// 採用できない ID のパケット（破棄）
    Ignored,
}

/// `handle_datagram` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub disposition: PacketDisposition,
    /// 新しく確立したセッションの ID
    pub established: Option<SessionId>,
    /// 新しいセッションに置き換えられた確立済みセッションの ID
    pub replaced: Option<SessionId>,
    /// ディスパッチすべきメッセージ（受信順）
    pub messages: Vec<Message>,
    /// ペイロード内のデコードエラー（セッションは維持される）
    pub errors: Vec<WireError>,
}

impl Inbound {
    fn new(disposition: PacketDisposition) -> Self {
        Inbound {
            disposition,
            established: None,
            replaced: None,
            messages: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// `tick` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// 順に送信すべきデータグラム
    Transmit(Vec<Vec<u8>>),
    /// 最古の未 ACK パケットがタイムアウトした。この tick では何も送らない
    Disconnected { previous: SessionId },
}

/// セッション状態機械
pub struct SessionEngine {
    config: EngineConfig,
    phase: Phase,
    /// 一世代前のセッション ID
    old_id: Option<SessionId>,
    /// 直前に使ったハンドシェイク ID
    last_handshake_id: Option<SessionId>,
    ids: Box<dyn FnMut() -> u16 + Send>,
}

impl SessionEngine {
    /// 新しいセッション状態機械を生成する（ハンドシェイク ID は乱数）
    pub fn new(config: EngineConfig) -> Self {
        Self::with_id_source(config, random_u16)
    }

    /// ハンドシェイク ID の生成元を指定して生成する
    pub fn with_id_source(config: EngineConfig, ids: impl FnMut() -> u16 + Send + 'static) -> Self {
        SessionEngine {
            config,
            phase: Phase::Idle,
            old_id: None,
            last_handshake_id: None,
            ids: Box::new(ids),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Idle => SessionState::NoSession,
            Phase::Handshake { .. } => SessionState::AwaitingHandshake,
            Phase::Established(_) => SessionState::Established,
        }
    }

    /// 確立済みセッションの ID
    pub fn session_id(&self) -> Option<SessionId> {
        match &self.phase {
            Phase::Established(conn) => Some(conn.id()),
            _ => None,
        }
    }

    /// 現在のハンドシェイク ID
    pub fn handshake_id(&self) -> Option<SessionId> {
        match self.phase {
            Phase::Handshake { id, .. } => Some(id),
            _ => None,
        }
    }

    /// ハンドシェイクが相手に届いたか
    pub fn handshake_acknowledged(&self) -> bool {
        matches!(self.phase, Phase::Handshake { acknowledged: true, .. })
    }

    /// 一世代前のセッション ID
    pub fn old_id(&self) -> Option<SessionId> {
        self.old_id
    }

    pub fn connection_stats(&self) -> Option<ConnectionStats> {
        match &self.phase {
            Phase::Established(conn) => Some(conn.stats()),
            _ => None,
        }
    }

    /// メッセージを送信キューに積む（実際の送信は次の tick）
    ///
    /// # エラー
    /// - `SessionError::NotEstablished`: セッション未確立
    /// - `SessionError::MessageTooLarge`: 1 パケットに収まらない
    pub fn send(&mut self, message: Message) -> Result<(), SessionError> {
        let conn = self.connection_mut()?;
        check_size(&message)?;
        conn.push_message(message);
        Ok(())
    }

    /// 各メッセージを単独のパケットとして積む
    ///
    /// 1 つでも大きすぎるメッセージがあれば何も積まない。
    pub fn send_separately(&mut self, messages: Vec<Message>) -> Result<(), SessionError> {
        let conn = self.connection_mut()?;
        for message in &messages {
            check_size(message)?;
        }
        conn.push_separately(messages);
        Ok(())
    }

    /// 受信したデータグラムを処理する
    ///
    /// 1. 確立済みで現在の ID → ペイロードをデコード
    /// 2. ハンドシェイク中で現在のハンドシェイク ID → 応答とみなす
    /// 3. 旧 ID 以外のリモート割り当て ID → 新しいセッションとして採用
    /// 4. それ以外 → 破棄
    ///
    /// # エラー
    /// - `SessionError::Wire`: パケットヘッダーが不正（セッションは維持される）
    pub fn handle_datagram(&mut self, bytes: &[u8], now_ms: u64) -> Result<Inbound, SessionError> {
        let packet = Packet::from_bytes(bytes)?;
        let id = packet.session_id;

        if let Phase::Established(conn) = &mut self.phase {
            if conn.id() == id {
                match conn.accept(&packet) {
                    Receipt::New => {}
                    Receipt::Ahead => return Ok(Inbound::new(PacketDisposition::OutOfOrder)),
                    Receipt::AckOnly | Receipt::Duplicate => {
                        return Ok(Inbound::new(PacketDisposition::Duplicate))
                    }
                }
                let mut inbound = Inbound::new(PacketDisposition::Current);
                decode_payload(&packet.payload, &mut inbound);
                return Ok(inbound);
            }
        }

        if let Phase::Handshake {
            id: handshake_id,
            acknowledged,
            ..
        } = &mut self.phase
        {
            if *handshake_id == id {
                if !*acknowledged {
                    tracing::debug!(session = %id, "handshake acknowledged");
                }
                *acknowledged = true;
                return Ok(Inbound::new(PacketDisposition::HandshakeAcknowledged));
            }
        }

        if Some(id) == self.old_id {
            tracing::trace!(session = %id, "discarding stale packet");
            return Ok(Inbound::new(PacketDisposition::Stale));
        }

        if id.is_remote_assigned() {
            return Ok(self.adopt(packet, now_ms));
        }

        tracing::trace!(session = %id, "discarding packet with unknown session id");
        Ok(Inbound::new(PacketDisposition::Ignored))
    }

    /// 周期処理。送信すべきデータグラムを返すか、セッション喪失を通知する
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let timeout = self.config.ack_timeout_ms;

        match &mut self.phase {
            Phase::Idle => {
                self.begin_handshake(now_ms);
            }
            Phase::Handshake { started_ms, .. } => {
                if now_ms.saturating_sub(*started_ms) > timeout {
                    tracing::debug!("handshake not promoted in time, restarting");
                    self.begin_handshake(now_ms);
                }
            }
            Phase::Established(conn) => {
                // 最も古い未 ACK パケットだけで喪失を判定する
                let expired = conn.oldest_unacked_age(now_ms).is_some_and(|age| age > timeout);
                if !expired {
                    return TickOutcome::Transmit(conn.due_packets(now_ms));
                }

                let previous = conn.id();
                tracing::warn!(session = %previous, timeout_ms = timeout, "session timed out");
                self.old_id = Some(previous);
                self.begin_handshake(now_ms);
                return TickOutcome::Disconnected { previous };
            }
        }

        TickOutcome::Transmit(self.handshake_datagrams())
    }

    /// トランスポート側の切断を反映する
    ///
    /// 確立済みなら旧 ID を記録してハンドシェイクからやり直す。
    ///
    /// # 戻り値
    /// 破棄した確立済みセッションの ID
    pub fn reset(&mut self, now_ms: u64) -> Option<SessionId> {
        let previous = self.session_id();
        if let Some(id) = previous {
            self.old_id = Some(id);
        }
        self.begin_handshake(now_ms);
        previous
    }

    // ===== Private メソッド =====

    fn connection_mut(&mut self) -> Result<&mut Connection, SessionError> {
        match &mut self.phase {
            Phase::Established(conn) => Ok(conn),
            _ => Err(SessionError::NotEstablished),
        }
    }

    fn begin_handshake(&mut self, now_ms: u64) {
        let id = next_handshake_id((self.ids)(), self.last_handshake_id);
        self.last_handshake_id = Some(id);
        self.phase = Phase::Handshake {
            id,
            started_ms: now_ms,
            acknowledged: false,
        };
        tracing::debug!(handshake = %id, "starting handshake");
    }

    /// ハンドシェイク中に送るパケット（未応答ならハンドシェイク、応答済みならキープアライブ）
    fn handshake_datagrams(&self) -> Vec<Vec<u8>> {
        let Phase::Handshake { id, acknowledged, .. } = self.phase else {
            return Vec::new();
        };

        let packet = if acknowledged {
            Packet::ack(id, 0)
        } else {
            Packet::hello(id)
        };

        match packet.to_bytes() {
            Ok(bytes) => vec![bytes],
            Err(err) => {
                tracing::error!(error = %err, "failed to encode handshake packet");
                Vec::new()
            }
        }
    }

    fn adopt(&mut self, packet: Packet, now_ms: u64) -> Inbound {
        let id = packet.session_id;
        let mut inbound = Inbound::new(PacketDisposition::Adopted);

        if let Phase::Established(current) = &self.phase {
            let replaced = current.id();
            self.old_id = Some(replaced);
            inbound.replaced = Some(replaced);
        }

        let mut conn = Connection::new(id, now_ms, &self.config);
        let fresh = conn.accept(&packet) == Receipt::New;
        self.phase = Phase::Established(conn);
        inbound.established = Some(id);
        tracing::info!(session = %id, "session established");

        if fresh {
            decode_payload(&packet.payload, &mut inbound);
        }
        inbound
    }
}

fn check_size(message: &Message) -> Result<(), SessionError> {
    let len = message.encoded_len();
    if len > Packet::MAX_PAYLOAD {
        return Err(SessionError::MessageTooLarge {
            tag: message.tag(),
            len,
        });
    }
    Ok(())
}

fn decode_payload(payload: &[u8], inbound: &mut Inbound) {
    for raw in CommandIter::new(payload) {
        match raw.and_then(Message::decode) {
            Ok(message) => inbound.messages.push(message),
            Err(err) => inbound.errors.push(err),
        }
    }
}
