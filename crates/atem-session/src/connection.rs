//! 確立済みセッションの送受信状態
//!
//! 送信キュー（ACK 待ちパケットと作成時刻）、受信パケット番号の追跡、
//! ACK の生成、ハートビートを担当する。ID の検証や状態遷移は
//! `engine` モジュールが担当する。

use std::collections::VecDeque;

use atem_wire::packet::mark_retransmission;
use atem_wire::{is_newer, Message, Packet, SessionId};

use crate::EngineConfig;

/// ACK 前の送信パケット
#[derive(Debug, Clone)]
struct PendingPacket {
    /// パケット番号
    number: u16,
    /// エンコード済みパケット
    bytes: Vec<u8>,
    /// 作成時刻（ミリ秒）。喪失検出はこの値だけを使う
    created_at_ms: u64,
    /// 最後に送信した時刻（未送信なら None）
    last_sent_ms: Option<u64>,
}

/// まだパケットになっていない送信メッセージ
#[derive(Debug)]
enum Outgoing {
    /// まとめて 1 パケット（大きければ複数）に詰めるメッセージ列
    Batch(Vec<Message>),
    /// 必ず単独のパケットにするメッセージ
    Separate(Message),
}

/// 送信側の状態
struct SendState {
    /// 次に使うパケット番号
    next_number: u16,
    /// ACK 待ちパケット（番号順）
    in_flight: VecDeque<PendingPacket>,
    /// パケット化待ちのメッセージ
    outgoing: VecDeque<Outgoing>,
    /// 最後にパケットを作った時刻（ハートビート判定用）
    last_sealed_ms: u64,
}

/// 受信側の状態
struct RecvState {
    /// 最後に受け付けたパケット番号
    last_received: Option<u16>,
    /// 次の tick で ACK するパケット番号
    acks_due: Vec<u16>,
}

/// 受信パケットの判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// 次の番号のパケット（ペイロードをディスパッチすべき）
    New,
    /// ACK 要求なしの空パケット
    AckOnly,
    /// 受け付け済みの番号（ACK だけ返す）
    Duplicate,
    /// 欠番より先のパケット（破棄）
    Ahead,
}

/// 確立済みセッション
pub struct Connection {
    id: SessionId,
    send: SendState,
    recv: RecvState,
    config: EngineConfig,
}

impl Connection {
    /// リモート割り当て ID で新しいセッションを作る
    pub fn new(id: SessionId, now_ms: u64, config: &EngineConfig) -> Self {
        Connection {
            id,
            send: SendState {
                next_number: 1, // 1 始まり
                in_flight: VecDeque::new(),
                outgoing: VecDeque::new(),
                last_sealed_ms: now_ms,
            },
            recv: RecvState {
                last_received: None,
                acks_due: Vec::new(),
            },
            config: config.clone(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// メッセージを送信キューに積む
    ///
    /// 続けて積まれたメッセージは次の tick で同じパケットにまとめられる。
    pub fn push_message(&mut self, message: Message) {
        match self.send.outgoing.back_mut() {
            Some(Outgoing::Batch(batch)) => batch.push(message),
            _ => self.send.outgoing.push_back(Outgoing::Batch(vec![message])),
        }
    }

    /// 各メッセージをそれぞれ単独のパケットとして積む
    pub fn push_separately(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.send
            .outgoing
            .extend(messages.into_iter().map(Outgoing::Separate));
    }

    /// 受信パケットの ACK 処理と順序判定を行う
    ///
    /// ACK 要求付きパケットは `last_received + 1` だけを受け付ける。
    /// 欠番より先のパケットは ACK もディスパッチもせず、相手の再送を待つ。
    pub fn accept(&mut self, packet: &Packet) -> Receipt {
        if packet.carries_ack() {
            self.process_ack(packet.ack_number);
        }

        if !packet.wants_ack() {
            return if packet.payload.is_empty() {
                Receipt::AckOnly
            } else {
                Receipt::New
            };
        }

        let receipt = match self.recv.last_received {
            None => Receipt::New,
            Some(last) if packet.number == last.wrapping_add(1) => Receipt::New,
            Some(last) if !is_newer(packet.number, last) => Receipt::Duplicate,
            Some(last) => {
                tracing::trace!(
                    session = %self.id,
                    number = packet.number,
                    expected = last.wrapping_add(1),
                    "holding back packet ahead of a gap"
                );
                return Receipt::Ahead;
            }
        };

        // 重複でも ACK は返す（相手はこちらの ACK を失った可能性がある）
        if !self.recv.acks_due.contains(&packet.number) {
            self.recv.acks_due.push(packet.number);
        }
        if receipt == Receipt::New {
            self.recv.last_received = Some(packet.number);
        }
        receipt
    }

    /// 最も古い未 ACK パケットの経過時間（ミリ秒）
    pub fn oldest_unacked_age(&self, now_ms: u64) -> Option<u64> {
        self.send
            .in_flight
            .front()
            .map(|p| now_ms.saturating_sub(p.created_at_ms))
    }

    /// ハートビートが必要か（前回パケット作成から heartbeat_interval_ms 経過）
    pub fn needs_heartbeat(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.send.last_sealed_ms) >= self.config.heartbeat_interval_ms
    }

    /// この tick で送信すべきデータグラムを返す
    ///
    /// 1. 積まれたメッセージをパケット化する
    /// 2. 何も飛んでいなければハートビートを積む
    /// 3. ACK → 未送信パケット → 再送間隔を過ぎた未 ACK パケットの順に返す
    pub fn due_packets(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        self.seal(now_ms);

        if self.send.in_flight.is_empty() && self.needs_heartbeat(now_ms) {
            self.seal_payload(Vec::new(), now_ms);
        }

        let mut datagrams = Vec::new();

        for ack in self.recv.acks_due.drain(..) {
            match Packet::ack(self.id, ack).to_bytes() {
                Ok(bytes) => datagrams.push(bytes),
                Err(err) => tracing::error!(error = %err, "failed to encode ack"),
            }
        }

        let interval = self.config.retransmit_interval_ms;
        for pending in &mut self.send.in_flight {
            let due = match pending.last_sent_ms {
                None => true,
                Some(sent) => now_ms.saturating_sub(sent) >= interval,
            };
            if !due {
                continue;
            }
            if pending.last_sent_ms.is_some() {
                mark_retransmission(&mut pending.bytes);
            }
            pending.last_sent_ms = Some(now_ms);
            datagrams.push(pending.bytes.clone());
        }

        datagrams
    }

    /// セッション統計を返す
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            in_flight: self.send.in_flight.len(),
            queued: self.send.outgoing.len(),
            next_number: self.send.next_number,
            last_received: self.recv.last_received,
        }
    }

    // ===== Private メソッド =====

    /// 送信キューのメッセージをパケット化して ACK 待ちキューへ移す
    fn seal(&mut self, now_ms: u64) {
        let max_payload = self
            .config
            .max_packet_size
            .clamp(Packet::HEADER_LEN + 1, Packet::MAX_LEN)
            - Packet::HEADER_LEN;

        while let Some(group) = self.send.outgoing.pop_front() {
            match group {
                Outgoing::Batch(messages) => {
                    let mut payload = Vec::new();
                    for message in messages {
                        if !payload.is_empty() && payload.len() + message.encoded_len() > max_payload {
                            let full = std::mem::take(&mut payload);
                            self.seal_payload(full, now_ms);
                        }
                        message.encode_into(&mut payload);
                    }
                    if !payload.is_empty() {
                        self.seal_payload(payload, now_ms);
                    }
                }
                Outgoing::Separate(message) => {
                    let mut payload = Vec::with_capacity(message.encoded_len());
                    message.encode_into(&mut payload);
                    self.seal_payload(payload, now_ms);
                }
            }
        }
    }

    /// 番号を割り当ててエンコードし、ACK 待ちキューに追加する
    fn seal_payload(&mut self, payload: Vec<u8>, now_ms: u64) {
        let number = self.send.next_number;
        self.send.next_number = self.send.next_number.wrapping_add(1);
        self.send.last_sealed_ms = now_ms;

        match Packet::reliable(self.id, number, payload).to_bytes() {
            Ok(bytes) => self.send.in_flight.push_back(PendingPacket {
                number,
                bytes,
                created_at_ms: now_ms,
                last_sent_ms: None,
            }),
            Err(err) => tracing::error!(error = %err, number, "dropping unencodable packet"),
        }
    }

    /// ACK された番号までの ACK 待ちパケットを解放する
    fn process_ack(&mut self, ack_number: u16) {
        while let Some(front) = self.send.in_flight.front() {
            if is_newer(front.number, ack_number) {
                break;
            }
            self.send.in_flight.pop_front();
        }
    }
}

/// セッション統計情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// ACK 待ちパケット数
    pub in_flight: usize,
    /// パケット化待ちのメッセージグループ数
    pub queued: usize,
    /// 次のパケット番号
    pub next_number: u16,
    /// 最後に受け付けた相手のパケット番号
    pub last_received: Option<u16>,
}
