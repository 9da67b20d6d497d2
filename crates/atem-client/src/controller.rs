//! コントローラー本体
//!
//! セッション状態機械・ディスパッチレジストリ・転送オーケストレーターを所有し、
//! ライフサイクルコールバックを呼び出す。すべての状態はこの構造体にあり、
//! 単一の実行コンテキストから操作される。

use std::io;

use atem_session::{SessionEngine, SessionState, TickOutcome};
use atem_transfer::{Action, TransferId, TransferOrchestrator, TransferRequest};
use atem_wire::{Command, InputProperties, Message, SessionId};
use serde::Serialize;

use crate::config::ClientConfig;
use crate::dispatch::{DispatchContext, Dispatcher, HandlerResult};
use crate::error::ClientError;

type SessionCallback = Box<dyn FnMut(SessionId) + Send>;
type ErrorCallback = Box<dyn FnMut(&ClientError) + Send>;

/// 統計カウンタ
#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    datagrams_in: u64,
    datagrams_out: u64,
    connects: u64,
    disconnects: u64,
    errors: u64,
    transfers_completed: u64,
    transfers_failed: u64,
}

/// コントローラーの統計情報（JSON で外部に出す）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    pub state: String,
    pub session_id: Option<u16>,
    /// ACK 待ちパケット数
    pub in_flight: usize,
    /// キューに残っている転送数
    pub pending_transfers: usize,
    pub datagrams_in: u64,
    pub datagrams_out: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub errors: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
}

/// スイッチャー制御コントローラー（Sans-IO）
///
/// ## 使い方
///
/// 1. `handle_datagram` に受信データグラムを渡す
/// 2. `tick` を `tick_interval_ms` ごとに呼び、戻り値を順に送信する
/// 3. 送信に失敗したら `report_write_failure`、ソケットが壊れたら `channel_failed`
pub struct Controller {
    config: ClientConfig,
    engine: SessionEngine,
    dispatcher: Dispatcher,
    transfers: TransferOrchestrator,
    on_connect: SessionCallback,
    on_disconnect: SessionCallback,
    on_error: ErrorCallback,
    counters: Counters,
}

impl Controller {
    pub fn new(config: ClientConfig) -> Self {
        let engine = SessionEngine::new(config.engine_config());
        Self::with_engine(config, engine)
    }

    /// ハンドシェイク ID の生成元を指定して生成する（テスト用）
    pub fn with_id_source(config: ClientConfig, ids: impl FnMut() -> u16 + Send + 'static) -> Self {
        let engine = SessionEngine::with_id_source(config.engine_config(), ids);
        Self::with_engine(config, engine)
    }

    fn with_engine(config: ClientConfig, engine: SessionEngine) -> Self {
        Controller {
            config,
            engine,
            dispatcher: Dispatcher::new(),
            transfers: TransferOrchestrator::new(),
            on_connect: Box::new(|_| {}),
            on_disconnect: Box::new(|_| {}),
            on_error: Box::new(|err| tracing::error!(error = %err, "controller error")),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ===== コールバック登録 =====

    /// `C` 型のメッセージを受信したときのハンドラを登録する
    pub fn when<C, F>(&mut self, handler: F)
    where
        C: Command,
        F: FnMut(&C, &mut DispatchContext) -> HandlerResult + Send + 'static,
    {
        self.dispatcher.when::<C, F>(handler);
    }

    /// セッション確立時のコールバック
    pub fn on_connect(&mut self, callback: impl FnMut(SessionId) + Send + 'static) {
        self.on_connect = Box::new(callback);
    }

    /// セッション喪失時のコールバック（引数は失われたセッションの ID）
    pub fn on_disconnect(&mut self, callback: impl FnMut(SessionId) + Send + 'static) {
        self.on_disconnect = Box::new(callback);
    }

    /// エラーコールバック。デフォルトは `tracing::error!` で記録して継続する
    pub fn on_error(&mut self, callback: impl FnMut(&ClientError) + Send + 'static) {
        self.on_error = Box::new(callback);
    }

    // ===== 送信 =====

    /// メッセージを送信キューに積む
    ///
    /// セッションがなければ `ClientError::NotConnected` をエラーコールバックに渡す。
    pub fn send(&mut self, message: impl Into<Message>) {
        if let Err(err) = self.engine.send(message.into()) {
            self.report(err.into());
        }
    }

    /// 各メッセージを単独のパケットとして積む
    pub fn send_separately(&mut self, messages: Vec<Message>) {
        if let Err(err) = self.engine.send_separately(messages) {
            self.report(err.into());
        }
    }

    /// 静止画ストアの `slot` に画像をアップロードする
    pub fn upload_still(&mut self, slot: u32, data: Vec<u8>, uncompressed_size: u32) -> TransferId {
        self.enqueue(TransferRequest::still(slot, data, uncompressed_size))
    }

    /// 入力 `source` のラベル画像をアップロードする
    ///
    /// 名前が指定されていれば先に入力名の変更を送る。
    pub fn upload_label(
        &mut self,
        source: u16,
        image: Vec<u8>,
        long_name: Option<&str>,
        short_name: Option<&str>,
    ) -> TransferId {
        if long_name.is_some() || short_name.is_some() {
            self.send(InputProperties {
                source,
                long_name: long_name.map(str::to_owned),
                short_name: short_name.map(str::to_owned),
            });
        }
        self.enqueue(TransferRequest::label(source, image))
    }

    // ===== トランスポートからの入力 =====

    /// 受信データグラムを処理する
    ///
    /// # 戻り値
    /// ディスパッチしたメッセージ（受信順）
    pub fn handle_datagram(&mut self, bytes: &[u8], now_ms: u64) -> Vec<Message> {
        self.counters.datagrams_in += 1;

        let inbound = match self.engine.handle_datagram(bytes, now_ms) {
            Ok(inbound) => inbound,
            Err(err) => {
                self.report(err.into());
                return Vec::new();
            }
        };

        if let Some(replaced) = inbound.replaced {
            self.session_lost(replaced);
        }
        if let Some(id) = inbound.established {
            self.counters.connects += 1;
            let actions = self.transfers.session_established();
            self.apply(actions);
            (self.on_connect)(id);
        }

        for err in inbound.errors {
            self.report(ClientError::Decode(err));
        }

        for message in &inbound.messages {
            self.route(message);
        }
        inbound.messages
    }

    /// 周期処理。戻り値のデータグラムを順に送信すること
    pub fn tick(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        match self.engine.tick(now_ms) {
            TickOutcome::Transmit(datagrams) => {
                self.counters.datagrams_out += datagrams.len() as u64;
                datagrams
            }
            TickOutcome::Disconnected { previous } => {
                self.session_lost(previous);
                Vec::new()
            }
        }
    }

    /// データグラムの送信失敗を報告する（tick は継続してよい）
    pub fn report_write_failure(&mut self, err: io::Error) {
        self.report(ClientError::Write(err));
    }

    /// ソケットが使えなくなったことを報告する
    ///
    /// 確立済みセッションは失われたものとして扱い、ハンドシェイクからやり直す。
    pub fn channel_failed(&mut self, err: io::Error, now_ms: u64) {
        self.report(ClientError::Channel(err));
        if let Some(previous) = self.engine.reset(now_ms) {
            self.session_lost(previous);
        }
    }

    // ===== 状態 =====

    pub fn is_connected(&self) -> bool {
        self.engine.state() == SessionState::Established
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.engine.session_id()
    }

    pub fn pending_transfers(&self) -> usize {
        self.transfers.pending()
    }

    pub fn stats(&self) -> ControllerStats {
        let c = self.counters;
        ControllerStats {
            state: self.engine.state().to_string(),
            session_id: self.engine.session_id().map(SessionId::raw),
            in_flight: self.engine.connection_stats().map_or(0, |s| s.in_flight),
            pending_transfers: self.transfers.pending(),
            datagrams_in: c.datagrams_in,
            datagrams_out: c.datagrams_out,
            connects: c.connects,
            disconnects: c.disconnects,
            errors: c.errors,
            transfers_completed: c.transfers_completed,
            transfers_failed: c.transfers_failed,
        }
    }

    // ===== Private メソッド =====

    fn enqueue(&mut self, request: TransferRequest) -> TransferId {
        let (id, actions) = self.transfers.enqueue(request);
        self.apply(actions);
        id
    }

    /// 転送層の反応を先に処理し、その後ハンドラに渡す
    fn route(&mut self, message: &Message) {
        let actions = match message {
            Message::LockObtained(m) => self.transfers.lock_obtained(m.store),
            Message::LockStateChanged(m) => self.transfers.lock_state_changed(m.store, m.locked),
            Message::TransferChunkRequest(m) => self.transfers.chunks_requested(m),
            Message::TransferCompleted(m) => self.transfers.transfer_finished(m.transfer_id),
            Message::TransferError(m) => self.transfers.transfer_failed(m),
            _ => Vec::new(),
        };
        self.apply(actions);

        let mut ctx = DispatchContext::new();
        let failures = self.dispatcher.dispatch(message, &mut ctx);
        for source in failures {
            self.report(ClientError::Handler {
                kind: message.kind(),
                source,
            });
        }
        for reply in ctx.take_outgoing() {
            self.send(reply);
        }
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(message) => self.send(message),
                Action::SendSeparately(messages) => self.send_separately(messages),
                Action::Completed(summary) => {
                    self.counters.transfers_completed += 1;
                    tracing::info!(
                        transfer = summary.id,
                        store = summary.store,
                        index = summary.index,
                        bytes = summary.len,
                        "upload finished"
                    );
                }
                Action::Failed { summary, code } => {
                    self.counters.transfers_failed += 1;
                    self.report(ClientError::Transfer { id: summary.id, code });
                }
            }
        }
    }

    fn session_lost(&mut self, previous: SessionId) {
        self.counters.disconnects += 1;
        (self.on_disconnect)(previous);
        self.transfers.session_lost();
    }

    fn report(&mut self, err: ClientError) {
        self.counters.errors += 1;
        (self.on_error)(&err);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.engine.state())
            .field("session_id", &self.engine.session_id())
            .field("dispatcher", &self.dispatcher)
            .field("transfers", &self.transfers)
            .finish_non_exhaustive()
    }
}
