//! JS に依存しないクライアント本体
//!
//! `AtemClient` は JS 関数の呼び出しだけを担当し、それ以外はここで行う。
//! コントローラーのコールバックは `Send` でなければならないため、
//! ライフサイクルイベントはチャンネルに積み、呼び出し側が取り出して JS に渡す。

use std::sync::mpsc;

use atem_client::{ClientConfig, ClientError, Controller, Message, TransferId};
use atem_wire::{RawCommand, Tag};

/// JS に通知するライフサイクルイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(u16),
    Disconnected(u16),
    Error(String),
}

/// JS に渡す受信コマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCommand {
    /// 4 文字のコマンドタグ
    pub tag: String,
    /// ヘッダーを除いたコマンドボディ
    pub body: Vec<u8>,
}

impl InboundCommand {
    fn from_message(message: &Message) -> Self {
        InboundCommand {
            tag: String::from_utf8_lossy(message.tag().as_bytes()).into_owned(),
            body: message.encode_body(),
        }
    }
}

/// 4 文字の ASCII タグを解釈する
pub fn parse_tag(tag: &str) -> Option<Tag> {
    let bytes: [u8; 4] = tag.as_bytes().try_into().ok()?;
    Some(Tag::new(&bytes))
}

pub struct ClientCore {
    controller: Controller,
    events: mpsc::Receiver<Event>,
}

impl ClientCore {
    pub fn new(mut controller: Controller) -> Self {
        let (tx, events) = mpsc::channel();

        let connected = tx.clone();
        controller.on_connect(move |id| {
            let _ = connected.send(Event::Connected(id.raw()));
        });
        let disconnected = tx.clone();
        controller.on_disconnect(move |id| {
            let _ = disconnected.send(Event::Disconnected(id.raw()));
        });
        controller.on_error(move |err| {
            tracing::debug!(error = %err, "forwarding controller error");
            let _ = tx.send(Event::Error(err.to_string()));
        });

        ClientCore { controller, events }
    }

    /// JSON 設定（省略時はデフォルト）から生成する
    pub fn from_json(config_json: Option<&str>) -> Result<Self, ClientError> {
        let config = match config_json {
            Some(json) => ClientConfig::from_json(json)?,
            None => ClientConfig::default(),
        };
        Ok(Self::new(Controller::new(config)))
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// 受信データグラムを処理し、ディスパッチしたコマンドを返す
    pub fn recv(&mut self, bytes: &[u8], now_ms: u64) -> Vec<InboundCommand> {
        self.controller
            .handle_datagram(bytes, now_ms)
            .iter()
            .map(InboundCommand::from_message)
            .collect()
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<Vec<u8>> {
        self.controller.tick(now_ms)
    }

    /// タグとボディからコマンドを送る。既知のタグは型付きメッセージとして送られる
    pub fn send_command(&mut self, tag: Tag, body: Vec<u8>) {
        let raw = RawCommand::new(tag, body);
        match Message::decode(raw.clone()) {
            Ok(message) => self.controller.send(message),
            // 既知タグでボディが短いものはそのまま送る
            Err(_) => self.controller.send(raw),
        }
    }

    pub fn upload_still(&mut self, slot: u32, data: Vec<u8>, uncompressed_size: u32) -> TransferId {
        self.controller.upload_still(slot, data, uncompressed_size)
    }

    pub fn upload_label(
        &mut self,
        source: u16,
        image: Vec<u8>,
        long_name: Option<&str>,
        short_name: Option<&str>,
    ) -> TransferId {
        self.controller
            .upload_label(source, image, long_name, short_name)
    }

    /// 溜まっているイベントを取り出す
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.try_iter().collect()
    }

    /// 統計を JSON 文字列で返す
    pub fn stats_json(&self) -> String {
        match serde_json::to_string(&self.controller.stats()) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize stats");
                "{}".to_string()
            }
        }
    }
}
