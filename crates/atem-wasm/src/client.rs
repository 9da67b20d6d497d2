//! AtemClient wasm-bindgen エクスポート
//!
//! Node.js 側が UDP ソケットとタイマーを持ち、受信データグラムを
//! `recvUdpPacket` に渡し、`tick` の戻り値を送信する。

use js_sys::{Function, Uint8Array};
use wasm_bindgen::prelude::*;

use crate::bridge::{parse_tag, ClientCore, Event};

/// スイッチャー制御クライアント
///
/// ## 内部アーキテクチャ
///
/// ```text
/// AtemClient
///   ├── ClientCore   (JS 非依存、ネイティブでテスト可能)
///   │     └── Controller (atem-client)
///   │           ├── SessionEngine       (atem-session)
///   │           ├── Dispatcher
///   │           └── TransferOrchestrator (atem-transfer)
///   └── JS コールバック（when / onConnect / onDisconnect / onError）
/// ```
///
/// WASM はシングルスレッドのため、JS からは単一スレッドで呼び出される前提。
#[wasm_bindgen]
pub struct AtemClient {
    core: ClientCore,
    listeners: Vec<(String, Function)>,
    on_connect: Option<Function>,
    on_disconnect: Option<Function>,
    on_error: Option<Function>,
}

#[wasm_bindgen]
impl AtemClient {
    /// クライアントを初期化する
    ///
    /// # 引数
    /// - `config_json`: `ClientConfig` の JSON。省略したフィールドはデフォルト値
    ///
    /// # 例（TypeScript）
    /// ```typescript
    /// const client = new AtemClient();
    /// const fast = new AtemClient('{"tick_interval_ms": 10}');
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<AtemClient, JsError> {
        let core = ClientCore::from_json(config_json.as_deref())
            .map_err(|e| JsError::new(&format!("Invalid config: {}", e)))?;
        Ok(AtemClient {
            core,
            listeners: Vec::new(),
            on_connect: None,
            on_disconnect: None,
            on_error: None,
        })
    }

    /// 受信した UDP ペイロードを処理する
    ///
    /// 受信したコマンドは `when` で登録した関数に `(tag, body)` で渡される。
    ///
    /// # 引数
    /// - `udp_bytes`: `socket.on('message', msg)` の `msg`
    /// - `now_ms`: 現在時刻（`performance.now()` など単調増加する値）
    #[wasm_bindgen(js_name = "recvUdpPacket")]
    pub fn recv_udp_packet(&mut self, udp_bytes: &[u8], now_ms: f64) {
        let commands = self.core.recv(udp_bytes, now_ms as u64);
        self.flush_events();

        for command in commands {
            let tag = JsValue::from_str(&command.tag);
            let body = Uint8Array::from(command.body.as_slice());
            let failures: Vec<JsValue> = self
                .listeners
                .iter()
                .filter(|(listen, _)| *listen == command.tag)
                .filter_map(|(_, f)| f.call2(&JsValue::NULL, &tag, &body).err())
                .collect();
            for failure in failures {
                let text = failure
                    .as_string()
                    .unwrap_or_else(|| format!("handler for {} threw", command.tag));
                self.emit(Event::Error(text));
            }
        }
    }

    /// 定期タイマー tick（`tick_interval_ms` ごとに呼び出す）
    ///
    /// # 戻り値
    /// 送信すべき UDP ペイロードの配列。順に `socket.send()` すること
    #[wasm_bindgen]
    pub fn tick(&mut self, now_ms: f64) -> js_sys::Array {
        let datagrams = self.core.tick(now_ms as u64);
        self.flush_events();

        let result = js_sys::Array::new();
        for datagram in datagrams {
            result.push(&Uint8Array::from(datagram.as_slice()));
        }
        result
    }

    /// `tag` のコマンドを受信したときに呼ばれる関数を登録する
    #[wasm_bindgen]
    pub fn when(&mut self, tag: String, callback: Function) {
        self.listeners.push((tag, callback));
    }

    /// コマンドを送信キューに積む
    ///
    /// # エラー
    /// - タグが 4 バイトでない
    #[wasm_bindgen(js_name = "sendCommand")]
    pub fn send_command(&mut self, tag: &str, body: &[u8]) -> Result<(), JsError> {
        let tag = parse_tag(tag)
            .ok_or_else(|| JsError::new(&format!("Invalid command tag: {:?}", tag)))?;
        self.core.send_command(tag, body.to_vec());
        self.flush_events();
        Ok(())
    }

    /// 静止画をアップロードする。戻り値は転送 ID
    #[wasm_bindgen(js_name = "uploadStill")]
    pub fn upload_still(&mut self, slot: u32, data: Vec<u8>, uncompressed_size: u32) -> u16 {
        let id = self.core.upload_still(slot, data, uncompressed_size);
        self.flush_events();
        id
    }

    /// 入力ラベル画像をアップロードする。名前を指定すると入力名も変更する
    #[wasm_bindgen(js_name = "uploadLabel")]
    pub fn upload_label(
        &mut self,
        source: u16,
        image: Vec<u8>,
        long_name: Option<String>,
        short_name: Option<String>,
    ) -> u16 {
        let id = self.core.upload_label(
            source,
            image,
            long_name.as_deref(),
            short_name.as_deref(),
        );
        self.flush_events();
        id
    }

    #[wasm_bindgen(js_name = "isConnected")]
    pub fn is_connected(&self) -> bool {
        self.core.controller().is_connected()
    }

    /// 統計情報を JSON 文字列で返す
    ///
    /// ```json
    /// {"state":"established","session_id":32769,"in_flight":0,"pending_transfers":0, ...}
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> String {
        self.core.stats_json()
    }

    /// `socket.send()` が失敗したことを報告する
    #[wasm_bindgen(js_name = "reportWriteFailure")]
    pub fn report_write_failure(&mut self, message: String) {
        self.core
            .controller_mut()
            .report_write_failure(std::io::Error::new(std::io::ErrorKind::Other, message));
        self.flush_events();
    }

    /// ソケットが閉じた・エラーになったことを報告する（セッションはやり直しになる）
    #[wasm_bindgen(js_name = "channelFailed")]
    pub fn channel_failed(&mut self, message: String, now_ms: f64) {
        self.core.controller_mut().channel_failed(
            std::io::Error::new(std::io::ErrorKind::Other, message),
            now_ms as u64,
        );
        self.flush_events();
    }

    /// セッション確立時に `(sessionId)` で呼ばれる関数
    #[wasm_bindgen(js_name = "onConnect")]
    pub fn on_connect(&mut self, callback: Function) {
        self.on_connect = Some(callback);
    }

    /// セッション喪失時に `(sessionId)` で呼ばれる関数
    #[wasm_bindgen(js_name = "onDisconnect")]
    pub fn on_disconnect(&mut self, callback: Function) {
        self.on_disconnect = Some(callback);
    }

    /// エラー時に `(message)` で呼ばれる関数。未登録ならコンソールに出さず破棄する
    #[wasm_bindgen(js_name = "onError")]
    pub fn on_error(&mut self, callback: Function) {
        self.on_error = Some(callback);
    }
}

impl AtemClient {
    fn flush_events(&mut self) {
        for event in self.core.take_events() {
            self.emit(event);
        }
    }

    fn emit(&self, event: Event) {
        let (callback, arg) = match event {
            Event::Connected(id) => (&self.on_connect, JsValue::from(id)),
            Event::Disconnected(id) => (&self.on_disconnect, JsValue::from(id)),
            Event::Error(message) => (&self.on_error, JsValue::from_str(&message)),
        };
        if let Some(f) = callback {
            // コールバック内の例外はここで握りつぶす（再入を避ける）
            let _ = f.call1(&JsValue::NULL, &arg);
        }
    }
}
