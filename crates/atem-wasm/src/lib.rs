//! # atem-wasm
//!
//! wasm-bindgen エクスポート：Node.js から呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { AtemClient, init_panic_hook } from './atem-wasm-pkg/atem_wasm';
//! import dgram from 'node:dgram';
//!
//! init_panic_hook();
//!
//! const client = new AtemClient();
//! const socket = dgram.createSocket('udp4');
//! socket.connect(9910, '192.168.10.240');
//!
//! client.onConnect((id) => console.log('connected', id));
//! client.when('InCm', () => client.uploadStill(0, image, image.length));
//!
//! socket.on('message', (msg) => client.recvUdpPacket(msg, performance.now()));
//! socket.on('error', (err) => client.channelFailed(String(err), performance.now()));
//!
//! // 定期タイマー（20ms ごと）
//! setInterval(() => {
//!     for (const pkt of client.tick(performance.now())) {
//!         socket.send(pkt, (err) => err && client.reportWriteFailure(String(err)));
//!     }
//! }, 20);
//! ```

use wasm_bindgen::prelude::*;

pub mod bridge;
pub mod client;

pub use bridge::{ClientCore, Event, InboundCommand};
pub use client::AtemClient;

/// パニック時にコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
