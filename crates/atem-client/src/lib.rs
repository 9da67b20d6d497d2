//! # atem-client
//!
//! セッション・ディスパッチ・転送を 1 つにまとめたコントローラー。
//!
//! I/O は持たない。トランスポート（`atem-net` の tokio ソケット、
//! `atem-wasm` の Node.js ソケット）が受信データグラムと現在時刻を渡し、
//! `tick` の戻り値を送信する。
//!
//! ```text
//! datagram → SessionEngine → TransferOrchestrator（転送の反応）
//!                          → Dispatcher（when で登録したハンドラ）
//! send / upload_* → SessionEngine の送信キュー → tick → datagram
//! ```

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;

pub use config::ClientConfig;
pub use controller::{Controller, ControllerStats};
pub use dispatch::{DispatchContext, Dispatcher, HandlerError, HandlerResult};
pub use error::ClientError;

pub use atem_session::SessionState;
pub use atem_transfer::{TransferId, TransferMode, TransferSummary, LABEL_STORE, STILL_STORE};
pub use atem_wire::{Command, Message, MessageKind, SessionId};
