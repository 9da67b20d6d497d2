//! atem-client エラー型

use std::io;

use atem_session::SessionError;
use atem_wire::{MessageKind, Tag, WireError};
use thiserror::Error;

use crate::dispatch::HandlerError;

/// エラーコールバックに渡されるエラー
///
/// どれもコントローラーを止めない。セッション喪失はエラーではなく
/// 切断コールバックで通知される。
#[derive(Debug, Error)]
pub enum ClientError {
    /// 受信データが不正（セッションは維持）
    #[error("malformed inbound data: {0}")]
    Decode(#[from] WireError),

    /// トランスポートがパケットを送れなかった（tick は継続）
    #[error("failed to write packet: {0}")]
    Write(#[source] io::Error),

    /// ソケットそのものが使えなくなった（再接続する）
    #[error("transport channel failed: {0}")]
    Channel(#[source] io::Error),

    /// セッションもトランスポートもない状態での送信
    #[error("not connected")]
    NotConnected,

    /// 1 パケットに収まらないメッセージ
    #[error("message {tag} of {len} bytes does not fit in a packet")]
    MessageTooLarge { tag: Tag, len: usize },

    /// ディスパッチハンドラが失敗した（後続のハンドラは実行される）
    #[error("handler for {kind:?} failed: {source}")]
    Handler {
        kind: MessageKind,
        #[source]
        source: HandlerError,
    },

    /// スイッチャーが転送を拒否した
    #[error("transfer {id} rejected by switcher (code {code})")]
    Transfer { id: u16, code: u8 },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotEstablished => ClientError::NotConnected,
            SessionError::MessageTooLarge { tag, len } => ClientError::MessageTooLarge { tag, len },
            SessionError::Wire(err) => ClientError::Decode(err),
        }
    }
}
