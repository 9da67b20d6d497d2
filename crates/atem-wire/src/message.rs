//! 型付きメッセージ
//!
//! セッション層・転送層が解釈する必要のあるコマンドだけを型付きで表現する。
//! それ以外のコマンドは `Message::Raw` としてそのまま運ぶ。
//!
//! | タグ   | 方向            | 型                      |
//! |--------|-----------------|-------------------------|
//! | `_ver` | スイッチャー → | `ProtocolVersion`       |
//! | `InCm` | スイッチャー → | `InitiationComplete`    |
//! | `LOCK` | → スイッチャー | `LockRequest`           |
//! | `LKOB` | スイッチャー → | `LockObtained`          |
//! | `LKST` | スイッチャー → | `LockStateChanged`      |
//! | `FTSD` | → スイッチャー | `StartDataTransfer`     |
//! | `FTCD` | スイッチャー → | `TransferChunkRequest`  |
//! | `FTDa` | → スイッチャー | `TransferData`          |
//! | `FTDC` | スイッチャー → | `TransferCompleted`     |
//! | `FTDE` | スイッチャー → | `TransferError`         |
//! | `CInL` | → スイッチャー | `InputProperties`       |

use alloc::string::String;
use alloc::vec::Vec;

use crate::command::{encode_block, RawCommand, Tag};
use crate::error::WireError;

/// メッセージの種類（ディスパッチのキー）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    ProtocolVersion,
    InitiationComplete,
    LockRequest,
    LockObtained,
    LockStateChanged,
    StartDataTransfer,
    TransferChunkRequest,
    TransferData,
    TransferCompleted,
    TransferError,
    InputProperties,
    Raw,
}

/// プロトコルバージョン通知（接続直後の初期状態の先頭）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

/// 初期状態の送信完了通知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitiationComplete;

/// ストアのロック取得/解放要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub store: u16,
    /// true = ロック取得, false = 解放
    pub lock: bool,
}

/// ストアのロック取得完了通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockObtained {
    pub store: u16,
}

/// ストアのロック状態変化通知（他クライアントの操作も含む）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStateChanged {
    pub store: u16,
    pub locked: bool,
}

/// データ転送開始要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDataTransfer {
    pub transfer_id: u16,
    pub store: u16,
    /// スロット番号（静止画）またはソース ID（ラベル）
    pub index: u32,
    /// 展開後のデータサイズ
    pub size: u32,
    /// 転送モードコード
    pub mode: u16,
}

/// スイッチャーからのチャンク要求（サイズと個数はスイッチャーが決める）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferChunkRequest {
    pub transfer_id: u16,
    pub chunk_size: u16,
    pub chunk_count: u16,
}

/// 転送データのチャンク
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferData {
    pub transfer_id: u16,
    pub data: Vec<u8>,
}

/// 転送完了通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCompleted {
    pub transfer_id: u16,
}

/// 転送エラー通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferError {
    pub transfer_id: u16,
    pub code: u8,
}

/// 入力ソースの名前変更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputProperties {
    pub source: u16,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
}

impl InputProperties {
    /// 長い名前の最大バイト数
    pub const LONG_NAME_LEN: usize = 20;
    /// 短い名前の最大バイト数
    pub const SHORT_NAME_LEN: usize = 4;
}

/// 型付きメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ProtocolVersion(ProtocolVersion),
    InitiationComplete(InitiationComplete),
    LockRequest(LockRequest),
    LockObtained(LockObtained),
    LockStateChanged(LockStateChanged),
    StartDataTransfer(StartDataTransfer),
    TransferChunkRequest(TransferChunkRequest),
    TransferData(TransferData),
    TransferCompleted(TransferCompleted),
    TransferError(TransferError),
    InputProperties(InputProperties),
    Raw(RawCommand),
}

mod tags {
    use crate::command::Tag;

    pub const VERSION: Tag = Tag::new(b"_ver");
    pub const INIT_COMPLETE: Tag = Tag::new(b"InCm");
    pub const LOCK: Tag = Tag::new(b"LOCK");
    pub const LOCK_OBTAINED: Tag = Tag::new(b"LKOB");
    pub const LOCK_STATE: Tag = Tag::new(b"LKST");
    pub const START_TRANSFER: Tag = Tag::new(b"FTSD");
    pub const CHUNK_REQUEST: Tag = Tag::new(b"FTCD");
    pub const DATA: Tag = Tag::new(b"FTDa");
    pub const COMPLETED: Tag = Tag::new(b"FTDC");
    pub const ERROR: Tag = Tag::new(b"FTDE");
    pub const INPUT_PROPERTIES: Tag = Tag::new(b"CInL");
}

fn u16_at(body: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([body[at], body[at + 1]])
}

fn u32_at(body: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]])
}

fn require(tag: Tag, body: &[u8], len: usize) -> Result<(), WireError> {
    if body.len() < len {
        return Err(WireError::CommandTooShort {
            tag,
            len: body.len(),
        });
    }
    Ok(())
}

/// 固定長フィールドに名前を書き込む（はみ出した分は切り捨て、残りはゼロ埋め）
fn put_name(out: &mut Vec<u8>, name: Option<&str>, width: usize) {
    let bytes = name.map(str::as_bytes).unwrap_or(&[]);
    let mut end = bytes.len().min(width);
    // UTF-8 の文字境界で切る
    while end > 0 && name.is_some_and(|n| !n.is_char_boundary(end)) {
        end -= 1;
    }
    out.extend_from_slice(&bytes[..end]);
    out.resize(out.len() + (width - end), 0);
}

fn take_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl Message {
    /// メッセージの種類
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ProtocolVersion(_) => MessageKind::ProtocolVersion,
            Message::InitiationComplete(_) => MessageKind::InitiationComplete,
            Message::LockRequest(_) => MessageKind::LockRequest,
            Message::LockObtained(_) => MessageKind::LockObtained,
            Message::LockStateChanged(_) => MessageKind::LockStateChanged,
            Message::StartDataTransfer(_) => MessageKind::StartDataTransfer,
            Message::TransferChunkRequest(_) => MessageKind::TransferChunkRequest,
            Message::TransferData(_) => MessageKind::TransferData,
            Message::TransferCompleted(_) => MessageKind::TransferCompleted,
            Message::TransferError(_) => MessageKind::TransferError,
            Message::InputProperties(_) => MessageKind::InputProperties,
            Message::Raw(_) => MessageKind::Raw,
        }
    }

    /// Wire 上のコマンドタグ
    pub fn tag(&self) -> Tag {
        match self {
            Message::ProtocolVersion(_) => tags::VERSION,
            Message::InitiationComplete(_) => tags::INIT_COMPLETE,
            Message::LockRequest(_) => tags::LOCK,
            Message::LockObtained(_) => tags::LOCK_OBTAINED,
            Message::LockStateChanged(_) => tags::LOCK_STATE,
            Message::StartDataTransfer(_) => tags::START_TRANSFER,
            Message::TransferChunkRequest(_) => tags::CHUNK_REQUEST,
            Message::TransferData(_) => tags::DATA,
            Message::TransferCompleted(_) => tags::COMPLETED,
            Message::TransferError(_) => tags::ERROR,
            Message::InputProperties(_) => tags::INPUT_PROPERTIES,
            Message::Raw(raw) => raw.tag,
        }
    }

    /// コマンドボディをエンコードする（ヘッダーは含まない）
    pub fn encode_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            Message::ProtocolVersion(m) => {
                body.extend_from_slice(&m.major.to_be_bytes());
                body.extend_from_slice(&m.minor.to_be_bytes());
            }
            Message::InitiationComplete(_) => body.extend_from_slice(&[0; 4]),
            Message::LockRequest(m) => {
                body.extend_from_slice(&m.store.to_be_bytes());
                body.push(m.lock as u8);
                body.push(0);
            }
            Message::LockObtained(m) => {
                body.extend_from_slice(&m.store.to_be_bytes());
                body.extend_from_slice(&[0, 0]);
            }
            Message::LockStateChanged(m) => {
                body.extend_from_slice(&m.store.to_be_bytes());
                body.push(m.locked as u8);
                body.push(0);
            }
            Message::StartDataTransfer(m) => {
                body.extend_from_slice(&m.transfer_id.to_be_bytes());
                body.extend_from_slice(&m.store.to_be_bytes());
                body.extend_from_slice(&m.index.to_be_bytes());
                body.extend_from_slice(&m.size.to_be_bytes());
                body.extend_from_slice(&m.mode.to_be_bytes());
                body.extend_from_slice(&[0, 0]);
            }
            Message::TransferChunkRequest(m) => {
                body.extend_from_slice(&m.transfer_id.to_be_bytes());
                body.extend_from_slice(&m.chunk_size.to_be_bytes());
                body.extend_from_slice(&m.chunk_count.to_be_bytes());
                body.extend_from_slice(&[0, 0]);
            }
            Message::TransferData(m) => {
                body.extend_from_slice(&m.transfer_id.to_be_bytes());
                body.extend_from_slice(&(m.data.len() as u16).to_be_bytes());
                body.extend_from_slice(&m.data);
            }
            Message::TransferCompleted(m) => {
                body.extend_from_slice(&m.transfer_id.to_be_bytes());
                body.extend_from_slice(&[0, 0]);
            }
            Message::TransferError(m) => {
                body.extend_from_slice(&m.transfer_id.to_be_bytes());
                body.push(m.code);
                body.push(0);
            }
            Message::InputProperties(m) => {
                let mut mask = 0u8;
                if m.long_name.is_some() {
                    mask |= 0x01;
                }
                if m.short_name.is_some() {
                    mask |= 0x02;
                }
                body.push(mask);
                body.push(0);
                body.extend_from_slice(&m.source.to_be_bytes());
                put_name(&mut body, m.long_name.as_deref(), InputProperties::LONG_NAME_LEN);
                put_name(&mut body, m.short_name.as_deref(), InputProperties::SHORT_NAME_LEN);
            }
            Message::Raw(raw) => body.extend_from_slice(&raw.body),
        }
        body
    }

    /// ヘッダー込みのエンコード長
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::Raw(raw) => raw.encoded_len(),
            Message::TransferData(m) => RawCommand::HEADER_LEN + 4 + m.data.len(),
            other => RawCommand::HEADER_LEN + other.encode_body().len(),
        }
    }

    /// `out` の末尾にコマンドブロックとして書き込む
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        encode_block(self.tag(), &self.encode_body(), out);
    }

    /// コマンドブロックを型付きメッセージに変換する
    ///
    /// 未知のタグは `Message::Raw` になる。
    ///
    /// # エラー
    /// - `WireError::CommandTooShort`: 既知タグのボディが短すぎる
    pub fn decode(raw: RawCommand) -> Result<Self, WireError> {
        let tag = raw.tag;
        let body = raw.body.as_slice();

        let message = match tag {
            tags::VERSION => {
                require(tag, body, 4)?;
                Message::ProtocolVersion(ProtocolVersion {
                    major: u16_at(body, 0),
                    minor: u16_at(body, 2),
                })
            }
            tags::INIT_COMPLETE => Message::InitiationComplete(InitiationComplete),
            tags::LOCK => {
                require(tag, body, 3)?;
                Message::LockRequest(LockRequest {
                    store: u16_at(body, 0),
                    lock: body[2] != 0,
                })
            }
            tags::LOCK_OBTAINED => {
                require(tag, body, 2)?;
                Message::LockObtained(LockObtained {
                    store: u16_at(body, 0),
                })
            }
            tags::LOCK_STATE => {
                require(tag, body, 3)?;
                Message::LockStateChanged(LockStateChanged {
                    store: u16_at(body, 0),
                    locked: body[2] != 0,
                })
            }
            tags::START_TRANSFER => {
                require(tag, body, 14)?;
                Message::StartDataTransfer(StartDataTransfer {
                    transfer_id: u16_at(body, 0),
                    store: u16_at(body, 2),
                    index: u32_at(body, 4),
                    size: u32_at(body, 8),
                    mode: u16_at(body, 12),
                })
            }
            tags::CHUNK_REQUEST => {
                require(tag, body, 6)?;
                Message::TransferChunkRequest(TransferChunkRequest {
                    transfer_id: u16_at(body, 0),
                    chunk_size: u16_at(body, 2),
                    chunk_count: u16_at(body, 4),
                })
            }
            tags::DATA => {
                require(tag, body, 4)?;
                let len = u16_at(body, 2) as usize;
                require(tag, body, 4 + len)?;
                Message::TransferData(TransferData {
                    transfer_id: u16_at(body, 0),
                    data: body[4..4 + len].to_vec(),
                })
            }
            tags::COMPLETED => {
                require(tag, body, 2)?;
                Message::TransferCompleted(TransferCompleted {
                    transfer_id: u16_at(body, 0),
                })
            }
            tags::ERROR => {
                require(tag, body, 3)?;
                Message::TransferError(TransferError {
                    transfer_id: u16_at(body, 0),
                    code: body[2],
                })
            }
            tags::INPUT_PROPERTIES => {
                let long_end = 4 + InputProperties::LONG_NAME_LEN;
                let short_end = long_end + InputProperties::SHORT_NAME_LEN;
                require(tag, body, short_end)?;
                let mask = body[0];
                Message::InputProperties(InputProperties {
                    source: u16_at(body, 2),
                    long_name: (mask & 0x01 != 0).then(|| take_name(&body[4..long_end])),
                    short_name: (mask & 0x02 != 0).then(|| take_name(&body[long_end..short_end])),
                })
            }
            _ => Message::Raw(raw),
        };

        Ok(message)
    }
}

/// `Message` の 1 バリアントに対応する型付きコマンド
///
/// ディスパッチ登録（`when::<C>`）の型パラメータとして使う。
pub trait Command: Sized + 'static {
    /// 対応するメッセージの種類
    const KIND: MessageKind;

    /// メッセージがこの型のバリアントなら中身を返す
    fn from_message(message: &Message) -> Option<&Self>;
}

macro_rules! impl_command {
    ($($variant:ident),* $(,)?) => {
        $(
            impl Command for $variant {
                const KIND: MessageKind = MessageKind::$variant;

                fn from_message(message: &Message) -> Option<&Self> {
                    match message {
                        Message::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl From<$variant> for Message {
                fn from(inner: $variant) -> Self {
                    Message::$variant(inner)
                }
            }
        )*
    };
}

impl_command!(
    ProtocolVersion,
    InitiationComplete,
    LockRequest,
    LockObtained,
    LockStateChanged,
    StartDataTransfer,
    TransferChunkRequest,
    TransferData,
    TransferCompleted,
    TransferError,
    InputProperties,
);

impl Command for RawCommand {
    const KIND: MessageKind = MessageKind::Raw;

    fn from_message(message: &Message) -> Option<&Self> {
        match message {
            Message::Raw(raw) => Some(raw),
            _ => None,
        }
    }
}

impl From<RawCommand> for Message {
    fn from(raw: RawCommand) -> Self {
        Message::Raw(raw)
    }
}
