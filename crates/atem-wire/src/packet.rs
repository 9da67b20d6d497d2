//! UDP パケット構造
//!
//! ## Wire Format
//! ```text
//! [flags: 5bit][length: 11bit]   u16 BE
//! [session_id: u16 BE]
//! [ack_number: u16 BE]
//! [reserved: 4bytes]
//! [packet_number: u16 BE]
//! [payload...]
//! ```

use alloc::vec::Vec;

use crate::error::WireError;

/// パケットヘッダーのフラグ（先頭バイトの上位 5 ビット）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    /// 相手に ACK を要求する（信頼性あり送信）
    pub const ACK_REQUEST: Flags = Flags(0x01);
    /// ハンドシェイク（接続要求/応答）
    pub const HELLO: Flags = Flags(0x02);
    /// 再送パケット
    pub const RETRANSMISSION: Flags = Flags(0x04);
    /// 再送要求
    pub const RETRANSMISSION_REQUEST: Flags = Flags(0x08);
    /// ack_number フィールドが有効
    pub const ACK: Flags = Flags(0x10);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits & 0x1F)
    }

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Flags) -> Self {
        Flags(self.0 | other.0)
    }
}

impl core::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        self.union(rhs)
    }
}

/// セッション識別子
///
/// 最上位ビットが立っていればスイッチャーが割り当てた ID、
/// 立っていなければクライアントが生成したハンドシェイク用 ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u16);

impl SessionId {
    /// リモート割り当て ID を示すマーカービット
    pub const REMOTE_ASSIGNED_BIT: u16 = 0x8000;

    /// スイッチャーが割り当てた ID か
    pub fn is_remote_assigned(self) -> bool {
        self.0 & Self::REMOTE_ASSIGNED_BIT != 0
    }

    /// 任意の値からマーカービットを落としたハンドシェイク用 ID を作る
    pub fn handshake(raw: u16) -> Self {
        SessionId(raw & !Self::REMOTE_ASSIGNED_BIT)
    }

    /// 生の u16 値を返す
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// `a` が `b` より新しいパケット番号か（u16 のラップアラウンドを考慮）
pub fn is_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

/// スイッチャー制御プロトコルの UDP パケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// ヘッダーフラグ
    pub flags: Flags,
    /// セッション ID
    pub session_id: SessionId,
    /// ACK する相手側のパケット番号（`Flags::ACK` のときのみ有効）
    pub ack_number: u16,
    /// このパケットの番号（`Flags::ACK_REQUEST` のときのみ有効）
    pub number: u16,
    /// コマンドブロック列（ハンドシェイクでは接続要求コード）
    pub payload: Vec<u8>,
}

impl Packet {
    /// ヘッダー長
    pub const HEADER_LEN: usize = 12;

    /// length フィールド（11 ビット）で表せる最大パケット長
    pub const MAX_LEN: usize = 0x07FF;

    /// ペイロードの最大長
    pub const MAX_PAYLOAD: usize = Self::MAX_LEN - Self::HEADER_LEN;

    /// ハンドシェイク要求のペイロード（接続要求コード 0x01）
    pub const HELLO_PAYLOAD: [u8; 8] = [0x01, 0, 0, 0, 0, 0, 0, 0];

    /// 受信したデータグラムをパースする
    ///
    /// # エラー
    /// - `WireError::TooShort`: 12 バイト未満
    /// - `WireError::LengthMismatch`: length フィールドがデータグラムより長い
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(WireError::TooShort(bytes.len()));
        }

        let word = u16::from_be_bytes([bytes[0], bytes[1]]);
        let flags = Flags::from_bits((word >> 11) as u8);
        let declared = (word & 0x07FF) as usize;
        if declared < Self::HEADER_LEN || declared > bytes.len() {
            return Err(WireError::LengthMismatch {
                declared,
                actual: bytes.len(),
            });
        }

        Ok(Packet {
            flags,
            session_id: SessionId(u16::from_be_bytes([bytes[2], bytes[3]])),
            ack_number: u16::from_be_bytes([bytes[4], bytes[5]]),
            number: u16::from_be_bytes([bytes[10], bytes[11]]),
            payload: bytes[Self::HEADER_LEN..declared].to_vec(),
        })
    }

    /// Wire Format に変換する
    ///
    /// # エラー
    /// - `WireError::PayloadTooLarge`: length フィールドに収まらない
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > Self::MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let total = Self::HEADER_LEN + self.payload.len();
        let word = ((self.flags.bits() as u16) << 11) | total as u16;

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&word.to_be_bytes());
        bytes.extend_from_slice(&self.session_id.0.to_be_bytes());
        bytes.extend_from_slice(&self.ack_number.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&self.number.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// ハンドシェイク要求パケット
    pub fn hello(session_id: SessionId) -> Self {
        Packet {
            flags: Flags::HELLO,
            session_id,
            ack_number: 0,
            number: 0,
            payload: Self::HELLO_PAYLOAD.to_vec(),
        }
    }

    /// ACK のみのパケット（ペイロードなし）
    ///
    /// ハンドシェイク応答待ちのキープアライブは `ack_number = 0` で送る。
    pub fn ack(session_id: SessionId, ack_number: u16) -> Self {
        Packet {
            flags: Flags::ACK,
            session_id,
            ack_number,
            number: 0,
            payload: Vec::new(),
        }
    }

    /// ACK を要求するデータパケット
    pub fn reliable(session_id: SessionId, number: u16, payload: Vec<u8>) -> Self {
        Packet {
            flags: Flags::ACK_REQUEST,
            session_id,
            ack_number: 0,
            number,
            payload,
        }
    }

    pub fn is_hello(&self) -> bool {
        self.flags.contains(Flags::HELLO)
    }

    pub fn wants_ack(&self) -> bool {
        self.flags.contains(Flags::ACK_REQUEST)
    }

    pub fn carries_ack(&self) -> bool {
        self.flags.contains(Flags::ACK)
    }
}

/// エンコード済みパケットに再送フラグを立てる
///
/// 送信済みバイト列を再エンコードせずに再送するために使う。
pub fn mark_retransmission(bytes: &mut [u8]) {
    if let Some(first) = bytes.first_mut() {
        *first |= Flags::RETRANSMISSION.bits() << 3;
    }
}
