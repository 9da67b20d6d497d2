//! ハンドシェイク用セッション ID の生成

use std::sync::atomic::{AtomicU16, Ordering};

use atem_wire::SessionId;

/// getrandom が使えない環境向けのフォールバック
static FALLBACK: AtomicU16 = AtomicU16::new(0x1A2B);

/// 乱数の u16 を返す
pub fn random_u16() -> u16 {
    let mut buf = [0u8; 2];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u16::from_be_bytes(buf),
        Err(err) => {
            tracing::warn!(error = %err, "getrandom failed, using fallback id sequence");
            FALLBACK.fetch_add(0x2F1, Ordering::Relaxed)
        }
    }
}

/// 生の値からハンドシェイク ID を作る
///
/// マーカービットを落とし、直前の ID と同じ値にはしない。
pub fn next_handshake_id(raw: u16, previous: Option<SessionId>) -> SessionId {
    let id = SessionId::handshake(raw);
    if Some(id) == previous {
        SessionId::handshake(id.raw().wrapping_add(1))
    } else {
        id
    }
}
