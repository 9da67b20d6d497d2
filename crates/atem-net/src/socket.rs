//! スイッチャーとの UDP ソケット
//!
//! エフェメラルポートに bind し、スイッチャーのアドレスに connect する。
//! プロトコル処理は一切行わない。

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;

/// 受信バッファ長（パケット長フィールドは 11 ビット）
pub const RECV_BUFFER_LEN: usize = 2048;

/// スイッチャー 1 台と接続済みの UDP ソケット
#[derive(Debug)]
pub struct SwitcherSocket {
    inner: UdpSocket,
    remote: SocketAddr,
}

impl SwitcherSocket {
    /// 新しいエフェメラルポートで `remote` に接続する
    pub async fn connect(remote: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let inner = UdpSocket::bind(local).await?;
        inner.connect(remote).await?;
        tracing::debug!(local = %inner.local_addr()?, %remote, "udp socket bound");
        Ok(SwitcherSocket { inner, remote })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// データグラムを 1 つ送る
    pub async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.inner.send(datagram).await?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, datagram.len()),
            ));
        }
        Ok(())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf).await
    }
}

/// ソケットを作り直すべきエラーか
///
/// 接続済み UDP ソケットでは、相手ポートが閉じていると ICMP により
/// 次の送受信が `ConnectionRefused` で失敗する。
pub fn is_channel_failure(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connected_socket_roundtrip() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = SwitcherSocket::connect(peer.local_addr().unwrap()).await.unwrap();

        socket.send(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        peer.send_to(b"back", from).await.unwrap();
        let n = socket.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"back");
    }

    #[test]
    fn test_channel_failure_kinds() {
        assert!(is_channel_failure(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(!is_channel_failure(&io::Error::from(io::ErrorKind::WouldBlock)));
    }
}
