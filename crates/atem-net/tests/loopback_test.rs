//! atem-net 統合テスト
//!
//! ループバック上の模擬スイッチャーに対して、実際の UDP ソケットで
//! ハンドシェイク・ディスパッチ・アップロード・再接続を確認する。

use std::net::SocketAddr;
use std::time::Duration;

use atem_client::{ClientConfig, ClientError, Controller, Message, SessionId};
use atem_wire::{CommandIter, InitiationComplete, LockRequest, Packet, ProtocolVersion};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

const REMOTE: SessionId = SessionId(0x8001);
const WAIT: Duration = Duration::from_secs(5);

// ==============================================================
// ヘルパー
// ==============================================================

fn config() -> ClientConfig {
    ClientConfig {
        tick_interval_ms: 10,
        reconnect_delay_ms: 50,
        ..ClientConfig::default()
    }
}

struct FakeSwitcher {
    socket: UdpSocket,
    client: Option<SocketAddr>,
}

impl FakeSwitcher {
    async fn bind(addr: &str) -> Self {
        FakeSwitcher {
            socket: UdpSocket::bind(addr).await.unwrap(),
            client: None,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    async fn recv(&mut self) -> Packet {
        let mut buf = [0u8; 2048];
        let (n, from) = timeout(WAIT, self.socket.recv_from(&mut buf))
            .await
            .expect("switcher recv timed out")
            .unwrap();
        self.client = Some(from);
        Packet::from_bytes(&buf[..n]).unwrap()
    }

    async fn send(&self, packet: Packet) {
        let to = self.client.unwrap();
        self.socket.send_to(&packet.to_bytes().unwrap(), to).await.unwrap();
    }

    /// 条件を満たすパケットが届くまで読み捨てる
    async fn recv_until(&mut self, mut pred: impl FnMut(&Packet) -> bool) -> Packet {
        loop {
            let packet = self.recv().await;
            if pred(&packet) {
                return packet;
            }
        }
    }

    /// ハンドシェイクに応答し、初期状態を送る
    async fn accept(&mut self) {
        let hello = self.recv_until(|p| p.is_hello()).await;
        let handshake = hello.session_id;
        assert!(!handshake.is_remote_assigned());
        self.send(Packet::hello(handshake)).await;

        let keepalive = self
            .recv_until(|p| p.session_id == handshake && !p.is_hello())
            .await;
        assert!(keepalive.carries_ack());
        assert_eq!(keepalive.ack_number, 0);

        let mut payload = Vec::new();
        Message::from(ProtocolVersion { major: 2, minor: 30 }).encode_into(&mut payload);
        Message::from(InitiationComplete).encode_into(&mut payload);
        self.send(Packet::reliable(REMOTE, 1, payload)).await;

        // 初期状態パケットへの ACK
        self.recv_until(|p| p.session_id == REMOTE && p.carries_ack() && p.ack_number == 1)
            .await;
    }
}

fn messages(packet: &Packet) -> Vec<Message> {
    CommandIter::new(&packet.payload)
        .map(|raw| Message::decode(raw.unwrap()).unwrap())
        .collect()
}

// ==============================================================
// テスト
// ==============================================================

#[tokio::test]
async fn test_handshake_and_dispatch_over_udp() {
    let mut switcher = FakeSwitcher::bind("127.0.0.1:0").await;
    let (handle, _task) = atem_net::spawn(Controller::new(config()), switcher.addr());

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    handle
        .when::<InitiationComplete, _>(move |_, _| {
            let _ = seen_tx.send(());
            Ok(())
        })
        .await
        .unwrap();

    switcher.accept().await;
    timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();

    assert!(handle.is_connected().await.unwrap());
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.session_id, Some(0x8001));
    assert_eq!(stats.state, "established");
}

#[tokio::test]
async fn test_upload_requests_store_lock() {
    let mut switcher = FakeSwitcher::bind("127.0.0.1:0").await;
    let (handle, _task) = atem_net::spawn(Controller::new(config()), switcher.addr());
    switcher.accept().await;

    handle.upload_still(3, vec![0xAA; 64], 64).await.unwrap();

    let packet = switcher
        .recv_until(|p| p.session_id == REMOTE && p.wants_ack() && !p.payload.is_empty())
        .await;
    assert_eq!(
        messages(&packet),
        vec![Message::LockRequest(LockRequest { store: 0, lock: true })]
    );
}

#[tokio::test]
async fn test_send_reaches_switcher() {
    let mut switcher = FakeSwitcher::bind("127.0.0.1:0").await;
    let (handle, _task) = atem_net::spawn(Controller::new(config()), switcher.addr());
    switcher.accept().await;

    handle.send(LockRequest { store: 9, lock: false }).await.unwrap();
    let packet = switcher
        .recv_until(|p| p.session_id == REMOTE && !p.payload.is_empty())
        .await;
    assert_eq!(
        messages(&packet),
        vec![Message::LockRequest(LockRequest { store: 9, lock: false })]
    );
}

#[tokio::test]
async fn test_channel_failure_retries_and_recovers() {
    // 閉じたポートを相手にする
    let closed = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let mut controller = Controller::new(config());
    controller.on_error(move |err| {
        if matches!(err, ClientError::Channel(_)) {
            let _ = errors_tx.send(());
        }
    });
    let (handle, _task) = atem_net::spawn(controller, addr);

    // ソケットを作り直しながら繰り返し失敗する
    for _ in 0..2 {
        timeout(WAIT, errors_rx.recv()).await.unwrap().unwrap();
    }
    assert!(!handle.is_connected().await.unwrap());

    // スイッチャーが起動すると次の再 bind で接続できる
    let mut switcher = FakeSwitcher::bind(&addr.to_string()).await;
    switcher.accept().await;
    assert!(handle.is_connected().await.unwrap());
}

#[tokio::test]
async fn test_shutdown_stops_task() {
    let switcher = FakeSwitcher::bind("127.0.0.1:0").await;
    let (handle, task) = atem_net::spawn(Controller::new(config()), switcher.addr());

    handle.shutdown().await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(matches!(
        handle.send(InitiationComplete).await,
        Err(atem_net::NetError::Closed)
    ));
}
