//! コントローラータスク
//!
//! ```text
//! loop {
//!   select! {
//!     tick       → controller.tick → socket.send（順に）
//!     socket.recv → controller.handle_datagram
//!     request    → controller を操作
//!     （ソケット喪失中）reconnect_delay 経過 → 新しいソケットを bind
//!   }
//! }
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atem_client::Controller;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::NetError;
use crate::handle::{ControllerHandle, Request};
use crate::socket::{is_channel_failure, SwitcherSocket, RECV_BUFFER_LEN};

/// データグラムを順に送る
///
/// 個々の書き込み失敗はエラーコールバックに渡して次のデータグラムへ進む。
/// チャンネル障害なら残りを送らずにそのエラーを返す。
async fn send_all<F, Fut>(
    controller: &mut Controller,
    datagrams: Vec<Vec<u8>>,
    mut send: F,
) -> io::Result<()>
where
    F: FnMut(Vec<u8>) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    for datagram in datagrams {
        match send(datagram).await {
            Ok(()) => {}
            Err(err) if is_channel_failure(&err) => return Err(err),
            Err(err) => controller.report_write_failure(err),
        }
    }
    Ok(())
}

/// 要求チャンネルの容量
const REQUEST_QUEUE_LEN: usize = 64;

/// `remote` のスイッチャーに対してコントローラータスクを起動する
pub fn spawn(controller: Controller, remote: SocketAddr) -> (ControllerHandle, JoinHandle<()>) {
    let (requests, inbox) = mpsc::channel(REQUEST_QUEUE_LEN);
    let reactor = Reactor::new(controller, remote, inbox);
    let task = tokio::spawn(reactor.run());
    (ControllerHandle::new(requests), task)
}

/// ホスト名または IP アドレスを解決してコントローラータスクを起動する
///
/// ポートは `ClientConfig::port`（デフォルト 9910）。
pub async fn connect(
    host: &str,
    controller: Controller,
) -> Result<(ControllerHandle, JoinHandle<()>), NetError> {
    let port = controller.config().port;
    let remote = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| NetError::Resolve(format!("{}:{}", host, port)))?;
    Ok(spawn(controller, remote))
}

struct Reactor {
    controller: Controller,
    remote: SocketAddr,
    inbox: mpsc::Receiver<Request>,
    socket: Option<Arc<SwitcherSocket>>,
    /// ソケット喪失中の再 bind 時刻
    retry_at: Instant,
    started: Instant,
}

impl Reactor {
    fn new(controller: Controller, remote: SocketAddr, inbox: mpsc::Receiver<Request>) -> Self {
        let now = Instant::now();
        Reactor {
            controller,
            remote,
            inbox,
            socket: None,
            retry_at: now,
            started: now,
        }
    }

    async fn run(mut self) {
        let period = Duration::from_millis(self.controller.config().tick_interval_ms.max(1));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        tracing::info!(remote = %self.remote, "controller task started");
        self.rebind().await;

        loop {
            let running = match self.socket.clone() {
                Some(socket) => {
                    tokio::select! {
                        _ = ticker.tick() => {
                            self.flush(&socket).await;
                            true
                        }
                        received = socket.recv(&mut buf) => {
                            match received {
                                Ok(n) => {
                                    let now = self.now_ms();
                                    self.controller.handle_datagram(&buf[..n], now);
                                }
                                Err(err) => self.channel_failed(err),
                            }
                            true
                        }
                        request = self.inbox.recv() => self.apply(request),
                    }
                }
                None => {
                    tokio::select! {
                        _ = time::sleep_until(self.retry_at) => {
                            self.rebind().await;
                            true
                        }
                        request = self.inbox.recv() => self.apply(request),
                    }
                }
            };

            if !running {
                break;
            }
        }

        tracing::info!(remote = %self.remote, "controller task stopped");
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// tick で生成されたデータグラムを順に送る
    async fn flush(&mut self, socket: &SwitcherSocket) {
        let now = self.now_ms();
        let datagrams = self.controller.tick(now);
        let sent = send_all(&mut self.controller, datagrams, |datagram| async move {
            socket.send(&datagram).await
        })
        .await;
        if let Err(err) = sent {
            self.channel_failed(err);
        }
    }

    fn channel_failed(&mut self, err: io::Error) {
        let delay = Duration::from_millis(self.controller.config().reconnect_delay_ms);
        tracing::warn!(error = %err, remote = %self.remote, retry_in_ms = delay.as_millis() as u64, "udp channel failed");
        let now = self.now_ms();
        self.controller.channel_failed(err, now);
        self.socket = None;
        self.retry_at = Instant::now() + delay;
    }

    async fn rebind(&mut self) {
        match SwitcherSocket::connect(self.remote).await {
            Ok(socket) => self.socket = Some(Arc::new(socket)),
            Err(err) => self.channel_failed(err),
        }
    }

    /// 要求を処理する。タスクを止めるなら false
    fn apply(&mut self, request: Option<Request>) -> bool {
        match request {
            Some(Request::Send(message)) => self.controller.send(message),
            Some(Request::SendSeparately(messages)) => self.controller.send_separately(messages),
            Some(Request::Run(f)) => f(&mut self.controller),
            Some(Request::Shutdown) | None => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use atem_client::{ClientConfig, ClientError};

    fn recording_controller() -> (Controller, Arc<Mutex<Vec<String>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let mut controller = Controller::new(ClientConfig::default());
        controller.on_error(move |err| {
            let kind = match err {
                ClientError::Write(_) => "write",
                ClientError::Channel(_) => "channel",
                _ => "other",
            };
            sink.lock().unwrap().push(format!("{}: {}", kind, err));
        });
        (controller, errors)
    }

    #[tokio::test]
    async fn test_write_failure_reported_and_rest_sent() {
        let (mut controller, errors) = recording_controller();
        let sent = Mutex::new(Vec::new());

        let result = send_all(
            &mut controller,
            vec![vec![1], vec![2], vec![3]],
            |datagram| {
                let outcome = if datagram == [2] {
                    Err(io::Error::new(io::ErrorKind::Other, "buffer full"))
                } else {
                    sent.lock().unwrap().push(datagram);
                    Ok(())
                };
                async move { outcome }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(*sent.lock().unwrap(), vec![vec![1], vec![3]]);
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("write: "), "{:?}", errors);
        assert_eq!(controller.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_channel_failure_stops_sending() {
        let (mut controller, errors) = recording_controller();
        let mut attempts = 0;

        let result = send_all(
            &mut controller,
            vec![vec![1], vec![2], vec![3]],
            |_| {
                attempts += 1;
                async { Err(io::Error::from(io::ErrorKind::ConnectionRefused)) }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(attempts, 1);
        // チャンネル障害の報告は呼び出し側（channel_failed）が行う
        assert!(errors.lock().unwrap().is_empty());
    }
}
