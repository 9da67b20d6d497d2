//! atem-client 統合テスト
//!
//! スイッチャーの振る舞いを模した `FakeSwitcher` とコントローラーを
//! データグラム単位でつなぎ、接続・アップロード・再接続を通しで確認する。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use atem_client::{ClientConfig, Controller, SessionId, SessionState};
use atem_wire::{
    CommandIter, InitiationComplete, LockObtained, Message, Packet, ProtocolVersion,
    TransferChunkRequest, TransferCompleted, TransferError,
};

// ==============================================================
// ヘルパー: 模擬スイッチャー
// ==============================================================

#[derive(Default)]
struct Upload {
    store: u16,
    index: u32,
    size: u32,
    data: Vec<u8>,
}

/// LOCK / FTSD / FTDa に応答する模擬スイッチャー
struct FakeSwitcher {
    /// 次に割り当てるリモート ID
    next_remote: u16,
    /// 現在のセッション
    session: Option<SessionId>,
    /// 昇格済みのハンドシェイク ID
    promoted: HashSet<u16>,
    next_number: u16,
    seen: HashSet<u16>,
    uploads: HashMap<u16, Upload>,
    finished: Vec<Upload>,
    lock_releases: Vec<u16>,
    /// 次の FTSD を拒否する
    reject_next: bool,
    chunk_size: u16,
}

impl FakeSwitcher {
    fn new() -> Self {
        FakeSwitcher {
            next_remote: 0x8001,
            session: None,
            promoted: HashSet::new(),
            next_number: 0,
            seen: HashSet::new(),
            uploads: HashMap::new(),
            finished: Vec::new(),
            lock_releases: Vec::new(),
            reject_next: false,
            chunk_size: 400,
        }
    }

    fn reliable(&mut self, messages: &[Message]) -> Vec<u8> {
        let id = self.session.unwrap();
        self.next_number = self.next_number.wrapping_add(1);
        let mut payload = Vec::new();
        for m in messages {
            m.encode_into(&mut payload);
        }
        Packet::reliable(id, self.next_number, payload).to_bytes().unwrap()
    }

    /// クライアントのデータグラムを受け取り、返信データグラムを返す
    fn handle(&mut self, datagram: &[u8]) -> Vec<Vec<u8>> {
        let packet = Packet::from_bytes(datagram).unwrap();
        let id = packet.session_id;

        if !id.is_remote_assigned() {
            if packet.is_hello() {
                return vec![Packet::hello(id).to_bytes().unwrap()];
            }
            // 応答済みハンドシェイクへのキープアライブ → 新しいセッションを割り当てる
            if self.promoted.insert(id.raw()) {
                self.session = Some(SessionId(self.next_remote));
                self.next_remote += 1;
                self.next_number = 0;
                self.seen.clear();
                let state = [
                    ProtocolVersion { major: 2, minor: 30 }.into(),
                    InitiationComplete.into(),
                ];
                return vec![self.reliable(&state)];
            }
            return Vec::new();
        }

        if Some(id) != self.session || !packet.wants_ack() {
            return Vec::new();
        }

        let mut replies = vec![Packet::ack(id, packet.number).to_bytes().unwrap()];
        if !self.seen.insert(packet.number) {
            return replies;
        }

        let mut out = Vec::new();
        for raw in CommandIter::new(&packet.payload) {
            match Message::decode(raw.unwrap()).unwrap() {
                Message::LockRequest(l) if l.lock => {
                    out.push(LockObtained { store: l.store }.into());
                }
                Message::LockRequest(l) => self.lock_releases.push(l.store),
                Message::StartDataTransfer(s) => {
                    if std::mem::take(&mut self.reject_next) {
                        out.push(TransferError { transfer_id: s.transfer_id, code: 1 }.into());
                        continue;
                    }
                    self.uploads.insert(
                        s.transfer_id,
                        Upload {
                            store: s.store,
                            index: s.index,
                            size: s.size,
                            data: Vec::new(),
                        },
                    );
                    out.push(
                        TransferChunkRequest {
                            transfer_id: s.transfer_id,
                            chunk_size: self.chunk_size,
                            chunk_count: 4,
                        }
                        .into(),
                    );
                }
                Message::TransferData(d) => {
                    let upload = self.uploads.get_mut(&d.transfer_id).unwrap();
                    assert!(d.data.len() <= self.chunk_size as usize);
                    upload.data.extend(d.data);
                    let done = upload.data.len() as u32 >= upload.size;
                    let batch_done = upload.data.len() % (self.chunk_size as usize * 4) == 0;
                    if done {
                        let upload = self.uploads.remove(&d.transfer_id).unwrap();
                        self.finished.push(upload);
                        out.push(TransferCompleted { transfer_id: d.transfer_id }.into());
                    } else if batch_done {
                        out.push(
                            TransferChunkRequest {
                                transfer_id: d.transfer_id,
                                chunk_size: self.chunk_size,
                                chunk_count: 4,
                            }
                            .into(),
                        );
                    }
                }
                _ => {}
            }
        }
        if !out.is_empty() {
            replies.push(self.reliable(&out));
        }
        replies
    }
}

/// tick → スイッチャー → handle_datagram を `until` まで 20ms 刻みで回す
fn run(client: &mut Controller, switcher: &mut FakeSwitcher, from: u64, until: u64) {
    let mut now = from;
    while now < until {
        for datagram in client.tick(now) {
            for reply in switcher.handle(&datagram) {
                client.handle_datagram(&reply, now + 1);
            }
        }
        now += 20;
    }
}

fn client() -> Controller {
    let mut next = 0u16;
    Controller::with_id_source(ClientConfig::default(), move || {
        next += 0x0101;
        next
    })
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ==============================================================
// テスト
// ==============================================================

#[test]
fn test_handshake_and_initial_state() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    let versions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&versions);
    c.when::<ProtocolVersion, _>(move |v, _| {
        sink.lock().unwrap().push((v.major, v.minor));
        Ok(())
    });

    run(&mut c, &mut switcher, 0, 200);

    assert_eq!(c.state(), SessionState::Established);
    assert_eq!(c.session_id(), Some(SessionId(0x8001)));
    assert_eq!(*versions.lock().unwrap(), vec![(2, 30)]);
}

#[test]
fn test_still_uploads_complete_in_order() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    run(&mut c, &mut switcher, 0, 100);

    let first = image(4000);
    let second = image(1500);
    c.upload_still(0, first.clone(), 4000);
    c.upload_still(1, second.clone(), 1500);
    run(&mut c, &mut switcher, 100, 2000);

    assert_eq!(switcher.finished.len(), 2);
    assert_eq!(switcher.finished[0].index, 0);
    assert_eq!(switcher.finished[0].data, first);
    assert_eq!(switcher.finished[1].index, 1);
    assert_eq!(switcher.finished[1].data, second);
    assert_eq!(switcher.lock_releases, vec![0], "ロック解放は最後に 1 回だけ");
    assert_eq!(c.stats().transfers_completed, 2);
    assert_eq!(c.pending_transfers(), 0);
}

#[test]
fn test_label_upload_uses_label_store() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    run(&mut c, &mut switcher, 0, 100);

    c.upload_label(5, image(900), Some("Stage"), None);
    run(&mut c, &mut switcher, 100, 1000);

    assert_eq!(switcher.finished.len(), 1);
    assert_eq!(switcher.finished[0].store, 0xFFFF);
    assert_eq!(switcher.finished[0].index, 5);
    assert_eq!(switcher.lock_releases, vec![0xFFFF]);
}

#[test]
fn test_rejected_transfer_reported_and_next_runs() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    c.on_error(move |err| sink.lock().unwrap().push(err.to_string()));
    run(&mut c, &mut switcher, 0, 100);

    switcher.reject_next = true;
    let rejected = c.upload_still(0, image(100), 100);
    c.upload_still(2, image(100), 100);
    run(&mut c, &mut switcher, 100, 1000);

    assert_eq!(
        *errors.lock().unwrap(),
        vec![format!("transfer {} rejected by switcher (code 1)", rejected)]
    );
    assert_eq!(switcher.finished.len(), 1);
    assert_eq!(switcher.finished[0].index, 2);
    assert_eq!(c.stats().transfers_failed, 1);
}

#[test]
fn test_reconnect_after_silent_loss() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let on_connect = Arc::clone(&events);
    c.on_connect(move |id| on_connect.lock().unwrap().push(format!("up {}", id)));
    let on_disconnect = Arc::clone(&events);
    c.on_disconnect(move |id| on_disconnect.lock().unwrap().push(format!("down {}", id)));

    run(&mut c, &mut switcher, 0, 100);

    // スイッチャーが黙る（返信を捨てる）
    let mut now = 100;
    while now < 3000 {
        let _ = c.tick(now);
        now += 20;
    }
    assert_eq!(c.state(), SessionState::AwaitingHandshake);

    // 再び応答するようになると新しいセッションが確立する
    run(&mut c, &mut switcher, 3000, 3200);
    assert_eq!(c.session_id(), Some(SessionId(0x8002)));
    assert_eq!(
        *events.lock().unwrap(),
        vec!["up 0x8001".to_string(), "down 0x8001".to_string(), "up 0x8002".to_string()]
    );
}

#[test]
fn test_upload_survives_reconnect() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    run(&mut c, &mut switcher, 0, 100);

    // 接続が切れている間に積んだ転送は、再接続後に最初から送られる
    let mut now = 100;
    while now < 3000 {
        let _ = c.tick(now);
        now += 20;
    }
    let data = image(2000);
    c.upload_still(7, data.clone(), 2000);
    assert_eq!(c.pending_transfers(), 1);

    run(&mut c, &mut switcher, 3000, 5000);
    assert_eq!(switcher.finished.len(), 1);
    assert_eq!(switcher.finished[0].data, data);
}

#[test]
fn test_stale_packets_from_old_session_ignored() {
    let mut c = client();
    let mut switcher = FakeSwitcher::new();
    run(&mut c, &mut switcher, 0, 100);
    let old = switcher.reliable(&[InitiationComplete.into()]);

    let mut now = 100;
    while now < 3000 {
        let _ = c.tick(now);
        now += 20;
    }
    run(&mut c, &mut switcher, 3000, 3200);
    assert_eq!(c.session_id(), Some(SessionId(0x8002)));

    // 旧セッションのパケットが遅れて届いても無視される
    let dispatched = c.handle_datagram(&old, 3300);
    assert!(dispatched.is_empty());
    assert_eq!(c.session_id(), Some(SessionId(0x8002)));
}
