//! atem-transfer シナリオテスト
//!
//! スイッチャー側の振る舞い（LKOB / FTCD / FTDC）を手で再現し、
//! 同じストアへの連続アップロードの順序とチャンクの完全性を確認する。

use atem_transfer::{Action, LockState, TransferOrchestrator, TransferRequest, STILL_STORE};
use atem_wire::{LockRequest, Message, TransferChunkRequest};

// ==============================================================
// ヘルパー
// ==============================================================

/// 送信されたメッセージを送信順に記録する
#[derive(Default)]
struct Wire {
    sent: Vec<Message>,
    completed: Vec<u16>,
}

impl Wire {
    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(m) => self.sent.push(m),
                Action::SendSeparately(ms) => self.sent.extend(ms),
                Action::Completed(summary) => self.completed.push(summary.id),
                Action::Failed { summary, code } => {
                    panic!("transfer {} failed with {}", summary.id, code)
                }
            }
        }
    }

    fn take(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.sent)
    }
}

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// FTCD を 1 回送り、返ってきたチャンクを連結する
fn request_chunks(
    orchestrator: &mut TransferOrchestrator,
    wire: &mut Wire,
    transfer_id: u16,
    chunk_size: u16,
    chunk_count: u16,
) -> Vec<u8> {
    wire.apply(orchestrator.chunks_requested(&TransferChunkRequest {
        transfer_id,
        chunk_size,
        chunk_count,
    }));

    let mut received = Vec::new();
    for message in wire.take() {
        match message {
            Message::TransferData(d) => {
                assert_eq!(d.transfer_id, transfer_id);
                assert!(d.data.len() <= chunk_size as usize, "チャンクが要求サイズを超えた");
                received.extend(d.data);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    received
}

// ==============================================================
// テスト
// ==============================================================

#[test]
fn test_two_stills_on_one_store_with_ten_chunks() {
    let mut orchestrator = TransferOrchestrator::new();
    let mut wire = Wire::default();
    wire.apply(orchestrator.session_established());

    let t1_data = payload(1000, 1);
    let t2_data = payload(1000, 2);

    let (t1, actions) = orchestrator.enqueue(TransferRequest::still(0, t1_data.clone(), 4000));
    wire.apply(actions);
    let (t2, actions) = orchestrator.enqueue(TransferRequest::still(1, t2_data.clone(), 4000));
    wire.apply(actions);

    // ロック要求はちょうど 1 回、FTSD はまだ出ない
    assert_eq!(
        wire.take(),
        vec![Message::LockRequest(LockRequest { store: STILL_STORE, lock: true })]
    );

    wire.apply(orchestrator.lock_obtained(STILL_STORE));
    match &wire.take()[..] {
        [Message::StartDataTransfer(s)] => {
            assert_eq!(s.transfer_id, t1);
            assert_eq!(s.index, 0);
            assert_eq!(s.size, 4000);
        }
        other => panic!("unexpected {:?}", other),
    }

    // 100 バイト × 10 チャンクで T1 がちょうど送り切られる
    let received = request_chunks(&mut orchestrator, &mut wire, t1, 100, 10);
    assert_eq!(received, t1_data);

    // T1 完了 → ロックを解放せずに T2 を開始
    wire.apply(orchestrator.transfer_finished(t1));
    assert_eq!(wire.completed, vec![t1]);
    match &wire.take()[..] {
        [Message::StartDataTransfer(s)] => assert_eq!(s.transfer_id, t2),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(orchestrator.lock_state(STILL_STORE), LockState::Held);

    let received = request_chunks(&mut orchestrator, &mut wire, t2, 100, 10);
    assert_eq!(received, t2_data);

    // T2 完了 → 解放はちょうど 1 回
    wire.apply(orchestrator.transfer_finished(t2));
    assert_eq!(wire.completed, vec![t1, t2]);
    assert_eq!(
        wire.take(),
        vec![Message::LockRequest(LockRequest { store: STILL_STORE, lock: false })]
    );
    assert!(orchestrator.is_idle());
}

#[test]
fn test_uneven_chunk_requests_cover_payload_exactly() {
    let mut orchestrator = TransferOrchestrator::new();
    let mut wire = Wire::default();
    wire.apply(orchestrator.session_established());

    let data = payload(1234, 7);
    let (id, actions) = orchestrator.enqueue(TransferRequest::still(3, data.clone(), 1234));
    wire.apply(actions);
    wire.apply(orchestrator.lock_obtained(STILL_STORE));
    let _ = wire.take();

    let mut received = Vec::new();
    // スイッチャーは途中でチャンクサイズを変えることがある
    for (size, count) in [(300, 2), (128, 3), (500, 5), (500, 5)] {
        received.extend(request_chunks(&mut orchestrator, &mut wire, id, size, count));
    }
    assert_eq!(received.len(), data.len());
    assert_eq!(received, data);
}

#[test]
fn test_transfer_resumes_from_start_after_reconnect() {
    let mut orchestrator = TransferOrchestrator::new();
    let mut wire = Wire::default();
    wire.apply(orchestrator.session_established());

    let data = payload(600, 3);
    let (id, actions) = orchestrator.enqueue(TransferRequest::still(0, data.clone(), 600));
    wire.apply(actions);
    wire.apply(orchestrator.lock_obtained(STILL_STORE));
    let partial = request_chunks(&mut orchestrator, &mut wire, id, 100, 2);
    assert_eq!(partial.len(), 200);
    let _ = wire.take();

    orchestrator.session_lost();
    wire.apply(orchestrator.session_established());
    assert_eq!(
        wire.take(),
        vec![Message::LockRequest(LockRequest { store: STILL_STORE, lock: true })]
    );

    wire.apply(orchestrator.lock_obtained(STILL_STORE));
    let _ = wire.take();
    let received = request_chunks(&mut orchestrator, &mut wire, id, 100, 6);
    assert_eq!(received, data);
}
