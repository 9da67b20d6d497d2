//! atem-wasm 統合テスト（ネイティブ）
//!
//! JS 関数を使わない `ClientCore` を通して、Node.js 側から見える
//! データの流れ（tick の戻り値・受信コマンド・イベント）を確認する。

use atem_client::{ClientConfig, Controller};
use atem_wasm::bridge::parse_tag;
use atem_wasm::{ClientCore, Event, InboundCommand};
use atem_wire::{CommandIter, InitiationComplete, LockRequest, Message, Packet, SessionId};

// ==============================================================
// ヘルパー
// ==============================================================

const REMOTE: SessionId = SessionId(0x8001);

fn core() -> ClientCore {
    let mut next = 0u16;
    ClientCore::new(Controller::with_id_source(ClientConfig::default(), move || {
        next += 0x22;
        next
    }))
}

/// ハンドシェイクを済ませて初期状態を受け取る
fn connect(core: &mut ClientCore) -> Vec<InboundCommand> {
    let hello = Packet::from_bytes(&core.tick(0)[0]).unwrap();
    assert!(hello.is_hello());
    core.recv(&Packet::hello(hello.session_id).to_bytes().unwrap(), 5);

    let keepalive = Packet::from_bytes(&core.tick(20)[0]).unwrap();
    assert_eq!(keepalive.ack_number, 0);

    let mut payload = Vec::new();
    Message::from(InitiationComplete).encode_into(&mut payload);
    let state = Packet::reliable(REMOTE, 1, payload).to_bytes().unwrap();
    core.recv(&state, 25)
}

fn sent_messages(datagrams: &[Vec<u8>]) -> Vec<Message> {
    datagrams
        .iter()
        .map(|d| Packet::from_bytes(d).unwrap())
        .flat_map(|p| {
            CommandIter::new(&p.payload)
                .map(|raw| Message::decode(raw.unwrap()).unwrap())
                .collect::<Vec<_>>()
        })
        .collect()
}

// ==============================================================
// テスト
// ==============================================================

#[test]
fn test_inbound_commands_carry_tag_and_body() {
    let mut core = core();
    let commands = connect(&mut core);
    assert_eq!(
        commands,
        vec![InboundCommand {
            tag: "InCm".to_string(),
            body: vec![0, 0, 0, 0],
        }]
    );
    assert_eq!(core.take_events(), vec![Event::Connected(0x8001)]);
    assert!(core.take_events().is_empty());
}

#[test]
fn test_send_command_with_known_tag_is_typed() {
    let mut core = core();
    connect(&mut core);

    core.send_command(parse_tag("LOCK").unwrap(), vec![0, 2, 1, 0]);
    let messages = sent_messages(&core.tick(40));
    assert_eq!(
        messages,
        vec![Message::LockRequest(LockRequest { store: 2, lock: true })]
    );
}

#[test]
fn test_send_without_session_emits_error_event() {
    let mut core = core();
    core.send_command(parse_tag("Ping").unwrap(), vec![]);
    assert_eq!(core.take_events(), vec![Event::Error("not connected".to_string())]);
}

#[test]
fn test_channel_failure_emits_disconnect() {
    let mut core = core();
    connect(&mut core);
    let _ = core.take_events();

    core.controller_mut()
        .channel_failed(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"), 100);
    let events = core.take_events();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Event::Error(text) if text.contains("socket closed")));
    assert_eq!(events[1], Event::Disconnected(0x8001));
}

#[test]
fn test_stats_json_and_config() {
    let core = ClientCore::from_json(Some(r#"{"tick_interval_ms": 10}"#)).unwrap();
    assert_eq!(core.controller().config().tick_interval_ms, 10);

    let stats: serde_json::Value = serde_json::from_str(&core.stats_json()).unwrap();
    assert_eq!(stats["state"], "no-session");
    assert_eq!(stats["pending_transfers"], 0);

    assert!(ClientCore::from_json(Some("not json")).is_err());
}

#[test]
fn test_parse_tag_requires_four_bytes() {
    assert!(parse_tag("FTDa").is_some());
    assert!(parse_tag("FTD").is_none());
    assert!(parse_tag("FTDaa").is_none());
}
