//! Gateway behaviour over real sockets: one process per test, WebSocket
//! clients via tokio-tungstenite, presence and talk services in-process.

use std::{sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

use {
    pigeon_config::PigeonConfig,
    pigeon_gateway::{GatewayOptions, RunningGateway, push, start},
    pigeon_presence::{PresenceService, PresenceStore},
    pigeon_protocol::Envelope,
    pigeon_rock::{RockListener, RockResponse, RockServer},
};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ── Harness ──────────────────────────────────────────────────────────────────

async fn spawn_presence() -> (String, Arc<PresenceStore>) {
    let service = PresenceService::new();
    let store = service.store();
    let listener = RockListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(listener.serve(service.into_rock_server()));
    (addr, store)
}

async fn spawn_gateway(config: PigeonConfig) -> RunningGateway {
    start(GatewayOptions {
        ws_bind: "127.0.0.1:0".into(),
        rpc_bind: "127.0.0.1:0".into(),
        config,
    })
    .await
    .unwrap()
}

fn config_with_presence(presence_addr: &str) -> PigeonConfig {
    let mut config = PigeonConfig::default();
    config.presence.rpc_addr = presence_addr.to_string();
    config
}

async fn connect(gw: &RunningGateway, uid: u64) -> WsClient {
    let token = gw.state.verifier.mint(uid).unwrap();
    connect_with_token(gw, &token).await
}

async fn connect_with_token(gw: &RunningGateway, token: &str) -> WsClient {
    let url = format!("ws://{}/wss/default.io?token={token}&platform=pc", gw.ws_addr);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn recv_envelope(ws: &mut WsClient) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket errored");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("non-envelope text frame");
        }
    }
}

async fn expect_silence(ws: &mut WsClient) {
    let got = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(got.is_err(), "expected no frame, got {got:?}");
}

async fn send_event(ws: &mut WsClient, envelope: &Envelope) {
    let text = serde_json::to_string(envelope).unwrap();
    ws.send(Message::text(text)).await.unwrap();
}

async fn eventually<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Connection lifecycle ─────────────────────────────────────────────────────

#[tokio::test]
async fn welcome_envelope_and_presence_binding() {
    let (presence_addr, store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut ws = connect(&gw, 42).await;
    let welcome = recv_envelope(&mut ws).await;
    assert_eq!(welcome.event, "connect");
    assert_eq!(welcome.payload["uid"], 42);
    assert_eq!(welcome.payload["platform"], "pc");
    assert!(welcome.payload["ts"].as_u64().unwrap() > 0);

    let rpc_addr = gw.state.rpc_addr.clone();
    eventually(
        || store.get_route(42).as_deref() == Some(rpc_addr.as_str()),
        "presence binding",
    )
    .await;

    drop(ws);
    eventually(|| store.get_route(42).is_none(), "presence offline on close").await;
}

#[tokio::test]
async fn invalid_token_gets_error_envelope_then_close() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut ws = connect_with_token(&gw, "not-a-token").await;
    let err = recv_envelope(&mut ws).await;
    assert_eq!(err.event, "event_error");
    assert_eq!(err.payload["error_code"], 401);

    // Nothing but the close handshake after that.
    let next = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None));
}

#[tokio::test]
async fn expired_token_rejected() {
    let (presence_addr, store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let token = gw.state.verifier.mint_expiring(42, -120).unwrap();
    let mut ws = connect_with_token(&gw, &token).await;
    let err = recv_envelope(&mut ws).await;
    assert_eq!(err.event, "event_error");
    assert_eq!(err.payload["error_code"], 401);
    assert_eq!(store.get_route(42), None);
}

// ── Built-in events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_answers_pong_and_renews_presence() {
    let (presence_addr, store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut ws = connect(&gw, 42).await;
    recv_envelope(&mut ws).await;
    eventually(|| store.get_route(42).is_some(), "initial binding").await;

    // Drop the lease behind the gateway's back; the next application ping
    // must recreate it via heartbeat.
    store.set_offline(42);

    send_event(&mut ws, &Envelope::new("ping", serde_json::Value::Null)).await;
    let pong = recv_envelope(&mut ws).await;
    assert_eq!(pong.event, "pong");
    assert!(pong.payload["ts"].as_u64().unwrap() > 0);

    eventually(|| store.get_route(42).is_some(), "heartbeat re-binding").await;
}

#[tokio::test]
async fn echo_round_trips_payload() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut ws = connect(&gw, 42).await;
    recv_envelope(&mut ws).await;

    let payload = serde_json::json!({"text": "anyone there?", "n": 3});
    send_event(&mut ws, &Envelope::new("echo", payload.clone())).await;
    let echo = recv_envelope(&mut ws).await;
    assert_eq!(echo.event, "echo");
    assert_eq!(echo.payload, payload);
}

#[tokio::test]
async fn junk_frames_and_unknown_events_are_ignored() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut ws = connect(&gw, 42).await;
    recv_envelope(&mut ws).await;

    ws.send(Message::binary(vec![0xde, 0xad])).await.unwrap();
    ws.send(Message::text("not json")).await.unwrap();
    send_event(&mut ws, &Envelope::new("no.such.event", serde_json::json!({}))).await;

    // The session survives all of it.
    send_event(&mut ws, &Envelope::new("echo", serde_json::json!({"ok": true}))).await;
    assert_eq!(recv_envelope(&mut ws).await.payload["ok"], true);
}

#[tokio::test]
async fn oversized_message_closes_the_connection() {
    let (presence_addr, _store) = spawn_presence().await;
    let mut config = config_with_presence(&presence_addr);
    config.websocket.message_max_size = 1024;
    let gw = spawn_gateway(config).await;

    let mut ws = connect(&gw, 42).await;
    recv_envelope(&mut ws).await;

    let huge = "x".repeat(4096);
    let _ = ws.send(Message::text(huge)).await;
    let ended = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {},
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "connection should close after an oversized message");
}

// ── Delivery: S1 local fan-out ───────────────────────────────────────────────

#[tokio::test]
async fn local_fanout_reaches_every_session() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut first = connect(&gw, 42).await;
    let mut second = connect(&gw, 42).await;
    let mut bystander = connect(&gw, 43).await;
    for ws in [&mut first, &mut second, &mut bystander] {
        recv_envelope(ws).await;
    }

    push::push_to_user(&gw.state, 42, "im.message", serde_json::json!({"k": "v"}), None).await;

    for ws in [&mut first, &mut second] {
        let env = recv_envelope(ws).await;
        assert_eq!(env.event, "im.message");
        assert_eq!(env.payload, serde_json::json!({"k": "v"}));
    }
    expect_silence(&mut bystander).await;
    expect_silence(&mut first).await;
}

// ── Delivery: S2 cross-gateway ───────────────────────────────────────────────

#[tokio::test]
async fn cross_gateway_push_follows_the_route() {
    let (presence_addr, store) = spawn_presence().await;
    let g1 = spawn_gateway(config_with_presence(&presence_addr)).await;
    let g2 = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut ws = connect(&g2, 7).await;
    recv_envelope(&mut ws).await;
    let g2_rpc = g2.state.rpc_addr.clone();
    eventually(
        || store.get_route(7).as_deref() == Some(g2_rpc.as_str()),
        "route to g2",
    )
    .await;

    push::push_to_user(&g1.state, 7, "x", serde_json::json!({"n": 1}), None).await;

    let env = recv_envelope(&mut ws).await;
    assert_eq!(env.event, "x");
    assert_eq!(env.payload, serde_json::json!({"n": 1}));
}

#[tokio::test]
async fn self_route_without_sessions_issues_no_rpc() {
    let (presence_addr, store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    // A lease that outlived its sessions and points back at us.
    store.set_online(9, &gw.state.rpc_addr, Duration::from_secs(120));

    let started = std::time::Instant::now();
    push::push_to_user(&gw.state, 9, "x", serde_json::json!({}), None).await;
    // Loop break: returns after the route lookup, well inside the deliver
    // deadline.
    assert!(started.elapsed() < Duration::from_millis(450));
}

// ── Delivery: S3 stale presence ──────────────────────────────────────────────

#[tokio::test]
async fn stale_route_to_dead_gateway_fails_soft() {
    let (presence_addr, store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    // Nothing listens there; the owning gateway "crashed".
    store.set_online(9, "127.0.0.1:9", Duration::from_secs(120));

    let started = std::time::Instant::now();
    push::push_to_user(&gw.state, 9, "x", serde_json::json!({}), None).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    // After expiry there is no route at all, so not even a connect attempt.
    store.set_offline(9);
    push::push_to_user(&gw.state, 9, "x", serde_json::json!({}), None).await;
}

// ── Typing indicator ─────────────────────────────────────────────────────────

#[tokio::test]
async fn keyboard_forwarded_with_server_stamped_sender() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut alice = connect(&gw, 1).await;
    let mut bob = connect(&gw, 2).await;
    recv_envelope(&mut alice).await;
    recv_envelope(&mut bob).await;

    // to_from_id as a string, the way web clients send it; from_id spoofed
    // and expected to be overwritten.
    send_event(
        &mut alice,
        &Envelope::new(
            "im.message.keyboard",
            serde_json::json!({"talk_mode": 1, "to_from_id": "2", "from_id": 999}),
        ),
    )
    .await;

    let seen = recv_envelope(&mut bob).await;
    assert_eq!(seen.event, "im.message.keyboard");
    assert_eq!(seen.payload["from_id"], 1);
    assert_eq!(seen.payload["talk_mode"], 1);
    expect_silence(&mut alice).await;
}

#[tokio::test]
async fn group_keyboard_is_not_broadcast() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut alice = connect(&gw, 1).await;
    let mut bob = connect(&gw, 2).await;
    recv_envelope(&mut alice).await;
    recv_envelope(&mut bob).await;

    send_event(
        &mut alice,
        &Envelope::new(
            "im.message.keyboard",
            serde_json::json!({"talk_mode": 2, "to_from_id": 2}),
        ),
    )
    .await;
    expect_silence(&mut bob).await;
}

// ── Group fan-out via the talk service ───────────────────────────────────────

async fn spawn_fake_talk() -> String {
    let server = RockServer::new()
        .handle(pigeon_protocol::cmd::talk::GET_GROUP_TALK_ID, |req, _peer| async move {
            let body: serde_json::Value = req.body_json().unwrap_or_default();
            assert_eq!(body["group_id"], 10);
            RockResponse::ok_json(req.sn, &serde_json::json!({"data": {"talk_id": 99}}))
                .unwrap_or_else(|_| RockResponse::error(req.sn, 500, "encode"))
        })
        .handle(pigeon_protocol::cmd::talk::LIST_USERS_BY_TALK_ID, |req, _peer| async move {
            let body: serde_json::Value = req.body_json().unwrap_or_default();
            assert_eq!(body["talk_id"], 99);
            RockResponse::ok_json(req.sn, &serde_json::json!({"data": {"user_ids": [1, "2"]}}))
                .unwrap_or_else(|_| RockResponse::error(req.sn, 500, "encode"))
        });
    let listener = RockListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(listener.serve(server));
    addr
}

#[tokio::test]
async fn group_message_fans_out_to_members() {
    let (presence_addr, _store) = spawn_presence().await;
    let mut config = config_with_presence(&presence_addr);
    config.talk.rpc_addr = spawn_fake_talk().await;
    let gw = spawn_gateway(config).await;

    let mut alice = connect(&gw, 1).await;
    let mut bob = connect(&gw, 2).await;
    recv_envelope(&mut alice).await;
    recv_envelope(&mut bob).await;

    push::push_im_message(&gw.state, 2, 10, 1, serde_json::json!({"text": "hello group"})).await;

    for ws in [&mut alice, &mut bob] {
        let env = recv_envelope(ws).await;
        assert_eq!(env.event, "im.message");
        assert_eq!(env.payload["text"], "hello group");
    }
}

#[tokio::test]
async fn group_push_with_no_talk_service_drops_quietly() {
    let (presence_addr, _store) = spawn_presence().await;
    let gw = spawn_gateway(config_with_presence(&presence_addr)).await;

    let mut alice = connect(&gw, 1).await;
    recv_envelope(&mut alice).await;

    push::push_im_message(&gw.state, 2, 10, 1, serde_json::json!({"text": "lost"})).await;
    expect_silence(&mut alice).await;
}
