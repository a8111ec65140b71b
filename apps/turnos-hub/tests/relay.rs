use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use turnos_hub::{HubConfig, HubState};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    addr: SocketAddr,
    state: HubState,
    _shutdown: oneshot::Sender<()>,
}

impl TestHub {
    async fn start(config: HubConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = HubState::new(config, None);
        let (tx, rx) = oneshot::channel::<()>();
        let served = state.clone();
        tokio::spawn(async move {
            let _ = turnos_hub::serve(listener, served, async {
                let _ = rx.await;
            })
            .await;
        });
        Self {
            addr,
            state,
            _shutdown: tx,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.url()).await.unwrap();
        client
    }

    async fn join(&self, hello: Value) -> Client {
        let mut client = self.connect().await;
        send(&mut client, hello.to_string()).await;
        client
    }
}

async fn send(client: &mut Client, text: String) {
    client.send(Message::Text(text)).await.unwrap();
}

/// Next text frame within `wait`, skipping control frames.
async fn next_text(client: &mut Client, wait: Duration) -> Option<String> {
    timeout(wait, async {
        while let Some(frame) = client.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(text),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

async fn recv_text(client: &mut Client) -> String {
    next_text(client, Duration::from_secs(2))
        .await
        .expect("expected a text frame")
}

async fn assert_silent(client: &mut Client) {
    assert_eq!(next_text(client, Duration::from_millis(200)).await, None);
}

fn state_message(name: &str) -> String {
    // Odd spacing on purpose: the hub must forward the exact text.
    format!(
        "{{\"type\":\"state\",  \"state\":{{\"activeIdx\":0,\"party\":[{{\"id\":\"{id}\",\"nombre\":\"{name}\"}}]}}}}",
        id = name.to_lowercase()
    )
}

#[test_timeout::tokio_timeout_test(20)]
async fn state_fans_out_to_everyone_but_the_sender() {
    let hub = TestHub::start(HubConfig::default()).await;
    let mut admin = hub.join(json!({"type": "hello", "role": "admin"})).await;
    let mut viewer_a = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    let mut viewer_b = hub.join(json!({"type": "hello"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let text = state_message("Grerin");
    send(&mut admin, text.clone()).await;

    assert_eq!(recv_text(&mut viewer_a).await, text);
    assert_eq!(recv_text(&mut viewer_b).await, text);
    assert_silent(&mut admin).await;

    let from_viewer = state_message("Ogro");
    send(&mut viewer_a, from_viewer.clone()).await;
    assert_eq!(recv_text(&mut admin).await, from_viewer);
    assert_eq!(recv_text(&mut viewer_b).await, from_viewer);
    assert_silent(&mut viewer_a).await;
    assert_eq!(hub.state.registry.last_state(), Some(from_viewer));
}

#[test_timeout::tokio_timeout_test(20)]
async fn newcomer_receives_last_state_after_hello() {
    let hub = TestHub::start(HubConfig::default()).await;
    let mut admin = hub.join(json!({"type": "hello", "role": "admin"})).await;
    let text = state_message("Grerin");
    send(&mut admin, text.clone()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut late = hub.connect().await;
    assert_silent(&mut late).await;
    send(&mut late, json!({"type": "hello", "role": "viewer"}).to_string()).await;
    assert_eq!(recv_text(&mut late).await, text);

    drop(admin);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut later = hub.join(json!({"type": "hello", "role": "VIEWER"})).await;
    assert_eq!(recv_text(&mut later).await, text, "state outlives its sender");
}

#[test_timeout::tokio_timeout_test(20)]
async fn admin_with_wrong_token_is_rejected() {
    let config = HubConfig {
        admin_token: Some("dm-secret".into()),
        ..HubConfig::default()
    };
    let hub = TestHub::start(config).await;

    let mut intruder = hub
        .join(json!({"type": "hello", "role": "Admin", "token": "guess"}))
        .await;
    let reply: Value = serde_json::from_str(&recv_text(&mut intruder).await).unwrap();
    assert_eq!(reply, json!({"type": "error", "error": "unauthorized"}));
    let close = timeout(Duration::from_secs(2), async {
        while let Some(frame) = intruder.next().await {
            if let Ok(Message::Close(frame)) = frame {
                return frame;
            }
        }
        None
    })
    .await
    .unwrap()
    .expect("close frame");
    assert_eq!(close.code, CloseCode::from(4001));

    let mut admin = hub
        .join(json!({"type": "hello", "role": "admin", "token": "dm-secret"}))
        .await;
    let mut viewer = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let text = state_message("Grerin");
    send(&mut admin, text.clone()).await;
    assert_eq!(recv_text(&mut viewer).await, text);
}

#[test_timeout::tokio_timeout_test(20)]
async fn malformed_messages_are_dropped_without_closing() {
    let hub = TestHub::start(HubConfig::default()).await;
    let mut a = hub.join(json!({"type": "hello", "role": "admin"})).await;
    let mut b = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for junk in [
        "not json".to_string(),
        json!({"type": "shout"}).to_string(),
        json!({"type": "state", "state": "party"}).to_string(),
        json!({"type": "state"}).to_string(),
    ] {
        send(&mut a, junk).await;
    }
    assert_silent(&mut b).await;
    assert!(!hub.state.registry.has_state());

    send(&mut a, json!({"type": "ping"}).to_string()).await;
    assert_eq!(recv_text(&mut a).await, r#"{"type":"pong"}"#);

    a.send(Message::Binary(state_message("Grerin").into_bytes()))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut b).await, state_message("Grerin"));
}

#[test_timeout::tokio_timeout_test(20)]
async fn admin_writes_only_rejects_viewer_state() {
    let config = HubConfig {
        admin_writes_only: true,
        ..HubConfig::default()
    };
    let hub = TestHub::start(config).await;
    let mut admin = hub.join(json!({"type": "hello", "role": "admin"})).await;
    let mut viewer = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send(&mut viewer, state_message("Trampa")).await;
    let reply: Value = serde_json::from_str(&recv_text(&mut viewer).await).unwrap();
    assert_eq!(reply, json!({"type": "error", "error": "forbidden"}));
    assert_silent(&mut admin).await;
    assert!(!hub.state.registry.has_state());
}

#[test_timeout::tokio_timeout_test(20)]
async fn admin_token_keeps_tokenless_viewers_from_publishing() {
    let config = HubConfig {
        admin_token: Some("dm-secret".into()),
        ..HubConfig::default()
    };
    let hub = TestHub::start(config).await;
    let mut admin = hub
        .join(json!({"type": "hello", "role": "admin", "token": "dm-secret"}))
        .await;
    let mut viewer = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    send(&mut viewer, state_message("Trampa")).await;
    let reply: Value = serde_json::from_str(&recv_text(&mut viewer).await).unwrap();
    assert_eq!(reply, json!({"type": "error", "error": "forbidden"}));
    assert_silent(&mut admin).await;
    assert!(!hub.state.registry.has_state());
}

#[test_timeout::tokio_timeout_test(20)]
async fn every_observer_sees_the_same_order() {
    let hub = TestHub::start(HubConfig::default()).await;
    let mut writer_a = hub.join(json!({"type": "hello", "role": "admin"})).await;
    let mut writer_b = hub.join(json!({"type": "hello", "role": "admin"})).await;
    let mut observer_1 = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    let mut observer_2 = hub.join(json!({"type": "hello", "role": "viewer"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rounds = 25;
    let a = tokio::spawn(async move {
        for i in 0..rounds {
            send(&mut writer_a, state_message(&format!("A{i}"))).await;
        }
        writer_a
    });
    let b = tokio::spawn(async move {
        for i in 0..rounds {
            send(&mut writer_b, state_message(&format!("B{i}"))).await;
        }
        writer_b
    });
    let _writers = (a.await.unwrap(), b.await.unwrap());

    let mut seen_1 = Vec::new();
    let mut seen_2 = Vec::new();
    while seen_1.len() < 2 * rounds {
        seen_1.push(recv_text(&mut observer_1).await);
    }
    while seen_2.len() < 2 * rounds {
        seen_2.push(recv_text(&mut observer_2).await);
    }
    assert_eq!(seen_1, seen_2);
    assert_eq!(hub.state.registry.last_state().as_ref(), seen_1.last());
}

#[test_timeout::tokio_timeout_test(20)]
async fn silent_peers_are_closed_with_policy_code() {
    let config = HubConfig {
        sweep_interval: Duration::from_millis(300),
        idle_timeout: Duration::from_millis(900),
        ..HubConfig::default()
    };
    let hub = TestHub::start(config).await;
    let mut quiet = hub.join(json!({"type": "hello", "role": "viewer"})).await;

    // Not reading means tungstenite never answers the hub's pings.
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(hub.state.registry.peer_count(), 0);

    // The hub has hung up: the stream ends, and a close frame read before
    // that carries the policy code.
    let ended = timeout(Duration::from_secs(2), async {
        while let Some(frame) = quiet.next().await {
            match frame {
                Ok(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Policy),
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "connection should be gone");
}

#[test_timeout::tokio_timeout_test(20)]
async fn responsive_peers_survive_the_sweeper() {
    let config = HubConfig {
        sweep_interval: Duration::from_millis(200),
        idle_timeout: Duration::from_millis(600),
        ..HubConfig::default()
    };
    let hub = TestHub::start(config).await;
    let mut viewer = hub.join(json!({"type": "hello", "role": "viewer"})).await;

    // Reading lets tungstenite answer pings with pongs.
    assert_eq!(next_text(&mut viewer, Duration::from_millis(1500)).await, None);
    assert_eq!(hub.state.registry.peer_count(), 1);
}
