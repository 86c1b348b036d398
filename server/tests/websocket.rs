//! End-to-End-Test ueber echte WebSocket-Verbindungen

use callrelay_server::{config::ServerConfig, Server};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn relay_starten() -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    relay_starten_mit(ServerConfig::default()).await
}

async fn relay_starten_mit(
    mut config: ServerConfig,
) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    config.observability.aktiviert = false;
    config.netzwerk.bind_adresse = "127.0.0.1".into();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        Server::neu(config)
            .ausfuehren(listener, shutdown_rx)
            .await
            .expect("Relay fehlgeschlagen");
    });
    (addr, shutdown_tx, task)
}

async fn verbinden(addr: SocketAddr, user: &str) -> Client {
    let url = format!("ws://{addr}/ws?userId={user}");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("WebSocket-Verbindung fehlgeschlagen");
    ws
}

/// Naechster Text-Frame als JSON
async fn naechstes(ws: &mut Client) -> Value {
    let ergebnis = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = ws.next().await {
            if let Message::Text(text) = frame.expect("Lesefehler") {
                return serde_json::from_str::<Value>(&text).expect("kein JSON");
            }
        }
        panic!("Verbindung geschlossen");
    })
    .await;
    ergebnis.expect("Timeout beim Warten auf ein Event")
}

/// Liest Frames bis ein Event mit dem Namen kommt (andere werden uebersprungen)
async fn warten_auf(ws: &mut Client, event: &str) -> Value {
    loop {
        let wert = naechstes(ws).await;
        if wert["event"] == event {
            return wert;
        }
    }
}

async fn senden(ws: &mut Client, wert: Value) {
    ws.send(Message::Text(wert.to_string())).await.unwrap();
}

#[tokio::test]
async fn anruf_ueber_websocket() {
    let (addr, shutdown_tx, task) = relay_starten().await;

    let mut alice = verbinden(addr, "alice").await;
    let ready = warten_auf(&mut alice, "session:ready").await;
    assert_eq!(ready["data"]["userId"], "alice");

    let mut bob = verbinden(addr, "bob").await;
    let ready = warten_auf(&mut bob, "session:ready").await;
    assert_eq!(ready["data"]["onlineUsers"], json!(["alice", "bob"]));

    senden(
        &mut alice,
        json!({"event": "call:invite", "data": {"calleeUserId": "bob"}}),
    )
    .await;
    let incoming = warten_auf(&mut bob, "call:incoming").await;
    assert_eq!(incoming["data"]["callerUserId"], "alice");
    let sid = incoming["data"]["sessionId"].as_str().unwrap().to_string();

    let state = warten_auf(&mut alice, "call:state").await;
    assert_eq!(state["data"]["state"], "calling");

    senden(&mut bob, json!({"event": "call:ring", "data": {"sessionId": sid}})).await;
    let state = warten_auf(&mut alice, "call:state").await;
    assert_eq!(state["data"]["state"], "ringing");

    senden(&mut bob, json!({"event": "call:accept", "data": {"sessionId": sid}})).await;
    let state = warten_auf(&mut alice, "call:state").await;
    assert_eq!(state["data"]["state"], "connecting");
    let state = warten_auf(&mut bob, "call:state").await;
    assert_eq!(state["data"]["state"], "connecting");

    let angebot = json!({"type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0"});
    senden(
        &mut alice,
        json!({"event": "call:signal", "data": {"sessionId": sid, "payload": angebot}}),
    )
    .await;
    let signal = warten_auf(&mut bob, "call:signal").await;
    assert_eq!(signal["data"]["payload"], angebot);

    // Bob schliesst den Tab
    bob.close(None).await.unwrap();
    // Reihenfolge von call:state und presence:online ist nicht festgelegt
    let mut gescheitert = false;
    let mut allein = false;
    while !(gescheitert && allein) {
        let wert = naechstes(&mut alice).await;
        match wert["event"].as_str() {
            Some("call:state") => {
                assert_eq!(wert["data"]["state"], "failed");
                assert_eq!(wert["data"]["reason"], "peer_disconnected");
                gescheitert = true;
            }
            Some("presence:online") => {
                allein = wert["data"]["userIds"] == json!(["alice"]);
            }
            _ => {}
        }
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("Relay hat nicht rechtzeitig beendet")
        .unwrap();
}

#[tokio::test]
async fn fehler_geht_nur_an_ausloeser() {
    let (addr, shutdown_tx, task) = relay_starten().await;

    let mut alice = verbinden(addr, "alice").await;
    warten_auf(&mut alice, "session:ready").await;

    senden(
        &mut alice,
        json!({"event": "call:invite", "data": {"calleeUserId": "niemand"}}),
    )
    .await;
    let fehler = warten_auf(&mut alice, "call:error").await;
    assert_eq!(fehler["data"]["code"], "USER_OFFLINE");

    // Unlesbares JSON haelt die Verbindung offen
    alice.send(Message::Text("{kaputt".into())).await.unwrap();
    senden(
        &mut alice,
        json!({"event": "call:hangup", "data": {"sessionId": "00000000-0000-0000-0000-000000000000"}}),
    )
    .await;
    let fehler = warten_auf(&mut alice, "call:error").await;
    assert_eq!(fehler["data"]["code"], "UNKNOWN_SESSION");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("Relay hat nicht rechtzeitig beendet")
        .unwrap();
}

#[tokio::test]
async fn zu_grosse_nachricht_trennt_im_transport() {
    let mut config = ServerConfig::default();
    config.netzwerk.max_nachricht_groesse = 1024;
    let (addr, shutdown_tx, task) = relay_starten_mit(config).await;

    let mut alice = verbinden(addr, "alice").await;
    warten_auf(&mut alice, "session:ready").await;

    let riesig = format!(
        r#"{{"event":"call:invite","data":{{"calleeUserId":"{}"}}}}"#,
        "x".repeat(8 * 1024)
    );
    // Senden kann schon scheitern, wenn der Server zuerst schliesst
    let _ = alice.send(Message::Text(riesig)).await;

    let ende = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match alice.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ende.is_ok(), "Verbindung haette getrennt werden muessen");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("Relay hat nicht rechtzeitig beendet")
        .unwrap();
}
