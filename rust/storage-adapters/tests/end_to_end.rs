//! Full stack over loopback: server, admission tap, pipeline and typed clients.
//! TLS is off here; handshakes are covered by `mutual_tls`.

mod common;

use std::time::Duration;

use chatroom_adapters::backend::UserRecord;
use chatroom_adapters::client::{
    connect, ChatHistoryClient, RoutingParams, TelemetryClient, UserStoreClient,
};
use chatroom_adapters::config::AdapterKind;
use chatroom_adapters::error::AdapterError;
use common::{memory_config, LoopbackServer, TOKEN};
use tonic::transport::Channel;
use tonic::Code;

struct Running {
    channel: Channel,
    server: LoopbackServer,
}

impl Running {
    async fn stop(self) {
        let Running { channel, server } = self;
        drop(channel);
        server.stop().await;
    }
}

async fn start(kind: AdapterKind) -> Running {
    let mut cfg = memory_config(kind);
    cfg.cache.capacity = 3;
    let tls = cfg.tls.clone();
    let server = LoopbackServer::start(cfg).await;

    let channel = connect(&format!("http://{}", server.addr), &tls, Duration::from_secs(5))
        .await
        .unwrap();
    Running { channel, server }
}

#[tokio::test]
async fn test_chat_history_over_the_wire() {
    let running = start(AdapterKind::Chat).await;
    let routing = RoutingParams::collection("test", "messages");
    let mut client = ChatHistoryClient::new(running.channel.clone(), TOKEN, &routing).unwrap();

    client.write("12:00", "alice", "hi").await.unwrap();
    client.write("12:01", "bob", "hello").await.unwrap();
    let messages = client.read("12:02", 10).await.unwrap();
    let names: Vec<_> = messages.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["alice", "bob"]);
    drop(client);

    let mut intruder = ChatHistoryClient::new(running.channel.clone(), "wrong", &routing).unwrap();
    match intruder.read("12:03", 10).await {
        Err(AdapterError::Rpc(status)) => assert_eq!(status.code(), Code::Unauthenticated),
        other => panic!("expected an rpc error, got {other:?}"),
    }
    drop(intruder);

    running.stop().await;
}

#[tokio::test]
async fn test_users_and_sessions_over_the_wire() {
    let running = start(AdapterKind::Users).await;
    let routing = RoutingParams::collection("chat", "users").with_expiration(30);
    let mut client = UserStoreClient::new(running.channel.clone(), TOKEN, &routing).unwrap();

    client
        .write(UserRecord {
            login: "alice".into(),
            fname: "Alice".into(),
            role: "user".into(),
            ..UserRecord::default()
        })
        .await
        .unwrap();
    let user = client.read("alice").await.unwrap().unwrap();
    assert_eq!(user.fname, "Alice");
    assert_eq!(client.read("nobody").await.unwrap(), None);

    client.add_session("abc", "alice").await.unwrap();
    assert_eq!(client.get_session("abc").await.unwrap().as_deref(), Some("alice"));
    assert_eq!(client.get_session("missing").await.unwrap(), None);
    drop(client);

    running.stop().await;
}

#[tokio::test]
async fn test_telemetry_over_the_wire() {
    let running = start(AdapterKind::Telemetry).await;
    let routing = RoutingParams::table("logs", "access");
    let mut client = TelemetryClient::new(running.channel.clone(), TOKEN, &routing).unwrap();

    for n in 0..4 {
        client.write(&format!("GET /{n}")).await.unwrap();
    }
    // Capacity 3: the fourth write flushed the first three
    let rows = client.read(0).await.unwrap();
    assert_eq!(rows.len(), 3);

    let mut unrouted = TelemetryClient::new(
        running.channel.clone(),
        TOKEN,
        &RoutingParams::collection("logs", "access"),
    )
    .unwrap();
    match unrouted.write("GET /").await {
        Err(AdapterError::Rpc(status)) => {
            assert_eq!(status.code(), Code::NotFound);
            assert_eq!(status.message(), "tablename is not supplied");
        }
        other => panic!("expected an rpc error, got {other:?}"),
    }
    drop((client, unrouted));

    running.stop().await;
}

#[tokio::test]
async fn test_wrong_service_is_unimplemented() {
    let running = start(AdapterKind::Chat).await;
    let mut client = UserStoreClient::new(
        running.channel.clone(),
        TOKEN,
        &RoutingParams::collection("chat", "users").with_expiration(30),
    )
    .unwrap();
    match client.get_session("abc").await {
        Err(err) => assert_eq!(err.code(), Code::Unimplemented),
        Ok(found) => panic!("chat adapter answered a session read: {found:?}"),
    }
    drop(client);
    running.stop().await;
}
