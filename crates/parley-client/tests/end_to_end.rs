//! Full client/server exchanges over real TCP on loopback.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use parley_api::AppStateInner;
use parley_api::session::DEFAULT_IDLE_DAYS;
use parley_client::{ClientError, ProtocolClient};
use parley_crypto::{KeyManager, PasswordHasher};
use parley_db::Database;
use parley_gateway::ActionDispatcher;
use parley_gateway::codec::DEFAULT_MAX_FRAME_BYTES;
use parley_types::wire::WireResponse;

async fn start_server() -> SocketAddr {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let state = Arc::new(AppStateInner::new(
        db,
        chrono::Duration::days(DEFAULT_IDLE_DAYS),
        PasswordHasher::default(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(parley_gateway::serve(
        listener,
        ActionDispatcher::new(state),
        DEFAULT_MAX_FRAME_BYTES,
    ));
    addr
}

async fn client(addr: SocketAddr) -> ProtocolClient {
    ProtocolClient::connect_to(addr, DEFAULT_MAX_FRAME_BYTES)
        .await
        .unwrap()
}

async fn registered(addr: SocketAddr, name: &str) -> ProtocolClient {
    let client = client(addr).await;
    client
        .register(name, &format!("{name}@x.com"), "pw1")
        .await
        .unwrap();
    client
}

fn user_id(client: &ProtocolClient) -> String {
    client.current_user().unwrap().id
}

fn rejection(err: ClientError) -> String {
    match err.rejection() {
        Some(msg) => msg.to_string(),
        None => panic!("expected a rejection, got {:?}", err),
    }
}

/// RSA generation is slow; one keypair per identity for the whole suite.
fn bob_keys() -> Arc<KeyManager> {
    static KEYS: OnceLock<Arc<KeyManager>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyManager::generate().unwrap()))
        .clone()
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let addr = start_server().await;
    let first = client(addr).await;
    first.register("alice", "alice@x.com", "pw1").await.unwrap();

    let second = client(addr).await;
    let err = second
        .register("alice", "other@x.com", "pw1")
        .await
        .unwrap_err();
    assert_eq!(rejection(err), "Username already exists");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let addr = start_server().await;
    registered(addr, "alice").await;

    let client = client(addr).await;
    let err = client.login("alice", "wrong").await.unwrap_err();
    assert_eq!(rejection(err), "Invalid username or password");
    assert!(client.session().is_none());

    let user = client.login("alice", "pw1").await.unwrap();
    assert_eq!(user.username, "alice");
}

#[tokio::test]
async fn channel_membership_gates_posting() {
    let addr = start_server().await;
    let alice = registered(addr, "alice").await;
    let bob = registered(addr, "bob").await;
    let carol = registered(addr, "carol").await;

    let channel = alice
        .create_channel("team", "", &[user_id(&bob)])
        .await
        .unwrap();
    assert!(channel.has_member(&user_id(&alice)));
    assert!(channel.has_member(&user_id(&bob)));

    bob.send_channel_message(&channel.id, "hello team")
        .await
        .unwrap();
    let err = carol
        .send_channel_message(&channel.id, "let me in")
        .await
        .unwrap_err();
    assert_eq!(rejection(err), "user is not a member of this channel");

    let history = alice.get_channel_messages(&channel.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hello team");

    let channels = bob.get_user_channels().await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "team");
}

#[tokio::test]
async fn direct_messages_are_private() {
    let addr = start_server().await;
    let alice = registered(addr, "alice").await;
    let bob = registered(addr, "bob").await;
    let dave = registered(addr, "dave").await;

    alice.send_message(&user_id(&bob), "hi bob").await.unwrap();

    let for_bob = bob.get_messages(&user_id(&alice), None).await.unwrap();
    assert_eq!(for_bob.len(), 1);
    assert_eq!(for_bob[0].content, "hi bob");
    assert_eq!(for_bob[0].sender_id, user_id(&alice));

    let for_dave = dave.get_messages(&user_id(&alice), None).await.unwrap();
    assert!(for_dave.is_empty());

    let recent = bob.get_recent_messages(Some(10)).await.unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn encrypted_message_round_trips_opaquely() {
    let addr = start_server().await;
    let alice = registered(addr, "alice").await;
    let bob = client(addr).await.with_keys(bob_keys());
    bob.register("bob", "bob@x.com", "pw1").await.unwrap();
    bob.publish_public_key().await.unwrap();

    let bob_id = user_id(&bob);
    let sent = alice
        .send_encrypted_message(&bob_id, "the eagle has landed")
        .await
        .unwrap();
    assert!(sent.encrypted);
    assert!(!sent.content.contains("eagle"));

    let received = bob.get_messages(&user_id(&alice), None).await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].encrypted);
    assert!(received[0].is_direct());
    assert_eq!(
        bob.decrypt_message(&received[0]).unwrap(),
        "the eagle has landed"
    );

    // Alice has no private key for Bob's envelope.
    assert!(matches!(
        alice.decrypt_message(&received[0]),
        Err(ClientError::Crypto(_))
    ));
}

#[tokio::test]
async fn cached_session_resumes_on_a_new_connection() {
    let addr = start_server().await;
    let alice = registered(addr, "alice").await;
    let cached = alice.session().unwrap();

    let resumed = client(addr).await;
    resumed.resume(cached).unwrap();
    assert!(resumed.get_user_channels().await.unwrap().is_empty());

    alice.logout().await.unwrap();
    assert!(alice.session().is_none());

    let err = resumed.get_user_channels().await.unwrap_err();
    assert_eq!(rejection(err), "Invalid session");
    assert!(resumed.session().is_none());
}

#[tokio::test]
async fn abandoned_call_does_not_shift_later_replies() {
    let addr = start_server().await;
    let alice = registered(addr, "alice").await;

    // A zero deadline drops the call after the request is written but
    // before its reply is read.
    let _ = tokio::time::timeout(Duration::ZERO, alice.login("alice", "pw1")).await;

    assert!(alice.get_user_channels().await.unwrap().is_empty());
    let found = alice.find_user("alice").await.unwrap();
    assert_eq!(found.id, user_id(&alice));
}

#[tokio::test]
async fn protected_calls_need_a_login() {
    let addr = start_server().await;
    let client = client(addr).await;
    assert!(matches!(
        client.get_user_channels().await,
        Err(ClientError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn malformed_frames_do_not_end_the_connection() {
    let addr = start_server().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"{not json}\n").await.unwrap();
    let reply: WireResponse =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("Invalid request format"));

    write
        .write_all(b"{\"action\":\"get_recent_messages\",\"limit\":5}\n")
        .await
        .unwrap();
    let reply: WireResponse =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply.error.as_deref(), Some("Authentication required"));
}

#[tokio::test]
async fn concurrent_clients_are_independent() {
    let addr = start_server().await;
    let bob = Arc::new(registered(addr, "bob").await);
    let bob_id = user_id(&bob);

    let senders: Vec<_> = (0..8)
        .map(|i| {
            let bob_id = bob_id.clone();
            tokio::spawn(async move {
                let sender = registered(addr, &format!("user{i}")).await;
                sender.send_message(&bob_id, &format!("hello {i}")).await.unwrap();
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap();
    }

    let recent = bob.get_recent_messages(None).await.unwrap();
    assert_eq!(recent.len(), 8);
}
