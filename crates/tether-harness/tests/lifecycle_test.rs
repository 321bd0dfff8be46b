//! Connection lifecycle tests: status history, pre-connect behaviour,
//! reconnection, close semantics, and handshake authentication.

use std::time::Duration;

use tether_core::{Client, ClientOptions, ClientState, Error};
use tether_harness::{Broker, BrokerConfig};
use tether_ident::KeyPair;

const SEED: &str = "SUACSSL3UAHUDXKFSNVUZRF5UHPMWZ6BFDTJ7M6USDXIEDNPPQYYYCU3VY";

async fn next_state(stream: &mut tether_core::StatusStream) -> ClientState {
    tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("no state within 5s")
        .expect("status stream ended")
}

#[tokio::test]
async fn status_history_for_connect_then_close() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default());

    let mut stream = client.status_stream();
    assert_eq!(next_state(&mut stream).await, ClientState::Disconnected);

    client.connect(&broker.url()).await.unwrap();
    client.close().await;

    assert_eq!(next_state(&mut stream).await, ClientState::Connecting);
    assert_eq!(next_state(&mut stream).await, ClientState::InfoHandshake);
    assert_eq!(next_state(&mut stream).await, ClientState::Connected);
    assert_eq!(next_state(&mut stream).await, ClientState::Closed);
    assert_eq!(client.status(), ClientState::Closed);
}

#[tokio::test]
async fn subscription_before_connect_installs_after_handshake() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default());

    // Both the subscription and the publish happen before any connection
    // exists; the publish lands in the pre-connect buffer.
    let mut sub = client.subscribe("early.topic").await.unwrap();
    assert!(client.publish_string("early.topic", "buffered").await.unwrap());

    client.connect(&broker.url()).await.unwrap();

    // SUB is re-installed before the buffer flushes, so the buffered
    // publish is observed.
    let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription ended");
    assert_eq!(message.payload_str(), "buffered");

    client.close().await;
}

#[tokio::test]
async fn try_publish_refuses_while_disconnected() {
    let client = Client::new(ClientOptions::default());
    assert!(!client.try_publish("anywhere", &b"x"[..]).await.unwrap());
    client.close().await;
}

#[tokio::test]
async fn pending_buffer_bound_refuses_overflow() {
    let client = Client::new(ClientOptions {
        max_pending_publishes: Some(2),
        ..ClientOptions::default()
    });

    assert!(client.publish_string("a", "1").await.unwrap());
    assert!(client.publish_string("a", "2").await.unwrap());
    assert!(!client.publish_string("a", "3").await.unwrap());

    client.close().await;
}

#[tokio::test]
async fn reconnect_reinstalls_subscriptions() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default().retry(
        true,
        Duration::from_millis(50),
        -1,
    ));
    client.connect(&broker.url()).await.unwrap();

    let mut sub = client.subscribe("durable").await.unwrap();

    let mut stream = client.status_stream();
    broker.sever_connections();

    // Observe the loss and the recovery.
    loop {
        if next_state(&mut stream).await == ClientState::Reconnecting {
            break;
        }
    }
    loop {
        if next_state(&mut stream).await == ClientState::Connected {
            break;
        }
    }

    assert!(client.publish_string("durable", "still here").await.unwrap());
    let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription ended");
    assert_eq!(message.payload_str(), "still here");

    client.close().await;
}

#[tokio::test]
async fn publishes_buffered_during_outage_flush_after_reconnect() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default().retry(
        true,
        Duration::from_millis(50),
        -1,
    ));
    client.connect(&broker.url()).await.unwrap();
    let mut sub = client.subscribe("outage").await.unwrap();

    let mut stream = client.status_stream();
    broker.sever_connections();
    loop {
        if next_state(&mut stream).await == ClientState::Disconnected {
            break;
        }
    }

    // Disconnected now; this publish goes to the buffer and flushes after
    // the subscription is re-installed.
    assert!(client.publish_string("outage", "queued").await.unwrap());

    let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription ended");
    assert_eq!(message.payload_str(), "queued");

    client.close().await;
}

#[tokio::test]
async fn close_mid_request_fails_request_and_releases_mutex() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default());
    client.connect(&broker.url()).await.unwrap();

    let closer = client.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        closer.close().await;
    });

    let result = client
        .request_with_timeout("void", &b"hello"[..], Duration::from_secs(30))
        .await;
    assert!(matches!(result, Err(Error::ConnectionLost) | Err(Error::Closed)));

    // The request mutex must be free again; the next request fails fast
    // with a close error instead of hanging.
    let result = tokio::time::timeout(
        Duration::from_secs(1),
        client.request_with_timeout("void", &b"again"[..], Duration::from_secs(30)),
    )
    .await
    .expect("second request must not hang");
    assert!(result.is_err());
}

#[tokio::test]
async fn transport_loss_mid_request_aborts_with_disconnection() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default().retry(
        true,
        Duration::from_millis(50),
        -1,
    ));
    client.connect(&broker.url()).await.unwrap();

    // Nobody answers on this subject; the request sits waiting on the inbox
    // until the connection goes away underneath it.
    let requester = client.clone();
    let in_flight = tokio::spawn(async move {
        requester.request_with_timeout("void", &b"hello"[..], Duration::from_secs(30)).await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.sever_connections();

    // The loss must surface as a disconnection error right away, not as the
    // request's own 30s timeout.
    let result = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .expect("request must abort on transport loss")
        .expect("request task panicked");
    assert!(matches!(result, Err(Error::ConnectionLost)));

    // After the automatic reconnect the inbox is rebuilt and requests work.
    let mut service = client.subscribe("svc").await.unwrap();
    tokio::spawn(async move {
        if let Some(request) = service.recv().await {
            let _ = request.respond(&b"pong"[..]).await;
        }
    });
    client.wait_until(ClientState::Connected).await;
    let reply = client.request("svc", &b"ping"[..]).await.unwrap();
    assert_eq!(&reply.payload[..], b"pong");

    client.close().await;
}

#[tokio::test]
async fn unsubscribe_twice_is_soft() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default());
    client.connect(&broker.url()).await.unwrap();

    let sub = client.subscribe("once").await.unwrap();
    assert!(client.unsubscribe(&sub).await.unwrap());
    assert!(!client.unsubscribe(&sub).await.unwrap());

    client.close().await;
}

#[tokio::test]
async fn bad_urls_are_rejected() {
    let client = Client::new(ClientOptions::default());
    assert!(matches!(
        client.connect("http://127.0.0.1:4222").await,
        Err(Error::UnsupportedScheme(_))
    ));
    client.close().await;

    let client = Client::new(ClientOptions::default());
    assert!(matches!(client.connect("definitely not a url").await, Err(Error::InvalidUrl(_))));
    client.close().await;
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default());
    client.connect(&broker.url()).await.unwrap();

    assert!(matches!(client.connect(&broker.url()).await, Err(Error::AlreadyConnected)));

    client.close().await;
}

#[tokio::test]
async fn retries_exhausted_surface_the_error() {
    // Grab a port nothing listens on.
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let client = Client::new(ClientOptions {
        connect_timeout: Duration::from_millis(500),
        ..ClientOptions::default().retry(true, Duration::from_millis(20), 1)
    });

    let result = client.connect(&format!("nats://127.0.0.1:{port}")).await;
    assert!(result.is_err());
    assert_eq!(client.status(), ClientState::Disconnected);

    client.close().await;
}

#[tokio::test]
async fn nkey_handshake_signs_the_nonce() {
    let pair = KeyPair::from_seed(SEED).unwrap();
    let broker = Broker::start_with(BrokerConfig {
        require_nkey: Some(pair.public_key()),
        ..BrokerConfig::default()
    })
    .await
    .unwrap();

    let client = Client::new(ClientOptions::default().seed(SEED).verbose(true));
    client.connect(&broker.url()).await.unwrap();

    // Authenticated connection is fully usable.
    let mut sub = client.subscribe("authed").await.unwrap();
    assert!(client.publish_string("authed", "in").await.unwrap());
    let message = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription ended");
    assert_eq!(message.payload_str(), "in");

    client.close().await;
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let pair = KeyPair::from_seed(SEED).unwrap();
    let broker = Broker::start_with(BrokerConfig {
        require_nkey: Some(pair.public_key()),
        ..BrokerConfig::default()
    })
    .await
    .unwrap();

    let mut options = ClientOptions::default().verbose(true);
    options.retry_count = 0;
    let client = Client::new(options);

    let result = client.connect(&broker.url()).await;
    assert!(matches!(result, Err(Error::AuthRejected(_)) | Err(Error::ConnectionLost)));

    client.close().await;
}
