//! End-to-end tests: real client against the in-process broker over TCP.

use std::time::Duration;

use bytes::Bytes;
use tether_core::{Client, ClientOptions, Error, HeaderMap, Message, Subscription};
use tether_harness::Broker;

async fn recv_timeout(sub: &mut Subscription) -> Message {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("no message within 5s")
        .expect("subscription ended")
}

async fn connected_client(broker: &Broker) -> Client {
    let client = Client::new(ClientOptions::default());
    client.connect(&broker.url()).await.expect("connect");
    client
}

#[tokio::test]
async fn echo_round_trip() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut sub = client.subscribe("subject1").await.unwrap();
    assert!(client.publish_string("subject1", "message1").await.unwrap());

    let message = recv_timeout(&mut sub).await;
    assert_eq!(message.subject, "subject1");
    assert_eq!(message.payload_str(), "message1");

    client.close().await;
}

#[tokio::test]
async fn binary_payload_with_delimiters() {
    let payload: &[u8] = &[
        0x01, 0x0A, 0x03, 0x0D, 0x0A, 0x0D, 0x82, 0x01, 0x0A, 0x03, 0x0D, 0x0A, 0x0D, 0x82,
    ];

    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut sub = client.subscribe("bin").await.unwrap();
    assert!(client.publish("bin", Bytes::copy_from_slice(payload)).await.unwrap());

    let message = recv_timeout(&mut sub).await;
    assert_eq!(&message.payload[..], payload);

    client.close().await;
}

#[tokio::test]
async fn large_payload_round_trips() {
    let payload: Vec<u8> = (0..5120u32).map(|i| (i % 256) as u8).collect();

    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut sub = client.subscribe("large").await.unwrap();
    assert!(client.publish("large", payload.clone()).await.unwrap());

    let message = recv_timeout(&mut sub).await;
    assert_eq!(message.payload.len(), 5120);
    assert_eq!(&message.payload[..], &payload[..]);

    client.close().await;
}

#[tokio::test]
async fn wildcard_delivers_in_order() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut sub = client.subscribe("subject1.*").await.unwrap();
    assert!(client.publish_string("subject1.1", "first").await.unwrap());
    assert!(client.publish_string("subject1.2", "second").await.unwrap());

    let first = recv_timeout(&mut sub).await;
    let second = recv_timeout(&mut sub).await;
    assert_eq!((first.subject.as_str(), first.payload_str().as_ref()), ("subject1.1", "first"));
    assert_eq!((second.subject.as_str(), second.payload_str().as_ref()), ("subject1.2", "second"));

    client.close().await;
}

#[tokio::test]
async fn headers_round_trip_over_the_wire() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/octet-stream");
    headers.append("trace", "hop:1");
    headers.append("trace", "hop:2");

    let mut sub = client.subscribe("headed").await.unwrap();
    assert!(client.publish_with_headers("headed", headers.clone(), &b"body"[..]).await.unwrap());

    let message = recv_timeout(&mut sub).await;
    assert_eq!(&message.payload[..], b"body");
    let got = message.headers.expect("headers present");
    assert_eq!(got, headers);
    assert_eq!(got.get("content-type"), Some("application/octet-stream"));
    assert_eq!(got.get_all("trace").collect::<Vec<_>>(), vec!["hop:1", "hop:2"]);

    client.close().await;
}

#[tokio::test]
async fn queue_group_delivers_each_message_once() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut member_a = client.subscribe_queue("jobs", "workers").await.unwrap();
    let mut member_b = client.subscribe_queue("jobs", "workers").await.unwrap();

    for i in 0..5 {
        assert!(client.publish_string("jobs", format!("job-{i}")).await.unwrap());
    }

    // All five arrive exactly once across the group.
    let mut total = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while total < 5 {
        tokio::select! {
            Some(_) = member_a.recv() => total += 1,
            Some(_) = member_b.recv() => total += 1,
            () = tokio::time::sleep_until(deadline) => panic!("only {total} of 5 delivered"),
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(member_a.try_recv().is_none());
    assert!(member_b.try_recv().is_none());

    client.close().await;
}

#[tokio::test]
async fn verbose_mode_acks_publishes() {
    let broker = Broker::start().await.unwrap();
    let client = Client::new(ClientOptions::default().verbose(true));
    client.connect(&broker.url()).await.unwrap();

    let mut sub = client.subscribe("acked").await.unwrap();
    for i in 0..10 {
        assert!(client.publish_string("acked", format!("m{i}")).await.unwrap());
    }
    for i in 0..10 {
        let message = recv_timeout(&mut sub).await;
        assert_eq!(message.payload_str(), format!("m{i}"));
    }

    client.close().await;
}

#[tokio::test]
async fn request_reply_round_trip() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut service = client.subscribe("svc.echo").await.unwrap();
    tokio::spawn(async move {
        while let Some(request) = service.recv().await {
            let mut reply = request.payload.to_vec();
            reply.reverse();
            let _ = request.respond(reply).await;
        }
    });

    let reply = client.request("svc.echo", &b"abc"[..]).await.unwrap();
    assert_eq!(&reply.payload[..], b"cba");

    // The shared inbox serves consecutive requests too.
    let reply = client.request("svc.echo", &b"tether"[..]).await.unwrap();
    assert_eq!(&reply.payload[..], b"rehtet");

    client.close().await;
}

#[tokio::test]
async fn request_times_out_without_responder() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let result = client
        .request_with_timeout("nobody.home", &b"hello"[..], Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(Error::RequestTimeout)));

    // The request mutex was released; a served request still works.
    let mut service = client.subscribe("svc").await.unwrap();
    tokio::spawn(async move {
        if let Some(request) = service.recv().await {
            let _ = request.respond(&b"pong"[..]).await;
        }
    });
    let reply = client.request("svc", &b"ping"[..]).await.unwrap();
    assert_eq!(&reply.payload[..], b"pong");

    client.close().await;
}

#[tokio::test]
async fn typed_decoder_end_to_end() {
    let broker = Broker::start().await.unwrap();
    let options = ClientOptions::default().decoder::<String, _>(|bytes| {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::DecodeFailed(e.to_string()))
    });
    let client = Client::new(options);
    client.connect(&broker.url()).await.unwrap();

    let mut sub = client.subscribe("typed").await.unwrap();
    assert!(client.publish_string("typed", "decoded!").await.unwrap());

    let message = recv_timeout(&mut sub).await;
    let text: String = message.decode().unwrap();
    assert_eq!(text, "decoded!");

    // Raw bytes always decode; unregistered types never do.
    let raw: Vec<u8> = message.decode().unwrap();
    assert_eq!(raw, b"decoded!");
    assert!(matches!(message.decode::<u64>(), Err(Error::NoDecoder(_))));

    client.close().await;
}

#[tokio::test]
async fn ping_measures_round_trip() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let latency = client.ping().await.unwrap();
    assert!(latency < Duration::from_secs(5));

    client.close().await;
}

#[tokio::test]
async fn server_info_and_max_payload_surfaced() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let info = client.server_info().expect("INFO received");
    assert_eq!(info.server_id, "tether-harness");
    assert_eq!(client.max_payload(), Some(1_048_576));

    client.close().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let broker = Broker::start().await.unwrap();
    let client = connected_client(&broker).await;

    let mut keep = client.subscribe("topic").await.unwrap();
    let gone = client.subscribe("topic").await.unwrap();

    assert!(client.unsubscribe(&gone).await.unwrap());
    assert!(client.publish_string("topic", "after-unsub").await.unwrap());

    let message = recv_timeout(&mut keep).await;
    assert_eq!(message.payload_str(), "after-unsub");

    // The removed subscription's sid is unknown to the broker now; nothing
    // should have been routed to it.
    let mut gone = gone;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gone.try_recv().is_none());

    client.close().await;
}
