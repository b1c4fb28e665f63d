//! Client operations against the mock master node

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, Mutex};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::{Fault, MAX_VALUE_SIZE, MockServer, config_for};
use okuyama_client::{
    ClientConfig, CompressorId, Error, ErrorKind, FailureKind, OkuyamaClient, Pair, StoreOptions,
    StreamTap, Value,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

fn b64(text: &str) -> String {
    BASE64.encode(text)
}

fn stored_bytes(server: &MockServer, key: &str) -> Vec<u8> {
    let field = server.stored_field(&b64(key)).expect("stored");
    BASE64.decode(field).expect("base64 field")
}

async fn connect(server: &MockServer) -> OkuyamaClient {
    OkuyamaClient::new(config_for(&[server.address()])).expect("client")
}

fn with_config(server: &MockServer, adjust: impl FnOnce(&mut ClientConfig)) -> OkuyamaClient {
    let mut config = config_for(&[server.address()]);
    adjust(&mut config);
    OkuyamaClient::new(config).expect("client")
}

#[tokio::test]
async fn test_set_then_get_text() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    client
        .set("greeting", Value::text("hello"), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(
        client.get("greeting").await.expect("get"),
        Some(Value::text("hello"))
    );
    assert_eq!(stored_bytes(&server, "greeting"), b"hello");
}

#[tokio::test]
async fn test_request_line_layout() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    client
        .set("key", Value::text("value"), &StoreOptions::new())
        .await
        .expect("set");
    client.get("key").await.expect("get");
    client.remove("key").await.expect("remove");

    assert_eq!(
        server.requests(),
        vec!["1,a2V5,(B),0,dmFsdWU=,0,", "2,a2V5", "5,a2V5,0"]
    );
}

#[tokio::test]
async fn test_missing_key_and_empty_value_are_distinct() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    assert_eq!(client.get("nothing").await.expect("get"), None);

    client
        .set("empty", Value::text(""), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(server.stored_field(&b64("empty")).as_deref(), Some(""));
    assert_eq!(client.get("empty").await.expect("get"), Some(Value::text("")));
}

#[tokio::test]
async fn test_null_value_is_rejected_without_io() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    let err = client
        .set("key", None::<Value>, &StoreOptions::new())
        .await
        .expect_err("null");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(server.requests().is_empty());
    assert_eq!(server.accepted(), 0);
}

#[tokio::test]
async fn test_long_values_are_compressed() {
    let server = MockServer::start().await;
    let client = connect(&server).await;
    let text = "okuyama ".repeat(64);

    client
        .set("long", Value::text(text.clone()), &StoreOptions::new())
        .await
        .expect("set");

    let stored = stored_bytes(&server, "long");
    assert_eq!(&stored[..3], &[0xAC, 0xEE, 0x00]);
    assert!(stored.len() < text.len());
    assert_eq!(client.get("long").await.expect("get"), Some(Value::text(text)));
}

#[tokio::test]
async fn test_compression_threshold_and_algorithm_follow_config() {
    let server = MockServer::start().await;
    let client = with_config(&server, |config| {
        config.compression.min_length = 100;
        config.compression.compressor = CompressorId::LZ4;
    });

    let short = "x".repeat(100);
    let long = "x".repeat(101);
    client
        .set("short", Value::text(short.clone()), &StoreOptions::new())
        .await
        .expect("set");
    client
        .set("long", Value::text(long.clone()), &StoreOptions::new())
        .await
        .expect("set");

    assert_eq!(stored_bytes(&server, "short"), short.as_bytes());
    assert_eq!(&stored_bytes(&server, "long")[..3], &[0xAC, 0xEE, 0x02]);
    assert_eq!(client.get("long").await.expect("get"), Some(Value::text(long)));
}

#[tokio::test]
async fn test_compression_disabled() {
    let server = MockServer::start().await;
    let client = with_config(&server, |config| config.compression.enabled = false);
    let text = "z".repeat(500);

    client
        .set("plain", Value::text(text.clone()), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(stored_bytes(&server, "plain"), text.as_bytes());
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    visits: u32,
}

#[tokio::test]
async fn test_object_round_trip() {
    let server = MockServer::start().await;
    let client = connect(&server).await;
    let session = Session {
        user: "alice".into(),
        visits: 3,
    };

    client
        .set(
            "session",
            Value::object(&session).expect("serialize"),
            &StoreOptions::new(),
        )
        .await
        .expect("set");
    assert_eq!(&stored_bytes(&server, "session")[..2], &[0xAC, 0xED]);

    let value = client.get("session").await.expect("get").expect("present");
    assert!(matches!(value, Value::Object(_)));
    assert_eq!(value.deserialize::<Session>().expect("deserialize"), session);
}

#[tokio::test]
async fn test_binary_value_round_trip() {
    let server = MockServer::start().await;
    let client = connect(&server).await;
    let bytes = vec![0xFF, 0xFE, 0x00, 0x80];

    client
        .set("blob", Value::Bytes(bytes.clone()), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(client.get("blob").await.expect("get"), Some(Value::Bytes(bytes)));
}

#[tokio::test]
async fn test_serialized_strings_mode() {
    let server = MockServer::start().await;
    let client = with_config(&server, |config| config.encoding.serialize_strings = true);

    client
        .set("text", Value::text("hi"), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(&stored_bytes(&server, "text")[..2], &[0xAC, 0xED]);
    assert_eq!(client.get("text").await.expect("get"), Some(Value::text("hi")));
}

#[tokio::test]
async fn test_reads_value_written_by_other_client() {
    let server = MockServer::start().await;
    let client = connect(&server).await;
    server.insert_field(&b64("legacy"), &b64("written elsewhere"));

    assert_eq!(
        client.get("legacy").await.expect("get"),
        Some(Value::text("written elsewhere"))
    );
}

#[tokio::test]
async fn test_raw_key_mode() {
    let server = MockServer::start().await;
    let client = with_config(&server, |config| config.encoding.base64_keys = false);

    client
        .set("plain-key", Value::text("v"), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(client.get("plain-key").await.expect("get"), Some(Value::text("v")));
    assert_eq!(server.requests()[1], "2,plain-key");

    let err = client.get("a,b").await.expect_err("separator in raw key");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_add_only_when_absent() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    assert!(
        client
            .add("counter", Value::text("1"), &StoreOptions::new())
            .await
            .expect("add")
    );
    assert!(
        !client
            .add("counter", Value::text("2"), &StoreOptions::new())
            .await
            .expect("add")
    );
    assert_eq!(client.get("counter").await.expect("get"), Some(Value::text("1")));
}

#[tokio::test]
async fn test_remove_returns_previous_value() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    client
        .set("gone", Value::text("bye"), &StoreOptions::new())
        .await
        .expect("set");
    assert_eq!(
        client.remove("gone").await.expect("remove"),
        Some(Value::text("bye"))
    );
    assert_eq!(client.get("gone").await.expect("get"), None);
    assert_eq!(client.remove("gone").await.expect("remove"), None);
}

#[tokio::test]
async fn test_versioned_write_detects_conflict() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    client
        .set("doc", Value::text("v1"), &StoreOptions::new())
        .await
        .expect("set");
    let current = client
        .get_versioned("doc")
        .await
        .expect("get_versioned")
        .expect("present");
    assert_eq!(current.value(), &Value::text("v1"));

    client
        .set_versioned("doc", Value::text("v2"), current.version(), &StoreOptions::new())
        .await
        .expect("first writer wins");

    let err = client
        .set_versioned("doc", Value::text("v3"), current.version(), &StoreOptions::new())
        .await
        .expect_err("stale version");
    assert!(matches!(err, Error::VersionConflict(_)));
    assert_eq!(err.kind(), ErrorKind::VersionConflict);
    assert_eq!(client.get("doc").await.expect("get"), Some(Value::text("v2")));

    assert_eq!(client.get_versioned("missing").await.expect("get"), None);
}

#[tokio::test]
async fn test_tag_queries() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    client
        .set("a", Value::text("1"), &StoreOptions::new().tag("fruit"))
        .await
        .expect("set");
    client
        .set("b", Value::text("2"), &StoreOptions::new().tags(["fruit", "red"]))
        .await
        .expect("set");
    client
        .set("c", Value::text("3"), &StoreOptions::new())
        .await
        .expect("set");

    assert_eq!(
        client.get_tag_keys("fruit", false).await.expect("tag keys"),
        vec!["a", "b"]
    );
    assert_eq!(
        client.get_tag_keys("red", true).await.expect("tag keys"),
        vec!["b"]
    );
    assert!(
        client
            .get_tag_keys("unused", false)
            .await
            .expect("tag keys")
            .is_empty()
    );
    assert!(server.requests().contains(&format!("3,{},true", b64("red"))));

    assert_eq!(
        client.get_pairs_by_tag("fruit").await.expect("pairs"),
        vec![
            Pair {
                key: "a".into(),
                value: Value::text("1")
            },
            Pair {
                key: "b".into(),
                value: Value::text("2")
            },
        ]
    );
    assert!(
        client
            .get_pairs_by_tag("unused")
            .await
            .expect("pairs")
            .is_empty()
    );
}

#[tokio::test]
async fn test_multi_get_skips_missing_keys() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    client
        .set("k1", Value::text("one"), &StoreOptions::new())
        .await
        .expect("set");
    client
        .set("k3", Value::text("three"), &StoreOptions::new())
        .await
        .expect("set");

    let values = client
        .get_multi(&["k1", "k2", "k3"])
        .await
        .expect("multi get");
    assert_eq!(values, vec![Value::text("one"), Value::text("three")]);

    // Connection is still usable after the END line
    assert_eq!(client.get("k1").await.expect("get"), Some(Value::text("one")));
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn test_init_client_and_version() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    assert_eq!(client.max_value_size(), None);
    assert_eq!(
        client.init_client().await.expect("init"),
        MAX_VALUE_SIZE as u64
    );
    assert_eq!(client.max_value_size(), Some(MAX_VALUE_SIZE as u64));
    assert_eq!(client.master_node_version().await.expect("version"), "0.9.6");
}

#[tokio::test]
async fn test_oversized_value_rejected_locally_after_init() {
    let server = MockServer::start().await;
    let client = with_config(&server, |config| config.compression.enabled = false);
    client.init_client().await.expect("init");

    let err = client
        .set("huge", Value::Bytes(vec![7; 2_000_000]), &StoreOptions::new())
        .await
        .expect_err("too large");
    assert!(matches!(
        err,
        Error::Operation {
            kind: FailureKind::ValueTooLarge,
            ..
        }
    ));
    assert_eq!(server.requests(), vec!["0"]);
}

#[tokio::test]
async fn test_server_failures_are_classified() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    server.inject(Fault::Reply("1,false,NG:Max Data Size Over\n".into()));
    let err = client
        .set("k", Value::text("v"), &StoreOptions::new())
        .await
        .expect_err("rejected");
    assert!(matches!(
        err,
        Error::Operation {
            kind: FailureKind::ValueTooLarge,
            ..
        }
    ));

    server.inject(Fault::Reply("2,false,NG:Key Length Error\n".into()));
    let err = client.get("k").await.expect_err("rejected");
    assert!(matches!(
        err,
        Error::Operation {
            kind: FailureKind::KeyTooLong,
            ..
        }
    ));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_version_banner_without_prefix_is_rejected() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    server.inject(Fault::Reply("999,okuyama\n".into()));
    let err = client.master_node_version().await.expect_err("bad banner");
    assert_eq!(err.kind(), ErrorKind::Operation);
}

#[tokio::test]
async fn test_connection_reused_across_operations() {
    let server = MockServer::start().await;
    let client = connect(&server).await;

    for i in 0..5 {
        client
            .set(&format!("k{i}"), Value::text("v"), &StoreOptions::new())
            .await
            .expect("set");
    }
    assert_eq!(server.accepted(), 1);
    let stats = client.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.peak, 1);
}

#[derive(Debug, Default)]
struct CapturingTap {
    outbound: Mutex<Vec<u8>>,
    inbound: Mutex<Vec<u8>>,
}

impl StreamTap for CapturingTap {
    fn outbound(&self, _peer: &str, bytes: &[u8]) {
        self.outbound.lock().unwrap().extend_from_slice(bytes);
    }

    fn inbound(&self, _peer: &str, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend_from_slice(bytes);
    }
}

#[tokio::test]
async fn test_tap_mirrors_wire_bytes() {
    let server = MockServer::start().await;
    let tap = Arc::new(CapturingTap::default());
    let client = OkuyamaClient::builder(config_for(&[server.address()]))
        .tap(tap.clone())
        .build()
        .expect("client");

    client.get("key").await.expect("get");
    assert_eq!(tap.outbound.lock().unwrap().as_slice(), b"2,a2V5\n");
    assert_eq!(tap.inbound.lock().unwrap().as_slice(), b"2,false,\n");
}
