//! End-to-end retry and session behavior of the request pipeline
//!
//! Every test drives a real client against the scripted [`MockTransport`],
//! with tokio's clock paused so retry delays complete instantly.

mod common;

use assert_matches::assert_matches;
use bytes::Bytes;
use common::mock_transport::{MockReply, MockTransport};
use common::{COLLECTION, COLLECTION_PATH, DOCS_PATH, collection_body, topology_body};
use docdb::config::{EndpointDiscoveryOptions, ThrottleOptions};
use docdb::constants::headers;
use docdb::{
    AbortHandle, BodyStream, ConsistencyLevel, Error, OperationKind, RequestOptions, ResourceType, RetryOptions,
    ServiceRequest,
};
use docdb_transport::ByteStream;
use http::{Method, StatusCode};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;

const DOC_LINK: &str = "dbs/app/colls/orders/docs/1";
const DOC_PATH: &str = "/dbs/app/colls/orders/docs/1";

fn order() -> JsonValue {
    json!({"id": "1", "tenant": "acme", "total": 42})
}

fn pinned() -> RequestOptions {
    RequestOptions::default().with_partition_key("acme")
}

fn throttle_limit(max_attempts: u32) -> RetryOptions {
    RetryOptions {
        throttle: ThrottleOptions {
            max_attempts,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_partition_key_mismatch_refreshes_collection_once() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            COLLECTION_PATH,
            vec![
                MockReply::json(200, collection_body("/region")),
                MockReply::json(200, collection_body("/tenant")),
            ],
        )
        .await;
    transport
        .on(
            Method::POST,
            DOCS_PATH,
            vec![
                MockReply::error(400, Some(1001), "Partition key mismatch"),
                MockReply::json(201, order()),
            ],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let response = client
        .create_document(COLLECTION, &order(), RequestOptions::default())
        .await
        .expect("create should succeed after one refresh");
    assert_eq!(response.status(), StatusCode::CREATED);

    let posts = transport.sent_to(Method::POST, DOCS_PATH).await;
    assert_eq!(posts.len(), 2);
    // stale definition: the document has no "region" property
    assert_eq!(posts[0].header(headers::PARTITION_KEY), Some("[{}]"));
    assert_eq!(posts[1].header(headers::PARTITION_KEY), Some(r#"["acme"]"#));

    // initial load plus exactly one refresh
    assert_eq!(transport.sent_to(Method::GET, COLLECTION_PATH).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_partition_key_mismatch_surfaces() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, COLLECTION_PATH, vec![MockReply::json(200, collection_body("/tenant"))])
        .await;
    transport
        .on(
            Method::POST,
            DOCS_PATH,
            vec![MockReply::error(400, Some(1001), "Partition key mismatch")],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let err = client
        .upsert_document(COLLECTION, &order(), RequestOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert_eq!(err.sub_status(), Some(1001));
    assert_eq!(transport.sent_to(Method::POST, DOCS_PATH).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pinned_partition_key_is_not_retried() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::POST,
            DOCS_PATH,
            vec![MockReply::error(400, Some(1001), "Partition key mismatch")],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let err = client.create_document(COLLECTION, &order(), pinned()).await.unwrap_err();

    assert_eq!(err.sub_status(), Some(1001));
    assert_eq!(transport.sent_to(Method::POST, DOCS_PATH).await.len(), 1);
    assert!(transport.sent_to(Method::GET, COLLECTION_PATH).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_token_follows_latest_response() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![
                MockReply::json(200, order()).with_session_token("0:1#10"),
                MockReply::json(200, order()).with_session_token("0:1#12"),
                MockReply::json(200, order()).with_session_token("0:1#12"),
            ],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    for _ in 0..3 {
        let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    }

    let reads = transport.sent_to(Method::GET, DOC_PATH).await;
    assert_eq!(reads[0].header(headers::SESSION_TOKEN), None);
    assert_eq!(reads[1].header(headers::SESSION_TOKEN), Some("0:1#10"));
    assert_eq!(reads[2].header(headers::SESSION_TOKEN), Some("0:1#12"));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_session_token_wins() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![MockReply::json(200, order()).with_session_token("0:1#10")],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    let _: JsonValue = client
        .read_document(DOC_LINK, pinned().with_session_token("0:1#3"))
        .await
        .unwrap();

    let reads = transport.sent_to(Method::GET, DOC_PATH).await;
    assert_eq!(reads[1].header(headers::SESSION_TOKEN), Some("0:1#3"));
}

#[tokio::test(start_paused = true)]
async fn test_no_session_token_outside_session_consistency() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![MockReply::json(200, order()).with_session_token("0:1#10")],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    let _: JsonValue = client
        .read_document(DOC_LINK, pinned().with_consistency_level(ConsistencyLevel::Eventual))
        .await
        .unwrap();

    let reads = transport.sent_to(Method::GET, DOC_PATH).await;
    assert_eq!(reads[1].header(headers::SESSION_TOKEN), None);
    assert_eq!(reads[1].header(headers::CONSISTENCY_LEVEL), Some("Eventual"));
}

#[tokio::test(start_paused = true)]
async fn test_collection_delete_clears_session_tokens() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![MockReply::json(200, order()).with_session_token("0:1#10")],
        )
        .await;
    transport
        .on(Method::DELETE, COLLECTION_PATH, vec![MockReply::status(204)])
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    client.delete_collection(COLLECTION).await.unwrap();
    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();

    let reads = transport.sent_to(Method::GET, DOC_PATH).await;
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[1].header(headers::SESSION_TOKEN), None);
}

#[tokio::test(start_paused = true)]
async fn test_throttling_stops_at_max_attempts() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, DOC_PATH, vec![MockReply::throttled(Duration::from_millis(10))])
        .await;
    let client = common::client(&transport, throttle_limit(4));

    let err = client.read_document::<JsonValue>(DOC_LINK, pinned()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_matches!(err, Error::Service(_));
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_throttle_hint_is_respected() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![
                MockReply::throttled(Duration::from_millis(500)),
                MockReply::json(200, order()),
            ],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let start = tokio::time::Instant::now();
    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_safety_ceiling_bounds_retries() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, DOC_PATH, vec![MockReply::throttled(Duration::from_millis(1))])
        .await;
    let retry = RetryOptions {
        safety_ceiling: 3,
        ..throttle_limit(50)
    };
    let client = common::client(&transport, retry);

    let err = client.read_document::<JsonValue>(DOC_LINK, pinned()).await.unwrap_err();

    assert_matches!(err, Error::RetriesExhausted { attempts: 3, .. });
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_stacked_layers_share_the_ceiling() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, COLLECTION_PATH, vec![MockReply::json(200, collection_body("/tenant"))])
        .await;
    transport
        .on(
            Method::POST,
            DOCS_PATH,
            vec![
                MockReply::throttled(Duration::from_millis(1)),
                MockReply::error(400, Some(1001), "Partition key mismatch"),
                MockReply::throttled(Duration::from_millis(1)),
            ],
        )
        .await;
    let retry = RetryOptions {
        safety_ceiling: 4,
        ..Default::default()
    };
    let client = common::client(&transport, retry);

    let err = client
        .create_document(COLLECTION, &order(), RequestOptions::default())
        .await
        .unwrap_err();

    assert_matches!(err, Error::RetriesExhausted { .. });
    // throttle counting restarted with the re-run, the last 429 stays reachable
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(transport.sent_to(Method::POST, DOCS_PATH).await.len(), 4);
}

#[rstest::rstest]
#[case(MockReply::error(500, None, "Internal server error"), 500)]
#[case(MockReply::error(404, None, "Resource not found"), 404)]
#[case(MockReply::error(403, None, "Forbidden"), 403)]
#[case(MockReply::error(409, None, "Conflict"), 409)]
#[tokio::test(start_paused = true)]
async fn test_unclassified_failures_are_terminal(#[case] reply: MockReply, #[case] status: u16) {
    let transport = MockTransport::new();
    transport.on(Method::GET, DOC_PATH, vec![reply]).await;
    let client = common::client(&transport, RetryOptions::default());

    let err = client.read_document::<JsonValue>(DOC_LINK, pinned()).await.unwrap_err();

    assert_eq!(err.status().map(|s| s.as_u16()), Some(status));
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_use_stream_is_sent_once() {
    let transport = MockTransport::new();
    transport
        .on(Method::POST, DOCS_PATH, vec![MockReply::throttled(Duration::from_millis(1))])
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let body = BodyStream::once(futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(
        order().to_string(),
    ))]));
    let request = ServiceRequest::with_stream(OperationKind::Create, ResourceType::Document, "dbs/app/colls/orders/docs", body)
        .unwrap()
        .with_partition_key("acme");

    let err = client.execute(request).await.unwrap_err();

    assert_matches!(err, Error::Service(_));
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(transport.sent_to(Method::POST, DOCS_PATH).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replayable_stream_is_reopened_per_attempt() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::POST,
            DOCS_PATH,
            vec![
                MockReply::throttled(Duration::from_millis(1)),
                MockReply::json(201, order()),
            ],
        )
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let body = BodyStream::replayable(|| -> ByteStream {
        Box::pin(futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(
            order().to_string(),
        ))]))
    });
    let request = ServiceRequest::with_stream(OperationKind::Create, ResourceType::Document, "dbs/app/colls/orders/docs", body)
        .unwrap()
        .with_partition_key("acme");

    client.execute(request).await.unwrap();

    let posts = transport.sent_to(Method::POST, DOCS_PATH).await;
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].body, posts[1].body);
    assert_eq!(posts[1].body, Bytes::from(order().to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_abort_cancels_pending_retry() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, DOC_PATH, vec![MockReply::throttled(Duration::from_secs(10))])
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let handle = AbortHandle::new();
    let signal = handle.signal();
    let request = ServiceRequest::new(OperationKind::Read, ResourceType::Document, DOC_LINK)
        .unwrap()
        .with_partition_key("acme");
    let task = tokio::spawn({
        let client = client.clone();
        async move { client.execute_with_abort(request, signal).await }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.abort();

    let err = task.await.unwrap().unwrap_err();
    assert_matches!(err, Error::Aborted { attempts: 1, .. });
    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_forbidden_moves_to_new_write_region() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            "/",
            vec![
                MockReply::json(
                    200,
                    topology_body(&[("East US", "east.example.com")], &[("East US", "east.example.com")]),
                ),
                MockReply::json(
                    200,
                    topology_body(&[("West US", "west.example.com")], &[("West US", "west.example.com")]),
                ),
            ],
        )
        .await;
    transport
        .on(
            Method::POST,
            DOCS_PATH,
            vec![
                MockReply::error(403, Some(3), "Write forbidden"),
                MockReply::json(201, order()),
            ],
        )
        .await;
    let retry = RetryOptions {
        endpoint_discovery: EndpointDiscoveryOptions {
            min_refresh_interval: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    };
    let client = common::discovering_client(&transport, retry);

    client.create_document(COLLECTION, &order(), pinned()).await.unwrap();

    let posts = transport.sent_to(Method::POST, DOCS_PATH).await;
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].host(), "east.example.com");
    assert_eq!(posts[1].host(), "west.example.com");
    assert_eq!(transport.sent_to(Method::GET, "/").await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_write_forbidden_without_discovery_is_terminal() {
    let transport = MockTransport::new();
    transport
        .on(Method::POST, DOCS_PATH, vec![MockReply::error(403, Some(3), "Write forbidden")])
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let err = client.create_document(COLLECTION, &order(), pinned()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::FORBIDDEN));
    assert_eq!(transport.sent_to(Method::POST, DOCS_PATH).await.len(), 1);
    assert!(transport.sent_to(Method::GET, "/").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stale_session_read_rotates_read_region() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            "/",
            vec![MockReply::json(
                200,
                topology_body(
                    &[("East US", "east.example.com")],
                    &[("East US", "east.example.com"), ("West US", "west.example.com")],
                ),
            )],
        )
        .await;
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![
                MockReply::error(404, Some(1002), "Read session not available"),
                MockReply::json(200, order()),
            ],
        )
        .await;
    let client = common::discovering_client(&transport, RetryOptions::default());

    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();

    let reads = transport.sent_to(Method::GET, DOC_PATH).await;
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].host(), "east.example.com");
    assert_eq!(reads[1].host(), "west.example.com");
}

#[tokio::test(start_paused = true)]
async fn test_read_timeouts_retried_when_enabled() {
    let transport = MockTransport::new();
    transport
        .on(
            Method::GET,
            DOC_PATH,
            vec![MockReply::timeout(), MockReply::json(200, order())],
        )
        .await;
    let retry = RetryOptions {
        retry_read_timeouts: true,
        ..Default::default()
    };
    let client = common::client(&transport, retry);

    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_terminal_by_default() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, DOC_PATH, vec![MockReply::timeout()])
        .await;
    let client = common::client(&transport, RetryOptions::default());

    let err = client.read_document::<JsonValue>(DOC_LINK, pinned()).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::REQUEST_TIMEOUT));
    assert!(err.service_error().unwrap().is_timeout());
    assert_eq!(transport.sent_to(Method::GET, DOC_PATH).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_topology_fetch_is_not_repeated_per_operation() {
    let transport = MockTransport::new();
    transport
        .on(Method::GET, "/", vec![MockReply::error(500, None, "Account unavailable")])
        .await;
    transport
        .on(Method::GET, DOC_PATH, vec![MockReply::json(200, order())])
        .await;
    let client = common::discovering_client(&transport, RetryOptions::default());

    for _ in 0..5 {
        let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    }

    assert_eq!(transport.sent_to(Method::GET, "/").await.len(), 1);
    let reads = transport.sent_to(Method::GET, DOC_PATH).await;
    assert_eq!(reads.len(), 5);
    assert!(reads.iter().all(|r| r.host() == "acct.example.com"));

    // once the refresh interval has passed the next operation tries again
    tokio::time::advance(Duration::from_secs(6)).await;
    let _: JsonValue = client.read_document(DOC_LINK, pinned()).await.unwrap();
    assert_eq!(transport.sent_to(Method::GET, "/").await.len(), 2);
}
