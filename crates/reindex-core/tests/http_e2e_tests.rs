//! HTTP tests for the search client, bulk writer and transport
//!
//! Each test runs against a wiremock server standing in for a cluster.

use reindex_core::bulk::{BulkRequest, BulkWriter, HttpBulkWriter};
use reindex_core::connection::{RequestBody, Transport, TransportConfig};
use reindex_core::query::ScanQuery;
use reindex_core::scroll::{ScrollCursor, SearchClient};
use reindex_core::{ApiVersion, ConnectionDescriptor, Hit, ReindexError, WriteMode};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;
use wiremock::{
    matchers::{body_json, body_string, body_string_contains, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

async fn transport(uri: &str, version: &str) -> Transport {
    let descriptor = ConnectionDescriptor::parse(uri).expect("valid uri");
    let config = TransportConfig::new(ApiVersion::new(version), Duration::from_secs(5));
    Transport::connect(descriptor, config)
        .await
        .expect("transport connects")
}

fn search_hit(id: &str) -> Value {
    json!({
        "_index": "logs",
        "_type": "event",
        "_id": id,
        "_source": { "message": format!("doc {}", id) }
    })
}

fn hit(id: &str) -> Hit {
    serde_json::from_value(search_hit(id)).expect("valid hit")
}

fn bulk_request<'a>(destination: &'a ConnectionDescriptor, records: Vec<Hit>) -> BulkRequest<'a> {
    BulkRequest {
        records,
        destination,
        transform: None,
        concurrency: 2,
        bulk_size: 100,
        parent: None,
        update: false,
        mode: WriteMode::Callback,
    }
}

fn created(id: &str) -> Value {
    json!({ "create": { "_index": "logs", "_id": id, "status": 201 } })
}

#[tokio::test]
async fn test_modern_scroll_pages_through_all_hits() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/logs/_search"))
        .and(query_param("scroll", "1m"))
        .and(query_param("size", "2"))
        .and(body_json(json!({ "sort": "_doc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_scroll_id": "scroll-a",
            "hits": { "total": { "value": 3, "relation": "eq" }, "hits": [search_hit("1"), search_hit("2")] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/_search/scroll"))
        .and(body_json(json!({ "scroll": "1m", "scroll_id": "scroll-a" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_scroll_id": "scroll-b",
            "hits": { "total": { "value": 3 }, "hits": [search_hit("3")] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = SearchClient::new(transport(&mock_server.uri(), "7.10").await);
    let query = ScanQuery::for_version(&ApiVersion::new("7.10"), Some("logs".into()), None, "1m", 2);
    let mut cursor = ScrollCursor::new(&client, query, None);

    assert_eq!(cursor.open().await.unwrap(), 3);
    let mut ids = Vec::new();
    while let Some(page) = cursor.next_page().await.unwrap() {
        ids.extend(page.into_iter().map(|h| h.id));
    }
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_legacy_scan_uses_search_type_and_raw_scroll_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/logs/event/_search"))
        .and(query_param("search_type", "scan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_scroll_id": "c2Nhbg==",
            "hits": { "total": 2, "hits": [] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/_search/scroll"))
        .and(query_param("scroll", "1m"))
        .and(body_string("c2Nhbg=="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_scroll_id": "c2Nhbg==",
            "hits": { "total": 2, "hits": [search_hit("1"), search_hit("2")] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = format!("{}/logs/event", mock_server.uri());
    let source = transport(&uri, "1.7").await;
    let descriptor = source.descriptor().clone();
    let client = SearchClient::new(source);
    let query = ScanQuery::for_version(
        &ApiVersion::new("1.7"),
        descriptor.index,
        descriptor.doc_type,
        "1m",
        100,
    );
    let mut cursor = ScrollCursor::new(&client, query, None);

    assert_eq!(cursor.open().await.unwrap(), 2);
    let page = cursor.next_page().await.unwrap().unwrap();
    assert_eq!(page.len(), 2);
    assert!(cursor.next_page().await.unwrap().is_none());
}

#[tokio::test]
async fn test_search_parse_failure_reports_page_size() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/logs/_search"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "type": "search_phase_execution_exception", "reason": "failed to parse search source" }
        })))
        .mount(&mock_server)
        .await;

    let client = SearchClient::new(transport(&mock_server.uri(), "6.8").await);
    let query = ScanQuery::for_version(&ApiVersion::new("6.8"), Some("logs".into()), None, "1m", 100_000);
    let mut cursor = ScrollCursor::new(&client, query, None);

    let err = cursor.open().await.unwrap_err();
    assert!(matches!(err, ReindexError::PageSizeTooLarge(_)));
}

#[tokio::test]
async fn test_bulk_writer_reports_item_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .and(body_string_contains(r#"{"create":{"#))
        .and(body_string_contains(r#""_index":"archive""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 3,
            "errors": true,
            "items": [
                created("1"),
                { "create": { "_index": "archive", "_id": "2", "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "failed to parse field [age]" } } },
                created("3")
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let destination = ConnectionDescriptor::parse(&format!("{}/archive", mock_server.uri())).unwrap();
    let writer = HttpBulkWriter::new(transport(&mock_server.uri(), "6.8").await);

    let outcome = writer
        .write(bulk_request(&destination, vec![hit("1"), hit("2"), hit("3")]))
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].id, "2");
    assert_eq!(outcome.failed[0].status, 400);
    assert!(outcome.failed[0].reason.contains("failed to parse field"));
}

#[tokio::test]
async fn test_bulk_writer_splits_into_sub_batches() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains(r#""_id":"1""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": false,
            "items": [created("1"), created("2")]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains(r#""_id":"3""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": false,
            "items": [created("3")]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let destination = ConnectionDescriptor::parse(&mock_server.uri()).unwrap();
    let writer = HttpBulkWriter::new(transport(&mock_server.uri(), "6.8").await);
    let request = BulkRequest {
        bulk_size: 2,
        mode: WriteMode::Promise,
        ..bulk_request(&destination, vec![hit("1"), hit("2"), hit("3")])
    };

    let outcome = writer.write(request).await.unwrap();
    assert_eq!(outcome.succeeded, 3);
    assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn test_bulk_writer_retries_throttled_items() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [
                created("1"),
                { "create": { "_index": "logs", "_id": "2", "status": 429,
                    "error": { "type": "es_rejected_execution_exception", "reason": "queue full" } } }
            ]
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains(r#""_id":"2""#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": false,
            "items": [created("2")]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let destination = ConnectionDescriptor::parse(&mock_server.uri()).unwrap();
    let writer = HttpBulkWriter::new(transport(&mock_server.uri(), "6.8").await);

    let outcome = writer
        .write(bulk_request(&destination, vec![hit("1"), hit("2")]))
        .await
        .unwrap();
    assert_eq!(outcome.succeeded, 2);
    assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn test_bulk_rejection_is_a_hard_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&mock_server)
        .await;

    let destination = ConnectionDescriptor::parse(&mock_server.uri()).unwrap();
    let writer = HttpBulkWriter::new(transport(&mock_server.uri(), "6.8").await);

    let err = writer
        .write(bulk_request(&destination, vec![hit("1")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ReindexError::BulkWrite(_)));
    assert!(err.to_string().starts_with("Reindex error:"));
}

#[tokio::test]
async fn test_transport_retries_gateway_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tagline": "You Know, for Search" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = transport(&mock_server.uri(), "6.8").await;
    let response = transport
        .request(Method::GET, "/", RequestBody::Empty)
        .await
        .unwrap();

    assert!(response.is_success());
    let body: Map<String, Value> = response.json().unwrap();
    assert_eq!(body["tagline"], json!("You Know, for Search"));
}

#[tokio::test]
async fn test_scroll_continuation_is_not_retried_on_gateway_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/logs/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_scroll_id": "scroll-a",
            "hits": { "total": { "value": 3 }, "hits": [search_hit("1"), search_hit("2")] }
        })))
        .mount(&mock_server)
        .await;

    // The node may already have advanced the cursor; a retry could skip a page
    Mock::given(method("POST"))
        .and(path("/_search/scroll"))
        .respond_with(ResponseTemplate::new(504))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = SearchClient::new(transport(&mock_server.uri(), "7.10").await);
    let query = ScanQuery::for_version(&ApiVersion::new("7.10"), Some("logs".into()), None, "1m", 2);
    let mut cursor = ScrollCursor::new(&client, query, None);

    assert_eq!(cursor.open().await.unwrap(), 3);
    assert_eq!(cursor.next_page().await.unwrap().unwrap().len(), 2);

    let err = cursor.next_page().await.unwrap_err();
    assert!(matches!(err, ReindexError::Scroll(_)));
}

#[tokio::test]
async fn test_transport_sends_basic_auth() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = format!("http://user:pass@{}", mock_server.address());
    let transport = transport(&uri, "6.8").await;
    let response = transport
        .request(Method::GET, "/", RequestBody::Empty)
        .await
        .unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn test_transport_sniffs_published_nodes() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_nodes/http"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "nodes": { "n1": { "http": { "publish_address": format!("node-1/{}", mock_server.address()) } } }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "green" })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let descriptor = ConnectionDescriptor::parse(&mock_server.uri()).unwrap();
    let config = TransportConfig::new(ApiVersion::default(), Duration::from_secs(5)).with_sniff(true);
    let transport = Transport::connect(descriptor, config).await.unwrap();

    let response = transport
        .request(Method::GET, "/_cluster/health", RequestBody::Empty)
        .await
        .unwrap();
    assert!(response.is_success());
}
