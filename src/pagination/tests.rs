//! Tests for pagination module

use super::strategies::parse_link_header;
use super::*;
use crate::http::{
    ApiRequest, ApiResponse, HttpClient, HttpClientConfig, RetryPolicy, Transport,
};
use crate::types::PaginationMode;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use test_case::test_case;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> PaginationSettings {
    PaginationSettings {
        page_size: 2,
        ..PaginationSettings::default()
    }
}

fn filters() -> BTreeMap<String, String> {
    BTreeMap::from([("mod_ts__gte".to_string(), "2024-01-01T00:00:00Z".to_string())])
}

fn base_url() -> Url {
    Url::parse("https://wms.example.com/api/").unwrap()
}

fn page(ids: &[u64]) -> serde_json::Value {
    json!(ids.iter().map(|id| json!({"id": id})).collect::<Vec<_>>())
}

// ============================================================================
// Record extraction
// ============================================================================

#[test]
fn test_records_in_defaults() {
    assert_eq!(records_in(&json!([1, 2]), None).unwrap().len(), 2);
    assert_eq!(records_in(&json!({"results": [1]}), None).unwrap().len(), 1);
    assert_eq!(records_in(&json!({"data": [1, 2, 3]}), None).unwrap().len(), 3);
    assert_eq!(records_in(&serde_json::Value::Null, None).unwrap().len(), 0);
    assert!(records_in(&json!({"detail": "x"}), None).is_none());
}

#[test]
fn test_records_in_explicit_path() {
    let body = json!({"payload": {"rows": [{"id": 1}]}, "results": []});
    assert_eq!(records_in(&body, Some("payload.rows")).unwrap().len(), 1);
    assert!(records_in(&body, Some("payload.missing")).is_none());
    assert_eq!(records_in(&json!({"rows": null}), Some("rows")).unwrap().len(), 0);
}

#[test]
fn test_token_page_size() {
    let mut token = PageToken::Offset {
        offset: 4,
        page_size: 2,
    };
    token.set_page_size(7);
    assert_eq!(token.page_size(), 7);
    assert_eq!(
        token,
        PageToken::Offset {
            offset: 4,
            page_size: 7
        }
    );
}

// ============================================================================
// Offset strategy
// ============================================================================

#[test]
fn test_offset_first_request() {
    let strategy = OffsetStrategy::new(settings());
    let request = strategy.first_request("/items", &filters(), 2);

    assert_eq!(request.target, "/items");
    assert_eq!(request.query_value("offset"), Some("0"));
    assert_eq!(request.query_value("limit"), Some("2"));
    assert_eq!(request.query_value("mod_ts__gte"), Some("2024-01-01T00:00:00Z"));
}

#[test_case(json!({"count": 5, "results": [{"id": 1}, {"id": 2}]}), Some(2) ; "total not reached")]
#[test_case(json!({"count": 2, "results": [{"id": 1}, {"id": 2}]}), None ; "total reached")]
#[test_case(json!({"has_more": false, "results": [{"id": 1}, {"id": 2}]}), None ; "has more false")]
#[test_case(json!({"has_more": true, "results": [{"id": 1}]}), Some(1) ; "has more wins over short page")]
#[test_case(json!([{"id": 1}, {"id": 2}]), Some(2) ; "full page without total")]
#[test_case(json!([{"id": 1}]), None ; "short page without total")]
#[test_case(json!({"count": 9, "results": []}), None ; "empty page")]
fn test_offset_next_page_token(body: serde_json::Value, expected_offset: Option<u64>) {
    let strategy = OffsetStrategy::new(settings());
    let request = strategy.first_request("/items", &BTreeMap::new(), 2);
    let token = strategy.next_page_token(&request, &ApiResponse::new(200, body));

    assert_eq!(
        token,
        expected_offset.map(|offset| PageToken::Offset {
            offset,
            page_size: 2
        })
    );
}

#[test]
fn test_offset_resize_continues_from_record_offset() {
    let strategy = OffsetStrategy::new(settings());
    let first = strategy.first_request("/items", &filters(), 2);

    let mut token = strategy
        .next_page_token(&first, &ApiResponse::new(200, page(&[1, 2])))
        .unwrap();
    token.set_page_size(3);
    let second = strategy.apply_token(&first, &token).unwrap();

    assert_eq!(second.query_value("offset"), Some("2"));
    assert_eq!(second.query_value("limit"), Some("3"));
    assert_eq!(second.query_value("mod_ts__gte"), Some("2024-01-01T00:00:00Z"));

    let token = strategy
        .next_page_token(&second, &ApiResponse::new(200, page(&[3, 4, 5])))
        .unwrap();
    assert_eq!(
        token,
        PageToken::Offset {
            offset: 5,
            page_size: 3
        }
    );
}

#[test]
fn test_offset_rejects_cursor_token() {
    let strategy = OffsetStrategy::new(settings());
    let first = strategy.first_request("/items", &BTreeMap::new(), 2);
    let token = PageToken::Cursor {
        link: "x".to_string(),
        page_size: 2,
    };
    assert!(strategy.apply_token(&first, &token).is_err());
}

// ============================================================================
// Cursor strategy
// ============================================================================

#[test]
fn test_cursor_next_link_from_body() {
    let strategy = CursorStrategy::new(settings(), base_url());
    let first = strategy.first_request("items", &filters(), 2);
    assert_eq!(first.query_value("offset"), None);

    let response = ApiResponse::new(
        200,
        json!({"next": "items?cursor=c2&limit=2", "results": [{"id": 1}, {"id": 2}]}),
    );
    let mut token = strategy.next_page_token(&first, &response).unwrap();
    token.set_page_size(4);

    let next = strategy.apply_token(&first, &token).unwrap();
    assert_eq!(next.target, "https://wms.example.com/api/items");
    assert_eq!(next.query_value("cursor"), Some("c2"));
    assert_eq!(next.query_value("limit"), Some("4"));
    assert_eq!(next.query_value("mod_ts__gte"), Some("2024-01-01T00:00:00Z"));
}

#[test]
fn test_cursor_next_link_from_link_header() {
    let strategy = CursorStrategy::new(settings(), base_url());
    let first = strategy.first_request("items", &BTreeMap::new(), 2);

    let response = ApiResponse::new(200, page(&[1, 2])).with_header(
        "Link",
        "<https://wms.example.com/api/items?page=1>; rel=\"prev\", \
         <https://wms.example.com/api/items?page=3>; rel=\"next\"",
    );
    let token = strategy.next_page_token(&first, &response).unwrap();
    assert_eq!(
        token,
        PageToken::Cursor {
            link: "https://wms.example.com/api/items?page=3".to_string(),
            page_size: 2
        }
    );
}

#[test_case(json!({"next": null, "results": [{"id": 1}]}) ; "null next")]
#[test_case(json!({"next": "", "results": [{"id": 1}]}) ; "empty next")]
#[test_case(json!({"results": [{"id": 1}]}) ; "missing next")]
#[test_case(json!({"next": "items?cursor=c3", "results": []}) ; "empty page")]
fn test_cursor_stops(body: serde_json::Value) {
    let strategy = CursorStrategy::new(settings(), base_url());
    let first = strategy.first_request("items", &BTreeMap::new(), 2);
    assert_eq!(strategy.next_page_token(&first, &ApiResponse::new(200, body)), None);
}

#[test]
fn test_parse_link_header() {
    let header = "<https://a/2>; rel=\"next\", <https://a/9>; rel='last'";
    assert_eq!(parse_link_header(header, "next"), Some("https://a/2".to_string()));
    assert_eq!(parse_link_header(header, "last"), Some("https://a/9".to_string()));
    assert_eq!(parse_link_header(header, "prev"), None);
    assert_eq!(parse_link_header("<https://a/3>; rel=\"next last\"", "next"), Some("https://a/3".to_string()));
    assert_eq!(parse_link_header("garbage", "next"), None);
}

// ============================================================================
// Strategy selection
// ============================================================================

fn client(server: &MockServer) -> HttpClient {
    HttpClient::with_config(
        HttpClientConfig::builder()
            .base_url(server.uri())
            .retry(RetryPolicy::none())
            .build(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_probe_record_count() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 12345,
            "results": [{"id": 1}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let count = probe_record_count(&client(&mock_server), &settings(), "/items", &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(count, Some(12345));
}

#[tokio::test]
async fn test_auto_mode_uses_cursor_above_threshold() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 5000, "results": []})))
        .mount(&mock_server)
        .await;

    let settings = PaginationSettings {
        cursor_threshold: Some(1000),
        ..settings()
    };
    let strategy = select_strategy(
        &client(&mock_server),
        &settings,
        PaginationMode::Auto,
        &base_url(),
        "/items",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    assert_eq!(strategy.name(), "cursor");
}

#[tokio::test]
async fn test_auto_mode_uses_offset_below_threshold_or_unknown() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/small"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 10, "results": []})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/uncounted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let settings = PaginationSettings {
        cursor_threshold: Some(1000),
        ..settings()
    };
    let transport = client(&mock_server);

    for endpoint in ["/small", "/uncounted"] {
        let strategy = select_strategy(
            &transport,
            &settings,
            PaginationMode::Auto,
            &base_url(),
            endpoint,
            &BTreeMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(strategy.name(), "offset");
    }
}

#[tokio::test]
async fn test_auto_mode_without_threshold_does_not_probe() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let strategy = select_strategy(
        &client(&mock_server),
        &settings(),
        PaginationMode::Auto,
        &base_url(),
        "/items",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    assert_eq!(strategy.name(), "offset");

    let forced = select_strategy(
        &client(&mock_server),
        &settings(),
        PaginationMode::Cursor,
        &base_url(),
        "/items",
        &BTreeMap::new(),
    )
    .await
    .unwrap();
    assert_eq!(forced.name(), "cursor");
}

#[tokio::test]
async fn test_both_strategies_terminate_over_mocked_pages() {
    let mock_server = MockServer::start().await;

    // Offset pages: 5 records, page size 2
    for (offset, ids) in [("0", vec![1, 2]), ("2", vec![3, 4]), ("4", vec![5])] {
        Mock::given(method("GET"))
            .and(path("/offset-items"))
            .and(query_param("offset", offset))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 5,
                "results": page(&ids)
            })))
            .mount(&mock_server)
            .await;
    }

    // Cursor pages linked by `next`
    let next_1 = format!("{}/cursor-items?cursor=b", mock_server.uri());
    let next_2 = format!("{}/cursor-items?cursor=c", mock_server.uri());
    for (cursor, ids, next) in [
        (None, vec![1, 2], Some(next_1)),
        (Some("b"), vec![3, 4], Some(next_2)),
        (Some("c"), vec![5], None),
    ] {
        let mut mock = Mock::given(method("GET")).and(path("/cursor-items"));
        if let Some(cursor) = cursor {
            mock = mock.and(query_param("cursor", cursor));
        }
        mock.respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "next": next,
            "results": page(&ids)
        })))
        .with_priority(if cursor.is_some() { 1 } else { 5 })
        .mount(&mock_server)
        .await;
    }

    let transport = client(&mock_server);
    let base = Url::parse(&mock_server.uri()).unwrap();
    let strategies: Vec<(Box<dyn PaginationStrategy>, &str)> = vec![
        (Box::new(OffsetStrategy::new(settings())), "/offset-items"),
        (Box::new(CursorStrategy::new(settings(), base)), "/cursor-items"),
    ];

    for (strategy, endpoint) in strategies {
        let first = strategy.first_request(endpoint, &BTreeMap::new(), 2);
        let mut request = first.clone();
        let mut ids = Vec::new();
        let mut pages = 0;

        loop {
            let response = transport.execute(&request).await.unwrap();
            pages += 1;
            for record in records_in(&response.body, None).unwrap() {
                ids.push(record["id"].as_u64().unwrap());
            }
            match strategy.next_page_token(&request, &response) {
                Some(token) => request = strategy.apply_token(&first, &token).unwrap(),
                None => break,
            }
            assert!(pages < 10, "{} pagination did not terminate", strategy.name());
        }

        assert_eq!(ids, vec![1, 2, 3, 4, 5], "{} strategy", strategy.name());
        assert_eq!(pages, 3);
    }
}

#[test]
fn test_request_headers_survive_cursor_hop() {
    let strategy = CursorStrategy::new(settings(), base_url());
    let first = strategy
        .first_request("items", &BTreeMap::new(), 2)
        .header("X-Tenant", "acme");
    let token = PageToken::Cursor {
        link: "items?cursor=z".to_string(),
        page_size: 2,
    };
    let next: ApiRequest = strategy.apply_token(&first, &token).unwrap();
    assert_eq!(next.headers.get("X-Tenant").map(String::as_str), Some("acme"));
}
