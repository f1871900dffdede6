use futures::StreamExt;
use media_finder::{
    DriverState, Error, GenericRequest, PaginationError, QueryOptions, Value, request::Cursor,
};
use pretty_assertions::assert_eq;

use super::{LAST_PAGE, finder};

#[tokio::test]
async fn test_offset_query_walks_every_page() {
    let finder = finder();
    let mut query = finder.query(GenericRequest::new("example", "search"), QueryOptions::default());

    let mut page_numbers = vec![];
    while let Some(response) = query.next().await.unwrap() {
        let page = response.page.clone().unwrap();
        page_numbers.push(page.page_number.unwrap());
        assert!(!page.page_fetch_limit_reached);

        assert_eq!(response.media.len(), 2);
        let first = &response.media[0];
        assert_eq!(
            first.get("id"),
            Some(&Value::from(format!("{}-1.jpg", page.page_number.unwrap())))
        );
        assert_eq!(first.get("mimeType"), Some(&Value::from("image/jpeg")));
        assert_eq!(first.get("mediaFinderSource"), Some(&Value::from("example")));
        assert_eq!(response.request.param("query"), Some(&serde_json::json!("cats")));
    }

    assert_eq!(page_numbers, (1..=LAST_PAGE).collect::<Vec<_>>());
    assert_eq!(query.state(), DriverState::Exhausted);
    assert_eq!(query.fetched_count(), LAST_PAGE as usize);
    assert!(query.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_page_budget_stops_early() {
    let finder = finder();
    let mut query = finder.query(
        GenericRequest::new("example", "search"),
        QueryOptions::default().with_fetch_count_limit(2),
    );

    let first = query.next().await.unwrap().unwrap();
    assert!(!first.page.unwrap().page_fetch_limit_reached);
    let second = query.next().await.unwrap().unwrap();
    assert!(second.page.unwrap().page_fetch_limit_reached);

    assert_eq!(query.state(), DriverState::LimitReached);
    assert!(query.next().await.unwrap().is_none());
    assert_eq!(query.fetched_count(), 2);
}

#[tokio::test]
async fn test_cursor_query_follows_next_cursor() {
    let finder = finder();
    let query = finder.query(GenericRequest::new("example", "feed"), QueryOptions::default());

    let cursors: Vec<Option<Cursor>> = query
        .into_stream()
        .map(|response| response.unwrap().page.unwrap().cursor)
        .collect()
        .await;
    assert_eq!(
        cursors,
        vec![None, Some(Cursor::from("b")), Some(Cursor::from("c"))]
    );
}

#[tokio::test]
async fn test_set_request_restarts_from_new_request() {
    let finder = finder();
    let mut query = finder.query(GenericRequest::new("example", "search"), QueryOptions::default());
    while query.next().await.unwrap().is_some() {}
    assert_eq!(query.state(), DriverState::Exhausted);

    let mut request = query.request();
    request.page_number = Some(LAST_PAGE);
    query.set_request(request);
    assert_eq!(query.state(), DriverState::Idle);

    let response = query.next().await.unwrap().unwrap();
    assert!(response.is_last_page());
    assert!(query.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_request_with_defaults_preview() {
    let finder = finder();
    let query = finder.query(
        GenericRequest::new("example", "search").with_param("query", "dogs"),
        QueryOptions::default(),
    );
    let request = query.request_with_defaults().unwrap();
    assert_eq!(request.page_number, Some(1));
    assert_eq!(request.param("query"), Some(&serde_json::json!("dogs")));
    // the stored request is untouched
    assert_eq!(query.request().page_number, None);
}

#[tokio::test]
async fn test_required_secret() {
    let finder = finder();
    let mut query = finder.query(GenericRequest::new("example", "private"), QueryOptions::default());
    let error = query.next().await.unwrap_err();
    match error {
        Error::Pagination(PaginationError::InvalidSecrets(e)) => {
            assert_eq!(e.issues[0].path, "$.apiKey");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    query.set_options(QueryOptions::default().with_secret("apiKey", "s3cret"));
    let response = query.next().await.unwrap().unwrap();
    assert_eq!(response.page, None);
    assert_eq!(
        response.media[0].get("url").and_then(Value::as_str),
        Some("https://cdn.example.com/private.png?key=s3cret")
    );
    assert_eq!(query.state(), DriverState::Exhausted);
}

#[tokio::test]
async fn test_unknown_source() {
    let finder = finder();
    let mut query = finder.query(GenericRequest::new("nowhere", "search"), QueryOptions::default());
    let error = query.next().await.unwrap_err();
    assert!(error.to_string().contains("unknown source \"nowhere\""));
}
