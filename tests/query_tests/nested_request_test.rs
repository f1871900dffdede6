use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use media_finder::{
    Error, GenericRequest, MediaFinder, QueryOptions, Value, hook,
    hooks::{LOAD_URL, Next},
    validation::MockResponseValidator,
};
use pretty_assertions::assert_eq;

use super::{example_source, finder, private_handler};

#[tokio::test]
async fn test_nested_request_returns_inner_media() {
    let finder = finder();
    let mut query = finder.query(GenericRequest::new("example", "digest"), QueryOptions::default());
    let response = query.next().await.unwrap().unwrap();

    let ids: Vec<_> = response
        .media
        .iter()
        .filter_map(|media| media.get("id").and_then(Value::as_str))
        .collect();
    assert_eq!(ids, vec!["1-1.jpg", "1-2.jpg"]);
    assert!(query.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_load_url_hooks_wrap_actions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut finder = MediaFinder::new();
    finder.load_source(example_source());
    finder.register_hook(
        LOAD_URL,
        hook(move |input: Value, next: Next| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                next.run(Value::from(format!("{}?signed=1", input))).await
            }
        }),
    );

    let mut query = finder.query(
        GenericRequest::new("example", "search"),
        QueryOptions::default().with_fetch_count_limit(1),
    );
    let response = query.next().await.unwrap().unwrap();
    for media in &response.media {
        let url = media.get("url").and_then(Value::as_str).unwrap();
        assert!(url.ends_with(".jpg?signed=1"), "{}", url);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_action_reports_its_path() {
    let finder = finder();
    let mut query = finder.query(GenericRequest::new("example", "broken"), QueryOptions::default());
    let error = query.next().await.unwrap_err();
    match error {
        Error::Execution(e) => {
            assert_eq!(e.path().to_string(), "$.media[0][1].url");
            assert_eq!(e.cause().map(ToString::to_string).as_deref(), Some("upstream returned 500"));
            assert!(e.describe().contains("Executing action for"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // the query is over after a failure
    assert!(query.next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_handler_validator_sees_the_response() {
    let mut validator = MockResponseValidator::new();
    validator
        .expect_validate()
        .withf(|response: &Value| response.get("media").and_then(Value::as_list).is_some_and(|m| m.len() == 1))
        .times(1)
        .returning(|_| Ok(()));

    let mut handler = private_handler();
    let details = handler.responses.remove(0).with_validator(validator);
    handler = handler.response(details);

    let mut finder = MediaFinder::new();
    finder.load_source(media_finder::Source::new("example", "Example").handler(handler));

    let mut query = finder.query(
        GenericRequest::new("example", "private"),
        QueryOptions::default().with_secret("apiKey", "k"),
    );
    assert!(query.next().await.unwrap().is_some());
}
