//! Cursor over a scripted paginated API.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio_stream::StreamExt;

use socialconnector::pagination::Cursor;
use socialconnector::{ConnectorError, ErrorKind};

/// Three pages of two items each, chained by `meta.next_token`.
fn book() -> Vec<Value> {
    vec![
        json!({"data": [1, 2], "meta": {"next_token": "p2"}}),
        json!({"data": [3, 4], "meta": {"next_token": "p3"}}),
        json!({"data": [5, 6], "meta": {}}),
    ]
}

/// Cursor serving `pages` by token, recording the tokens it was asked for.
fn scripted(pages: Vec<Value>) -> (Cursor, Arc<Mutex<Vec<Option<String>>>>) {
    let asked: Arc<Mutex<Vec<Option<String>>>> = Arc::default();
    let log = Arc::clone(&asked);
    let pages = Arc::new(pages);
    let cursor = Cursor::new(move |token: Option<String>| {
        let pages = Arc::clone(&pages);
        let log = Arc::clone(&log);
        async move {
            if let Ok(mut log) = log.lock() {
                log.push(token.clone());
            }
            let index = match token.as_deref() {
                None => 0,
                Some("p2") => 1,
                Some("p3") => 2,
                Some(other) => {
                    return Err(ConnectorError::message("test", format!("bad token {other}")))
                }
            };
            Ok(pages[index].clone())
        }
    });
    (cursor, asked)
}

fn tokens(asked: &Arc<Mutex<Vec<Option<String>>>>) -> Vec<Option<String>> {
    match asked.lock() {
        Ok(asked) => asked.clone(),
        Err(err) => panic!("token log poisoned: {err}"),
    }
}

#[tokio::test]
async fn pages_follow_tokens_until_exhausted() {
    let (cursor, asked) = scripted(book());
    let pages: Vec<Value> = cursor
        .pages(None)
        .map(|page| page.expect("page fetched"))
        .collect()
        .await;

    assert_eq!(pages.len(), 3);
    assert_eq!(pages[2]["data"], json!([5, 6]));
    assert_eq!(
        tokens(&asked),
        vec![None, Some("p2".to_owned()), Some("p3".to_owned())]
    );
}

#[tokio::test]
async fn page_limit_stops_fetching() {
    let (cursor, asked) = scripted(book());
    let pages: Vec<_> = cursor.pages(Some(2)).collect().await;
    assert_eq!(pages.len(), 2);
    assert_eq!(tokens(&asked).len(), 2);
}

#[tokio::test]
async fn items_flatten_pages_and_respect_the_limit() {
    let (cursor, _) = scripted(book());
    let all = cursor.collect_items(None).await.expect("all items");
    assert_eq!(all, vec![json!(1), json!(2), json!(3), json!(4), json!(5), json!(6)]);

    let (cursor, _) = scripted(book());
    let some = cursor.collect_items(Some(3)).await.expect("three items");
    assert_eq!(some, vec![json!(1), json!(2), json!(3)]);

    let (cursor, _) = scripted(book());
    assert!(cursor.collect_items(Some(0)).await.expect("no items").is_empty());
}

#[tokio::test]
async fn custom_paths_locate_token_and_items() {
    let (cursor, _) = scripted(vec![
        json!({"result": {"messages": ["a"]}, "next_cursor": "p2"}),
        json!({"result": {"messages": ["b"]}, "next_cursor": ""}),
    ]);
    let cursor = cursor
        .next_token_field("next_cursor")
        .data_field("result.messages");
    let items = cursor.collect_items(None).await.expect("items");
    assert_eq!(items, vec![json!("a"), json!("b")]);
}

#[tokio::test]
async fn pages_without_a_list_contribute_nothing() {
    let (cursor, _) = scripted(vec![json!({"data": "not a list", "meta": {}})]);
    assert!(cursor.collect_items(None).await.expect("empty").is_empty());
}

#[tokio::test]
async fn fetch_errors_end_the_stream() {
    let (cursor, _) = scripted(vec![json!({"data": [1], "meta": {"next_token": "bogus"}})]);
    let mut items = cursor.items(None);
    assert_eq!(
        items.next().await.map(|item| item.expect("first item")),
        Some(json!(1))
    );
    let err = match items.next().await {
        Some(Err(err)) => err,
        other => panic!("expected fetch error, got {other:?}"),
    };
    assert_eq!(err.kind(), ErrorKind::Message);
    assert!(items.next().await.is_none());
}
