mod common;

use streamstore::{ExpectedVersion, Position, ReadDirection};
use yare::parameterized;

#[parameterized(
    read_exact_count = { 3, 0, 3, 3, 0, 3 },
    read_beyond_count = { 3, 0, 4, 3, 0, 3 },
    read_partial = { 3, 0, 2, 2, 0, 2 },
    read_from_middle = { 3, 1, 2, 2, 1, 3 },
    read_last = { 3, 2, 1, 1, 2, 3 },
    read_past_last = { 3, 3, 1, 0, 3, 3 },
)]
#[test_macro(tokio::test)]
async fn read_all_forwards_window(
    seed: usize,
    from: i64,
    max_count: usize,
    expected_count: usize,
    expected_from: i64,
    expected_next: i64,
) {
    let (_dir, _path, store) = common::open_store("forwards.db").await;
    if seed > 0 {
        common::seed(&store, "stream-1", seed).await;
    }

    let page = store
        .read_all_forwards(Position::from_raw(from), max_count, true)
        .await
        .unwrap();

    assert_eq!(page.messages.len(), expected_count);
    assert_eq!(page.from_position, Position::from_raw(expected_from));
    assert_eq!(page.next_position, Position::from_raw(expected_next));
    assert_eq!(page.direction, ReadDirection::Forward);

    store.shutdown().await;
}

#[parameterized(
    one_from_end = { 3, -1, 1, 1, 2, 1 },
    one_from_last = { 3, 2, 1, 1, 2, 1 },
    one_from_middle = { 3, 1, 1, 1, 1, 0 },
    one_from_first = { 3, 0, 1, 1, 0, 0 },
    all_from_end = { 3, -1, 3, 3, 2, 0 },
    more_than_all_from_end = { 3, -1, 4, 3, 2, 0 },
    empty_log_from_end = { 0, -1, 1, 0, 0, 0 },
)]
#[test_macro(tokio::test)]
async fn read_all_backwards_window(
    seed: usize,
    from: i64,
    max_count: usize,
    expected_count: usize,
    expected_from: i64,
    expected_next: i64,
) {
    let (_dir, _path, store) = common::open_store("backwards.db").await;
    if seed > 0 {
        common::seed(&store, "stream-1", seed).await;
    }

    let page = store
        .read_all_backwards(Position::from_raw(from), max_count, true)
        .await
        .unwrap();

    assert_eq!(page.messages.len(), expected_count);
    assert_eq!(page.from_position, Position::from_raw(expected_from));
    assert_eq!(page.next_position, Position::from_raw(expected_next));
    assert_eq!(page.direction, ReadDirection::Backward);

    store.shutdown().await;
}

#[tokio::test]
async fn empty_log_backwards_from_end() {
    let (_dir, _path, store) = common::open_store("empty.db").await;

    let page = store.read_all_backwards(Position::END, 1, false).await.unwrap();
    assert!(page.messages.is_empty());
    assert_eq!(page.from_position, Position::START);
    assert_eq!(page.next_position, Position::START);
    assert!(page.is_end);

    store.shutdown().await;
}

#[tokio::test]
async fn read_next_chains_forward_pages() {
    let (_dir, _path, store) = common::open_store("chain.db").await;
    common::seed(&store, "stream-1", 3).await;
    common::seed(&store, "stream-2", 3).await;

    let page = store.read_all_forwards(Position::START, 4, false).await.unwrap();
    assert_eq!(common::page_positions(&page), vec![0, 1, 2, 3]);
    assert_eq!(page.next_position, Position::from_raw(4));
    assert!(!page.is_end);

    let page = page.read_next().await.unwrap();
    assert_eq!(common::page_positions(&page), vec![4, 5]);
    assert!(page.is_end);

    let streams: Vec<&str> = page.messages.iter().map(|m| m.stream_id.as_str()).collect();
    assert_eq!(streams, vec!["stream-2", "stream-2"]);

    store.shutdown().await;
}

#[tokio::test]
async fn read_next_chains_backward_pages() {
    let (_dir, _path, store) = common::open_store("chain_back.db").await;
    common::seed(&store, "stream-1", 3).await;
    common::seed(&store, "stream-2", 3).await;

    let mut visited = Vec::new();
    let mut page = store.read_all_backwards(Position::END, 4, false).await.unwrap();
    loop {
        visited.extend(common::page_positions(&page));
        if page.is_end {
            break;
        }
        page = page.read_next().await.unwrap();
    }

    assert_eq!(visited, vec![5, 4, 3, 2, 1, 0]);

    store.shutdown().await;
}

#[tokio::test]
async fn forward_then_backward_round_trip() {
    let (_dir, _path, store) = common::open_store("round_trip.db").await;
    common::seed(&store, "a", 4).await;
    common::seed(&store, "b", 2).await;
    common::seed(&store, "a", 3).await;

    let forward = store.read_all_forwards(Position::START, 100, false).await.unwrap();
    let backward = store.read_all_backwards(Position::END, 100, false).await.unwrap();

    let mut forward_ids: Vec<_> = forward.messages.iter().map(|m| m.message_id).collect();
    let backward_ids: Vec<_> = backward.messages.iter().map(|m| m.message_id).collect();
    forward_ids.reverse();

    assert_eq!(forward_ids.len(), 9);
    assert_eq!(forward_ids, backward_ids);

    store.shutdown().await;
}

#[tokio::test]
async fn repeated_read_is_identical() {
    let (_dir, _path, store) = common::open_store("repeat.db").await;
    common::seed(&store, "a", 5).await;

    let first = store.read_all_forwards(Position::from_raw(1), 3, false).await.unwrap();
    let second = store.read_all_forwards(Position::from_raw(1), 3, false).await.unwrap();

    assert_eq!(common::page_positions(&first), common::page_positions(&second));
    assert_eq!(first.from_position, second.from_position);
    assert_eq!(first.next_position, second.next_position);
    assert_eq!(first.is_end, second.is_end);

    let first_ids: Vec<_> = first.messages.iter().map(|m| m.message_id).collect();
    let second_ids: Vec<_> = second.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(first_ids, second_ids);

    store.shutdown().await;
}

#[tokio::test]
async fn page_is_a_snapshot() {
    let (_dir, _path, store) = common::open_store("snapshot.db").await;
    common::seed(&store, "a", 2).await;

    let page = store.read_all_forwards(Position::START, 10, false).await.unwrap();
    assert!(page.is_end);

    common::seed(&store, "a", 2).await;

    // The page keeps what it read; continuing picks up the new messages.
    assert_eq!(common::page_positions(&page), vec![0, 1]);
    let next = page.read_next().await.unwrap();
    assert_eq!(common::page_positions(&next), vec![2, 3]);

    store.shutdown().await;
}

#[tokio::test]
async fn max_count_larger_than_log_clamps() {
    let (_dir, _path, store) = common::open_store("clamp.db").await;
    common::seed(&store, "a", 3).await;

    let page = store.read_all_forwards(Position::START, 1000, false).await.unwrap();
    assert_eq!(page.messages.len(), 3);
    assert!(page.is_end);

    let page = store.read_all_forwards(Position::START, usize::MAX, false).await.unwrap();
    assert_eq!(page.messages.len(), 3);

    store.shutdown().await;
}

#[tokio::test]
async fn messages_carry_eager_fields() {
    let (_dir, _path, store) = common::open_store("fields.db").await;

    let message = streamstore::NewStreamMessage::new("OrderPlaced", b"{\"id\":1}".to_vec())
        .with_metadata(b"{\"user\":\"u\"}".to_vec());
    let id = message.message_id;
    store
        .append("orders", ExpectedVersion::NoStream, vec![message])
        .await
        .unwrap();

    let page = store.read_all_forwards(Position::START, 1, false).await.unwrap();
    let read = &page.messages[0];
    assert_eq!(read.message_id, id);
    assert_eq!(read.message_type, "OrderPlaced");
    assert_eq!(read.stream_id.as_str(), "orders");
    assert_eq!(read.stream_version.as_raw(), 0);
    assert_eq!(read.metadata.as_deref(), Some(&b"{\"user\":\"u\"}"[..]));
    assert!(read.created_ms > 0);
    assert!(!read.is_body_resolved());
    assert_eq!(read.body().await.unwrap(), Some(&b"{\"id\":1}"[..]));
    assert!(read.is_body_resolved());

    store.shutdown().await;
}

#[tokio::test]
async fn head_position_tracks_appends() {
    let (_dir, _path, store) = common::open_store("head.db").await;
    assert_eq!(store.read_head_position().await.unwrap(), Position::END);

    common::seed(&store, "a", 3).await;
    assert_eq!(store.read_head_position().await.unwrap(), Position::from_raw(2));

    store.shutdown().await;
}
