mod common;

use streamstore::{Database, ExpectedVersion, Position, StreamStore, StreamVersion};

#[tokio::test]
async fn positions_and_versions_continue_after_reopen() {
    let (_dir, path, store) = common::open_store("reopen.db").await;
    common::seed(&store, "a", 3).await;
    common::seed(&store, "b", 2).await;
    store.shutdown().await;

    let store = StreamStore::open_with_config(&path, common::test_config())
        .await
        .unwrap();

    assert_eq!(store.read_head_position().await.unwrap(), Position::from_raw(4));
    assert_eq!(
        store.stream_version("a").await.unwrap(),
        Some(StreamVersion::from_raw(2))
    );

    let result = store
        .append("a", ExpectedVersion::Exact(2), common::messages("a", 1))
        .await
        .unwrap();
    assert_eq!(result.first_position, Position::from_raw(5));
    assert_eq!(result.first_version, StreamVersion::from_raw(3));

    store.shutdown().await;
}

#[tokio::test]
async fn committed_messages_survive_reopen() {
    let (_dir, path, store) = common::open_store("durable.db").await;
    common::seed(&store, "s", 4).await;
    let before = store.read_all_forwards(Position::START, 10, true).await.unwrap();
    store.shutdown().await;

    let store = StreamStore::open_with_config(&path, common::test_config())
        .await
        .unwrap();
    let after = store.read_all_forwards(Position::START, 10, true).await.unwrap();

    assert_eq!(before.messages.len(), after.messages.len());
    for (b, a) in before.messages.iter().zip(&after.messages) {
        assert_eq!(b.message_id, a.message_id);
        assert_eq!(b.position, a.position);
        assert_eq!(b.created_ms, a.created_ms);
        assert_eq!(b.body().await.unwrap(), a.body().await.unwrap());
    }

    store.shutdown().await;
}

#[tokio::test]
async fn counter_survives_deleting_newest_stream_across_reopen() {
    let (_dir, path, store) = common::open_store("counter.db").await;
    common::seed(&store, "old", 2).await;
    common::seed(&store, "newest", 3).await;
    store
        .delete_stream("newest", ExpectedVersion::Any)
        .await
        .unwrap();
    store.shutdown().await;

    let store = StreamStore::open_with_config(&path, common::test_config())
        .await
        .unwrap();
    let result = store
        .append("fresh", ExpectedVersion::NoStream, common::messages("f", 1))
        .await
        .unwrap();
    assert_eq!(result.first_position, Position::from_raw(5));

    store.shutdown().await;
}

#[tokio::test]
async fn duplicate_detection_survives_reopen() {
    let (_dir, path, store) = common::open_store("dedup.db").await;
    let batch = common::messages("s", 2);
    let first = store
        .append("s", ExpectedVersion::NoStream, batch.clone())
        .await
        .unwrap();
    store.shutdown().await;

    let store = StreamStore::open_with_config(&path, common::test_config())
        .await
        .unwrap();
    let retry = store
        .append("s", ExpectedVersion::NoStream, batch)
        .await
        .unwrap();

    assert!(retry.duplicate);
    assert_eq!(retry.first_position, first.first_position);
    assert_eq!(store.read_head_position().await.unwrap(), Position::from_raw(1));

    store.shutdown().await;
}

#[test]
fn reopening_database_keeps_schema() {
    common::init_tracing();
    let (_dir, path) = common::create_temp_db_file("schema.db");

    Database::open(&path).unwrap();
    Database::open(&path).unwrap();

    let conn = common::open_read_only(&path);
    let version: String = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, "1");
}
