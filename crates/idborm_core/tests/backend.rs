//! Integration tests for the backend against the in-memory store.

use idborm_codec::{Record, Value};
use idborm_core::{
    Aggregation, Backend, BackendConfig, BackendError, EntitySchema, FieldSchema, PendingChange,
    QueryState, TransactionState,
};
use idborm_storage::{InMemoryFactory, StorageError, StoreFactory};
use serde_json::json;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connected(name: &str) -> (Backend, InMemoryFactory) {
    init_tracing();
    let factory = InMemoryFactory::new();
    let backend = Backend::new(BackendConfig::new(name), Arc::new(factory.clone()));
    backend.connect().await.unwrap();
    (backend, factory)
}

fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .filter_map(|r| r.id().and_then(Value::as_integer))
        .collect()
}

async fn seed_posts(backend: &Backend) {
    for (title, views) in [("A", 10i64), ("B", 50), ("C", 30), ("D", 40), ("E", 20)] {
        backend
            .insert("posts", Record::new().with("title", title).with("views", views))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn fresh_database_insert_and_fetch_all() {
    let (backend, _) = connected("x").await;

    let saved = backend
        .insert("m", Record::new().with("title", "A"))
        .await
        .unwrap();
    let id = saved.id().and_then(Value::as_integer).unwrap();
    assert!(id >= 1);

    let all = backend.execute(&QueryState::new("m")).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("title"), Some(&Value::from("A")));
}

#[tokio::test]
async fn auto_ids_are_unique_and_readable() {
    let (backend, _) = connected("app").await;

    let mut seen = Vec::new();
    for i in 0..5i64 {
        let saved = backend
            .insert("notes", Record::new().with("n", i))
            .await
            .unwrap();
        let id = saved.id().cloned().unwrap();
        assert!(!seen.contains(&id));

        let fetched = backend.get_by_id("notes", &id).await.unwrap().unwrap();
        assert_eq!(fetched.get("n"), Some(&Value::Integer(i)));
        assert!(backend.exists_by_id("notes", &id).await.unwrap());
        seen.push(id);
    }

    assert!(!backend
        .exists_by_id("notes", &Value::Integer(999))
        .await
        .unwrap());
    assert!(backend
        .get_by_id("unknown", &Value::Integer(1))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn explicit_id_upserts() {
    let (backend, _) = connected("app").await;

    backend
        .insert("posts", Record::new().with("id", 7i64).with("title", "old"))
        .await
        .unwrap();
    backend
        .insert("posts", Record::new().with("id", 7i64).with("title", "new"))
        .await
        .unwrap();

    let all = backend.execute(&QueryState::new("posts")).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("title"), Some(&Value::from("new")));
}

#[tokio::test]
async fn duplicate_unique_email_is_rejected() {
    let (backend, _) = connected("app").await;
    backend.register_entity(EntitySchema::new("authors").field(FieldSchema::new("email").unique()));

    backend
        .insert("authors", Record::new().with("email", "ada@example.com"))
        .await
        .unwrap();
    let err = backend
        .insert("authors", Record::new().with("email", "ADA@example.com"))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());
    assert!(err.to_string().contains("email"));

    let count = backend.count(&QueryState::new("authors")).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn update_into_unique_collision_is_rejected() {
    let (backend, _) = connected("app").await;
    backend.register_entity(EntitySchema::new("authors").field(FieldSchema::new("email").unique()));

    backend
        .insert("authors", Record::new().with("email", "a@x"))
        .await
        .unwrap();
    let mut second = backend
        .insert("authors", Record::new().with("email", "b@x"))
        .await
        .unwrap();

    // Saving a record unchanged does not collide with itself.
    backend.update("authors", second.clone()).await.unwrap();

    second.set("email", "A@X");
    let err = backend.update("authors", second).await.unwrap_err();
    assert!(matches!(err, BackendError::UniqueViolation { ref field, .. } if field == "email"));
}

#[tokio::test]
async fn update_and_delete_require_id() {
    let (backend, _) = connected("app").await;

    let err = backend
        .update("posts", Record::new().with("title", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::MissingPrimaryKey { .. }));

    let err = backend
        .delete("posts", &Record::new().with("id", Value::Null))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::MissingPrimaryKey { .. }));

    // Deleting from a collection that does not exist yet is a no-op.
    backend
        .delete_by_id("never_written", &Value::Integer(1))
        .await
        .unwrap();
    assert!(!backend.table_exists("never_written").await.unwrap());
}

#[tokio::test]
async fn delete_by_id_removes_record() {
    let (backend, _) = connected("app").await;
    let saved = backend
        .insert("posts", Record::new().with("title", "A"))
        .await
        .unwrap();

    backend.delete("posts", &saved).await.unwrap();
    let id = saved.id().unwrap();
    assert!(!backend.exists_by_id("posts", id).await.unwrap());
}

#[tokio::test]
async fn filter_operators() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let run = |state: QueryState| {
        let backend = backend.clone();
        async move {
            let mut found: Vec<String> = backend
                .execute(&state)
                .await
                .unwrap()
                .iter()
                .filter_map(|r| r.get("title").and_then(Value::as_text).map(str::to_string))
                .collect();
            found.sort();
            found
        }
    };

    assert_eq!(run(QueryState::new("posts").filter("views", 30i64)).await, vec!["C"]);
    assert_eq!(
        run(QueryState::new("posts").filter("views__gte", 40i64)).await,
        vec!["B", "D"]
    );
    assert_eq!(
        run(QueryState::new("posts").filter("views__lte", 20i64)).await,
        vec!["A", "E"]
    );
    assert_eq!(
        run(QueryState::new("posts").filter("views__gt", 40i64)).await,
        vec!["B"]
    );
    assert_eq!(
        run(QueryState::new("posts").filter("views__lt", 20i64)).await,
        vec!["A"]
    );
    assert_eq!(
        run(QueryState::new("posts").filter("title__in", vec!["A", "C", "Z"])).await,
        vec!["A", "C"]
    );
    assert!(run(QueryState::new("posts").filter("title__contains", "a"))
        .await
        .is_empty());
    assert!(run(QueryState::new("posts").filter("title__regex", ".*"))
        .await
        .is_empty());
}

#[tokio::test]
async fn order_by_descending_reverses_ascending() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let asc = backend
        .execute(&QueryState::new("posts").order_by("views"))
        .await
        .unwrap();
    let mut desc = backend
        .execute(&QueryState::new("posts").order_by("-views"))
        .await
        .unwrap();
    desc.reverse();
    assert_eq!(ids(&asc), ids(&desc));
}

#[tokio::test]
async fn offset_and_limit_slice_the_ordered_set() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let all = backend
        .execute(&QueryState::new("posts").order_by("views"))
        .await
        .unwrap();
    let page = backend
        .execute(&QueryState::new("posts").order_by("views").offset(1).limit(2))
        .await
        .unwrap();
    assert_eq!(ids(&page), ids(&all[1..3]));

    let beyond = backend
        .execute(&QueryState::new("posts").offset(10).limit(2))
        .await
        .unwrap();
    assert!(beyond.is_empty());
}

#[tokio::test]
async fn projection_returns_selected_fields() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let rows = backend
        .execute(&QueryState::new("posts").order_by("title").limit(1).only(&["title"]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].field_names().collect::<Vec<_>>(), vec!["title"]);
}

#[tokio::test]
async fn nested_relation_filters() {
    let (backend, _) = connected("app").await;
    backend.register_entity(
        EntitySchema::new("books").field(FieldSchema::new("author").relation("authors")),
    );
    backend.register_entity(
        EntitySchema::new("authors").field(FieldSchema::new("publisher").relation("publishers")),
    );

    let acme = backend
        .insert("publishers", Record::new().with("name", "Acme Press"))
        .await
        .unwrap();
    let other = backend
        .insert("publishers", Record::new().with("name", "Other"))
        .await
        .unwrap();
    let ada = backend
        .insert(
            "authors",
            Record::new()
                .with("name", "Ada")
                .with("publisher", acme.id().cloned().unwrap()),
        )
        .await
        .unwrap();
    let bob = backend
        .insert(
            "authors",
            Record::new()
                .with("name", "Bob")
                .with("publisher", other.id().cloned().unwrap()),
        )
        .await
        .unwrap();
    for (title, author) in [("One", &ada), ("Two", &bob), ("Three", &ada)] {
        backend
            .insert(
                "books",
                Record::new()
                    .with("title", title)
                    .with("author", author.id().cloned().unwrap()),
            )
            .await
            .unwrap();
    }

    let by_author = backend
        .execute(&QueryState::new("books").filter("author__name", "Bob"))
        .await
        .unwrap();
    assert_eq!(by_author.len(), 1);
    assert_eq!(by_author[0].get("title"), Some(&Value::from("Two")));

    let by_publisher = backend
        .execute(
            &QueryState::new("books")
                .filter("author__publisher__name__contains", "Acme")
                .order_by("title"),
        )
        .await
        .unwrap();
    let titles: Vec<_> = by_publisher
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_text))
        .collect();
    assert_eq!(titles, vec!["One", "Three"]);
}

#[tokio::test]
async fn delete_many_removes_exactly_the_matches() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let state = QueryState::new("posts").filter("views__gte", 30i64);
    assert_eq!(backend.delete_many(&state).await.unwrap(), 3);
    assert!(backend.execute(&state).await.unwrap().is_empty());
    assert_eq!(backend.count(&QueryState::new("posts")).await.unwrap(), 2);
}

#[tokio::test]
async fn bulk_query_writes_respect_ordering_and_slicing() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let top_two = QueryState::new("posts").order_by("-views").limit(2);
    assert_eq!(backend.delete_many(&top_two).await.unwrap(), 2);
    let left = backend
        .execute(&QueryState::new("posts").order_by("views"))
        .await
        .unwrap();
    assert_eq!(ids(&left), vec![1, 5, 3]);

    let updated = backend
        .update_many(
            &QueryState::new("posts").order_by("views").offset(1).only(&["id"]),
            &Record::new().with("archived", true),
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);
    let archived = backend
        .execute(&QueryState::new("posts").filter("archived", true))
        .await
        .unwrap();
    assert_eq!(ids(&archived), vec![3, 5]);
    assert!(archived.iter().all(|r| r.get("title").is_some()));
}

#[tokio::test]
async fn update_many_sets_values() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    let updated = backend
        .update_many(
            &QueryState::new("posts").filter("views__lt", 30i64),
            &Record::new().with("archived", true),
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let archived = backend
        .count(&QueryState::new("posts").filter("archived", true))
        .await
        .unwrap();
    assert_eq!(archived, 2);
}

#[tokio::test]
async fn update_many_unique_conflict_changes_nothing() {
    let (backend, _) = connected("app").await;
    backend.register_entity(EntitySchema::new("users").field(FieldSchema::new("handle").unique()));
    for handle in ["a", "b"] {
        backend
            .insert("users", Record::new().with("handle", handle))
            .await
            .unwrap();
    }

    let err = backend
        .update_many(&QueryState::new("users"), &Record::new().with("handle", "same"))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());
    assert_eq!(
        backend
            .count(&QueryState::new("users").filter("handle", "same"))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn aggregates_over_fixture() {
    let (backend, _) = connected("app").await;
    for amount in [100i64, 200, 300] {
        backend
            .insert("orders", Record::new().with("amount", amount))
            .await
            .unwrap();
    }

    let result = backend
        .aggregate(
            &QueryState::new("orders"),
            &[
                Aggregation::count("amount"),
                Aggregation::sum("amount"),
                Aggregation::avg("amount"),
                Aggregation::min("amount"),
                Aggregation::max("amount"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.get("amount__count"), Some(&Value::Integer(3)));
    assert_eq!(result.get("amount__sum"), Some(&Value::Integer(600)));
    assert_eq!(
        result.get("amount__avg").and_then(Value::as_f64),
        Some(200.0)
    );
    assert_eq!(result.get("amount__min"), Some(&Value::Integer(100)));
    assert_eq!(result.get("amount__max"), Some(&Value::Integer(300)));

    let empty = backend
        .aggregate(
            &QueryState::new("orders").filter("amount__gt", 1000i64),
            &[Aggregation::avg("amount"), Aggregation::max("amount")],
        )
        .await
        .unwrap();
    assert_eq!(empty.get("amount__avg"), Some(&Value::Integer(0)));
    assert_eq!(empty.get("amount__max"), Some(&Value::Integer(0)));
}

#[tokio::test]
async fn bulk_insert_reports_failures_without_undoing_successes() {
    let (backend, _) = connected("app").await;
    backend.register_entity(EntitySchema::new("users").field(FieldSchema::new("email").unique()));

    let result = backend
        .bulk_insert(
            "users",
            vec![
                Record::new().with("email", "a@x"),
                Record::new().with("email", "A@x"),
                Record::new().with("email", "b@x"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.succeeded.len(), 2);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].index, 1);
    assert!(!result.is_complete());
    assert_eq!(backend.count(&QueryState::new("users")).await.unwrap(), 2);
}

#[tokio::test]
async fn bulk_update_copies_only_named_fields() {
    let (backend, _) = connected("app").await;
    let saved = backend
        .insert("posts", Record::new().with("title", "A").with("views", 1i64))
        .await
        .unwrap();
    let id = saved.id().cloned().unwrap();

    let result = backend
        .bulk_update(
            "posts",
            vec![
                Record::new()
                    .with("id", id.clone())
                    .with("title", "ignored")
                    .with("views", 2i64),
                Record::new().with("id", 999i64).with("views", 3i64),
                Record::new().with("views", 4i64),
            ],
            &["views"],
        )
        .await
        .unwrap();

    assert_eq!(result.succeeded.len(), 1);
    assert_eq!(result.failed.len(), 2);
    assert!(matches!(
        result.failed[0].error,
        BackendError::RecordNotFound { .. }
    ));
    assert!(matches!(
        result.failed[1].error,
        BackendError::MissingPrimaryKey { .. }
    ));

    let stored = backend.get_by_id("posts", &id).await.unwrap().unwrap();
    assert_eq!(stored.get("title"), Some(&Value::from("A")));
    assert_eq!(stored.get("views"), Some(&Value::Integer(2)));
}

#[tokio::test]
async fn transaction_commit_is_atomic() {
    let (backend, _) = connected("app").await;

    let mut tx = backend.begin_transaction().await.unwrap();
    tx.put("users", Record::new().with("name", "Ada")).unwrap();
    tx.put("posts", Record::new().with("id", 5i64).with("title", "Hi"))
        .unwrap();
    let written = tx.commit().await.unwrap();

    assert_eq!(written.len(), 2);
    assert!(written[0].id().is_some());
    assert!(backend.table_exists("users").await.unwrap());
    assert!(backend
        .exists_by_id("posts", &Value::Integer(5))
        .await
        .unwrap());

    // Reuse after commit fails fast.
    let err = tx.put("posts", Record::new()).unwrap_err();
    assert!(matches!(
        err,
        BackendError::TransactionInactive {
            state: TransactionState::Committed
        }
    ));
}

#[tokio::test]
async fn transaction_rollback_writes_nothing() {
    let (backend, _) = connected("app").await;
    let saved = backend
        .insert("posts", Record::new().with("title", "keep"))
        .await
        .unwrap();

    let mut tx = backend.begin_transaction().await.unwrap();
    tx.put("posts", Record::new().with("title", "discarded")).unwrap();
    tx.delete("posts", saved.id().cloned().unwrap()).unwrap();
    tx.rollback().unwrap();

    let all = backend.execute(&QueryState::new("posts")).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].get("title"), Some(&Value::from("keep")));
    assert!(tx.commit().await.is_err());
}

#[tokio::test]
async fn failed_transaction_writes_nothing_and_stays_failed() {
    let (backend, _) = connected("app").await;
    backend
        .insert("posts", Record::new().with("title", "first"))
        .await
        .unwrap();

    let mut tx = backend.begin_transaction().await.unwrap();
    tx.put("posts", Record::new().with("title", "second")).unwrap();
    // A key that is not a valid store key makes the native transaction abort.
    tx.delete("posts", Value::Bool(true)).unwrap();
    let err = tx.commit().await.unwrap_err();
    assert!(matches!(err, BackendError::Storage(StorageError::Data { .. })));
    assert_eq!(tx.state(), TransactionState::Failed);

    assert_eq!(backend.count(&QueryState::new("posts")).await.unwrap(), 1);
    assert!(tx.commit().await.is_err());
}

#[tokio::test]
async fn operations_before_connect_fail() {
    init_tracing();
    let backend = Backend::new(BackendConfig::new("app"), Arc::new(InMemoryFactory::new()));

    let err = backend
        .insert("posts", Record::new().with("title", "A"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::NotConnected));
    assert!(matches!(
        backend.execute(&QueryState::new("posts")).await,
        Err(BackendError::NotConnected)
    ));
}

#[tokio::test]
async fn disconnect_then_reconnect_keeps_data() {
    let (backend, _) = connected("app").await;
    backend
        .insert("posts", Record::new().with("title", "A"))
        .await
        .unwrap();

    backend.disconnect().await;
    assert!(!backend.is_connected().await);
    backend.connect().await.unwrap();

    assert!(backend.table_exists("posts").await.unwrap());
    assert_eq!(backend.count(&QueryState::new("posts")).await.unwrap(), 1);
}

#[tokio::test]
async fn clear_collection_empties_it() {
    let (backend, _) = connected("app").await;
    seed_posts(&backend).await;

    backend.clear_collection("posts").await.unwrap();
    assert!(backend.table_exists("posts").await.unwrap());
    assert_eq!(backend.count(&QueryState::new("posts")).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_database_blocked_by_other_connection() {
    let (backend, factory) = connected("app").await;
    backend
        .insert("posts", Record::new().with("title", "A"))
        .await
        .unwrap();

    let other = factory.open("app", None, None).await.unwrap();
    let err = backend.delete_database().await.unwrap_err();
    assert!(matches!(err, BackendError::Storage(StorageError::Blocked { .. })));

    other.close();
    backend.delete_database().await.unwrap();
    assert!(factory.database_names().is_empty());
    assert!(!backend.is_connected().await);
}

#[tokio::test]
async fn schema_editor_changes_wait_for_next_upgrade() {
    let (backend, _) = connected("app").await;
    let editor = backend.get_schema_editor();

    editor.create_collection("tags");
    editor.add_field("tags", "label");
    editor.create_index("users", "users_email", ["email"], true);
    assert_eq!(editor.pending().len(), 2);
    assert!(!backend.table_exists("tags").await.unwrap());

    // A write to a new collection runs the upgrade and drains the queue.
    backend
        .insert("users", Record::new().with("email", "a@x"))
        .await
        .unwrap();
    assert!(editor.pending().is_empty());
    assert!(backend.table_exists("tags").await.unwrap());

    // The index is now live in the store and is case-sensitive.
    let err = backend
        .insert("users", Record::new().with("email", "a@x"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BackendError::Storage(StorageError::Constraint { .. })
    ));
}

#[tokio::test]
async fn schema_editor_apply_forces_upgrade() {
    let (backend, factory) = connected("app").await;
    backend
        .insert("posts", Record::new().with("title", "A"))
        .await
        .unwrap();
    let version = factory.version_of("app").unwrap();

    let editor = backend.get_schema_editor();
    assert!(!editor.apply().await.unwrap());

    editor.drop_collection("posts");
    assert_eq!(
        editor.pending(),
        vec![PendingChange::DropCollection {
            collection: "posts".into()
        }]
    );
    assert!(editor.apply().await.unwrap());

    assert_eq!(factory.version_of("app"), Some(version + 1));
    assert!(!backend.table_exists("posts").await.unwrap());
}

#[tokio::test]
async fn queued_drop_does_not_undo_lazy_create() {
    let (backend, _) = connected("app").await;
    let editor = backend.get_schema_editor();
    editor.drop_collection("posts");

    let post = backend
        .insert("posts", Record::new().with("title", "A"))
        .await
        .unwrap();
    assert_eq!(post.id(), Some(&Value::Integer(1)));
    assert!(editor.pending().is_empty());
    assert!(backend.table_exists("posts").await.unwrap());
    assert_eq!(
        backend.execute(&QueryState::new("posts")).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn compile_describes_the_query() {
    let (backend, _) = connected("app").await;
    let compiled = backend.compile(
        &QueryState::new("posts")
            .filter("author__name", "Ada")
            .filter("views__gte", 10i64)
            .order_by("-views")
            .offset(2)
            .limit(5)
            .only(&["id"]),
    );

    assert_eq!(compiled.operation, "scan");
    assert_eq!(compiled.params["collection"], json!("posts"));
    assert_eq!(compiled.params["filters"][0]["lookup"], json!("author__name"));
    assert_eq!(compiled.params["filters"][1]["op"], json!("gte"));
    assert_eq!(compiled.params["order_by"], json!(["-views"]));
    assert_eq!(compiled.params["offset"], json!(2));
    assert_eq!(compiled.params["limit"], json!(5));
    assert_eq!(compiled.params["fields"], json!(["id"]));
}

#[tokio::test]
async fn records_round_trip_through_json() {
    let (backend, _) = connected("app").await;
    let record = Record::from_json(json!({"title": "A", "tags": ["x"], "score": 1.5})).unwrap();

    let saved = backend.insert("posts", record).await.unwrap();
    let fetched = backend
        .get_by_id("posts", saved.id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.to_json()["tags"], json!(["x"]));
    assert_eq!(fetched.to_json()["score"], json!(1.5));
}
