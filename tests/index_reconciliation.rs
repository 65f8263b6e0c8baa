use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use widetable::catalog::schema::TableSchema;
use widetable::catalog::types::{Row, Value};
use widetable::query::Predicate;
use widetable::store::memory::MemoryStore;
use widetable::{
    DeleteRequest, GetRequest, PutRequest, Status, TidGenerator, WideTable, WideTableConfig,
    derive_namespace,
};

const DOMAIN: &str = "en.wikipedia.org";

fn pages_schema() -> TableSchema {
    TableSchema::from_json(json!({
        "table": "pages",
        "attributes": {"key": "string", "tid": "timeuuid", "uri": "string", "body": "blob"},
        "index": {"hash": "key", "range": "tid", "order": "desc"},
        "secondaryIndexes": {"by_uri": {"hash": "uri", "proj": "body"}}
    }))
    .expect("schema")
}

async fn setup() -> (Arc<MemoryStore>, WideTable<Arc<MemoryStore>>) {
    setup_with(WideTableConfig::single_node()).await
}

async fn setup_with(config: WideTableConfig) -> (Arc<MemoryStore>, WideTable<Arc<MemoryStore>>) {
    let store = Arc::new(MemoryStore::new());
    let table = WideTable::new(Arc::clone(&store), config).expect("widetable");
    table
        .create_table(DOMAIN, &pages_schema())
        .await
        .expect("create pages");
    (store, table)
}

fn page(key: &str, tid: Uuid, uri: &str, body: &str) -> PutRequest {
    PutRequest::new("pages")
        .attribute("key", key)
        .attribute("tid", tid)
        .attribute("uri", uri)
        .attribute("body", body)
}

/// One stale entry per primary key `a0000..`, all sorting ahead of `z_live`.
async fn stale_run_then_live_row(
    store: &MemoryStore,
    table: &WideTable<Arc<MemoryStore>>,
    uri: &str,
    stale: usize,
) {
    let keyspace = derive_namespace(DOMAIN, "pages");
    let tids = TidGenerator::new();
    for i in 0..stale {
        store
            .put_row(&keyspace, "i_by_uri", index_entry(uri, &format!("a{i:04}"), tids.next()))
            .expect("plant stale entry");
    }
    table
        .put(DOMAIN, &page("z_live", tids.next(), uri, "live"))
        .await
        .expect("put live");
}

fn by_uri(uri: &str) -> GetRequest {
    GetRequest::new("pages")
        .index("by_uri")
        .filter(Predicate::new().eq("uri", uri))
}

fn index_entry(uri: &str, key: &str, tid: Uuid) -> Row {
    let mut row = Row::new();
    row.insert("uri".into(), Value::from(uri));
    row.insert("key".into(), Value::from(key));
    row.insert("tid".into(), Value::Uuid(tid));
    row.insert("body".into(), Value::Blob(b"stale".to_vec()));
    row
}

#[tokio::test]
async fn index_read_returns_matching_row_without_bookkeeping_and_tracks_deletes() {
    let (_store, table) = setup().await;
    let tids = TidGenerator::new();
    let revisions = [tids.next(), tids.next(), tids.next()];
    for (tid, uri) in revisions.iter().zip(["/wiki/A", "/wiki/B", "/wiki/C"]) {
        let response = table
            .put(DOMAIN, &page("Main_Page", *tid, uri, &format!("<p>{uri}</p>")))
            .await
            .expect("put");
        assert_eq!(response.status, Status::Created);
        assert_eq!(response.status.as_http(), 201);
    }

    let response = table.get(DOMAIN, &by_uri("/wiki/B")).await.expect("get");
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.count, 1);
    let item = &response.items[0];
    assert_eq!(item["key"], Value::from("Main_Page"));
    assert_eq!(item["tid"], Value::Uuid(revisions[1]));
    assert_eq!(item["body"], Value::Blob(b"<p>/wiki/B</p>".to_vec()));
    assert!(item.keys().all(|name| !name.starts_with('_')));

    table
        .delete(
            DOMAIN,
            &DeleteRequest::new(
                "pages",
                Predicate::new()
                    .eq("key", "Main_Page")
                    .eq("tid", revisions[1]),
            ),
        )
        .await
        .expect("delete");
    let response = table.get(DOMAIN, &by_uri("/wiki/B")).await.expect("get");
    assert_eq!(response.status, Status::NotFound);
    assert_eq!(response.status.as_http(), 404);
    assert_eq!(response.count, 0);
    assert!(response.items.is_empty());

    let response = table.get(DOMAIN, &by_uri("/wiki/C")).await.expect("get");
    assert_eq!(response.count, 1);
}

#[tokio::test]
async fn overwritten_rows_leave_stale_entries_that_are_filtered() {
    let (store, table) = setup().await;
    let tid = TidGenerator::new().next();
    table
        .put(DOMAIN, &page("Main_Page", tid, "/wiki/Old", "v1"))
        .await
        .expect("first put");
    table
        .put(DOMAIN, &page("Main_Page", tid, "/wiki/New", "v2"))
        .await
        .expect("second put");

    let keyspace = derive_namespace(DOMAIN, "pages");
    assert_eq!(store.rows(&keyspace, "i_by_uri").len(), 2);

    let old = table.get(DOMAIN, &by_uri("/wiki/Old")).await.expect("get old");
    assert_eq!(old.status, Status::NotFound);
    let new = table.get(DOMAIN, &by_uri("/wiki/New")).await.expect("get new");
    assert_eq!(new.count, 1);
    assert_eq!(new.items[0]["body"], Value::Blob(b"v2".to_vec()));
}

#[tokio::test]
async fn limited_reads_skip_stale_entries_until_the_limit_is_met() {
    let (store, table) = setup().await;
    let keyspace = derive_namespace(DOMAIN, "pages");
    let tids = TidGenerator::new();

    // stale keys sort ahead of the live ones inside the index partition
    for i in 0..10 {
        store
            .put_row(
                &keyspace,
                "i_by_uri",
                index_entry("/wiki/Shared", &format!("a{i:02}"), tids.next()),
            )
            .expect("plant stale entry");
    }
    let live = ["m1", "m2", "m3"];
    for key in live {
        table
            .put(DOMAIN, &page(key, tids.next(), "/wiki/Shared", key))
            .await
            .expect("put live");
    }

    let response = table
        .get(DOMAIN, &by_uri("/wiki/Shared").limit(2))
        .await
        .expect("limit 2");
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.count, 2);
    let keys = response
        .items
        .iter()
        .map(|row| row["key"].clone())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec![Value::from("m1"), Value::from("m2")]);

    let response = table
        .get(DOMAIN, &by_uri("/wiki/Shared").limit(10))
        .await
        .expect("limit 10");
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.count, live.len());
}

#[tokio::test]
async fn reads_over_only_stale_entries_terminate_as_not_found() {
    let (store, table) = setup().await;
    let keyspace = derive_namespace(DOMAIN, "pages");
    let tids = TidGenerator::new();
    for i in 0..40 {
        store
            .put_row(
                &keyspace,
                "i_by_uri",
                index_entry("/wiki/Gone", &format!("k{}", i % 4), tids.next()),
            )
            .expect("plant stale entry");
    }

    let response = table
        .get(DOMAIN, &by_uri("/wiki/Gone").limit(3))
        .await
        .expect("get");
    assert_eq!(response.status, Status::NotFound);
    assert_eq!(response.count, 0);
}

#[tokio::test]
async fn tombstoned_index_entries_are_never_looked_up() {
    let (store, table) = setup().await;
    let keyspace = derive_namespace(DOMAIN, "pages");
    let tid = TidGenerator::new().next();
    table
        .put(DOMAIN, &page("Main_Page", tid, "/wiki/A", "body"))
        .await
        .expect("put");

    let mut entry = index_entry("/wiki/A", "Main_Page", tid);
    entry.insert("_tombstone".into(), Value::Boolean(true));
    store
        .put_row(&keyspace, "i_by_uri", entry)
        .expect("tombstone");
    store.clear_log();

    let response = table.get(DOMAIN, &by_uri("/wiki/A")).await.expect("get");
    assert_eq!(response.status, Status::NotFound);
    assert!(
        store
            .statements()
            .iter()
            .all(|cql| !cql.contains("\"data\"")),
        "no primary lookups expected"
    );
}

#[tokio::test]
async fn surrogate_ids_keep_one_entry_per_write_and_reads_dedupe() {
    let store = Arc::new(MemoryStore::new());
    let table = WideTable::new(Arc::clone(&store), WideTableConfig::default()).expect("widetable");
    let schema = TableSchema::from_json(json!({
        "table": "users",
        "attributes": {"id": "string", "email": "string", "name": "string"},
        "index": {"hash": "id"},
        "secondaryIndexes": {"by_email": {"hash": "email", "proj": "name"}}
    }))
    .expect("schema");
    table.create_table("example.org", &schema).await.expect("create");

    for name in ["Ada", "Ada L."] {
        table
            .put(
                "example.org",
                &PutRequest::new("users")
                    .attribute("id", "u1")
                    .attribute("email", "ada@example.org")
                    .attribute("name", name),
            )
            .await
            .expect("put");
    }

    let keyspace = derive_namespace("example.org", "users");
    let entries = store.rows(&keyspace, "i_by_email");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|row| matches!(row.get("_tid"), Some(Value::Uuid(_)))));

    let response = table
        .get(
            "example.org",
            &GetRequest::new("users")
                .index("by_email")
                .filter(Predicate::new().eq("email", "ada@example.org"))
                .project(["id", "name"]),
        )
        .await
        .expect("get");
    assert_eq!(response.count, 1);
    assert_eq!(response.items[0]["name"], Value::from("Ada L."));
    assert_eq!(response.items[0].len(), 2);
}

#[tokio::test]
async fn long_stale_runs_do_not_exhaust_the_round_budget() {
    let (store, table) = setup().await;
    let rounds = table.config().max_index_rounds;
    stale_run_then_live_row(&store, &table, "/wiki/Busy", rounds * 3).await;

    for limit in [1, 4] {
        let response = table
            .get(DOMAIN, &by_uri("/wiki/Busy").limit(limit))
            .await
            .expect("get");
        assert_eq!(response.status, Status::Ok, "limit {limit}");
        assert_eq!(response.count, 1, "limit {limit}");
        assert_eq!(response.items[0]["key"], Value::from("z_live"));
    }
}

#[tokio::test]
async fn every_resumed_round_reads_a_full_fetch() {
    // no fetch growth: progress comes from resuming past each group in one round
    let config = WideTableConfig {
        max_index_rounds: 24,
        max_index_fetch: 2,
        ..WideTableConfig::single_node()
    };
    let (store, table) = setup_with(config).await;
    stale_run_then_live_row(&store, &table, "/wiki/Slow", 40).await;
    store.clear_log();

    let response = table
        .get(DOMAIN, &by_uri("/wiki/Slow").limit(1))
        .await
        .expect("get");
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.count, 1);
    assert_eq!(response.items[0]["key"], Value::from("z_live"));

    let index_reads = store
        .statements()
        .iter()
        .filter(|cql| cql.contains("\"i_by_uri\""))
        .count();
    assert!(index_reads <= 2 * 24, "{index_reads} index reads");
}

#[tokio::test]
async fn huge_limits_on_index_reads_are_served() {
    let (_store, table) = setup().await;
    let tid = TidGenerator::new().next();
    table
        .put(DOMAIN, &page("Main_Page", tid, "/wiki/A", "body"))
        .await
        .expect("put");

    let request = GetRequest::from_json(&json!({
        "table": "pages",
        "index": "by_uri",
        "attributes": {"uri": "/wiki/A"},
        "limit": 1_000_000_000_000_000_000u64
    }))
    .expect("request");
    assert_eq!(request.limit, Some(1_000_000_000_000_000_000));

    let response = table.get(DOMAIN, &request).await.expect("get");
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.count, 1);
}
