//! End-to-end scenarios running the full stack against the in-memory
//! engines: DDL, writes, schema evolution, branching, import with
//! inference, streaming reads with resume tokens and transaction
//! stitching, and the search mirror.

use std::sync::Arc;

use base64::Engine;
use lodestone_kv::MemoryKvStore;
use lodestone_metadata::NameRegistry;
use lodestone_search::MemorySearchStore;
use lodestone_server::api::{
    CreateBranchRequest, CreateOrUpdateCollectionRequest, CreateProjectRequest,
    DeleteBranchRequest, ImportRequest, InsertRequest, ReadRequest, ReadOptions, ReadResponse,
    Request, ResponseBody, SearchRequest, SearchResponse, UpdateRequest, VecSink,
    WriteResponse,
};
use lodestone_server::{ServerOptions, SessionManager};
use lodestone_types::{ApiResult, ErrorCode};
use serde_json::{json, Value};

fn session() -> Arc<SessionManager> {
    session_with_store(MemoryKvStore::new(), ServerOptions::default())
}

fn session_with_store(kv: MemoryKvStore, options: ServerOptions) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        Arc::new(kv),
        Arc::new(MemorySearchStore::new()),
        Arc::new(NameRegistry::default()),
        options,
    ))
}

const COLLECTION_SCHEMA: &str = r#"{
    "title": "c",
    "properties": {
        "K1": {"type": "string"},
        "K2": {"type": "integer"},
        "D1": {"type": "string", "max_length": 128}
    },
    "primary_key": ["K1", "K2"]
}"#;

async fn create_project(session: &SessionManager, project: &str) {
    let response = session
        .execute(Request::CreateProject(CreateProjectRequest { project: project.to_owned() }))
        .await
        .expect("create project");
    let ResponseBody::Status(status) = response else {
        panic!("unexpected response kind");
    };
    assert_eq!(status.status, "created");
}

async fn create_collection(session: &SessionManager, project: &str, schema: Value) {
    let response = session
        .execute(Request::CreateOrUpdateCollection(CreateOrUpdateCollectionRequest {
            project: project.to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            schema,
            only_create: false,
        }))
        .await
        .expect("create collection");
    let ResponseBody::Status(status) = response else {
        panic!("unexpected response kind");
    };
    assert_eq!(status.status, "created");
}

async fn insert(
    session: &SessionManager,
    project: &str,
    branch: &str,
    documents: Vec<Value>,
) -> ApiResult<WriteResponse> {
    let response = session
        .execute(Request::Insert(InsertRequest {
            project: project.to_owned(),
            branch: branch.to_owned(),
            collection: "c".to_owned(),
            documents,
        }))
        .await?;
    let ResponseBody::Write(write) = response else {
        panic!("unexpected response kind");
    };
    Ok(write)
}

async fn read(
    session: &SessionManager,
    project: &str,
    branch: &str,
    filter: Option<Value>,
    options: Option<ReadOptions>,
) -> ApiResult<Vec<ReadResponse>> {
    let sink = VecSink::<ReadResponse>::default();
    let items = sink.items.clone();
    session
        .execute(Request::Read(
            ReadRequest {
                project: project.to_owned(),
                branch: branch.to_owned(),
                collection: "c".to_owned(),
                filter,
                fields: None,
                sort: None,
                options,
            },
            Box::new(sink),
        ))
        .await?;
    let collected = items.lock().clone();
    Ok(collected)
}

// Scenario 1: create, insert, read back by primary key.
#[tokio::test]
async fn test_insert_and_read_roundtrip() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;

    let write = insert(&session, "p1", "main", vec![json!({"K1": "a", "K2": 1, "D1": "x"})])
        .await
        .expect("insert");
    assert_eq!(write.status, "inserted");
    assert_eq!(write.keys, vec![json!(["a", 1])]);

    let hits = read(&session, "p1", "main", Some(json!({"K1": "a", "K2": 1})), None)
        .await
        .expect("read");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].data, json!({"K1": "a", "K2": 1, "D1": "x"}));
    assert!(!hits[0].resume_token.is_empty());
    assert!(hits[0].metadata.created_at.is_some());
}

// Scenario 2: strict insert of an existing key.
#[tokio::test]
async fn test_reinsert_is_already_exists() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;

    let doc = json!({"K1": "a", "K2": 1, "D1": "x"});
    insert(&session, "p1", "main", vec![doc.clone()]).await.expect("insert");
    let err = insert(&session, "p1", "main", vec![doc]).await.expect_err("duplicate");
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
}

// Scenario 3: update by primary key sets the field and the update time.
#[tokio::test]
async fn test_update_sets_field_and_timestamps() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;
    insert(&session, "p1", "main", vec![json!({"K1": "a", "K2": 1, "D1": "x"})])
        .await
        .expect("insert");

    let response = session
        .execute(Request::Update(UpdateRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            filter: Some(json!({"K1": "a", "K2": 1})),
            fields: json!({"$set": {"D1": "y"}}),
            options: None,
        }))
        .await
        .expect("update");
    let ResponseBody::Write(write) = response else {
        panic!("unexpected response kind");
    };
    assert_eq!(write.status, "updated");
    assert_eq!(write.modified_count, 1);

    let hits = read(&session, "p1", "main", Some(json!({"K1": "a", "K2": 1})), None)
        .await
        .expect("read");
    assert_eq!(hits[0].data["D1"], json!("y"));

    let created = hits[0].metadata.created_at.as_deref().expect("created_at");
    let updated = hits[0].metadata.updated_at.as_deref().expect("updated_at");
    let created = chrono::DateTime::parse_from_rfc3339(created).expect("parse");
    let updated = chrono::DateTime::parse_from_rfc3339(updated).expect("parse");
    assert!(updated > created);
}

// Scenario 4: compatible schema evolution; old rows read without the new
// field, new inserts accept it.
#[tokio::test]
async fn test_compatible_schema_evolution() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;
    insert(&session, "p1", "main", vec![json!({"K1": "a", "K2": 1, "D1": "x"})])
        .await
        .expect("insert");

    let evolved = json!({
        "title": "c",
        "properties": {
            "K1": {"type": "string"},
            "K2": {"type": "integer"},
            "D1": {"type": "string", "max_length": 128},
            "D2": {"type": "string"}
        },
        "primary_key": ["K1", "K2"]
    });
    create_collection(&session, "p1", evolved).await;

    let hits = read(&session, "p1", "main", Some(json!({"K1": "a", "K2": 1})), None)
        .await
        .expect("read");
    assert!(hits[0].data.get("D2").is_none());

    insert(&session, "p1", "main", vec![json!({"K1": "b", "K2": 2, "D2": "fresh"})])
        .await
        .expect("insert with new field");
    let hits = read(&session, "p1", "main", Some(json!({"K1": "b", "K2": 2})), None)
        .await
        .expect("read");
    assert_eq!(hits[0].data["D2"], json!("fresh"));
}

// Scenario 5: removing a field is rejected while incompatible updates are
// disallowed.
#[tokio::test]
async fn test_incompatible_schema_rejected() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;

    let narrowed = json!({
        "title": "c",
        "properties": {
            "K1": {"type": "string"},
            "K2": {"type": "integer"}
        },
        "primary_key": ["K1", "K2"]
    });
    let err = session
        .execute(Request::CreateOrUpdateCollection(CreateOrUpdateCollectionRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            schema: narrowed,
            only_create: false,
        }))
        .await
        .expect_err("incompatible");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

// Scenario 6: branches are isolated; main cannot be deleted.
#[tokio::test]
async fn test_branch_isolation_and_main_protection() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;

    session
        .execute(Request::CreateBranch(CreateBranchRequest {
            project: "p1".to_owned(),
            branch: "dev".to_owned(),
        }))
        .await
        .expect("create branch");

    insert(&session, "p1", "dev", vec![json!({"K1": "a", "K2": 1, "D1": "dev-only"})])
        .await
        .expect("insert into branch");

    let main_hits = read(&session, "p1", "main", None, None).await.expect("read main");
    assert!(main_hits.is_empty());
    let dev_hits = read(&session, "p1", "dev", None, None).await.expect("read dev");
    assert_eq!(dev_hits.len(), 1);

    let err = session
        .execute(Request::DeleteBranch(DeleteBranchRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
        }))
        .await
        .expect_err("delete main");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert_eq!(err.to_string(), "'main' database cannot be deleted");
}

// Scenario 7: import creates the collection from inference, and widening
// through a second import works when incompatible updates are allowed.
#[tokio::test]
async fn test_import_with_inference_and_widening() {
    let mut options = ServerOptions::default();
    options.metadata.allow_incompatible_schema = true;
    let session = session_with_store(MemoryKvStore::new(), options);
    create_project(&session, "p1").await;

    let documents: Vec<Value> = (0..100)
        .map(|i| json!({"K1": format!("k{i:03}"), "K2": i}))
        .collect();
    let response = session
        .execute(Request::Import(ImportRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            documents,
            create_collection: true,
            primary_key: vec!["K1".to_owned()],
            autogenerated: vec![],
        }))
        .await
        .expect("import");
    let ResponseBody::Write(write) = response else {
        panic!("unexpected response kind");
    };
    assert_eq!(write.keys.len(), 100);

    let hits = read(&session, "p1", "main", None, None).await.expect("read");
    assert_eq!(hits.len(), 100);

    // document 101 carries K2 as a string: one schema-inference retry
    // widens the field and the insert goes through
    let response = session
        .execute(Request::Import(ImportRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            documents: vec![json!({"K1": "k100", "K2": "now-a-string"})],
            create_collection: true,
            primary_key: vec![],
            autogenerated: vec![],
        }))
        .await
        .expect("widening import");
    let ResponseBody::Write(write) = response else {
        panic!("unexpected response kind");
    };
    assert_eq!(write.keys.len(), 1);

    let hits = read(&session, "p1", "main", Some(json!({"K1": "k100"})), None)
        .await
        .expect("read");
    assert_eq!(hits[0].data["K2"], json!("now-a-string"));
}

#[tokio::test]
async fn test_import_widening_rejected_without_escape_hatch() {
    let session = session();
    create_project(&session, "p1").await;

    session
        .execute(Request::Import(ImportRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            documents: vec![json!({"K1": "a", "K2": 1})],
            create_collection: true,
            primary_key: vec!["K1".to_owned()],
            autogenerated: vec![],
        }))
        .await
        .expect("first import");

    let err = session
        .execute(Request::Import(ImportRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            documents: vec![json!({"K1": "b", "K2": "boom"})],
            create_collection: true,
            primary_key: vec![],
            autogenerated: vec![],
        }))
        .await
        .expect_err("widening needs the escape hatch");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

// Invariant 2 and 7: scans emit rows in key order, and resuming with the
// last token continues the same sequence without duplication.
#[tokio::test]
async fn test_resume_token_faithfulness() {
    let session = session();
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;

    let documents: Vec<Value> = (0..10)
        .map(|i| json!({"K1": format!("k{i:02}"), "K2": i, "D1": "v"}))
        .collect();
    insert(&session, "p1", "main", documents).await.expect("insert");

    let full = read(&session, "p1", "main", None, None).await.expect("full read");
    assert_eq!(full.len(), 10);

    // raw key bytes are strictly increasing
    let decode = |token: &str| {
        base64::engine::general_purpose::STANDARD
            .decode(token)
            .expect("token")
    };
    for pair in full.windows(2) {
        assert!(decode(&pair[0].resume_token) < decode(&pair[1].resume_token));
    }

    let first = read(
        &session,
        "p1",
        "main",
        None,
        Some(ReadOptions { limit: 4, offset: None }),
    )
    .await
    .expect("first page");
    assert_eq!(first.len(), 4);

    let resumed = read(
        &session,
        "p1",
        "main",
        None,
        Some(ReadOptions {
            limit: 0,
            offset: Some(first.last().expect("page").resume_token.clone()),
        }),
    )
    .await
    .expect("resumed");

    let mut stitched: Vec<Value> = first.iter().map(|r| r.data.clone()).collect();
    stitched.extend(resumed.iter().map(|r| r.data.clone()));
    let uninterrupted: Vec<Value> = full.iter().map(|r| r.data.clone()).collect();
    assert_eq!(stitched, uninterrupted);
}

// The transaction duration cap interrupts long scans; the runner
// restarts transparently from the last emitted key.
#[tokio::test]
async fn test_streaming_read_survives_transaction_limit() {
    let kv = MemoryKvStore::new().with_txn_scan_budget(10);
    let session = session_with_store(kv, ServerOptions::default());
    create_project(&session, "p1").await;
    create_collection(
        &session,
        "p1",
        serde_json::from_str(COLLECTION_SCHEMA).expect("schema"),
    )
    .await;

    let documents: Vec<Value> = (0..30)
        .map(|i| json!({"K1": format!("k{i:02}"), "K2": i, "D1": "v"}))
        .collect();
    insert(&session, "p1", "main", documents).await.expect("insert");

    let hits = read(&session, "p1", "main", None, None).await.expect("stitched read");
    assert_eq!(hits.len(), 30);
    let keys: Vec<&str> = hits.iter().map(|r| r.data["K1"].as_str().expect("k")).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

// Invariant 6: after a commit the search store holds the post-commit
// state and serves queries with facets and pagination metadata.
#[tokio::test]
async fn test_search_mirror_convergence() {
    let session = session();
    create_project(&session, "p1").await;
    let schema = json!({
        "title": "c",
        "properties": {
            "K1": {"type": "string"},
            "K2": {"type": "integer"},
            "D1": {"type": "string", "facet": true}
        },
        "primary_key": ["K1", "K2"]
    });
    create_collection(&session, "p1", schema).await;

    insert(
        &session,
        "p1",
        "main",
        vec![
            json!({"K1": "a", "K2": 1, "D1": "dark"}),
            json!({"K1": "b", "K2": 2, "D1": "light"}),
            json!({"K1": "c", "K2": 3, "D1": "dark"}),
        ],
    )
    .await
    .expect("insert");

    let sink = VecSink::<SearchResponse>::default();
    let items = sink.items.clone();
    session
        .execute(Request::Search(
            SearchRequest {
                project: "p1".to_owned(),
                branch: "main".to_owned(),
                collection: "c".to_owned(),
                q: "".to_owned(),
                filter: Some(json!({"D1": "dark"})),
                facet: Some(json!({"D1": {}})),
                ..Default::default()
            },
            Box::new(sink),
        ))
        .await
        .expect("search");

    let pages = items.lock().clone();
    assert!(!pages.is_empty());
    let page = &pages[0];
    assert_eq!(page.meta.found, 2);
    assert_eq!(page.hits.len(), 2);
    assert_eq!(page.meta.page.current, 1);
    let facets = page.facets.get("D1").expect("facet");
    assert_eq!(facets.counts[0].value, "dark");
    assert_eq!(facets.counts[0].count, 2);

    // deletes converge too
    session
        .execute(Request::Delete(lodestone_server::api::DeleteRequest {
            project: "p1".to_owned(),
            branch: "main".to_owned(),
            collection: "c".to_owned(),
            filter: Some(json!({"K1": "a", "K2": 1})),
            options: None,
        }))
        .await
        .expect("delete");

    let sink = VecSink::<SearchResponse>::default();
    let items = sink.items.clone();
    session
        .execute(Request::Search(
            SearchRequest {
                project: "p1".to_owned(),
                branch: "main".to_owned(),
                collection: "c".to_owned(),
                filter: Some(json!({"D1": "dark"})),
                ..Default::default()
            },
            Box::new(sink),
        ))
        .await
        .expect("search after delete");
    let pages = items.lock().clone();
    assert_eq!(pages[0].meta.found, 1);
}

// Sorting is served by the search path when the KV path cannot satisfy
// it.
#[tokio::test]
async fn test_sorted_read_routes_to_search() {
    let session = session();
    create_project(&session, "p1").await;
    let schema = json!({
        "title": "c",
        "properties": {
            "K1": {"type": "string"},
            "K2": {"type": "integer"},
            "price": {"type": "integer", "sortable": true}
        },
        "primary_key": ["K1", "K2"]
    });
    create_collection(&session, "p1", schema).await;

    insert(
        &session,
        "p1",
        "main",
        vec![
            json!({"K1": "a", "K2": 1, "price": 30}),
            json!({"K1": "b", "K2": 2, "price": 10}),
            json!({"K1": "c", "K2": 3, "price": 20}),
        ],
    )
    .await
    .expect("insert");

    let sink = VecSink::<ReadResponse>::default();
    let items = sink.items.clone();
    session
        .execute(Request::Read(
            ReadRequest {
                project: "p1".to_owned(),
                branch: "main".to_owned(),
                collection: "c".to_owned(),
                filter: None,
                fields: None,
                sort: Some(json!([{"price": "$asc"}])),
                options: None,
            },
            Box::new(sink),
        ))
        .await
        .expect("sorted read");

    let hits = items.lock().clone();
    let prices: Vec<i64> = hits.iter().map(|r| r.data["price"].as_i64().expect("price")).collect();
    assert_eq!(prices, vec![10, 20, 30]);
}
