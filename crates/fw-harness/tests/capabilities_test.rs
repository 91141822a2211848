use fw_core::db::Database;
use fw_core::event_log::EventLog;
use fw_core::invariants::InvariantChecker;
use fw_core::tree::TreeStore;
use fw_core::types::NewFile;
use fw_harness::capabilities::{CapabilityError, CapabilityHost, TokenUsage, ToolCall, TraceEntry};
use serde_json::json;

struct Fixture {
    tree: TreeStore,
    log: EventLog,
    host: CapabilityHost,
}

async fn fixture(max_steps: u32) -> Fixture {
    let db = Database::open_in_memory().await.unwrap();
    let log = EventLog::new(&db);
    let tree = TreeStore::new(&db, log.clone());
    let host = CapabilityHost::new(1, &tree, InvariantChecker::new(&db), max_steps);
    host.begin_round();
    Fixture { tree, log, host }
}

#[tokio::test]
async fn create_folder_is_idempotent() {
    let f = fixture(10).await;
    let first = f
        .host
        .invoke(ToolCall::new("create_folder", json!({ "name": "Docs" })))
        .await
        .unwrap();
    let second = f
        .host
        .invoke(ToolCall::new("create_folder", json!({ "name": "Docs", "parent_id": 0 })))
        .await
        .unwrap();

    let a = first.json().unwrap();
    let b = second.json().unwrap();
    assert_eq!(a["created"], true);
    assert_eq!(b["created"], false);
    assert_eq!(a["folder_id"], b["folder_id"]);
    assert!(b["message"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn capability_mutations_are_not_logged() {
    let f = fixture(10).await;
    let file = f.tree.create_file(1, NewFile::named("a.txt", None)).await.unwrap();
    let before = f.log.latest_event_id(1).await.unwrap();

    let created = f
        .host
        .invoke(ToolCall::new("create_folder", json!({ "name": "Inbox" })))
        .await
        .unwrap();
    let folder_id = created.json().unwrap()["folder_id"].as_i64().unwrap();
    let moved = f
        .host
        .invoke(ToolCall::new(
            "move_file",
            json!({ "file_id": file.id, "target_folder_id": folder_id }),
        ))
        .await
        .unwrap();
    assert!(!moved.is_error);

    assert_eq!(f.log.latest_event_id(1).await.unwrap(), before);
    assert_eq!(f.tree.file_info(1, file.id).await.unwrap().parent_id, Some(folder_id));
}

#[tokio::test]
async fn refusals_come_back_as_error_outcomes() {
    let f = fixture(10).await;
    let a = f.tree.create_folder(1, "A", None).await.unwrap();
    f.tree.create_folder(1, "B", None).await.unwrap();
    f.tree.create_file(1, NewFile::named("x", Some(a.id))).await.unwrap();

    let rename = f
        .host
        .invoke(ToolCall::new("rename_folder", json!({ "folder_id": a.id, "new_name": "B" })))
        .await
        .unwrap();
    assert!(rename.is_error);
    assert!(rename.content.contains("already exists"));

    let delete = f
        .host
        .invoke(ToolCall::new("delete_folder", json!({ "folder_id": a.id })))
        .await
        .unwrap();
    assert!(delete.is_error);

    let unknown = f.host.invoke(ToolCall::new("format_disk", json!({}))).await.unwrap();
    assert!(unknown.is_error);
    assert!(unknown.content.contains("unknown capability"));

    let missing = f.host.invoke(ToolCall::new("move_file", json!({}))).await.unwrap();
    assert!(missing.is_error);
    assert!(missing.content.contains("file_id"));
}

#[tokio::test]
async fn step_ceiling_applies_per_round() {
    let f = fixture(2).await;
    let list = || ToolCall::new("list_tree", json!({}));

    f.host.invoke(list()).await.unwrap();
    f.host.invoke(list()).await.unwrap();
    assert!(matches!(f.host.invoke(list()).await, Err(CapabilityError::StepLimit(2))));

    f.host.begin_round();
    f.host.invoke(list()).await.unwrap();
    assert_eq!(f.host.total_steps(), 3);
}

#[tokio::test]
async fn trace_records_rounds_calls_and_usage() {
    let f = fixture(10).await;
    f.host.invoke(ToolCall::new("find_empty_folders", json!({}))).await.unwrap();
    f.host.record_usage(TokenUsage::new(100, 20));
    f.host.begin_round();
    f.host.record_usage(TokenUsage::new(5, 5));

    let trace = f.host.trace();
    assert_eq!(trace.len(), 5);
    assert!(matches!(trace[0], TraceEntry::Round { round: 1 }));
    assert!(matches!(&trace[1], TraceEntry::Call { call, .. } if call.name == "find_empty_folders"));
    assert!(matches!(trace[3], TraceEntry::Round { round: 2 }));
    assert_eq!(f.host.usage(), TokenUsage::new(105, 25));

    let rendered = f.host.render_trace();
    assert!(rendered.contains("== round 2 =="));
    assert!(rendered.contains("find_empty_folders"));
    assert!(rendered.contains("usage: input=100 output=20 total=120"));
}

#[tokio::test]
async fn invariant_capabilities_report_violations() {
    let f = fixture(10).await;
    let docs = f.tree.create_folder(1, "Docs", None).await.unwrap();
    f.tree.create_file(1, NewFile::named("loose.txt", None)).await.unwrap();

    let mixed = f
        .host
        .invoke(ToolCall::new("find_mixed_content_folders", json!({})))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(mixed["clean"], false);
    assert_eq!(mixed["folder_ids"], json!([0]));

    let empty = f
        .host
        .invoke(ToolCall::new("find_empty_folders", json!({})))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(empty["folder_ids"], json!([docs.id]));
}

#[tokio::test]
async fn list_tree_and_file_information() {
    let f = fixture(10).await;
    let docs = f.tree.create_folder(1, "Docs", None).await.unwrap();
    let mut new_file = NewFile::named("report.pdf", Some(docs.id));
    new_file.size = Some(2048);
    new_file.mime_type = Some("application/pdf".into());
    let file = f.tree.create_file(1, new_file).await.unwrap();

    let tree = f.host.invoke(ToolCall::new("list_tree", json!({}))).await.unwrap().json().unwrap();
    assert_eq!(tree["folders"][0]["parent_id"], 0);
    assert_eq!(tree["files"][0]["parent_id"], docs.id);

    let info = f
        .host
        .invoke(ToolCall::new("get_file_information", json!({ "file_id": file.id })))
        .await
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(info["size"], 2048);
    assert_eq!(info["mime_type"], "application/pdf");
}
