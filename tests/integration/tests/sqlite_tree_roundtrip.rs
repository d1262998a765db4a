use std::{
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use bonsai_cli::{execute_command, CliCommand};
use bonsai_tree::{NodeId, NodeKind, SqliteTreeBackend, TreeStore};
use serde_json::Value;

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(1);

struct IsolatedWorkspace {
    root: PathBuf,
}

impl IsolatedWorkspace {
    fn new(label: &str) -> Self {
        let tick = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let count = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "bonsai-{label}-{}-{tick}-{count}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("must create isolated workspace root");
        Self { root }
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn db_path(&self) -> PathBuf {
        self.root.join(".bonsai").join("bonsai.db")
    }
}

impl Drop for IsolatedWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn open_store(path: &Path) -> TreeStore<SqliteTreeBackend> {
    TreeStore::new(SqliteTreeBackend::open(path).expect("open sqlite store"))
}

fn close_store(store: TreeStore<SqliteTreeBackend>) {
    store.into_backend().close().expect("close sqlite store");
}

fn run_command(store: &TreeStore<SqliteTreeBackend>, command: CliCommand, input: &str) -> String {
    let mut reader = input.as_bytes();
    let mut out = Vec::new();
    execute_command(store, command, &mut reader, &mut out).expect("command should succeed");
    String::from_utf8(out).expect("utf8 output")
}

fn current_id(store: &TreeStore<SqliteTreeBackend>) -> NodeId {
    store
        .current()
        .expect("read pointer")
        .expect("pointer should be set")
}

#[test]
fn integration_conversation_and_pointer_survive_reopen() {
    let workspace = IsolatedWorkspace::new("reopen");
    let db_path = workspace.db_path();

    let store = open_store(&db_path);
    let root = store
        .create_root("plan a trip", None)
        .expect("root")
        .into_node();
    let question = store
        .create_user_child("somewhere warm", &root.id, Some("m1".to_string()))
        .expect("question")
        .into_node();
    let answer = store
        .create_assistant_reply(&question.id, "try lisbon", "m1")
        .expect("answer")
        .into_node();
    let branch = store
        .create_user_child("actually, somewhere cold", &root.id, None)
        .expect("branch")
        .into_node();
    store.checkout(&answer.id).expect("checkout answer");
    close_store(store);

    let store = open_store(&db_path);
    assert_eq!(current_id(&store), answer.id);

    let history = store
        .conversation_history(&answer.id)
        .expect("history")
        .into_iter()
        .map(|node| node.id)
        .collect::<Vec<_>>();
    assert_eq!(history, vec![root.id.clone(), question.id.clone(), answer.id.clone()]);

    let reloaded = store.get_node(&answer.id).expect("answer");
    assert_eq!(reloaded.kind, NodeKind::Assistant);
    assert_eq!(reloaded.model.as_deref(), Some("m1"));

    let mut child_ids = vec![question.id.clone(), branch.id.clone()];
    child_ids.sort();
    let listed = store
        .children(&root.id)
        .expect("children")
        .into_iter()
        .map(|node| node.id)
        .collect::<Vec<_>>();
    assert_eq!(listed, child_ids);
    assert!(store.validation_report().expect("report").is_valid());
    close_store(store);
}

#[test]
fn functional_cli_commands_drive_an_on_disk_tree() {
    let workspace = IsolatedWorkspace::new("cli");
    let store = open_store(&workspace.db_path());

    run_command(
        &store,
        CliCommand::Seed {
            content: "draft an email".to_string(),
            model: Some("m1".to_string()),
        },
        "",
    );
    let root_id = current_id(&store);
    run_command(
        &store,
        CliCommand::Reply {
            content: "Dear team,".to_string(),
            model: "m1".to_string(),
            parent: None,
        },
        "",
    );
    run_command(
        &store,
        CliCommand::Say {
            message: "shorter please".to_string(),
            model: None,
        },
        "",
    );

    let output = run_command(&store, CliCommand::Log { up: 1, all: true }, "");
    assert!(output.contains("ancestors=2"));

    let export_path = workspace.root().join("tree.json");
    run_command(
        &store,
        CliCommand::Tree {
            output: Some(export_path.clone()),
        },
        "",
    );
    let exported: Value =
        serde_json::from_str(&fs::read_to_string(&export_path).expect("read export"))
            .expect("parse export");
    assert_eq!(exported["node_count"], 3);
    assert_eq!(exported["roots"][0]["id"], root_id.as_str());
    assert_eq!(exported["roots"][0]["children"][0]["kind"], "assistant");
    assert_eq!(
        exported["roots"][0]["children"][0]["children"][0]["model"],
        "m1"
    );
    close_store(store);
}

#[test]
fn functional_cherry_pick_then_prune_across_reopen() {
    let workspace = IsolatedWorkspace::new("graft");
    let db_path = workspace.db_path();

    let store = open_store(&db_path);
    let first = store.create_root("first", None).expect("first").into_node();
    let keeper = store
        .create_assistant_reply(&first.id, "keep this answer", "m2")
        .expect("keeper")
        .into_node();
    let second = store.create_root("second", None).expect("second").into_node();
    let copy = store
        .cherry_pick(&keeper.id, &second.id)
        .expect("cherry-pick")
        .into_node();
    close_store(store);

    let store = open_store(&db_path);
    let output = run_command(
        &store,
        CliCommand::Prune {
            id: first.id.to_string(),
            yes: false,
        },
        "y\n",
    );
    assert!(output.contains("deleted=2"));
    assert!(!store.contains(&first.id).expect("first"));
    assert!(!store.contains(&keeper.id).expect("keeper"));

    let copy = store.get_node(&copy.id).expect("copy survives");
    assert_eq!(copy.parent.as_ref(), Some(&second.id));
    assert_eq!(copy.content, "keep this answer");
    assert_eq!(copy.model.as_deref(), Some("m2"));
    assert_eq!(current_id(&store), copy.id);
    close_store(store);
}

#[test]
fn regression_concurrent_connections_share_one_database_file() {
    let workspace = IsolatedWorkspace::new("concurrent");
    let db_path = workspace.db_path();
    let root = {
        let store = open_store(&db_path);
        let root = store.create_root("shared", None).expect("root").into_node();
        close_store(store);
        root
    };

    let handles = (0..4)
        .map(|worker| {
            let db_path = db_path.clone();
            let root_id = root.id.clone();
            thread::spawn(move || {
                let store = open_store(&db_path);
                for turn in 0..10 {
                    store
                        .create_user_child(format!("worker {worker} turn {turn}"), &root_id, None)
                        .expect("concurrent create");
                }
                close_store(store);
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().expect("worker thread");
    }

    let store = open_store(&db_path);
    assert_eq!(store.children(&root.id).expect("children").len(), 40);
    let current = current_id(&store);
    assert!(store.contains(&current).expect("pointer target exists"));
    close_store(store);
}
