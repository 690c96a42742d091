//! End-to-end dispatch tests against a local chat-API capture server and a
//! fake agent binary.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};

use axum::{Json, Router, extract::State, http::Uri, routing::any};
use parking_lot::Mutex;
use serde_json::{Value, json};
use services::services::{
    config::Config,
    dispatch::{Dispatcher, EventKind, InboundEvent},
    git::GitService,
    slack::SlackClient,
};
use tempfile::TempDir;

type Captured = Arc<Mutex<Vec<(String, Value)>>>;

async fn capture_api(State(store): State<Captured>, uri: Uri, Json(body): Json<Value>) -> Json<Value> {
    store.lock().push((uri.path().to_string(), body));
    Json(json!({ "ok": true }))
}

/// Spawn a local stand-in for the chat platform's Web API and return its URL.
async fn spawn_capture_server(store: Captured) -> String {
    let router = Router::new()
        .route("/{*method}", any(capture_api))
        .with_state(store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn init_test_repo_via_cli(dir: &Path) {
    Command::new("git")
        .args(["init", "-b", "main"])
        .current_dir(dir)
        .output()
        .expect("Failed to init repo");
    Command::new("git")
        .args(["config", "user.email", "test@test.com"])
        .current_dir(dir)
        .output()
        .expect("Failed to set email");
    Command::new("git")
        .args(["config", "user.name", "Test"])
        .current_dir(dir)
        .output()
        .expect("Failed to set name");
    Command::new("git")
        .args(["commit", "--allow-empty", "-m", "Initial commit"])
        .current_dir(dir)
        .output()
        .expect("Failed to create initial commit");
}

#[cfg(unix)]
fn write_fake_agent(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("fake-agent");
    fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

const ECHO_ARGS_AGENT: &str =
    "printf '{\"result\":\"args: %s\",\"session_id\":\"sid-1\"}' \"$*\"";

fn test_config(temp: &TempDir, claude_bin: &Path, ceiling: usize) -> Config {
    Config {
        slack_bot_token: "xoxb-test".to_string(),
        slack_signing_secret: "secret".to_string(),
        repo_dir: temp.path().join("repo"),
        worktree_dir: temp.path().join("worktrees"),
        max_agent_runs: ceiling,
        default_branch: "main".to_string(),
        git_remote: "origin".to_string(),
        worktree_retention_hours: 24,
        sweep_interval_secs: 1800,
        claude_bin: claude_bin.to_string_lossy().into_owned(),
        allowed_tools: "Bash,Read,Write,Edit".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        require_https: false,
    }
}

async fn build_dispatcher(temp: &TempDir, ceiling: usize, agent_body: &str) -> (Dispatcher, Captured) {
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    init_test_repo_via_cli(&repo);
    let agent = write_fake_agent(temp.path(), agent_body);

    let store: Captured = Arc::new(Mutex::new(Vec::new()));
    let base_url = spawn_capture_server(store.clone()).await;
    let slack = SlackClient::with_base_url("xoxb-test", base_url);
    let dispatcher = Dispatcher::new(test_config(temp, &agent, ceiling), slack);
    (dispatcher, store)
}

fn mention(conversation_id: &str, ts: &str, text: &str) -> InboundEvent {
    InboundEvent {
        conversation_id: conversation_id.to_string(),
        channel: "C1".to_string(),
        message_ts: ts.to_string(),
        text: text.to_string(),
        sender_is_bot: false,
        kind: EventKind::Mention,
    }
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

fn posted_messages(store: &Captured) -> Vec<String> {
    store
        .lock()
        .iter()
        .filter(|(path, _)| path == "/chat.postMessage")
        .filter_map(|(_, body)| body["text"].as_str().map(|s| s.to_string()))
        .collect()
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn first_run_creates_workspace_and_second_run_resumes() {
    let temp = TempDir::new().unwrap();
    let (dispatcher, store) = build_dispatcher(&temp, 5, ECHO_ARGS_AGENT).await;
    let conversation = "1700000000.0001";

    dispatcher.dispatch(mention(conversation, "1700000000.0001", "<@U1> do the thing"));

    let registry = dispatcher.registry().clone();
    wait_for("first run to be recorded", || registry.contains(conversation)).await;

    let entry = registry.get(conversation).unwrap();
    assert_eq!(entry.session_id.as_deref(), Some("sid-1"));
    assert_eq!(entry.branch, "main");
    assert!(entry.workspace_path.exists());
    let dir_name = entry.workspace_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(dir_name.starts_with("1700000000-0001-"), "got {dir_name}");

    {
        let store = store.clone();
        wait_for("first reply", move || {
            posted_messages(&store).iter().any(|m| m.contains("args:"))
        })
        .await;
    }
    // First run starts with no resume token.
    assert!(posted_messages(&store).iter().all(|m| !m.contains("--resume")));

    dispatcher.dispatch(mention(conversation, "1700000000.0500", "<@U1> keep going"));
    {
        let store = store.clone();
        wait_for("second reply with resume token", move || {
            posted_messages(&store)
                .iter()
                .any(|m| m.contains("--resume sid-1"))
        })
        .await;
    }

    // Same workspace, no second worktree.
    assert_eq!(registry.get(conversation).unwrap().workspace_path, entry.workspace_path);
    let dirs: Vec<_> = fs::read_dir(temp.path().join("worktrees"))
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(dirs.len(), 1);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn sixth_simultaneous_conversation_is_rejected_without_touching_disk() {
    let temp = TempDir::new().unwrap();
    // Hold each slot long enough that all six admission decisions happen
    // while the first five runs are still in flight.
    let slow_agent = format!("sleep 1\n{ECHO_ARGS_AGENT}");
    let (dispatcher, store) = build_dispatcher(&temp, 5, &slow_agent).await;

    for i in 0..6 {
        dispatcher.dispatch(mention(
            &format!("thread-{i}"),
            &format!("ts-{i}"),
            "<@U1> work",
        ));
    }

    {
        let store = store.clone();
        wait_for("five completions and one rejection", move || {
            let messages = posted_messages(&store);
            let done = messages.iter().filter(|m| m.contains("args:")).count();
            let busy = messages.iter().filter(|m| m.contains("Busy right now boss")).count();
            done == 5 && busy == 1
        })
        .await;
    }

    let dirs: Vec<_> = fs::read_dir(temp.path().join("worktrees"))
        .unwrap()
        .flatten()
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(dirs.len(), 5);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn branch_command_creates_missing_branch_from_default() {
    let temp = TempDir::new().unwrap();
    let (dispatcher, store) = build_dispatcher(&temp, 5, ECHO_ARGS_AGENT).await;
    let conversation = "1700000000.0002";

    dispatcher.dispatch(mention(conversation, "1700000000.0002", "<@U1> !branch experiment"));

    {
        let store = store.clone();
        wait_for("branch switch reply", move || {
            posted_messages(&store)
                .iter()
                .any(|m| m.contains("Created new branch `experiment` from `main`."))
        })
        .await;
    }

    let entry = dispatcher.registry().get(conversation).unwrap();
    assert_eq!(entry.branch, "experiment");
    assert_eq!(
        GitService::new().current_branch(&entry.workspace_path).unwrap(),
        "experiment"
    );
}
