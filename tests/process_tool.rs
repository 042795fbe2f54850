//! End-to-end scenarios driving the process tool against real child
//! processes. Unix-only: the suite spawns `/bin/sh`.
#![cfg(unix)]
#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use procdock::LaunchSpec;
use procdock::ProcessRequest;
use procdock::ProcessTool;
use procdock::ProcessToolDefaults;
use procdock::SessionId;
use procdock::SessionRegistry;
use procdock::ToolConfig;
use procdock::ToolResponse;
use procdock::ToolStatus;

fn tool_for(registry: &Arc<SessionRegistry>, scope_key: Option<&str>) -> ProcessTool {
    ProcessTool::with_config(
        Arc::clone(registry),
        ProcessToolDefaults {
            cleanup_ms: None,
            scope_key: scope_key.map(str::to_string),
        },
        ToolConfig::default(),
    )
}

async fn poll_until_done(tool: &ProcessTool, id: SessionId) -> ToolResponse {
    for _ in 0..400 {
        let response = tool.handle(ProcessRequest::Poll { session_id: id }).await;
        if response.details.status != ToolStatus::Running {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("session {id} never finished");
}

async fn poll_until_output(tool: &ProcessTool, id: SessionId, needle: &str) -> ToolResponse {
    for _ in 0..400 {
        let response = tool.handle(ProcessRequest::Poll { session_id: id }).await;
        let aggregated = response.details.aggregated.clone().unwrap_or_default();
        if aggregated.contains(needle) {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("session {id} never produced {needle:?}");
}

#[tokio::test]
async fn poll_observes_running_then_completed() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry
        .launch(LaunchSpec::new("sleep 1 && echo hi", "/tmp"))
        .await
        .unwrap();
    let id = session.id();

    let first = tool.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(first.details.status, ToolStatus::Running);
    assert!(first.text().contains("Process still running."));

    let last = poll_until_done(&tool, id).await;
    assert_eq!(last.details.status, ToolStatus::Completed);
    assert_eq!(last.details.exit_code, Some(0));
    assert!(
        last.details
            .aggregated
            .as_deref()
            .unwrap_or_default()
            .contains("hi")
    );

    // The id now resolves to the finished record, not NotFound.
    let again = tool.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(again.details.status, ToolStatus::Completed);
    assert!(again.text().contains("Process exited with code 0."));
}

#[tokio::test]
async fn write_confirms_byte_count_and_reaches_the_process() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry.launch(LaunchSpec::new("cat", "/tmp")).await.unwrap();
    let id = session.id();

    let response = tool
        .handle(ProcessRequest::Write {
            session_id: id,
            data: Some("ls\n".to_string()),
            eof: false,
        })
        .await;
    assert_eq!(response.text(), format!("Wrote 3 bytes to session {id}."));
    assert_eq!(response.details.status, ToolStatus::Running);

    let echoed = poll_until_output(&tool, id, "ls").await;
    assert_eq!(echoed.details.status, ToolStatus::Running);

    let removed = tool.handle(ProcessRequest::Remove { session_id: id }).await;
    assert_eq!(removed.text(), format!("Removed session {id}."));
}

#[tokio::test]
async fn send_keys_warns_on_unknown_tokens_but_still_sends() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry.launch(LaunchSpec::new("cat", "/tmp")).await.unwrap();
    let id = session.id();

    let response = tool
        .handle(ProcessRequest::SendKeys {
            session_id: id,
            keys: vec!["Foo".to_string(), "Enter".to_string()],
            hex: Vec::new(),
            literal: None,
        })
        .await;
    assert!(response.text().starts_with(&format!("Sent 1 bytes to session {id}.")));
    assert!(response.text().contains("unknown key token: Foo"));

    tool.handle(ProcessRequest::Remove { session_id: id }).await;
}

#[tokio::test]
async fn send_keys_with_no_valid_tokens_fails_validation() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry.launch(LaunchSpec::new("cat", "/tmp")).await.unwrap();
    let id = session.id();

    let response = tool
        .handle(ProcessRequest::SendKeys {
            session_id: id,
            keys: vec!["Foo".to_string()],
            hex: Vec::new(),
            literal: None,
        })
        .await;
    assert_eq!(response.text(), "No key data provided.");
    assert_eq!(response.details.status, ToolStatus::Failed);

    tool.handle(ProcessRequest::Remove { session_id: id }).await;
}

#[tokio::test]
async fn log_pages_through_accumulated_lines() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry
        .launch(LaunchSpec::new(
            "i=1; while [ $i -le 25 ]; do echo line$i; i=$((i+1)); done",
            "/tmp",
        ))
        .await
        .unwrap();
    let id = session.id();
    poll_until_done(&tool, id).await;

    let window = tool
        .handle(ProcessRequest::Log {
            session_id: id,
            offset: Some(0),
            limit: Some(10),
        })
        .await;
    assert_eq!(window.details.total_lines, Some(25));
    assert_eq!(window.text().lines().count(), 10);
    assert!(window.text().starts_with("line1\n"));
    assert!(window.text().ends_with("line10"));

    let rest = tool
        .handle(ProcessRequest::Log {
            session_id: id,
            offset: Some(20),
            limit: Some(10),
        })
        .await;
    assert_eq!(rest.text(), "line21\nline22\nline23\nline24\nline25");
    assert_eq!(rest.details.total_lines, Some(25));
}

#[tokio::test]
async fn kill_marks_failed_immediately_and_keeps_the_record() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry
        .launch(LaunchSpec::new("sleep 30", "/tmp"))
        .await
        .unwrap();
    let id = session.id();

    let killed = tool.handle(ProcessRequest::Kill { session_id: id }).await;
    assert_eq!(killed.text(), format!("Killed session {id}."));
    assert_eq!(killed.details.status, ToolStatus::Failed);
    assert_eq!(killed.details.exit_signal.as_deref(), Some("SIGKILL"));

    let after = tool.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(after.details.status, ToolStatus::Failed);
    assert!(after.text().contains("Process exited with signal SIGKILL."));
}

#[tokio::test]
async fn clear_rejects_running_sessions() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry
        .launch(LaunchSpec::new("sleep 30", "/tmp"))
        .await
        .unwrap();
    let id = session.id();

    let response = tool.handle(ProcessRequest::Clear { session_id: id }).await;
    assert_eq!(response.text(), format!("No finished session found for {id}"));
    assert_eq!(response.details.status, ToolStatus::Failed);

    tool.handle(ProcessRequest::Remove { session_id: id }).await;
    let cleared = tool.handle(ProcessRequest::Clear { session_id: id }).await;
    assert_eq!(cleared.text(), format!("Cleared session {id}."));
}

#[tokio::test]
async fn scope_isolates_sessions_between_tool_instances() {
    let registry = Arc::new(SessionRegistry::new());
    let tool_a = tool_for(&registry, Some("A"));
    let tool_b = tool_for(&registry, Some("B"));
    let unscoped = tool_for(&registry, None);

    let session = registry
        .launch(LaunchSpec::new("sleep 30", "/tmp").scope_key("A"))
        .await
        .unwrap();
    let id = session.id();

    let seen = tool_a.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(seen.details.status, ToolStatus::Running);

    let hidden = tool_b.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(hidden.text(), format!("No session found for {id}"));
    assert_eq!(hidden.details.status, ToolStatus::Failed);

    // A tool without a scope key sees every session.
    let visible = unscoped.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(visible.details.status, ToolStatus::Running);

    tool_a.handle(ProcessRequest::Remove { session_id: id }).await;
}

#[tokio::test]
async fn list_orders_sessions_most_recent_first() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);

    let first = registry
        .launch(LaunchSpec::new("sleep 30", "/tmp"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = registry
        .launch(LaunchSpec::new("sleep 30", "/tmp"))
        .await
        .unwrap();

    let response = tool.handle(ProcessRequest::List).await;
    let sessions = response.details.sessions.clone().unwrap_or_default();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].session_id, second.id());
    assert_eq!(sessions[1].session_id, first.id());
    assert!(response.text().contains(" :: sleep 30"));

    tool.handle(ProcessRequest::Remove { session_id: first.id() }).await;
    tool.handle(ProcessRequest::Remove { session_id: second.id() }).await;
}

#[tokio::test]
async fn observation_only_sessions_reject_interactive_actions() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry
        .launch(LaunchSpec::new("sleep 30", "/tmp").backgrounded(false))
        .await
        .unwrap();
    let id = session.id();

    let response = tool
        .handle(ProcessRequest::Write {
            session_id: id,
            data: Some("x".to_string()),
            eof: false,
        })
        .await;
    assert_eq!(response.text(), format!("Session {id} is not backgrounded."));
    assert_eq!(response.details.status, ToolStatus::Failed);

    // Poll stays available: a non-backgrounded session is observation-only.
    let polled = tool.handle(ProcessRequest::Poll { session_id: id }).await;
    assert_eq!(polled.details.status, ToolStatus::Running);

    session.kill();
    registry
        .mark_exited(&session, None, Some("SIGKILL".to_string()), procdock::SessionStatus::Failed)
        .await;
}

#[tokio::test]
async fn paste_wraps_text_and_requires_content() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry.launch(LaunchSpec::new("cat", "/tmp")).await.unwrap();
    let id = session.id();

    let response = tool
        .handle(ProcessRequest::Paste {
            session_id: id,
            text: "hello".to_string(),
            bracketed: Some(false),
        })
        .await;
    assert_eq!(response.text(), format!("Pasted 5 chars to session {id}."));

    let empty = tool
        .handle(ProcessRequest::Paste {
            session_id: id,
            text: String::new(),
            bracketed: None,
        })
        .await;
    assert_eq!(empty.text(), "No paste text provided.");

    tool.handle(ProcessRequest::Remove { session_id: id }).await;
}

#[tokio::test]
async fn submit_sends_a_carriage_return() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry.launch(LaunchSpec::new("cat", "/tmp")).await.unwrap();
    let id = session.id();

    let response = tool.handle(ProcessRequest::Submit { session_id: id }).await;
    assert_eq!(response.text(), format!("Submitted session {id} (sent CR)."));

    tool.handle(ProcessRequest::Remove { session_id: id }).await;
}

#[tokio::test]
async fn write_after_eof_reports_stdin_unwritable() {
    let registry = Arc::new(SessionRegistry::new());
    let tool = tool_for(&registry, None);
    let session = registry.launch(LaunchSpec::new("cat", "/tmp")).await.unwrap();
    let id = session.id();

    let closed = tool
        .handle(ProcessRequest::Write {
            session_id: id,
            data: Some("bye\n".to_string()),
            eof: true,
        })
        .await;
    assert_eq!(
        closed.text(),
        format!("Wrote 4 bytes to session {id} (stdin closed).")
    );

    let rejected = tool
        .handle(ProcessRequest::Write {
            session_id: id,
            data: Some("more".to_string()),
            eof: false,
        })
        .await;
    assert_eq!(
        rejected.text(),
        format!("Session {id} stdin is not writable.")
    );

    poll_until_done(&tool, id).await;
}
