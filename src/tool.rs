//! Action-dispatch surface consumed by the agent runtime.
//!
//! Each request carries one discrete action; dispatch is an exhaustive match
//! over a tagged enum, so adding an action is a compile-time-checked change.
//! Every lookup is filtered by the tool's optional scope key: a session whose
//! scope does not match is treated as not found regardless of its existence.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use shlex::Shlex;

use crate::config::ToolConfig;
use crate::errors::ProcessToolError;
use crate::keys::encode_key_sequence;
use crate::keys::encode_paste;
use crate::registry::ExitInfo;
use crate::registry::FinishedSession;
use crate::registry::RunningSession;
use crate::registry::SessionRegistry;
use crate::registry::SessionStatus;
use crate::session_id::SessionId;
use crate::slice::slice_log_lines;
use crate::truncate::truncate_middle;
use crate::truncate::truncate_output;

const NAME_LABEL_MAX_CHARS: usize = 80;
const COMMAND_LABEL_MAX_CHARS: usize = 120;
const STATUS_PAD_WIDTH: usize = 9;

/// One action request. `sessionId` is required for every action except
/// `list`; the tagged representation enforces that at parse time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ProcessRequest {
    List,
    Poll {
        session_id: SessionId,
    },
    Log {
        session_id: SessionId,
        #[serde(default)]
        offset: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Write {
        session_id: SessionId,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        eof: bool,
    },
    SendKeys {
        session_id: SessionId,
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        hex: Vec<String>,
        #[serde(default)]
        literal: Option<String>,
    },
    Submit {
        session_id: SessionId,
    },
    Paste {
        session_id: SessionId,
        #[serde(default)]
        text: String,
        #[serde(default)]
        bracketed: Option<bool>,
    },
    Kill {
        session_id: SessionId,
    },
    Clear {
        session_id: SessionId,
    },
    Remove {
        session_id: SessionId,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
    #[default]
    Failed,
}

impl From<SessionStatus> for ToolStatus {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Completed => Self::Completed,
            SessionStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetails {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionOverview>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    pub session_id: SessionId,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub started_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    pub runtime_ms: u64,
    pub cwd: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub tail: String,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ContentBlock>,
    pub details: ResponseDetails,
}

impl ToolResponse {
    fn new(text: String, details: ResponseDetails) -> Self {
        Self {
            content: vec![ContentBlock::Text { text }],
            details,
        }
    }

    fn failure(message: String) -> Self {
        Self::new(message, ResponseDetails::default())
    }

    /// The rendered user-facing text. Responses always carry one text
    /// block; an empty content list renders as an empty string.
    pub fn text(&self) -> &str {
        match self.content.first() {
            Some(ContentBlock::Text { text }) => text,
            None => "",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessToolDefaults {
    pub cleanup_ms: Option<u64>,
    pub scope_key: Option<String>,
}

/// Translates process actions into registry and encoder operations.
#[derive(Debug, Clone)]
pub struct ProcessTool {
    registry: Arc<SessionRegistry>,
    scope_key: Option<String>,
    config: ToolConfig,
}

impl ProcessTool {
    pub fn new(registry: Arc<SessionRegistry>, defaults: ProcessToolDefaults) -> Self {
        Self::with_config(registry, defaults, ToolConfig::from_env())
    }

    pub fn with_config(
        registry: Arc<SessionRegistry>,
        defaults: ProcessToolDefaults,
        config: ToolConfig,
    ) -> Self {
        registry.set_ttl_ms(defaults.cleanup_ms.unwrap_or(config.session_ttl_ms));
        Self {
            registry,
            scope_key: defaults.scope_key,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Executes one action. Taxonomy failures (not found, invalid state,
    /// stdin errors, empty payloads) render as a structured `failed` result
    /// rather than propagating.
    pub async fn handle(&self, request: ProcessRequest) -> ToolResponse {
        self.registry.prune_finished().await;
        let result = match request {
            ProcessRequest::List => Ok(self.list().await),
            ProcessRequest::Poll { session_id } => self.poll(session_id).await,
            ProcessRequest::Log {
                session_id,
                offset,
                limit,
            } => self.log(session_id, offset, limit).await,
            ProcessRequest::Write {
                session_id,
                data,
                eof,
            } => self.write(session_id, data.unwrap_or_default(), eof).await,
            ProcessRequest::SendKeys {
                session_id,
                keys,
                hex,
                literal,
            } => self.send_keys(session_id, &keys, &hex, literal.as_deref()).await,
            ProcessRequest::Submit { session_id } => self.submit(session_id).await,
            ProcessRequest::Paste {
                session_id,
                text,
                bracketed,
            } => self.paste(session_id, &text, bracketed.unwrap_or(true)).await,
            ProcessRequest::Kill { session_id } => self.kill(session_id).await,
            ProcessRequest::Clear { session_id } => self.clear(session_id).await,
            ProcessRequest::Remove { session_id } => self.remove(session_id).await,
        };
        result.unwrap_or_else(|err| ToolResponse::failure(err.to_string()))
    }

    fn in_scope(&self, session_scope: Option<&str>) -> bool {
        match self.scope_key.as_deref() {
            None => true,
            Some(key) => session_scope == Some(key),
        }
    }

    async fn scoped_running(&self, id: SessionId) -> Option<Arc<RunningSession>> {
        self.registry
            .get(id)
            .await
            .filter(|s| self.in_scope(s.scope_key()))
    }

    async fn scoped_finished(&self, id: SessionId) -> Option<Arc<FinishedSession>> {
        self.registry
            .get_finished(id)
            .await
            .filter(|s| self.in_scope(s.scope_key.as_deref()))
    }

    async fn list(&self) -> ToolResponse {
        let mut overviews = Vec::new();
        for session in self.registry.list_running().await {
            if !self.in_scope(session.scope_key()) {
                continue;
            }
            let snapshot = session.output_snapshot().await;
            overviews.push(SessionOverview {
                session_id: session.id(),
                status: "running".to_string(),
                pid: session.pid(),
                started_at_ms: session.started_at_ms(),
                ended_at_ms: None,
                runtime_ms: session.runtime_ms(),
                cwd: session.cwd().display().to_string(),
                command: session.command().to_string(),
                name: derive_session_name(session.command()),
                tail: snapshot.tail,
                truncated: snapshot.truncated,
                exit_code: None,
                exit_signal: None,
            });
        }
        for record in self.registry.list_finished().await {
            if !self.in_scope(record.scope_key.as_deref()) {
                continue;
            }
            overviews.push(SessionOverview {
                session_id: record.id,
                status: record.status.to_string(),
                pid: record.pid,
                started_at_ms: record.started_at_ms(),
                ended_at_ms: Some(record.ended_at_ms()),
                runtime_ms: record.runtime_ms(),
                cwd: record.cwd.display().to_string(),
                command: record.command.clone(),
                name: derive_session_name(&record.command),
                tail: record.tail.clone(),
                truncated: record.truncated,
                exit_code: record.exit_code,
                exit_signal: record.exit_signal.clone(),
            });
        }

        // Most recent first.
        overviews.sort_by(|a, b| {
            (b.started_at_ms, b.session_id.0).cmp(&(a.started_at_ms, a.session_id.0))
        });

        let lines: Vec<String> = overviews
            .iter()
            .map(|s| {
                let label = match &s.name {
                    Some(name) => truncate_middle(name, NAME_LABEL_MAX_CHARS),
                    None => truncate_middle(&s.command, COMMAND_LABEL_MAX_CHARS),
                };
                format!(
                    "{} {:<width$} {} :: {}",
                    s.session_id,
                    s.status,
                    format_duration_compact(s.runtime_ms),
                    label,
                    width = STATUS_PAD_WIDTH,
                )
            })
            .collect();
        let text = if lines.is_empty() {
            "No running or recent sessions.".to_string()
        } else {
            lines.join("\n")
        };

        ToolResponse::new(
            text,
            ResponseDetails {
                status: ToolStatus::Completed,
                sessions: Some(overviews),
                ..Default::default()
            },
        )
    }

    async fn poll(&self, id: SessionId) -> Result<ToolResponse, ProcessToolError> {
        if let Some(session) = self.scoped_running(id).await {
            let drained = session.drain().await;
            let exited = session.has_exited();

            let mut status = ToolStatus::Running;
            let mut exit_line = "\n\nProcess still running.".to_string();
            let mut exit_code = None;
            if exited {
                let info = session.exit_info().unwrap_or_default();
                let session_status = status_for_exit(&info);
                self.registry
                    .mark_exited(&session, info.code, info.signal.clone(), session_status)
                    .await;
                status = session_status.into();
                exit_code = Some(info.code.unwrap_or(0));
                exit_line = format!("\n\n{}", describe_exit(&info));
            }

            let combined = join_streams(&drained.stdout, &drained.stderr);
            let new_output = truncate_output(&combined, self.config.result_max_chars);
            let body = if new_output.text.is_empty() {
                "(no new output)".to_string()
            } else {
                new_output.text
            };

            let snapshot = session.output_snapshot().await;
            let preview = truncate_output(&snapshot.aggregated, self.config.result_max_chars);
            return Ok(ToolResponse::new(
                format!("{body}{exit_line}"),
                ResponseDetails {
                    status,
                    session_id: Some(id),
                    exit_code,
                    aggregated: Some(preview.text),
                    aggregated_chars: Some(preview.original_chars),
                    aggregated_truncated: Some(preview.truncated),
                    name: derive_session_name(session.command()),
                    ..Default::default()
                },
            ));
        }

        if let Some(record) = self.scoped_finished(id).await {
            let info = ExitInfo {
                code: record.exit_code,
                signal: record.exit_signal.clone(),
            };
            let body = if record.tail.is_empty() {
                if record.truncated {
                    "(no output recorded; truncated to cap)".to_string()
                } else {
                    "(no output recorded)".to_string()
                }
            } else {
                record.tail.clone()
            };
            let preview = truncate_output(&record.aggregated, self.config.result_max_chars);
            return Ok(ToolResponse::new(
                format!("{body}\n\n{}", describe_exit(&info)),
                ResponseDetails {
                    status: record.status.into(),
                    session_id: Some(id),
                    exit_code: record.exit_code,
                    exit_signal: record.exit_signal.clone(),
                    aggregated: Some(preview.text),
                    aggregated_chars: Some(preview.original_chars),
                    aggregated_truncated: Some(preview.truncated),
                    name: derive_session_name(&record.command),
                    ..Default::default()
                },
            ));
        }

        Err(ProcessToolError::NotFound { session_id: id })
    }

    async fn log(
        &self,
        id: SessionId,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<ToolResponse, ProcessToolError> {
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(self.config.log_default_lines);

        if let Some(session) = self.scoped_running(id).await {
            if !session.backgrounded() {
                return Err(ProcessToolError::NotBackgrounded { session_id: id });
            }
            let snapshot = session.output_snapshot().await;
            let window = slice_log_lines(&snapshot.aggregated, offset, limit);
            let status = if session.has_exited() {
                status_for_exit(&session.exit_info().unwrap_or_default()).into()
            } else {
                ToolStatus::Running
            };
            let body = if window.slice.is_empty() {
                "(no output yet)".to_string()
            } else {
                window.slice
            };
            let preview = truncate_output(&body, self.config.result_max_chars);
            return Ok(ToolResponse::new(
                preview.text.clone(),
                ResponseDetails {
                    status,
                    session_id: Some(id),
                    total_lines: Some(window.total_lines),
                    total_chars: Some(window.total_chars),
                    returned_chars: Some(preview.text.chars().count()),
                    output_truncated: Some(preview.truncated),
                    truncated: Some(snapshot.truncated),
                    name: derive_session_name(session.command()),
                    ..Default::default()
                },
            ));
        }

        if let Some(record) = self.scoped_finished(id).await {
            if !record.backgrounded {
                return Err(ProcessToolError::NotBackgrounded { session_id: id });
            }
            let window = slice_log_lines(&record.aggregated, offset, limit);
            let body = if window.slice.is_empty() {
                "(no output recorded)".to_string()
            } else {
                window.slice
            };
            let preview = truncate_output(&body, self.config.result_max_chars);
            return Ok(ToolResponse::new(
                preview.text.clone(),
                ResponseDetails {
                    status: record.status.into(),
                    session_id: Some(id),
                    total_lines: Some(window.total_lines),
                    total_chars: Some(window.total_chars),
                    returned_chars: Some(preview.text.chars().count()),
                    output_truncated: Some(preview.truncated),
                    truncated: Some(record.truncated),
                    exit_code: record.exit_code,
                    exit_signal: record.exit_signal.clone(),
                    name: derive_session_name(&record.command),
                    ..Default::default()
                },
            ));
        }

        Err(ProcessToolError::NotFound { session_id: id })
    }

    /// Resolves the session for an interactive (stdin-directed) action.
    async fn interactive_session(
        &self,
        id: SessionId,
    ) -> Result<Arc<RunningSession>, ProcessToolError> {
        let session = self
            .scoped_running(id)
            .await
            .ok_or(ProcessToolError::NoActiveSession { session_id: id })?;
        if !session.backgrounded() {
            return Err(ProcessToolError::NotBackgrounded { session_id: id });
        }
        Ok(session)
    }

    async fn write(
        &self,
        id: SessionId,
        data: String,
        eof: bool,
    ) -> Result<ToolResponse, ProcessToolError> {
        let session = self.interactive_session(id).await?;
        session.write_stdin(data.as_bytes(), eof).await?;
        let suffix = if eof { " (stdin closed)" } else { "" };
        Ok(ToolResponse::new(
            format!("Wrote {} bytes to session {id}{suffix}.", data.len()),
            ResponseDetails {
                status: ToolStatus::Running,
                session_id: Some(id),
                name: derive_session_name(session.command()),
                ..Default::default()
            },
        ))
    }

    async fn send_keys(
        &self,
        id: SessionId,
        keys: &[String],
        hex: &[String],
        literal: Option<&str>,
    ) -> Result<ToolResponse, ProcessToolError> {
        let session = self.interactive_session(id).await?;
        let encoded = encode_key_sequence(keys, hex, literal);
        if encoded.data.is_empty() {
            return Err(ProcessToolError::EmptyKeyData);
        }
        session.write_stdin(&encoded.data, false).await?;
        let mut text = format!("Sent {} bytes to session {id}.", encoded.data.len());
        if !encoded.warnings.is_empty() {
            text.push_str("\nWarnings:\n- ");
            text.push_str(&encoded.warnings.join("\n- "));
        }
        Ok(ToolResponse::new(
            text,
            ResponseDetails {
                status: ToolStatus::Running,
                session_id: Some(id),
                name: derive_session_name(session.command()),
                ..Default::default()
            },
        ))
    }

    async fn submit(&self, id: SessionId) -> Result<ToolResponse, ProcessToolError> {
        let session = self.interactive_session(id).await?;
        session.write_stdin(b"\r", false).await?;
        Ok(ToolResponse::new(
            format!("Submitted session {id} (sent CR)."),
            ResponseDetails {
                status: ToolStatus::Running,
                session_id: Some(id),
                name: derive_session_name(session.command()),
                ..Default::default()
            },
        ))
    }

    async fn paste(
        &self,
        id: SessionId,
        text: &str,
        bracketed: bool,
    ) -> Result<ToolResponse, ProcessToolError> {
        let session = self.interactive_session(id).await?;
        let payload = encode_paste(text, bracketed);
        if payload.is_empty() {
            return Err(ProcessToolError::EmptyPasteText);
        }
        session.write_stdin(&payload, false).await?;
        Ok(ToolResponse::new(
            format!("Pasted {} chars to session {id}.", text.chars().count()),
            ResponseDetails {
                status: ToolStatus::Running,
                session_id: Some(id),
                name: derive_session_name(session.command()),
                ..Default::default()
            },
        ))
    }

    async fn kill(&self, id: SessionId) -> Result<ToolResponse, ProcessToolError> {
        let session = self.interactive_session(id).await?;
        session.kill();
        // Best-effort: mark failed immediately rather than waiting for the
        // OS to confirm; a late exit event is a no-op via mark_exited.
        self.registry
            .mark_exited(&session, None, Some("SIGKILL".to_string()), SessionStatus::Failed)
            .await;
        Ok(ToolResponse::new(
            format!("Killed session {id}."),
            ResponseDetails {
                status: ToolStatus::Failed,
                session_id: Some(id),
                exit_signal: Some("SIGKILL".to_string()),
                name: derive_session_name(session.command()),
                ..Default::default()
            },
        ))
    }

    async fn clear(&self, id: SessionId) -> Result<ToolResponse, ProcessToolError> {
        if self.scoped_finished(id).await.is_some() {
            self.registry.delete(id).await;
            return Ok(ToolResponse::new(
                format!("Cleared session {id}."),
                ResponseDetails {
                    status: ToolStatus::Completed,
                    ..Default::default()
                },
            ));
        }
        Err(ProcessToolError::NoFinishedSession { session_id: id })
    }

    async fn remove(&self, id: SessionId) -> Result<ToolResponse, ProcessToolError> {
        if let Some(session) = self.scoped_running(id).await {
            session.kill();
            self.registry
                .mark_exited(&session, None, Some("SIGKILL".to_string()), SessionStatus::Failed)
                .await;
            return Ok(ToolResponse::new(
                format!("Removed session {id}."),
                ResponseDetails {
                    status: ToolStatus::Failed,
                    name: derive_session_name(session.command()),
                    ..Default::default()
                },
            ));
        }
        if self.scoped_finished(id).await.is_some() {
            self.registry.delete(id).await;
            return Ok(ToolResponse::new(
                format!("Removed session {id}."),
                ResponseDetails {
                    status: ToolStatus::Completed,
                    ..Default::default()
                },
            ));
        }
        Err(ProcessToolError::NotFound { session_id: id })
    }
}

fn status_for_exit(info: &ExitInfo) -> SessionStatus {
    if info.code.unwrap_or(0) == 0 && info.signal.is_none() {
        SessionStatus::Completed
    } else {
        SessionStatus::Failed
    }
}

fn describe_exit(info: &ExitInfo) -> String {
    match &info.signal {
        Some(signal) => format!("Process exited with signal {signal}."),
        None => format!("Process exited with code {}.", info.code.unwrap_or(0)),
    }
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    [stdout.trim_end(), stderr.trim_end()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Short display name for a command line, skipping a leading shell wrapper
/// so `sh -c 'git status'` renders as `git status`.
fn derive_session_name(command: &str) -> Option<String> {
    let mut tokens: Vec<String> = Shlex::new(command).collect();
    if tokens.len() >= 2 && is_shell_wrapper(&tokens[0], &tokens[1]) {
        tokens = match tokens.get(2) {
            Some(inner) => Shlex::new(inner).collect(),
            None => Vec::new(),
        };
    }
    let first = tokens.first()?;
    let base = std::path::Path::new(first)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| first.clone());
    match tokens.get(1) {
        Some(arg) if !arg.starts_with('-') => Some(format!("{base} {arg}")),
        _ => Some(base),
    }
}

fn is_shell_wrapper(program: &str, flag: &str) -> bool {
    let base = std::path::Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string());
    matches!(base.as_str(), "sh" | "bash" | "zsh" | "dash")
        && matches!(flag, "-c" | "-lc" | "-ic" | "-l" | "-i")
}

fn format_duration_compact(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{}s", ms / 1_000)
    } else if ms < 3_600_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    } else {
        format!("{}h{:02}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}
