//! Registry and control surface for backgrounded exec sessions.
//!
//! A session is one OS process launched by the caller and tracked until its
//! finished record is reclaimed. The [`SessionRegistry`] owns the process
//! handles and capped output buffers; the [`ProcessTool`] translates discrete
//! actions (`list`, `poll`, `write`, `send-keys`, ...) into registry and
//! encoder operations and renders a uniform text + structured result.

mod config;
mod errors;
mod keys;
mod registry;
mod session_id;
mod slice;
mod spawn;
mod tool;
mod truncate;

pub use config::ToolConfig;
pub use errors::ProcessToolError;
pub use errors::SpawnError;
pub use keys::EncodedKeys;
pub use keys::encode_key_sequence;
pub use keys::encode_paste;
pub use registry::DrainedOutput;
pub use registry::ExitInfo;
pub use registry::FinishedSession;
pub use registry::OutputSnapshot;
pub use registry::RunningSession;
pub use registry::SessionRegistry;
pub use registry::SessionStatus;
pub use session_id::SessionId;
pub use slice::LogSlice;
pub use slice::slice_log_lines;
pub use spawn::LaunchSpec;
pub use tool::ContentBlock;
pub use tool::ProcessRequest;
pub use tool::ProcessTool;
pub use tool::ProcessToolDefaults;
pub use tool::ResponseDetails;
pub use tool::SessionOverview;
pub use tool::ToolResponse;
pub use tool::ToolStatus;
pub use truncate::TruncatedOutput;
pub use truncate::truncate_output;
