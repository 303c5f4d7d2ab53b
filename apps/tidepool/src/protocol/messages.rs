/// Typed frames exchanged with the runner server.
///
/// Commands are adjacently tagged so they serialize to the wire's
/// `{"type": ..., "data": ...}` envelope. Inbound events are decoded in two
/// stages (see `codec`) so unrecognized types stay diagnosable instead of
/// failing deserialization outright.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::namespace::NamespaceNode;

/// Outbound command frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "UPPERCASE")]
pub enum ClientCommand {
    /// Request a directory listing under `path`.
    Ls { path: String },
    /// Start executing the named module, tagged with a client request id.
    Run { module: String, request_id: u64 },
    /// Deliver a line of input to a running process.
    Stdin { data: String, pid: u32 },
    /// Request termination of a running process.
    Kill { pid: u32 },
    /// Request a post-exit variable snapshot for a path.
    Inspect { path: String },
}

/// Inbound event frames, classified from a raw `Frame`.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Ls(LsPayload),
    Running(RunningPayload),
    Stdout(OutputPayload),
    Stderr(OutputPayload),
    Exit(ExitPayload),
    /// Post-exit snapshot payload. Advisory; kept verbatim.
    Inspect(Value),
    DirectoryModified,
    FileModified(FileModifiedPayload),
    /// Forward compatibility: logged and otherwise ignored.
    Unknown { kind: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LsPayload {
    pub files: NamespaceNode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunningPayload {
    pub pid: u32,
    pub request_id: u64,
}

/// Shared by STDOUT and STDERR. The pid is required for correlation on a
/// multiplexed channel; the server stamps it on every output event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputPayload {
    pub data: String,
    pub pid: u32,
    #[serde(default)]
    pub is_input_prompt: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExitPayload {
    pub pid: u32,
    pub returncode: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileModifiedPayload {
    pub path: String,
}
