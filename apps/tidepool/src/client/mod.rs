/// Console driver: wires decoded channel events to the session registry and
/// the focused session's transcript, and turns user actions (run, rerun,
/// answer, release) into command frames for the channel.
///
/// All correlation is by explicit id. Output for any pid other than the
/// focused session's is dropped here, so a stale session's late frames can
/// never leak into the transcript after a rerun.
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::protocol::messages::{ClientCommand, OutputPayload, ServerEvent};
use crate::protocol::namespace::{NamespaceNode, module_name};
use crate::session::SessionRegistry;
use crate::transcript::{GroupPolicy, PromptHandle, Transcript, TranscriptError};

pub struct Console {
    registry: SessionRegistry,
    transcript: Transcript,
    policy: GroupPolicy,
    namespace: Option<NamespaceNode>,
    last_snapshot: Option<Value>,
    pending_prompt: Option<PromptHandle>,
}

impl Console {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: SessionRegistry::new(),
            transcript: Transcript::new(config.grouping),
            policy: config.grouping,
            namespace: None,
            last_snapshot: None,
            pending_prompt: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn namespace(&self) -> Option<&NamespaceNode> {
        self.namespace.as_ref()
    }

    pub fn snapshot(&self) -> Option<&Value> {
        self.last_snapshot.as_ref()
    }

    pub fn pending_prompt(&self) -> Option<PromptHandle> {
        self.pending_prompt
    }

    pub fn status_line(&self) -> Option<&'static str> {
        self.registry.focused().map(|session| session.status_line())
    }

    pub fn focused_pid(&self) -> Option<u32> {
        self.registry.focused().and_then(|session| session.pid)
    }

    /// Steady-state subscriptions to (re)issue on every connect. Reconnects
    /// get a fresh listing but never silently re-run processes.
    pub fn on_connect(&self) -> Vec<ClientCommand> {
        vec![ClientCommand::Ls {
            path: "/".to_string(),
        }]
    }

    /// Run a module by short or dotted name, releasing whatever was focused.
    pub fn run_module(&mut self, name: &str) -> Vec<ClientCommand> {
        let mut commands = self.release();
        let (module, path) = match self
            .namespace
            .as_ref()
            .and_then(|tree| tree.find_module(name))
        {
            Some(NamespaceNode::Module { full_path, .. }) => {
                (module_name(full_path), full_path.clone())
            }
            _ => (name.to_string(), name.to_string()),
        };
        self.reset_transcript();
        let (_, run) = self.registry.run(&module, &path);
        commands.push(run);
        commands
    }

    /// Re-execute the focused session.
    pub fn rerun(&mut self) -> Vec<ClientCommand> {
        let Some(focused) = self.registry.focused() else {
            return Vec::new();
        };
        let request_id = focused.request_id;
        match self.registry.rerun(request_id) {
            Some((_, commands)) => {
                self.reset_transcript();
                commands
            }
            None => Vec::new(),
        }
    }

    /// The focused session is no longer being watched.
    pub fn release(&mut self) -> Vec<ClientCommand> {
        let Some(focused) = self.registry.focused() else {
            return Vec::new();
        };
        let request_id = focused.request_id;
        self.registry.release(request_id).into_iter().collect()
    }

    /// Answer a pending prompt. The transcript records the response and the
    /// STDIN frame goes out in the same step.
    pub fn answer_prompt(
        &mut self,
        handle: PromptHandle,
        answer: &str,
    ) -> Result<Vec<ClientCommand>, TranscriptError> {
        self.transcript.answer_prompt(handle, answer.to_string())?;
        if self.pending_prompt == Some(handle) {
            self.pending_prompt = None;
        }
        match self.focused_pid() {
            Some(pid) => Ok(vec![ClientCommand::Stdin {
                data: answer.to_string(),
                pid,
            }]),
            None => {
                debug!(target: "tidepool::client", "answered prompt with no live pid; nothing sent");
                Ok(Vec::new())
            }
        }
    }

    /// Apply one decoded event; returns the commands it provokes.
    pub fn handle_event(&mut self, event: ServerEvent, now_ms: u64) -> Vec<ClientCommand> {
        match event {
            ServerEvent::Ls(payload) => {
                self.namespace = Some(payload.files);
                Vec::new()
            }
            ServerEvent::Running(payload) => {
                if self.registry.handle_running(&payload) {
                    info!(
                        target: "tidepool::client",
                        pid = payload.pid,
                        request_id = payload.request_id,
                        "process started"
                    );
                }
                Vec::new()
            }
            ServerEvent::Stdout(payload) => {
                self.append_output(payload, now_ms, false);
                Vec::new()
            }
            ServerEvent::Stderr(payload) => {
                self.append_output(payload, now_ms, true);
                Vec::new()
            }
            ServerEvent::Exit(payload) => self.registry.handle_exit(&payload).into_iter().collect(),
            ServerEvent::Inspect(value) => {
                self.last_snapshot = Some(value);
                Vec::new()
            }
            ServerEvent::DirectoryModified => vec![ClientCommand::Ls {
                path: "/".to_string(),
            }],
            ServerEvent::FileModified(payload) => {
                match self.registry.handle_file_modified(&payload.path) {
                    Some((_, commands)) => {
                        self.reset_transcript();
                        commands
                    }
                    None => Vec::new(),
                }
            }
            ServerEvent::Unknown { kind } => {
                debug!(target: "tidepool::client", kind, "ignoring unrecognized event");
                Vec::new()
            }
        }
    }

    fn append_output(&mut self, payload: OutputPayload, now_ms: u64, stderr: bool) {
        if !self.registry.is_focused_pid(payload.pid) {
            debug!(
                target: "tidepool::client",
                pid = payload.pid,
                "output for another session; dropped"
            );
            return;
        }
        if stderr {
            self.transcript.append_stderr(payload.data);
        } else if payload.is_input_prompt {
            self.pending_prompt = Some(self.transcript.append_prompt(payload.data));
        } else {
            self.transcript.append_stdout(payload.data, now_ms);
        }
    }

    fn reset_transcript(&mut self) {
        self.transcript = Transcript::new(self.policy);
        self.pending_prompt = None;
    }
}

/// Arrival timestamp in milliseconds for transcript ordering.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
