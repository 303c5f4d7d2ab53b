/// Process session lifecycle and correlation.
///
/// One `ProcessSession` tracks one remote execution attempt. Sessions are
/// immutable snapshots: every lifecycle event produces a new value, never an
/// in-place mutation, so transitions stay race-free and testable in
/// isolation. The registry owns the snapshots, keyed by the client-assigned
/// request id, and resolves inbound events by request id before a pid is
/// bound and by pid afterwards. Events that match no live session are
/// dropped: the channel is multiplexed and carries other sessions' traffic.
pub mod channel;

use std::collections::HashMap;

use tracing::debug;

use crate::protocol::messages::{ClientCommand, ExitPayload, RunningPayload};
use crate::protocol::namespace::module_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Exited,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSession {
    pub module: String,
    pub path: String,
    pub request_id: u64,
    pub pid: Option<u32>,
    pub state: SessionState,
    pub returncode: Option<i32>,
    cleanup_sent: bool,
}

impl ProcessSession {
    fn new(module: &str, path: &str, request_id: u64) -> Self {
        Self {
            module: module.to_string(),
            path: path.to_string(),
            request_id,
            pid: None,
            state: SessionState::Starting,
            returncode: None,
            cleanup_sent: false,
        }
    }

    fn started(&self, pid: u32) -> Self {
        Self {
            pid: Some(pid),
            state: SessionState::Running,
            ..self.clone()
        }
    }

    fn exited(&self, returncode: i32) -> Self {
        Self {
            state: SessionState::Exited,
            returncode: Some(returncode),
            ..self.clone()
        }
    }

    fn released(&self) -> Self {
        Self {
            cleanup_sent: true,
            ..self.clone()
        }
    }

    /// User-facing status projection.
    pub fn status_line(&self) -> &'static str {
        match self.state {
            SessionState::Starting => "Starting...",
            SessionState::Running => "Running",
            SessionState::Exited => "Completed",
        }
    }
}

/// Registry of live sessions. Operations return the command frames to send;
/// the caller owns the channel.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_request_id: u64,
    sessions: HashMap<u64, ProcessSession>,
    focused: Option<u64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<&ProcessSession> {
        self.focused.and_then(|id| self.sessions.get(&id))
    }

    pub fn get(&self, request_id: u64) -> Option<&ProcessSession> {
        self.sessions.get(&request_id)
    }

    pub fn is_focused_pid(&self, pid: u32) -> bool {
        self.focused().is_some_and(|session| session.pid == Some(pid))
    }

    /// Start a new session for `module` and focus it.
    pub fn run(&mut self, module: &str, path: &str) -> (u64, ClientCommand) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.sessions
            .insert(request_id, ProcessSession::new(module, path, request_id));
        self.focused = Some(request_id);
        (
            request_id,
            ClientCommand::Run {
                module: module.to_string(),
                request_id,
            },
        )
    }

    /// Bind a pid to the pending session with a matching request id.
    /// Returns whether the event applied.
    pub fn handle_running(&mut self, payload: &RunningPayload) -> bool {
        match self.sessions.get(&payload.request_id) {
            Some(session) if session.state == SessionState::Starting => {
                let started = session.started(payload.pid);
                self.sessions.insert(payload.request_id, started);
                true
            }
            Some(_) => {
                debug!(
                    target: "tidepool::session",
                    request_id = payload.request_id,
                    "RUNNING for a session already past start; dropped"
                );
                false
            }
            None => {
                debug!(
                    target: "tidepool::session",
                    request_id = payload.request_id,
                    "RUNNING for an unknown request id; dropped"
                );
                false
            }
        }
    }

    /// Transition the session owning `pid` to Exited. The transition issues
    /// the post-run INSPECT for the session's path, the only command a
    /// lifecycle event auto-issues. An EXIT that matches no running session
    /// (including one still Starting, which has no pid yet) is dropped.
    pub fn handle_exit(&mut self, payload: &ExitPayload) -> Option<ClientCommand> {
        let request_id = self.request_id_for_pid(payload.pid)?;
        let session = self.sessions.get(&request_id)?;
        if session.state != SessionState::Running {
            debug!(
                target: "tidepool::session",
                pid = payload.pid,
                "EXIT for a session not running; dropped"
            );
            return None;
        }
        let exited = session.exited(payload.returncode);
        let inspect = ClientCommand::Inspect {
            path: exited.path.clone(),
        };
        self.sessions.insert(request_id, exited);
        Some(inspect)
    }

    /// Replace a session with a fresh attempt at the same module. The old
    /// session is removed from the registry, so its in-flight output no
    /// longer correlates; a running process is killed first.
    pub fn rerun(&mut self, request_id: u64) -> Option<(u64, Vec<ClientCommand>)> {
        let old = self.sessions.remove(&request_id)?;
        let mut commands = Vec::new();
        if old.state == SessionState::Running {
            if let Some(pid) = old.pid {
                commands.push(ClientCommand::Kill { pid });
            }
        }
        let (new_id, run) = self.run(&old.module, &old.path);
        commands.push(run);
        Some((new_id, commands))
    }

    /// Focus moved away from the session. Kills a still-live process exactly
    /// once, no matter how many times the release is repeated.
    pub fn release(&mut self, request_id: u64) -> Option<ClientCommand> {
        if self.focused == Some(request_id) {
            self.focused = None;
        }
        let session = self.sessions.get(&request_id)?;
        if session.state == SessionState::Exited || session.cleanup_sent {
            return None;
        }
        let pid = session.pid?;
        let released = session.released();
        self.sessions.insert(request_id, released);
        Some(ClientCommand::Kill { pid })
    }

    /// Source change for the focused module while it is still live: kill and
    /// re-execute.
    pub fn handle_file_modified(&mut self, path: &str) -> Option<(u64, Vec<ClientCommand>)> {
        let focused_id = self.focused?;
        let session = self.sessions.get(&focused_id)?;
        if session.state == SessionState::Exited {
            return None;
        }
        if module_name(path) != session.module {
            return None;
        }
        self.rerun(focused_id)
    }

    fn request_id_for_pid(&self, pid: u32) -> Option<u64> {
        self.sessions
            .values()
            .find(|session| session.pid == Some(pid))
            .map(|session| session.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_registry() -> (SessionRegistry, u64) {
        let mut registry = SessionRegistry::new();
        let (request_id, _) = registry.run("comp110.hello", "./comp110/hello.py");
        assert!(registry.handle_running(&RunningPayload {
            pid: 42,
            request_id,
        }));
        (registry, request_id)
    }

    #[test]
    fn run_issues_tagged_run_command() {
        let mut registry = SessionRegistry::new();
        let (request_id, command) = registry.run("hello", "./hello.py");
        assert_eq!(request_id, 0);
        assert_eq!(
            command,
            ClientCommand::Run {
                module: "hello".to_string(),
                request_id: 0,
            }
        );
        let session = registry.focused().unwrap();
        assert_eq!(session.state, SessionState::Starting);
        assert_eq!(session.status_line(), "Starting...");
        assert_eq!(session.pid, None);
    }

    #[test]
    fn running_binds_pid_and_transitions() {
        let (registry, request_id) = running_registry();
        let session = registry.get(request_id).unwrap();
        assert_eq!(session.state, SessionState::Running);
        assert_eq!(session.pid, Some(42));
        assert_eq!(session.status_line(), "Running");
    }

    #[test]
    fn running_with_wrong_request_id_is_dropped() {
        let mut registry = SessionRegistry::new();
        let (request_id, _) = registry.run("hello", "./hello.py");
        assert!(!registry.handle_running(&RunningPayload {
            pid: 42,
            request_id: request_id + 7,
        }));
        assert_eq!(registry.get(request_id).unwrap().state, SessionState::Starting);
    }

    #[test]
    fn exit_transitions_and_issues_inspect() {
        let (mut registry, request_id) = running_registry();
        let command = registry.handle_exit(&ExitPayload {
            pid: 42,
            returncode: 0,
        });
        assert_eq!(
            command,
            Some(ClientCommand::Inspect {
                path: "./comp110/hello.py".to_string(),
            })
        );
        let session = registry.get(request_id).unwrap();
        assert_eq!(session.state, SessionState::Exited);
        assert_eq!(session.returncode, Some(0));
        assert_eq!(session.status_line(), "Completed");
    }

    #[test]
    fn exit_never_transitions_a_starting_session() {
        let mut registry = SessionRegistry::new();
        let (request_id, _) = registry.run("hello", "./hello.py");
        assert_eq!(
            registry.handle_exit(&ExitPayload {
                pid: 42,
                returncode: 1,
            }),
            None
        );
        assert_eq!(registry.get(request_id).unwrap().state, SessionState::Starting);
    }

    #[test]
    fn exit_for_a_foreign_pid_is_dropped() {
        let (mut registry, request_id) = running_registry();
        assert_eq!(
            registry.handle_exit(&ExitPayload {
                pid: 9999,
                returncode: 1,
            }),
            None
        );
        assert_eq!(registry.get(request_id).unwrap().state, SessionState::Running);
    }

    #[test]
    fn repeated_exit_is_dropped() {
        let (mut registry, _) = running_registry();
        registry
            .handle_exit(&ExitPayload {
                pid: 42,
                returncode: 0,
            })
            .unwrap();
        assert_eq!(
            registry.handle_exit(&ExitPayload {
                pid: 42,
                returncode: 0,
            }),
            None
        );
    }

    #[test]
    fn rerun_of_running_session_kills_exactly_once_before_run() {
        let (mut registry, request_id) = running_registry();
        let (new_id, commands) = registry.rerun(request_id).unwrap();
        assert_eq!(
            commands,
            vec![
                ClientCommand::Kill { pid: 42 },
                ClientCommand::Run {
                    module: "comp110.hello".to_string(),
                    request_id: new_id,
                },
            ]
        );
        assert_ne!(new_id, request_id);
        assert!(registry.get(request_id).is_none());
        assert_eq!(registry.focused().unwrap().request_id, new_id);
    }

    #[test]
    fn rerun_of_starting_session_skips_the_kill() {
        let mut registry = SessionRegistry::new();
        let (request_id, _) = registry.run("hello", "./hello.py");
        let (new_id, commands) = registry.rerun(request_id).unwrap();
        assert_eq!(
            commands,
            vec![ClientCommand::Run {
                module: "hello".to_string(),
                request_id: new_id,
            }]
        );
    }

    #[test]
    fn stale_output_no_longer_correlates_after_rerun() {
        let (mut registry, request_id) = running_registry();
        registry.rerun(request_id).unwrap();
        // The old pid is gone with its session.
        assert!(!registry.is_focused_pid(42));
        assert_eq!(
            registry.handle_exit(&ExitPayload {
                pid: 42,
                returncode: 0,
            }),
            None
        );
    }

    #[test]
    fn release_kills_once_and_only_once() {
        let (mut registry, request_id) = running_registry();
        assert_eq!(
            registry.release(request_id),
            Some(ClientCommand::Kill { pid: 42 })
        );
        assert_eq!(registry.release(request_id), None);
        assert_eq!(registry.release(request_id), None);
        assert!(registry.focused().is_none());
    }

    #[test]
    fn release_of_exited_session_is_a_no_op() {
        let (mut registry, request_id) = running_registry();
        registry
            .handle_exit(&ExitPayload {
                pid: 42,
                returncode: 0,
            })
            .unwrap();
        assert_eq!(registry.release(request_id), None);
    }

    #[test]
    fn release_before_pid_is_known_sends_nothing() {
        let mut registry = SessionRegistry::new();
        let (request_id, _) = registry.run("hello", "./hello.py");
        assert_eq!(registry.release(request_id), None);
    }

    #[test]
    fn file_modified_for_focused_module_triggers_kill_and_rerun() {
        let (mut registry, _) = running_registry();
        let (new_id, commands) = registry
            .handle_file_modified("./comp110/hello.py")
            .unwrap();
        assert_eq!(commands[0], ClientCommand::Kill { pid: 42 });
        assert_eq!(
            commands[1],
            ClientCommand::Run {
                module: "comp110.hello".to_string(),
                request_id: new_id,
            }
        );
    }

    #[test]
    fn file_modified_for_another_module_is_ignored() {
        let (mut registry, request_id) = running_registry();
        assert!(registry.handle_file_modified("./comp110/other.py").is_none());
        assert!(registry.get(request_id).is_some());
    }

    #[test]
    fn file_modified_after_exit_is_ignored() {
        let (mut registry, _) = running_registry();
        registry
            .handle_exit(&ExitPayload {
                pid: 42,
                returncode: 0,
            })
            .unwrap();
        assert!(registry.handle_file_modified("./comp110/hello.py").is_none());
    }
}
