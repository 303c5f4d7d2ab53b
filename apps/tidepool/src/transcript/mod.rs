/// Ordered stdio transcript for one process session.
///
/// Entries append strictly in arrival order and are never reordered. A
/// prompt is answered in place through the handle captured when it was
/// appended; any drift between the handle and the transcript is a
/// correlation bug upstream and fails loudly instead of corrupting order.
pub mod grouper;

use thiserror::Error;

use crate::protocol::failure::StructuredFailure;
pub use grouper::{GroupPolicy, OutputGroup, VISIBLE_EDGE};

#[derive(Debug, Clone, PartialEq)]
pub struct StdoutLine {
    pub line: String,
    /// Arrival timestamp, milliseconds.
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StderrPayload {
    Failure(StructuredFailure),
    Plain(String),
}

impl StderrPayload {
    fn parse(line: String) -> Self {
        match StructuredFailure::parse(&line) {
            Some(failure) => StderrPayload::Failure(failure),
            None => StderrPayload::Plain(line),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptLine {
    pub prompt: String,
    pub response: Option<String>,
    id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StdioEntry {
    Stdout(StdoutLine),
    Stderr(StderrPayload),
    Stdin(PromptLine),
    StdoutGroup(OutputGroup),
}

/// Identity of one appended prompt: its position plus the id minted at
/// append time. Two prompts with identical text never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptHandle {
    pub(crate) index: usize,
    pub(crate) prompt_id: u64,
}

impl PromptHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("transcript invariant violated at index {index}: {detail}")]
    InvariantViolation { index: usize, detail: &'static str },
}

#[derive(Debug)]
pub struct Transcript {
    entries: Vec<StdioEntry>,
    policy: GroupPolicy,
    next_prompt_id: u64,
}

impl Transcript {
    pub fn new(policy: GroupPolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
            next_prompt_id: 0,
        }
    }

    pub fn entries(&self) -> &[StdioEntry] {
        &self.entries
    }

    pub fn append_stdout(&mut self, line: String, at: u64) {
        grouper::append_stdout(&mut self.entries, &self.policy, StdoutLine { line, at });
    }

    pub fn append_stderr(&mut self, line: String) {
        self.entries.push(StdioEntry::Stderr(StderrPayload::parse(line)));
    }

    pub fn append_prompt(&mut self, prompt: String) -> PromptHandle {
        let prompt_id = self.next_prompt_id;
        self.next_prompt_id += 1;
        self.entries.push(StdioEntry::Stdin(PromptLine {
            prompt,
            response: None,
            id: prompt_id,
        }));
        PromptHandle {
            index: self.entries.len() - 1,
            prompt_id,
        }
    }

    /// Record the response to a previously appended prompt. The entry at the
    /// handle's index must still be that exact prompt, unanswered; otherwise
    /// the transcript is left untouched and the violation surfaces.
    pub fn answer_prompt(
        &mut self,
        handle: PromptHandle,
        answer: String,
    ) -> Result<(), TranscriptError> {
        match self.entries.get_mut(handle.index) {
            Some(StdioEntry::Stdin(prompt)) if prompt.id == handle.prompt_id => {
                if prompt.response.is_some() {
                    return Err(TranscriptError::InvariantViolation {
                        index: handle.index,
                        detail: "prompt already answered",
                    });
                }
                prompt.response = Some(answer);
                Ok(())
            }
            Some(StdioEntry::Stdin(_)) => Err(TranscriptError::InvariantViolation {
                index: handle.index,
                detail: "prompt identity does not match",
            }),
            Some(_) => Err(TranscriptError::InvariantViolation {
                index: handle.index,
                detail: "expected a stdin prompt",
            }),
            None => Err(TranscriptError::InvariantViolation {
                index: handle.index,
                detail: "prompt index out of bounds",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> Transcript {
        Transcript::new(GroupPolicy::default())
    }

    #[test]
    fn appends_preserve_arrival_order() {
        let mut t = transcript();
        t.append_stdout("one".to_string(), 0);
        t.append_stderr("two".to_string());
        t.append_prompt("three? ".to_string());
        t.append_stdout("four".to_string(), 10);
        let entries = t.entries();
        assert!(matches!(&entries[0], StdioEntry::Stdout(line) if line.line == "one"));
        assert!(matches!(&entries[1], StdioEntry::Stderr(StderrPayload::Plain(line)) if line == "two"));
        assert!(matches!(&entries[2], StdioEntry::Stdin(prompt) if prompt.prompt == "three? "));
        assert!(matches!(&entries[3], StdioEntry::Stdout(line) if line.line == "four"));
    }

    #[test]
    fn structured_stderr_parses_on_append() {
        let mut t = transcript();
        t.append_stderr(
            r#"{"type":"ValueError","message":"bad","stack_trace":[]}"#.to_string(),
        );
        assert!(matches!(
            &t.entries()[0],
            StdioEntry::Stderr(StderrPayload::Failure(failure)) if failure.kind == "ValueError"
        ));
    }

    #[test]
    fn answers_prompt_in_place() {
        let mut t = transcript();
        let handle = t.append_prompt("name? ".to_string());
        t.append_stdout("noise".to_string(), 5);
        t.answer_prompt(handle, "Kris".to_string()).unwrap();
        assert!(matches!(
            &t.entries()[0],
            StdioEntry::Stdin(prompt) if prompt.response.as_deref() == Some("Kris")
        ));
    }

    #[test]
    fn double_answer_is_an_invariant_violation() {
        let mut t = transcript();
        let handle = t.append_prompt("name? ".to_string());
        t.answer_prompt(handle, "Kris".to_string()).unwrap();
        let err = t.answer_prompt(handle, "again".to_string()).unwrap_err();
        assert_eq!(
            err,
            TranscriptError::InvariantViolation {
                index: 0,
                detail: "prompt already answered",
            }
        );
        assert!(matches!(
            &t.entries()[0],
            StdioEntry::Stdin(prompt) if prompt.response.as_deref() == Some("Kris")
        ));
    }

    #[test]
    fn identical_prompt_texts_are_distinct() {
        let mut t = transcript();
        let first = t.append_prompt("> ".to_string());
        let second = t.append_prompt("> ".to_string());
        // A handle aimed at the wrong twin fails even though the text matches.
        let stale = PromptHandle {
            index: second.index,
            prompt_id: first.prompt_id,
        };
        let err = t.answer_prompt(stale, "x".to_string()).unwrap_err();
        assert_eq!(
            err,
            TranscriptError::InvariantViolation {
                index: 1,
                detail: "prompt identity does not match",
            }
        );
        t.answer_prompt(second, "x".to_string()).unwrap();
    }

    #[test]
    fn wrong_entry_kind_is_an_invariant_violation() {
        let mut t = transcript();
        t.append_stdout("line".to_string(), 0);
        let forged = PromptHandle {
            index: 0,
            prompt_id: 0,
        };
        let err = t.answer_prompt(forged, "x".to_string()).unwrap_err();
        assert_eq!(
            err,
            TranscriptError::InvariantViolation {
                index: 0,
                detail: "expected a stdin prompt",
            }
        );
    }

    #[test]
    fn out_of_bounds_handle_is_an_invariant_violation() {
        let mut t = transcript();
        let forged = PromptHandle {
            index: 3,
            prompt_id: 0,
        };
        let err = t.answer_prompt(forged, "x".to_string()).unwrap_err();
        assert_eq!(
            err,
            TranscriptError::InvariantViolation {
                index: 3,
                detail: "prompt index out of bounds",
            }
        );
        assert!(t.entries().is_empty());
    }

    #[test]
    fn grouping_never_swallows_a_prompt_answer() {
        let mut t = transcript();
        let handle = t.append_prompt("count? ".to_string());
        for i in 0..15u64 {
            t.append_stdout(format!("line {i}"), 100 + i);
        }
        // The burst collapsed behind the prompt; the handle still resolves.
        t.answer_prompt(handle, "15".to_string()).unwrap();
        assert!(matches!(&t.entries()[0], StdioEntry::Stdin(_)));
        assert!(matches!(&t.entries()[1], StdioEntry::StdoutGroup(_)));
    }
}
