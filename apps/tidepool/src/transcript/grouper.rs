/// Adaptive output grouping.
///
/// High-volume stdout collapses into navigable groups; sparse interactive
/// output stays as individual lines. The decision is made incrementally at
/// append time: each arriving line either joins an open tail group, or is
/// pushed individually and the trailing contiguous run is re-examined
/// against the size and rate thresholds.
use super::{StdioEntry, StdoutLine};

/// Lines kept visible at each edge of a collapsed group so surrounding
/// context survives the collapse.
pub const VISIBLE_EDGE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupPolicy {
    /// Minimum run length before a group may form.
    pub min_group_size: usize,
    /// Line rate (per millisecond) a run must exceed to collapse.
    pub rate_per_ms: f64,
    /// Gap between consecutive lines that breaks a run.
    pub separation_ms: u64,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        Self {
            min_group_size: 10,
            rate_per_ms: 0.01,
            separation_ms: 1000,
        }
    }
}

impl GroupPolicy {
    /// Configuration surfaces the rate in lines per second; the comparison
    /// happens per millisecond.
    pub fn from_rate_per_second(
        min_group_size: usize,
        rate_per_second: f64,
        separation_ms: u64,
    ) -> Self {
        Self {
            min_group_size,
            rate_per_ms: rate_per_second / 1000.0,
            separation_ms,
        }
    }

    fn run_qualifies(&self, count: usize, span_ms: u64) -> bool {
        if count < self.min_group_size {
            return false;
        }
        if span_ms == 0 {
            // Lines sharing one millisecond: maximal rate, no division.
            return true;
        }
        (count as f64) / (span_ms as f64) > self.rate_per_ms
    }
}

/// A collapsed run of consecutive stdout lines.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGroup {
    children: Vec<StdoutLine>,
    start: u64,
    end: u64,
}

impl OutputGroup {
    fn from_run(children: Vec<StdoutLine>) -> Self {
        let start = children.first().map(|line| line.at).unwrap_or(0);
        let end = children.last().map(|line| line.at).unwrap_or(start);
        Self {
            children,
            start,
            end,
        }
    }

    fn push(&mut self, line: StdoutLine) {
        self.end = line.at;
        self.children.push(line);
    }

    pub fn children(&self) -> &[StdoutLine] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Leading lines rendered outside the collapse.
    pub fn leading(&self) -> &[StdoutLine] {
        &self.children[..VISIBLE_EDGE.min(self.children.len())]
    }

    /// Trailing lines rendered outside the collapse.
    pub fn trailing(&self) -> &[StdoutLine] {
        let len = self.children.len();
        &self.children[len - VISIBLE_EDGE.min(len)..]
    }

    /// Interior lines hidden behind the expand affordance.
    pub fn hidden_count(&self) -> usize {
        self.children.len().saturating_sub(VISIBLE_EDGE * 2)
    }
}

pub(super) fn append_stdout(
    entries: &mut Vec<StdioEntry>,
    policy: &GroupPolicy,
    line: StdoutLine,
) {
    if let Some(StdioEntry::StdoutGroup(group)) = entries.last_mut() {
        // A qualifying run following an open tail group joins it rather
        // than opening a second one.
        if line.at.saturating_sub(group.end) < policy.separation_ms {
            group.push(line);
            return;
        }
    }
    entries.push(StdioEntry::Stdout(line));
    collapse_tail(entries, policy);
}

fn collapse_tail(entries: &mut Vec<StdioEntry>, policy: &GroupPolicy) {
    let run_start = trailing_run_start(entries, policy);
    let count = entries.len() - run_start;
    if count < policy.min_group_size {
        return;
    }
    let span = match (&entries[run_start], &entries[entries.len() - 1]) {
        (StdioEntry::Stdout(first), StdioEntry::Stdout(last)) => last.at.saturating_sub(first.at),
        _ => return,
    };
    if !policy.run_qualifies(count, span) {
        return;
    }
    let run = entries
        .drain(run_start..)
        .map(|entry| match entry {
            StdioEntry::Stdout(line) => line,
            _ => unreachable!("trailing run holds stdout lines only"),
        })
        .collect();
    entries.push(StdioEntry::StdoutGroup(OutputGroup::from_run(run)));
}

/// Walk back over the trailing contiguous stdout run: stop at the first
/// non-stdout entry or the first consecutive gap at or beyond the
/// separation threshold.
fn trailing_run_start(entries: &[StdioEntry], policy: &GroupPolicy) -> usize {
    let mut start = entries.len();
    let mut next_at: Option<u64> = None;
    for (index, entry) in entries.iter().enumerate().rev() {
        let StdioEntry::Stdout(line) = entry else {
            break;
        };
        if let Some(next) = next_at {
            if next.saturating_sub(line.at) >= policy.separation_ms {
                break;
            }
        }
        start = index;
        next_at = Some(line.at);
    }
    start
}
