//! Per-file blame result

use std::collections::HashMap;

use crate::line::LineAttachedCommit;

/// Result line number (1-based) to the commit that last touched it.
///
/// Iteration follows insertion order. Inserting a line twice keeps its
/// original position and replaces the attribution.
#[derive(Debug, Clone, Default)]
pub struct Blame {
    lines: HashMap<u32, LineAttachedCommit>,
    order: Vec<u32>,
}

impl Blame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attribution under its result line number.
    ///
    /// Returns the attribution it replaced, if any.
    pub fn insert(&mut self, attribution: LineAttachedCommit) -> Option<LineAttachedCommit> {
        let result_line = attribution.line.result;
        let previous = self.lines.insert(result_line, attribution);
        if previous.is_none() {
            self.order.push(result_line);
        }
        previous
    }

    /// Attribution for a 1-based result line.
    pub fn get(&self, result_line: u32) -> Option<&LineAttachedCommit> {
        self.lines.get(&result_line)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Attributions in the order they were first recorded.
    pub fn iter(&self) -> impl Iterator<Item = &LineAttachedCommit> + '_ {
        self.order.iter().filter_map(|line| self.lines.get(line))
    }
}

impl Extend<LineAttachedCommit> for Blame {
    fn extend<I: IntoIterator<Item = LineAttachedCommit>>(&mut self, iter: I) {
        for attribution in iter {
            self.insert(attribution);
        }
    }
}
