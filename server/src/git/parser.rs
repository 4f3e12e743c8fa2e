//! Parser for `git blame --incremental` output.
//!
//! The incremental format is a sequence of blocks:
//! ```text
//! <hash> <source line> <result line> <line count>
//! author <name>
//! author-mail <<email>>
//! author-time <epoch>
//! author-tz <tz>
//! committer <name>
//! committer-mail <<email>>
//! committer-time <epoch>
//! committer-tz <tz>
//! summary <text>
//! previous <hash> <filename>
//! filename <path>
//! ```
//!
//! A block always starts with the coverage line and ends with `filename`.
//! Git only prints the metadata lines the first time a commit shows up, so
//! commits are remembered in a [`CommitRegistry`]. The set of metadata keys
//! may grow in future git versions; unknown keys are ignored.

use blame_model::{is_hash, Commit, FileAttachedCommit, Line, LineAttachedCommit};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Commits seen so far in one blame, by hash.
pub type CommitRegistry = HashMap<String, Arc<Commit>>;

/// How long the cooperative parser runs before yielding to the scheduler.
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(5);

fn coverage_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d+) (\d+) (\d+)$").ok())
        .as_ref()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Coverage {
    source: u32,
    result: u32,
    count: u32,
}

/// Parse `<source> <result> <count>` following a hash.
fn parse_coverage(key: &str, value: &str) -> Option<Coverage> {
    if !is_hash(key) {
        return None;
    }

    let caps = coverage_pattern()?.captures(value)?;
    Some(Coverage {
        source: caps[1].parse().ok()?,
        result: caps[2].parse().ok()?,
        count: caps[3].parse().ok()?,
    })
}

/// A block being assembled.
struct Block {
    commit: Arc<Commit>,
    coverage: Coverage,
}

/// Wall-clock budget between voluntary yields.
struct YieldTimer {
    slice: Duration,
    started: Instant,
}

impl YieldTimer {
    fn new(slice: Duration) -> Self {
        Self {
            slice,
            started: Instant::now(),
        }
    }

    fn restart(&mut self) {
        self.started = Instant::now();
    }

    fn elapsed_past_slice(&self) -> Option<Duration> {
        let elapsed = self.started.elapsed();
        (elapsed > self.slice).then_some(elapsed)
    }
}

/// Split the next newline-terminated line off `rest`.
fn next_line<'a>(rest: &mut &'a [u8]) -> Option<&'a [u8]> {
    let position = rest.iter().position(|&b| b == b'\n')?;
    let line = &rest[..position];
    *rest = &rest[position + 1..];
    Some(line)
}

/// Stateful parser turning byte chunks into line attributions.
///
/// Chunks may be split anywhere, including in the middle of a line; the
/// output does not depend on where the splits fall.
pub struct IncrementalParser {
    current_user: Option<String>,
    registry: CommitRegistry,
    partial_line: Vec<u8>,
    block: Option<Block>,
    timer: YieldTimer,
}

impl IncrementalParser {
    /// Create a parser. `current_user` is the identity (`<mail>`) that marks
    /// authors and committers as the current user.
    pub fn new(current_user: Option<String>) -> Self {
        Self::with_time_slice(current_user, DEFAULT_TIME_SLICE)
    }

    pub fn with_time_slice(current_user: Option<String>, slice: Duration) -> Self {
        Self {
            current_user,
            registry: CommitRegistry::new(),
            partial_line: Vec::new(),
            block: None,
            timer: YieldTimer::new(slice),
        }
    }

    pub fn registry(&self) -> &CommitRegistry {
        &self.registry
    }

    /// Parse a chunk without yielding.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<LineAttachedCommit> {
        let mut out = Vec::new();
        let mut rest = chunk;
        while let Some(line) = next_line(&mut rest) {
            self.complete_line(line, &mut out);
        }
        self.partial_line.extend_from_slice(rest);
        out
    }

    /// Parse a chunk, yielding to the runtime whenever a time slice is used
    /// up. Produces exactly what [`feed`](Self::feed) would.
    pub async fn feed_cooperative(&mut self, chunk: &[u8]) -> Vec<LineAttachedCommit> {
        let mut out = Vec::new();
        let mut rest = chunk;
        self.timer.restart();

        while let Some(line) = next_line(&mut rest) {
            if let Some(elapsed) = self.timer.elapsed_past_slice() {
                tracing::debug!(
                    "Running blame has taken more than {:?} ({:?}). Yielding and continuing later.",
                    self.timer.slice,
                    elapsed
                );
                tokio::task::yield_now().await;
                self.timer.restart();
            }
            self.complete_line(line, &mut out);
        }

        self.partial_line.extend_from_slice(rest);
        out
    }

    /// End of stream: parse a trailing line that had no newline.
    ///
    /// A block without its `filename` line is incomplete and is dropped.
    pub fn finish(&mut self) -> Vec<LineAttachedCommit> {
        let mut out = Vec::new();
        if !self.partial_line.is_empty() {
            let line = std::mem::take(&mut self.partial_line);
            self.process_line(&String::from_utf8_lossy(&line), &mut out);
        }
        if let Some(block) = self.block.take() {
            tracing::debug!(
                "Dropping unterminated blame block for {}",
                block.commit.hash
            );
        }
        out
    }

    /// Throw away the block being assembled and any buffered bytes.
    pub fn abort(&mut self) {
        self.block = None;
        self.partial_line.clear();
    }

    fn complete_line(&mut self, segment: &[u8], out: &mut Vec<LineAttachedCommit>) {
        if self.partial_line.is_empty() {
            self.process_line(&String::from_utf8_lossy(segment), out);
        } else {
            let mut line = std::mem::take(&mut self.partial_line);
            line.extend_from_slice(segment);
            self.process_line(&String::from_utf8_lossy(&line), out);
            line.clear();
            self.partial_line = line;
        }
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<LineAttachedCommit>) {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (key, value) = match line.split_once(' ') {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };

        if let Some(coverage) = parse_coverage(key, value) {
            if let Some(previous) = &self.block {
                tracing::debug!(
                    "Blame block for {} ended without a filename",
                    previous.commit.hash
                );
            }
            let commit = self
                .registry
                .get(key)
                .cloned()
                .unwrap_or_else(|| Arc::new(Commit::new(key)));
            self.block = Some(Block { commit, coverage });
            return;
        }

        if key == "filename" {
            if let Some(block) = self.block.take() {
                self.emit(block, value, out);
            }
            return;
        }

        if let Some(block) = self.block.as_mut() {
            apply_metadata(block, key, value, self.current_user.as_deref());
        }
    }

    fn emit(&mut self, block: Block, filename: &str, out: &mut Vec<LineAttachedCommit>) {
        let Coverage {
            source,
            result,
            count,
        } = block.coverage;

        // Line numbers past u32::MAX cannot come from a real file.
        if source.checked_add(count).is_none() || result.checked_add(count).is_none() {
            tracing::debug!(
                "Dropping blame block for {} with out of range lines {} {} {}",
                block.commit.hash,
                source,
                result,
                count
            );
            return;
        }

        self.registry
            .insert(block.commit.hash.clone(), Arc::clone(&block.commit));

        let attached = FileAttachedCommit {
            commit: block.commit,
            filename: Arc::from(filename),
        };

        for offset in 0..count {
            out.push(LineAttachedCommit::new(
                &attached,
                Line::new(source + offset, result + offset),
            ));
        }
    }
}

/// Field of an author or committer addressed by a key suffix.
enum PersonField {
    Name,
    Mail,
    Time,
    Tz,
}

fn person_field(key: &str) -> Option<(&str, PersonField)> {
    let (role, suffix) = key.split_once('-').unwrap_or((key, ""));
    if role != "author" && role != "committer" {
        return None;
    }

    let field = match suffix {
        "" => PersonField::Name,
        "mail" => PersonField::Mail,
        "time" => PersonField::Time,
        "tz" => PersonField::Tz,
        _ => return None,
    };
    Some((role, field))
}

fn apply_metadata(block: &mut Block, key: &str, value: &str, current_user: Option<&str>) {
    if key == "summary" {
        Arc::make_mut(&mut block.commit).summary = value.to_string();
    } else if is_hash(key) {
        Arc::make_mut(&mut block.commit).hash = key.to_string();
    } else if let Some((role, field)) = person_field(key) {
        let commit = Arc::make_mut(&mut block.commit);
        if let Some(person) = commit.person_mut(role) {
            match field {
                PersonField::Name => person.name = value.to_string(),
                PersonField::Mail => person.set_mail(value, current_user),
                PersonField::Time => person.set_timestamp(value),
                PersonField::Tz => person.tz = value.to_string(),
            }
        }
    }
}
