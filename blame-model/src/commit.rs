//! Commit metadata types
//!
//! A [`Commit`] is filled in field by field while its block is read from
//! the incremental blame stream, then shared by every line it owns.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Valid hash lengths: SHA-1 and SHA-256 object names.
pub const HASH_LENGTHS: [usize; 2] = [40, 64];

/// Check whether `hash` is a well-formed object name.
pub fn is_hash(hash: &str) -> bool {
    HASH_LENGTHS.contains(&hash.len())
        && hash
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Check whether `hash` is the all-zero name git uses for lines that are
/// not committed yet.
pub fn is_uncommitted_hash(hash: &str) -> bool {
    HASH_LENGTHS.contains(&hash.len()) && hash.bytes().all(|b| b == b'0')
}

/// Author or committer of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAuthor {
    pub name: String,

    /// Mail address as printed by git, angle brackets included
    pub mail: String,

    /// Whether `mail` equals the identity configured for the repository
    pub is_current_user: bool,

    /// Seconds since epoch, as printed by git
    pub timestamp: String,

    /// Decoded `timestamp`
    pub date: DateTime<Utc>,

    /// Timezone offset, as printed by git (e.g. `+0200`)
    pub tz: String,
}

impl CommitAuthor {
    /// Set the mail address and recompute `is_current_user`.
    ///
    /// The comparison is exact: `current_user` must carry the same angle
    /// brackets git prints (`<someone@example.com>`).
    pub fn set_mail(&mut self, mail: &str, current_user: Option<&str>) {
        self.mail = mail.to_string();
        self.is_current_user = current_user == Some(mail);
    }

    /// Set the raw timestamp and decode it into `date`.
    ///
    /// Values that are not a whole number of seconds keep the previous date.
    pub fn set_timestamp(&mut self, raw: &str) {
        self.timestamp = raw.to_string();
        if let Some(date) = raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        {
            self.date = date;
        }
    }
}

/// A commit as seen by blame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub hash: String,
    pub author: CommitAuthor,
    pub committer: CommitAuthor,
    pub summary: String,
}

impl Commit {
    /// Create a commit with empty metadata.
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            author: CommitAuthor::default(),
            committer: CommitAuthor::default(),
            summary: String::new(),
        }
    }

    /// Abbreviated hash, as shown to users.
    pub fn short_hash(&self) -> &str {
        self.hash.get(..7).unwrap_or(&self.hash)
    }

    /// Whether this is the placeholder for working tree changes.
    pub fn is_uncommitted(&self) -> bool {
        is_uncommitted_hash(&self.hash)
    }

    /// Look up the author or committer by its protocol name.
    pub fn person_mut(&mut self, role: &str) -> Option<&mut CommitAuthor> {
        match role {
            "author" => Some(&mut self.author),
            "committer" => Some(&mut self.committer),
            _ => None,
        }
    }
}
