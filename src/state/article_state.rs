/// Article state definitions for the harvest ledger
///
/// This module defines the states an article can be recorded in once a crawl
/// pass is over.
use std::fmt;

/// Represents the recorded state of an article in the harvest ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleState {
    // ===== Active States =====
    /// Article is known but has not reached a terminal outcome yet
    Pending,

    // ===== Terminal Success States =====
    /// Article content was retrieved and saved
    Downloaded,

    // ===== Terminal Error States =====
    /// Article exhausted its retries or failed fatally
    Failed,

    /// Article was handed to escalation because its site halted
    Escalated,

    /// No configured site matched the article
    Unassigned,
}

impl ArticleState {
    /// Returns true if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns true if this represents a successful download
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Downloaded)
    }

    /// Returns true if the article should be retried in a later invocation
    pub fn needs_followup(&self) -> bool {
        matches!(self, Self::Failed | Self::Escalated | Self::Unassigned)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
            Self::Unassigned => "unassigned",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloaded" => Some(Self::Downloaded),
            "failed" => Some(Self::Failed),
            "escalated" => Some(Self::Escalated),
            "unassigned" => Some(Self::Unassigned),
            _ => None,
        }
    }

    /// Returns all possible article states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Downloaded,
            Self::Failed,
            Self::Escalated,
            Self::Unassigned,
        ]
    }
}

impl fmt::Display for ArticleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
