/// Crawl page status definitions
///
/// A crawl page moves through `pending → fetching → {done, failed}`. `pending`
/// is the only initial state; `done` and `failed` are terminal for one attempt.
use std::fmt;

/// Represents the current status of a crawl page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageStatus {
    /// Waiting to be pulled by the scheduler
    Pending,

    /// Pulled into a batch and currently being processed
    Fetching,

    /// Processed successfully or skipped with a recorded reason
    Done,

    /// Processing raised an error; not retried until a forced reseed
    Failed,
}

impl PageStatus {
    /// Returns true if this is a terminal status for the current attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the page still needs work (including interrupted fetches)
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Pending | Self::Fetching)
    }

    /// Checks whether the scheduler may move a page from `self` to `next`
    ///
    /// Besides the forward transitions, `fetching → pending` (crash recovery)
    /// and `done → pending` (start of a new pass) are allowed. `failed` pages
    /// only leave their state through a forced reseed, which deletes them.
    pub fn can_transition_to(&self, next: PageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Fetching)
                | (Self::Fetching, Self::Done)
                | (Self::Fetching, Self::Failed)
                | (Self::Fetching, Self::Pending)
                | (Self::Done, Self::Pending)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetching" => Some(Self::Fetching),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible statuses
    pub fn all() -> [Self; 4] {
        [Self::Pending, Self::Fetching, Self::Done, Self::Failed]
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
