/// Work-queue status for discovered items
///
/// Items only ever move forward: pending → processing → completed | failed.
use std::fmt;

/// Represents where a discovered item is in the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Item was discovered by the crawler and is waiting to be claimed
    Pending,

    /// Item has been claimed by a worker batch
    Processing,

    /// Item was relayed, deduplicated, or was already known processed
    Completed,

    /// Item failed terminally (fetch, missing artifact, relay)
    Failed,
}

impl ItemStatus {
    /// Returns true if no further processing will happen for this item
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true if moving from `self` to `next` is a forward transition
    ///
    /// Operator actions (requeueing failed items, releasing stale claims)
    /// bypass this check on purpose and go straight to the ledger.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    /// Statuses from which `self` may be entered
    pub fn predecessors(&self) -> &'static [ItemStatus] {
        match self {
            Self::Pending => &[],
            Self::Processing => &[Self::Pending],
            Self::Completed | Self::Failed => &[Self::Processing],
        }
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all statuses in lifecycle order
    pub fn all_statuses() -> [Self; 4] {
        [
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
