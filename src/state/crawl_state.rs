/// Crawl state definitions for tracking one URL through the pipeline
///
/// This module defines all states a URL can be in and the events that move it
/// between them.
use std::fmt;

/// Represents the current state of a URL in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    // ===== Active States =====
    /// Admitted to the ledger, job not yet confirmed on the queue
    Discovered,

    /// A job for this URL is on the queue
    Queued,

    /// A worker holds the URL and is fetching it
    Fetching,

    /// Page fetched and content extracted
    Extracted,

    /// Content handed to the index
    Published,

    // ===== Terminal States =====
    /// Fully processed
    Done,

    /// Permanent failure (404, non-HTML, unparseable)
    Failed,

    /// Transient failures exhausted the retry budget
    DeadLettered,
}

/// Something that happened to a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlEvent {
    Enqueued,
    Leased,
    Extracted,
    Published,
    Completed,
    TransientFailure,
    PermanentFailure,
    LeaseExpired,
}

impl CrawlState {
    /// Returns true if this is a terminal state (no further processing)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::DeadLettered)
    }

    /// Returns true while a worker is (or was) holding the URL
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Fetching | Self::Extracted | Self::Published)
    }

    /// Computes the state reached by applying `event`
    ///
    /// `attempt_count` is the number of leases already taken, including the
    /// current one. Retry-type events dead-letter the URL once it reaches
    /// `max_attempts`.
    pub fn next(
        self,
        event: CrawlEvent,
        attempt_count: u32,
        max_attempts: u32,
    ) -> Result<CrawlState, TransitionError> {
        use CrawlEvent as E;
        use CrawlState as S;

        if self.is_terminal() {
            return Err(TransitionError::Terminal { state: self, event });
        }

        let exhausted = attempt_count >= max_attempts;

        let to = match (self, event) {
            (S::Discovered, E::Enqueued) => S::Queued,
            (S::Queued, E::Leased) => S::Fetching,
            (S::Fetching, E::Extracted) => S::Extracted,
            (S::Extracted, E::Published) => S::Published,
            (S::Published, E::Completed) => S::Done,
            (S::Fetching | S::Extracted, E::TransientFailure | E::LeaseExpired) => {
                if exhausted {
                    S::DeadLettered
                } else {
                    S::Queued
                }
            }
            (S::Fetching | S::Extracted | S::Published, E::PermanentFailure) => S::Failed,
            (from, event) => return Err(TransitionError::Invalid { from, event }),
        };

        Ok(to)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Extracted => "extracted",
            Self::Published => "published",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Parses a state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "queued" => Some(Self::Queued),
            "fetching" => Some(Self::Fetching),
            "extracted" => Some(Self::Extracted),
            "published" => Some(Self::Published),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    /// Returns all states, in pipeline order
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Discovered,
            Self::Queued,
            Self::Fetching,
            Self::Extracted,
            Self::Published,
            Self::Done,
            Self::Failed,
            Self::DeadLettered,
        ]
    }

    /// Returns the non-terminal states
    pub fn non_terminal_states() -> Vec<Self> {
        Self::all_states()
            .into_iter()
            .filter(|s| !s.is_terminal())
            .collect()
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// A rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("{state} is terminal, cannot apply {event:?}")]
    Terminal { state: CrawlState, event: CrawlEvent },

    #[error("no transition from {from} on {event:?}")]
    Invalid { from: CrawlState, event: CrawlEvent },
}
