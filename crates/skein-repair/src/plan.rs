//! Choosing how much of a replica to copy.

use std::fmt;

/// What a rebuild has to transfer, derived from the two list lengths.
///
/// The destination length counts entries only: a destination holding just
/// the emptied-timeline marker has length 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPlan {
    /// The destination has no entries: copy the whole source.
    Full,
    /// The destination holds a suffix of the source: copy the older
    /// `missing` entries in front of it.
    Tail {
        /// Entries the destination lacks.
        missing: u64,
    },
    /// The destination is at least as long as the source.
    UpToDate,
}

impl RebuildPlan {
    /// Pick the plan for a destination of `dest_len` entries rebuilt from a
    /// source of `source_len` entries.
    pub fn compute(dest_len: u64, source_len: u64) -> Self {
        if dest_len >= source_len {
            Self::UpToDate
        } else if dest_len == 0 {
            Self::Full
        } else {
            Self::Tail {
                missing: source_len - dest_len,
            }
        }
    }

    /// Whether the plan transfers anything.
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::UpToDate)
    }
}

impl fmt::Display for RebuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Tail { missing } => write!(f, "tail({missing})"),
            Self::UpToDate => f.write_str("up-to-date"),
        }
    }
}
