//! Severity classification of the cumulative byte count against two limits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered `Normal < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        })
    }
}

/// `Critical` above `hard`, `Warning` above `soft` up to and including `hard`.
///
/// `soft <= hard` is not required. With `soft > hard` the Warning band is
/// empty and totals go straight from Normal to Critical.
pub fn classify(total: u64, soft: u64, hard: u64) -> Severity {
    if total > hard {
        Severity::Critical
    } else if total > soft {
        Severity::Warning
    } else {
        Severity::Normal
    }
}
