use std::fmt;

use serde::{Deserialize, Serialize};

/// Which leg of a memo pair a row represents. A `recv` leg belongs to the
/// recipient, a `send` leg to the sender; every logical message is one of
/// each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoKind {
    Recv,
    Send,
}

impl MemoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoKind::Recv => "recv",
            MemoKind::Send => "send",
        }
    }

    /// Accepts the wire form used by list queries; anything else is an
    /// invalid parameter at the boundary.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recv" => Some(MemoKind::Recv),
            "send" => Some(MemoKind::Send),
            _ => None,
        }
    }
}

impl fmt::Display for MemoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
