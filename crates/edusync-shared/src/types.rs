use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::BROADCAST_RECEIVER;
use crate::error::ThreadIdError;

// Conversation identity: the two participant ids in lexicographic order.
// Never stored, always recomputed from the participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId {
    low: String,
    high: String,
}

impl ThreadId {
    /// Order-independent: `between(a, b) == between(b, a)`.
    pub fn between(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn participants(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.low == user_id || self.high == user_id
    }

    /// The other participant, from `me`'s point of view.
    pub fn counterpart(&self, me: &str) -> Option<&str> {
        if self.low == me {
            Some(&self.high)
        } else if self.high == me {
            Some(&self.low)
        } else {
            None
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.contains(BROADCAST_RECEIVER)
    }

    pub fn to_topic(&self) -> String {
        format!("realtime:{self}")
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

impl FromStr for ThreadId {
    type Err = ThreadIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once(':')
            .ok_or_else(|| ThreadIdError::MissingSeparator(s.to_string()))?;
        if a.is_empty() || b.is_empty() {
            return Err(ThreadIdError::EmptyParticipant(s.to_string()));
        }
        Ok(Self::between(a, b))
    }
}

/// Whether a chat message is end-to-end sealed or addressed to everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Private,
    Broadcast,
}

impl MessageKind {
    pub fn for_receiver(receiver_id: &str) -> Self {
        if receiver_id == BROADCAST_RECEIVER {
            Self::Broadcast
        } else {
            Self::Private
        }
    }
}

/// Every collection the core mirrors locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Students,
    Staff,
    Invoices,
    LeaveRequests,
    Notices,
    Chats,
    Certificates,
    AttendanceRecords,
    AttendanceLogs,
}

impl Collection {
    pub const ALL: [Collection; 9] = [
        Collection::Students,
        Collection::Staff,
        Collection::Invoices,
        Collection::LeaveRequests,
        Collection::Notices,
        Collection::Chats,
        Collection::Certificates,
        Collection::AttendanceRecords,
        Collection::AttendanceLogs,
    ];

    /// Collection name as collaborators spell it (camelCase).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Staff => "staff",
            Self::Invoices => "invoices",
            Self::LeaveRequests => "leaveRequests",
            Self::Notices => "notices",
            Self::Chats => "chats",
            Self::Certificates => "certificates",
            Self::AttendanceRecords => "attendanceRecords",
            Self::AttendanceLogs => "attendanceLogs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown collection: {s}"))
    }
}
