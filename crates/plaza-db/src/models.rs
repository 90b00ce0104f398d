use plaza_types::models::MemoKind;

/// Database row types mapping directly to SQLite rows.
/// Distinct from the plaza-types API models to keep the DB layer independent.
pub struct MemberRow {
    pub id: String,
    pub nick: String,
    pub password: String,
    pub point: i64,
    pub open: bool,
    pub leave_at: Option<String>,
    pub intercept_at: Option<String>,
    pub memo_unread: i64,
    pub memo_caller: String,
    pub created_at: String,
}

impl MemberRow {
    /// A member can receive memos iff the profile is open and the account
    /// has neither left nor been intercepted.
    pub fn reachable(&self) -> bool {
        self.open && self.leave_at.is_none() && self.intercept_at.is_none()
    }
}

pub struct MemoRow {
    pub id: i64,
    pub kind: MemoKind,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub sent_ip: String,
    pub created_at: String,
    pub read_at: Option<String>,
    /// Set on recv legs only: the paired send leg's id.
    pub send_leg_id: Option<i64>,
}

impl MemoRow {
    /// The member a leg belongs to: recv legs are owned by the recipient,
    /// send legs by the sender.
    pub fn owner_id(&self) -> &str {
        match self.kind {
            MemoKind::Recv => &self.recipient_id,
            MemoKind::Send => &self.sender_id,
        }
    }

    /// The other party, from the owner's point of view.
    pub fn counterpart_id(&self) -> &str {
        match self.kind {
            MemoKind::Recv => &self.sender_id,
            MemoKind::Send => &self.recipient_id,
        }
    }
}

/// A memo row joined with the counterpart's nick, as list views render it.
/// The nick is None when the counterpart has since been removed.
pub struct MemoListRow {
    pub memo: MemoRow,
    pub counterpart_nick: Option<String>,
}

pub struct PointEntryRow {
    pub id: i64,
    pub member_id: String,
    pub amount: i64,
    pub reason: String,
    pub related_id: String,
    pub created_at: String,
}
