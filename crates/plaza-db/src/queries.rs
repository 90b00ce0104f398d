use crate::Database;
use crate::models::{MemberRow, MemoListRow, MemoRow, PointEntryRow};
use crate::points;
use anyhow::Result;
use plaza_types::models::MemoKind;
use rusqlite::Connection;

/// Previous/next row ids around a memo in its owner's list, by id order.
pub struct MemoNeighbors {
    pub prev_id: Option<i64>,
    pub next_id: Option<i64>,
}

/// Ids of the pair created by one delivery.
#[derive(Debug)]
pub struct DeliveredPair {
    pub send_id: i64,
    pub recv_id: i64,
}

/// Column that decides which member a leg belongs to.
fn owner_column(kind: MemoKind) -> &'static str {
    match kind {
        MemoKind::Recv => "recipient_id",
        MemoKind::Send => "sender_id",
    }
}

/// Column holding the other party, joined for display.
fn counterpart_column(kind: MemoKind) -> &'static str {
    match kind {
        MemoKind::Recv => "sender_id",
        MemoKind::Send => "recipient_id",
    }
}

impl Database {
    // -- Members --

    pub fn create_member(&self, id: &str, nick: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO members (id, nick, password) VALUES (?1, ?2, ?3)",
                (id, nick, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_member(&self, id: &str) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| query_member(conn, id))
    }

    pub fn grant_points(&self, member_id: &str, amount: i64, reason: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            points::grant(&tx, member_id, amount, reason)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn point_entries(&self, member_id: &str) -> Result<Vec<PointEntryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, member_id, amount, reason, related_id, created_at
                 FROM point_entries WHERE member_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([member_id], |row| {
                    Ok(PointEntryRow {
                        id: row.get(0)?,
                        member_id: row.get(1)?,
                        amount: row.get(2)?,
                        reason: row.get(3)?,
                        related_id: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Memos --

    pub fn get_memo(&self, id: i64) -> Result<Option<MemoRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {MEMO_COLUMNS} FROM memos WHERE id = ?1"))?;
            stmt.query_row([id], map_memo_row).optional()
        })
    }

    pub fn count_memos(&self, owner_id: &str, kind: MemoKind) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM memos WHERE {} = ?1 AND kind = ?2",
                owner_column(kind)
            );
            let count = conn.query_row(&sql, (owner_id, kind.as_str()), |row| row.get(0))?;
            Ok(count)
        })
    }

    /// One page of a member's memo list, newest first, with the
    /// counterpart's nick joined in.
    pub fn list_memos(
        &self,
        owner_id: &str,
        kind: MemoKind,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<MemoListRow>> {
        let offset = (page.saturating_sub(1)) * page_size;
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT m.id, m.kind, m.sender_id, m.recipient_id, m.body, m.sent_ip,
                        m.created_at, m.read_at, m.send_leg_id, c.nick
                 FROM memos m
                 LEFT JOIN members c ON c.id = m.{}
                 WHERE m.{} = ?1 AND m.kind = ?2
                 ORDER BY m.id DESC
                 LIMIT ?3 OFFSET ?4",
                counterpart_column(kind),
                owner_column(kind)
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![owner_id, kind.as_str(), page_size, offset],
                    |row| {
                        Ok(MemoListRow {
                            memo: map_memo_row(row)?,
                            counterpart_nick: row.get(9)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Rows adjacent to `id` in the same owner/kind list: prev is the
    /// next-smaller id, next the next-larger.
    pub fn memo_neighbors(&self, owner_id: &str, kind: MemoKind, id: i64) -> Result<MemoNeighbors> {
        self.with_conn(|conn| {
            let prev_sql = format!(
                "SELECT id FROM memos WHERE id < ?1 AND kind = ?2 AND {} = ?3
                 ORDER BY id DESC LIMIT 1",
                owner_column(kind)
            );
            let next_sql = format!(
                "SELECT id FROM memos WHERE id > ?1 AND kind = ?2 AND {} = ?3
                 ORDER BY id ASC LIMIT 1",
                owner_column(kind)
            );

            let prev_id = conn
                .query_row(&prev_sql, rusqlite::params![id, kind.as_str(), owner_id], |row| {
                    row.get(0)
                })
                .optional()?;
            let next_id = conn
                .query_row(&next_sql, rusqlite::params![id, kind.as_str(), owner_id], |row| {
                    row.get(0)
                })
                .optional()?;

            Ok(MemoNeighbors { prev_id, next_id })
        })
    }

    /// Live count of a member's unread received memos. The denormalized
    /// counter on the member row is refreshed from this same query.
    pub fn unread_memo_count(&self, member_id: &str) -> Result<i64> {
        self.with_conn(|conn| Ok(query_unread_count(conn, member_id)?))
    }

    // -- Engine mutations (one transaction each) --

    /// Delivers one memo to one recipient: inserts the send leg, the
    /// paired recv leg, raises the recipient's notification flag, refreshes
    /// their unread counter and debits the sender, all or nothing.
    pub fn deliver_memo(
        &self,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
        sent_ip: &str,
        cost: i64,
        reason: &str,
    ) -> Result<DeliveredPair> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO memos (kind, sender_id, recipient_id, body, sent_ip)
                 VALUES ('send', ?1, ?2, ?3, ?4)",
                rusqlite::params![sender_id, recipient_id, body, sent_ip],
            )?;
            let send_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO memos (kind, sender_id, recipient_id, body, sent_ip, send_leg_id)
                 VALUES ('recv', ?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![sender_id, recipient_id, body, sent_ip, send_id],
            )?;
            let recv_id = tx.last_insert_rowid();

            // New-message indicator for the recipient.
            tx.execute(
                "UPDATE members SET memo_caller = ?1 WHERE id = ?2",
                rusqlite::params![sender_id, recipient_id],
            )?;
            refresh_unread(&tx, recipient_id)?;

            if cost > 0 {
                points::debit(&tx, sender_id, cost, reason, recipient_id)?;
            }

            tx.commit()?;
            Ok(DeliveredPair { send_id, recv_id })
        })
    }

    /// Marks a recv leg and its paired send leg read with one timestamp and
    /// refreshes the owner's unread counter. A no-op for send legs and for
    /// rows that are already read.
    pub fn mark_memo_read(&self, memo: &MemoRow, read_at: &str) -> Result<()> {
        if memo.kind != MemoKind::Recv || memo.read_at.is_some() {
            return Ok(());
        }
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "UPDATE memos SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
                rusqlite::params![read_at, memo.id],
            )?;
            if let Some(send_id) = memo.send_leg_id {
                tx.execute(
                    "UPDATE memos SET read_at = ?1 WHERE id = ?2 AND read_at IS NULL",
                    rusqlite::params![read_at, send_id],
                )?;
            }
            refresh_unread(&tx, &memo.recipient_id)?;

            tx.commit()?;
            Ok(())
        })
    }

    /// Deletes exactly one leg; the sibling stays with the other party.
    /// Deleting an unread recv leg also lowers the recipient's notification
    /// flag, but only while it still points at this memo's sender.
    pub fn delete_memo(&self, memo: &MemoRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if memo.kind == MemoKind::Recv && memo.read_at.is_none() {
                tx.execute(
                    "UPDATE members SET memo_caller = '' WHERE id = ?1 AND memo_caller = ?2",
                    rusqlite::params![memo.recipient_id, memo.sender_id],
                )?;
            }

            tx.execute("DELETE FROM memos WHERE id = ?1", [memo.id])?;
            refresh_unread(&tx, memo.owner_id())?;

            tx.commit()?;
            Ok(())
        })
    }
}

const MEMO_COLUMNS: &str =
    "id, kind, sender_id, recipient_id, body, sent_ip, created_at, read_at, send_leg_id";

fn map_memo_row(row: &rusqlite::Row) -> rusqlite::Result<MemoRow> {
    let kind_raw: String = row.get(1)?;
    let kind = MemoKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(1, "kind".to_string(), rusqlite::types::Type::Text)
    })?;

    Ok(MemoRow {
        id: row.get(0)?,
        kind,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        body: row.get(4)?,
        sent_ip: row.get(5)?,
        created_at: row.get(6)?,
        read_at: row.get(7)?,
        send_leg_id: row.get(8)?,
    })
}

fn query_member(conn: &Connection, id: &str) -> Result<Option<MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, nick, password, point, open, leave_at, intercept_at,
                memo_unread, memo_caller, created_at
         FROM members WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MemberRow {
                id: row.get(0)?,
                nick: row.get(1)?,
                password: row.get(2)?,
                point: row.get(3)?,
                open: row.get(4)?,
                leave_at: row.get(5)?,
                intercept_at: row.get(6)?,
                memo_unread: row.get(7)?,
                memo_caller: row.get(8)?,
                created_at: row.get(9)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_unread_count(conn: &Connection, member_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM memos
         WHERE kind = 'recv' AND recipient_id = ?1 AND read_at IS NULL",
        [member_id],
        |row| row.get(0),
    )
}

/// Recomputes and stores the denormalized unread counter. This is the only
/// writer of members.memo_unread and always runs inside the mutating
/// transaction.
fn refresh_unread(conn: &Connection, member_id: &str) -> rusqlite::Result<i64> {
    let count = query_unread_count(conn, member_id)?;
    conn.execute(
        "UPDATE members SET memo_unread = ?1 WHERE id = ?2",
        rusqlite::params![count, member_id],
    )?;
    Ok(count)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::LedgerError;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_member(db: &Database, id: &str, point: i64) {
        db.create_member(id, &format!("{id}-nick"), "hash").unwrap();
        if point > 0 {
            db.grant_points(id, point, "test funding").unwrap();
        }
    }

    #[test]
    fn deliver_creates_paired_rows() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);

        let pair = db
            .deliver_memo("alice", "bob", "hello", "10.0.0.1", 10, "Memo sent to bob-nick(bob)")
            .unwrap();

        let send = db.get_memo(pair.send_id).unwrap().unwrap();
        assert_eq!(send.kind, MemoKind::Send);
        assert_eq!(send.sender_id, "alice");
        assert_eq!(send.recipient_id, "bob");
        assert_eq!(send.body, "hello");
        assert_eq!(send.sent_ip, "10.0.0.1");
        assert!(send.read_at.is_none());
        assert!(send.send_leg_id.is_none());

        let recv = db.get_memo(pair.recv_id).unwrap().unwrap();
        assert_eq!(recv.kind, MemoKind::Recv);
        assert_eq!(recv.send_leg_id, Some(pair.send_id));
        assert_eq!(recv.sender_id, send.sender_id);
        assert_eq!(recv.recipient_id, send.recipient_id);
        assert_eq!(recv.body, send.body);

        let bob = db.get_member("bob").unwrap().unwrap();
        assert_eq!(bob.memo_caller, "alice");
        assert_eq!(bob.memo_unread, 1);

        let alice = db.get_member("alice").unwrap().unwrap();
        assert_eq!(alice.point, 90);
        let entries = db.point_entries("alice").unwrap();
        let debit = entries.last().unwrap();
        assert_eq!(debit.amount, -10);
        assert_eq!(debit.related_id, "bob");
    }

    #[test]
    fn deliver_rolls_back_when_balance_is_short() {
        let db = test_db();
        add_member(&db, "alice", 5);
        add_member(&db, "bob", 0);

        let err = db
            .deliver_memo("alice", "bob", "hello", "", 10, "Memo sent to bob-nick(bob)")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::InsufficientBalance { need: 10, .. })
        ));

        // The whole transaction must unwind: no legs, no flag, no counter.
        assert_eq!(db.count_memos("bob", MemoKind::Recv).unwrap(), 0);
        assert_eq!(db.count_memos("alice", MemoKind::Send).unwrap(), 0);
        let bob = db.get_member("bob").unwrap().unwrap();
        assert_eq!(bob.memo_caller, "");
        assert_eq!(bob.memo_unread, 0);
        let alice = db.get_member("alice").unwrap().unwrap();
        assert_eq!(alice.point, 5);
    }

    #[test]
    fn zero_cost_delivery_skips_the_ledger() {
        let db = test_db();
        add_member(&db, "alice", 0);
        add_member(&db, "bob", 0);

        db.deliver_memo("alice", "bob", "free", "", 0, "").unwrap();

        assert_eq!(db.get_member("alice").unwrap().unwrap().point, 0);
        assert!(db.point_entries("alice").unwrap().is_empty());
    }

    #[test]
    fn mark_read_stamps_both_legs_once() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);
        let pair = db.deliver_memo("alice", "bob", "hi", "", 10, "").unwrap();

        let recv = db.get_memo(pair.recv_id).unwrap().unwrap();
        db.mark_memo_read(&recv, "2026-01-02 03:04:05").unwrap();

        let recv = db.get_memo(pair.recv_id).unwrap().unwrap();
        let send = db.get_memo(pair.send_id).unwrap().unwrap();
        assert_eq!(recv.read_at.as_deref(), Some("2026-01-02 03:04:05"));
        assert_eq!(send.read_at, recv.read_at);
        assert_eq!(db.get_member("bob").unwrap().unwrap().memo_unread, 0);

        // Re-reading must not move the timestamp.
        let reread = db.get_memo(pair.recv_id).unwrap().unwrap();
        db.mark_memo_read(&reread, "2026-12-31 23:59:59").unwrap();
        let recv = db.get_memo(pair.recv_id).unwrap().unwrap();
        assert_eq!(recv.read_at.as_deref(), Some("2026-01-02 03:04:05"));
    }

    #[test]
    fn marking_a_send_leg_is_a_no_op() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);
        let pair = db.deliver_memo("alice", "bob", "hi", "", 10, "").unwrap();

        let send = db.get_memo(pair.send_id).unwrap().unwrap();
        db.mark_memo_read(&send, "2026-01-02 03:04:05").unwrap();

        assert!(db.get_memo(pair.send_id).unwrap().unwrap().read_at.is_none());
        assert!(db.get_memo(pair.recv_id).unwrap().unwrap().read_at.is_none());
        assert_eq!(db.get_member("bob").unwrap().unwrap().memo_unread, 1);
    }

    #[test]
    fn deleting_one_leg_keeps_the_sibling() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);
        let pair = db.deliver_memo("alice", "bob", "hi", "", 10, "").unwrap();

        let recv = db.get_memo(pair.recv_id).unwrap().unwrap();
        db.delete_memo(&recv).unwrap();

        assert!(db.get_memo(pair.recv_id).unwrap().is_none());
        assert!(db.get_memo(pair.send_id).unwrap().is_some());

        let bob = db.get_member("bob").unwrap().unwrap();
        assert_eq!(bob.memo_unread, 0);
        assert_eq!(bob.memo_caller, "");
    }

    #[test]
    fn deleting_unread_recv_leg_spares_a_newer_callers_flag() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "carol", 100);
        add_member(&db, "bob", 0);

        let first = db.deliver_memo("alice", "bob", "one", "", 10, "").unwrap();
        db.deliver_memo("carol", "bob", "two", "", 10, "").unwrap();

        // The flag now points at carol; removing alice's memo leaves it.
        let recv = db.get_memo(first.recv_id).unwrap().unwrap();
        db.delete_memo(&recv).unwrap();

        let bob = db.get_member("bob").unwrap().unwrap();
        assert_eq!(bob.memo_caller, "carol");
        assert_eq!(bob.memo_unread, 1);
    }

    #[test]
    fn sender_deleting_their_leg_detaches_the_back_reference() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);
        let pair = db.deliver_memo("alice", "bob", "hi", "", 10, "").unwrap();

        let send = db.get_memo(pair.send_id).unwrap().unwrap();
        db.delete_memo(&send).unwrap();

        let recv = db.get_memo(pair.recv_id).unwrap().unwrap();
        assert!(recv.send_leg_id.is_none());
        // The recipient's copy and notification state are untouched.
        let bob = db.get_member("bob").unwrap().unwrap();
        assert_eq!(bob.memo_unread, 1);
        assert_eq!(bob.memo_caller, "alice");

        // Reading the orphaned recv leg still works.
        db.mark_memo_read(&recv, "2026-01-02 03:04:05").unwrap();
        assert_eq!(db.get_member("bob").unwrap().unwrap().memo_unread, 0);
    }

    #[test]
    fn neighbors_walk_by_id_within_owner_and_kind() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);

        let first = db.deliver_memo("alice", "bob", "1", "", 0, "").unwrap();
        let second = db.deliver_memo("alice", "bob", "2", "", 0, "").unwrap();
        let third = db.deliver_memo("alice", "bob", "3", "", 0, "").unwrap();

        let nav = db.memo_neighbors("bob", MemoKind::Recv, second.recv_id).unwrap();
        assert_eq!(nav.prev_id, Some(first.recv_id));
        assert_eq!(nav.next_id, Some(third.recv_id));

        let nav = db.memo_neighbors("bob", MemoKind::Recv, first.recv_id).unwrap();
        assert_eq!(nav.prev_id, None);
        assert_eq!(nav.next_id, Some(second.recv_id));

        // The sender's send-leg list is a different sequence.
        let nav = db.memo_neighbors("alice", MemoKind::Send, second.send_id).unwrap();
        assert_eq!(nav.prev_id, Some(first.send_id));
        assert_eq!(nav.next_id, Some(third.send_id));
    }

    #[test]
    fn list_pages_newest_first_with_counterpart_nick() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);

        let mut recv_ids = Vec::new();
        for i in 0..5 {
            let pair = db.deliver_memo("alice", "bob", &format!("m{i}"), "", 0, "").unwrap();
            recv_ids.push(pair.recv_id);
        }

        assert_eq!(db.count_memos("bob", MemoKind::Recv).unwrap(), 5);

        let page1 = db.list_memos("bob", MemoKind::Recv, 1, 2).unwrap();
        let ids: Vec<i64> = page1.iter().map(|r| r.memo.id).collect();
        assert_eq!(ids, vec![recv_ids[4], recv_ids[3]]);
        assert_eq!(page1[0].counterpart_nick.as_deref(), Some("alice-nick"));

        let page3 = db.list_memos("bob", MemoKind::Recv, 3, 2).unwrap();
        let ids: Vec<i64> = page3.iter().map(|r| r.memo.id).collect();
        assert_eq!(ids, vec![recv_ids[0]]);

        // Nothing leaks into the other kind's list.
        assert!(db.list_memos("bob", MemoKind::Send, 1, 10).unwrap().is_empty());
    }

    #[test]
    fn unread_count_tracks_every_mutation() {
        let db = test_db();
        add_member(&db, "alice", 100);
        add_member(&db, "bob", 0);

        assert_eq!(db.unread_memo_count("bob").unwrap(), 0);

        let a = db.deliver_memo("alice", "bob", "1", "", 0, "").unwrap();
        let b = db.deliver_memo("alice", "bob", "2", "", 0, "").unwrap();
        assert_eq!(db.unread_memo_count("bob").unwrap(), 2);

        let recv = db.get_memo(a.recv_id).unwrap().unwrap();
        db.mark_memo_read(&recv, "2026-01-02 03:04:05").unwrap();
        assert_eq!(db.unread_memo_count("bob").unwrap(), 1);

        let recv = db.get_memo(b.recv_id).unwrap().unwrap();
        db.delete_memo(&recv).unwrap();
        assert_eq!(db.unread_memo_count("bob").unwrap(), 0);

        // The denormalized counter always matches the live query.
        let bob = db.get_member("bob").unwrap().unwrap();
        assert_eq!(bob.memo_unread, db.unread_memo_count("bob").unwrap());
    }
}
