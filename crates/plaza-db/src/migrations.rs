use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS members (
            id            TEXT PRIMARY KEY,
            nick          TEXT NOT NULL,
            password      TEXT NOT NULL,
            point         INTEGER NOT NULL DEFAULT 0,
            open          INTEGER NOT NULL DEFAULT 1,
            leave_at      TEXT,
            intercept_at  TEXT,
            memo_unread   INTEGER NOT NULL DEFAULT 0,
            memo_caller   TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS memos (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            kind          TEXT NOT NULL CHECK (kind IN ('send', 'recv')),
            sender_id     TEXT NOT NULL REFERENCES members(id),
            recipient_id  TEXT NOT NULL REFERENCES members(id),
            body          TEXT NOT NULL,
            sent_ip       TEXT NOT NULL DEFAULT '',
            created_at    TEXT NOT NULL DEFAULT (datetime('now')),
            read_at       TEXT,
            -- recv legs point back at their paired send leg; the reference
            -- is dropped, not cascaded, when the sender deletes their copy
            send_leg_id   INTEGER REFERENCES memos(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_memos_recipient
            ON memos(recipient_id, kind, id);
        CREATE INDEX IF NOT EXISTS idx_memos_sender
            ON memos(sender_id, kind, id);

        CREATE TABLE IF NOT EXISTS point_entries (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id   TEXT NOT NULL REFERENCES members(id),
            amount      INTEGER NOT NULL,
            reason      TEXT NOT NULL,
            related_id  TEXT NOT NULL DEFAULT '',
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_point_entries_member
            ON point_entries(member_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
