use rusqlite::Connection;
use thiserror::Error;

/// Failures from the point ledger. The memo engine treats these as
/// per-recipient delivery failures, never as batch failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("point balance of {member_id} is below {need}")]
    InsufficientBalance { member_id: String, need: i64 },
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

/// Debits `amount` points from a member and appends the ledger entry.
/// The balance update is a conditional decrement: a concurrent spend that
/// already consumed the balance makes this fail instead of underflowing.
pub fn debit(
    conn: &Connection,
    member_id: &str,
    amount: i64,
    reason: &str,
    related_id: &str,
) -> Result<(), LedgerError> {
    let changed = conn.execute(
        "UPDATE members SET point = point - ?1 WHERE id = ?2 AND point >= ?1",
        rusqlite::params![amount, member_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::InsufficientBalance {
            member_id: member_id.to_string(),
            need: amount,
        });
    }

    conn.execute(
        "INSERT INTO point_entries (member_id, amount, reason, related_id) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![member_id, -amount, reason, related_id],
    )?;
    Ok(())
}

/// Credits points (signup rewards and the like).
pub fn grant(conn: &Connection, member_id: &str, amount: i64, reason: &str) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE members SET point = point + ?1 WHERE id = ?2",
        rusqlite::params![amount, member_id],
    )?;
    conn.execute(
        "INSERT INTO point_entries (member_id, amount, reason) VALUES (?1, ?2, ?3)",
        rusqlite::params![member_id, amount, reason],
    )?;
    Ok(())
}
