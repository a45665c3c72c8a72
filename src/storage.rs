//! SQLite storage layer for the broadcast relay.
//!
//! Owns the six persistent tables: groups, members, group membership,
//! broadcast messages, media attachments, and the delivery log.  Handles
//! schema creation and CRUD; business rules (recipient resolution policy,
//! command handling, relocation retries) live in the modules above this one.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
    AlreadyExists(String),
    /// Removing a member's only membership would strand them outside every
    /// group, which the data model forbids.
    LastMembership { member_id: i64 },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            StorageError::LastMembership { member_id } => {
                write!(f, "member {member_id} would be left with no group")
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Group row stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
    /// Whether this group's transport supports media attachments (MMS).
    pub supports_media: bool,
    pub created_at: u64,
}

/// Member row stored in the database.
///
/// `phone` is canonical E.164 and unique; deactivated members keep their row
/// so message and delivery history stays intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRow {
    pub id: i64,
    pub phone: String,
    pub name: String,
    pub is_admin: bool,
    pub active: bool,
    pub created_at: u64,
}

/// Broadcast message row. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub body: Option<String>,
    /// "broadcast" or "command"
    pub kind: String,
    pub created_at: u64,
}

/// Media attachment row. State transitions are written only by the relocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub position: u32,
    pub source_url: String,
    pub public_url: Option<String>,
    pub content_type: String,
    pub size_bytes: u64,
    /// "pending", "succeeded", "failed"
    pub status: String,
    pub attempts: u32,
}

/// One delivery outcome per (message, member) pair. Upserts replace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRow {
    pub message_id: i64,
    pub member_id: i64,
    /// "queued", "sent", "failed"
    pub status: String,
    pub reason: Option<String>,
    /// Transport-side identifier, used to correlate late status callbacks.
    pub provider_sid: Option<String>,
    pub attempted_at: u64,
}

/// Summary row for the RECENT command.
#[derive(Debug, Clone)]
pub struct RecentMessage {
    pub sender_name: String,
    pub body: Option<String>,
    pub kind: String,
    pub created_at: u64,
}

/// Attachment counts by relocation status over a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaCounts {
    pub succeeded: u64,
    pub failed: u64,
    pub pending: u64,
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS groups (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                supports_media  INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS members (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                phone       TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                is_admin    INTEGER NOT NULL DEFAULT 0,
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id    INTEGER NOT NULL REFERENCES groups(id),
                member_id   INTEGER NOT NULL REFERENCES members(id),
                joined_at   INTEGER NOT NULL,
                PRIMARY KEY (group_id, member_id)
            );

            CREATE INDEX IF NOT EXISTS idx_group_members_member
                ON group_members(member_id);

            CREATE TABLE IF NOT EXISTS broadcast_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id   INTEGER NOT NULL REFERENCES members(id),
                body        TEXT,
                kind        TEXT NOT NULL DEFAULT 'broadcast',
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_created
                ON broadcast_messages(created_at);

            CREATE TABLE IF NOT EXISTS media_attachments (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id    INTEGER NOT NULL REFERENCES broadcast_messages(id),
                position      INTEGER NOT NULL DEFAULT 0,
                source_url    TEXT NOT NULL,
                public_url    TEXT,
                content_type  TEXT NOT NULL,
                size_bytes    INTEGER NOT NULL DEFAULT 0,
                status        TEXT NOT NULL DEFAULT 'pending',
                attempts      INTEGER NOT NULL DEFAULT 0,
                created_at    INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attachments_message
                ON media_attachments(message_id, position);

            CREATE TABLE IF NOT EXISTS delivery_log (
                message_id    INTEGER NOT NULL REFERENCES broadcast_messages(id),
                member_id     INTEGER NOT NULL REFERENCES members(id),
                status        TEXT NOT NULL,
                reason        TEXT,
                provider_sid  TEXT,
                attempted_at  INTEGER NOT NULL,
                PRIMARY KEY (message_id, member_id)
            );

            CREATE INDEX IF NOT EXISTS idx_delivery_sid
                ON delivery_log(provider_sid);
            CREATE INDEX IF NOT EXISTS idx_delivery_attempted
                ON delivery_log(attempted_at);
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Groups
    // -----------------------------------------------------------------------

    pub fn insert_group(&self, name: &str, supports_media: bool) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO groups (name, supports_media, created_at) VALUES (?1, ?2, ?3)",
            params![name, supports_media, now_secs() as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_group(&self, id: i64) -> Result<Option<GroupRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, supports_media, created_at FROM groups WHERE id = ?1",
                params![id],
                group_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_groups(&self) -> Result<Vec<GroupRow>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, supports_media, created_at FROM groups ORDER BY id")?;
        let rows = stmt
            .query_map([], group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn group_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM groups", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    /// Insert a new member. The phone must already be canonical.
    ///
    /// A UNIQUE violation on the phone column is reported as `AlreadyExists`
    /// so concurrent auto-registration can fall back to lookup-and-reuse.
    pub fn insert_member(
        &self,
        phone: &str,
        name: &str,
        is_admin: bool,
    ) -> Result<i64, StorageError> {
        let result = self.conn.execute(
            "INSERT INTO members (phone, name, is_admin, active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![phone, name, is_admin, now_secs() as i64],
        );
        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(phone.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_member(&self, id: i64) -> Result<Option<MemberRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, phone, name, is_admin, active, created_at
                 FROM members WHERE id = ?1",
                params![id],
                member_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_member_by_phone(&self, phone: &str) -> Result<Option<MemberRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, phone, name, is_admin, active, created_at
                 FROM members WHERE phone = ?1",
                params![phone],
                member_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Update a member's display name and admin flag, reactivating them if
    /// they had been soft-deleted.
    pub fn update_member(&self, id: i64, name: &str, is_admin: bool) -> Result<(), StorageError> {
        let changed = self.conn.execute(
            "UPDATE members SET name = ?2, is_admin = ?3, active = 1 WHERE id = ?1",
            params![id, name, is_admin],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("member {id}")));
        }
        Ok(())
    }

    /// Soft-delete: the row stays so message history keeps a valid sender.
    pub fn deactivate_member(&self, id: i64) -> Result<(), StorageError> {
        let changed = self
            .conn
            .execute("UPDATE members SET active = 0 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("member {id}")));
        }
        Ok(())
    }

    pub fn active_member_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT m.id)
             FROM members m
             JOIN group_members gm ON gm.member_id = m.id
             WHERE m.active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// (group name, active member count) for every group.
    pub fn group_member_counts(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT g.name, COUNT(DISTINCT m.id)
             FROM groups g
             LEFT JOIN group_members gm ON gm.group_id = g.id
             LEFT JOIN members m ON m.id = gm.member_id AND m.active = 1
             GROUP BY g.id, g.name
             ORDER BY g.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Memberships
    // -----------------------------------------------------------------------

    /// Link a member to a group. Idempotent.
    pub fn add_membership(&self, group_id: i64, member_id: i64) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, member_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![group_id, member_id, now_secs() as i64],
        )?;
        Ok(())
    }

    /// Unlink a member from a group. Removing the last membership is
    /// disallowed: every active member must belong to at least one group.
    pub fn remove_membership(&self, group_id: i64, member_id: i64) -> Result<(), StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM group_members WHERE member_id = ?1",
            params![member_id],
            |row| row.get(0),
        )?;
        if count <= 1 {
            return Err(StorageError::LastMembership { member_id });
        }
        let changed = self.conn.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND member_id = ?2",
            params![group_id, member_id],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!(
                "membership ({group_id}, {member_id})"
            )));
        }
        Ok(())
    }

    pub fn member_groups(&self, member_id: i64) -> Result<Vec<GroupRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT g.id, g.name, g.supports_media, g.created_at
             FROM groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.member_id = ?1
             ORDER BY g.id",
        )?;
        let rows = stmt
            .query_map(params![member_id], group_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every active member of every group the sender belongs to, deduplicated,
    /// sender excluded, ordered by (lowest shared group id, member id) for
    /// deterministic fan-out.
    pub fn resolve_recipients(&self, sender_id: i64) -> Result<Vec<MemberRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.id, m.phone, m.name, m.is_admin, m.active, m.created_at
             FROM members m
             JOIN group_members gm ON gm.member_id = m.id
             WHERE m.active = 1
               AND m.id != ?1
               AND gm.group_id IN
                   (SELECT group_id FROM group_members WHERE member_id = ?1)
             GROUP BY m.id
             ORDER BY MIN(gm.group_id), m.id",
        )?;
        let rows = stmt
            .query_map(params![sender_id], member_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Broadcast messages
    // -----------------------------------------------------------------------

    pub fn insert_message(
        &self,
        sender_id: i64,
        body: Option<&str>,
        kind: &str,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO broadcast_messages (sender_id, body, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![sender_id, body, kind, now_secs() as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_message(&self, id: i64) -> Result<Option<BroadcastMessageRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, sender_id, body, kind, created_at
                 FROM broadcast_messages WHERE id = ?1",
                params![id],
                |row| {
                    Ok(BroadcastMessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        body: row.get(2)?,
                        kind: row.get(3)?,
                        created_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn recent_messages(&self, limit: usize) -> Result<Vec<RecentMessage>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT m.name, b.body, b.kind, b.created_at
             FROM broadcast_messages b
             JOIN members m ON m.id = b.sender_id
             WHERE b.kind = 'broadcast'
             ORDER BY b.created_at DESC, b.id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RecentMessage {
                    sender_name: row.get(0)?,
                    body: row.get(1)?,
                    kind: row.get(2)?,
                    created_at: row.get::<_, i64>(3)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn message_count_since(&self, cutoff: u64) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM broadcast_messages WHERE created_at > ?1",
            params![cutoff as i64],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // -----------------------------------------------------------------------
    // Media attachments
    // -----------------------------------------------------------------------

    pub fn insert_attachment(
        &self,
        message_id: i64,
        position: u32,
        source_url: &str,
        content_type: &str,
    ) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO media_attachments
                 (message_id, position, source_url, content_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![message_id, position, source_url, content_type, now_secs() as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn mark_attachment_succeeded(
        &self,
        id: i64,
        public_url: &str,
        content_type: &str,
        size_bytes: u64,
        attempts: u32,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE media_attachments
             SET status = 'succeeded', public_url = ?2, content_type = ?3,
                 size_bytes = ?4, attempts = ?5
             WHERE id = ?1",
            params![id, public_url, content_type, size_bytes as i64, attempts],
        )?;
        Ok(())
    }

    pub fn mark_attachment_failed(&self, id: i64, attempts: u32) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE media_attachments SET status = 'failed', attempts = ?2 WHERE id = ?1",
            params![id, attempts],
        )?;
        Ok(())
    }

    pub fn attachments_for_message(
        &self,
        message_id: i64,
    ) -> Result<Vec<MediaAttachmentRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, message_id, position, source_url, public_url,
                    content_type, size_bytes, status, attempts
             FROM media_attachments
             WHERE message_id = ?1
             ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![message_id], |row| {
                Ok(MediaAttachmentRow {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    position: row.get(2)?,
                    source_url: row.get(3)?,
                    public_url: row.get(4)?,
                    content_type: row.get(5)?,
                    size_bytes: row.get::<_, i64>(6)? as u64,
                    status: row.get(7)?,
                    attempts: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn media_counts_since(&self, cutoff: u64) -> Result<MediaCounts, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM media_attachments
             WHERE created_at > ?1 GROUP BY status",
        )?;
        let mut counts = MediaCounts::default();
        let rows = stmt.query_map(params![cutoff as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "succeeded" => counts.succeeded = count,
                "failed" => counts.failed = count,
                _ => counts.pending += count,
            }
        }
        Ok(counts)
    }

    // -----------------------------------------------------------------------
    // Delivery log
    // -----------------------------------------------------------------------

    /// Record a delivery outcome. One row per (message, member): repeated
    /// calls for the same pair overwrite, so retried sends and late status
    /// callbacks never accumulate duplicate rows.
    pub fn upsert_delivery(
        &self,
        message_id: i64,
        member_id: i64,
        status: &str,
        reason: Option<&str>,
        provider_sid: Option<&str>,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO delivery_log
                 (message_id, member_id, status, reason, provider_sid, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(message_id, member_id) DO UPDATE SET
                 status = excluded.status,
                 reason = excluded.reason,
                 provider_sid = COALESCE(excluded.provider_sid, provider_sid),
                 attempted_at = excluded.attempted_at",
            params![message_id, member_id, status, reason, provider_sid, now_secs() as i64],
        )?;
        Ok(())
    }

    pub fn deliveries_for_message(
        &self,
        message_id: i64,
    ) -> Result<Vec<DeliveryRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT message_id, member_id, status, reason, provider_sid, attempted_at
             FROM delivery_log WHERE message_id = ?1 ORDER BY member_id",
        )?;
        let rows = stmt
            .query_map(params![message_id], delivery_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update the row previously tagged with this transport sid. Returns
    /// false when no such row exists (stale or unknown callback).
    pub fn update_delivery_by_sid(
        &self,
        provider_sid: &str,
        status: &str,
        reason: Option<&str>,
    ) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE delivery_log SET status = ?2, reason = ?3, attempted_at = ?4
             WHERE provider_sid = ?1",
            params![provider_sid, status, reason, now_secs() as i64],
        )?;
        Ok(changed > 0)
    }

    /// (sent, failed) counts for delivery attempts in the window.
    pub fn delivery_counts_since(&self, cutoff: u64) -> Result<(u64, u64), StorageError> {
        self.conn
            .query_row(
                "SELECT
                     COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0),
                     COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
                 FROM delivery_log WHERE attempted_at > ?1",
                params![cutoff as i64],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as u64,
                    ))
                },
            )
            .map_err(Into::into)
    }

    /// Failure counts per categorized reason in the window, most common first.
    pub fn failure_reasons_since(
        &self,
        cutoff: u64,
    ) -> Result<Vec<(String, u64)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT COALESCE(reason, 'unknown'), COUNT(*)
             FROM delivery_log
             WHERE status = 'failed' AND attempted_at > ?1
             GROUP BY reason
             ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt
            .query_map(params![cutoff as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        supports_media: row.get(2)?,
        created_at: row.get::<_, i64>(3)? as u64,
    })
}

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        id: row.get(0)?,
        phone: row.get(1)?,
        name: row.get(2)?,
        is_admin: row.get(3)?,
        active: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
    })
}

fn delivery_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeliveryRow> {
    Ok(DeliveryRow {
        message_id: row.get(0)?,
        member_id: row.get(1)?,
        status: row.get(2)?,
        reason: row.get(3)?,
        provider_sid: row.get(4)?,
        attempted_at: row.get::<_, i64>(5)? as u64,
    })
}
