//! Roster store: members, groups, and recipient resolution.
//!
//! Pure data-access policy over [`Storage`]; no message handling here.  The
//! orchestrator and admin command handlers are the only callers.

use crate::phone::{self, PhoneError};
use crate::rlog;
use crate::storage::{MemberRow, Storage, StorageError};

#[derive(Debug)]
pub enum RosterError {
    Phone(PhoneError),
    Storage(StorageError),
    GroupNotFound(i64),
}

impl std::fmt::Display for RosterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterError::Phone(e) => write!(f, "{e}"),
            RosterError::Storage(e) => write!(f, "{e}"),
            RosterError::GroupNotFound(id) => write!(f, "group not found: {id}"),
        }
    }
}

impl std::error::Error for RosterError {}

impl From<PhoneError> for RosterError {
    fn from(e: PhoneError) -> Self {
        RosterError::Phone(e)
    }
}

impl From<StorageError> for RosterError {
    fn from(e: StorageError) -> Self {
        RosterError::Storage(e)
    }
}

/// Aggregate counts for the STATS command.
#[derive(Debug, Clone)]
pub struct RosterStats {
    pub total_members: u64,
    pub per_group: Vec<(String, u64)>,
    pub messages_last_week: u64,
}

const WEEK_SECS: u64 = 7 * 86400;

/// Add (or update) a member and link them to a group.
///
/// Idempotent: when an active member with this phone already exists, their
/// name is updated and the membership added instead of creating a duplicate.
pub fn add_member(
    storage: &Storage,
    raw_phone: &str,
    group_id: i64,
    name: &str,
    is_admin: bool,
) -> Result<MemberRow, RosterError> {
    let canonical = phone::normalize(raw_phone)?;
    if storage.get_group(group_id)?.is_none() {
        return Err(RosterError::GroupNotFound(group_id));
    }

    let default_name;
    let name = if name.trim().is_empty() {
        default_name = format!("Member {}", phone::last_four(&canonical));
        default_name.as_str()
    } else {
        name.trim()
    };

    let member_id = match storage.insert_member(&canonical, name, is_admin) {
        Ok(id) => id,
        Err(StorageError::AlreadyExists(_)) => {
            let existing = storage
                .get_member_by_phone(&canonical)?
                .ok_or_else(|| StorageError::NotFound(format!("member {canonical}")))?;
            storage.update_member(existing.id, name, is_admin || existing.is_admin)?;
            existing.id
        }
        Err(e) => return Err(e.into()),
    };

    storage.add_membership(group_id, member_id)?;
    let member = storage
        .get_member(member_id)?
        .ok_or_else(|| StorageError::NotFound(format!("member {member_id}")))?;
    rlog!(
        "roster: {} now in group {} as {:?}",
        crate::logging::phone(&member.phone),
        group_id,
        member.name
    );
    Ok(member)
}

/// Resolve or create the member for an inbound address.
///
/// First contact from an unknown number creates a member named after the
/// number's last four digits, assigned to the default group.  Race-safe: a
/// concurrent first message losing the UNIQUE-constraint race falls back to
/// looking up the winner's row instead of surfacing an error.
pub fn auto_register(
    storage: &Storage,
    raw_phone: &str,
    default_group: i64,
) -> Result<MemberRow, RosterError> {
    let canonical = phone::normalize(raw_phone)?;
    if let Some(existing) = storage.get_member_by_phone(&canonical)? {
        return Ok(existing);
    }

    let name = format!("Member {}", phone::last_four(&canonical));
    let member_id = match storage.insert_member(&canonical, &name, false) {
        Ok(id) => {
            rlog!(
                "roster: auto-registered {} into group {}",
                crate::logging::phone(&canonical),
                default_group
            );
            id
        }
        // Lost a concurrent-registration race; the winner's row is ours.
        Err(StorageError::AlreadyExists(_)) => {
            storage
                .get_member_by_phone(&canonical)?
                .ok_or_else(|| StorageError::NotFound(format!("member {canonical}")))?
                .id
        }
        Err(e) => return Err(e.into()),
    };

    storage.add_membership(default_group, member_id)?;
    storage
        .get_member(member_id)?
        .ok_or_else(|| StorageError::NotFound(format!("member {member_id}")).into())
}

/// All other active members across every group the sender belongs to,
/// deduplicated and deterministically ordered.
pub fn resolve_recipients(
    storage: &Storage,
    sender_id: i64,
) -> Result<Vec<MemberRow>, RosterError> {
    Ok(storage.resolve_recipients(sender_id)?)
}

/// Read-only aggregate counts. No side effects.
pub fn stats(storage: &Storage) -> Result<RosterStats, RosterError> {
    let cutoff = crate::storage::now_secs().saturating_sub(WEEK_SECS);
    Ok(RosterStats {
        total_members: storage.active_member_count()?,
        per_group: storage.group_member_counts()?,
        messages_last_week: storage.message_count_since(cutoff)?,
    })
}

/// Provision the three default groups on an empty database.
/// Group 3 is the media-capable (MMS) group.
pub fn seed_default_groups(storage: &Storage) -> Result<(), RosterError> {
    if storage.group_count()? > 0 {
        return Ok(());
    }
    storage.insert_group("Group 1", false)?;
    storage.insert_group("Group 2", false)?;
    storage.insert_group("Group 3 (MMS)", true)?;
    rlog!("roster: seeded default groups");
    Ok(())
}
