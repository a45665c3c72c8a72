//! Command routing: classify inbound text against a fixed vocabulary.
//!
//! The classifier is state-free: it trims, case-normalizes, and produces a
//! tagged [`Classified`] value that the orchestrator dispatches exhaustively.
//! Adding a command means adding a variant, and the compiler finds every
//! dispatch site that needs updating.
//!
//! Reply rendering also lives here so all user-visible text sits in one
//! place; the render functions take plain data and touch no storage.

use crate::delivery::DeliveryAggregate;
use crate::roster::RosterStats;
use crate::storage::{GroupRow, MediaCounts, RecentMessage};

/// A recognized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Groups,
    Stats,
    Recent,
    Media,
    Status,
    Add {
        phone: String,
        name: String,
        group_id: i64,
    },
}

impl Command {
    /// STATS, RECENT, MEDIA, STATUS and ADD are admin-only; HELP and GROUPS
    /// are open to every member.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Help | Command::Groups)
    }
}

/// Classification of one inbound body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Command(Command),
    /// Not a command: relay it to the roster.
    Broadcast,
    /// Neither text nor a command; nothing to do.
    Empty,
}

/// Malformed command input. Recovered locally as a corrective reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Syntax(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Syntax(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CommandError {}

pub const ADD_SYNTAX: &str = "Format: ADD <phone> <name> TO <group_id>";

/// Classify a trimmed inbound body.
///
/// Unmatched text is a broadcast candidate, never an error; only a malformed
/// ADD (recognizably an ADD attempt) fails.
pub fn classify(body: &str) -> Result<Classified, CommandError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Classified::Empty);
    }

    let upper = trimmed.to_uppercase();
    let command = match upper.as_str() {
        "HELP" | "H" | "?" => Command::Help,
        "GROUPS" => Command::Groups,
        "STATS" => Command::Stats,
        "RECENT" => Command::Recent,
        "MEDIA" => Command::Media,
        "STATUS" => Command::Status,
        _ if upper.starts_with("ADD ") => parse_add(trimmed)?,
        _ => return Ok(Classified::Broadcast),
    };
    Ok(Classified::Command(command))
}

/// Parse `ADD <phone> <name tokens...> TO <group_id>`.
///
/// The name may span multiple tokens; the last case-insensitive `TO` splits
/// name from group.  Phone normalization is left to the roster so the error
/// taxonomy stays in one place.
fn parse_add(trimmed: &str) -> Result<Command, CommandError> {
    let rest = &trimmed[4..];
    let tokens: Vec<&str> = rest.split_whitespace().collect();

    let to_index = tokens
        .iter()
        .rposition(|t| t.eq_ignore_ascii_case("TO"))
        .ok_or_else(|| CommandError::Syntax(ADD_SYNTAX.to_string()))?;
    if to_index == 0 || to_index + 1 != tokens.len() - 1 {
        return Err(CommandError::Syntax(ADD_SYNTAX.to_string()));
    }

    let group_id: i64 = tokens[to_index + 1]
        .parse()
        .map_err(|_| CommandError::Syntax(ADD_SYNTAX.to_string()))?;

    // The phone may be split across tokens by punctuation, e.g.
    // `+1 (206) 555-0100 Jane Doe TO 2`.  Consume leading tokens while they
    // look phone-like; whatever remains before TO is the name.
    let mut phone_end = 0;
    while phone_end < to_index && looks_phone_like(tokens[phone_end]) {
        phone_end += 1;
    }
    if phone_end == 0 {
        return Err(CommandError::Syntax(ADD_SYNTAX.to_string()));
    }

    let phone = tokens[..phone_end].join(" ");
    let name = if phone_end < to_index {
        tokens[phone_end..to_index].join(" ")
    } else {
        String::new()
    };

    Ok(Command::Add {
        phone,
        name,
        group_id,
    })
}

fn looks_phone_like(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | '(' | ')'))
}

// ---------------------------------------------------------------------------
// Reply rendering
// ---------------------------------------------------------------------------

pub fn help_reply(is_admin: bool) -> String {
    let mut text = String::from(
        "MULTI-GROUP BROADCAST\n\
         Text anything to reach every group.\n\n\
         Commands:\n\
         HELP - this message\n\
         GROUPS - your groups\n",
    );
    if is_admin {
        text.push_str(
            "\nAdmin commands:\n\
             STATS - roster statistics\n\
             RECENT - recent broadcasts\n\
             MEDIA - media relay report\n\
             STATUS - delivery report\n\
             ADD <phone> <name> TO <group_id> - add member\n",
        );
    }
    text
}

pub fn groups_reply(groups: &[GroupRow]) -> String {
    if groups.is_empty() {
        return "You're not in any groups yet. Ask an admin to add you.".to_string();
    }
    let mut text = String::from("Your groups:\n");
    for group in groups {
        text.push_str(&format!("  - {}\n", group.name));
    }
    text.push_str("\nYour messages go to every group.");
    text
}

pub fn stats_reply(stats: &RosterStats) -> String {
    let mut text = format!(
        "ROSTER STATISTICS\nActive members: {}\n\nGroup breakdown:\n",
        stats.total_members
    );
    for (name, count) in &stats.per_group {
        text.push_str(&format!("  - {name}: {count} members\n"));
    }
    text.push_str(&format!("\nMessages this week: {}", stats.messages_last_week));
    text
}

pub fn recent_reply(messages: &[RecentMessage]) -> String {
    if messages.is_empty() {
        return "No recent broadcasts.".to_string();
    }
    let mut text = String::from("Recent broadcasts:\n");
    for msg in messages {
        let body = msg.body.as_deref().unwrap_or("[media]");
        let excerpt: String = body.chars().take(50).collect();
        text.push_str(&format!("  {} ({}): {}\n", msg.sender_name, msg.kind, excerpt));
    }
    text
}

pub fn media_reply(counts: &MediaCounts) -> String {
    format!(
        "MEDIA RELAY (7 days)\nRelocated: {}\nFailed: {}\nPending: {}",
        counts.succeeded, counts.failed, counts.pending
    )
}

pub fn status_reply(aggregate: &DeliveryAggregate) -> String {
    let mut text = format!(
        "DELIVERY STATUS (24h)\nSent: {}\nFailed: {}\nSuccess rate: {}%",
        aggregate.sent,
        aggregate.failed,
        aggregate.success_rate()
    );
    if !aggregate.reasons.is_empty() {
        text.push_str("\nFailure reasons:");
        for (reason, count) in &aggregate.reasons {
            text.push_str(&format!("\n  - {reason}: {count}"));
        }
    }
    text
}

pub fn not_authorized_reply() -> String {
    "Sorry, that command is for admins only. Text HELP for what you can do.".to_string()
}
