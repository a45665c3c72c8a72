//! Broadcast orchestration: the state machine for one inbound event.
//!
//! Identify (or auto-register) the sender, classify the text, persist the
//! message before any network send, relocate media, resolve recipients, fan
//! out with bounded concurrency, and record every delivery outcome.  One
//! recipient's failure never blocks or rolls back sends to the others, and
//! there is no state that waits on an external event past the relocation
//! retry budget: every message terminates as completed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;

use crate::commands::{self, Classified, Command, CommandError};
use crate::delivery::{self, DeliveryStatus, FailureReason};
use crate::media::MediaRelocator;
use crate::phone::PhoneError;
use crate::rlog;
use crate::roster::{self, RosterError};
use crate::storage::{MemberRow, Storage, StorageError};

/// One attachment on an inbound message.
#[derive(Debug, Clone)]
pub struct InboundAttachment {
    pub source_url: String,
    pub content_type: String,
}

/// The inbound-message event consumed from the transport webhook.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender_address: String,
    pub body: Option<String>,
    pub attachments: Vec<InboundAttachment>,
}

/// Synchronous result of one outbound send.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Delivered { provider_sid: Option<String> },
    Failed(FailureReason),
}

/// The outbound-send capability. Blocking; the orchestrator wraps calls in
/// `spawn_blocking`.
pub trait OutboundSend: Send + Sync {
    fn send(&self, to: &str, body: &str, media_urls: &[String]) -> SendOutcome;
}

#[derive(Debug)]
pub enum EngineError {
    Storage(StorageError),
    Roster(RosterError),
    Task(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Storage(e) => write!(f, "{e}"),
            EngineError::Roster(e) => write!(f, "{e}"),
            EngineError::Task(msg) => write!(f, "task failure: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        EngineError::Storage(e)
    }
}

impl From<RosterError> for EngineError {
    fn from(e: RosterError) -> Self {
        EngineError::Roster(e)
    }
}

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Group newly auto-registered members are assigned to.
    pub default_group: i64,
    /// Cap on concurrent outbound sends within one broadcast.
    pub fanout_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_group: 1,
            fanout_concurrency: 8,
        }
    }
}

const RECENT_LIMIT: usize = 5;
const DAY_SECS: u64 = 86400;
const WEEK_SECS: u64 = 7 * 86400;

/// The broadcast engine: owns the per-event state machine.
pub struct Engine {
    storage: Arc<Mutex<Storage>>,
    sender: Arc<dyn OutboundSend>,
    relocator: Arc<MediaRelocator>,
    options: EngineOptions,
    fanout_permits: Arc<Semaphore>,
}

impl Engine {
    pub fn new(
        storage: Arc<Mutex<Storage>>,
        sender: Arc<dyn OutboundSend>,
        relocator: Arc<MediaRelocator>,
        options: EngineOptions,
    ) -> Self {
        let fanout_permits = Arc::new(Semaphore::new(options.fanout_concurrency.max(1)));
        Self {
            storage,
            sender,
            relocator,
            options,
            fanout_permits,
        }
    }

    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle one inbound event end to end.
    ///
    /// Returns the reply text for the sender, if any.  Malformed input is
    /// answered with a corrective reply, never an `Err`; errors escape only
    /// for storage-level failures.
    pub async fn handle_inbound(
        &self,
        inbound: InboundMessage,
    ) -> Result<Option<String>, EngineError> {
        // Identify, auto-registering first-time senders.
        let member = {
            let storage = self.storage();
            match roster::auto_register(
                &storage,
                &inbound.sender_address,
                self.options.default_group,
            ) {
                Ok(member) => member,
                Err(RosterError::Phone(PhoneError::InvalidFormat(_))) => {
                    return Ok(Some(
                        "Sorry, we couldn't read your phone number.".to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        };

        // Classify.
        let body_text = inbound.body.as_deref().unwrap_or("").trim().to_string();
        let classified = match commands::classify(&body_text) {
            Ok(classified) => classified,
            Err(CommandError::Syntax(msg)) => return Ok(Some(msg)),
        };

        match classified {
            Classified::Command(command) => self.handle_command(&member, command).map(Some),
            Classified::Empty if inbound.attachments.is_empty() => {
                rlog!(
                    "engine: empty message from {}, nothing to do",
                    crate::logging::phone(&member.phone)
                );
                Ok(None)
            }
            // Media-only messages broadcast like any other.
            Classified::Empty | Classified::Broadcast => {
                let body = if body_text.is_empty() {
                    None
                } else {
                    Some(body_text)
                };
                self.broadcast(&member, body, &inbound.attachments)
                    .await
                    .map(Some)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Command handling
    // -----------------------------------------------------------------------

    fn handle_command(
        &self,
        member: &MemberRow,
        command: Command,
    ) -> Result<String, EngineError> {
        if command.requires_admin() && !member.is_admin {
            rlog!(
                "engine: {} tried admin command without privileges",
                crate::logging::phone(&member.phone)
            );
            return Ok(commands::not_authorized_reply());
        }

        let storage = self.storage();
        // Commands are part of the permanent record too, kept out of RECENT.
        storage.insert_message(member.id, None, "command")?;

        let reply = match command {
            Command::Help => commands::help_reply(member.is_admin),
            Command::Groups => commands::groups_reply(&storage.member_groups(member.id)?),
            Command::Stats => commands::stats_reply(&roster::stats(&storage)?),
            Command::Recent => commands::recent_reply(&storage.recent_messages(RECENT_LIMIT)?),
            Command::Media => {
                let cutoff = crate::storage::now_secs().saturating_sub(WEEK_SECS);
                commands::media_reply(&storage.media_counts_since(cutoff)?)
            }
            Command::Status => commands::status_reply(&delivery::aggregate(&storage, DAY_SECS)?),
            Command::Add {
                phone,
                name,
                group_id,
            } => match roster::add_member(&storage, &phone, group_id, &name, false) {
                Ok(added) => {
                    let group_name = storage
                        .get_group(group_id)?
                        .map(|g| g.name)
                        .unwrap_or_else(|| format!("Group {group_id}"));
                    format!("Added {} ({}) to {}", added.name, added.phone, group_name)
                }
                Err(RosterError::Phone(PhoneError::InvalidFormat(input))) => {
                    format!("Couldn't parse phone number {input:?}. {}", commands::ADD_SYNTAX)
                }
                Err(RosterError::GroupNotFound(id)) => {
                    format!("Group {id} doesn't exist. Text STATS to see the group list.")
                }
                Err(e) => return Err(e.into()),
            },
        };
        Ok(reply)
    }

    // -----------------------------------------------------------------------
    // Broadcast path
    // -----------------------------------------------------------------------

    async fn broadcast(
        &self,
        sender: &MemberRow,
        body: Option<String>,
        attachments: &[InboundAttachment],
    ) -> Result<String, EngineError> {
        // Persist before any network send so the record exists even if
        // fan-out partially fails.
        let message_id = {
            let storage = self.storage();
            let id = storage.insert_message(sender.id, body.as_deref(), "broadcast")?;
            for (index, attachment) in attachments.iter().enumerate() {
                storage.insert_attachment(
                    id,
                    index as u32,
                    &attachment.source_url,
                    &attachment.content_type,
                )?;
            }
            id
        };

        // Relocate every attachment before fan-out so all recipients get an
        // identical message.  Failures turn into placeholders, not aborts.
        let (media_urls, placeholders) = self.relocate_all(message_id).await?;

        let recipients = {
            let storage = self.storage();
            roster::resolve_recipients(&storage, sender.id)?
        };

        if recipients.is_empty() {
            rlog!(
                "engine: {} broadcast to empty roster, no-op",
                crate::logging::msg_id(message_id)
            );
            return Ok("No other members to send to yet.".to_string());
        }

        let outbound_body = format_outbound(&sender.name, body.as_deref(), &placeholders);

        // Queue a row per recipient up front; fan-out workers overwrite each
        // one with the real outcome.
        {
            let storage = self.storage();
            for recipient in &recipients {
                delivery::record_attempt(
                    &storage,
                    message_id,
                    recipient.id,
                    DeliveryStatus::Queued,
                    None,
                    None,
                )?;
            }
        }

        let delivered = self
            .fan_out(message_id, &recipients, outbound_body, media_urls)
            .await?;

        let failed = recipients.len() - delivered.len();
        rlog!(
            "engine: {} fanned out to {} member(s), {} failed",
            crate::logging::msg_id(message_id),
            delivered.len(),
            failed
        );

        Ok(self.summarize(&delivered, failed))
    }

    /// Relocate all pending attachments for a message.  Returns the public
    /// URLs to attach and placeholder lines for failed relocations.
    async fn relocate_all(
        &self,
        message_id: i64,
    ) -> Result<(Vec<String>, Vec<String>), EngineError> {
        let pending = {
            let storage = self.storage();
            storage.attachments_for_message(message_id)?
        };

        let mut media_urls = Vec::new();
        let mut placeholders = Vec::new();

        for attachment in pending {
            let relocator = Arc::clone(&self.relocator);
            let source_url = attachment.source_url.clone();
            let position = attachment.position;
            let result = tokio::task::spawn_blocking(move || {
                relocator.relocate(message_id, position, &source_url)
            })
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?;

            let storage = self.storage();
            match result {
                Ok(relocated) => {
                    storage.mark_attachment_succeeded(
                        attachment.id,
                        &relocated.public_url,
                        &relocated.content_type,
                        relocated.size_bytes,
                        relocated.attempts,
                    )?;
                    media_urls.push(relocated.public_url);
                }
                Err(failure) => {
                    storage.mark_attachment_failed(attachment.id, failure.attempts)?;
                    placeholders
                        .push(format!("[attachment {} unavailable]", attachment.position + 1));
                }
            }
        }

        Ok((media_urls, placeholders))
    }

    /// Send to every recipient with bounded concurrency, recording each
    /// outcome independently.  Returns the member ids that were delivered.
    async fn fan_out(
        &self,
        message_id: i64,
        recipients: &[MemberRow],
        body: String,
        media_urls: Vec<String>,
    ) -> Result<Vec<i64>, EngineError> {
        let body = Arc::new(body);
        let media_urls = Arc::new(media_urls);
        let mut handles = Vec::with_capacity(recipients.len());

        for recipient in recipients {
            let permits = Arc::clone(&self.fanout_permits);
            let sender = Arc::clone(&self.sender);
            let storage = Arc::clone(&self.storage);
            let body = Arc::clone(&body);
            let media_urls = Arc::clone(&media_urls);
            let member_id = recipient.id;
            let to = recipient.phone.clone();

            handles.push(tokio::spawn(async move {
                // Closed only on runtime shutdown.
                let _permit = permits.acquire_owned().await.ok()?;
                let outcome = tokio::task::spawn_blocking(move || {
                    sender.send(&to, &body, &media_urls)
                })
                .await
                .ok()?;

                let guard = storage.lock().unwrap_or_else(|e| e.into_inner());
                let record = match &outcome {
                    SendOutcome::Delivered { provider_sid } => delivery::record_attempt(
                        &guard,
                        message_id,
                        member_id,
                        DeliveryStatus::Sent,
                        None,
                        provider_sid.as_deref(),
                    ),
                    SendOutcome::Failed(reason) => delivery::record_attempt(
                        &guard,
                        message_id,
                        member_id,
                        DeliveryStatus::Failed,
                        Some(*reason),
                        None,
                    ),
                };
                if let Err(e) = record {
                    rlog!("engine: failed to record delivery for member {member_id}: {e}");
                }
                match outcome {
                    SendOutcome::Delivered { .. } => Some(member_id),
                    SendOutcome::Failed(_) => None,
                }
            }));
        }

        let mut delivered = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Some(member_id)) => delivered.push(member_id),
                Ok(None) => {}
                Err(e) => return Err(EngineError::Task(e.to_string())),
            }
        }
        Ok(delivered)
    }

    /// Confirmation text for the sender: totals plus a per-group breakdown of
    /// delivered recipients.
    fn summarize(&self, delivered: &[i64], failed: usize) -> String {
        let mut breakdown: BTreeMap<String, u64> = BTreeMap::new();
        {
            let storage = self.storage();
            for &member_id in delivered {
                if let Ok(groups) = storage.member_groups(member_id) {
                    for group in groups {
                        *breakdown.entry(group.name).or_default() += 1;
                    }
                }
            }
        }

        let mut text = format!("Broadcast sent to {} member(s).", delivered.len());
        if !breakdown.is_empty() {
            text.push_str("\nGroup breakdown:");
            for (name, count) in &breakdown {
                text.push_str(&format!("\n  - {name}: {count}"));
            }
        }
        if failed > 0 {
            text.push_str(&format!("\nFailed deliveries: {failed}"));
        }
        text
    }

    /// Apply a late delivery report from the transport's status callback.
    ///
    /// Updates the existing delivery row; an unknown sid is logged and
    /// ignored so stale callbacks never error back to the transport.
    pub async fn handle_status_callback(
        &self,
        provider_sid: &str,
        raw_status: &str,
        error_code: Option<&str>,
    ) -> Result<bool, EngineError> {
        let (status, reason) = match raw_status {
            "delivered" | "sent" => (DeliveryStatus::Sent, None),
            "failed" | "undelivered" => {
                (DeliveryStatus::Failed, Some(categorize_error(error_code)))
            }
            // Intermediate states (accepted, queued, sending) carry no news.
            _ => return Ok(false),
        };

        let storage = self.storage();
        let updated = delivery::apply_callback(&storage, provider_sid, status, reason)?;
        if !updated {
            rlog!("engine: status callback for unknown sid {provider_sid}");
        }
        Ok(updated)
    }
}

/// Map transport error codes onto the failure-reason taxonomy.
fn categorize_error(error_code: Option<&str>) -> FailureReason {
    match error_code {
        Some("21211") | Some("21214") | Some("21610") => FailureReason::InvalidDestination,
        Some("30003") | Some("30005") | Some("30006") => FailureReason::CarrierRejected,
        Some("30001") | Some("30002") => FailureReason::TransientNetwork,
        _ => FailureReason::Unknown,
    }
}

/// Compose the body recipients see: sender attribution, the text, and a
/// placeholder line per failed attachment.
fn format_outbound(sender_name: &str, body: Option<&str>, placeholders: &[String]) -> String {
    let mut text = match body {
        Some(body) => format!("{sender_name}: {body}"),
        None => format!("{sender_name} sent media"),
    };
    for placeholder in placeholders {
        text.push('\n');
        text.push_str(placeholder);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_body_carries_attribution_and_placeholders() {
        let text = format_outbound(
            "Jane",
            Some("see you at 6"),
            &["[attachment 2 unavailable]".to_string()],
        );
        assert_eq!(text, "Jane: see you at 6\n[attachment 2 unavailable]");
    }

    #[test]
    fn media_only_body() {
        assert_eq!(format_outbound("Jane", None, &[]), "Jane sent media");
    }

    #[test]
    fn error_codes_map_to_reason_categories() {
        assert_eq!(
            categorize_error(Some("21211")),
            FailureReason::InvalidDestination
        );
        assert_eq!(
            categorize_error(Some("30005")),
            FailureReason::CarrierRejected
        );
        assert_eq!(categorize_error(Some("99999")), FailureReason::Unknown);
        assert_eq!(categorize_error(None), FailureReason::Unknown);
    }
}
