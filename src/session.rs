//! Privileged command interpreter and activation state.
//!
//! Owns the agent session state: whether detection is running, which
//! conversation it is bound to, and since when. State lives only in memory
//! and resets on restart.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::transport::{ChatTransport, InboundMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `.a` / `.ابدا` — list conversations available for selection.
    List,
    /// Bare number replying to a listing (1-based).
    Select(usize),
    /// `.x` / `.وقف` — deactivate.
    Deactivate,
    /// `.clear` / `.مسح` — clear the bound conversation's history.
    ClearHistory,
    /// `.status` / `.حالة` — state readout, unprivileged.
    Status,
}

/// Parse a message as a command. Anything else returns None and flows to
/// the detection pipeline untouched.
pub fn parse_command(text: &str) -> Option<Command> {
    let t = text.trim();
    match t {
        ".a" | ".ابدا" => Some(Command::List),
        ".x" | ".وقف" => Some(Command::Deactivate),
        ".clear" | ".مسح" => Some(Command::ClearHistory),
        ".status" | ".حالة" => Some(Command::Status),
        _ => {
            if !t.is_empty() && t.chars().all(|c| c.is_ascii_digit()) {
                t.parse().ok().map(Command::Select)
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub active: bool,
    pub bound_conversation: Option<String>,
    pub activated_at: Option<i64>,
}

pub struct SessionController {
    owners: Vec<String>,
    state: SessionState,
}

impl SessionController {
    pub fn new(owners: Vec<String>) -> Self {
        Self {
            owners,
            state: SessionState::default(),
        }
    }

    pub fn is_owner(&self, sender_id: &str) -> bool {
        self.owners.iter().any(|o| o == sender_id.trim())
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The detection pipeline runs only for the bound conversation, and only
    /// for messages sent at or after activation.
    pub fn should_detect(&self, conversation_id: &str, timestamp: i64) -> bool {
        if !self.state.active {
            return false;
        }
        let bound = match &self.state.bound_conversation {
            Some(id) => id == conversation_id,
            None => false,
        };
        let after_activation = match self.state.activated_at {
            Some(at) => timestamp >= at,
            None => false,
        };
        bound && after_activation
    }

    pub fn status_line(&self) -> String {
        match (self.state.active, &self.state.bound_conversation) {
            (true, Some(id)) => format!("Active in conversation {} - watching for names", id),
            _ => "Inactive - send .a to pick a conversation".to_string(),
        }
    }

    /// Handle `cmd`, replying through the transport. Returns true when the
    /// message was consumed; false hands it back to the detection pipeline
    /// (a bare number while active is ordinary chat, not a command).
    pub async fn handle_command(
        &mut self,
        cmd: Command,
        msg: &InboundMessage,
        now_epoch: i64,
        transport: &dyn ChatTransport,
    ) -> Result<bool> {
        let reply_to = msg.conversation_id.as_str();

        if let Command::Status = cmd {
            transport
                .send_text(reply_to, &format!("Status: {}", self.status_line()))
                .await?;
            return Ok(true);
        }

        if let Command::Select(index) = cmd {
            if self.state.active || !self.is_owner(&msg.sender_id) {
                return Ok(false);
            }
            self.activate_selection(index, msg, now_epoch, transport)
                .await?;
            return Ok(true);
        }

        if !self.is_owner(&msg.sender_id) {
            tracing::debug!(
                "refusing privileged command {:?} from {}",
                cmd,
                msg.sender_id
            );
            transport
                .send_text(reply_to, "You are not allowed to control this bot.")
                .await?;
            return Ok(true);
        }

        match cmd {
            Command::List => {
                let conversations = transport.list_conversations().await.unwrap_or_else(|e| {
                    tracing::warn!("failed to list conversations: {}", e);
                    Vec::new()
                });
                if conversations.is_empty() {
                    transport
                        .send_text(reply_to, "No conversations visible yet.")
                        .await?;
                    return Ok(true);
                }

                let mut listing = String::from("Available conversations:\n");
                for (i, conv) in conversations.iter().enumerate() {
                    let selected = self.state.bound_conversation.as_deref() == Some(conv.id.as_str());
                    listing.push_str(&format!(
                        "{}. {} ({} members){}\n",
                        i + 1,
                        conv.name,
                        conv.member_count,
                        if selected { " [selected]" } else { "" },
                    ));
                }
                listing.push_str(
                    "\nReply with a number to activate in that conversation.\n\
                     .clear wipes the selected conversation, .x deactivates, \
                     .status reports state.\n",
                );
                listing.push_str(&format!("\n{}", self.status_line()));
                transport.send_text(reply_to, &listing).await?;
            }
            Command::Deactivate => {
                self.state = SessionState::default();
                transport.send_text(reply_to, "Deactivated.").await?;
            }
            Command::ClearHistory => match self.state.bound_conversation.clone() {
                Some(bound) => {
                    transport.send_text(reply_to, "Clearing history...").await?;
                    if let Err(e) = transport.clear_history(&bound).await {
                        tracing::warn!("history clear failed for {}: {}", bound, e);
                    }
                    transport.send_text(reply_to, "History cleared.").await?;
                }
                None => {
                    transport
                        .send_text(reply_to, "No conversation selected. Send .a first.")
                        .await?;
                }
            },
            Command::Status | Command::Select(_) => unreachable!("handled above"),
        }
        Ok(true)
    }

    async fn activate_selection(
        &mut self,
        index: usize,
        msg: &InboundMessage,
        now_epoch: i64,
        transport: &dyn ChatTransport,
    ) -> Result<()> {
        let reply_to = msg.conversation_id.as_str();
        let conversations = transport.list_conversations().await.unwrap_or_else(|e| {
            tracing::warn!("failed to list conversations: {}", e);
            Vec::new()
        });

        let target = match index.checked_sub(1).and_then(|i| conversations.get(i)) {
            Some(conv) => conv.clone(),
            None => {
                transport
                    .send_text(reply_to, "Invalid conversation number.")
                    .await?;
                return Ok(());
            }
        };

        transport
            .send_text(
                reply_to,
                &format!("Activating in: {} - clearing history first...", target.name),
            )
            .await?;

        // Best-effort: a failed clear does not block activation.
        if let Err(e) = transport.clear_history(&target.id).await {
            tracing::warn!("history clear failed for {}: {}", target.id, e);
        }

        let activated_at = now_epoch.max(msg.timestamp);
        self.state = SessionState {
            active: true,
            bound_conversation: Some(target.id.clone()),
            activated_at: Some(activated_at),
        };
        tracing::info!(
            "activated in {} ({}) at {}",
            target.name,
            target.id,
            DateTime::<Utc>::from_timestamp(activated_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| activated_at.to_string())
        );

        transport
            .send_text(
                reply_to,
                &format!("Activated in: {}. Watching for names.", target.name),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dot_commands_and_aliases() {
        assert_eq!(parse_command(".a"), Some(Command::List));
        assert_eq!(parse_command(".ابدا"), Some(Command::List));
        assert_eq!(parse_command(".x"), Some(Command::Deactivate));
        assert_eq!(parse_command(".وقف"), Some(Command::Deactivate));
        assert_eq!(parse_command(".clear"), Some(Command::ClearHistory));
        assert_eq!(parse_command(".مسح"), Some(Command::ClearHistory));
        assert_eq!(parse_command(" .status "), Some(Command::Status));
        assert_eq!(parse_command(".حالة"), Some(Command::Status));
    }

    #[test]
    fn parses_bare_numbers_as_selection() {
        assert_eq!(parse_command("3"), Some(Command::Select(3)));
        assert_eq!(parse_command(" 12 "), Some(Command::Select(12)));
        assert_eq!(parse_command("+3"), None);
        assert_eq!(parse_command("3a"), None);
        assert_eq!(parse_command("*غوكو*"), None);
    }

    #[test]
    fn detection_requires_binding_and_activation_time() {
        let mut controller = SessionController::new(vec!["1".to_string()]);
        assert!(!controller.should_detect("g1", 100));

        controller.state = SessionState {
            active: true,
            bound_conversation: Some("g1".to_string()),
            activated_at: Some(100),
        };
        assert!(controller.should_detect("g1", 100));
        assert!(controller.should_detect("g1", 150));
        assert!(!controller.should_detect("g1", 99));
        assert!(!controller.should_detect("g2", 150));
    }

    #[test]
    fn ownership_is_exact_match() {
        let controller = SessionController::new(vec!["100".to_string()]);
        assert!(controller.is_owner("100"));
        assert!(controller.is_owner(" 100 "));
        assert!(!controller.is_owner("1000"));
        assert!(!controller.is_owner(""));
    }
}
