//! Long-polling Telegram adapter.
//!
//! Telegram cannot enumerate a bot's chats or wipe a history in one call,
//! so this adapter keeps its own registry of conversations observed since
//! start and remembers recent message ids per chat; `clear_history` walks
//! those ids with `deleteMessage`, best-effort.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::TransportConfig;
use crate::transport::{ChatTransport, ConversationInfo, InboundMessage};

/// Telegram enforces a 4096-character limit per message.
const MAX_SEND_LEN: usize = 4096;

/// Message ids remembered per chat for best-effort history clearing.
const RECENT_IDS_PER_CHAT: usize = 200;

// ─── Telegram API types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    message_id: i64,
    date: i64,
    chat: Chat,
    from: Option<User>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Deserialize)]
struct User {
    id: i64,
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ChatEntry {
    name: String,
    member_count: usize,
    recent_ids: VecDeque<i64>,
}

pub struct TelegramTransport {
    api_base: String,
    client: reqwest::Client,
    poll_timeout_secs: u64,
    self_id: i64,
    batch_tx: flume::Sender<Vec<InboundMessage>>,
    batch_rx: flume::Receiver<Vec<InboundMessage>>,
    chats: Mutex<HashMap<i64, ChatEntry>>,
    running: AtomicBool,
}

impl TelegramTransport {
    /// Connect, learn the bot's own identity, and start the polling task.
    pub async fn connect(config: &TransportConfig) -> Result<Arc<Self>> {
        let token = config
            .bot_token
            .clone()
            .context("no bot token configured (transport.bot_token or TELEGRAM_BOT_TOKEN)")?;

        let api_base = format!("https://api.telegram.org/bot{}", token);
        let client = reqwest::Client::new();

        let me: ApiResponse<User> = client
            .get(format!("{}/getMe", api_base))
            .send()
            .await
            .context("Failed to reach Telegram")?
            .json()
            .await
            .context("Failed to parse getMe response")?;
        let accepted = me.ok;
        let self_id = me
            .result
            .filter(|_| accepted)
            .map(|u| u.id)
            .context("Telegram rejected the bot token")?;

        let (batch_tx, batch_rx) = flume::unbounded();
        let transport = Arc::new(Self {
            api_base,
            client,
            poll_timeout_secs: config.poll_timeout_secs,
            self_id,
            batch_tx,
            batch_rx,
            chats: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });

        let poller = Arc::clone(&transport);
        tokio::spawn(async move {
            poller.poll_loop().await;
        });

        tracing::info!("Telegram transport connected (bot id {})", self_id);
        Ok(transport)
    }

    async fn poll_loop(&self) {
        let mut offset: i64 = 0;

        while self.running.load(Ordering::Relaxed) {
            let updates = match self.poll_updates(offset).await {
                Some(u) => u,
                None => continue,
            };

            let mut batch = Vec::new();
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(msg) = update.message else { continue };
                let Some(text) = msg.text else { continue };

                self.remember_chat(&msg.chat, msg.message_id);

                let sender_id = msg.from.as_ref().map(|u| u.id).unwrap_or_default();
                batch.push(InboundMessage {
                    conversation_id: msg.chat.id.to_string(),
                    sender_id: sender_id.to_string(),
                    text,
                    timestamp: msg.date,
                    message_id: msg.message_id.to_string(),
                    from_self: sender_id == self.self_id,
                });
            }

            if !batch.is_empty() && self.batch_tx.send(batch).is_err() {
                tracing::warn!("Telegram: subscriber gone, stopping poll loop");
                break;
            }
        }

        tracing::info!("Telegram poll loop stopped");
    }

    async fn poll_updates(&self, offset: i64) -> Option<Vec<Update>> {
        let url = format!("{}/getUpdates", self.api_base);
        let params = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"]
        });

        let resp = match self.client.post(&url).json(&params).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                return None;
            }
        };

        let body: ApiResponse<Vec<Update>> = match resp.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Telegram getUpdates parse error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                return None;
            }
        };

        if !body.ok {
            tracing::warn!("Telegram API returned ok=false");
            tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
            return None;
        }

        Some(body.result.unwrap_or_default())
    }

    fn remember_chat(&self, chat: &Chat, message_id: i64) {
        let name = chat
            .title
            .clone()
            .or_else(|| chat.username.clone())
            .or_else(|| chat.first_name.clone())
            .unwrap_or_else(|| chat.id.to_string());

        let mut chats = self.chats.lock().expect("chat registry poisoned");
        let entry = chats.entry(chat.id).or_default();
        entry.name = name;
        entry.recent_ids.push_back(message_id);
        while entry.recent_ids.len() > RECENT_IDS_PER_CHAT {
            entry.recent_ids.pop_front();
        }
    }

    async fn member_count(&self, chat_id: i64) -> Option<usize> {
        let url = format!("{}/getChatMemberCount", self.api_base);
        let params = serde_json::json!({ "chat_id": chat_id });
        let body: ApiResponse<usize> = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;
        body.ok.then_some(body.result).flatten()
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn subscribe(&self) -> flume::Receiver<Vec<InboundMessage>> {
        self.batch_rx.clone()
    }

    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<()> {
        let text = if text.len() > MAX_SEND_LEN {
            let mut end = MAX_SEND_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let url = format!("{}/sendMessage", self.api_base);
        let payload = serde_json::json!({ "chat_id": conversation_id, "text": text });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Telegram sendMessage failed: HTTP {}", resp.status());
        }
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationInfo>> {
        let snapshot: Vec<(i64, String, usize)> = {
            let chats = self.chats.lock().expect("chat registry poisoned");
            chats
                .iter()
                .map(|(id, entry)| (*id, entry.name.clone(), entry.member_count))
                .collect()
        };

        let mut conversations = Vec::with_capacity(snapshot.len());
        for (id, name, cached_count) in snapshot {
            let member_count = match self.member_count(id).await {
                Some(count) => {
                    let mut chats = self.chats.lock().expect("chat registry poisoned");
                    if let Some(entry) = chats.get_mut(&id) {
                        entry.member_count = count;
                    }
                    count
                }
                None => cached_count,
            };
            conversations.push(ConversationInfo {
                id: id.to_string(),
                name,
                member_count,
            });
        }

        conversations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(conversations)
    }

    async fn clear_history(&self, conversation_id: &str) -> Result<()> {
        let chat_id: i64 = conversation_id
            .parse()
            .with_context(|| format!("not a Telegram chat id: {conversation_id}"))?;

        let ids: Vec<i64> = {
            let mut chats = self.chats.lock().expect("chat registry poisoned");
            match chats.get_mut(&chat_id) {
                Some(entry) => entry.recent_ids.drain(..).collect(),
                None => Vec::new(),
            }
        };

        let url = format!("{}/deleteMessage", self.api_base);
        let mut failed = 0usize;
        for message_id in &ids {
            let payload =
                serde_json::json!({ "chat_id": chat_id, "message_id": message_id });
            match self.client.post(&url).json(&payload).send().await {
                Ok(r) if r.status().is_success() => {}
                _ => failed += 1,
            }
        }

        if failed > 0 {
            tracing::warn!(
                "Telegram clear_history: {}/{} deletions failed in chat {}",
                failed,
                ids.len(),
                chat_id
            );
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
