//! The agent: wires the admission gate, session controller, detection
//! pipeline and behavior engine over one transport subscription.
//!
//! One consumer loop reads message batches; every admitted message is
//! handled in its own task bounded by a hard timeout, so a slow resolution
//! or a long reply delay never stalls admission of the next event.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::time::{sleep, timeout};

use crate::arabic;
use crate::behavior::BehaviorEngine;
use crate::classify;
use crate::config::BotConfig;
use crate::extract;
use crate::gate::AdmissionGate;
use crate::resolve::NameResolver;
use crate::session::{parse_command, SessionController};
use crate::transport::{ChatTransport, InboundMessage};

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub active: bool,
    pub bound_conversation: Option<String>,
    pub tokens_learned: usize,
    pub status_text: String,
}

pub struct Agent {
    config: BotConfig,
    transport: Arc<dyn ChatTransport>,
    gate: Mutex<AdmissionGate>,
    session: AsyncMutex<SessionController>,
    resolver: AsyncMutex<NameResolver>,
    behavior: Mutex<BehaviorEngine<StdRng>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Agent {
    pub fn new(
        config: BotConfig,
        transport: Arc<dyn ChatTransport>,
        resolver: NameResolver,
    ) -> Self {
        let gate = AdmissionGate::new(config.admission.clone());
        let session = SessionController::new(config.commands.owners.clone());
        let behavior = BehaviorEngine::new(config.behavior.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            transport,
            gate: Mutex::new(gate),
            session: AsyncMutex::new(session),
            resolver: AsyncMutex::new(resolver),
            behavior: Mutex::new(behavior),
            shutdown_tx,
        }
    }

    /// Consume the transport subscription until shutdown or until the
    /// transport closes its sender side.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let batches = self.transport.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tracing::info!("Agent running; send .a from an owner account to activate");

        loop {
            let mut batch = tokio::select! {
                _ = shutdown_rx.changed() => break,
                received = batches.recv_async() => match received {
                    Ok(batch) => batch,
                    Err(_) => {
                        tracing::warn!("Transport subscription closed");
                        break;
                    }
                },
            };

            // Newest first, as delivered by the transport event.
            batch.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

            {
                let mut gate = self.gate.lock().expect("gate lock poisoned");
                gate.sweep_stale();
            }

            for msg in batch {
                let admitted = {
                    let mut gate = self.gate.lock().expect("gate lock poisoned");
                    gate.admit(&msg, Utc::now().timestamp())
                };
                if !admitted {
                    continue;
                }

                let agent = Arc::clone(self);
                tokio::spawn(async move {
                    let message_id = msg.message_id.clone();
                    let budget = agent.config.admission.message_timeout();
                    match timeout(budget, agent.process_message(msg)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!("Message {} failed: {:#}", message_id, e);
                        }
                        Err(_) => {
                            tracing::warn!(
                                "Message {} abandoned after {:?}",
                                message_id,
                                budget
                            );
                        }
                    }
                    let mut gate = agent.gate.lock().expect("gate lock poisoned");
                    gate.finish(&message_id);
                });
            }
        }

        self.transport.shutdown();
        Ok(())
    }

    /// Stop the run loop and the transport subscription. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.transport.shutdown();
    }

    pub async fn status(&self) -> AgentStatus {
        let session = self.session.lock().await;
        let resolver = self.resolver.lock().await;
        let state = session.state();
        AgentStatus {
            active: state.active,
            bound_conversation: state.bound_conversation.clone(),
            tokens_learned: resolver.learned_count(),
            status_text: session.status_line(),
        }
    }

    async fn process_message(&self, msg: InboundMessage) -> Result<()> {
        if let Some(cmd) = parse_command(&msg.text) {
            let mut session = self.session.lock().await;
            let handled = session
                .handle_command(cmd, &msg, Utc::now().timestamp(), self.transport.as_ref())
                .await?;
            if handled {
                return Ok(());
            }
        }

        let should_detect = {
            let session = self.session.lock().await;
            session.should_detect(&msg.conversation_id, msg.timestamp)
        };
        if !should_detect {
            return Ok(());
        }

        let candidates = extract::extract(&msg.text);
        if candidates.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "Extracted {} candidates from {} in {}",
            candidates.len(),
            msg.sender_id,
            msg.conversation_id
        );

        let strict = self.config.detection.strict_classifier;
        let mut names = Vec::new();
        {
            let mut resolver = self.resolver.lock().await;
            for candidate in &candidates {
                if strict {
                    let verdict = classify::classify(&arabic::normalize(&candidate.text));
                    if !verdict.accepted {
                        continue;
                    }
                }
                match resolver.resolve(&candidate.text).await {
                    Some(resolved) => {
                        tracing::debug!(
                            "Resolved {:?} -> {:?} (source {:?})",
                            candidate.text,
                            resolved.name,
                            resolved.source
                        );
                        names.push(resolved.name);
                    }
                    None => names.push(candidate.text.clone()),
                }
            }
        }
        if names.is_empty() {
            return Ok(());
        }

        let reply = {
            let mut behavior = self.behavior.lock().expect("behavior lock poisoned");
            behavior.plan(&names)
        };
        if let Some(kind) = reply.mistake {
            tracing::debug!("Mistake mode {:?} for message {}", kind, msg.message_id);
        }

        sleep(reply.delay).await;
        self.send_with_retry(&msg.conversation_id, &reply.text).await;
        Ok(())
    }

    /// Send with one retry after a short backoff; a second failure is
    /// logged and dropped, never escalated.
    async fn send_with_retry(&self, conversation_id: &str, text: &str) {
        match self.transport.send_text(conversation_id, text).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!("Send to {} failed, retrying: {}", conversation_id, e);
            }
        }
        sleep(self.config.transport.retry_backoff()).await;
        if let Err(e) = self.transport.send_text(conversation_id, text).await {
            tracing::error!("Send to {} failed after retry: {}", conversation_id, e);
        }
    }
}
