//! Cross-agent message hub.
//!
//! The hub is a single JSON document holding the message log, liveness
//! heartbeats and the set of connected agents. Every operation runs the full
//! load → mutate → save cycle under one mutex, and saves go through the same
//! temp-file-then-rename path the sandbox uses, so the file on disk is always
//! either the previous document or the new one.
//!
//! The lock is process-local. Two server processes pointed at the same file
//! can still lose each other's updates.

mod questions;

pub use questions::{QUESTION_TTL_HOURS, QuestionPayload, QuestionStatus, QuestionView};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::HubError;
use crate::sandbox::write_atomic;

/// A message between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A message as submitted by a sender; missing fields are filled in by the hub.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    /// Create a message with a generated id and timestamp.
    pub fn new(
        kind: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            from: from.into(),
            to: to.into(),
            payload,
            timestamp: None,
        }
    }

    /// Pin the timestamp instead of stamping at send time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn into_message(self) -> Message {
        Message {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: self.kind,
            from: self.from,
            to: self.to,
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Last liveness report from an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub progress: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// The persisted hub document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubState {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub heartbeats: BTreeMap<String, Heartbeat>,
    #[serde(default)]
    pub agents: Vec<String>,
}

/// File-backed message hub.
#[derive(Debug)]
pub struct MessageHub {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MessageHub {
    /// Create a hub persisted at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the hub document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register `agent_id`. Connecting twice is a no-op.
    pub async fn connect(&self, agent_id: &str) -> Result<bool, HubError> {
        self.update_if(|state| {
            if state.agents.iter().any(|a| a == agent_id) {
                return Ok((false, false));
            }
            state.agents.push(agent_id.to_string());
            Ok((true, true))
        })
        .await
        .inspect(|added| {
            if *added {
                tracing::info!(agent_id, "Agent connected to hub");
            }
        })
    }

    /// Append a message to the log, assigning an id and timestamp if absent.
    pub async fn send(&self, message: NewMessage) -> Result<Message, HubError> {
        let message = message.into_message();
        let stored = message.clone();
        self.update(move |state| {
            state.messages.push(stored);
            Ok(())
        })
        .await?;
        tracing::debug!(id = %message.id, from = %message.from, to = %message.to, kind = %message.kind, "Hub message sent");
        Ok(message)
    }

    /// Messages addressed to `agent_id`, optionally only those strictly after `since`.
    pub async fn receive(
        &self,
        agent_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, HubError> {
        let state = self.snapshot().await?;
        Ok(state
            .messages
            .into_iter()
            .filter(|m| m.to == agent_id)
            .filter(|m| since.is_none_or(|t| m.timestamp > t))
            .collect())
    }

    /// Upsert the liveness entry for `agent_id`.
    pub async fn heartbeat(
        &self,
        agent_id: &str,
        progress: serde_json::Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Heartbeat, HubError> {
        let heartbeat = Heartbeat {
            agent_id: agent_id.to_string(),
            progress,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        };
        let stored = heartbeat.clone();
        self.update(move |state| {
            state.heartbeats.insert(stored.agent_id.clone(), stored);
            Ok(())
        })
        .await?;
        Ok(heartbeat)
    }

    /// Read the current document under the lock.
    pub async fn snapshot(&self) -> Result<HubState, HubError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Run `f` against the document and persist the result atomically.
    ///
    /// The document is only written when `f` succeeds.
    pub async fn update<F, R>(&self, f: F) -> Result<R, HubError>
    where
        F: FnOnce(&mut HubState) -> Result<R, HubError>,
    {
        self.update_if(|state| f(state).map(|out| (out, true))).await
    }

    /// Like [`MessageHub::update`], but `f` reports whether it changed the
    /// document and nothing is written when it did not.
    pub async fn update_if<F, R>(&self, f: F) -> Result<R, HubError>
    where
        F: FnOnce(&mut HubState) -> Result<(R, bool), HubError>,
    {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let (out, changed) = f(&mut state)?;
        if changed {
            self.save(&state).await?;
        }
        Ok(out)
    }

    async fn load(&self) -> Result<HubState, HubError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HubState::default());
            }
            Err(e) => {
                return Err(HubError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(HubState::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| HubError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, state: &HubState) -> Result<(), HubError> {
        let persist_err = |reason: String| HubError::Persist {
            path: self.path.clone(),
            reason,
        };
        let bytes = serde_json::to_vec_pretty(state).map_err(|e| persist_err(e.to_string()))?;
        write_atomic(self.path.clone(), bytes)
            .await
            .map_err(|e| persist_err(e.to_string()))
    }
}
