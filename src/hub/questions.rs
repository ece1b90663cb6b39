//! Question/answer exchange between a child agent and its parent.
//!
//! Questions are ordinary hub messages of type `question`; their lifecycle
//! lives in the payload:
//!
//! ```text
//! PENDING ──reply──▶ ANSWERED ──check_answer──▶ RETRIEVED
//!    │
//!    └── older than 24h on access ──▶ EXPIRED
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{HubState, Message, MessageHub, NewMessage};
use crate::error::HubError;

/// Message type used for questions.
pub const QUESTION_KIND: &str = "question";
/// Message type used for the answer notification sent back to the asker.
pub const ANSWER_KIND: &str = "answer";
/// Unanswered questions older than this expire.
pub const QUESTION_TTL_HOURS: i64 = 24;

/// Lifecycle state of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Retrieved,
    Expired,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Answered => "ANSWERED",
            Self::Retrieved => "RETRIEVED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload carried by a `question` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub status: QuestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

/// A question as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub question_id: String,
    pub from: String,
    pub to: String,
    pub asked_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: QuestionPayload,
}

impl QuestionView {
    fn from_message(message: &Message) -> Option<Self> {
        if message.kind != QUESTION_KIND {
            return None;
        }
        let payload = serde_json::from_value(message.payload.clone()).ok()?;
        Some(Self {
            question_id: message.id.clone(),
            from: message.from.clone(),
            to: message.to.clone(),
            asked_at: message.timestamp,
            payload,
        })
    }
}

impl MessageHub {
    /// Post a question from `from` to its parent `to`.
    pub async fn ask_parent(
        &self,
        from: &str,
        to: &str,
        question: &str,
        context: Option<String>,
    ) -> Result<QuestionView, HubError> {
        let payload = QuestionPayload {
            question: question.to_string(),
            context,
            status: QuestionStatus::Pending,
            answer: None,
            answered_by: None,
            answered_at: None,
        };
        let message = self
            .send(NewMessage::new(
                QUESTION_KIND,
                from,
                to,
                serde_json::to_value(&payload).unwrap_or_default(),
            ))
            .await?;
        Ok(QuestionView {
            question_id: message.id,
            from: message.from,
            to: message.to,
            asked_at: message.timestamp,
            payload,
        })
    }

    /// Answer a pending question and notify the asker.
    pub async fn reply(
        &self,
        question_id: &str,
        from: &str,
        answer: &str,
    ) -> Result<QuestionView, HubError> {
        let now = Utc::now();
        self.update(|state| {
            expire_stale(state, now);
            let index = find_question(state, question_id)?;
            let mut view = view_at(state, index, question_id)?;
            if view.payload.status != QuestionStatus::Pending {
                return Err(HubError::InvalidQuestionState {
                    id: question_id.to_string(),
                    status: view.payload.status.to_string(),
                    expected: QuestionStatus::Pending.to_string(),
                });
            }

            view.payload.status = QuestionStatus::Answered;
            view.payload.answer = Some(answer.to_string());
            view.payload.answered_by = Some(from.to_string());
            view.payload.answered_at = Some(now);
            store_payload(state, index, &view.payload);

            state.messages.push(
                NewMessage::new(
                    ANSWER_KIND,
                    from,
                    view.from.clone(),
                    serde_json::json!({ "question_id": question_id, "answer": answer }),
                )
                .with_timestamp(now)
                .into_message(),
            );
            Ok(view)
        })
        .await
    }

    /// Check a question's state, marking an answered question as retrieved.
    ///
    /// The returned view shows the state before this check, so the first
    /// read of an answer reports `ANSWERED` and later reads `RETRIEVED`.
    pub async fn check_answer(&self, question_id: &str) -> Result<QuestionView, HubError> {
        let now = Utc::now();
        self.update_if(|state| {
            let expired = expire_stale(state, now);
            let index = find_question(state, question_id)?;
            let view = view_at(state, index, question_id)?;
            let retrieved = view.payload.status == QuestionStatus::Answered;
            if retrieved {
                let mut stored = view.payload.clone();
                stored.status = QuestionStatus::Retrieved;
                store_payload(state, index, &stored);
            }
            Ok((view, retrieved || expired > 0))
        })
        .await
    }

    /// Pending questions addressed to `agent_id`, oldest first.
    pub async fn get_pending_questions(
        &self,
        agent_id: &str,
    ) -> Result<Vec<QuestionView>, HubError> {
        let now = Utc::now();
        self.update_if(|state| {
            let expired = expire_stale(state, now);
            if expired > 0 {
                tracing::info!(expired, "Expired stale hub questions");
            }
            let pending = state
                .messages
                .iter()
                .filter(|m| m.to == agent_id)
                .filter_map(QuestionView::from_message)
                .filter(|q| q.payload.status == QuestionStatus::Pending)
                .collect();
            Ok((pending, expired > 0))
        })
        .await
    }
}

/// Move every PENDING question older than the TTL to EXPIRED. Returns how many changed.
pub(crate) fn expire_stale(state: &mut HubState, now: DateTime<Utc>) -> usize {
    let cutoff = now - Duration::hours(QUESTION_TTL_HOURS);
    let mut expired = 0;
    for message in state.messages.iter_mut() {
        if message.timestamp >= cutoff {
            continue;
        }
        let Some(mut view) = QuestionView::from_message(message) else {
            continue;
        };
        if view.payload.status == QuestionStatus::Pending {
            view.payload.status = QuestionStatus::Expired;
            message.payload = serde_json::to_value(&view.payload).unwrap_or_default();
            expired += 1;
        }
    }
    expired
}

fn find_question(state: &HubState, question_id: &str) -> Result<usize, HubError> {
    state
        .messages
        .iter()
        .position(|m| m.id == question_id && m.kind == QUESTION_KIND)
        .ok_or_else(|| HubError::QuestionNotFound {
            id: question_id.to_string(),
        })
}

fn view_at(state: &HubState, index: usize, question_id: &str) -> Result<QuestionView, HubError> {
    QuestionView::from_message(&state.messages[index]).ok_or_else(|| {
        HubError::QuestionNotFound {
            id: question_id.to_string(),
        }
    })
}

fn store_payload(state: &mut HubState, index: usize, payload: &QuestionPayload) {
    state.messages[index].payload = serde_json::to_value(payload).unwrap_or_default();
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn hub() -> (TempDir, MessageHub) {
        let dir = TempDir::new().unwrap();
        let hub = MessageHub::new(dir.path().join("hub.json"));
        (dir, hub)
    }

    #[tokio::test]
    async fn test_question_lifecycle() {
        let (_dir, hub) = hub();
        let asked = hub
            .ask_parent("child", "parent", "Which tone?", None)
            .await
            .unwrap();
        assert_eq!(asked.payload.status, QuestionStatus::Pending);

        let pending = hub.get_pending_questions("parent").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].question_id, asked.question_id);

        let status = hub.check_answer(&asked.question_id).await.unwrap();
        assert_eq!(status.payload.status, QuestionStatus::Pending);

        let replied = hub
            .reply(&asked.question_id, "parent", "Formal")
            .await
            .unwrap();
        assert_eq!(replied.payload.status, QuestionStatus::Answered);
        assert!(hub.get_pending_questions("parent").await.unwrap().is_empty());

        let checked = hub.check_answer(&asked.question_id).await.unwrap();
        assert_eq!(checked.payload.status, QuestionStatus::Answered);
        assert_eq!(checked.payload.answer.as_deref(), Some("Formal"));

        let again = hub.check_answer(&asked.question_id).await.unwrap();
        assert_eq!(again.payload.status, QuestionStatus::Retrieved);
        assert_eq!(again.payload.answer.as_deref(), Some("Formal"));

        let inbox = hub.receive("child", None).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, ANSWER_KIND);
    }

    #[tokio::test]
    async fn test_polling_does_not_rewrite_the_document() {
        let (dir, hub) = hub();
        let asked = hub
            .ask_parent("child", "parent", "Which tone?", None)
            .await
            .unwrap();

        // Re-encode compactly; any save would bring back the pretty layout.
        let path = dir.path().join("hub.json");
        let state: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let compact = serde_json::to_string(&state).unwrap();
        std::fs::write(&path, &compact).unwrap();

        assert_eq!(hub.get_pending_questions("parent").await.unwrap().len(), 1);
        let checked = hub.check_answer(&asked.question_id).await.unwrap();
        assert_eq!(checked.payload.status, QuestionStatus::Pending);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), compact);

        hub.reply(&asked.question_id, "parent", "Warm").await.unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), compact);
    }

    #[tokio::test]
    async fn test_reply_twice_is_rejected() {
        let (_dir, hub) = hub();
        let asked = hub.ask_parent("c", "p", "?", None).await.unwrap();
        hub.reply(&asked.question_id, "p", "yes").await.unwrap();

        let err = hub.reply(&asked.question_id, "p", "no").await.unwrap_err();
        assert!(matches!(err, HubError::InvalidQuestionState { .. }));
    }

    #[tokio::test]
    async fn test_unknown_question() {
        let (_dir, hub) = hub();
        assert!(matches!(
            hub.check_answer("missing").await,
            Err(HubError::QuestionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_pending_question_expires() {
        let (_dir, hub) = hub();
        let payload = QuestionPayload {
            question: "old?".to_string(),
            context: None,
            status: QuestionStatus::Pending,
            answer: None,
            answered_by: None,
            answered_at: None,
        };
        let old = hub
            .send(
                NewMessage::new(
                    QUESTION_KIND,
                    "c",
                    "p",
                    serde_json::to_value(&payload).unwrap(),
                )
                .with_timestamp(Utc::now() - Duration::hours(QUESTION_TTL_HOURS + 1)),
            )
            .await
            .unwrap();

        assert!(hub.get_pending_questions("p").await.unwrap().is_empty());
        let checked = hub.check_answer(&old.id).await.unwrap();
        assert_eq!(checked.payload.status, QuestionStatus::Expired);

        let err = hub.reply(&old.id, "p", "late").await.unwrap_err();
        assert!(matches!(err, HubError::InvalidQuestionState { .. }));
    }

    #[test]
    fn test_expire_stale_leaves_answered_questions() {
        let now = Utc::now();
        let mut state = HubState::default();
        let payload = QuestionPayload {
            question: "q".to_string(),
            context: None,
            status: QuestionStatus::Answered,
            answer: Some("a".to_string()),
            answered_by: Some("p".to_string()),
            answered_at: Some(now),
        };
        state.messages.push(
            NewMessage::new(QUESTION_KIND, "c", "p", serde_json::to_value(&payload).unwrap())
                .with_timestamp(now - Duration::hours(48))
                .into_message(),
        );

        assert_eq!(expire_stale(&mut state, now), 0);
    }
}
