use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use ironloop::error::LlmError;
use ironloop::llm::{ChatMessage, ChatRequest, LlmProvider};
use ironloop::{Config, Runtime};

/// Model stand-in that replays canned replies, then keeps repeating the last.
pub struct CannedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    pub seen: Mutex<Vec<ChatRequest>>,
}

impl CannedModel {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(String::new()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProvider for CannedModel {
    fn name(&self) -> &str {
        "canned"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatMessage, LlmError> {
        self.seen.lock().unwrap().push(request);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(ChatMessage::assistant(last.clone()))
    }
}

pub fn runtime(dir: &TempDir, model: Arc<CannedModel>) -> Runtime {
    let mut config = Config::default();
    config.sandbox.root = dir.path().join("sandbox");
    config.hub.path = dir.path().join("hub.json");
    Runtime::with_provider(&config, model).unwrap()
}
