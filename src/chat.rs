//! Conversation state with the model host.
//!
//! A [`ChatSession`] owns the transcript of one conversation. The first turn
//! is always the system instruction that tells the model to answer with a
//! JSON array of commands; it is re-created on [`ChatSession::clear`] and never
//! edited. User and assistant turns are only ever appended.

use std::future::Future;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Instruction sent as the first turn of every conversation.
pub const SYSTEM_PROMPT: &str = r#"You are a desktop manager assistant. Translate every user request into a list of structured JSON commands.
You MUST respond ONLY with a JSON array of command objects. Do NOT include any other text or explanations.

Each command object must have a "command_type" and a "parameters" object.

Available command types and their parameters:

1. "open_terminal_and_execute": opens a terminal and runs a shell command in it.
   Parameters:
     "command" (string, required): the shell command to execute.

2. "open_application": opens an application.
   Parameters:
     "application_name" (string, required): the application to open (e.g. "notepad", "firefox", "code").

3. "open_url": opens a URL in the default web browser.
   Parameters:
     "url" (string, required): the URL to open (e.g. "https://google.com").

Example of expected output:
[
  {
    "command_type": "open_terminal_and_execute",
    "parameters": {
      "command": "ls -l"
    }
  },
  {
    "command_type": "open_url",
    "parameters": {
      "url": "https://google.com"
    }
  }
]

Give nothing else BUT the JSON array of commands. Ensure the JSON is properly formatted."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A chat backend able to list its models and answer a conversation.
pub trait ChatModel {
    /// Names of the models the host advertises.
    fn list_models(&self) -> impl Future<Output = Result<Vec<String>>>;

    /// Sends the whole transcript and returns the assistant's reply.
    fn chat(&self, model: &str, transcript: &[Turn]) -> impl Future<Output = Result<String>>;
}

/// Picks the model to use given what the host advertises.
///
/// The configured name matches an advertised one either exactly or once the
/// advertised `:tag` is stripped ("llama3" matches "llama3:latest"). Without a
/// match the first advertised model is used, without its tag. Returns `None`
/// when the configured name can be kept as is.
pub fn resolve_model(configured: &str, advertised: &[String]) -> Option<String> {
    let matches = advertised
        .iter()
        .any(|name| name == configured || bare_name(name) == configured);
    if matches {
        return None;
    }
    advertised.first().map(|first| bare_name(first).to_string())
}

fn bare_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

pub struct ChatSession<M> {
    backend: M,
    model: String,
    transcript: Vec<Turn>,
}

impl<M: ChatModel> ChatSession<M> {
    pub fn new(backend: M, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            transcript: vec![Turn::new(Role::System, SYSTEM_PROMPT)],
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn backend(&self) -> &M {
        &self.backend
    }

    /// Probes the host and settles which model to talk to.
    pub async fn check_endpoint_reachable(&mut self) -> bool {
        let advertised = match self.backend.list_models().await {
            Ok(models) => models,
            Err(err) => {
                error!("Model host is not reachable: {err}");
                return false;
            }
        };
        info!("Connected to model host. Available models: {advertised:?}");
        if advertised.is_empty() {
            warn!(
                "Model host advertises no models, keeping '{}'",
                self.model
            );
        } else if let Some(fallback) = resolve_model(&self.model, &advertised) {
            warn!(
                "Model '{}' not found among {advertised:?}, switching to '{fallback}'",
                self.model
            );
            self.model = fallback;
        }
        true
    }

    /// Sends one user turn.
    ///
    /// Returns `Ok(None)` without touching the transcript when `text` is
    /// blank. The user turn stays in the transcript even if the request fails.
    pub async fn send(&mut self, text: &str) -> Result<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        self.transcript.push(Turn::new(Role::User, text));
        debug!("Sending to {}: {text}", self.model);

        let reply = self.backend.chat(&self.model, &self.transcript).await?;
        self.transcript
            .push(Turn::new(Role::Assistant, reply.clone()));
        Ok(Some(reply))
    }

    /// Drops the conversation, keeping only a fresh system turn.
    pub fn clear(&mut self) {
        self.transcript = vec![Turn::new(Role::System, SYSTEM_PROMPT)];
        info!("Conversation history cleared");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Backend answering from a queue of canned replies.
    #[derive(Default)]
    pub(crate) struct ScriptedModel {
        pub models: Vec<String>,
        pub unreachable: bool,
        pub replies: RefCell<VecDeque<Result<String>>>,
        pub requests: RefCell<Vec<(String, Vec<Turn>)>>,
        /// Never answer a chat request
        pub hang: bool,
    }

    impl ScriptedModel {
        pub fn replying(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                ..Default::default()
            }
        }
    }

    impl ChatModel for ScriptedModel {
        async fn list_models(&self) -> Result<Vec<String>> {
            if self.unreachable {
                return Err(Error::Connectivity("connection refused".into()));
            }
            Ok(self.models.clone())
        }

        async fn chat(&self, model: &str, transcript: &[Turn]) -> Result<String> {
            self.requests
                .borrow_mut()
                .push((model.to_string(), transcript.to_vec()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Connectivity("no scripted reply".into())))
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_new_session_has_only_system_turn() {
        let session = ChatSession::new(ScriptedModel::default(), "llama3");
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.transcript()[0].role, Role::System);
        assert_eq!(session.transcript()[0].content, SYSTEM_PROMPT);
    }

    #[test]
    fn test_system_prompt_names_every_command() {
        for command_type in crate::command::CommandType::ALL {
            assert!(SYSTEM_PROMPT.contains(command_type.wire_name()));
            assert!(SYSTEM_PROMPT.contains(command_type.required_parameter()));
        }
        assert!(SYSTEM_PROMPT.contains("ONLY with a JSON array"));
    }

    #[tokio::test]
    async fn test_send_appends_both_turns() {
        let model = ScriptedModel::replying(vec![Ok("[]".to_string())]);
        let mut session = ChatSession::new(model, "llama3");

        let reply = session.send("  open google  ").await.unwrap();
        assert_eq!(reply.as_deref(), Some("[]"));

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1], Turn::new(Role::User, "open google"));
        assert_eq!(transcript[2], Turn::new(Role::Assistant, "[]"));

        // The request carried the system and user turns
        let requests = session.backend().requests.borrow();
        assert_eq!(requests[0].0, "llama3");
        assert_eq!(requests[0].1.len(), 2);
    }

    #[tokio::test]
    async fn test_blank_send_is_a_no_op() {
        let mut session = ChatSession::new(ScriptedModel::default(), "llama3");
        assert_eq!(session.send("").await.unwrap(), None);
        assert_eq!(session.send(" \t\n").await.unwrap(), None);
        assert_eq!(session.transcript().len(), 1);
        assert!(session.backend().requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_keeps_user_turn() {
        let model = ScriptedModel::replying(vec![
            Err(Error::Status {
                status: 500,
                body: "boom".into(),
            }),
            Ok("hello".to_string()),
        ]);
        let mut session = ChatSession::new(model, "llama3");

        let err = session.send("first").await.unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(session.transcript().len(), 2);
        assert_eq!(session.transcript()[1].role, Role::User);

        // The session stays usable
        assert_eq!(
            session.send("second").await.unwrap().as_deref(),
            Some("hello")
        );
        assert_eq!(session.transcript().len(), 4);
    }

    #[tokio::test]
    async fn test_clear_resets_to_fresh_system_turn() {
        let model = ScriptedModel::replying(vec![Ok("[]".to_string())]);
        let mut session = ChatSession::new(model, "llama3");
        session.send("open google").await.unwrap();

        session.clear();
        let fresh = ChatSession::new(ScriptedModel::default(), "llama3");
        assert_eq!(session.transcript(), fresh.transcript());
    }

    #[test]
    fn test_resolve_model() {
        let advertised = names(&["llama3:latest", "mistral:7b"]);
        assert_eq!(resolve_model("llama3", &advertised), None);
        assert_eq!(resolve_model("llama3:latest", &advertised), None);
        assert_eq!(resolve_model("mistral", &advertised), None);
        assert_eq!(
            resolve_model("deepseek-r1:8b", &advertised),
            Some("llama3".to_string())
        );
        assert_eq!(resolve_model("deepseek-r1:8b", &[]), None);
    }

    #[tokio::test]
    async fn test_check_endpoint_falls_back_to_first_model() {
        let model = ScriptedModel {
            models: names(&["qwen2:7b", "llama3:latest"]),
            ..Default::default()
        };
        let mut session = ChatSession::new(model, "deepseek-r1:8b");
        assert!(session.check_endpoint_reachable().await);
        assert_eq!(session.model(), "qwen2");
    }

    #[tokio::test]
    async fn test_check_endpoint_keeps_known_model() {
        let model = ScriptedModel {
            models: names(&["qwen2:7b", "deepseek-r1:8b"]),
            ..Default::default()
        };
        let mut session = ChatSession::new(model, "deepseek-r1:8b");
        assert!(session.check_endpoint_reachable().await);
        assert_eq!(session.model(), "deepseek-r1:8b");
    }

    #[tokio::test]
    async fn test_check_endpoint_unreachable() {
        let model = ScriptedModel {
            unreachable: true,
            ..Default::default()
        };
        let mut session = ChatSession::new(model, "llama3");
        assert!(!session.check_endpoint_reachable().await);
        assert_eq!(session.model(), "llama3");
    }
}
