//! AI task generation.
//!
//! Turns a goal description into an ordered list of task names by asking an
//! OpenAI-compatible chat completion endpoint for a numbered plan and
//! splitting the reply into lines. Nothing here persists tasks; clients
//! create them through the task endpoints if they want to keep them.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ProviderConfig;

const MAX_TOKENS: u32 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no tasks were generated")]
    Empty,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Single-prompt completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
}

/// External text generator. Returns the text of every completion choice.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    n: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {base_url}/chat/completions` with a bearer API key.
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_none() {
            warn!("OPENAI_API_KEY not set; task generation requests will be rejected upstream");
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            n: 1,
        };

        let mut call = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }
        let response = call.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        Ok(completion
            .choices
            .into_iter()
            .map(|choice| choice.message.content.unwrap_or_default())
            .collect())
    }
}

/// Builds the instruction sent to the provider for a goal description.
pub fn instruction(goal: &str) -> String {
    format!(
        "Please provide a straight-forward, clear, and actionable step-by-step (maximum 10) plan to achieve the following goal: {goal}"
    )
}

/// Splits a completion into task names: one per non-blank line, with any
/// leading `N.` ordinal removed.
pub fn parse_task_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(strip_ordinal)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_ordinal(line: &str) -> &str {
    let line = line.trim();
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    match line[digits..].strip_prefix('.') {
        Some(rest) if digits > 0 => rest.trim(),
        _ => line,
    }
}

#[derive(Clone)]
pub struct TaskGenerator {
    provider: Arc<dyn CompletionProvider>,
}

impl TaskGenerator {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Asks the provider once; no retries. An empty reply or a reply with no
    /// usable lines is [`GenerationError::Empty`].
    pub async fn generate(&self, goal: &str) -> Result<Vec<String>, GenerationError> {
        let request = CompletionRequest {
            prompt: instruction(goal),
            max_tokens: MAX_TOKENS,
        };
        let choices = self.provider.complete(&request).await?;
        let Some(text) = choices.first() else {
            return Err(GenerationError::Empty);
        };
        let tasks = parse_task_lines(text);
        debug!(count = tasks.len(), "generated tasks");
        if tasks.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(tasks)
    }
}

/// Provider that replays canned replies, for tests.
#[cfg(test)]
pub(crate) struct ScriptedProvider {
    pub reply: Result<Vec<String>, u16>,
    pub seen: std::sync::Mutex<Vec<CompletionRequest>>,
}

#[cfg(test)]
impl ScriptedProvider {
    pub fn replying(choices: &[&str]) -> Self {
        Self {
            reply: Ok(choices.iter().map(|c| c.to_string()).collect()),
            seen: Default::default(),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            reply: Err(status),
            seen: Default::default(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, ProviderError> {
        self.seen.lock().unwrap().push(request.clone());
        match &self.reply {
            Ok(choices) => Ok(choices.clone()),
            Err(status) => Err(ProviderError::Status {
                status: *status,
                body: "scripted failure".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_plan() {
        let text = "1. Book a venue\n\n2.  Invite speakers  \n   \n10. Send recap\nCelebrate";
        assert_eq!(
            parse_task_lines(text),
            vec!["Book a venue", "Invite speakers", "Send recap", "Celebrate"]
        );
    }

    #[test]
    fn ordinal_stripping_edge_cases() {
        assert_eq!(parse_task_lines("100 push-ups daily"), vec!["100 push-ups daily"]);
        assert_eq!(parse_task_lines("2.5 km run"), vec!["5 km run"]);
        assert_eq!(parse_task_lines(". dot"), vec![". dot"]);
    }

    #[tokio::test]
    async fn embeds_goal_in_instruction() {
        let provider = Arc::new(ScriptedProvider::replying(&["1. Start"]));
        let generator = TaskGenerator::new(provider.clone());
        let tasks = generator.generate("Run a marathon").await.unwrap();
        assert_eq!(tasks, vec!["Start"]);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].prompt.ends_with("achieve the following goal: Run a marathon"));
        assert_eq!(seen[0].max_tokens, 300);
    }

    #[tokio::test]
    async fn empty_completion_is_generation_failure() {
        let none = TaskGenerator::new(Arc::new(ScriptedProvider::replying(&[])));
        assert!(matches!(none.generate("x").await, Err(GenerationError::Empty)));

        let blank = TaskGenerator::new(Arc::new(ScriptedProvider::replying(&["  \n\n 3. "])));
        assert!(matches!(blank.generate("x").await, Err(GenerationError::Empty)));
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let generator = TaskGenerator::new(Arc::new(ScriptedProvider::failing(503)));
        assert!(matches!(
            generator.generate("x").await,
            Err(GenerationError::Provider(ProviderError::Status { status: 503, .. }))
        ));
    }
}
