//! OpenAI-compatible chat-completions client backing the `Analyzer` seam.

use crate::analysis::{Analyzer, Decision, ThreadContext};
use crate::config::LlmConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DECISION_FORMAT: &str = r#"Respond with one JSON object and nothing else:
{"shouldJoin": <bool>, "topic": "<short topic, empty if none>", "createNew": <bool>, "replyInThreadId": "<thread uuid, omit if none>", "threadShouldEndId": "<thread uuid, omit if none>", "messageIds": [<0-based positions into the recent messages worth pulling into the thread>]}"#;

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl LlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone().unwrap_or_default(),
            config.model.clone(),
        )
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.7,
        };

        let mut builder = self.client.post(&url).json(&request);
        // No key header for local endpoints
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder
            .send()
            .await
            .map_err(|error| EngineError::LlmRequest(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::LlmRequest(format!("{status}: {body}")).into());
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|error| EngineError::MalformedResponse(error.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| EngineError::MalformedResponse("no choices in response".into()).into())
    }

    async fn decision(&self, system: String, user: String) -> Result<Decision> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let raw = self.chat(&messages).await?;
        let json = extract_json(&raw);
        serde_json::from_str(json)
            .map_err(|error| EngineError::MalformedResponse(format!("{error}: {raw}")).into())
    }
}

/// Pull a JSON object out of a raw completion, tolerating fenced or prosy
/// output.
fn extract_json(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let rest = &raw[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            return raw[start..=end].trim();
        }
    }
    raw.trim()
}

#[async_trait]
impl Analyzer for LlmClient {
    async fn analyze(&self, persona: &str, recent: &str) -> Result<Decision> {
        let system = format!(
            "{persona}\n\nYou are deciding whether to join the group conversation below without being addressed.\n{DECISION_FORMAT}"
        );
        let user = format!("Recent messages:\n{recent}");
        self.decision(system, user).await
    }

    async fn analyze_with_threads(
        &self,
        persona: &str,
        recent: &str,
        threads: &[ThreadContext],
    ) -> Result<Decision> {
        let system = format!(
            "{persona}\n\nDecide whether to reply in one of the active threads, open a new one, or stay silent. \
             Flag a thread that has run its course via threadShouldEndId.\n{DECISION_FORMAT}"
        );
        let mut user = String::from("Active threads:\n");
        for thread in threads {
            user.push_str(&format!(
                "--- thread {} (persona {})\n{}\n",
                thread.thread_id, thread.preference_key, thread.context_text
            ));
        }
        user.push_str(&format!("\nRecent messages (indexed):\n{recent}"));
        self.decision(system, user).await
    }

    async fn compose_reply(
        &self,
        persona: &str,
        context: &str,
        knowledge: &[String],
    ) -> Result<String> {
        let mut user = format!("Conversation so far:\n{context}\n");
        if !knowledge.is_empty() {
            user.push_str("\nRelevant knowledge:\n");
            for chunk in knowledge {
                user.push_str(&format!("- {chunk}\n"));
            }
        }
        user.push_str("\nWrite the bot's next message. Plain text only.");
        let messages = [ChatMessage::system(persona), ChatMessage::user(user)];
        self.chat(&messages)
            .await
            .map(|reply| reply.trim().to_string())
    }

    async fn summarize_segment(&self, segment: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(
                "Condense the chat transcript into one short paragraph, preserving names, \
                 decisions, and open questions.",
            ),
            ChatMessage::user(segment),
        ];
        self.chat(&messages)
            .await
            .map(|summary| summary.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::extract_json;

    #[test]
    fn extracts_from_json_fence() {
        let raw = "Sure!\n```json\n{\"shouldJoin\": true}\n```\n";
        assert_eq!(extract_json(raw), "{\"shouldJoin\": true}");
    }

    #[test]
    fn extracts_braced_object_from_prose() {
        let raw = "Here you go: {\"shouldJoin\": false} hope that helps";
        assert_eq!(extract_json(raw), "{\"shouldJoin\": false}");
    }

    #[test]
    fn passes_plain_json_through() {
        assert_eq!(extract_json("{\"a\":1}"), "{\"a\":1}");
    }
}
