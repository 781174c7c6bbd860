use std::fmt::Display;
use std::pin::{pin, Pin};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use carbonex_core::config::{LlmConfig, LlmProvider};
use carbonex_core::errors::CollaboratorError;

/// Incremental completion output. Items after an `Err` are never produced.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, CollaboratorError>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, system: Option<&str>)
        -> Result<String, CollaboratorError>;

    async fn complete_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, CollaboratorError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Client for any OpenAI-compatible HTTP API (OpenAI itself, or Ollama's
/// `/v1` endpoints).
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    embedding_model: String,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CollaboratorError::Completion(error.to_string()))?;

        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => "http://localhost:11434/v1".to_string(),
        };

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.post(format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn chat_body(&self, prompt: &str, system: Option<&str>, stream: bool) -> serde_json::Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));
        json!({"model": self.model, "messages": messages, "stream": stream})
    }

    /// Sends a JSON request, retrying transport failures and 5xx responses.
    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, String> {
        let mut attempt = 0;
        loop {
            let outcome = self.request(path).json(body).send().await;
            let retryable = match &outcome {
                Ok(response) => response.status().is_server_error(),
                Err(error) => !error.is_builder(),
            };
            if !retryable || attempt >= self.max_retries {
                return match outcome {
                    Ok(response) if response.status().is_success() => Ok(response),
                    Ok(response) => {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        Err(format!("{path} returned {status}: {}", truncate(&text, 200)))
                    }
                    Err(error) => Err(error.to_string()),
                };
            }
            attempt += 1;
            warn!(
                event_name = "agent.llm.retry",
                path,
                attempt,
                "retrying completion service request"
            );
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        let body = self.chat_body(prompt, system, false);
        let response = self
            .post_json("/chat/completions", &body)
            .await
            .map_err(CollaboratorError::Completion)?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| CollaboratorError::Completion(error.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CollaboratorError::Completion("response had no content".to_string()))
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, CollaboratorError> {
        let body = self.chat_body(prompt, system, true);
        let response = self
            .request("/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|error| CollaboratorError::Completion(error.to_string()))?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Completion(format!(
                "/chat/completions returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(forward_fragments(response.bytes_stream(), tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let body = json!({"model": self.embedding_model, "input": text});
        let response =
            self.post_json("/embeddings", &body).await.map_err(CollaboratorError::Embedding)?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| CollaboratorError::Embedding(error.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| CollaboratorError::Embedding("response had no embedding".to_string()))
    }
}

type FragmentSender = mpsc::Sender<Result<String, CollaboratorError>>;

/// Pumps an event-stream body into `tx` until `[DONE]`. A body that ends
/// without the marker is reported as a failure so a cut-off answer never
/// passes for a complete one.
async fn forward_fragments<S, B, E>(body: S, tx: FragmentSender)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = pin!(body);
    let mut lines = LineDecoder::default();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(error) => {
                let _ = tx.send(Err(CollaboratorError::Completion(error.to_string()))).await;
                return;
            }
        };
        for line in lines.push(chunk.as_ref()) {
            if !forward_line(&line, &tx).await {
                return;
            }
        }
    }
    if let Some(line) = lines.finish() {
        if !forward_line(&line, &tx).await {
            return;
        }
    }

    let truncated = CollaboratorError::Completion("stream ended before [DONE]".to_string());
    let _ = tx.send(Err(truncated)).await;
}

/// Returns `false` once nothing more should be forwarded.
async fn forward_line(line: &str, tx: &FragmentSender) -> bool {
    match parse_stream_line(line) {
        StreamLine::Fragment(text) => tx.send(Ok(text)).await.is_ok(),
        StreamLine::Skip => true,
        StreamLine::Done => false,
        StreamLine::Malformed(reason) => {
            let _ = tx.send(Err(CollaboratorError::Completion(reason))).await;
            false
        }
    }
}

/// Splits raw body bytes into lines. A line is decoded only once its
/// newline has arrived, so characters split across chunks stay intact.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line[..end]).into_owned());
        }
        lines
    }

    /// The unterminated tail, if any.
    pub(crate) fn finish(self) -> Option<String> {
        (!self.pending.is_empty()).then(|| String::from_utf8_lossy(&self.pending).into_owned())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StreamLine {
    Fragment(String),
    Done,
    Skip,
    Malformed(String),
}

/// Interprets one line of an OpenAI-style `text/event-stream` body.
pub(crate) fn parse_stream_line(line: &str) -> StreamLine {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamLine::Fragment)
            .unwrap_or(StreamLine::Skip),
        Err(error) => StreamLine::Malformed(format!("unparseable stream chunk: {error}")),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use carbonex_core::config::{AppConfig, LlmProvider};
    use carbonex_core::errors::CollaboratorError;
    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::{forward_fragments, parse_stream_line, LineDecoder, OpenAiClient, StreamLine};

    async fn forwarded(chunks: Vec<Vec<u8>>) -> Vec<Result<String, CollaboratorError>> {
        let (tx, mut rx) = mpsc::channel(16);
        forward_fragments(stream::iter(chunks.into_iter().map(Ok::<_, String>)), tx).await;
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[test]
    fn parses_content_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_stream_line(line), StreamLine::Fragment("Hel".to_string()));
    }

    #[test]
    fn done_marker_and_role_only_deltas() {
        assert_eq!(parse_stream_line("data: [DONE]"), StreamLine::Done);
        assert_eq!(
            parse_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            StreamLine::Skip
        );
        assert_eq!(parse_stream_line(": keep-alive"), StreamLine::Skip);
        assert_eq!(parse_stream_line(""), StreamLine::Skip);
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(parse_stream_line("data: {not json"), StreamLine::Malformed(_)));
    }

    #[test]
    fn line_decoder_keeps_split_characters_whole() {
        let text = "data: 10 m\u{b3} water\n".as_bytes();
        let split = text.iter().position(|byte| *byte == 0xC2).expect("lead byte") + 1;

        let mut decoder = LineDecoder::default();
        assert!(decoder.push(&text[..split]).is_empty());
        assert_eq!(decoder.push(&text[split..]), vec!["data: 10 m\u{b3} water".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn fragments_survive_chunk_boundaries_inside_a_character() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"10 m\u{b3} water\"}}]}\n\n\
                    data: [DONE]\n"
            .as_bytes();
        let split = body.iter().position(|byte| *byte == 0xC2).expect("lead byte") + 1;

        let items = forwarded(vec![body[..split].to_vec(), body[split..].to_vec()]).await;

        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(text) if text == "10 m\u{b3} water"));
    }

    #[tokio::test]
    async fn body_without_done_marker_ends_in_an_error() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Partial\"}}]}\n".as_bytes();

        let items = forwarded(vec![body.to_vec()]).await;

        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(text) if text == "Partial"));
        assert!(matches!(
            &items[1],
            Err(CollaboratorError::Completion(message)) if message.contains("before [DONE]")
        ));
    }

    #[tokio::test]
    async fn unterminated_done_marker_still_completes() {
        let items = forwarded(vec![b"data: [DONE]".to_vec()]).await;
        assert!(items.is_empty());
    }

    #[test]
    fn base_url_defaults_follow_provider() {
        let mut config = AppConfig::default().llm;
        let client = OpenAiClient::from_config(&config).expect("client");
        assert_eq!(client.base_url, "https://api.openai.com/v1");

        config.provider = LlmProvider::Ollama;
        config.base_url = Some("http://gpu-box:11434/v1/".to_string());
        let client = OpenAiClient::from_config(&config).expect("client");
        assert_eq!(client.base_url, "http://gpu-box:11434/v1");
    }
}
