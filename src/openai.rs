use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures_util::{Stream, StreamExt, stream};
use reqwest::{Client, RequestBuilder, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::sse::{SseDecoder, SseFrame};
use crate::transcript::ChatTurn;

/// Lazy, finite sequence of content fragments from one completion
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
}

#[derive(Deserialize, Default)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIModel {
    id: String,
}

#[derive(Deserialize)]
struct OpenAIModelList {
    data: Vec<OpenAIModel>,
}

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client; clones reuse one connection pool.
///
/// Only connecting is bounded. A completion may legitimately stream for minutes.
pub fn http_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            warn!("falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// Client for an OpenAI-compatible server such as LM Studio or llama.cpp
#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    base_url: String,
    api_key: String,
    list_timeout: Duration,
}

impl OpenAIClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_client(http_client(), base_url, api_key)
    }

    pub fn with_client(client: Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            list_timeout: MODEL_LIST_TIMEOUT,
        }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Local servers usually run without a key; only send one when we have it
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    /// Start a streaming completion over the whole conversation
    pub async fn stream_chat(&self, model: &str, messages: &[ChatTurn]) -> Result<FragmentStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = OpenAIRequest {
            model,
            messages,
            stream: true,
        };

        debug!(%url, model, turns = messages.len(), "sending chat completion request");
        let response = self
            .authorize(self.client.post(&url))
            .header(header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .with_context(|| format!("could not reach model server at {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Model server error {}: {}", status, text.trim()));
        }

        Ok(fragment_stream(response.bytes_stream()))
    }

    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);

        let response = self
            .authorize(self.client.get(&url))
            .timeout(self.list_timeout)
            .send()
            .await
            .with_context(|| format!("could not reach model server at {}", self.base_url))?;

        if !response.status().is_success() {
            return Err(anyhow!("Failed to list models: {}", response.status()));
        }

        let models: OpenAIModelList = response
            .json()
            .await
            .context("reading model list")?;
        Ok(models.data.into_iter().map(|model| model.id).collect())
    }
}

struct FragmentState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<Result<String>>,
    finished: bool,
}

impl<S> FragmentState<S> {
    fn absorb(&mut self, frames: impl IntoIterator<Item = SseFrame>) {
        for frame in frames {
            if self.finished {
                return;
            }
            if frame.is_done() {
                trace!("[DONE] received");
                self.finished = true;
                return;
            }

            let chunk: OpenAIStreamChunk = match frame.parse() {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("skipping frame: {:#}", e);
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                self.ready.push_back(Err(anyhow!("Model server error: {}", message)));
                self.finished = true;
                return;
            }

            if let Some(content) = chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
                self.ready.push_back(Ok(content));
            }
        }
    }
}

/// Turn a raw SSE response body into content fragments.
///
/// The sequence ends at `[DONE]`, at the end of the body, or right after the
/// first transport or server error.
pub fn fragment_stream<S, B, E>(body: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = FragmentState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.push(chunk.as_ref());
                    state.absorb(frames);
                }
                Some(Err(e)) => {
                    state.ready.push_back(Err(anyhow!("response stream interrupted: {}", e)));
                    state.finished = true;
                }
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn sse_body(fragments: &[&str]) -> String {
        let mut body = String::new();
        body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        for fragment in fragments {
            let chunk = json!({ "choices": [{ "index": 0, "delta": { "content": fragment } }] });
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn conversation() -> Vec<ChatTurn> {
        vec![ChatTurn::assistant("Hello! How are you?"), ChatTurn::user("Hi")]
    }

    async fn collect_ok(stream: FragmentStream) -> Vec<String> {
        stream.map(|item| item.unwrap()).collect().await
    }

    #[tokio::test]
    async fn streams_fragments_from_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("accept", "text/event-stream")
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::PartialJson(json!({
                "model": "test-model",
                "stream": true,
                "messages": [
                    { "role": "assistant", "content": "Hello! How are you?" },
                    { "role": "user", "content": "Hi" }
                ]
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_body(&["Hel", "lo!"]))
            .create_async()
            .await;

        let client = OpenAIClient::new(&format!("{}/v1/", server.url()), "");
        let stream = client.stream_chat("test-model", &conversation()).await.unwrap();
        let fragments = collect_ok(stream).await;

        assert_eq!(fragments.concat(), "Hello!");
        assert_eq!(fragments, vec!["Hel", "lo!"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_bearer_key_when_set() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-local")
            .with_status(200)
            .with_body(sse_body(&["ok"]))
            .create_async()
            .await;

        let client = OpenAIClient::new(&server.url(), "sk-local");
        let stream = client.stream_chat("m", &conversation()).await.unwrap();
        assert_eq!(collect_ok(stream).await, vec!["ok"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(404)
            .with_body("No models loaded")
            .create_async()
            .await;

        let client = OpenAIClient::new(&server.url(), "");
        let err = match client.stream_chat("m", &conversation()).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        let message = err.to_string();
        assert!(message.contains("404"), "{}", message);
        assert!(message.contains("No models loaded"), "{}", message);
    }

    #[tokio::test]
    async fn lists_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"object":"list","data":[{"id":"hermes-3-llama-3.1-8b"},{"id":"qwen2.5-7b"}]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new(&server.url(), "");
        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["hermes-3-llama-3.1-8b", "qwen2.5-7b"]);
    }

    /// Accepts connections and never answers
    async fn silent_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn model_listing_gives_up_on_a_silent_server() {
        let url = silent_server().await;
        let client = OpenAIClient::new(&url, "").with_list_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(5), client.list_models()).await;
        let listing = result.expect("listing should time out on its own");
        assert!(listing.is_err());
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> + Send + 'static {
        let owned: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn fragments_survive_arbitrary_chunking() {
        let body = sse_body(&["The ", "quick ", "fox"]);
        let parts: Vec<String> = body
            .as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();

        let fragments = collect_ok(fragment_stream(chunks(&parts))).await;
        assert_eq!(fragments, vec!["The ", "quick ", "fox"]);
    }

    #[tokio::test]
    async fn nothing_after_done_is_read() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\
                    data: [DONE]\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n";
        let fragments = collect_ok(fragment_stream(chunks(&[body]))).await;
        assert_eq!(fragments, vec!["a"]);
    }

    #[tokio::test]
    async fn body_without_done_ends_at_eof() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\
                    : comment\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"y\"}}]}";
        let fragments = collect_ok(fragment_stream(chunks(&[body]))).await;
        assert_eq!(fragments, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let body = "data: {oops\n\
                    data: {\"choices\":[]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"fine\"}}]}\n";
        let fragments = collect_ok(fragment_stream(chunks(&[body]))).await;
        assert_eq!(fragments, vec!["fine"]);
    }

    #[tokio::test]
    async fn in_stream_error_ends_the_sequence() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\
                    data: {\"error\":{\"message\":\"context length exceeded\"}}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"tial\"}}]}\n";
        let items: Vec<Result<String>> = fragment_stream(chunks(&[body])).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "par");
        let err = items[1].as_ref().unwrap_err().to_string();
        assert!(err.contains("context length exceeded"), "{}", err);
    }

    #[tokio::test]
    async fn transport_error_ends_the_sequence() {
        let items = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err("connection reset".to_string()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n".to_vec()),
        ];
        let items: Vec<Result<String>> = fragment_stream(stream::iter(items)).collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap_err().to_string().contains("connection reset"));
    }
}
