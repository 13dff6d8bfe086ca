//! HTTP client for an Ollama host.
//!
//! Talks to `GET /api/tags` for the reachability probe and to `POST /api/chat`
//! for non-streaming chat turns. Every failure is mapped onto a distinct
//! [`Error`] variant so the caller can tell a dead host from a bad answer.

use std::time::Duration;

use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatModel, Turn};
use crate::config::OllamaConfig;
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    think: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    chat_timeout: Duration,
    probe_timeout: Duration,
    think: bool,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            chat_timeout: config.chat_timeout(),
            probe_timeout: config.probe_timeout(),
            think: config.think,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a request and returns the body of a 2xx answer.
    async fn fetch(&self, request: reqwest::RequestBuilder, timeout: Duration) -> Result<String> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_timeout() {
        Error::Timeout(timeout)
    } else {
        Error::Connectivity(err.to_string())
    }
}

impl ChatModel for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>> {
        let body = self
            .fetch(self.http.get(self.url("/api/tags")), self.probe_timeout)
            .await?;
        let tags: TagsResponse =
            serde_json::from_str(&body).map_err(|e| Error::MalformedResponse(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(&self, model: &str, transcript: &[Turn]) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: transcript,
            stream: false,
            think: self.think,
        };
        debug!("POST {} with {} messages", self.url("/api/chat"), transcript.len());
        let body = self
            .fetch(
                self.http.post(self.url("/api/chat")).json(&request),
                self.chat_timeout,
            )
            .await?;
        let response: ChatResponse =
            serde_json::from_str(&body).map_err(|e| Error::MalformedResponse(e.to_string()))?;
        Ok(response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Role;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serves one canned HTTP response and hands back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            tx.send(request).ok();
        });
        (base_url, rx)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client(base_url: &str) -> OllamaClient {
        let mut client = OllamaClient::new(&OllamaConfig {
            base_url: format!("{base_url}/"),
            chat_timeout_secs: 5,
            probe_timeout_secs: 5,
            ..Default::default()
        });
        // Ignore HTTP_PROXY and friends from the test environment
        client.http = Client::builder().no_proxy().build().unwrap();
        client
    }

    fn transcript() -> Vec<Turn> {
        vec![
            Turn {
                role: Role::System,
                content: "only JSON".to_string(),
            },
            Turn {
                role: Role::User,
                content: "open google".to_string(),
            },
        ]
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = client("http://localhost:11434");
        assert_eq!(client.base_url(), "http://localhost:11434");
        assert_eq!(client.url("/api/chat"), "http://localhost:11434/api/chat");
    }

    #[tokio::test]
    async fn test_list_models() {
        let (base_url, request) = serve_once(
            "200 OK",
            r#"{"models": [{"name": "llama3:latest", "size": 1}, {"name": "qwen2:7b"}]}"#,
        )
        .await;
        let models = client(&base_url).list_models().await.unwrap();
        assert_eq!(models, vec!["llama3:latest", "qwen2:7b"]);
        assert!(request.await.unwrap().starts_with("GET /api/tags "));
    }

    #[tokio::test]
    async fn test_chat_sends_full_transcript() {
        let (base_url, request) = serve_once(
            "200 OK",
            r#"{"model": "llama3", "message": {"role": "assistant", "content": "[]"}, "done": true}"#,
        )
        .await;
        let reply = client(&base_url)
            .chat("llama3", &transcript())
            .await
            .unwrap();
        assert_eq!(reply, "[]");

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /api/chat "));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["think"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "open google");
    }

    #[tokio::test]
    async fn test_non_2xx_is_status_error() {
        let (base_url, _request) =
            serve_once("404 Not Found", r#"{"error": "model 'x' not found"}"#).await;
        let err = client(&base_url).chat("x", &transcript()).await.unwrap_err();
        match err {
            Error::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("not found"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let (base_url, _request) = serve_once("200 OK", r#"{"done": true}"#).await;
        let err = client(&base_url)
            .chat("llama3", &transcript())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .list_models()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let mut client = client(&format!("http://{addr}"));
        client.probe_timeout = Duration::from_millis(200);
        let err = client.list_models().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
