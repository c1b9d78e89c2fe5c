use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{GenerationOptions, OllamaSettings};
use crate::engine::InferenceBackend;
use crate::error::CallFailure;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: RequestOptions,
}

#[derive(Serialize)]
struct RequestOptions {
    temperature: f64,
    top_p: f64,
    num_predict: u32,
}

#[derive(Serialize)]
struct NameRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// Counters reported by the server for one non-streaming generation.
/// Durations are nanoseconds; missing fields count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateStats {
    #[serde(default)]
    pub prompt_eval_count: u64,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_count: u64,
    #[serde(default)]
    pub eval_duration: u64,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledModel {
    pub name: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<InstalledModel>>,
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    control_timeout: Duration,
    options: GenerationOptions,
}

impl OllamaClient {
    pub fn new(settings: &OllamaSettings, options: GenerationOptions) -> Result<Self, CallFailure> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            control_timeout: Duration::from_secs(settings.timeout_seconds.max(1)),
            options,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /api/version`. Bounded by the control-plane timeout.
    pub async fn version(&self) -> Result<String, CallFailure> {
        let resp = self
            .client
            .get(self.url("/api/version"))
            .timeout(self.control_timeout)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let data: VersionResponse = resp.json().await?;
        Ok(data.version)
    }

    /// Poll the version endpoint until it answers or `retries` attempts are spent.
    pub async fn wait_until_ready(&self, retries: u32, delay: Duration) -> bool {
        let attempts = retries.max(1);
        for attempt in 1..=attempts {
            match self.version().await {
                Ok(v) => {
                    log::debug!("[ollama] server ready (version {})", v);
                    return true;
                }
                Err(e) => {
                    log::debug!("[ollama] not ready (attempt {}/{}): {}", attempt, attempts, e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    /// `POST /api/show`: any 2xx means the model is installed.
    pub async fn show_model(&self, name: &str) -> Result<bool, CallFailure> {
        let resp = self
            .client
            .post(self.url("/api/show"))
            .timeout(self.control_timeout)
            .json(&NameRequest { name, stream: None })
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// `POST /api/pull` with `stream: false`; returns once the download finished.
    pub async fn pull_model(&self, name: &str) -> Result<(), CallFailure> {
        log::info!("[ollama] pulling {}", name);
        let resp = self
            .client
            .post(self.url("/api/pull"))
            .json(&NameRequest {
                name,
                stream: Some(false),
            })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let _: serde_json::Value = resp.json().await?;
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<InstalledModel>, CallFailure> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .timeout(self.control_timeout)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let data: TagsResponse = resp.json().await?;
        Ok(data.models.unwrap_or_default())
    }

    /// Non-streaming `POST /api/generate`. No client-side timeout here; the
    /// engine bounds each call.
    pub async fn generate_stats(&self, model: &str, prompt: &str) -> Result<GenerateStats, CallFailure> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: RequestOptions {
                temperature: self.options.temperature,
                top_p: self.options.top_p,
                num_predict: self.options.num_predict,
            },
        };
        let resp = self
            .client
            .post(self.url("/api/generate"))
            .json(&request)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body = resp.text().await?;
        parse_generate_response(&body)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, CallFailure> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(CallFailure::Status {
        status,
        body: body.chars().take(200).collect(),
    })
}

fn parse_generate_response(body: &str) -> Result<GenerateStats, CallFailure> {
    let value: serde_json::Value =
        serde_json::from_str(body.trim()).map_err(|e| CallFailure::Malformed(e.to_string()))?;
    if let Some(err) = value.get("error").and_then(|v| v.as_str()) {
        return Err(CallFailure::Malformed(format!("server error: {}", err)));
    }
    serde_json::from_value(value).map_err(|e| CallFailure::Malformed(e.to_string()))
}

impl InferenceBackend for OllamaClient {
    async fn model_exists(&self, model: &str) -> Result<bool, CallFailure> {
        self.show_model(model).await
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<GenerateStats, CallFailure> {
        self.generate_stats(model, prompt).await
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // ── response parsing ──

    #[test]
    fn test_parse_generate_response_full() {
        let body = r#"{
            "model": "phi3:3.8b",
            "created_at": "2024-01-01T00:00:00Z",
            "response": "hello",
            "done": true,
            "prompt_eval_count": 12,
            "prompt_eval_duration": 150000000,
            "eval_count": 40,
            "eval_duration": 2000000000
        }"#;
        let stats = parse_generate_response(body).unwrap();
        assert_eq!(
            stats,
            GenerateStats {
                prompt_eval_count: 12,
                prompt_eval_duration: 150_000_000,
                eval_count: 40,
                eval_duration: 2_000_000_000,
            }
        );
    }

    #[test]
    fn test_parse_generate_response_missing_counters() {
        let stats = parse_generate_response(r#"{"response":"", "done": true}"#).unwrap();
        assert_eq!(stats, GenerateStats::default());
    }

    #[test]
    fn test_parse_generate_response_malformed() {
        assert!(matches!(
            parse_generate_response("not json"),
            Err(CallFailure::Malformed(_))
        ));
        assert!(matches!(
            parse_generate_response(r#"{"error":"model not found"}"#),
            Err(CallFailure::Malformed(_))
        ));
    }

    // ── request shape ──

    #[test]
    fn test_generate_request_wire_format() {
        let req = GenerateRequest {
            model: "m",
            prompt: "p",
            stream: false,
            options: RequestOptions {
                temperature: 0.7,
                top_p: 0.9,
                num_predict: 256,
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["stream"], false);
        assert_eq!(v["options"]["top_p"], 0.9);
        assert_eq!(v["options"]["num_predict"], 256);
    }

    #[test]
    fn test_pull_request_sets_stream_false() {
        let v = serde_json::to_value(NameRequest { name: "m", stream: Some(false) }).unwrap();
        assert_eq!(v, serde_json::json!({ "name": "m", "stream": false }));
        let v = serde_json::to_value(NameRequest { name: "m", stream: None }).unwrap();
        assert_eq!(v, serde_json::json!({ "name": "m" }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let settings = OllamaSettings {
            base_url: "http://localhost:11434/".into(),
            ..Default::default()
        };
        let client = OllamaClient::new(&settings, GenerationOptions::default()).unwrap();
        assert_eq!(client.url("/api/show"), "http://localhost:11434/api/show");
    }

    // ── wire behaviour ──

    /// Answers exactly one request with `status` and `body`; the join handle
    /// yields the raw request text.
    async fn respond_once(status: &'static str, body: &'static str) -> (OllamaClient, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            request
        });
        let settings = OllamaSettings {
            base_url: format!("http://{}", addr),
            timeout_seconds: 5,
            retries: 1,
        };
        (OllamaClient::new(&settings, GenerationOptions::default()).unwrap(), handle)
    }

    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn request_body(request: &str) -> serde_json::Value {
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_show_non_success_means_absent() {
        let (client, server) = respond_once("404 Not Found", r#"{"error":"model 'x' not found"}"#).await;
        assert_eq!(client.model_exists("x").await, Ok(false));
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/show "));
        assert_eq!(request_body(&request), serde_json::json!({ "name": "x" }));
    }

    #[tokio::test]
    async fn test_show_success_means_present() {
        let (client, server) = respond_once("200 OK", r#"{"modelfile":"FROM x"}"#).await;
        assert_eq!(client.model_exists("phi3:3.8b").await, Ok(true));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_error_status() {
        let (client, server) = respond_once("500 Internal Server Error", r#"{"error":"out of memory"}"#).await;
        match client.generate("m", "hi").await {
            Err(CallFailure::Status { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.contains("out of memory"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_success_parses_counters() {
        let body = r#"{"model":"m","response":"ok","done":true,"prompt_eval_count":4,"prompt_eval_duration":30000000,"eval_count":10,"eval_duration":500000000}"#;
        let (client, server) = respond_once("200 OK", body).await;
        let stats = client.generate("m", "hi").await.unwrap();
        assert_eq!(stats.eval_count, 10);
        assert_eq!(stats.eval_duration, 500_000_000);
        assert_eq!(stats.prompt_eval_count, 4);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/generate "));
        let sent = request_body(&request);
        assert_eq!(sent["model"], "m");
        assert_eq!(sent["prompt"], "hi");
        assert_eq!(sent["stream"], false);
        assert_eq!(sent["options"]["num_predict"], 256);
    }

    #[tokio::test]
    async fn test_pull_posts_stream_false() {
        let (client, server) = respond_once("200 OK", r#"{"status":"success"}"#).await;
        client.pull_model("gemma:2b").await.unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/pull "));
        assert_eq!(request_body(&request), serde_json::json!({ "name": "gemma:2b", "stream": false }));
    }

    #[tokio::test]
    async fn test_list_models_from_tags() {
        let body = r#"{"models":[{"name":"phi3:3.8b","modified_at":"2024-05-01T10:00:00Z","size":2176178913}]}"#;
        let (client, server) = respond_once("200 OK", body).await;
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "phi3:3.8b");
        assert_eq!(models[0].size, 2_176_178_913);
        assert!(server.await.unwrap().starts_with("GET /api/tags "));
    }

    #[tokio::test]
    async fn test_version_unreachable_is_network_failure() {
        // Port 9 (discard) is closed on test hosts.
        let settings = OllamaSettings {
            base_url: "http://127.0.0.1:9".into(),
            timeout_seconds: 1,
            retries: 1,
        };
        let client = OllamaClient::new(&settings, GenerationOptions::default()).unwrap();
        assert!(matches!(client.version().await, Err(CallFailure::Network(_))));
        assert!(!client.wait_until_ready(1, Duration::from_millis(1)).await);
    }
}
