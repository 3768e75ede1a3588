use async_trait::async_trait;
use reqwest::Client;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::core::engine::{Engine, EngineMetrics, FragmentStream};
use crate::core::error::EngineError;
use crate::core::session::SessionConfig;
use crate::engine::gguf;

/// Sampling values sent with every completion request
#[derive(Debug, Clone, Copy)]
struct RequestParams {
    temperature: f32,
    min_p: f32,
    cache_prompt: bool,
}

/// Drives a local llama.cpp server (`llama-server`) through its native
/// `/completion` endpoint.
pub struct LlamaServerEngine {
    client: Client,
    base_url: String,
    params: RwLock<Option<RequestParams>>,
    metrics: Arc<Mutex<EngineMetrics>>,
}

impl LlamaServerEngine {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            params: RwLock::new(None),
            metrics: Arc::new(Mutex::new(EngineMetrics::default())),
        })
    }

    fn current_params(&self) -> Option<RequestParams> {
        self.params.read().ok().and_then(|p| *p)
    }
}

#[async_trait]
impl Engine for LlamaServerEngine {
    async fn load(&self, config: &SessionConfig) -> Result<(), EngineError> {
        gguf::check_magic(&config.model_path).map_err(|e| EngineError::Load(e.to_string()))?;

        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| EngineError::Load(format!("server unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(EngineError::Load(format!(
                "server not ready (HTTP {})",
                resp.status().as_u16()
            )));
        }

        // The server fixes these at startup; they are only checked against what it runs with.
        tracing::debug!(
            model = %config.model_path.display(),
            context_size = config.context_size,
            threads = config.thread_count,
            mmap = config.use_memory_map,
            mlock = config.use_memory_lock,
            "llama-server ready"
        );

        if let Ok(mut params) = self.params.write() {
            *params = Some(RequestParams {
                temperature: config.temperature,
                min_p: config.min_p,
                cache_prompt: config.store_history,
            });
        }
        Ok(())
    }

    fn generate(&self, prompt: String) -> FragmentStream {
        let params = self.current_params();
        let client = self.client.clone();
        let url = format!("{}/completion", self.base_url);
        let metrics = Arc::clone(&self.metrics);

        let stream = async_stream::stream! {
            use tokio_stream::StreamExt;

            let resp = match params {
                None => {
                    yield Err(EngineError::NotLoaded);
                    None
                }
                Some(params) => {
                    let body = serde_json::json!({
                        "prompt": prompt,
                        "stream": true,
                        "temperature": params.temperature,
                        "min_p": params.min_p,
                        "cache_prompt": params.cache_prompt,
                    });
                    match send_completion(&client, &url, &body).await {
                        Ok(resp) => Some(resp),
                        Err(e) => {
                            yield Err(e);
                            None
                        }
                    }
                }
            };

            if let Some(resp) = resp {
                let mut byte_stream = Box::pin(resp.bytes_stream());
                let mut buffer: Vec<u8> = Vec::new();
                let mut stopped = false;

                'chunks: while let Some(chunk) = byte_stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            yield Err(EngineError::Stream(e.to_string()));
                            break;
                        }
                    };

                    buffer.extend_from_slice(&chunk);

                    while let Some(line) = take_line(&mut buffer) {
                        let line = match line {
                            Ok(l) => l,
                            Err(e) => {
                                yield Err(e);
                                break 'chunks;
                            }
                        };

                        let data = match line.strip_prefix("data:") {
                            Some(d) => d.trim(),
                            None => continue,
                        };

                        let json: serde_json::Value = match serde_json::from_str(data) {
                            Ok(j) => j,
                            Err(_) => continue,
                        };

                        if let Some(text) = json["content"].as_str() {
                            if !text.is_empty() {
                                yield Ok(text.to_string());
                            }
                        }

                        if json["stop"].as_bool().unwrap_or(false) {
                            let tokens_per_second = json["timings"]["predicted_per_second"]
                                .as_f64()
                                .unwrap_or(0.0) as f32;
                            let context_tokens_used = json["tokens_evaluated"].as_u64().unwrap_or(0)
                                + json["tokens_predicted"].as_u64().unwrap_or(0);
                            if let Ok(mut m) = metrics.lock() {
                                *m = EngineMetrics {
                                    tokens_per_second,
                                    context_tokens_used,
                                };
                            }
                            stopped = true;
                        }
                    }

                    if stopped {
                        break;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    fn metrics(&self) -> EngineMetrics {
        self.metrics.lock().map(|m| *m).unwrap_or_default()
    }

    fn unload(&self) {
        if let Ok(mut params) = self.params.write() {
            *params = None;
        }
    }

    fn name(&self) -> &str {
        "llama-server"
    }
}

/// Splits the next complete line off `buffer`. Lines are decoded only once
/// whole, so a character split across network chunks survives.
fn take_line(buffer: &mut Vec<u8>) -> Option<Result<String, EngineError>> {
    let line_end = buffer.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=line_end).collect();
    Some(
        String::from_utf8(line)
            .map(|l| l.trim().to_string())
            .map_err(|e| EngineError::Stream(format!("invalid UTF-8 in stream: {e}"))),
    )
}

async fn send_completion(
    client: &Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<reqwest::Response, EngineError> {
    let resp = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| EngineError::Http(e.to_string()))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        return Err(EngineError::Http(format!("HTTP {status}: {text}")));
    }
    Ok(resp)
}
