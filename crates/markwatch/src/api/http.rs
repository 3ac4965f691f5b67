//! reqwest-backed implementation of [`DetectionService`].

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::types::{DetectionPayload, HistoryResponse, TaskStatusResponse, TaskSubmitResponse};
use super::DetectionService;
use crate::config::ClientConfig;
use crate::error::{ConfigError, DetectError};

/// Maximum length of an error body kept in messages, to prevent log flooding.
const MAX_ERROR_BODY_LENGTH: usize = 200;

pub struct HttpDetectionService {
    client: Client,
    base_url: String,
    credential: Option<SecretString>,
}

impl HttpDetectionService {
    pub fn new(config: &ClientConfig, credential: Option<SecretString>) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, DetectError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| DetectError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = error_message_from_body(&body);
        debug!("Detection service returned {}: {}", status, message);
        Err(DetectError::from_status(status, message))
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, DetectError> {
        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                DetectError::MalformedResponse(e.to_string())
            } else {
                DetectError::Transport(e.to_string())
            }
        })
    }
}

fn file_part(name: &str, bytes: Vec<u8>, mime: Option<&str>) -> Result<Part, DetectError> {
    let part = Part::bytes(bytes).file_name(name.to_string());
    match mime {
        Some(mime) => part
            .mime_str(mime)
            .map_err(|e| DetectError::MalformedResponse(format!("invalid MIME type: {}", e))),
        None => Ok(part),
    }
}

fn payload_part(payload: &DetectionPayload) -> Result<Part, DetectError> {
    match payload {
        DetectionPayload::File { name, bytes, mime } => file_part(name, bytes.clone(), mime.as_deref()),
        DetectionPayload::Text { content } => file_part(
            &payload.display_name(),
            content.as_bytes().to_vec(),
            payload.mime_type(),
        ),
    }
}

/// Extracts a human-readable message from an error response body.
fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "message", "error_message", "error"] {
            match value.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Null) | None => {}
                Some(other) => return truncate(&other.to_string()),
            }
        }
    }
    truncate(body.trim())
}

fn truncate(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated)", &body[..end])
    } else {
        body.to_string()
    }
}

#[async_trait]
impl DetectionService for HttpDetectionService {
    async fn submit_async_task(
        &self,
        payload: &DetectionPayload,
    ) -> Result<TaskSubmitResponse, DetectError> {
        let form = Form::new()
            .part("file", payload_part(payload)?)
            .text("task_type", payload.task_type().to_string());

        let response = self
            .send(self.client.post(self.url("detect/async")).multipart(form))
            .await?;
        Self::json(response).await
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatusResponse, DetectError> {
        let response = self
            .send(self.client.get(self.url(&format!("tasks/{}/status", task_id))))
            .await?;
        Self::json(response).await
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), DetectError> {
        self.send(self.client.post(self.url(&format!("tasks/{}/cancel", task_id))))
            .await?;
        Ok(())
    }

    async fn detect_sync(&self, payload: &DetectionPayload) -> Result<Value, DetectError> {
        let request = match payload {
            DetectionPayload::Text { content } => self
                .client
                .post(self.url("detect/text"))
                .json(&json!({ "text": content })),
            DetectionPayload::File { .. } => {
                let form = Form::new().part("image", payload_part(payload)?);
                self.client.post(self.url("detect")).multipart(form)
            }
        };

        let response = self.send(request).await?;
        Self::json(response).await
    }

    async fn fetch_history(&self, limit: usize) -> Result<HistoryResponse, DetectError> {
        let response = self
            .send(
                self.client
                    .get(self.url("detection/my-records"))
                    .query(&[("limit", limit)]),
            )
            .await?;
        let history: HistoryResponse = Self::json(response).await?;
        if history.records.len() > limit {
            warn!(
                "Service returned {} history records for limit {}",
                history.records.len(),
                limit
            );
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let config = ClientConfig {
            api_base_url: "https://detect.example.com/api/".to_string(),
            ..Default::default()
        };
        let service = HttpDetectionService::new(&config, None).unwrap();
        assert_eq!(service.base_url(), "https://detect.example.com/api");
        assert_eq!(
            service.url("/tasks/t1/status"),
            "https://detect.example.com/api/tasks/t1/status"
        );
    }

    #[test]
    fn test_error_message_from_detail() {
        let body = r#"{"detail":"Your detection quota is used up (20/20)"}"#;
        assert_eq!(
            error_message_from_body(body),
            "Your detection quota is used up (20/20)"
        );
    }

    #[test]
    fn test_error_message_from_structured_detail() {
        let body = r#"{"detail":[{"loc":["body","text"],"msg":"field required"}]}"#;
        assert!(error_message_from_body(body).contains("field required"));
    }

    #[test]
    fn test_error_message_from_plain_body_is_truncated() {
        let body = "x".repeat(500);
        let message = error_message_from_body(&body);
        assert!(message.ends_with("... (truncated)"));
        assert!(message.len() < 300);
    }

    #[test]
    fn test_payload_part_for_text() {
        assert!(payload_part(&DetectionPayload::text("hello")).is_ok());
        assert!(payload_part(&DetectionPayload::file("a.png", vec![1, 2, 3])).is_ok());
    }
}
