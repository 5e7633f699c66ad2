//! Telegram Bot API transport.

use super::AlertTransport;
use crate::config::{NotifierConf, TelegramConf};
use crate::error::NotifyError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramTransport {
    pub fn new(telegram: &TelegramConf, notifier: &NotifierConf) -> Result<Self, NotifyError> {
        let timeout = Duration::from_secs(notifier.request_timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: send_message_url(&telegram.api_base, &telegram.bot_token),
            chat_id: telegram.chat_id.clone(),
        })
    }
}

/// `<api_base>/bot<token>/sendMessage`
pub fn send_message_url(api_base: &str, bot_token: &str) -> String {
    format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), bot_token)
}

fn request_body(chat_id: &str, text: &str) -> Result<Vec<u8>, NotifyError> {
    serde_json::to_vec(&SendMessageBody { chat_id, text }).map_err(|e| NotifyError::Request(e.to_string()))
}

/// Maps a non-success status onto the retry classes
fn classify_status(status: StatusCode) -> NotifyError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        NotifyError::Transient(format!("status {status}"))
    } else {
        NotifyError::Rejected {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        }
    }
}

fn classify_error(err: reqwest::Error) -> NotifyError {
    if err.is_timeout() {
        NotifyError::Timeout(err.to_string())
    } else if err.is_connect() {
        NotifyError::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else {
        NotifyError::Request(err.to_string())
    }
}

#[async_trait]
impl AlertTransport for TelegramTransport {
    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        let body = request_body(&self.chat_id, text)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if status.is_success() {
            // Body is not needed once the status confirms delivery.
            Ok(())
        } else {
            Err(classify_status(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        assert_eq!(
            send_message_url("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn test_body_is_fully_escaped() {
        let body = request_body("-100200", "ALERT\n Message: \"quoted\" \\ path").unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["chat_id"], "-100200");
        assert_eq!(parsed["text"], "ALERT\n Message: \"quoted\" \\ path");
    }

    #[test]
    fn test_status_classes() {
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST).is_retryable());
        assert!(!classify_status(StatusCode::FORBIDDEN).is_retryable());
    }
}
