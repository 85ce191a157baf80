//! Delivery of monitor alerts.

use crate::utils::{NetworkError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, message: &str, cancel: &CancellationToken) -> Result<()>;
}

/// POSTs `{"text": message}` to a webhook URL (Slack/Mattermost style).
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    url: reqwest::Url,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| NetworkError::Configuration(format!("invalid webhook URL {}: {}", url, e)))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url,
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, message: &str, cancel: &CancellationToken) -> Result<()> {
        let request = self
            .client
            .post(self.url.clone())
            .timeout(self.timeout)
            .json(&serde_json::json!({ "text": message }))
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
            response = request => response,
        };

        response
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| NetworkError::Notification(e.to_string()))
    }
}

/// Hands each message to a caller-supplied function.
pub struct CallbackSender<F> {
    callback: F,
}

impl<F> CallbackSender<F>
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> NotificationSender for CallbackSender<F>
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    async fn send(&self, message: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }
        (self.callback)(message)
    }
}

/// Writes messages to the log at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, message: &str, _cancel: &CancellationToken) -> Result<()> {
        log::warn!("{}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Reads one request and answers with `status`. Returns the raw request.
    async fn webhook_stub(status: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if n == 0 || text.ends_with('}') {
                    break;
                }
            }
            let reply = format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn webhook_posts_text_payload() {
        let (url, server) = webhook_stub("200 OK").await;
        WebhookSender::new(&url)
            .unwrap()
            .send("records changed", &CancellationToken::new())
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.ends_with(r#"{"text":"records changed"}"#));
    }

    #[tokio::test]
    async fn webhook_error_status_is_a_notification_error() {
        let (url, _server) = webhook_stub("500 Internal Server Error").await;
        let err = WebhookSender::new(&url)
            .unwrap()
            .send("x", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Notification(_)));
    }

    #[test]
    fn invalid_webhook_url_is_rejected() {
        assert!(matches!(WebhookSender::new("not a url"), Err(NetworkError::Configuration(_))));
    }

    #[tokio::test]
    async fn callback_receives_message() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sender = CallbackSender::new(move |message: &str| {
            sink.lock().unwrap().push(message.to_string());
            Ok(())
        });

        sender.send("hello", &CancellationToken::new()).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }
}
