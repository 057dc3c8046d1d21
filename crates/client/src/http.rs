use std::path::Path;

use futures::StreamExt;
use reqwest::Url;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::backend::{
    BoxFuture, ChatBackend, ChatRequest, ChatStreamHandle, ClientConfig, StreamEventMapped,
    StreamEventPayload, StreamWorker, make_event_stream,
};
use crate::error::{
    BuildHttpClientSnafu, ClientError, ClientResult, DecodeResponseSnafu, EmptyQuerySnafu,
    ReadUploadFileSnafu, StatusSnafu, TransportSnafu, UploadSnafu,
};
use crate::ids::StreamTarget;
use crate::stream::{PumpOutcome, event_stream, pump_events};
use crate::types::{ChatBody, HealthReport, StatusReport, UploadReport};

pub const HTTP_BACKEND_ID: &str = "http";

#[derive(Debug, Clone)]
struct Endpoints {
    chat: Url,
    upload: Url,
    status: Url,
    health: Url,
}

impl Endpoints {
    fn resolve(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self {
            chat: Self::join(&config.base_url, &config.chat_path)?,
            upload: Self::join(&config.base_url, &config.upload_path)?,
            status: Self::join(&config.base_url, &config.status_path)?,
            health: Self::join(&config.base_url, &config.health_path)?,
        })
    }

    fn join(base_url: &str, path: &str) -> ClientResult<Url> {
        let path = path.trim();
        let raw = if path.starts_with('/') {
            format!("{base_url}{path}")
        } else {
            format!("{base_url}/{path}")
        };

        Url::parse(&raw).map_err(|source| ClientError::InvalidEndpoint {
            stage: "resolve-endpoint",
            raw,
            message: source.to_string(),
        })
    }
}

/// [`ChatBackend`] speaking to the chat server over HTTP.
pub struct HttpChatBackend {
    config: ClientConfig,
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpChatBackend {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let endpoints = Endpoints::resolve(&config)?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().context(BuildHttpClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self {
            config,
            http,
            endpoints,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn open_stream(
        http: &reqwest::Client,
        url: Url,
        query: &str,
    ) -> ClientResult<reqwest::Response> {
        let response = http
            .post(url)
            .json(&ChatBody { query })
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-chat-request",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu {
                stage: "chat-http-status",
                endpoint: "chat",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    async fn run_stream_worker(
        http: reqwest::Client,
        url: Url,
        request: ChatRequest,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;

        let opened = tokio::select! {
            biased;
            _ = &mut cancel_rx => {
                tracing::debug!(target = ?target, "chat request cancelled before response");
                return;
            }
            opened = Self::open_stream(&http, url, &request.query) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    error = %error,
                    "failed to open chat stream"
                );
                Self::emit_failure(&event_tx, target, &error);
                return;
            }
        };

        let events = event_stream(response.bytes_stream()).map(|item| {
            item.context(TransportSnafu {
                stage: "read-chat-body",
            })
        });

        match pump_events(target, events, &event_tx, &mut cancel_rx).await {
            PumpOutcome::Terminal | PumpOutcome::Exhausted => {
                tracing::debug!(target = ?target, "chat stream finished");
            }
            PumpOutcome::Failed => {}
            PumpOutcome::Cancelled | PumpOutcome::Abandoned => {
                tracing::debug!(target = ?target, "chat stream released before completion");
            }
        }
    }

    fn emit_failure(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: &ClientError,
    ) {
        let _ = event_tx.send(StreamEventMapped {
            target,
            payload: StreamEventPayload::Failed(error.to_string()),
        });
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        endpoint: &'static str,
    ) -> ClientResult<T> {
        let response = self.http.get(url).send().await.context(TransportSnafu {
            stage: "send-get-request",
        })?;

        let status = response.status();
        let body = response.text().await.context(TransportSnafu {
            stage: "read-get-response",
        })?;

        ensure!(
            status.is_success(),
            StatusSnafu {
                stage: "get-http-status",
                endpoint,
                status: status.as_u16(),
                body,
            }
        );

        serde_json::from_str(&body).context(DecodeResponseSnafu {
            stage: "decode-get-response",
            endpoint,
        })
    }

    async fn upload_file(&self, path: &Path) -> ClientResult<UploadReport> {
        let bytes = tokio::fs::read(path).await.context(ReadUploadFileSnafu {
            stage: "read-upload-file",
            path: path.to_path_buf(),
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(path).first_or_octet_stream();

        tracing::debug!(
            file_name = %file_name,
            mime = %mime,
            size = bytes.len(),
            "uploading document"
        );

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.essence_str())
            .context(TransportSnafu {
                stage: "build-upload-part",
            })?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoints.upload.clone())
            .multipart(form)
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-upload-request",
            })?;

        let status = response.status();
        let body = response.text().await.context(TransportSnafu {
            stage: "read-upload-response",
        })?;

        if !status.is_success() {
            // The server explains most rejections in an `error` field; prefer that over the raw body.
            if let Ok(UploadReport {
                error: Some(message),
                ..
            }) = serde_json::from_str::<UploadReport>(&body)
            {
                return UploadSnafu {
                    stage: "upload-http-status",
                    message,
                }
                .fail();
            }

            return StatusSnafu {
                stage: "upload-http-status",
                endpoint: "upload",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let report: UploadReport = serde_json::from_str(&body).context(DecodeResponseSnafu {
            stage: "decode-upload-response",
            endpoint: "upload",
        })?;

        if let Some(message) = report.error.clone() {
            return UploadSnafu {
                stage: "upload-report-error",
                message,
            }
            .fail();
        }

        Ok(report)
    }
}

impl ChatBackend for HttpChatBackend {
    fn id(&self) -> &str {
        HTTP_BACKEND_ID
    }

    fn stream_chat(&self, request: ChatRequest) -> ClientResult<ChatStreamHandle> {
        ensure!(
            !request.query.trim().is_empty(),
            EmptyQuerySnafu {
                stage: "stream-chat",
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: StreamWorker = Box::pin(Self::run_stream_worker(
            self.http.clone(),
            self.endpoints.chat.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ChatStreamHandle { stream, worker })
    }

    fn upload<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, ClientResult<UploadReport>> {
        Box::pin(self.upload_file(path))
    }

    fn status<'a>(&'a self) -> BoxFuture<'a, ClientResult<StatusReport>> {
        Box::pin(self.get_json(self.endpoints.status.clone(), "status"))
    }

    fn health<'a>(&'a self) -> BoxFuture<'a, ClientResult<HealthReport>> {
        Box::pin(self.get_json(self.endpoints.health.clone(), "health"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_with_or_without_slash() {
        let config = ClientConfig::new("http://localhost:5000/").with_status_path("api/status");
        let endpoints = Endpoints::resolve(&config).unwrap();
        assert_eq!(endpoints.chat.as_str(), "http://localhost:5000/chat");
        assert_eq!(endpoints.status.as_str(), "http://localhost:5000/api/status");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let error = HttpChatBackend::new(ClientConfig::new("not a url"))
            .err()
            .unwrap();
        assert!(matches!(error, ClientError::InvalidEndpoint { .. }));
    }

    #[test]
    fn blank_query_is_rejected_before_any_io() {
        let backend = HttpChatBackend::new(ClientConfig::default()).unwrap();
        let target = StreamTarget::next_exchange(crate::SessionId::new_v7());
        let error = backend
            .stream_chat(ChatRequest::new(target, "   "))
            .err()
            .unwrap();
        assert!(matches!(error, ClientError::EmptyQuery { .. }));
    }
}
