//! HTTP stream gateway adapter.
//!
//! Endpoints, relative to `http://{address}:{port}`:
//! - `GET  /streams/{stream}`: stream config, 404 when absent
//! - `PUT  /streams/{stream}`: create or replace the config
//! - `POST /streams/{stream}/messages`: publish one CloudEvent; `Msg-Id` is
//!   the dedupe key, `Subject` the routing subject

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, StatusCode};

use super::broker::{
    BrokerClient, BrokerConnector, BrokerError, OutboundEvent, SendReceipt, StreamBinding,
    StreamConfig,
};
use crate::settings::{BrokerSettings, Secret};

pub const MSG_ID_HEADER: &str = "Msg-Id";
pub const SUBJECT_HEADER: &str = "Subject";
const CLOUDEVENTS_JSON: &str = "application/cloudevents+json";

/// Connector for the HTTP stream gateway.
#[derive(Debug, Clone)]
pub struct HttpBrokerConnector {
    http: reqwest::Client,
}

impl HttpBrokerConnector {
    pub fn new() -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("admit-ingestion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl BrokerConnector for HttpBrokerConnector {
    async fn connect(
        &self,
        settings: &BrokerSettings,
        binding: &StreamBinding,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        Ok(Arc::new(HttpBrokerClient {
            http: self.http.clone(),
            base_url: settings.base_url(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            binding: binding.clone(),
        }))
    }
}

struct HttpBrokerClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<Secret>,
    binding: StreamBinding,
}

impl HttpBrokerClient {
    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        let url = format!("{}/streams/{}{}", self.base_url, self.binding.stream, suffix);
        let builder = self.http.request(method, url);

        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref().map(Secret::expose)),
            None => builder,
        }
    }

    fn stream_error(&self, message: impl Into<String>) -> BrokerError {
        BrokerError::Stream {
            stream: self.binding.stream.clone(),
            message: message.into(),
        }
    }
}

fn transport(e: reqwest::Error) -> BrokerError {
    BrokerError::Connect(e.to_string())
}

async fn describe(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    format!("status={status}: {body}")
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    async fn stream_info(&self) -> Result<Option<StreamConfig>, BrokerError> {
        let resp = self
            .request(Method::GET, "")
            .send()
            .await
            .map_err(transport)?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => resp
                .json::<StreamConfig>()
                .await
                .map(Some)
                .map_err(|e| self.stream_error(format!("invalid stream info: {e}"))),
            _ => Err(self.stream_error(describe(resp).await)),
        }
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<(), BrokerError> {
        let resp = self
            .request(Method::PUT, "")
            .json(config)
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            return Err(self.stream_error(describe(resp).await));
        }
        Ok(())
    }

    async fn send(&self, event: &OutboundEvent) -> Result<SendReceipt, BrokerError> {
        let body = serde_json::to_vec(event).map_err(|e| BrokerError::Send(e.to_string()))?;

        let resp = self
            .request(Method::POST, "/messages")
            .header(CONTENT_TYPE, CLOUDEVENTS_JSON)
            .header(MSG_ID_HEADER, &event.id)
            .header(SUBJECT_HEADER, &self.binding.subject)
            .body(body)
            .send()
            .await
            .map_err(transport)?;

        if !resp.status().is_success() {
            return Err(BrokerError::Send(describe(resp).await));
        }

        resp.json::<SendReceipt>()
            .await
            .map_err(|e| BrokerError::Send(format!("invalid receipt: {e}")))
    }
}
