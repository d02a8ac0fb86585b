//! HTTP client for the IOTA REST API.

use anyhow::{Context, bail};
use serde::de::DeserializeOwned;

use iota_protocol::{Record, Token, VersionInfo};

use crate::session::Session;

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(session: &Session) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("{}/api/v1", session.url.trim_end_matches('/')),
            token: session.token.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base));
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("bearer {token}"));
        }
        builder
    }

    async fn expect_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> anyhow::Result<T> {
        let response = Self::check(response).await?;
        response.json().await.context("invalid response body")
    }

    async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if body.is_empty() {
            bail!("{status}");
        }
        bail!("{}", body.trim_end());
    }

    pub async fn login(&self, username: &str, password: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(format!("{}/auth", self.base))
            .basic_auth(username, Some(password))
            .send()
            .await?;
        let token: Token = Self::expect_json(response).await?;
        Ok(token.token)
    }

    pub async fn server_version(&self) -> anyhow::Result<VersionInfo> {
        let response = self.request(reqwest::Method::GET, "/version").send().await?;
        Self::expect_json(response).await
    }

    pub async fn list_devices(&self, keys: Option<&str>) -> anyhow::Result<Vec<Record>> {
        let mut request = self.request(reqwest::Method::GET, "/devices");
        if let Some(keys) = keys {
            request = request.query(&[("keys", keys)]);
        }
        Self::expect_json(request.send().await?).await
    }

    pub async fn get_device(&self, id: &str, keys: Option<&str>) -> anyhow::Result<Record> {
        let mut request = self.request(reqwest::Method::GET, &format!("/devices/{id}"));
        if let Some(keys) = keys {
            request = request.query(&[("keys", keys)]);
        }
        Self::expect_json(request.send().await?).await
    }

    pub async fn create_device(&self, attrs: &Record) -> anyhow::Result<Token> {
        let response = self
            .request(reqwest::Method::POST, "/devices")
            .json(attrs)
            .send()
            .await?;
        Self::expect_json(response).await
    }

    pub async fn update_device(&self, id: &str, updates: &Record) -> anyhow::Result<()> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/devices/{id}"))
            .json(updates)
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn delete_device(&self, id: &str) -> anyhow::Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/devices/{id}"))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }

    pub async fn rpc(&self, id: &str, request: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .request(reqwest::Method::POST, &format!("/devices/{id}/rpc"))
            .header("Content-Type", "application/json")
            .body(request.to_string())
            .send()
            .await?;
        let response = Self::check(response).await?;
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Ok(Some(response.text().await?))
    }

    pub async fn list_claims(&self) -> anyhow::Result<Vec<Record>> {
        let response = self.request(reqwest::Method::GET, "/claims").send().await?;
        Self::expect_json(response).await
    }

    pub async fn approve_claim(&self, id: &str, overrides: &Record) -> anyhow::Result<Token> {
        let response = self
            .request(reqwest::Method::POST, &format!("/claims/{id}/approve"))
            .json(overrides)
            .send()
            .await?;
        Self::expect_json(response).await
    }

    pub async fn reject_claim(&self, id: &str) -> anyhow::Result<()> {
        let response = self
            .request(reqwest::Method::POST, &format!("/claims/{id}/reject"))
            .send()
            .await?;
        Self::check(response).await.map(|_| ())
    }
}
