//! HTTP client for the coordinator API, used by the CLI

use serde_json::Value;

use crate::common::{Error, Result};
use crate::coordinator::http::{ClusterizeRequest, InitStateRequest};
use crate::coordinator::reports::ReportMessage;
use crate::coordinator::script::REPORT_KEY_HEADER;

pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Register a node; returns the instruction script and whether the
    /// coordinator accepted the request
    pub async fn register(&self, vm: &str) -> Result<(bool, String)> {
        let resp = self
            .http
            .post(self.url("/clusterize"))
            .json(&ClusterizeRequest { vm: vm.to_string() })
            .send()
            .await?;
        let accepted = resp.status().is_success();
        Ok((accepted, resp.text().await?))
    }

    pub async fn init_state(&self, expected_size: Option<usize>) -> Result<Value> {
        let resp = self
            .http
            .post(self.url("/state"))
            .json(&InitStateRequest { expected_size })
            .send()
            .await?;
        Self::json(resp).await
    }

    pub async fn status(&self, limit: usize) -> Result<Value> {
        let resp = self
            .http
            .get(self.url("/status"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Self::json(resp).await
    }

    pub async fn report(&self, report: &ReportMessage, key: Option<&str>) -> Result<()> {
        let mut req = self.http.post(self.url("/report")).json(report);
        if let Some(key) = key {
            req = req.header(REPORT_KEY_HEADER, key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("report rejected: {status} {body}")));
        }
        Ok(())
    }

    async fn json(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            let msg = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::Http(format!("{status}: {msg}")));
        }
        Ok(body)
    }
}
