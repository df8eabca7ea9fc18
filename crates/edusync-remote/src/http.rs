use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;
use crate::transport::RemoteStore;

/// PostgREST client for the hosted remote store.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpRemote {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = self.authorized(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

impl RemoteStore for HttpRemote {
    async fn select_all(&self, table: &str) -> Result<Vec<Value>, RemoteError> {
        debug!(table, "GET rows");
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "*")]);
        let rows = self.send(request).await?.json::<Vec<Value>>().await?;
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<(), RemoteError> {
        debug!(table, "POST row");
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(&row);
        self.send(request).await?;
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<(), RemoteError> {
        debug!(table, id, "PATCH row");
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))])
            .json(&patch);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        debug!(table, id, "DELETE row");
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))]);
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_table_url_strips_trailing_slash() {
        let remote = HttpRemote::new("http://localhost:54321/", "anon", Duration::from_secs(1)).unwrap();
        assert_eq!(remote.base_url(), "http://localhost:54321");
        assert_eq!(
            remote.table_url("leave_requests"),
            "http://localhost:54321/rest/v1/leave_requests"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_error() {
        // Port 9 (discard) on localhost is closed on test machines.
        let remote = HttpRemote::new("http://127.0.0.1:9", "anon", Duration::from_millis(500)).unwrap();
        assert!(remote.select_all("students").await.is_err());
    }
}
