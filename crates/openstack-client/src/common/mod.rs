//! Common utilities for the OpenStack API client
//!
//! Provides the authenticated HTTP wrapper shared by the compute, network and
//! image calls.

use crate::error::ComputeError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Compute API microversion requested on every call
pub const NOVA_MICROVERSION: &str = "2.52";

/// HTTP client wrapper with token authentication
pub struct HttpClient {
    client: Client,
    token: String,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, token: String) -> Self {
        Self { client, token }
    }

    /// Join a base endpoint and a path
    pub fn build_url(base_url: &str, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", base_url.trim_end_matches('/'), path)
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("X-Auth-Token", &self.token)
            .header("X-OpenStack-Nova-API-Version", NOVA_MICROVERSION)
            .header("Accept", "application/json")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ComputeError> {
        debug!("GET {}", url);
        let response = self.request(reqwest::Method::GET, url).send().await?;
        let response = check_status("GET", url, response).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ComputeError> {
        debug!("POST {}", url);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(body)
            .send()
            .await?;
        let response = check_status("POST", url, response).await?;
        Ok(response.json().await?)
    }

    /// Make a PUT request, discarding the response body
    pub async fn put(&self, url: &str, body: &serde_json::Value) -> Result<(), ComputeError> {
        debug!("PUT {}", url);
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(body)
            .send()
            .await?;
        check_status("PUT", url, response).await?;
        Ok(())
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str) -> Result<(), ComputeError> {
        debug!("DELETE {}", url);
        let response = self.request(reqwest::Method::DELETE, url).send().await?;
        check_status("DELETE", url, response).await?;
        Ok(())
    }
}

/// Map non-success responses to `ComputeError`
async fn check_status(method: &str, url: &str, response: Response) -> Result<Response, ComputeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(method, url, status, &body))
}

fn error_for_status(method: &str, url: &str, status: StatusCode, body: &str) -> ComputeError {
    match status {
        StatusCode::NOT_FOUND => {
            ComputeError::NotFound(format!("Resource not found: {} - {}", url, body))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ComputeError::Authentication(format!("{} {} rejected: {} - {}", method, url, status, body))
        }
        StatusCode::BAD_REQUEST => {
            ComputeError::InvalidRequest(format!("{} {} failed: {}", method, url, body))
        }
        _ => ComputeError::Api(format!("{} {} failed: {} - {}", method, url, status, body)),
    }
}
