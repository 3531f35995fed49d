use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::api::api_types::{ApiEntity, ApiErrorBody, ApiErrorField, ApiHealth, ApiPage};
use crate::api::types::{
  ClusterPost, ClusterSummary, FeedVariant, ListQuery, Page, Prompt, ViralChat,
};
use crate::config::Config;

/// Failure of a remote call. Every expected failure mode folds into this.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
  /// Connection refused, DNS failure, reset, TLS error...
  #[error("Network error: {0}")]
  Transport(String),
  /// Non-2xx status or an explicit error in the response envelope.
  #[error("{message}")]
  Api { status: Option<u16>, message: String },
  /// 2xx response whose body did not match the expected shape.
  #[error("Malformed response: {0}")]
  Decode(String),
  /// Deadline supplied by the caller elapsed.
  #[error("Request timed out")]
  Timeout,
  #[error("Invalid endpoint: {0}")]
  InvalidEndpoint(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Per-request options for [`ContentApi::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
  pub query: Vec<(String, String)>,
}

impl RequestOptions {
  pub fn with_query(query: Vec<(String, String)>) -> Self {
    Self { query }
  }
}

/// Entities with a top-level list route.
pub trait Remote: DeserializeOwned + Send + 'static {
  /// Route of the list endpoint, e.g. `/prompts`.
  const RESOURCE: &'static str;
}

impl Remote for Prompt {
  const RESOURCE: &'static str = "/prompts";
}

impl Remote for ViralChat {
  const RESOURCE: &'static str = "/viral-chats";
}

impl Remote for ClusterSummary {
  const RESOURCE: &'static str = "/clusters";
}

/// The HTTP contract consumed by the fetch orchestrator.
///
/// Implementors only provide [`ContentApi::request`] and the credential
/// setter; typed endpoints are built on top of it.
#[async_trait]
pub trait ContentApi: Send + Sync {
  /// Issue a GET against `endpoint` (relative to the base URL).
  async fn request<T>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T>
  where
    T: DeserializeOwned + Send + 'static;

  /// Replace the bearer credential used by all subsequent requests.
  fn set_token(&self, token: Option<String>);

  /// Paginated list of a top-level resource.
  async fn list<T: Remote>(&self, query: &ListQuery) -> ApiResult<Page<T>> {
    let page: ApiPage<T> = self
      .request(T::RESOURCE, RequestOptions::with_query(query.to_params()))
      .await?;
    Ok(page.into_page(query.page, query.limit))
  }

  /// Fixed sub-route of a list resource (`/prompts/trending`, ...).
  async fn feed<T: Remote>(&self, variant: FeedVariant, query: &ListQuery) -> ApiResult<Page<T>> {
    let endpoint = format!("{}/{}", T::RESOURCE, variant.sub_route());
    let page: ApiPage<T> = self
      .request(&endpoint, RequestOptions::with_query(query.to_params()))
      .await?;
    Ok(page.into_page(query.page, query.limit))
  }

  /// Single entity by id.
  async fn get<T: Remote>(&self, id: &str) -> ApiResult<T> {
    let endpoint = format!("{}/{}", T::RESOURCE, encode_segment(id));
    let entity: ApiEntity<T> = self.request(&endpoint, RequestOptions::default()).await?;
    Ok(entity.into_inner())
  }

  /// Posts belonging to one cluster.
  async fn cluster_posts(&self, cluster_id: &str, query: &ListQuery) -> ApiResult<Page<ClusterPost>> {
    let endpoint = format!(
      "{}/{}/posts",
      ClusterSummary::RESOURCE,
      encode_segment(cluster_id)
    );
    let page: ApiPage<ClusterPost> = self
      .request(&endpoint, RequestOptions::with_query(query.to_params()))
      .await?;
    Ok(page.into_page(query.page, query.limit))
  }

  /// Prompts saved by the signed-in user.
  async fn saved_prompts(&self, query: &ListQuery) -> ApiResult<Page<Prompt>> {
    let page: ApiPage<Prompt> = self
      .request("/prompts/saved", RequestOptions::with_query(query.to_params()))
      .await?;
    Ok(page.into_page(query.page, query.limit))
  }

  /// Full-text prompt search.
  async fn search_prompts(&self, text: &str, page: u32, limit: u32) -> ApiResult<Page<Prompt>> {
    let page = page.max(1);
    let options = RequestOptions::with_query(vec![
      ("q".to_string(), text.to_string()),
      ("page".to_string(), page.to_string()),
      ("limit".to_string(), limit.to_string()),
    ]);
    let result: ApiPage<Prompt> = self.request("/prompts/search", options).await?;
    Ok(result.into_page(page, limit))
  }

  /// Liveness check used by the connectivity probe.
  async fn health(&self) -> ApiResult<()> {
    let health: ApiHealth = self.request("/health", RequestOptions::default()).await?;
    debug!(status = %health.status, "Health check answered");
    Ok(())
  }
}

/// Percent-encode a value used as a single path segment.
fn encode_segment(segment: &str) -> String {
  url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// reqwest-backed implementation of [`ContentApi`].
#[derive(Clone)]
pub struct RemoteDataClient {
  http: reqwest::Client,
  base_url: Url,
  token: Arc<RwLock<Option<String>>>,
}

impl RemoteDataClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_base_url(&config.api.base_url)
  }

  pub fn with_base_url(base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;
    let http = reqwest::Client::builder()
      .user_agent(concat!("feedsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Arc::new(RwLock::new(None)),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn has_token(&self) -> bool {
    self.current_token().is_some()
  }

  /// Snapshot the credential once so a request never mixes two tokens.
  fn current_token(&self) -> Option<String> {
    match self.token.read() {
      Ok(token) => token.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  fn endpoint_url(&self, endpoint: &str) -> ApiResult<Url> {
    let base = self.base_url.as_str().trim_end_matches('/');
    let path = endpoint.trim_start_matches('/');
    Url::parse(&format!("{}/{}", base, path))
      .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", endpoint, e)))
  }
}

#[async_trait]
impl ContentApi for RemoteDataClient {
  async fn request<T>(&self, endpoint: &str, options: RequestOptions) -> ApiResult<T>
  where
    T: DeserializeOwned + Send + 'static,
  {
    let url = self.endpoint_url(endpoint)?;
    let token = self.current_token();

    let mut request = self.http.get(url).query(&options.query);
    if let Some(token) = token {
      request = request.bearer_auth(token);
    }

    debug!(endpoint, "Sending request");
    let response = request.send().await.map_err(|e| {
      warn!(endpoint, error = %e, "Request failed");
      if e.is_timeout() {
        ApiError::Timeout
      } else {
        ApiError::Transport(e.to_string())
      }
    })?;

    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| ApiError::Transport(e.to_string()))?;

    if !status.is_success() {
      let message = failure_message(status, &body);
      warn!(endpoint, status = status.as_u16(), %message, "Request rejected");
      return Err(ApiError::Api {
        status: Some(status.as_u16()),
        message,
      });
    }

    if let Ok(ApiErrorField {
      error: Some(message),
    }) = serde_json::from_str::<ApiErrorField>(&body)
    {
      warn!(endpoint, %message, "Response carried an error");
      return Err(ApiError::Api {
        status: Some(status.as_u16()),
        message,
      });
    }

    serde_json::from_str(&body).map_err(|e| {
      warn!(endpoint, error = %e, "Failed to decode response");
      ApiError::Decode(e.to_string())
    })
  }

  fn set_token(&self, token: Option<String>) {
    match self.token.write() {
      Ok(mut current) => *current = token,
      Err(poisoned) => *poisoned.into_inner() = token,
    }
  }
}

/// Message for a non-2xx response: the body's `message`, else the status.
fn failure_message(status: StatusCode, body: &str) -> String {
  serde_json::from_str::<ApiErrorBody>(body)
    .map(|b| b.message)
    .unwrap_or_else(|_| format!("Request failed with status {}", status))
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::{Matcher, Server};

  fn prompt_json(id: &str) -> String {
    format!(
      r#"{{ "id": "{}", "title": "T", "createdAt": "2024-01-01T00:00:00Z" }}"#,
      id
    )
  }

  #[tokio::test]
  async fn test_list_sends_query_and_parses_page() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("GET", "/prompts")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("page".into(), "1".into()),
        Matcher::UrlEncoded("limit".into(), "2".into()),
      ]))
      .with_status(200)
      .with_body(format!(
        r#"{{ "data": [{}, {}], "total": 57 }}"#,
        prompt_json("a"),
        prompt_json("b")
      ))
      .create_async()
      .await;

    let client = RemoteDataClient::with_base_url(&server.url()).unwrap();
    let page: Page<Prompt> = client.list(&ListQuery::new(1, 2)).await.unwrap();

    mock.assert_async().await;
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 57);
  }

  #[tokio::test]
  async fn test_bearer_token_attached_only_when_set() {
    let mut server = Server::new_async().await;
    let with_token = server
      .mock("GET", "/prompts/p1")
      .match_header("authorization", "Bearer secret")
      .with_status(200)
      .with_body(prompt_json("p1"))
      .create_async()
      .await;

    let client = RemoteDataClient::with_base_url(&server.url()).unwrap();
    client.set_token(Some("secret".into()));
    let prompt: Prompt = client.get("p1").await.unwrap();
    assert_eq!(prompt.id, "p1");
    with_token.assert_async().await;

    let without_token = server
      .mock("GET", "/prompts/p2")
      .match_header("authorization", Matcher::Missing)
      .with_status(200)
      .with_body(prompt_json("p2"))
      .create_async()
      .await;

    client.set_token(None);
    let prompt: Prompt = client.get("p2").await.unwrap();
    assert_eq!(prompt.id, "p2");
    without_token.assert_async().await;
  }

  #[tokio::test]
  async fn test_non_success_uses_message_body() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/clusters/c1")
      .with_status(404)
      .with_body(r#"{ "message": "Cluster not found" }"#)
      .create_async()
      .await;

    let client = RemoteDataClient::with_base_url(&server.url()).unwrap();
    let err = client.get::<ClusterSummary>("c1").await.unwrap_err();
    assert_eq!(
      err,
      ApiError::Api {
        status: Some(404),
        message: "Cluster not found".into()
      }
    );
  }

  #[tokio::test]
  async fn test_non_success_without_body() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/health")
      .with_status(503)
      .create_async()
      .await;

    let client = RemoteDataClient::with_base_url(&server.url()).unwrap();
    let err = client.health().await.unwrap_err();
    assert!(matches!(err, ApiError::Api { status: Some(503), .. }));
  }

  #[tokio::test]
  async fn test_malformed_body_is_decode_error() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/viral-chats")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body("<html>oops</html>")
      .create_async()
      .await;

    let client = RemoteDataClient::with_base_url(&server.url()).unwrap();
    let err = client
      .list::<ViralChat>(&ListQuery::new(1, 10))
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
  }

  #[tokio::test]
  async fn test_error_field_in_success_envelope() {
    let mut server = Server::new_async().await;
    server
      .mock("GET", "/prompts/search")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(r#"{ "success": false, "error": "Query too short" }"#)
      .create_async()
      .await;

    let client = RemoteDataClient::with_base_url(&server.url()).unwrap();
    let err = client.search_prompts("a", 1, 20).await.unwrap_err();
    assert_eq!(err.to_string(), "Query too short");
  }

  #[tokio::test]
  async fn test_unreachable_host_is_transport_error() {
    // Port 9 (discard) on localhost is closed in test environments.
    let client = RemoteDataClient::with_base_url("http://127.0.0.1:9").unwrap();
    let err = client.health().await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
  }

  #[test]
  fn test_endpoint_join_keeps_base_path() {
    let client = RemoteDataClient::with_base_url("https://api.example.com/v1/").unwrap();
    let url = client.endpoint_url("/prompts/trending").unwrap();
    assert_eq!(url.as_str(), "https://api.example.com/v1/prompts/trending");
  }
}
