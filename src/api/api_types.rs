//! Serde-deserializable envelopes matching backend responses.
//!
//! Entity payloads deserialize straight into the domain types; these types
//! only cover the wrappers around them.

use serde::Deserialize;

use super::types::Page;

// ============================================================================
// List endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPage<T> {
  #[serde(alias = "items")]
  pub data: Vec<T>,
  pub total: Option<u64>,
  pub page: Option<u32>,
  pub limit: Option<u32>,
}

impl<T> ApiPage<T> {
  /// Convert to a domain page, filling gaps from the request that produced it.
  pub fn into_page(self, requested_page: u32, requested_limit: u32) -> Page<T> {
    let total = self.total.unwrap_or(self.data.len() as u64);
    Page {
      page: self.page.unwrap_or(requested_page),
      limit: self.limit.unwrap_or(requested_limit),
      total,
      items: self.data,
    }
  }
}

// ============================================================================
// Single-entity endpoints
// ============================================================================

/// Some single-entity routes wrap the entity in `{ "data": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiEntity<T> {
  Wrapped { data: T },
  Bare(T),
}

impl<T> ApiEntity<T> {
  pub fn into_inner(self) -> T {
    match self {
      ApiEntity::Wrapped { data } => data,
      ApiEntity::Bare(entity) => entity,
    }
  }
}

// ============================================================================
// Failures and health
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub message: String,
}

/// Explicit `error` field carried by an otherwise successful response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorField {
  pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiHealth {
  #[serde(default)]
  pub status: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::Prompt;

  #[test]
  fn test_page_accepts_items_alias_and_missing_total() {
    let json = r#"{ "items": [
      { "id": "a", "title": "A", "createdAt": "2024-01-01T00:00:00Z" },
      { "id": "b", "title": "B", "createdAt": "2024-01-02T00:00:00Z" }
    ] }"#;
    let page: ApiPage<Prompt> = serde_json::from_str(json).unwrap();
    let page = page.into_page(3, 20);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 2);
    assert_eq!(page.page, 3);
    assert_eq!(page.limit, 20);
  }

  #[test]
  fn test_entity_wrapped_or_bare() {
    let wrapped: ApiEntity<Prompt> = serde_json::from_str(
      r#"{ "data": { "id": "a", "title": "A", "createdAt": "2024-01-01T00:00:00Z" } }"#,
    )
    .unwrap();
    assert_eq!(wrapped.into_inner().id, "a");

    let bare: ApiEntity<Prompt> =
      serde_json::from_str(r#"{ "id": "b", "title": "B", "createdAt": "2024-01-01T00:00:00Z" }"#)
        .unwrap();
    assert_eq!(bare.into_inner().id, "b");
  }
}
