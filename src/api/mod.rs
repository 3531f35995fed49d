//! Remote content API: wire envelopes, domain types and the HTTP client.

pub mod api_types;
pub mod cache;
pub mod client;
pub mod types;

pub use cache::FeedQueryKey;
pub use client::{ApiError, ApiResult, ContentApi, RemoteDataClient, RequestOptions};
