//! Remote aggregation service access.
//!
//! - [`ReaderApi`] is the seam the sync core talks through. Every call is
//!   independent; callers decide what to do with failures.
//! - [`HttpReaderApi`] speaks the Google-Reader-style HTTP protocol via `reqwest`.
//! - [`types`] holds the wire payloads, tag constants and edit encodings.

mod client;
pub mod types;

use secrecy::SecretString;
use std::future::Future;

pub use client::HttpReaderApi;
pub use types::{ApiError, EditRequest, StreamRef, Subscription, TagEdit, UnreadCount};

/// Operations the sync core needs from the remote service.
///
/// `auth` is always the complete `Authorization` header value as produced by
/// the credential store.
pub trait ReaderApi: Send + Sync + 'static {
    /// Exchange account credentials for an authorization token.
    fn login(
        &self,
        username: &str,
        password: &SecretString,
    ) -> impl Future<Output = Result<SecretString, ApiError>> + Send;

    /// Fetch the complete subscription list.
    fn subscriptions(
        &self,
        auth: &SecretString,
    ) -> impl Future<Output = Result<Vec<Subscription>, ApiError>> + Send;

    /// Fetch unread counters and newest-item timestamps for every stream.
    fn unread_counts(
        &self,
        auth: &SecretString,
    ) -> impl Future<Output = Result<Vec<UnreadCount>, ApiError>> + Send;

    /// Fetch a short-lived token authorizing one mutating request.
    fn edit_token(&self, auth: &SecretString)
        -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Apply a mutation.
    fn edit(
        &self,
        auth: &SecretString,
        token: &str,
        request: &EditRequest,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}
