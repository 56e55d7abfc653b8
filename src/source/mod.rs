//! One synchronised account.
//!
//! A [`Source`] is a cheap, cloneable handle to a task that owns all mutable
//! state of the account: credentials, login state, the action queue, the
//! timestamp map and the node index. Every entry point posts a message to
//! that task, so timers, user actions and network completions never race.
//!
//! # Architecture
//!
//! - [`credentials`] - authorization token storage
//! - [`auth`] - login state machine and failure ceiling
//! - [`queue`] - FIFO of pending remote mutations
//! - [`sync`] - full/quick update bookkeeping and reconciliation
//! - [`mapper`] - remote subscription id ↔ local node lookup
//!
//! # Example
//!
//! ```ignore
//! let tree = Arc::new(MemoryTree::new());
//! let (source, mut events) = Source::spawn(api, tree.clone(), account);
//! source.login(UpdateFlags::NONE).await?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

mod actor;
pub mod auth;
pub mod credentials;
pub mod mapper;
pub mod queue;
pub mod sync;

use crate::api::{ApiError, EditRequest, ReaderApi, StreamRef};
use crate::api::types::tags;
use crate::tree::{FeedTree, NodeId};
use crate::util::{validate_feed_url, UrlValidationError};
use actor::{Message, Request, SourceActor};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use auth::{LoginState, MAX_AUTH_FAILURES};
pub use sync::{UpdateMode, LIST_UPDATE_INTERVAL, QUICK_UPDATE_INTERVAL};

const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Events buffered for the receiver. Further events are dropped until it
/// catches up.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Flags
// ============================================================================

/// Modifiers for [`Source::login`] and [`Source::trigger_full_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    pub const NONE: Self = Self(0);
    /// Reconcile the subscription list only; no counters, no content refresh.
    pub const ONLY_LIST: Self = Self(1 << 16);
    /// Log in without any follow-up update.
    pub const ONLY_LOGIN: Self = Self(1 << 17);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures surfaced to the code driving a [`Source`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Login rejected by the service")]
    AuthRejected,

    #[error("Authorization expired")]
    AuthExpired,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Edit rejected: {0}")]
    EditRejected(String),

    /// Only ever produced internally; public entry points turn it into a no-op.
    #[error("Source is being migrated to local feeds")]
    MigrationInProgress,

    #[error("Invalid subscription URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error("Tag edit needs a tag to add or remove")]
    EmptyTagEdit,

    #[error("Source task has stopped")]
    Closed,
}

impl SyncError {
    /// Classify a failed login request.
    pub(crate) fn from_login(err: &ApiError) -> Self {
        if err.is_auth_failure() {
            SyncError::AuthRejected
        } else {
            SyncError::NetworkFailure(err.to_string())
        }
    }

    /// Classify a failed list, counter or token request.
    pub(crate) fn from_fetch(err: &ApiError) -> Self {
        if err.is_auth_failure() {
            SyncError::AuthExpired
        } else {
            SyncError::NetworkFailure(err.to_string())
        }
    }

    /// Classify a failed mutation.
    pub(crate) fn from_edit(err: &ApiError) -> Self {
        match err {
            e if e.is_auth_failure() => SyncError::AuthExpired,
            ApiError::Network(_) | ApiError::Timeout => SyncError::NetworkFailure(err.to_string()),
            other => SyncError::EditRejected(other.to_string()),
        }
    }
}

// ============================================================================
// Events and Status
// ============================================================================

/// Local changes made by one update cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    /// Nodes asked to refresh their content.
    pub refreshed: Vec<NodeId>,
}

/// Outcomes reported by the source task.
#[derive(Debug)]
pub enum SourceEvent {
    LoggedIn,
    /// Login failed for a reason other than rejected credentials.
    /// Rejections are only reported through `LoginRequired`.
    LoginFailed { failures: u32, error: SyncError },
    /// Automatic logins stopped; the user must retry manually.
    /// Sent once each time the source enters `NoAuth`.
    LoginRequired { failures: u32 },
    UpdateFinished { mode: UpdateMode, report: UpdateReport },
    /// Transport or payload failure; auth failures end in `LoginRequired`.
    UpdateFailed { mode: UpdateMode, error: SyncError },
    ActionCompleted { seq: u64, request: EditRequest },
    /// The action was discarded and will not be retried.
    ActionFailed { seq: u64, request: EditRequest, error: SyncError },
    Migrated,
}

/// Point-in-time view of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStatus {
    pub state: LoginState,
    pub failures: u32,
    pub has_token: bool,
    /// Actions waiting to be dispatched (excluding the one in flight).
    pub queued: usize,
    pub action_in_flight: bool,
    pub update_in_flight: Option<UpdateMode>,
    pub timestamps: BTreeMap<String, i64>,
}

/// Credentials of the remote account.
#[derive(Clone)]
pub struct Account {
    pub username: String,
    pub password: SecretString,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to a running account synchroniser.
///
/// Dropping the last handle stops the task and discards queued actions.
#[derive(Clone)]
pub struct Source {
    tx: mpsc::Sender<Message>,
}

impl Source {
    /// Start the task for one account. Must be called inside a tokio runtime.
    pub fn spawn<A: ReaderApi>(
        api: A,
        tree: Arc<dyn FeedTree>,
        account: Account,
    ) -> (Self, mpsc::Receiver<SourceEvent>) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let actor = SourceActor::new(Arc::new(api), tree, account, event_tx, tx.downgrade());
        tokio::spawn(actor.run(rx));

        (Self { tx }, event_rx)
    }

    async fn send(&self, request: Request) -> Result<(), SyncError> {
        self.tx
            .send(Message::Request(request))
            .await
            .map_err(|_| SyncError::Closed)
    }

    async fn ask<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| SyncError::Closed)
    }

    /// User-requested login. Lifts a `NoAuth` suspension.
    pub async fn login(&self, flags: UpdateFlags) -> Result<(), SyncError> {
        self.send(Request::Login { flags }).await
    }

    /// User-requested full update; logs in first if needed.
    pub async fn trigger_full_update(&self, flags: UpdateFlags) -> Result<(), SyncError> {
        self.send(Request::FullUpdate { flags }).await
    }

    /// Periodic quick update. Returns whether the caller should keep
    /// scheduling it (`false` once the source is migrating or gone).
    pub async fn trigger_quick_update(&self) -> bool {
        self.ask(|reply| Request::QuickUpdate { reply })
            .await
            .unwrap_or(false)
    }

    /// Periodic entry point choosing between login, daily full update and
    /// quick update.
    pub async fn auto_update(&self) -> Result<(), SyncError> {
        self.send(Request::AutoUpdate).await
    }

    pub async fn enqueue_subscribe(&self, url: &str) -> Result<(), SyncError> {
        let url = validate_feed_url(url)?;
        self.send(Request::Enqueue(EditRequest::Subscribe(url))).await
    }

    pub async fn enqueue_unsubscribe(&self, url: &str) -> Result<(), SyncError> {
        self.send(Request::Enqueue(EditRequest::Unsubscribe(url.trim().to_string())))
            .await
    }

    /// Queue a tag change on one item. At least one tag must be given.
    pub async fn enqueue_tag_edit(
        &self,
        item_id: &str,
        subscription_url: &str,
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Result<(), SyncError> {
        let stream = StreamRef::from_source(subscription_url);
        let request =
            EditRequest::tag_edit(item_id, stream, add, remove).ok_or(SyncError::EmptyTagEdit)?;
        self.send(Request::Enqueue(request)).await
    }

    /// Propagate a local read/unread change.
    pub async fn mark_read(
        &self,
        item_id: &str,
        subscription_url: &str,
        read: bool,
    ) -> Result<(), SyncError> {
        let stream = StreamRef::from_source(subscription_url);
        if read {
            let request =
                EditRequest::add_and_remove_tag(item_id, stream, tags::READ, tags::KEPT_UNREAD);
            return self.send(Request::Enqueue(request)).await;
        }

        let request =
            EditRequest::add_and_remove_tag(item_id, stream.clone(), tags::KEPT_UNREAD, tags::READ);
        self.send(Request::Enqueue(request)).await?;
        let tracking = EditRequest::add_tag(item_id, stream, tags::TRACKING_KEPT_UNREAD);
        self.send(Request::Enqueue(tracking)).await
    }

    /// Propagate a local star/unstar change.
    pub async fn mark_starred(
        &self,
        item_id: &str,
        subscription_url: &str,
        starred: bool,
    ) -> Result<(), SyncError> {
        let stream = StreamRef::from_source(subscription_url);
        let request = if starred {
            EditRequest::add_tag(item_id, stream, tags::STARRED)
        } else {
            EditRequest::remove_tag(item_id, stream, tags::STARRED)
        };
        self.send(Request::Enqueue(request)).await
    }

    /// Create a local node for `url` and subscribe to it remotely.
    ///
    /// Returns `None` when the source is migrating.
    pub async fn add_subscription(&self, url: &str) -> Result<Option<NodeId>, SyncError> {
        let url = validate_feed_url(url)?;
        self.ask(|reply| Request::AddSubscription { url, reply }).await
    }

    /// Remove a local node; unsubscribes remotely unless another node still
    /// references the same feed.
    pub async fn remove_node(&self, id: NodeId) -> Result<(), SyncError> {
        self.send(Request::RemoveNode { id }).await
    }

    /// Local node bound to a remote subscription id or feed URL.
    pub async fn find_node_by_source(&self, source: &str) -> Option<NodeId> {
        let source = source.to_string();
        self.ask(|reply| Request::FindNode { source, reply })
            .await
            .ok()
            .flatten()
    }

    /// Enter the terminal `Migrate` state. In-flight results are discarded.
    pub async fn convert_to_local(&self) -> Result<(), SyncError> {
        self.send(Request::Migrate).await
    }

    pub async fn status(&self) -> Result<SourceStatus, SyncError> {
        self.ask(|reply| Request::Status { reply }).await
    }
}
