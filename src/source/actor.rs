//! Task owning all state of one source.
//!
//! Requests from [`Source`](super::Source) handles and completions of spawned
//! network calls arrive on the same channel and are handled one at a time.
//! Network calls never touch state directly; they post a [`Completion`] back.

use super::auth::{Authenticator, LoginState, Trigger};
use super::credentials::CredentialStore;
use super::mapper::NodeMapper;
use super::queue::ActionQueue;
use super::sync::{apply_unread_counts, reconcile_list, SyncEngine, UpdateMode};
use super::{Account, SourceEvent, SourceStatus, SyncError, UpdateFlags, UpdateReport};
use crate::api::{ApiError, EditRequest, ReaderApi, Subscription, UnreadCount};
use crate::tree::{FeedTree, NodeId};
use secrecy::SecretString;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Title given to nodes created locally before the list names them.
const NEW_SUBSCRIPTION_TITLE: &str = "New Subscription";

pub(crate) enum Message {
    Request(Request),
    Completion(Completion),
}

pub(crate) enum Request {
    Login { flags: UpdateFlags },
    FullUpdate { flags: UpdateFlags },
    QuickUpdate { reply: oneshot::Sender<bool> },
    AutoUpdate,
    Enqueue(EditRequest),
    AddSubscription { url: String, reply: oneshot::Sender<Option<NodeId>> },
    RemoveNode { id: NodeId },
    FindNode { source: String, reply: oneshot::Sender<Option<NodeId>> },
    Status { reply: oneshot::Sender<SourceStatus> },
    Migrate,
}

pub(crate) enum Completion {
    Login {
        flags: UpdateFlags,
        result: Result<SecretString, ApiError>,
    },
    Full {
        flags: UpdateFlags,
        list: Result<Vec<Subscription>, ApiError>,
        /// `None` when not requested or the list already failed.
        counts: Option<Result<Vec<UnreadCount>, ApiError>>,
    },
    Quick {
        started: Instant,
        result: Result<Vec<UnreadCount>, ApiError>,
    },
    Action {
        seq: u64,
        request: EditRequest,
        result: Result<(), ApiError>,
    },
}

pub(crate) struct SourceActor<A: ReaderApi> {
    api: Arc<A>,
    tree: Arc<dyn FeedTree>,
    account: Account,
    credentials: CredentialStore,
    auth: Authenticator,
    queue: ActionQueue,
    sync: SyncEngine,
    mapper: NodeMapper,
    events: mpsc::Sender<SourceEvent>,
    completions: mpsc::WeakSender<Message>,
}

impl<A: ReaderApi> SourceActor<A> {
    pub(crate) fn new(
        api: Arc<A>,
        tree: Arc<dyn FeedTree>,
        account: Account,
        events: mpsc::Sender<SourceEvent>,
        completions: mpsc::WeakSender<Message>,
    ) -> Self {
        Self {
            api,
            tree,
            account,
            credentials: CredentialStore::new(),
            auth: Authenticator::new(),
            queue: ActionQueue::new(),
            sync: SyncEngine::new(),
            mapper: NodeMapper::new(),
            events,
            completions,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        tracing::debug!(user = %self.account.username, "Source task started");
        while let Some(message) = rx.recv().await {
            match message {
                Message::Request(request) => self.handle_request(request),
                Message::Completion(completion) => self.handle_completion(completion),
            }
        }

        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "Source stopped with unsent actions");
        }
        tracing::debug!("Source task stopped");
    }

    fn emit(&self, event: SourceEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "Event receiver lagging, dropping event");
            }
            // Nobody listening is fine
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Run a network call off the actor and post its result back.
    fn spawn_call<F>(&self, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let completion = call.await;
            if let Some(tx) = completions.upgrade() {
                let _ = tx.send(Message::Completion(completion)).await;
            }
        });
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Request::FindNode { source, reply } => {
                self.mapper.rebuild(self.tree.as_ref());
                let _ = reply.send(self.mapper.find(&source));
            }
            Request::QuickUpdate { reply } => {
                let _ = reply.send(!self.auth.is_migrating());
                if !self.auth.is_migrating() {
                    self.request_quick(Instant::now());
                }
            }
            Request::AddSubscription { reply, .. } if self.auth.is_migrating() => {
                let _ = reply.send(None);
            }
            _ if self.auth.is_migrating() => {
                tracing::debug!("Ignoring request, source is migrating");
            }
            Request::Login { flags } => self.start_login(Trigger::Manual, flags),
            Request::FullUpdate { flags } => {
                self.auth.lift_suspension();
                self.request_full(Trigger::Manual, flags);
            }
            Request::AutoUpdate => self.auto_update(),
            Request::Enqueue(edit) => {
                let seq = self.queue.enqueue(edit);
                tracing::debug!(seq, queued = self.queue.len(), "Action queued");
                self.process_queue();
            }
            Request::AddSubscription { url, reply } => {
                let id = self.tree.add_subscription(&url, NEW_SUBSCRIPTION_TITLE);
                self.mapper.insert(&url, id);
                tracing::info!(feed = %url, node = %id, "Subscription added locally");
                let _ = reply.send(Some(id));
                self.queue.enqueue(EditRequest::Subscribe(url));
                self.process_queue();
            }
            Request::RemoveNode { id } => self.remove_node(id),
            Request::Migrate => {
                self.auth.migrate();
                self.credentials.clear();
                tracing::info!(queued = self.queue.len(), "Source converted to local feeds");
                self.emit(SourceEvent::Migrated);
            }
        }
    }

    fn status(&self) -> SourceStatus {
        SourceStatus {
            state: self.auth.state(),
            failures: self.auth.failures(),
            has_token: self.credentials.has_token(),
            queued: self.queue.len(),
            action_in_flight: self.queue.is_busy(),
            update_in_flight: self.sync.in_flight(),
            timestamps: self.sync.timestamps.snapshot(),
        }
    }

    fn start_login(&mut self, trigger: Trigger, flags: UpdateFlags) {
        if !self.auth.begin_login(trigger) {
            return;
        }
        self.credentials.clear();
        tracing::info!(user = %self.account.username, ?trigger, "Logging in");

        let api = Arc::clone(&self.api);
        let username = self.account.username.clone();
        let password = self.account.password.clone();
        self.spawn_call(async move {
            let result = api.login(&username, &password).await;
            Completion::Login { flags, result }
        });
    }

    /// Reacts to a missing session: log in when allowed, otherwise wait.
    fn ensure_login(&mut self, trigger: Trigger, flags: UpdateFlags) {
        match self.auth.state() {
            LoginState::None => self.start_login(trigger, flags),
            LoginState::NoAuth if trigger == Trigger::Manual => self.start_login(trigger, flags),
            LoginState::NoAuth => tracing::debug!("Not logged in, waiting for manual login"),
            LoginState::InProgress | LoginState::Active | LoginState::Migrate => {}
        }
    }

    /// Returns `true` if a full update was started now.
    fn request_full(&mut self, trigger: Trigger, flags: UpdateFlags) -> bool {
        let Some(auth) = self.active_header() else {
            // The login completion starts the update
            self.ensure_login(trigger, flags);
            return false;
        };
        if !self.sync.try_begin(UpdateMode::Full) {
            return false;
        }
        tracing::info!(only_list = flags.contains(UpdateFlags::ONLY_LIST), "Starting full update");

        let api = Arc::clone(&self.api);
        self.spawn_call(async move {
            let list = api.subscriptions(&auth).await;
            let counts = if list.is_ok() && !flags.contains(UpdateFlags::ONLY_LIST) {
                Some(api.unread_counts(&auth).await)
            } else {
                None
            };
            Completion::Full { flags, list, counts }
        });
        true
    }

    fn request_quick(&mut self, now: Instant) {
        let Some(auth) = self.active_header() else {
            self.ensure_login(Trigger::Automatic, UpdateFlags::NONE);
            return;
        };
        if !self.sync.quick_due(now) {
            tracing::debug!("Quick update throttled");
            return;
        }
        if !self.sync.try_begin(UpdateMode::Quick) {
            return;
        }
        tracing::debug!("Starting quick update");

        let api = Arc::clone(&self.api);
        self.spawn_call(async move {
            let result = api.unread_counts(&auth).await;
            Completion::Quick { started: now, result }
        });
    }

    fn auto_update(&mut self) {
        if !self.auth.is_active() {
            self.ensure_login(Trigger::Automatic, UpdateFlags::NONE);
            return;
        }

        let now = Instant::now();
        if self.sync.list_due(now) {
            if self.request_full(Trigger::Automatic, UpdateFlags::NONE) {
                self.sync.mark_quick(now);
            }
        } else {
            self.request_quick(now);
        }
        self.process_queue();
    }

    fn remove_node(&mut self, id: NodeId) {
        let Some(node) = self.tree.children().into_iter().find(|n| n.id == id) else {
            tracing::debug!(node = %id, "Remove of unknown node ignored");
            return;
        };
        self.tree.remove_node(id);
        self.mapper.rebuild(self.tree.as_ref());

        if self.mapper.find(&node.source).is_some() {
            tracing::debug!(feed = %node.source, "Another node still uses this feed, keeping subscription");
            return;
        }
        tracing::info!(feed = %node.source, node = %id, "Subscription removed locally");
        self.queue.enqueue(EditRequest::Unsubscribe(node.source));
        self.process_queue();
    }

    fn active_header(&self) -> Option<SecretString> {
        if self.auth.is_active() {
            self.credentials.auth_header()
        } else {
            None
        }
    }

    /// Dispatch the queue head if nothing is in flight and the session allows it.
    fn process_queue(&mut self) {
        if self.auth.is_migrating() || self.queue.is_busy() || self.queue.is_empty() {
            return;
        }
        let Some(auth) = self.active_header() else {
            self.ensure_login(Trigger::Automatic, UpdateFlags::ONLY_LOGIN);
            return;
        };
        let Some(action) = self.queue.start_next() else {
            return;
        };
        tracing::debug!(seq = action.seq, request = ?action.request, "Dispatching action");

        let api = Arc::clone(&self.api);
        self.spawn_call(async move {
            let result = match api.edit_token(&auth).await {
                Ok(token) => api.edit(&auth, &token, &action.request).await,
                Err(e) => Err(e),
            };
            Completion::Action {
                seq: action.seq,
                request: action.request,
                result,
            }
        });
    }

    // ========================================================================
    // Completions
    // ========================================================================

    fn handle_completion(&mut self, completion: Completion) {
        if self.auth.is_migrating() {
            tracing::debug!("Discarding network result, source is migrating");
            match completion {
                Completion::Full { .. } | Completion::Quick { .. } => self.sync.finish(),
                Completion::Action { seq, .. } => {
                    self.queue.finish(seq);
                }
                Completion::Login { .. } => {}
            }
            return;
        }

        match completion {
            Completion::Login { flags, result } => self.login_finished(flags, result),
            Completion::Full { flags, list, counts } => self.full_finished(flags, list, counts),
            Completion::Quick { started, result } => self.quick_finished(started, result),
            Completion::Action {
                seq,
                request,
                result,
            } => self.action_finished(seq, request, result),
        }
    }

    fn login_finished(&mut self, flags: UpdateFlags, result: Result<SecretString, ApiError>) {
        let result = result.and_then(|token| {
            self.credentials.set_token(&token);
            if self.credentials.has_token() {
                Ok(())
            } else {
                Err(ApiError::MissingAuthToken)
            }
        });

        match result {
            Ok(()) => {
                self.auth.login_succeeded();
                tracing::info!(user = %self.account.username, "Login successful");
                self.emit(SourceEvent::LoggedIn);

                if !flags.contains(UpdateFlags::ONLY_LOGIN) {
                    self.request_full(Trigger::Automatic, flags);
                }
                self.process_queue();
            }
            Err(e) => {
                let ceiling = self.auth.login_failed();
                let failures = self.auth.failures();
                tracing::warn!(error = %e, failures, "Login failed");
                // Rejections only surface once, through LoginRequired
                if !e.is_auth_failure() {
                    self.emit(SourceEvent::LoginFailed {
                        failures,
                        error: SyncError::from_login(&e),
                    });
                }
                if ceiling {
                    tracing::warn!(failures, "Too many failed logins, waiting for manual retry");
                    self.emit(SourceEvent::LoginRequired { failures });
                }
            }
        }
    }

    /// A non-login request was refused: drop the token and stop until re-login.
    fn session_rejected(&mut self) {
        if self.auth.token_rejected() {
            self.credentials.clear();
            let failures = self.auth.failures();
            tracing::warn!(failures, "Authorization rejected, login required");
            self.emit(SourceEvent::LoginRequired { failures });
        }
    }

    fn update_failed(&mut self, mode: UpdateMode, error: &ApiError) {
        if error.is_auth_failure() {
            self.session_rejected();
            return;
        }
        tracing::warn!(%mode, error = %error, "Update failed");
        self.emit(SourceEvent::UpdateFailed {
            mode,
            error: SyncError::from_fetch(error),
        });
    }

    fn full_finished(
        &mut self,
        flags: UpdateFlags,
        list: Result<Vec<Subscription>, ApiError>,
        counts: Option<Result<Vec<UnreadCount>, ApiError>>,
    ) {
        self.sync.finish();
        let subscriptions = match list {
            Ok(subscriptions) => subscriptions,
            Err(e) => return self.update_failed(UpdateMode::Full, &e),
        };

        let tree = Arc::clone(&self.tree);
        self.mapper.rebuild(tree.as_ref());
        let outcome = reconcile_list(
            &subscriptions,
            tree.as_ref(),
            &mut self.mapper,
            &mut self.sync.timestamps,
        );
        self.sync.mark_list(Instant::now());

        let mut report = UpdateReport {
            added: outcome.added,
            removed: outcome.removed,
            refreshed: Vec::new(),
        };

        if !flags.contains(UpdateFlags::ONLY_LIST) {
            match counts {
                Some(Ok(counts)) => {
                    apply_unread_counts(
                        &counts,
                        tree.as_ref(),
                        &self.mapper,
                        &mut self.sync.timestamps,
                        false,
                    );
                }
                Some(Err(e)) if e.is_auth_failure() => {
                    self.session_rejected();
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Unread counts unavailable, refreshing anyway");
                }
                None => {}
            }

            if self.auth.is_active() {
                let mut nodes: Vec<NodeId> = self.mapper.bindings().map(|(_, id)| id).collect();
                nodes.sort();
                for id in nodes {
                    tree.refresh(id);
                    report.refreshed.push(id);
                }
            }
        }

        tracing::info!(
            subscriptions = subscriptions.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            refreshed = report.refreshed.len(),
            "Full update finished"
        );
        self.emit(SourceEvent::UpdateFinished {
            mode: UpdateMode::Full,
            report,
        });
    }

    fn quick_finished(&mut self, started: Instant, result: Result<Vec<UnreadCount>, ApiError>) {
        self.sync.finish();
        let counts = match result {
            Ok(counts) => counts,
            Err(e) => return self.update_failed(UpdateMode::Quick, &e),
        };
        self.sync.mark_quick(started);

        let tree = Arc::clone(&self.tree);
        self.mapper.rebuild(tree.as_ref());
        let refreshed = apply_unread_counts(
            &counts,
            tree.as_ref(),
            &self.mapper,
            &mut self.sync.timestamps,
            true,
        );

        tracing::debug!(refreshed = refreshed.len(), "Quick update finished");
        self.emit(SourceEvent::UpdateFinished {
            mode: UpdateMode::Quick,
            report: UpdateReport {
                refreshed,
                ..UpdateReport::default()
            },
        });
    }

    fn action_finished(&mut self, seq: u64, request: EditRequest, result: Result<(), ApiError>) {
        match result {
            Ok(()) => {
                self.queue.finish(seq);
                tracing::debug!(seq, "Action completed");
                self.emit(SourceEvent::ActionCompleted { seq, request });
            }
            Err(e) if e.is_auth_failure() => {
                // Sent again first once a new session exists
                self.queue.requeue(seq);
                tracing::warn!(seq, error = %e, "Action refused, holding queue for re-login");
                self.session_rejected();
            }
            Err(e) => {
                self.queue.finish(seq);
                tracing::warn!(seq, error = %e, "Action failed, discarding");
                self.emit(SourceEvent::ActionFailed {
                    seq,
                    request,
                    error: SyncError::from_edit(&e),
                });
            }
        }
        self.process_queue();
    }
}
