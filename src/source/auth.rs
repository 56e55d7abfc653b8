//! Login state machine.
//!
//! ```text
//! NONE ──login──▶ IN_PROGRESS ──ok──▶ ACTIVE
//!   ▲                  │                 │ 401/403
//!   └── failures < 3 ──┤                 ▼
//!                      └─ failures ≥ 3 ─▶ NO_AUTH ──manual retry──▶ IN_PROGRESS
//!
//! any state ──convert to local──▶ MIGRATE (terminal)
//! ```
//!
//! Pure bookkeeping: the actor issues the requests and reports outcomes here.

use serde::Serialize;

/// Consecutive failures after which automatic logins stop until the user retries.
pub const MAX_AUTH_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// No attempt yet, or the last one failed below the ceiling.
    None,
    InProgress,
    Active,
    /// Failure ceiling reached or token rejected; waiting for the user.
    NoAuth,
    /// Source is being converted to local feeds. Nothing runs anymore.
    Migrate,
}

/// Who asked for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicit user action; lifts `NoAuth`.
    Manual,
    /// Timers and background dispatch; never lifts `NoAuth`.
    Automatic,
}

#[derive(Debug)]
pub struct Authenticator {
    state: LoginState,
    failures: u32,
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator {
    pub fn new() -> Self {
        Self {
            state: LoginState::None,
            failures: 0,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_active(&self) -> bool {
        self.state == LoginState::Active
    }

    pub fn is_migrating(&self) -> bool {
        self.state == LoginState::Migrate
    }

    /// Decide whether a login request may be issued now.
    ///
    /// Returns `true` and moves to `InProgress` when the caller must send
    /// the request. At most one attempt is ever in flight.
    pub fn begin_login(&mut self, trigger: Trigger) -> bool {
        match (self.state, trigger) {
            (LoginState::Migrate, _) | (LoginState::InProgress, _) => return false,
            (LoginState::NoAuth, Trigger::Automatic) => {
                tracing::debug!(
                    failures = self.failures,
                    "Automatic login suppressed until manual retry"
                );
                return false;
            }
            (LoginState::NoAuth, Trigger::Manual) => {
                tracing::info!(failures = self.failures, "Manual retry, resetting failure count");
                self.failures = 0;
            }
            (LoginState::Active, _) => {
                tracing::debug!("Logging in again while a token is active");
            }
            (LoginState::None, _) => {}
        }
        self.state = LoginState::InProgress;
        true
    }

    /// Manual update requests re-enable automatic logins without starting one.
    pub fn lift_suspension(&mut self) {
        if self.state == LoginState::NoAuth {
            self.state = LoginState::None;
            self.failures = 0;
        }
    }

    pub fn login_succeeded(&mut self) {
        if self.is_migrating() {
            return;
        }
        self.state = LoginState::Active;
        self.failures = 0;
    }

    /// Record a rejected login. Returns `true` when the ceiling was just reached.
    pub fn login_failed(&mut self) -> bool {
        if self.is_migrating() {
            return false;
        }
        self.failures = self.failures.saturating_add(1);
        if self.failures >= MAX_AUTH_FAILURES {
            self.state = LoginState::NoAuth;
            true
        } else {
            self.state = LoginState::None;
            false
        }
    }

    /// A previously valid token was refused by a non-login request.
    ///
    /// Returns `true` if this demoted an active session.
    pub fn token_rejected(&mut self) -> bool {
        if self.state != LoginState::Active {
            return false;
        }
        self.failures = self.failures.saturating_add(1);
        self.state = LoginState::NoAuth;
        true
    }

    pub fn migrate(&mut self) {
        self.state = LoginState::Migrate;
    }
}
