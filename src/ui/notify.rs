//! User-facing notification surface.
//!
//! The core never renders anything. Every message meant for the user
//! (file offers, completed downloads, failures, the incoming-call ring)
//! is pushed through a channel as a level-tagged notification and the
//! embedding client's console drains and displays them. Verbose
//! diagnostics belong in `tracing` logs, not here.

use tokio::sync::mpsc::UnboundedSender;

// ── Notification Level ───────────────────────────────────────────────────────

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    /// Diagnostic detail the user opted into seeing.
    Debug,
    /// Neutral informational message (e.g. a file offer).
    Info,
    /// Positive outcome (e.g. "Download finished").
    Success,
    /// Non-critical issue (e.g. a declined or aborted transfer).
    Warning,
    /// Actionable error (e.g. "Cannot write to downloads directory").
    Error,
    /// Demands immediate attention (e.g. an incoming call).
    Alert,
}

// ── Notification ─────────────────────────────────────────────────────────────

/// A single user-facing notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotifyLevel,
    pub message: String,
}

impl Notification {
    fn new(level: NotifyLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

// ── Notifier ─────────────────────────────────────────────────────────────────

/// Cloneable handle the core components use to surface notifications.
///
/// Pushing never blocks; if the client has stopped draining (shutdown),
/// notifications are dropped.
#[derive(Clone)]
pub struct Notifier {
    tx: UnboundedSender<Notification>,
}

impl Notifier {
    pub fn new(tx: UnboundedSender<Notification>) -> Self {
        Self { tx }
    }

    // ── Push helpers (one per level) ─────────────────────────────────────

    pub fn debug(&self, message: impl Into<String>) {
        self.push(NotifyLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(NotifyLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(NotifyLevel::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(NotifyLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(NotifyLevel::Error, message);
    }

    pub fn alert(&self, message: impl Into<String>) {
        self.push(NotifyLevel::Alert, message);
    }

    fn push(&self, level: NotifyLevel, message: impl Into<String>) {
        let _ = self.tx.send(Notification::new(level, message));
    }
}
