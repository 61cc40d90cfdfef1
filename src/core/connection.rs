//! Connection context: local identity and the outbound wire.
//!
//! The embedding client owns the actual XMPP stream. The core sees it as
//! a cloneable handle carrying the local bare JID, a stanza-id generator,
//! and an unbounded channel the client drains onto the wire. Sending is
//! synchronous and never blocks, which keeps every handler invocation a
//! single uninterrupted unit on the dispatch thread.

use crate::core::stanza::Stanza;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

#[derive(Clone)]
pub struct ClientHandle {
    bare_jid: String,
    wire: UnboundedSender<Stanza>,
}

impl ClientHandle {
    pub fn new(bare_jid: impl Into<String>, wire: UnboundedSender<Stanza>) -> Self {
        Self {
            bare_jid: bare_jid.into(),
            wire,
        }
    }

    /// Local bare JID, used as `responder` on session-accept.
    pub fn bare_jid(&self) -> &str {
        &self.bare_jid
    }

    /// Fresh stanza id for an outbound IQ.
    pub fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Queue a stanza for the wire. A closed receiver means the client is
    /// shutting down; the stanza is dropped.
    pub fn send(&self, stanza: Stanza) {
        let _ = self.wire.send(stanza);
    }

    /// Acknowledge a received IQ with an empty `result`.
    pub fn send_ack(&self, id: &str, to: &str) {
        self.send(Stanza::iq_result(id, to));
    }

    /// Answer a received IQ with a stanza error.
    pub fn send_error(&self, id: &str, to: &str, error_type: &str, condition: &str) {
        self.send(Stanza::iq_error(id, to, error_type, condition));
    }
}
