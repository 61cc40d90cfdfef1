//! Receiver-side Jingle file transfer for XMPP clients.
//!
//! Implements the XEP-0166 session-negotiation state machine profiled
//! for file transfer (XEP-0234) together with the In-Band Bytestream
//! transport (XEP-0047) that carries the payload over the signalling
//! channel.
//!
//! The embedding client supplies the seams: it parses XML off the stream
//! into [`Stanza`] trees and hands IQs/messages to the
//! [`FileTransferEngine`], drains outbound stanzas from the wire channel
//! behind [`ClientHandle`], and renders the notifications pushed through
//! [`ui::notify`]. Everything in between (session tables, content
//! validation, ordered frame handling, file writing and teardown) lives
//! here and runs synchronously on the client's dispatch thread.

pub mod core;
pub mod ui;
pub mod utils;

pub use crate::core::config::CoreConfig;
pub use crate::core::connection::ClientHandle;
pub use crate::core::engine::FileTransferEngine;
pub use crate::core::stanza::Stanza;
pub use crate::ui::notify::{Notification, Notifier, NotifyLevel};
