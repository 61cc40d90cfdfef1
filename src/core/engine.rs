//! FileTransferEngine: sole entry point for the file-transfer core.
//!
//! The embedding client's IQ router hands every inbound IQ and message to
//! this engine; nothing else reaches the Session Manager or the IBB
//! transport directly. The engine also re-establishes the one structural
//! invariant that spans both components: a byte-stream must never outlive
//! the content it was negotiated for, so after any consumed jingle stanza
//! (or a local cancel) orphaned byte-streams are pruned and their file
//! handles closed.
//!
//! Everything runs on the caller's dispatch thread; handlers are
//! synchronous and outbound stanzas leave in the order they were created.

use crate::core::config::CoreConfig;
use crate::core::connection::ClientHandle;
use crate::core::ibb::IbbTransport;
use crate::core::jingle::SessionManager;
use crate::core::stanza::Stanza;
use crate::ui::notify::Notifier;
use crate::utils::downloads::Downloads;
use anyhow::Result;

pub struct FileTransferEngine {
    jingle: SessionManager,
    ibb: IbbTransport,
}

impl FileTransferEngine {
    pub fn new(ctx: ClientHandle, notify: Notifier, config: CoreConfig) -> Self {
        let downloads = Downloads::new(config.downloads_override);
        Self {
            jingle: SessionManager::new(ctx.clone(), notify.clone(), config.auto_accept),
            ibb: IbbTransport::new(ctx, notify, downloads),
        }
    }

    /// Route an inbound IQ. Returns true iff a component consumed it.
    pub fn handle_iq(&mut self, stanza: &Stanza) -> bool {
        if self.jingle.handle_jingle_iq(stanza) {
            // A terminate (peer- or validation-driven) may have removed
            // sessions with live byte-streams.
            self.ibb.prune_orphans(&self.jingle);
            return true;
        }
        self.ibb.handle_ibb(&mut self.jingle, stanza)
    }

    /// Route an inbound message stanza (XEP-0353 call proposals).
    pub fn handle_message(&mut self, stanza: &Stanza) -> bool {
        self.jingle.handle_jingle_message(stanza)
    }

    /// User command surface: accept a pending file offer.
    pub fn accept(&mut self, sid: &str) -> Result<()> {
        self.jingle.accept(sid)
    }

    /// User command surface: decline a pending offer or cancel a running
    /// session, tearing down any byte-stream it still owns.
    pub fn reject(&mut self, sid: &str) -> Result<()> {
        self.jingle.reject(sid)?;
        self.ibb.prune_orphans(&self.jingle);
        Ok(())
    }

    /// Drop all state in both components. No wire traffic; open file
    /// handles are closed.
    pub fn shutdown(&mut self) {
        self.ibb.shutdown();
        self.jingle.shutdown();
    }

    pub fn session_count(&self) -> usize {
        self.jingle.session_count()
    }

    pub fn ibb_session_count(&self) -> usize {
        self.ibb.session_count()
    }
}
