//! Jingle Session Manager (XEP-0166): owns every negotiated session and
//! drives the initiate → accept → transfer → terminate lifecycle.
//!
//! Architecture rule: this module exclusively owns all session, content
//! and file metadata. The byte-stream layer never stores references into
//! it; every cross-component access goes through a transport-sid lookup
//! here, so a removed session can never be observed through a stale
//! handle. Reverse lookup is backed by a secondary index kept coherent
//! with every insertion and removal.

pub mod session;

use crate::core::config::MAX_BLOCK_SIZE;
use crate::core::connection::ClientHandle;
use crate::core::jingle::session::{
    ContentState, Creator, Description, FileInfo, JingleContent, JingleSession, JingleTransport,
    Senders, SessionState, TransportType,
};
use crate::core::stanza::{Stanza, NS_JINGLE, NS_JINGLE_FT5, NS_JINGLE_MESSAGE};
use crate::ui::notify::Notifier;
use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

// ── Session Manager ──────────────────────────────────────────────────────────

pub struct SessionManager {
    ctx: ClientHandle,
    notify: Notifier,
    /// Accept offers without waiting for the user (placeholder policy).
    auto_accept: bool,
    /// Live sessions keyed by Jingle sid.
    sessions: HashMap<String, JingleSession>,
    /// transport-sid → (session sid, content name). Transport sids are
    /// unique across all sessions; insertion enforces it.
    transport_index: HashMap<String, (String, String)>,
}

impl SessionManager {
    pub fn new(ctx: ClientHandle, notify: Notifier, auto_accept: bool) -> Self {
        Self {
            ctx,
            notify,
            auto_accept,
            sessions: HashMap::new(),
            transport_index: HashMap::new(),
        }
    }

    // ── Inbound dispatch ─────────────────────────────────────────────────

    /// Handle an IQ carrying a `jingle` child. Returns true iff the
    /// stanza belonged to the Jingle namespace and was consumed.
    pub fn handle_jingle_iq(&mut self, stanza: &Stanza) -> bool {
        let Some(jingle) = stanza.child_by_name_and_ns("jingle", NS_JINGLE) else {
            return false;
        };

        let Some(action) = jingle.attr("action") else {
            debug!(event = "jingle_no_action", "jingle element without action discarded");
            return true;
        };

        match action {
            "session-initiate" => self.handle_session_initiate(stanza, jingle),
            "session-terminate" => self.handle_session_terminate(stanza, jingle),
            // Recognised negotiation actions this receiver-side core does
            // not drive; consumed so the router does not surface them as
            // unknown stanzas.
            "session-info" | "session-accept" | "transport-accept" | "transport-info"
            | "transport-reject" | "transport-replace" => {
                debug!(event = "jingle_action_ignored", action);
            }
            _ => {
                debug!(event = "jingle_action_unknown", action);
            }
        }
        true
    }

    /// Handle a XEP-0353 message. A `propose` describing an RTP session
    /// rings the user; nothing is negotiated. Returns true iff consumed.
    pub fn handle_jingle_message(&self, stanza: &Stanza) -> bool {
        let Some(propose) = stanza.child_by_name_and_ns("propose", NS_JINGLE_MESSAGE) else {
            return false;
        };
        if propose.child_by_ns(Description::Rtp.ns()).is_none() {
            return false;
        }

        let from = stanza.from().unwrap_or("unknown peer");
        self.notify
            .alert(format!("Ring ring: {from} is trying to call you"));
        true
    }

    // ── Session-initiate ─────────────────────────────────────────────────

    fn handle_session_initiate(&mut self, stanza: &Stanza, jingle: &Stanza) {
        let Some(from) = stanza.from() else {
            debug!(event = "jingle_initiate_no_from");
            return;
        };
        let Some(id) = stanza.id() else {
            debug!(event = "jingle_initiate_no_id", from);
            return;
        };
        let Some(sid) = jingle.attr("sid") else {
            debug!(event = "jingle_initiate_no_sid", from);
            return;
        };
        let Some(initiator) = jingle.attr("initiator") else {
            debug!(event = "jingle_initiate_no_initiator", sid);
            return;
        };
        if initiator != from {
            debug!(
                event = "jingle_initiator_mismatch",
                sid,
                initiator,
                from,
                "initiator attribute does not match IQ sender"
            );
            return;
        }
        if self.sessions.contains_key(sid) {
            warn!(
                event = "jingle_duplicate_sid",
                sid, "session-initiate for a live session discarded"
            );
            return;
        }

        // Acknowledge before content validation; a malformed content set
        // still terminates cleanly below.
        self.ctx.send_ack(id, from);
        self.sessions
            .insert(sid.to_string(), JingleSession::new(sid, from));

        let mut contents: Vec<JingleContent> = Vec::new();
        for child in jingle.children() {
            let Some(content) = self.parse_content(from, child) else {
                continue;
            };
            // Transport sids key the reverse index; a colliding content
            // would shadow a live byte-stream.
            if self.transport_index.contains_key(&content.transport.sid)
                || contents
                    .iter()
                    .any(|c| c.transport.sid == content.transport.sid)
            {
                warn!(
                    event = "jingle_transport_sid_in_use",
                    sid,
                    transport_sid = %content.transport.sid
                );
                continue;
            }
            if contents.iter().any(|c| c.name == content.name) {
                warn!(event = "jingle_duplicate_content_name", sid, content = %content.name);
                continue;
            }
            contents.push(content);
        }

        if contents.is_empty() {
            debug!(event = "jingle_initiate_no_contents", sid);
            self.terminate_session(sid, "cancel");
            return;
        }

        let hint = if self.auto_accept {
            String::new()
        } else {
            format!(" Use `/files accept {sid}` to receive it or `/files cancel {sid}` to decline.")
        };
        for content in &contents {
            if let Some(file) = content.description.file() {
                let media = file.media_type.as_deref().unwrap_or("unknown type");
                self.notify.info(format!(
                    "File offer from {from}: {} ({} bytes, {media}).{hint}",
                    file.name, file.size
                ));
            }
        }

        info!(
            event = "session_initiated",
            sid,
            from,
            contents = contents.len()
        );

        if let Some(session) = self.sessions.get_mut(sid) {
            for content in contents {
                self.transport_index.insert(
                    content.transport.sid.clone(),
                    (sid.to_string(), content.name.clone()),
                );
                session.contents.insert(content.name.clone(), content);
            }
        }

        if self.auto_accept {
            self.accept_session(sid);
        }
    }

    /// Validate one child of the `jingle` element against the content
    /// rules. A failing child is dropped so a cooperative peer is not
    /// penalised for one bad leg; `None` means skip.
    fn parse_content(&self, from: &str, child: &Stanza) -> Option<JingleContent> {
        if child.name() != "content" {
            debug!(event = "jingle_child_skipped", tag = child.name());
            return None;
        }
        let Some(description_stanza) = child.child("description") else {
            debug!(event = "jingle_content_no_description");
            return None;
        };
        let Some(transport_stanza) = child.child("transport") else {
            debug!(event = "jingle_content_no_transport");
            return None;
        };
        let Some(transport_ns) = transport_stanza.ns() else {
            debug!(event = "jingle_transport_no_ns");
            return None;
        };
        let Some(description_ns) = description_stanza.ns() else {
            debug!(event = "jingle_description_no_ns");
            return None;
        };
        if description_ns != NS_JINGLE_FT5 {
            self.notify.info(format!(
                "Unsupported content offered by {from} (namespace {description_ns})"
            ));
            debug!(event = "jingle_description_unsupported", ns = description_ns);
            return None;
        }
        let Some(name) = child.attr("name") else {
            debug!(event = "jingle_content_no_name");
            return None;
        };
        let creator = Creator::parse(child.attr("creator"));
        if creator == Creator::Unknown {
            debug!(
                event = "jingle_content_bad_creator",
                name,
                creator = child.attr("creator").unwrap_or("absent")
            );
            return None;
        }
        let senders = Senders::parse(child.attr("senders"));

        let Some(file_stanza) = description_stanza.child("file") else {
            debug!(event = "jingle_description_no_file", name);
            return None;
        };
        // Without a name there is nothing to write, without a size no way
        // to know when the stream is done; the rest is optional metadata.
        let Some(file_name) = file_stanza.child_text("name") else {
            debug!(event = "jingle_file_no_name", name);
            return None;
        };
        let Some(file_size) = file_stanza.child_text("size") else {
            debug!(event = "jingle_file_no_size", name);
            return None;
        };
        let file = FileInfo {
            name: file_name.to_string(),
            media_type: file_stanza.child_text("media-type").map(str::to_string),
            date: file_stanza.child_text("date").map(str::to_string),
            size: file_size.to_string(),
            hash: file_stanza.child_text("hash").map(str::to_string),
        };

        let kind = match TransportType::from_ns(transport_ns) {
            Some(TransportType::InBandBytestream) => TransportType::InBandBytestream,
            _ => {
                self.notify.info(format!(
                    "Unsupported transport offered by {from} (namespace {transport_ns})"
                ));
                debug!(event = "jingle_transport_unsupported", ns = transport_ns);
                return None;
            }
        };
        let Some(transport_sid) = transport_stanza.attr("sid") else {
            debug!(event = "jingle_transport_no_sid", name);
            return None;
        };
        let block_size = match transport_stanza
            .attr("block-size")
            .and_then(|raw| raw.parse::<u32>().ok())
        {
            Some(b) if (1..=MAX_BLOCK_SIZE).contains(&b) => b,
            _ => {
                debug!(
                    event = "jingle_transport_bad_block_size",
                    name,
                    block_size = transport_stanza.attr("block-size").unwrap_or("absent")
                );
                return None;
            }
        };

        Some(JingleContent {
            name: name.to_string(),
            creator,
            senders,
            description: Description::FileTransfer(file),
            transport: JingleTransport {
                kind,
                sid: transport_sid.to_string(),
                block_size,
                candidates: Vec::new(),
            },
            state: ContentState::Pending,
        })
    }

    // ── Session-terminate (inbound) ──────────────────────────────────────

    fn handle_session_terminate(&mut self, stanza: &Stanza, jingle: &Stanza) {
        let Some(from) = stanza.from() else {
            debug!(event = "jingle_terminate_no_from");
            return;
        };
        let Some(sid) = jingle.attr("sid") else {
            debug!(event = "jingle_terminate_no_sid", from);
            return;
        };
        match self.sessions.get(sid) {
            None => {
                debug!(event = "jingle_terminate_unknown", sid);
                return;
            }
            Some(session) if session.initiator != from => {
                debug!(event = "jingle_terminate_wrong_peer", sid, from);
                return;
            }
            Some(_) => {}
        }

        if let Some(id) = stanza.id() {
            self.ctx.send_ack(id, from);
        }

        let reason = jingle
            .child("reason")
            .and_then(|r| r.children().first())
            .map(|r| r.name().to_string())
            .unwrap_or_else(|| "no reason given".to_string());

        self.remove_session(sid);
        self.notify
            .info(format!("File transfer session with {from} ended ({reason})"));
        info!(event = "session_terminated_by_peer", sid, reason = %reason);
    }

    // ── User consent gate ────────────────────────────────────────────────

    /// Accept a pending file offer, emitting `session-accept`.
    pub fn accept(&mut self, sid: &str) -> Result<()> {
        match self.sessions.get(sid) {
            None => bail!("no file-transfer session {sid}"),
            Some(session) if session.state != SessionState::Initiated => {
                bail!("session {sid} is already accepted")
            }
            Some(_) => {}
        }
        self.accept_session(sid);
        Ok(())
    }

    /// Decline a pending offer or cancel a running session.
    pub fn reject(&mut self, sid: &str) -> Result<()> {
        let Some(session) = self.sessions.get(sid) else {
            bail!("no file-transfer session {sid}");
        };
        let reason = match session.state {
            SessionState::Initiated => "decline",
            SessionState::Accepted => "cancel",
        };
        self.terminate_session(sid, reason);
        self.notify.warn(format!("File transfer {sid} {reason}d"));
        Ok(())
    }

    // ── Session-accept emission ──────────────────────────────────────────

    fn accept_session(&mut self, sid: &str) {
        let Some(session) = self.sessions.get(sid) else {
            return;
        };

        let mut jingle = Stanza::with_ns("jingle", NS_JINGLE);
        jingle.set_attr("action", "session-accept");
        jingle.set_attr("sid", &session.sid);
        jingle.set_attr("responder", self.ctx.bare_jid());

        for content in session.contents.values() {
            let mut content_stanza = Stanza::new("content");
            content_stanza.set_attr("creator", "initiator");
            content_stanza.set_attr("senders", content.senders.as_str());
            content_stanza.set_attr("name", &content.name);

            let mut description = Stanza::with_ns("description", content.description.ns());
            if let Some(file) = content.description.file() {
                let mut file_stanza = Stanza::new("file");
                file_stanza.add_child_with_text("name", &file.name);
                if let Some(media_type) = &file.media_type {
                    file_stanza.add_child_with_text("media-type", media_type);
                }
                if let Some(date) = &file.date {
                    file_stanza.add_child_with_text("date", date);
                }
                file_stanza.add_child_with_text("size", &file.size);
                if let Some(hash) = &file.hash {
                    file_stanza.add_child_with_text("hash", hash);
                }
                description.add_child(file_stanza);
            }
            content_stanza.add_child(description);

            let mut transport = Stanza::with_ns("transport", content.transport.kind.ns());
            transport.set_attr("block-size", content.transport.block_size.to_string());
            transport.set_attr("sid", &content.transport.sid);
            content_stanza.add_child(transport);

            jingle.add_child(content_stanza);
        }

        let mut iq = Stanza::iq_set(&self.ctx.next_id(), &session.initiator);
        iq.add_child(jingle);
        self.ctx.send(iq);

        if let Some(session) = self.sessions.get_mut(sid) {
            session.state = SessionState::Accepted;
        }
        info!(event = "session_accepted", sid);
    }

    // ── Session-terminate emission ───────────────────────────────────────

    /// Emit `session-terminate` with the named reason and drop the
    /// session. Dropping releases contents, file metadata and index
    /// entries in one sweep.
    fn terminate_session(&mut self, sid: &str, reason: &str) {
        let Some(session) = self.remove_session(sid) else {
            return;
        };

        let mut jingle = Stanza::with_ns("jingle", NS_JINGLE);
        jingle.set_attr("action", "session-terminate");
        jingle.set_attr("sid", &session.sid);

        let mut reason_stanza = Stanza::new("reason");
        reason_stanza.add_child(Stanza::new(reason));
        jingle.add_child(reason_stanza);

        let mut iq = Stanza::iq_set(&self.ctx.next_id(), &session.initiator);
        iq.add_child(jingle);
        self.ctx.send(iq);

        info!(event = "session_terminated", sid, reason);
    }

    fn remove_session(&mut self, sid: &str) -> Option<JingleSession> {
        let session = self.sessions.remove(sid)?;
        for content in session.contents.values() {
            self.transport_index.remove(&content.transport.sid);
        }
        Some(session)
    }

    // ── Byte-stream facing operations ────────────────────────────────────

    /// Content negotiated for a byte-stream, if any.
    pub fn lookup_content_by_transport_sid(&self, transport_sid: &str) -> Option<&JingleContent> {
        let (session_sid, content_name) = self.transport_index.get(transport_sid)?;
        self.sessions.get(session_sid)?.contents.get(content_name)
    }

    /// Negotiation state of the session owning a byte-stream.
    pub fn session_state_by_transport_sid(&self, transport_sid: &str) -> Option<SessionState> {
        let (session_sid, _) = self.transport_index.get(transport_sid)?;
        self.sessions.get(session_sid).map(|s| s.state)
    }

    /// Update a content's transfer state. Once every content of the
    /// owning session has finished, the session is terminated with
    /// reason `success` and removed.
    pub fn set_content_state_by_transport_sid(&mut self, transport_sid: &str, state: ContentState) {
        let Some((session_sid, content_name)) = self.transport_index.get(transport_sid).cloned()
        else {
            warn!(event = "jingle_unindexed_transport", transport_sid);
            return;
        };

        let finished = {
            let Some(session) = self.sessions.get_mut(&session_sid) else {
                return;
            };
            if let Some(content) = session.contents.get_mut(&content_name) {
                content.state = state;
            }
            session.all_transfers_finished()
        };

        if finished {
            info!(event = "session_complete", sid = %session_sid);
            self.terminate_session(&session_sid, "success");
        }
    }

    // ── Lifecycle & introspection ────────────────────────────────────────

    /// Drop every session without emitting wire traffic.
    pub fn shutdown(&mut self) {
        if !self.sessions.is_empty() {
            info!(event = "jingle_shutdown", sessions = self.sessions.len());
        }
        self.sessions.clear();
        self.transport_index.clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_state(&self, sid: &str) -> Option<SessionState> {
        self.sessions.get(sid).map(|s| s.state)
    }
}
