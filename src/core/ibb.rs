//! In-Band Bytestream transport (XEP-0047), receiver side.
//!
//! Owns the table of open byte-streams keyed by transport sid. Frames are
//! validated against the content the Session Manager negotiated, appended
//! to the target file in strict sequence order, and the stream is closed
//! once the announced size is reached. The table stores no file metadata:
//! every access re-consults the Session Manager by transport-sid, so a
//! byte-stream can never observe a session that no longer exists.

use crate::core::connection::ClientHandle;
use crate::core::jingle::session::{ContentState, SessionState, TransportType};
use crate::core::jingle::SessionManager;
use crate::core::stanza::{Stanza, NS_IBB};
use crate::ui::notify::Notifier;
use crate::utils::downloads::Downloads;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use tracing::{debug, error, info, warn};

// ── IBB session ──────────────────────────────────────────────────────────────

/// One open byte-stream. The backing content lives in the Session
/// Manager; this entry must never outlive it.
struct IbbSession {
    /// Highest accepted frame number.
    seq: u16,
    /// Target file, opened when frame 0 is accepted.
    stream: Option<File>,
    /// Bytes written so far, compared against the announced file size.
    written: u64,
}

impl IbbSession {
    fn new() -> Self {
        Self {
            seq: 0,
            stream: None,
            written: 0,
        }
    }
}

// ── IBB transport ────────────────────────────────────────────────────────────

pub struct IbbTransport {
    ctx: ClientHandle,
    notify: Notifier,
    downloads: Downloads,
    /// Open byte-streams keyed by transport sid.
    sessions: HashMap<String, IbbSession>,
}

impl IbbTransport {
    pub fn new(ctx: ClientHandle, notify: Notifier, downloads: Downloads) -> Self {
        Self {
            ctx,
            notify,
            downloads,
            sessions: HashMap::new(),
        }
    }

    /// Handle an IQ carrying an IBB-namespaced child. Returns true iff
    /// the stanza belonged to the IBB namespace and was consumed.
    pub fn handle_ibb(&mut self, jingle: &mut SessionManager, stanza: &Stanza) -> bool {
        let Some(ibb) = stanza.child_by_ns(NS_IBB) else {
            return false;
        };

        match ibb.name() {
            "open" => self.on_open(jingle, stanza, ibb),
            "data" => self.on_data(jingle, stanza, ibb),
            "close" => self.on_close(jingle, stanza, ibb),
            other => warn!(event = "ibb_unknown_tag", tag = other),
        }
        true
    }

    // ── Open ─────────────────────────────────────────────────────────────

    fn on_open(&mut self, jingle: &SessionManager, stanza: &Stanza, open: &Stanza) {
        let Some(id) = stanza.id() else {
            debug!(event = "ibb_open_no_id");
            return;
        };
        let Some(from) = stanza.from() else {
            debug!(event = "ibb_open_no_from");
            return;
        };
        let Some(sid) = open.attr("sid") else {
            debug!(event = "ibb_open_no_sid", from);
            return;
        };

        if self.sessions.contains_key(sid) {
            error!(event = "ibb_duplicate_open", sid);
            self.ctx.send_error(id, from, "cancel", "not-acceptable");
            return;
        }

        let Some(content) = jingle.lookup_content_by_transport_sid(sid) else {
            debug!(event = "ibb_open_unnegotiated", sid);
            self.ctx.send_error(id, from, "cancel", "not-acceptable");
            return;
        };
        if content.transport.kind != TransportType::InBandBytestream {
            debug!(event = "ibb_open_wrong_transport", sid);
            self.ctx.send_error(id, from, "cancel", "not-acceptable");
            return;
        }
        // The transport is usable only once session-accept went out; a
        // peer racing ahead of the user's consent is refused.
        if jingle.session_state_by_transport_sid(sid) != Some(SessionState::Accepted) {
            debug!(event = "ibb_open_before_accept", sid);
            self.ctx.send_error(id, from, "cancel", "not-acceptable");
            return;
        }

        // Character-for-character comparison against the negotiated value
        // re-serialised to decimal: "04096" does not match 4096.
        let negotiated = content.transport.block_size.to_string();
        if open.attr("block-size") != Some(negotiated.as_str()) {
            warn!(
                event = "ibb_block_size_mismatch",
                sid,
                offered = open.attr("block-size").unwrap_or("absent"),
                negotiated = %negotiated
            );
            self.ctx.send_error(id, from, "modify", "resource-constraint");
            return;
        }

        self.sessions.insert(sid.to_string(), IbbSession::new());
        self.ctx.send_ack(id, from);
        info!(event = "ibb_open", sid);
    }

    // ── Data ─────────────────────────────────────────────────────────────

    fn on_data(&mut self, jingle: &mut SessionManager, stanza: &Stanza, data: &Stanza) {
        let Some(id) = stanza.id() else {
            debug!(event = "ibb_data_no_id");
            return;
        };
        let Some(from) = stanza.from() else {
            debug!(event = "ibb_data_no_from");
            return;
        };
        let Some(sid) = data.attr("sid") else {
            debug!(event = "ibb_data_no_sid");
            return;
        };
        let Some(seq) = data.attr("seq").and_then(|raw| raw.parse::<u16>().ok()) else {
            warn!(
                event = "ibb_bad_seq",
                sid,
                seq = data.attr("seq").unwrap_or("absent")
            );
            return;
        };

        let Some(raw) = data.text() else {
            warn!(event = "ibb_data_no_payload", sid);
            self.ctx.send_error(id, from, "cancel", "bad-request");
            return;
        };
        // Stanza character data is routinely line-wrapped; strip the
        // whitespace before decoding, anything else is a bad request.
        let cleaned: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let payload = match STANDARD.decode(cleaned.as_bytes()) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(event = "ibb_decode_failure", sid, error = %error);
                self.ctx.send_error(id, from, "cancel", "bad-request");
                return;
            }
        };

        let Some((expected_seq, stream_open)) =
            self.sessions.get(sid).map(|s| (s.seq, s.stream.is_some()))
        else {
            debug!(event = "ibb_data_unknown_sid", sid);
            self.ctx.send_error(id, from, "cancel", "item-not-found");
            return;
        };

        // Strict ordering: frame 0 exactly once, then n+1 forever. A gap,
        // a duplicate, or a 16-bit wraparound means corruption or a
        // hostile peer; continuing would corrupt the file on disk.
        if seq == 0 {
            if expected_seq != 0 || stream_open {
                warn!(event = "ibb_replayed_first_frame", sid);
                self.send_close(jingle, sid, from);
                return;
            }
        } else if Some(seq) != expected_seq.checked_add(1) {
            warn!(
                event = "ibb_out_of_order",
                sid,
                seq,
                expected = expected_seq.wrapping_add(1)
            );
            self.send_close(jingle, sid, from);
            return;
        }

        // File metadata is fetched from the Session Manager on every
        // frame rather than cached here.
        let lookup = jingle
            .lookup_content_by_transport_sid(sid)
            .and_then(|content| content.description.file())
            .map(|info| (info.name.clone(), info.parsed_size(), info.size.clone()));
        let (file_name, file_size) = match lookup {
            Some((name, Some(size), _)) => (name, size),
            Some((name, None, raw_size)) => {
                self.notify.warn(format!(
                    "Cannot parse the announced size for {name} ({raw_size}); closing the stream"
                ));
                warn!(event = "ibb_unparsable_size", sid, size = %raw_size);
                self.send_close(jingle, sid, from);
                return;
            }
            None => {
                warn!(event = "ibb_content_missing", sid);
                self.send_close(jingle, sid, from);
                return;
            }
        };

        if seq == 0 {
            let path = match self.downloads.unique_path(&file_name) {
                Ok(path) => path,
                Err(error) => {
                    error!(event = "ibb_downloads_failure", sid, error = %error);
                    self.notify.error(format!(
                        "Cannot prepare a download location for {file_name}: {error}"
                    ));
                    self.send_close(jingle, sid, from);
                    return;
                }
            };
            let stream = match File::create(&path) {
                Ok(stream) => stream,
                Err(error) => {
                    error!(event = "ibb_open_failure", sid, path = %path.display(), error = %error);
                    self.notify
                        .error(format!("Cannot write {}: {error}", path.display()));
                    self.send_close(jingle, sid, from);
                    return;
                }
            };
            self.notify
                .info(format!("Downloading {file_name} to {}", path.display()));
            if let Some(session) = self.sessions.get_mut(sid) {
                session.stream = Some(stream);
            }
        } else if let Some(session) = self.sessions.get_mut(sid) {
            session.seq = seq;
        }

        // The stream can still be absent: a virgin session fed seq 1
        // passes the n+1 check without ever opening the file.
        let mut no_stream = false;
        let mut write_error: Option<std::io::Error> = None;
        let mut written: u64 = 0;
        match self.sessions.get_mut(sid) {
            None => return,
            Some(session) => match session.stream.as_mut() {
                None => no_stream = true,
                Some(stream) => match stream.write_all(&payload) {
                    Ok(()) => {
                        session.written += payload.len() as u64;
                        written = session.written;
                    }
                    Err(error) => write_error = Some(error),
                },
            },
        }
        if no_stream {
            warn!(event = "ibb_no_stream", sid);
            self.send_close(jingle, sid, from);
            return;
        }
        if let Some(error) = write_error {
            error!(event = "ibb_write_failure", sid, error = %error);
            self.notify
                .error(format!("Write failed for {file_name}: {error}"));
            self.send_close(jingle, sid, from);
            return;
        }

        self.ctx.send_ack(id, from);
        debug!(event = "ibb_frame_written", sid, seq, written, size = file_size);

        if written >= file_size {
            info!(event = "ibb_transfer_complete", sid, bytes = written);
            self.notify
                .success(format!("Download of {file_name} finished"));
            self.send_close(jingle, sid, from);
        }
    }

    // ── Close (inbound) ──────────────────────────────────────────────────

    fn on_close(&mut self, jingle: &mut SessionManager, stanza: &Stanza, close: &Stanza) {
        let Some(id) = stanza.id() else {
            debug!(event = "ibb_close_no_id");
            return;
        };
        let Some(from) = stanza.from() else {
            debug!(event = "ibb_close_no_from");
            return;
        };

        let Some(sid) = close.attr("sid") else {
            debug!(event = "ibb_close_no_sid", from);
            self.ctx.send_error(id, from, "cancel", "item-not-found");
            return;
        };
        if self.sessions.remove(sid).is_none() {
            debug!(event = "ibb_close_unknown_sid", sid);
            self.ctx.send_error(id, from, "cancel", "item-not-found");
            return;
        }

        // Ack before the content promotion: promoting may terminate the
        // whole session, and that terminate must follow the ack.
        self.ctx.send_ack(id, from);
        jingle.set_content_state_by_transport_sid(sid, ContentState::TransferFinished);
        info!(event = "ibb_closed_by_peer", sid);
    }

    // ── Close (outbound) ─────────────────────────────────────────────────

    /// Close a byte-stream towards the peer, used both for normal
    /// completion and as the abort path. The table entry goes away on
    /// every path; dropping it closes the file handle.
    fn send_close(&mut self, jingle: &mut SessionManager, sid: &str, to: &str) {
        let mut close = Stanza::with_ns("close", NS_IBB);
        close.set_attr("sid", sid);
        let mut iq = Stanza::iq_set(&self.ctx.next_id(), to);
        iq.add_child(close);
        self.ctx.send(iq);

        if self.sessions.remove(sid).is_some() {
            jingle.set_content_state_by_transport_sid(sid, ContentState::TransferFinished);
        }
        info!(event = "ibb_closed", sid);
    }

    // ── Lifecycle & coherence ────────────────────────────────────────────

    /// Drop byte-streams whose content disappeared from the Session
    /// Manager (peer-terminated or locally cancelled sessions).
    pub fn prune_orphans(&mut self, jingle: &SessionManager) {
        let orphaned: Vec<String> = self
            .sessions
            .keys()
            .filter(|sid| jingle.lookup_content_by_transport_sid(sid.as_str()).is_none())
            .cloned()
            .collect();
        for sid in orphaned {
            debug!(event = "ibb_orphan_pruned", sid = %sid);
            self.sessions.remove(&sid);
        }
    }

    /// Drop every byte-stream, closing any open file handles.
    pub fn shutdown(&mut self) {
        if !self.sessions.is_empty() {
            info!(event = "ibb_shutdown", sessions = self.sessions.len());
        }
        self.sessions.clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stanza::{NS_JINGLE, NS_JINGLE_FT5, NS_JINGLE_IBB};
    use crate::ui::notify::Notification;
    use std::path::PathBuf;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use uuid::Uuid;

    const PEER: &str = "romeo@montague.net/orchard";

    struct Rig {
        jingle: SessionManager,
        ibb: IbbTransport,
        wire: UnboundedReceiver<Stanza>,
        notify: UnboundedReceiver<Notification>,
        dir: PathBuf,
    }

    /// Negotiated session s1/c0 on transport t1 with the given file size
    /// and block-size, wire drained past the ack + accept.
    fn rig(size: &str, block_size: &str) -> Rig {
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let ctx = ClientHandle::new("juliet@capulet.com", wire_tx);
        let notifier = Notifier::new(notify_tx);
        let dir = std::env::temp_dir().join(format!("jabberdrop_test_ibb_{}", Uuid::new_v4()));

        let mut jingle = SessionManager::new(ctx.clone(), notifier.clone(), true);
        jingle.handle_jingle_iq(&initiate_stanza("s1", "c0", "t1", block_size, "x.txt", size));
        while wire_rx.try_recv().is_ok() {}

        let ibb = IbbTransport::new(ctx, notifier, Downloads::new(Some(dir.clone())));
        Rig {
            jingle,
            ibb,
            wire: wire_rx,
            notify: notify_rx,
            dir,
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn initiate_stanza(
        sid: &str,
        content_name: &str,
        transport_sid: &str,
        block_size: &str,
        file_name: &str,
        size: &str,
    ) -> Stanza {
        let mut content = Stanza::new("content");
        content.set_attr("creator", "initiator");
        content.set_attr("senders", "initiator");
        content.set_attr("name", content_name);
        let mut description = Stanza::with_ns("description", NS_JINGLE_FT5);
        let mut file = Stanza::new("file");
        file.add_child_with_text("name", file_name);
        file.add_child_with_text("size", size);
        description.add_child(file);
        content.add_child(description);
        let mut transport = Stanza::with_ns("transport", NS_JINGLE_IBB);
        transport.set_attr("sid", transport_sid);
        transport.set_attr("block-size", block_size);
        content.add_child(transport);

        let mut jingle = Stanza::with_ns("jingle", NS_JINGLE);
        jingle.set_attr("action", "session-initiate");
        jingle.set_attr("sid", sid);
        jingle.set_attr("initiator", PEER);
        jingle.add_child(content);
        let mut iq = Stanza::iq("set", "init-1");
        iq.set_attr("from", PEER);
        iq.add_child(jingle);
        iq
    }

    fn open_stanza(sid: &str, block_size: &str) -> Stanza {
        let mut open = Stanza::with_ns("open", NS_IBB);
        open.set_attr("sid", sid);
        open.set_attr("block-size", block_size);
        let mut iq = Stanza::iq("set", "open-1");
        iq.set_attr("from", PEER);
        iq.add_child(open);
        iq
    }

    fn data_stanza(sid: &str, seq: &str, payload: &[u8]) -> Stanza {
        let mut data = Stanza::with_ns("data", NS_IBB);
        data.set_attr("sid", sid);
        data.set_attr("seq", seq);
        data.set_text(STANDARD.encode(payload));
        let mut iq = Stanza::iq("set", format!("data-{seq}").as_str());
        iq.set_attr("from", PEER);
        iq.add_child(data);
        iq
    }

    fn close_stanza(sid: &str) -> Stanza {
        let mut close = Stanza::with_ns("close", NS_IBB);
        close.set_attr("sid", sid);
        let mut iq = Stanza::iq("set", "close-1");
        iq.set_attr("from", PEER);
        iq.add_child(close);
        iq
    }

    fn error_condition(stanza: &Stanza) -> (String, String) {
        let error = stanza.child("error").expect("error child");
        let condition = error
            .children()
            .first()
            .expect("condition child")
            .name()
            .to_string();
        (error.attr("type").unwrap().to_string(), condition)
    }

    #[test]
    fn test_open_acked() {
        let mut rig = rig("12", "4096");
        assert!(rig
            .ibb
            .handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096")));

        let ack = rig.wire.try_recv().unwrap();
        assert_eq!(ack.typ(), Some("result"));
        assert_eq!(ack.id(), Some("open-1"));
        assert_eq!(rig.ibb.session_count(), 1);
    }

    #[test]
    fn test_duplicate_open_not_acceptable() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("cancel".to_string(), "not-acceptable".to_string())
        );
        // Exactly one live session, untouched.
        assert_eq!(rig.ibb.session_count(), 1);
    }

    #[test]
    fn test_open_without_negotiated_content() {
        let mut rig = rig("12", "4096");
        rig.ibb
            .handle_ibb(&mut rig.jingle, &open_stanza("t-unknown", "4096"));

        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("cancel".to_string(), "not-acceptable".to_string())
        );
        assert_eq!(rig.ibb.session_count(), 0);
    }

    #[test]
    fn test_open_before_accept_refused() {
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel();
        let (notify_tx, _notify_rx) = mpsc::unbounded_channel();
        let ctx = ClientHandle::new("juliet@capulet.com", wire_tx);
        let notifier = Notifier::new(notify_tx);
        let dir = std::env::temp_dir().join(format!("jabberdrop_test_ibb_{}", Uuid::new_v4()));

        // Consent gate on: the session stays in `initiated`.
        let mut jingle = SessionManager::new(ctx.clone(), notifier.clone(), false);
        jingle.handle_jingle_iq(&initiate_stanza("s1", "c0", "t1", "4096", "x.txt", "12"));
        while wire_rx.try_recv().is_ok() {}

        let mut ibb = IbbTransport::new(ctx, notifier, Downloads::new(Some(dir)));
        ibb.handle_ibb(&mut jingle, &open_stanza("t1", "4096"));

        let error = wire_rx.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("cancel".to_string(), "not-acceptable".to_string())
        );
        assert_eq!(ibb.session_count(), 0);

        // After the user accepts, the same open goes through.
        jingle.accept("s1").unwrap();
        while wire_rx.try_recv().is_ok() {}
        ibb.handle_ibb(&mut jingle, &open_stanza("t1", "4096"));
        assert_eq!(wire_rx.try_recv().unwrap().typ(), Some("result"));
        assert_eq!(ibb.session_count(), 1);
    }

    #[test]
    fn test_block_size_mismatch() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "2048"));

        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("modify".to_string(), "resource-constraint".to_string())
        );
        assert_eq!(rig.ibb.session_count(), 0);
    }

    #[test]
    fn test_block_size_leading_zero_rejected() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "04096"));

        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("modify".to_string(), "resource-constraint".to_string())
        );
    }

    #[test]
    fn test_data_unknown_sid() {
        let mut rig = rig("12", "4096");
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"ABCD"));

        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("cancel".to_string(), "item-not-found".to_string())
        );
    }

    #[test]
    fn test_data_unparsable_seq_dropped() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        for bad in ["abc", "-1", "65536", ""] {
            let mut data = Stanza::with_ns("data", NS_IBB);
            data.set_attr("sid", "t1");
            data.set_attr("seq", bad);
            data.set_text(STANDARD.encode(b"ABCD"));
            let mut iq = Stanza::iq("set", "data-x");
            iq.set_attr("from", PEER);
            iq.add_child(data);

            assert!(rig.ibb.handle_ibb(&mut rig.jingle, &iq));
            assert!(rig.wire.try_recv().is_err(), "seq {bad:?} must drop silently");
            assert_eq!(rig.ibb.session_count(), 1);
        }
    }

    #[test]
    fn test_data_decode_failure_bad_request() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        let mut data = Stanza::with_ns("data", NS_IBB);
        data.set_attr("sid", "t1");
        data.set_attr("seq", "0");
        data.set_text("&&& not base64 &&&");
        let mut iq = Stanza::iq("set", "data-0");
        iq.set_attr("from", PEER);
        iq.add_child(data);
        rig.ibb.handle_ibb(&mut rig.jingle, &iq);

        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("cancel".to_string(), "bad-request".to_string())
        );
        // Decode failure is an error response, not a teardown.
        assert_eq!(rig.ibb.session_count(), 1);
    }

    #[test]
    fn test_out_of_order_seq_closes_stream() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"ABCD"));
        assert_eq!(rig.wire.try_recv().unwrap().typ(), Some("result"));

        // Gap: seq 2 after 0.
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "2", b"IJKL"));

        let close = rig.wire.try_recv().unwrap();
        assert_eq!(close.typ(), Some("set"));
        let child = close.child_by_ns(NS_IBB).unwrap();
        assert_eq!(child.name(), "close");
        assert_eq!(child.attr("sid"), Some("t1"));

        // Content promoted, sole content → session terminated.
        let terminate = rig.wire.try_recv().unwrap();
        let jingle = terminate.child_by_name_and_ns("jingle", NS_JINGLE).unwrap();
        assert_eq!(jingle.attr("action"), Some("session-terminate"));
        assert!(jingle.child("reason").unwrap().child("success").is_some());

        assert_eq!(rig.ibb.session_count(), 0);
        assert_eq!(rig.jingle.session_count(), 0);

        // No growth beyond the last accepted byte.
        let written = std::fs::read(rig.dir.join("x.txt")).unwrap();
        assert_eq!(written, b"ABCD");
    }

    #[test]
    fn test_duplicate_first_frame_closes_stream() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"ABCD"));
        assert_eq!(rig.wire.try_recv().unwrap().typ(), Some("result"));

        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"ABCD"));
        let close = rig.wire.try_recv().unwrap();
        assert_eq!(close.child_by_ns(NS_IBB).unwrap().name(), "close");
        assert_eq!(rig.ibb.session_count(), 0);

        let written = std::fs::read(rig.dir.join("x.txt")).unwrap();
        assert_eq!(written, b"ABCD");
    }

    #[test]
    fn test_seq_wraparound_rejected() {
        let mut rig = rig("1000000", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"AB"));
        rig.wire.try_recv().unwrap();

        // Fast-forward to the last representable frame number.
        rig.ibb.sessions.get_mut("t1").unwrap().seq = 65534;
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "65535", b"CD"));
        assert_eq!(rig.wire.try_recv().unwrap().typ(), Some("result"));

        // The sender rolls over to 0: rejected, stream closed.
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"EF"));
        let close = rig.wire.try_recv().unwrap();
        assert_eq!(close.child_by_ns(NS_IBB).unwrap().name(), "close");
        assert_eq!(rig.ibb.session_count(), 0);

        let written = std::fs::read(rig.dir.join("x.txt")).unwrap();
        assert_eq!(written, b"ABCD");
    }

    #[test]
    fn test_seq_after_65535_rejected() {
        let mut rig = rig("1000000", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"AB"));
        rig.wire.try_recv().unwrap();

        rig.ibb.sessions.get_mut("t1").unwrap().seq = 65535;
        // No successor of 65535 exists; every non-zero seq is a gap.
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "1", b"CD"));
        let close = rig.wire.try_recv().unwrap();
        assert_eq!(close.child_by_ns(NS_IBB).unwrap().name(), "close");
        assert_eq!(rig.ibb.session_count(), 0);
    }

    #[test]
    fn test_first_frame_with_nonzero_seq_closes() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        // seq 1 on a virgin session passes the n+1 check but there is no
        // open stream to write to.
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "1", b"ABCD"));
        let close = rig.wire.try_recv().unwrap();
        assert_eq!(close.child_by_ns(NS_IBB).unwrap().name(), "close");
        assert_eq!(rig.ibb.session_count(), 0);
    }

    #[test]
    fn test_binary_payload_written_raw() {
        let payload: &[u8] = &[0x00, 0x25, 0x73, 0x00, 0xFF, 0x25, 0x6E, 0x0A];
        let mut rig = rig("8", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", payload));
        assert_eq!(rig.wire.try_recv().unwrap().typ(), Some("result"));
        // Size reached → close follows the ack.
        assert_eq!(
            rig.wire.try_recv().unwrap().child_by_ns(NS_IBB).unwrap().name(),
            "close"
        );

        let written = std::fs::read(rig.dir.join("x.txt")).unwrap();
        assert_eq!(written, payload, "NULs and % bytes must survive verbatim");

        // The user saw the download start and finish.
        let messages: Vec<String> = std::iter::from_fn(|| rig.notify.try_recv().ok())
            .map(|n| n.message)
            .collect();
        assert!(messages.iter().any(|m| m.starts_with("Downloading x.txt")));
        assert!(messages.iter().any(|m| m.contains("finished")));
    }

    #[test]
    fn test_close_unknown_sid() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &close_stanza("t-unknown"));

        let error = rig.wire.try_recv().unwrap();
        assert_eq!(
            error_condition(&error),
            ("cancel".to_string(), "item-not-found".to_string())
        );
        assert_eq!(rig.jingle.session_count(), 1, "no state change");
    }

    #[test]
    fn test_peer_close_finishes_content() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        rig.ibb.handle_ibb(&mut rig.jingle, &close_stanza("t1"));

        // Ack first, then the terminate triggered by the promotion.
        let ack = rig.wire.try_recv().unwrap();
        assert_eq!(ack.typ(), Some("result"));
        assert_eq!(ack.id(), Some("close-1"));
        let terminate = rig.wire.try_recv().unwrap();
        let jingle = terminate.child_by_name_and_ns("jingle", NS_JINGLE).unwrap();
        assert_eq!(jingle.attr("action"), Some("session-terminate"));

        assert_eq!(rig.ibb.session_count(), 0);
        assert_eq!(rig.jingle.session_count(), 0);
    }

    #[test]
    fn test_whitespace_in_payload_tolerated() {
        let mut rig = rig("4", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();

        let encoded = STANDARD.encode(b"ABCD");
        let wrapped = format!("\n  {}\n  {}\n", &encoded[..4], &encoded[4..]);
        let mut data = Stanza::with_ns("data", NS_IBB);
        data.set_attr("sid", "t1");
        data.set_attr("seq", "0");
        data.set_text(wrapped);
        let mut iq = Stanza::iq("set", "data-0");
        iq.set_attr("from", PEER);
        iq.add_child(data);
        rig.ibb.handle_ibb(&mut rig.jingle, &iq);

        assert_eq!(rig.wire.try_recv().unwrap().typ(), Some("result"));
        let written = std::fs::read(rig.dir.join("x.txt")).unwrap();
        assert_eq!(written, b"ABCD");
    }

    #[test]
    fn test_prune_orphans_drops_stale_streams() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();
        assert_eq!(rig.ibb.session_count(), 1);

        rig.jingle.shutdown();
        rig.ibb.prune_orphans(&rig.jingle);
        assert_eq!(rig.ibb.session_count(), 0);
    }

    #[test]
    fn test_shutdown_clears_sessions() {
        let mut rig = rig("12", "4096");
        rig.ibb.handle_ibb(&mut rig.jingle, &open_stanza("t1", "4096"));
        rig.wire.try_recv().unwrap();
        rig.ibb
            .handle_ibb(&mut rig.jingle, &data_stanza("t1", "0", b"AB"));
        rig.wire.try_recv().unwrap();

        rig.ibb.shutdown();
        assert_eq!(rig.ibb.session_count(), 0);
    }

    #[test]
    fn test_non_ibb_stanza_not_consumed() {
        let mut rig = rig("12", "4096");
        let mut iq = Stanza::iq("set", "x1");
        iq.set_attr("from", PEER);
        iq.add_child(Stanza::with_ns("jingle", NS_JINGLE));
        assert!(!rig.ibb.handle_ibb(&mut rig.jingle, &iq));
    }
}
