//! Jingle session data model (XEP-0166 with the XEP-0234 file profile).
//!
//! The Session Manager exclusively owns everything in this module; the
//! byte-stream layer reaches it only through transport-sid lookups, so
//! there are no back-pointers and nothing to dangle.

use crate::core::stanza::{NS_JINGLE_FT5, NS_JINGLE_IBB, NS_JINGLE_RTP, NS_JINGLE_S5B};
use std::collections::HashMap;

// ── States ───────────────────────────────────────────────────────────────────

/// Negotiation state of a session. A terminated session is removed from
/// the table outright rather than parked in a third state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// `session-initiate` validated; waiting for the local accept.
    Initiated,
    /// `session-accept` emitted; transports may open.
    Accepted,
}

/// Transfer state of a single content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentState {
    Pending,
    TransferFinished,
}

// ── Content attributes ───────────────────────────────────────────────────────

/// Which party created a content, per the `creator` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creator {
    Initiator,
    Responder,
    Unknown,
}

impl Creator {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("initiator") => Creator::Initiator,
            Some("responder") => Creator::Responder,
            _ => Creator::Unknown,
        }
    }
}

/// Which party sends data on a content, per the `senders` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Senders {
    Both,
    Initiator,
    Responder,
    None,
    Unknown,
}

impl Senders {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("both") => Senders::Both,
            Some("initiator") => Senders::Initiator,
            Some("responder") => Senders::Responder,
            Some("none") => Senders::None,
            _ => Senders::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Senders::Both => "both",
            Senders::Initiator => "initiator",
            Senders::Responder => "responder",
            Senders::None => "none",
            Senders::Unknown => "unknown",
        }
    }
}

// ── File metadata ────────────────────────────────────────────────────────────

/// Metadata of an offered file, stored as received off the wire so the
/// session-accept can echo it verbatim.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub media_type: Option<String>,
    pub date: Option<String>,
    /// Decimal size string as received; parsed only when the byte-stream
    /// needs to know when to stop.
    pub size: String,
    pub hash: Option<String>,
}

impl FileInfo {
    pub fn parsed_size(&self) -> Option<u64> {
        self.size.parse().ok()
    }
}

// ── Description ──────────────────────────────────────────────────────────────

/// What a content carries. Only file transfer is negotiable; RTP is
/// recognised so call proposals can be reported, never accepted.
#[derive(Debug, Clone)]
pub enum Description {
    FileTransfer(FileInfo),
    Rtp,
}

impl Description {
    pub fn ns(&self) -> &'static str {
        match self {
            Description::FileTransfer(_) => NS_JINGLE_FT5,
            Description::Rtp => NS_JINGLE_RTP,
        }
    }

    pub fn file(&self) -> Option<&FileInfo> {
        match self {
            Description::FileTransfer(info) => Some(info),
            Description::Rtp => None,
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    InBandBytestream,
    Socks5,
}

impl TransportType {
    pub fn from_ns(ns: &str) -> Option<Self> {
        match ns {
            NS_JINGLE_IBB => Some(TransportType::InBandBytestream),
            NS_JINGLE_S5B => Some(TransportType::Socks5),
            _ => None,
        }
    }

    pub fn ns(self) -> &'static str {
        match self {
            TransportType::InBandBytestream => NS_JINGLE_IBB,
            TransportType::Socks5 => NS_JINGLE_S5B,
        }
    }
}

/// Negotiated transport of a content.
#[derive(Debug, Clone)]
pub struct JingleTransport {
    pub kind: TransportType,
    /// Byte-stream id; unique across every content of every session.
    pub sid: String,
    pub block_size: u32,
    /// Streamhost candidates; SOCKS5 only, always empty for IBB.
    pub candidates: Vec<String>,
}

// ── Content & Session ────────────────────────────────────────────────────────

/// One negotiated payload leg of a session.
#[derive(Debug, Clone)]
pub struct JingleContent {
    pub name: String,
    pub creator: Creator,
    pub senders: Senders,
    pub description: Description,
    pub transport: JingleTransport,
    pub state: ContentState,
}

/// A live Jingle session, keyed in the manager by `sid`.
#[derive(Debug)]
pub struct JingleSession {
    pub sid: String,
    /// Full JID of the peer that opened the session.
    pub initiator: String,
    pub state: SessionState,
    /// Contents keyed by name; names are unique within a session.
    pub contents: HashMap<String, JingleContent>,
}

impl JingleSession {
    pub fn new(sid: impl Into<String>, initiator: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            initiator: initiator.into(),
            state: SessionState::Initiated,
            contents: HashMap::new(),
        }
    }

    /// True once every content has completed its transfer.
    pub fn all_transfers_finished(&self) -> bool {
        !self.contents.is_empty()
            && self
                .contents
                .values()
                .all(|c| c.state == ContentState::TransferFinished)
    }
}
