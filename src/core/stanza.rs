//! In-memory stanza tree and builders.
//!
//! The XML text codec belongs to the embedding client; the core works on
//! an owned element tree. Ownership rules:
//! - `add_child` moves the child into the parent, so the root of an
//!   outbound stanza is the only value that ever needs dropping.
//! - Accessors hand out borrows; nothing in the tree is reference-counted.

use std::collections::HashMap;

// ── Namespaces ───────────────────────────────────────────────────────────────

/// Jingle session management (XEP-0166).
pub const NS_JINGLE: &str = "urn:xmpp:jingle:1";
/// Jingle message initiation (XEP-0353).
pub const NS_JINGLE_MESSAGE: &str = "urn:xmpp:jingle-message:0";
/// Jingle RTP sessions (XEP-0167), recognised but never negotiated.
pub const NS_JINGLE_RTP: &str = "urn:xmpp:jingle:apps:rtp:1";
/// Jingle file transfer, version 5 (XEP-0234).
pub const NS_JINGLE_FT5: &str = "urn:xmpp:jingle:apps:file-transfer:5";
/// Jingle In-Band Bytestream transport method (XEP-0261).
pub const NS_JINGLE_IBB: &str = "urn:xmpp:jingle:transports:ibb:1";
/// Jingle SOCKS5 bytestream transport method (XEP-0260), unsupported.
pub const NS_JINGLE_S5B: &str = "urn:xmpp:jingle:transports:s5b:1";
/// In-Band Bytestreams (XEP-0047).
pub const NS_IBB: &str = "http://jabber.org/protocol/ibb";
/// IETF stanza error conditions (RFC 6120).
pub const NS_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

// ── Stanza ───────────────────────────────────────────────────────────────────

/// One element of a stanza tree: name, optional namespace, attributes,
/// character data, and owned children.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    name: String,
    ns: Option<String>,
    attrs: HashMap<String, String>,
    text: Option<String>,
    children: Vec<Stanza>,
}

impl Stanza {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ns: None,
            attrs: HashMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn with_ns(name: impl Into<String>, ns: impl Into<String>) -> Self {
        let mut stanza = Self::new(name);
        stanza.ns = Some(ns.into());
        stanza
    }

    // ── Mutators ─────────────────────────────────────────────────────────

    pub fn set_ns(&mut self, ns: impl Into<String>) {
        self.ns = Some(ns.into());
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    /// Append `child`, transferring ownership to this element.
    pub fn add_child(&mut self, child: Stanza) {
        self.children.push(child);
    }

    /// Append a new child element carrying only character data.
    pub fn add_child_with_text(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let mut child = Stanza::new(name);
        child.set_text(text);
        self.children.push(child);
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ns(&self) -> Option<&str> {
        self.ns.as_deref()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|v| v.as_str())
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn children(&self) -> &[Stanza] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&Stanza> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_by_ns(&self, ns: &str) -> Option<&Stanza> {
        self.children.iter().find(|c| c.ns.as_deref() == Some(ns))
    }

    pub fn child_by_name_and_ns(&self, name: &str, ns: &str) -> Option<&Stanza> {
        self.children
            .iter()
            .find(|c| c.name == name && c.ns.as_deref() == Some(ns))
    }

    /// Character data of the named child, if both exist.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.text())
    }

    // ── IQ attribute shorthands ──────────────────────────────────────────

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn from(&self) -> Option<&str> {
        self.attr("from")
    }

    pub fn to(&self) -> Option<&str> {
        self.attr("to")
    }

    pub fn typ(&self) -> Option<&str> {
        self.attr("type")
    }

    // ── IQ builders ──────────────────────────────────────────────────────

    pub fn iq(typ: &str, id: &str) -> Self {
        let mut iq = Stanza::new("iq");
        iq.set_attr("type", typ);
        iq.set_attr("id", id);
        iq
    }

    /// Acknowledgement for a previously received IQ.
    pub fn iq_result(id: &str, to: &str) -> Self {
        let mut iq = Self::iq("result", id);
        iq.set_attr("to", to);
        iq
    }

    pub fn iq_set(id: &str, to: &str) -> Self {
        let mut iq = Self::iq("set", id);
        iq.set_attr("to", to);
        iq
    }

    /// Error response: `<iq type='error'><error type='…'><condition/></error></iq>`
    /// with the condition in the IETF stanza-errors namespace.
    pub fn iq_error(id: &str, to: &str, error_type: &str, condition: &str) -> Self {
        let mut iq = Self::iq("error", id);
        iq.set_attr("to", to);

        let mut error = Stanza::new("error");
        error.set_attr("type", error_type);
        error.add_child(Stanza::with_ns(condition, NS_STANZAS));
        iq.add_child(error);
        iq
    }
}
