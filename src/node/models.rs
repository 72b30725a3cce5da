//! Node data models

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol identifier used for structured records that carry no `type` or `protocol`
pub const UNKNOWN_PROTOCOL: &str = "unknown";

/// Leading `scheme://` of a connection URI
static SCHEME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z0-9]+)://").expect("Invalid scheme regex"));

/// Connection-URI schemes understood by the protocol codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Ss,
    Ssr,
    Vmess,
    Vless,
    Trojan,
    Hysteria,
    Hysteria2,
    Tuic,
    Wireguard,
    Http,
    Https,
    Socks5,
    Socks4,
}

impl Scheme {
    pub const ALL: [Scheme; 13] = [
        Scheme::Ss,
        Scheme::Ssr,
        Scheme::Vmess,
        Scheme::Vless,
        Scheme::Trojan,
        Scheme::Hysteria,
        Scheme::Hysteria2,
        Scheme::Tuic,
        Scheme::Wireguard,
        Scheme::Http,
        Scheme::Https,
        Scheme::Socks5,
        Scheme::Socks4,
    ];

    /// Short protocol identifier, also the URI scheme
    pub fn id(&self) -> &'static str {
        match self {
            Scheme::Ss => "ss",
            Scheme::Ssr => "ssr",
            Scheme::Vmess => "vmess",
            Scheme::Vless => "vless",
            Scheme::Trojan => "trojan",
            Scheme::Hysteria => "hysteria",
            Scheme::Hysteria2 => "hysteria2",
            Scheme::Tuic => "tuic",
            Scheme::Wireguard => "wireguard",
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Socks5 => "socks5",
            Scheme::Socks4 => "socks4",
        }
    }

    /// Long protocol name carried on opaque nodes
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Scheme::Ss => "shadowsocks",
            Scheme::Ssr => "shadowsocksr",
            other => other.id(),
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|scheme| scheme.id() == id)
    }

    /// Match the `scheme://` prefix of a URI against the supported table
    pub fn from_uri(text: &str) -> Option<Self> {
        let caps = SCHEME_REGEX.captures(text)?;
        Self::from_id(caps.get(1)?.as_str())
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A node kept as its original connection URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueNode {
    pub scheme: Scheme,
    pub url: String,
    pub original_url: String,
}

impl OpaqueNode {
    pub fn new(scheme: Scheme, url: String, original_url: String) -> Self {
        Self {
            scheme,
            url,
            original_url,
        }
    }

    pub fn protocol_name(&self) -> &'static str {
        self.scheme.protocol_name()
    }
}

/// A node described by named fields from a structured source
///
/// Field values are kept as loosely typed JSON values: upstream sources disagree
/// on whether a port is a number or a string, whether flags are booleans or
/// strings, and so on. Accessors normalize on read.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredNode {
    fields: Map<String, Value>,
}

impl StructuredNode {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Scalar field rendered as text; null, empty, `false` and zero count as absent
    pub fn text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }

    /// First entry of a list field, or the field itself when it is a scalar
    pub fn first_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Array(items) => items.first().and_then(scalar_text),
            _ => self.text(key),
        }
    }

    /// List field joined with commas, or the field itself when it is a scalar
    pub fn joined_text(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
                (!parts.is_empty()).then(|| parts.join(","))
            }
            _ => self.text(key),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.fields.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(Value::String(s)) => !matches!(s.as_str(), "" | "0" | "false"),
            _ => false,
        }
    }

    pub fn node_type(&self) -> Option<String> {
        self.text("type")
    }

    /// `type`, then `protocol`, then [`UNKNOWN_PROTOCOL`]
    pub fn protocol(&self) -> String {
        self.node_type()
            .or_else(|| self.text("protocol"))
            .unwrap_or_else(|| UNKNOWN_PROTOCOL.to_string())
    }

    pub fn server(&self) -> Option<String> {
        self.text("server")
    }

    pub fn port(&self) -> Option<String> {
        self.text("port")
    }

    pub fn name(&self) -> Option<String> {
        self.text("name")
    }

    pub fn original_url(&self) -> Option<String> {
        self.text("originalUrl")
    }

    /// `uuid` if present, else `password`
    pub fn secret(&self) -> Option<String> {
        self.text("uuid").or_else(|| self.text("password"))
    }

    pub fn identity_key(&self) -> String {
        format!(
            "{}://{}:{}:{}",
            self.node_type()
                .or_else(|| self.text("protocol"))
                .unwrap_or_default(),
            self.server().unwrap_or_default(),
            self.port().unwrap_or_default(),
            self.secret().unwrap_or_default(),
        )
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One proxy descriptor, in the shape it arrived in
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Opaque(OpaqueNode),
    Structured(StructuredNode),
}

impl Node {
    /// Bucket key used by the classifier
    pub fn protocol(&self) -> String {
        match self {
            Node::Opaque(node) => node.scheme.id().to_string(),
            Node::Structured(node) => node.protocol(),
        }
    }

    /// Key under which duplicates collide within one bucket
    pub fn identity_key(&self) -> String {
        match self {
            Node::Opaque(node) => node.url.trim().to_string(),
            Node::Structured(node) => node.identity_key(),
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Node::Opaque(_))
    }
}

impl From<OpaqueNode> for Node {
    fn from(node: OpaqueNode) -> Self {
        Node::Opaque(node)
    }
}

impl From<StructuredNode> for Node {
    fn from(node: StructuredNode) -> Self {
        Node::Structured(node)
    }
}
