//! Protocol codec: connection URI to node, and structured node back to URI
//!
//! Both directions are total. Malformed or unsupported input yields `None`
//! instead of an error, since upstream sources are untrusted and partially
//! broken records are routine.

use crate::node::models::{Node, OpaqueNode, Scheme, StructuredNode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

const DEFAULT_NAME: &str = "Unknown";
const DEFAULT_SS_CIPHER: &str = "aes-256-gcm";
const DEFAULT_VMESS_SECURITY: &str = "auto";
const DEFAULT_NETWORK: &str = "tcp";
const DEFAULT_BANDWIDTH_MBPS: &str = "100";
const DEFAULT_ALPN: &str = "h3";
const DEFAULT_HYSTERIA_PEER: &str = "apple.com";
const DEFAULT_HYSTERIA_PROTOCOL: &str = "udp";
const DEFAULT_VLESS_SECURITY: &str = "none";
const DEFAULT_FINGERPRINT: &str = "chrome";

/// Parse a connection URI into an opaque node
///
/// Only the `scheme://` prefix is inspected; the rest of the URI is kept as is.
/// Text spanning several lines is not a single URI and is rejected.
pub fn parse_uri(text: &str) -> Option<OpaqueNode> {
    let trimmed = text.trim();
    if trimmed.contains(['\n', '\r']) {
        return None;
    }
    let scheme = Scheme::from_uri(trimmed)?;
    Some(OpaqueNode::new(scheme, trimmed.to_string(), text.to_string()))
}

/// Produce the canonical connection URI for a node
///
/// Opaque nodes and structured nodes carrying `originalUrl` return that URL
/// unchanged. `None` means the record cannot be expressed as a URI.
pub fn synthesize_uri(node: &Node) -> Option<String> {
    match node {
        Node::Opaque(opaque) => Some(opaque.original_url.clone()),
        Node::Structured(structured) => synthesize_structured(structured),
    }
}

fn synthesize_structured(node: &StructuredNode) -> Option<String> {
    if let Some(url) = node.original_url() {
        return Some(url);
    }

    let server = node.server()?;
    let port = node.port()?;
    let name = node.name().unwrap_or_else(|| DEFAULT_NAME.to_string());
    let fragment = urlencoding::encode(&name);

    match node.node_type()?.as_str() {
        "ss" => {
            let cipher = node
                .text("cipher")
                .unwrap_or_else(|| DEFAULT_SS_CIPHER.to_string());
            let password = node.text("password").unwrap_or_default();
            let auth = STANDARD.encode(format!("{}:{}", cipher, password));
            Some(format!("ss://{}@{}:{}#{}", auth, server, port, fragment))
        }
        "vmess" => {
            let link = VmessLink::from_node(node, name, server, port);
            let json = serde_json::to_string(&link).ok()?;
            Some(format!("vmess://{}", STANDARD.encode(json)))
        }
        "trojan" => {
            let password = node.text("password").unwrap_or_default();
            let sni = node.text("sni").unwrap_or_else(|| server.clone());
            Some(format!(
                "trojan://{}@{}:{}?allowInsecure={}&sni={}#{}",
                password,
                server,
                port,
                insecure_bit(node),
                sni,
                fragment
            ))
        }
        "hysteria2" => {
            let password = node.text("password").unwrap_or_default();
            let sni = node.text("sni").unwrap_or_else(|| server.clone());
            Some(format!(
                "hysteria2://{}@{}:{}?insecure={}&sni={}&fastopen=1#{}",
                password,
                server,
                port,
                insecure_bit(node),
                sni,
                fragment
            ))
        }
        "hysteria" => {
            let auth = node
                .text("auth_str")
                .or_else(|| node.text("auth"))
                .unwrap_or_default();
            let up = node
                .text("up")
                .unwrap_or_else(|| DEFAULT_BANDWIDTH_MBPS.to_string());
            let down = node
                .text("down")
                .unwrap_or_else(|| DEFAULT_BANDWIDTH_MBPS.to_string());
            let alpn = node
                .first_text("alpn")
                .unwrap_or_else(|| DEFAULT_ALPN.to_string());
            let peer = node
                .text("sni")
                .or_else(|| node.text("peer"))
                .unwrap_or_else(|| DEFAULT_HYSTERIA_PEER.to_string());
            let protocol = node
                .text("protocol")
                .unwrap_or_else(|| DEFAULT_HYSTERIA_PROTOCOL.to_string());
            Some(format!(
                "hysteria://{}:{}?upmbps={}&downmbps={}&auth={}&insecure={}&alpn={}&peer={}&protocol={}&udp=true&fastopen=1#{}",
                server,
                port,
                up,
                down,
                auth,
                insecure_bit(node),
                alpn,
                peer,
                protocol,
                fragment
            ))
        }
        "vless" => {
            let uuid = node.text("uuid").unwrap_or_default();
            let security = node
                .text("security")
                .unwrap_or_else(|| DEFAULT_VLESS_SECURITY.to_string());
            // `type` is the transport, not the node's own protocol type
            let network = node
                .text("network")
                .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
            let alpn = node
                .joined_text("alpn")
                .unwrap_or_else(|| DEFAULT_ALPN.to_string());
            let sni = node.text("sni").unwrap_or_else(|| server.clone());
            let fp = node
                .text("fp")
                .unwrap_or_else(|| DEFAULT_FINGERPRINT.to_string());

            let mut params = format!(
                "security={}&type={}&alpn={}&allowInsecure={}&sni={}&fp={}",
                security,
                network,
                alpn,
                insecure_bit(node),
                sni,
                fp
            );
            for key in ["flow", "sid", "pbk"] {
                if let Some(value) = node.text(key) {
                    params.push_str(&format!("&{}={}", key, value));
                }
            }

            Some(format!(
                "vless://{}@{}:{}?{}#{}",
                uuid, server, port, params, fragment
            ))
        }
        _ => None,
    }
}

fn insecure_bit(node: &StructuredNode) -> &'static str {
    if node.flag("skip-cert-verify") {
        "1"
    } else {
        "0"
    }
}

/// JSON payload of a `vmess://` link, field order as clients expect it
#[derive(Debug, Serialize)]
struct VmessLink {
    v: &'static str,
    ps: String,
    add: String,
    port: String,
    id: String,
    aid: String,
    scy: String,
    net: String,
    #[serde(rename = "type")]
    kind: &'static str,
    host: String,
    path: String,
    tls: &'static str,
    sni: String,
}

impl VmessLink {
    fn from_node(node: &StructuredNode, name: String, server: String, port: String) -> Self {
        Self {
            v: "2",
            ps: name,
            add: server,
            port,
            id: node.text("uuid").unwrap_or_default(),
            aid: node.text("alterId").unwrap_or_else(|| "0".to_string()),
            scy: node
                .text("cipher")
                .unwrap_or_else(|| DEFAULT_VMESS_SECURITY.to_string()),
            net: node
                .text("network")
                .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
            kind: "none",
            host: node.text("host").unwrap_or_default(),
            path: node.text("path").unwrap_or_default(),
            tls: if node.flag("tls") { "tls" } else { "" },
            sni: node.text("sni").unwrap_or_default(),
        }
    }
}
