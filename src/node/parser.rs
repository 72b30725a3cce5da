//! Format detection and node extraction from raw subscription text

use crate::node::codec;
use crate::node::models::{Node, StructuredNode};
use crate::Result;
use log::{debug, warn};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Protocols scanned for in line-delimited sources by default
pub const DEFAULT_SUPPORTED_PROTOCOLS: [&str; 9] = [
    "ss",
    "ssr",
    "vmess",
    "vless",
    "trojan",
    "hysteria",
    "hysteria2",
    "tuic",
    "wireguard",
];

/// Substrings that mark a structured list document
pub const STRUCTURED_MARKERS: [&str; 2] = ["proxies:", "servers:"];

/// Keys under which structured documents keep their node lists
const LIST_KEYS: [&str; 2] = ["proxies", "servers"];

pub fn has_structured_marker(text: &str) -> bool {
    STRUCTURED_MARKERS.iter().any(|marker| text.contains(marker))
}

pub fn has_json_framing(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

/// Configuration for the node parser
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Schemes accepted when scanning lines
    pub supported_protocols: Vec<String>,
    /// Skip lines starting with `#` or `//`
    pub skip_comments: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            supported_protocols: DEFAULT_SUPPORTED_PROTOCOLS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            skip_comments: true,
        }
    }
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supported_protocols(mut self, protocols: Vec<String>) -> Self {
        self.supported_protocols = protocols;
        self
    }

    pub fn with_skip_comments(mut self, skip_comments: bool) -> Self {
        self.skip_comments = skip_comments;
        self
    }
}

/// Extracts nodes from raw text in any of the supported source formats
#[derive(Debug, Clone)]
pub struct NodeParser {
    config: ParserConfig,
    prefixes: Vec<String>,
}

impl NodeParser {
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    pub fn with_config(config: ParserConfig) -> Self {
        let prefixes = config
            .supported_protocols
            .iter()
            .map(|p| format!("{}://", p))
            .collect();
        Self { config, prefixes }
    }

    /// Parse nodes from raw text
    ///
    /// Strategies are additive and applied in order:
    /// 1. Structured list document (`proxies:` / `servers:` marker)
    /// 2. JSON document (leading `{` or `[`)
    /// 3. Line-by-line scan for supported connection URIs
    ///
    /// Never fails; unparseable fragments are logged and skipped.
    pub fn parse(&self, text: &str) -> Vec<Node> {
        let mut nodes = Vec::new();

        if has_structured_marker(text) {
            nodes.extend(self.parse_structured(text));
        }

        if has_json_framing(text) {
            nodes.extend(self.parse_json(text));
        }

        nodes.extend(self.parse_lines(text));
        nodes
    }

    /// Parse nodes from a local file
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Node>> {
        let content = fs::read_to_string(path)?;
        Ok(self.parse(&content))
    }

    fn parse_structured(&self, text: &str) -> Vec<Node> {
        let document: serde_yaml::Value = match serde_yaml::from_str(text) {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to parse structured node list: {}", e);
                return Vec::new();
            }
        };

        let mut nodes = Vec::new();
        for key in LIST_KEYS {
            let Some(entries) = document.get(key).and_then(|v| v.as_sequence()) else {
                continue;
            };
            let before = nodes.len();
            for entry in entries {
                match serde_json::to_value(entry) {
                    Ok(value) => nodes.extend(nodes_from_value(value)),
                    Err(e) => debug!("Skipping structured entry under '{}': {}", key, e),
                }
            }
            debug!(
                "Parsed {} nodes from structured '{}' list",
                nodes.len() - before,
                key
            );
        }
        nodes
    }

    fn parse_json(&self, text: &str) -> Vec<Node> {
        let document: Value = match serde_json::from_str(text.trim()) {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to parse JSON node list: {}", e);
                return Vec::new();
            }
        };

        let entries = match document {
            Value::Object(mut map) => match map.remove("proxies") {
                Some(Value::Array(entries)) => entries,
                _ => Vec::new(),
            },
            Value::Array(entries) => entries,
            _ => Vec::new(),
        };

        let nodes: Vec<Node> = entries.into_iter().flat_map(nodes_from_value).collect();
        debug!("Parsed {} nodes from JSON", nodes.len());
        nodes
    }

    fn parse_lines(&self, text: &str) -> Vec<Node> {
        let nodes: Vec<Node> = text
            .split('\n')
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !(self.config.skip_comments && is_comment(line)))
            .filter(|line| self.prefixes.iter().any(|p| line.starts_with(p.as_str())))
            .filter_map(codec::parse_uri)
            .map(Node::Opaque)
            .collect();

        if !nodes.is_empty() {
            debug!("Parsed {} nodes from line format", nodes.len());
        }
        nodes
    }
}

impl Default for NodeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#') || line.starts_with("//")
}

/// Entry of a structured list: a map becomes a structured node, a string is
/// read as connection URIs one per line, anything else is dropped
fn nodes_from_value(value: Value) -> Vec<Node> {
    match value {
        Value::Object(fields) => vec![Node::Structured(StructuredNode::new(fields))],
        Value::String(text) => text
            .lines()
            .filter_map(codec::parse_uri)
            .map(Node::Opaque)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::models::Scheme;
    use std::io::Write;

    fn opaque_schemes(nodes: &[Node]) -> Vec<Scheme> {
        nodes
            .iter()
            .filter_map(|n| match n {
                Node::Opaque(o) => Some(o.scheme),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_uri_lines() {
        let content = "ss://YWVzLTI1Ni1nY206cGFzcw==@1.2.3.4:8443#Test\nss://YWVzLTI1Ni1nY206cGFzcw==@1.2.3.4:8443#Test";
        let nodes = NodeParser::new().parse(content);
        assert_eq!(nodes.len(), 2);
        assert_eq!(opaque_schemes(&nodes), vec![Scheme::Ss, Scheme::Ss]);
    }

    #[test]
    fn test_parse_lines_skips_blank_comments_and_unknown() {
        let content = r#"
# vmess://commented-out
// trojan://also-commented
vmess://abc

snell://unsupported
plain text
  trojan://def
"#;
        let nodes = NodeParser::new().parse(content);
        assert_eq!(opaque_schemes(&nodes), vec![Scheme::Vmess, Scheme::Trojan]);
    }

    #[test]
    fn test_parse_lines_comments_kept_when_disabled() {
        // A commented line never starts with a scheme prefix, so it is still
        // not a node; disabling the skip only changes which lines are tested.
        let parser = NodeParser::with_config(ParserConfig::new().with_skip_comments(false));
        let nodes = parser.parse("#vmess://abc\nvmess://def");
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_parse_lines_respects_supported_set() {
        let content = "http://1.2.3.4:8080\nsocks5://1.2.3.4:1080\nvless://u@h:1";
        assert_eq!(
            opaque_schemes(&NodeParser::new().parse(content)),
            vec![Scheme::Vless]
        );

        let parser = NodeParser::with_config(
            ParserConfig::new()
                .with_supported_protocols(vec!["http".to_string(), "socks5".to_string()]),
        );
        assert_eq!(
            opaque_schemes(&parser.parse(content)),
            vec![Scheme::Http, Scheme::Socks5]
        );
    }

    #[test]
    fn test_parse_lines_crlf() {
        let nodes = NodeParser::new().parse("vmess://a\r\ntrojan://b\r\n");
        match &nodes[0] {
            Node::Opaque(o) => assert_eq!(o.url, "vmess://a"),
            _ => panic!("expected opaque node"),
        }
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn test_parse_yaml_flow_document() {
        let content = "{proxies: [{type: vless, server: a.com, port: 443, uuid: u1},{type: vless, server: a.com, port: 443, uuid: u1, name: Other}]}";
        let nodes = NodeParser::new().parse(content);
        assert_eq!(nodes.len(), 2);
        for node in &nodes {
            assert_eq!(node.protocol(), "vless");
            assert_eq!(node.identity_key(), "vless://a.com:443:u1");
        }
    }

    #[test]
    fn test_parse_yaml_proxies_and_servers() {
        let content = r#"
port: 7890
proxies:
  - name: "hk-1"
    type: ss
    server: hk.example.com
    port: 8388
    cipher: aes-128-gcm
    password: secret
  - vmess://inline-entry
servers:
  - {name: jp, type: trojan, server: jp.example.com, port: 443, password: pw}
proxy-groups:
  - name: auto
    type: select
    proxies: [hk-1, jp]
"#;
        let nodes = NodeParser::new().parse(content);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].protocol(), "ss");
        assert_eq!(nodes[1].protocol(), "vmess");
        assert!(nodes[1].is_opaque());
        assert_eq!(nodes[2].protocol(), "trojan");
    }

    #[test]
    fn test_parse_malformed_yaml_falls_through_to_lines() {
        let content = "proxies: [unclosed\nvmess://abc";
        let nodes = NodeParser::new().parse(content);
        assert_eq!(opaque_schemes(&nodes), vec![Scheme::Vmess]);
    }

    #[test]
    fn test_parse_json_proxies_object() {
        let content = r#"{"proxies": [{"type": "trojan", "server": "t.com", "port": 443, "password": "p"}, null, 5]}"#;
        let nodes = NodeParser::new().parse(content);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].protocol(), "trojan");
    }

    #[test]
    fn test_parse_json_top_level_array() {
        let content = r#"[
  {"type": "hysteria2", "server": "h.com", "port": 443, "password": "p"},
  "tuic://uuid:pw@t.com:443"
]"#;
        let nodes = NodeParser::new().parse(content);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].protocol(), "hysteria2");
        assert_eq!(nodes[1].protocol(), "tuic");
    }

    #[test]
    fn test_parse_string_entries_one_node_per_line() {
        let content = r#"["  vmess://a  ", "vmess://a", "trojan://x@h:1\ntrojan://y@h:2"]"#;
        let nodes = NodeParser::new().parse(content);
        let urls: Vec<&str> = nodes
            .iter()
            .map(|node| match node {
                Node::Opaque(opaque) => opaque.url.as_str(),
                Node::Structured(_) => panic!("expected opaque node"),
            })
            .collect();
        assert_eq!(
            urls,
            vec!["vmess://a", "vmess://a", "trojan://x@h:1", "trojan://y@h:2"]
        );
    }

    #[test]
    fn test_parse_malformed_json_is_skipped() {
        let nodes = NodeParser::new().parse("{not json at all");
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_parse_empty_input() {
        assert!(NodeParser::new().parse("").is_empty());
        assert!(NodeParser::new().parse("\n\n   \n").is_empty());
    }

    #[test]
    fn test_has_markers() {
        assert!(has_structured_marker("a\nproxies:\n"));
        assert!(has_structured_marker("servers: []"));
        assert!(!has_structured_marker("vmess://abc"));
        assert!(has_json_framing("  [1]"));
        assert!(has_json_framing("\n{}"));
        assert!(!has_json_framing("x{}"));
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "trojan://a@b:1\nvless://c@d:2").unwrap();
        let nodes = NodeParser::new().parse_file(file.path()).unwrap();
        assert_eq!(nodes.len(), 2);
    }
}
