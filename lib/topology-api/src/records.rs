//! Pipe-delimited interchange records
//!
//! Line formats:
//! - node:             `name|ip|role`
//! - switch / router:  `node|identity|name|attributes`
//! - switch / router port: `node|name|address|type|options`
//! - pod:              `namespace|name|ip|node`
//! - node status:      `node|state|detail`
//!
//! `attributes` and `options` are space-joined `key=value` tokens. Member
//! ports of a switch or router travel under the reserved `@ports` key,
//! comma-joined. A backslash escapes the next character; `\n` and `\r` stand
//! for line breaks. Fields escape `\`, `|` and line breaks, tokens
//! additionally escape space, `=`, `,` and `@`, so an attribute key can never
//! spell the reserved key.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use crate::model::{
    ComponentKind, LogicalComponent, LogicalPort, Node, NodeRole, NodeStatus, Pod, PortKind,
    PortType,
};

const FIELD_SEPARATOR: char = '|';
const FIELD_SPECIALS: &[char] = &['\\', '|'];
const TOKEN_SPECIALS: &[char] = &['\\', '|', ' ', '=', ',', '@'];
const MEMBER_PORTS_KEY: &str = "@ports";

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{kind} record has {found} fields, expected {expected}: {line}")]
    FieldCount {
        kind: RecordKind,
        expected: usize,
        found: usize,
        line: String,
    },

    #[error("Invalid {field} in {kind} record: {value:?}")]
    InvalidField {
        kind: RecordKind,
        field: &'static str,
        value: String,
    },

    #[error("Dangling escape at end of record: {0}")]
    DanglingEscape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RecordError>;

/// Kind of record, also the file stem in an exported store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Nodes,
    Switches,
    Routers,
    SwitchPorts,
    RouterPorts,
    Pods,
    Status,
}

impl RecordKind {
    pub const ALL: [RecordKind; 7] = [
        RecordKind::Nodes,
        RecordKind::Switches,
        RecordKind::Routers,
        RecordKind::SwitchPorts,
        RecordKind::RouterPorts,
        RecordKind::Pods,
        RecordKind::Status,
    ];

    pub fn file_stem(&self) -> &'static str {
        match self {
            RecordKind::Nodes => "nodes",
            RecordKind::Switches => "switches",
            RecordKind::Routers => "routers",
            RecordKind::SwitchPorts => "switch-ports",
            RecordKind::RouterPorts => "router-ports",
            RecordKind::Pods => "pods",
            RecordKind::Status => "status",
        }
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_stem() == stem)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

// ============================================================================
// Escaping
// ============================================================================

fn escape(value: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\n' {
            out.push_str("\\n");
        } else if c == '\r' {
            out.push_str("\\r");
        } else {
            if specials.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
    }
    out
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(next) => out.push(next),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split on `separator` wherever it is not escaped, keeping escapes intact
fn split_unescaped(raw: &str, separator: char) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (idx, c) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            parts.push(&raw[start..idx]);
            start = idx + c.len_utf8();
        }
    }
    if escaped {
        return Err(RecordError::DanglingEscape(raw.to_string()));
    }
    parts.push(&raw[start..]);
    Ok(parts)
}

fn split_fields(kind: RecordKind, line: &str, expected: usize) -> Result<Vec<&str>> {
    let fields = split_unescaped(line, FIELD_SEPARATOR)?;
    if fields.len() != expected {
        return Err(RecordError::FieldCount {
            kind,
            expected,
            found: fields.len(),
            line: line.to_string(),
        });
    }
    Ok(fields)
}

fn join_fields(fields: &[String]) -> String {
    fields.join("|")
}

fn encode_field(value: &str) -> String {
    escape(value, FIELD_SPECIALS)
}

/// Join already escaped `key=value` pairs
fn encode_pairs(pairs: impl Iterator<Item = (String, String)>) -> String {
    pairs
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split `key=value` tokens, leaving keys and values escaped
fn decode_pairs(kind: RecordKind, raw: &str) -> Result<Vec<(&str, &str)>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let mut pairs = Vec::new();
    for token in split_unescaped(raw, ' ')? {
        let parts = split_unescaped(token, '=')?;
        if parts.len() != 2 {
            return Err(RecordError::InvalidField {
                kind,
                field: "key=value token",
                value: unescape(token),
            });
        }
        pairs.push((parts[0], parts[1]));
    }
    Ok(pairs)
}

fn decode_map(kind: RecordKind, raw: &str) -> Result<BTreeMap<String, String>> {
    Ok(decode_pairs(kind, raw)?
        .into_iter()
        .map(|(key, value)| (unescape(key), unescape(value)))
        .collect())
}

fn encode_map(map: &BTreeMap<String, String>) -> String {
    encode_pairs(map.iter().map(|(key, value)| {
        (escape(key, TOKEN_SPECIALS), escape(value, TOKEN_SPECIALS))
    }))
}

fn parse_ip(kind: RecordKind, field: &'static str, raw: &str) -> Result<IpAddr> {
    let value = unescape(raw);
    value
        .parse::<IpAddr>()
        .map_err(|_| RecordError::InvalidField { kind, field, value })
}

// ============================================================================
// Nodes
// ============================================================================

pub fn encode_node(node: &Node) -> String {
    let ip = node.ip.map(|ip| ip.to_string()).unwrap_or_default();
    join_fields(&[
        encode_field(&node.name),
        ip,
        node.role.as_str().to_string(),
    ])
}

pub fn decode_node(line: &str) -> Result<Node> {
    let kind = RecordKind::Nodes;
    let fields = split_fields(kind, line, 3)?;
    let ip = if fields[1].is_empty() {
        None
    } else {
        Some(parse_ip(kind, "ip", fields[1])?)
    };
    let role_value = unescape(fields[2]);
    let role = NodeRole::parse(&role_value).ok_or(RecordError::InvalidField {
        kind,
        field: "role",
        value: role_value,
    })?;
    Ok(Node::new(unescape(fields[0]), ip, role))
}

// ============================================================================
// Switches and routers
// ============================================================================

pub fn encode_component(component: &LogicalComponent) -> String {
    let ports = (!component.ports.is_empty()).then(|| {
        let joined = component
            .ports
            .iter()
            .map(|p| escape(p, TOKEN_SPECIALS))
            .collect::<Vec<_>>()
            .join(",");
        (MEMBER_PORTS_KEY.to_string(), joined)
    });
    let attributes = component
        .attributes
        .iter()
        .map(|(key, value)| (escape(key, TOKEN_SPECIALS), escape(value, TOKEN_SPECIALS)));
    let encoded = encode_pairs(ports.into_iter().chain(attributes));

    join_fields(&[
        encode_field(&component.node),
        encode_field(&component.identity),
        encode_field(&component.name),
        encoded,
    ])
}

pub fn decode_component(kind: ComponentKind, line: &str) -> Result<LogicalComponent> {
    let record_kind = match kind {
        ComponentKind::Switch => RecordKind::Switches,
        ComponentKind::Router => RecordKind::Routers,
    };
    let fields = split_fields(record_kind, line, 4)?;

    let mut ports = Vec::new();
    let mut attributes = BTreeMap::new();
    for (key, value) in decode_pairs(record_kind, fields[3])? {
        if key == MEMBER_PORTS_KEY {
            ports = split_unescaped(value, ',')?
                .into_iter()
                .map(unescape)
                .collect();
        } else {
            attributes.insert(unescape(key), unescape(value));
        }
    }

    Ok(LogicalComponent {
        kind,
        node: unescape(fields[0]),
        identity: unescape(fields[1]),
        name: unescape(fields[2]),
        ports,
        attributes,
    })
}

// ============================================================================
// Ports
// ============================================================================

pub fn encode_port(port: &LogicalPort) -> String {
    join_fields(&[
        encode_field(&port.node),
        encode_field(&port.name),
        encode_field(&port.address),
        encode_field(port.port_type.as_str()),
        encode_map(&port.options),
    ])
}

pub fn decode_port(kind: PortKind, line: &str) -> Result<LogicalPort> {
    let record_kind = match kind {
        PortKind::SwitchPort => RecordKind::SwitchPorts,
        PortKind::RouterPort => RecordKind::RouterPorts,
    };
    let fields = split_fields(record_kind, line, 5)?;
    Ok(LogicalPort {
        kind,
        node: unescape(fields[0]),
        name: unescape(fields[1]),
        address: unescape(fields[2]),
        port_type: PortType::parse(&unescape(fields[3])),
        options: decode_map(record_kind, fields[4])?,
    })
}

// ============================================================================
// Pods
// ============================================================================

pub fn encode_pod(pod: &Pod) -> String {
    join_fields(&[
        encode_field(&pod.namespace),
        encode_field(&pod.name),
        pod.ip.to_string(),
        encode_field(&pod.node),
    ])
}

pub fn decode_pod(line: &str) -> Result<Pod> {
    let kind = RecordKind::Pods;
    let fields = split_fields(kind, line, 4)?;
    Ok(Pod {
        namespace: unescape(fields[0]),
        name: unescape(fields[1]),
        ip: parse_ip(kind, "ip", fields[2])?,
        node: unescape(fields[3]),
    })
}

// ============================================================================
// Node status
// ============================================================================

/// One line per status; a partial node produces one line per error
pub fn encode_status(node: &str, status: &NodeStatus) -> Vec<String> {
    let node = encode_field(node);
    match status {
        NodeStatus::Complete => vec![format!("{}|complete|", node)],
        NodeStatus::Partial { errors } => errors
            .iter()
            .map(|e| format!("{}|partial|{}", node, encode_field(e)))
            .collect(),
        NodeStatus::Failed { error } => vec![format!("{}|failed|{}", node, encode_field(error))],
    }
}

/// Fold status lines for a single node back into a `NodeStatus`
pub fn decode_status<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Option<(String, NodeStatus)>> {
    let kind = RecordKind::Status;
    let mut result: Option<(String, NodeStatus)> = None;
    for line in lines {
        let fields = split_fields(kind, line, 3)?;
        let node = unescape(fields[0]);
        let detail = unescape(fields[2]);
        let status = match (unescape(fields[1]).as_str(), result.take()) {
            ("complete", _) => NodeStatus::Complete,
            ("failed", _) => NodeStatus::Failed { error: detail },
            ("partial", Some((_, NodeStatus::Partial { mut errors }))) => {
                errors.push(detail);
                NodeStatus::Partial { errors }
            }
            ("partial", _) => NodeStatus::Partial {
                errors: vec![detail],
            },
            (other, _) => {
                return Err(RecordError::InvalidField {
                    kind,
                    field: "state",
                    value: other.to_string(),
                })
            }
        };
        result = Some((node, status));
    }
    Ok(result)
}
