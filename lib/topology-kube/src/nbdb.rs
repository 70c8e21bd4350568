//! `ovn-nbctl` JSON output decoding
//!
//! `ovn-nbctl --format=json list <Table>` prints `{"headings": [...],
//! "data": [[...], ...]}`. Cells use the OVSDB JSON notation: bare atoms,
//! `["uuid", "..."]`, `["set", [...]]` and `["map", [[k, v], ...]]`. A set
//! with a single element is printed as the bare element.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use topology_api::{ComponentKind, LogicalComponent, LogicalPort, PortKind, PortType, RecordKind};

use crate::error::{KubeSourceError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NbTable {
    LogicalSwitch,
    LogicalRouter,
    LogicalSwitchPort,
    LogicalRouterPort,
}

impl NbTable {
    pub fn name(&self) -> &'static str {
        match self {
            NbTable::LogicalSwitch => "Logical_Switch",
            NbTable::LogicalRouter => "Logical_Router",
            NbTable::LogicalSwitchPort => "Logical_Switch_Port",
            NbTable::LogicalRouterPort => "Logical_Router_Port",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            NbTable::LogicalSwitch => &["_uuid", "name", "ports", "other_config", "external_ids"],
            NbTable::LogicalRouter => &["_uuid", "name", "ports", "options", "external_ids"],
            NbTable::LogicalSwitchPort => &["_uuid", "name", "addresses", "type", "options"],
            NbTable::LogicalRouterPort => &["_uuid", "name", "mac", "networks", "peer", "options"],
        }
    }

    pub fn record_kind(&self) -> RecordKind {
        match self {
            NbTable::LogicalSwitch => RecordKind::Switches,
            NbTable::LogicalRouter => RecordKind::Routers,
            NbTable::LogicalSwitchPort => RecordKind::SwitchPorts,
            NbTable::LogicalRouterPort => RecordKind::RouterPorts,
        }
    }

    /// Read-only query; `--no-leader-only` lets any RAFT member answer
    pub fn command(&self) -> Vec<String> {
        vec![
            "ovn-nbctl".to_string(),
            "--no-leader-only".to_string(),
            "--format=json".to_string(),
            format!("--columns={}", self.columns().join(",")),
            "list".to_string(),
            self.name().to_string(),
        ]
    }
}

/// A decoded OVSDB cell
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OvsdbValue {
    Atom(String),
    Uuid(String),
    Set(Vec<OvsdbValue>),
    Map(Vec<(OvsdbValue, OvsdbValue)>),
}

impl OvsdbValue {
    pub fn from_json(value: &Value) -> std::result::Result<Self, String> {
        match value {
            Value::String(s) => Ok(OvsdbValue::Atom(s.clone())),
            Value::Number(n) => Ok(OvsdbValue::Atom(n.to_string())),
            Value::Bool(b) => Ok(OvsdbValue::Atom(b.to_string())),
            Value::Array(items) => match items.as_slice() {
                [Value::String(tag), Value::String(id)] if tag == "uuid" || tag == "named-uuid" => {
                    Ok(OvsdbValue::Uuid(id.clone()))
                }
                [Value::String(tag), Value::Array(members)] if tag == "set" => members
                    .iter()
                    .map(OvsdbValue::from_json)
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(OvsdbValue::Set),
                [Value::String(tag), Value::Array(pairs)] if tag == "map" => pairs
                    .iter()
                    .map(|pair| match pair.as_array().map(Vec::as_slice) {
                        Some([k, v]) => Ok((OvsdbValue::from_json(k)?, OvsdbValue::from_json(v)?)),
                        _ => Err(format!("malformed map entry {}", pair)),
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(OvsdbValue::Map),
                _ => Err(format!("unrecognised OVSDB value {}", value)),
            },
            other => Err(format!("unrecognised OVSDB value {}", other)),
        }
    }

    /// Scalar text of an atom or uuid
    pub fn as_text(&self) -> Option<&str> {
        match self {
            OvsdbValue::Atom(s) | OvsdbValue::Uuid(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Members of a set; a bare scalar is a one-element set
    pub fn texts(&self) -> Vec<String> {
        match self {
            OvsdbValue::Atom(s) | OvsdbValue::Uuid(s) => vec![s.clone()],
            OvsdbValue::Set(items) => items
                .iter()
                .filter_map(|item| item.as_text().map(str::to_string))
                .collect(),
            OvsdbValue::Map(_) => Vec::new(),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        match self {
            OvsdbValue::Map(pairs) => pairs
                .iter()
                .filter_map(|(k, v)| Some((k.as_text()?.to_string(), v.as_text()?.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct TableOutput {
    headings: Vec<String>,
    data: Vec<Vec<Value>>,
}

/// One table row keyed by column name
pub type Row = BTreeMap<String, OvsdbValue>;

pub fn parse_table(table: NbTable, output: &str) -> Result<Vec<Row>> {
    let decode_error = |reason: String| KubeSourceError::Decode {
        table: table.name().to_string(),
        reason,
    };
    let parsed: TableOutput =
        serde_json::from_str(output).map_err(|e| decode_error(e.to_string()))?;

    parsed
        .data
        .iter()
        .map(|cells| {
            if cells.len() != parsed.headings.len() {
                return Err(decode_error(format!(
                    "row has {} cells for {} headings",
                    cells.len(),
                    parsed.headings.len()
                )));
            }
            parsed
                .headings
                .iter()
                .zip(cells)
                .map(|(heading, cell)| {
                    OvsdbValue::from_json(cell)
                        .map(|value| (heading.clone(), value))
                        .map_err(decode_error)
                })
                .collect::<Result<Row>>()
        })
        .collect()
}

fn text(row: &Row, column: &str) -> String {
    row.get(column)
        .and_then(OvsdbValue::as_text)
        .unwrap_or_default()
        .to_string()
}

fn texts(row: &Row, column: &str) -> Vec<String> {
    row.get(column).map(OvsdbValue::texts).unwrap_or_default()
}

fn map(row: &Row, column: &str) -> BTreeMap<String, String> {
    row.get(column).map(OvsdbValue::to_map).unwrap_or_default()
}

/// Ports of one table, plus their `_uuid` to name index
pub fn decode_ports(
    table: NbTable,
    node: &str,
    rows: &[Row],
) -> (Vec<LogicalPort>, BTreeMap<String, String>) {
    let mut ports = Vec::with_capacity(rows.len());
    let mut names = BTreeMap::new();

    for row in rows {
        let name = text(row, "name");
        names.insert(text(row, "_uuid"), name.clone());
        let port = match table {
            NbTable::LogicalRouterPort => {
                let mut options = map(row, "options");
                if let Some(peer) = texts(row, "peer").into_iter().next() {
                    options.insert("peer".to_string(), peer);
                }
                let mut address = vec![text(row, "mac")];
                address.extend(texts(row, "networks"));
                LogicalPort {
                    kind: PortKind::RouterPort,
                    node: node.to_string(),
                    name,
                    address: address.join(" ").trim().to_string(),
                    port_type: PortType::Normal,
                    options,
                }
            }
            _ => LogicalPort {
                kind: PortKind::SwitchPort,
                node: node.to_string(),
                name,
                address: texts(row, "addresses").join(" "),
                port_type: PortType::parse(&text(row, "type")),
                options: map(row, "options"),
            },
        };
        ports.push(port);
    }
    (ports, names)
}

/// Switches or routers, with member port uuids joined to port names
pub fn decode_components(
    table: NbTable,
    node: &str,
    rows: &[Row],
    port_names: &BTreeMap<String, String>,
) -> Vec<LogicalComponent> {
    let kind = match table {
        NbTable::LogicalRouter | NbTable::LogicalRouterPort => ComponentKind::Router,
        _ => ComponentKind::Switch,
    };

    rows.iter()
        .map(|row| {
            let name = text(row, "name");
            let ports = texts(row, "ports")
                .into_iter()
                .filter_map(|uuid| {
                    let port = port_names.get(&uuid).cloned();
                    if port.is_none() {
                        debug!(node, "Port {} of {} is not in the port table", uuid, name);
                    }
                    port
                })
                .collect();

            let mut attributes = BTreeMap::new();
            for column in ["other_config", "options", "external_ids"] {
                for (key, value) in map(row, column) {
                    attributes.insert(format!("{}:{}", column, key), value);
                }
            }

            LogicalComponent {
                kind,
                node: node.to_string(),
                identity: text(row, "_uuid"),
                name,
                ports,
                attributes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWITCHES: &str = r#"{"data":[[["uuid","5b0f2c1e-0001"],"worker-a",["set",[["uuid","aa-1"],["uuid","aa-2"]]],["map",[["subnet","10.244.1.0/24"]]],["map",[]]],[["uuid","5b0f2c1e-0002"],"join",["uuid","aa-3"],["map",[]],["map",[["k8s.ovn.org/network","default"]]]]],"headings":["_uuid","name","ports","other_config","external_ids"]}"#;

    const SWITCH_PORTS: &str = r#"{"data":[[["uuid","aa-1"],"k8s-worker-a",["set",[]],"",["map",[]]],[["uuid","aa-2"],"stor-worker-a","router","router",["map",[["router-port","rtos-worker-a"]]]],[["uuid","aa-3"],"default_web",["set",["0a:58:0a:f4:01:05 10.244.1.5"]],"",["map",[]]]],"headings":["_uuid","name","addresses","type","options"]}"#;

    const ROUTER_PORTS: &str = r#"{"data":[[["uuid","bb-1"],"rtos-worker-a","0a:58:0a:f4:01:01",["set",["10.244.1.1/24","fd00:10:244:2::1/64"]],["set",[]],["map",[]]],[["uuid","bb-2"],"rtoj-GR_worker-a","0a:58:64:40:00:03","100.64.0.3/16","rtoj-peer",["map",[["gateway-mtu","1400"]]]]],"headings":["_uuid","name","mac","networks","peer","options"]}"#;

    #[test]
    fn test_decode_values() {
        let value: Value = serde_json::from_str(r#"["map",[["a","1"],["b",2]]]"#).unwrap();
        let decoded = OvsdbValue::from_json(&value).unwrap();
        assert_eq!(decoded.to_map().get("b").map(String::as_str), Some("2"));

        let value: Value = serde_json::from_str(r#"["set",[]]"#).unwrap();
        assert!(OvsdbValue::from_json(&value).unwrap().texts().is_empty());

        let value: Value = serde_json::from_str(r#"["bogus",1]"#).unwrap();
        assert!(OvsdbValue::from_json(&value).is_err());
    }

    #[test]
    fn test_command_is_a_list_query() {
        let command = NbTable::LogicalRouterPort.command();
        assert_eq!(command[0], "ovn-nbctl");
        assert!(command.contains(&"--no-leader-only".to_string()));
        assert!(command.contains(&"--columns=_uuid,name,mac,networks,peer,options".to_string()));
        assert_eq!(command[command.len() - 2..], ["list", "Logical_Router_Port"]);
    }

    #[test]
    fn test_switch_ports_and_switches() {
        let rows = parse_table(NbTable::LogicalSwitchPort, SWITCH_PORTS).unwrap();
        let (ports, names) = decode_ports(NbTable::LogicalSwitchPort, "worker-a", &rows);
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].address, "");
        assert_eq!(ports[1].port_type, PortType::Router);
        assert_eq!(ports[1].peer(), Some("rtos-worker-a"));
        assert_eq!(ports[2].address, "0a:58:0a:f4:01:05 10.244.1.5");
        assert_eq!(names.get("aa-3").map(String::as_str), Some("default_web"));

        let rows = parse_table(NbTable::LogicalSwitch, SWITCHES).unwrap();
        let switches = decode_components(NbTable::LogicalSwitch, "worker-a", &rows, &names);
        assert_eq!(switches[0].identity, "5b0f2c1e-0001");
        assert_eq!(switches[0].ports, vec!["k8s-worker-a", "stor-worker-a"]);
        assert_eq!(switches[0].subnets().len(), 1);
        assert_eq!(switches[1].ports, vec!["default_web"]);
        assert_eq!(
            switches[1].attributes.get("external_ids:k8s.ovn.org/network"),
            Some(&"default".to_string())
        );
    }

    #[test]
    fn test_router_ports() {
        let rows = parse_table(NbTable::LogicalRouterPort, ROUTER_PORTS).unwrap();
        let (ports, _) = decode_ports(NbTable::LogicalRouterPort, "worker-a", &rows);
        assert_eq!(
            ports[0].address,
            "0a:58:0a:f4:01:01 10.244.1.1/24 fd00:10:244:2::1/64"
        );
        assert_eq!(ports[0].peer(), None);
        assert_eq!(ports[0].networks().len(), 2);
        assert_eq!(ports[1].peer(), Some("rtoj-peer"));
        assert_eq!(ports[1].options.get("gateway-mtu").map(String::as_str), Some("1400"));
    }

    #[test]
    fn test_malformed_output() {
        assert!(matches!(
            parse_table(NbTable::LogicalSwitch, "ovn-nbctl: no connection"),
            Err(KubeSourceError::Decode { .. })
        ));
        let short_row = r#"{"data":[[["uuid","x"]]],"headings":["_uuid","name"]}"#;
        assert!(parse_table(NbTable::LogicalSwitch, short_row).is_err());
    }
}
