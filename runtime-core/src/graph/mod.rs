//! Graph definitions: nodes, connections, validation
//!
//! A graph is the declarative wiring of a set of extensions: which addon
//! instantiates each node, which extension group (thread) it runs on, and
//! which destinations each named message flows to. Graphs arrive as JSON,
//! either inside a `start_graph` command or from the app's predefined
//! graph configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{Error, Result};

pub mod conversion;

pub use conversion::{ConversionMode, ConversionRule, MsgConversion};

/// One extension instance in a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node kind; currently always "extension"
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,

    /// Instance name, unique within the graph
    pub name: String,

    /// Addon that instantiates this node
    pub addon: String,

    /// Extension group (execution thread); defaults to the node name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension_group: Option<String>,

    /// Hosting app; missing means the app receiving the graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// Initial property bag for the extension
    #[serde(default)]
    pub property: serde_json::Value,
}

fn default_node_type() -> String {
    "extension".to_string()
}

impl GraphNode {
    /// The group this node's extension runs on.
    pub fn group(&self) -> &str {
        self.extension_group.as_deref().unwrap_or(&self.name)
    }
}

/// A destination of one message flow, with optional conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgDest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    pub extension: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_conversion: Option<MsgConversion>,
}

/// All destinations for one message name out of one source extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgFlow {
    pub name: String,
    pub dest: Vec<MsgDest>,
}

/// Declared connections out of a single source extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    pub extension: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<MsgFlow>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<MsgFlow>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_frame: Vec<MsgFlow>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_frame: Vec<MsgFlow>,
}

/// Declarative graph: nodes plus connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,

    #[serde(default)]
    pub connections: Vec<GraphConnection>,
}

impl GraphDefinition {
    /// Parse a JSON graph definition.
    pub fn from_json(json: &str) -> Result<Self> {
        let graph: GraphDefinition = serde_json::from_str(json)
            .map_err(|e| Error::Graph(format!("failed to parse graph: {e}")))?;
        graph.validate()?;
        Ok(graph)
    }

    /// Render back to JSON (for forwarding graph subsets to remote apps).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Graph(format!("failed to serialize graph: {e}")))
    }

    /// Validate node uniqueness and connection endpoints.
    ///
    /// Destinations addressing an app that declares no nodes in this graph
    /// are treated as external anchors and left to the remote side.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.node_type != "extension" {
                return Err(Error::Graph(format!(
                    "unsupported node type '{}' on node '{}'",
                    node.node_type, node.name
                )));
            }
            if node.addon.is_empty() {
                return Err(Error::Graph(format!("node '{}' missing addon", node.name)));
            }
            if !seen.insert((node.app.clone(), node.name.clone())) {
                return Err(Error::Graph(format!("duplicate node '{}'", node.name)));
            }
        }

        let declared_apps: HashSet<Option<&str>> =
            self.nodes.iter().map(|n| n.app.as_deref()).collect();
        let node_names: HashSet<(Option<&str>, &str)> = self
            .nodes
            .iter()
            .map(|n| (n.app.as_deref(), n.name.as_str()))
            .collect();

        let check_endpoint = |app: Option<&str>, ext: &str, role: &str| -> Result<()> {
            if declared_apps.contains(&app) {
                if !node_names.contains(&(app, ext)) {
                    return Err(Error::Graph(format!(
                        "{role} '{ext}' does not match a declared node"
                    )));
                }
            }
            Ok(())
        };

        for conn in &self.connections {
            check_endpoint(conn.app.as_deref(), &conn.extension, "connection source")?;
            for flow in conn
                .cmd
                .iter()
                .chain(&conn.data)
                .chain(&conn.audio_frame)
                .chain(&conn.video_frame)
            {
                if flow.name.is_empty() {
                    return Err(Error::Graph(format!(
                        "connection out of '{}' has a flow without a name",
                        conn.extension
                    )));
                }
                if flow.dest.is_empty() {
                    return Err(Error::Graph(format!(
                        "flow '{}' out of '{}' has no destinations",
                        flow.name, conn.extension
                    )));
                }
                for dest in &flow.dest {
                    check_endpoint(dest.app.as_deref(), &dest.extension, "destination")?;
                }
            }
        }
        Ok(())
    }

    /// Nodes hosted by `app_uri` (nodes with no app belong to the
    /// receiving app).
    pub fn nodes_for_app<'a>(&'a self, app_uri: &str) -> Vec<&'a GraphNode> {
        self.nodes
            .iter()
            .filter(|n| match n.app.as_deref() {
                None => true,
                Some(uri) => uri == app_uri || uri == "localhost",
            })
            .collect()
    }

    /// Every distinct app uri referenced by the graph's nodes, other than
    /// `local_uri`.
    pub fn remote_apps(&self, local_uri: &str) -> Vec<String> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if let Some(uri) = node.app.as_deref() {
                if uri != local_uri && uri != "localhost" && !out.iter().any(|u| u == uri) {
                    out.push(uri.to_string());
                }
            }
        }
        out
    }
}

/// A graph declared in the app configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredefinedGraph {
    pub name: String,

    /// Start the graph when the app boots
    #[serde(default)]
    pub auto_start: bool,

    /// Reject a second concurrent instance
    #[serde(default)]
    pub singleton: bool,

    #[serde(default)]
    pub nodes: Vec<GraphNode>,

    #[serde(default)]
    pub connections: Vec<GraphConnection>,
}

impl PredefinedGraph {
    /// The graph body of this predefined entry.
    pub fn definition(&self) -> GraphDefinition {
        GraphDefinition {
            nodes: self.nodes.clone(),
            connections: self.connections.clone(),
        }
    }
}
