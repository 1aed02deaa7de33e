//! Locators: the 4-tuple address of a message endpoint

use serde::{Deserialize, Serialize};

/// Address of a message source or destination.
///
/// A missing field means "current": a destination of just an extension
/// name resolves against the sender's app, graph and group at send time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Loc {
    /// URI of the hosting app (`msgpack://host:port/`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_uri: Option<String>,

    /// Graph instance id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,

    /// Extension group name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Extension name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Loc {
    /// Locator addressing an extension in the sender's graph.
    pub fn extension(name: impl Into<String>) -> Self {
        Loc {
            extension: Some(name.into()),
            ..Default::default()
        }
    }

    /// Locator addressing an app as a whole.
    pub fn app(uri: impl Into<String>) -> Self {
        Loc {
            app_uri: Some(uri.into()),
            ..Default::default()
        }
    }

    /// Builder-style graph id.
    pub fn with_graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    /// Builder-style app uri.
    pub fn with_app(mut self, uri: impl Into<String>) -> Self {
        self.app_uri = Some(uri.into());
        self
    }

    /// Builder-style extension name.
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extension = Some(name.into());
        self
    }

    /// Fill missing prefix fields from `base` ("current" resolution): a
    /// destination naming only an extension inherits the sender's app,
    /// graph and group.
    pub fn resolve_with(&mut self, base: &Loc) {
        if self.app_uri.is_none() {
            self.app_uri = base.app_uri.clone();
        }
        if self.graph_id.is_none() {
            self.graph_id = base.graph_id.clone();
        }
        if self.group.is_none() {
            self.group = base.group.clone();
        }
    }

    /// Whether this locator targets the given app.
    pub fn is_local_to(&self, app_uri: &str) -> bool {
        match &self.app_uri {
            None => true,
            Some(uri) => uri == app_uri || uri == "localhost",
        }
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.app_uri.as_deref().unwrap_or("_"),
            self.graph_id.as_deref().unwrap_or("_"),
            self.group.as_deref().unwrap_or("_"),
            self.extension.as_deref().unwrap_or("_"),
        )
    }
}
