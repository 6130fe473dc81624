//! Identity descriptor handed over by the host.

use serde::{Deserialize, Serialize};

/// Who the synchronization runs for.
///
/// The engine never interprets these fields itself; they are passed through
/// to the [`RemoteConnector`](crate::RemoteConnector) that turns them into an
/// authenticated remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub storages: Vec<String>,
    #[serde(default)]
    pub type_index_url: Option<String>,
}

impl IdentityDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar_url: None,
            storages: Vec::new(),
            type_index_url: None,
        }
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storages.push(storage.into());
        self
    }

    pub fn with_type_index(mut self, url: impl Into<String>) -> Self {
        self.type_index_url = Some(url.into());
        self
    }
}
