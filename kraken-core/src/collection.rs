//! Collection layout and the serialized form handed back to the host.

use serde::{Deserialize, Serialize};

use crate::model::{Attributes, Model};

/// Names that describe one logical collection in the remote store.
///
/// A container model holds its backing documents in `documents_relation` and
/// its member items in `member_relation`; every member owns a set of
/// sub-items in `member_sub_relation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionLayout {
    /// Human readable collection name, written into migrated containers.
    pub name: String,
    pub container_type: String,
    pub member_type: String,
    pub documents_relation: String,
    pub member_relation: String,
    pub member_sub_relation: String,
}

impl CollectionLayout {
    /// The movies collection.
    pub fn movies() -> Self {
        Self {
            name: "Movies".to_string(),
            container_type: "MediaContainer".to_string(),
            member_type: "Movie".to_string(),
            documents_relation: "documents".to_string(),
            member_relation: "movies".to_string(),
            member_sub_relation: "actions".to_string(),
        }
    }
}

impl Default for CollectionLayout {
    fn default() -> Self {
        Self::movies()
    }
}

/// Fully merged container as returned by a synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedContainer {
    pub attributes: Attributes,
    pub members: Vec<SerializedMember>,
}

/// One member of a [`SerializedContainer`] with its sub-items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedMember {
    pub attributes: Attributes,
    pub sub_items: Vec<Attributes>,
}

impl SerializedContainer {
    /// Serialize `container` and the members held in its member relation.
    ///
    /// Members whose sub-item relation was never loaded serialize with no
    /// sub-items.
    pub fn from_container(container: &Model, layout: &CollectionLayout) -> Self {
        let members = container
            .relation(&layout.member_relation)
            .unwrap_or_default()
            .iter()
            .map(|member| SerializedMember {
                attributes: member.attributes().clone(),
                sub_items: member
                    .relation(&layout.member_sub_relation)
                    .unwrap_or_default()
                    .iter()
                    .map(|item| item.attributes().clone())
                    .collect(),
            })
            .collect();

        Self {
            attributes: container.attributes().clone(),
            members,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
