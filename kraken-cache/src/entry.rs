//! Cache entries and the storage-safe snapshot of a model graph.
//!
//! One [`CacheEntry`] exists per document. It holds the document timestamp
//! and a [`SerializedModel`] per model stored in that document. Snapshots are
//! self-contained: type names and attributes of the model and of every
//! persisted relation are enough to rebuild the graph through a
//! [`ModelRegistry`].

use std::collections::BTreeMap;

use chrono::DateTime;
use kraken_core::{Attributes, Model, ModelRegistry, PreconditionError, StorageError, Timestamp};
use serde::{Deserialize, Serialize};

/// Byte length of the timestamp prefix of an encoded entry.
const TIMESTAMP_LEN: usize = 8;

/// Related models persisted alongside a model, for one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRelation {
    pub related_type_name: String,
    pub related_attributes: Vec<Attributes>,
}

/// Flattened snapshot of one model plus the relations chosen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedModel {
    pub type_name: String,
    pub attributes: Attributes,
    #[serde(default)]
    pub relations: BTreeMap<String, SerializedRelation>,
}

impl SerializedModel {
    /// Snapshot `model` together with the `related` sets.
    ///
    /// Related type names come from the registry, so an empty set still
    /// records which type it would hold.
    pub fn capture(
        model: &Model,
        related: &[(&str, &[Model])],
        registry: &ModelRegistry,
    ) -> Result<Self, PreconditionError> {
        let mut relations = BTreeMap::new();
        for (relation, models) in related {
            let related_type_name = registry.related_type(model.type_name(), relation)?;
            relations.insert(
                relation.to_string(),
                SerializedRelation {
                    related_type_name: related_type_name.to_string(),
                    related_attributes: models.iter().map(|m| m.attributes().clone()).collect(),
                },
            );
        }

        Ok(Self {
            type_name: model.type_name().to_string(),
            attributes: model.attributes().clone(),
            relations,
        })
    }

    /// Rebuild the model graph in trusted (already persisted) mode.
    pub fn restore(&self, registry: &ModelRegistry) -> Result<Model, PreconditionError> {
        let mut model = registry.instantiate(&self.type_name, self.attributes.clone())?;

        for (relation, serialized) in &self.relations {
            let related = serialized
                .related_attributes
                .iter()
                .map(|attributes| {
                    registry.instantiate(&serialized.related_type_name, attributes.clone())
                })
                .collect::<Result<Vec<_>, _>>()?;
            model.set_relation(relation.clone(), related);
        }

        Ok(model)
    }
}

/// Everything cached for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub updated_at: Timestamp,
    /// Model url -> snapshot.
    pub models: BTreeMap<String, SerializedModel>,
}

impl CacheEntry {
    /// An entry with no models yet.
    pub fn empty(updated_at: Timestamp) -> Self {
        Self {
            updated_at,
            models: BTreeMap::new(),
        }
    }

    /// Encode for storage.
    ///
    /// Format: `[updated_at millis: 8 bytes LE][json models]`.
    pub fn encode(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let models = serde_json::to_vec(&self.models).map_err(|e| StorageError::EncodeFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + models.len());
        bytes.extend_from_slice(&self.updated_at.timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&models);
        Ok(bytes)
    }

    /// Decode a stored entry.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        let corrupt = |reason: String| StorageError::Corrupt {
            key: key.to_string(),
            reason,
        };

        if bytes.len() < TIMESTAMP_LEN {
            return Err(corrupt(format!("entry is only {} bytes", bytes.len())));
        }

        let timestamp_bytes: [u8; TIMESTAMP_LEN] = bytes[..TIMESTAMP_LEN]
            .try_into()
            .map_err(|_| corrupt("invalid timestamp".to_string()))?;
        let updated_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
            .ok_or_else(|| corrupt("timestamp out of range".to_string()))?;

        let models = serde_json::from_slice(&bytes[TIMESTAMP_LEN..])
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Self { updated_at, models })
    }

    /// Rebuild every model of this entry.
    pub fn restore_models(&self, registry: &ModelRegistry) -> Result<Vec<Model>, PreconditionError> {
        self.models
            .values()
            .map(|serialized| serialized.restore(registry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kraken_test_utils::fixtures;
    use kraken_test_utils::generators::{arb_attributes, arb_movie};
    use proptest::prelude::*;

    fn now_millis() -> Timestamp {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).expect("valid millis")
    }

    #[test]
    fn test_capture_records_related_type() {
        let registry = ModelRegistry::media();
        let movie = fixtures::movie("https://pod.example/movies/spirit", "Spirit");
        let actions = vec![fixtures::watch_action(&movie)];

        let serialized =
            SerializedModel::capture(&movie, &[("actions", actions.as_slice())], &registry).expect("capture");

        assert_eq!(serialized.type_name, "Movie");
        let relation = &serialized.relations["actions"];
        assert_eq!(relation.related_type_name, "WatchAction");
        assert_eq!(relation.related_attributes.len(), 1);
    }

    #[test]
    fn test_capture_unknown_relation() {
        let registry = ModelRegistry::media();
        let movie = fixtures::movie("https://pod.example/movies/spirit", "Spirit");

        let result = SerializedModel::capture(&movie, &[("reviews", &[] as &[Model])], &registry);
        assert!(matches!(result, Err(PreconditionError::UnknownRelation { .. })));
    }

    #[test]
    fn test_restore_unknown_type() {
        let serialized = SerializedModel {
            type_name: "Book".to_string(),
            attributes: Attributes::new(),
            relations: BTreeMap::new(),
        };
        let result = serialized.restore(&ModelRegistry::media());
        assert!(matches!(result, Err(PreconditionError::UnknownModelType { .. })));
    }

    #[test]
    fn test_entry_encode_decode() {
        let registry = ModelRegistry::media();
        let movie = fixtures::movie("https://pod.example/movies/spirit", "Spirit");
        let mut entry = CacheEntry::empty(now_millis());
        entry.models.insert(
            "https://pod.example/movies/spirit#it".to_string(),
            SerializedModel::capture(&movie, &[], &registry).expect("capture"),
        );

        let bytes = entry.encode("k").expect("encode");
        let decoded = CacheEntry::decode("k", &bytes).expect("decode");
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_truncated_entry() {
        let result = CacheEntry::decode("k", &[1, 2, 3]);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_decode_garbage_payload() {
        let mut bytes = now_millis().timestamp_millis().to_le_bytes().to_vec();
        bytes.extend_from_slice(b"not json");
        let result = CacheEntry::decode("k", &bytes);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Restoring a captured snapshot yields the same type name, attributes
        /// and related attribute sets.
        #[test]
        fn prop_capture_restore_preserves_graph(
            movie in arb_movie(),
            action_attributes in prop::collection::vec(arb_attributes(), 0..4),
        ) {
            let registry = ModelRegistry::media();
            let actions: Vec<Model> = action_attributes
                .into_iter()
                .map(|a| Model::from_persisted("WatchAction", a))
                .collect();

            let serialized = SerializedModel::capture(&movie, &[("actions", actions.as_slice())], &registry)
                .expect("capture");
            let bytes = serde_json::to_vec(&serialized).expect("json");
            let restored = serde_json::from_slice::<SerializedModel>(&bytes)
                .expect("json")
                .restore(&registry)
                .expect("restore");

            prop_assert_eq!(restored.type_name(), "Movie");
            prop_assert_eq!(restored.attributes(), movie.attributes());
            let restored_actions = restored.relation("actions").expect("actions loaded");
            prop_assert_eq!(restored_actions.len(), actions.len());
            for (restored, original) in restored_actions.iter().zip(&actions) {
                prop_assert_eq!(restored.type_name(), "WatchAction");
                prop_assert_eq!(restored.attributes(), original.attributes());
            }
        }
    }
}
