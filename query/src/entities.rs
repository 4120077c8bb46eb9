use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Error, QueryCacheKey};

/// Id of an entity.
///
/// A string holding a canonical integer is the same id as that integer:
/// `"1"` and `1` match, `"01"` and `1` don't.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Numeric id.
    Int(i64),
    /// String id.
    Str(String),
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        EntityId::Int(id)
    }
}

impl From<i32> for EntityId {
    fn from(id: i32) -> Self {
        EntityId::Int(id.into())
    }
}

impl From<u32> for EntityId {
    fn from(id: u32) -> Self {
        EntityId::Int(id.into())
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::from(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        match id.parse::<i64>() {
            Ok(number) if number.to_string() == id => EntityId::Int(number),
            _ => EntityId::Str(id),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntityId {
    Int(i64),
    Str(String),
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawEntityId::deserialize(deserializer)? {
            RawEntityId::Int(id) => EntityId::Int(id),
            RawEntityId::Str(id) => EntityId::from(id),
        })
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Int(id) => write!(f, "{id}"),
            EntityId::Str(id) => write!(f, "{id}"),
        }
    }
}

/// An entity type, optionally narrowed to one id.
///
/// Without an id it stands for every entity of that type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityDescription {
    /// Entity type, e.g. `"Post"`.
    pub entity_type: String,
    /// Entity id, or `None` for the whole type.
    pub id: Option<EntityId>,
}

impl EntityDescription {
    /// Every entity of `entity_type`.
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
        }
    }

    /// One entity of `entity_type`.
    pub fn with_id(entity_type: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: Some(id.into()),
        }
    }
}

impl From<&str> for EntityDescription {
    fn from(entity_type: &str) -> Self {
        EntityDescription::of_type(entity_type)
    }
}

impl From<String> for EntityDescription {
    fn from(entity_type: String) -> Self {
        EntityDescription::of_type(entity_type)
    }
}

impl<I: Into<EntityId>> From<(&str, I)> for EntityDescription {
    fn from((entity_type, id): (&str, I)) -> Self {
        EntityDescription::with_id(entity_type, id)
    }
}

/// Computes entities from `(result, arg)`.
pub type EntitiesFn = Rc<dyn Fn(&Value, &Value) -> Result<Vec<EntityDescription>, Error>>;

/// What an endpoint provides (queries) or invalidates (mutations).
#[derive(Clone, Default)]
pub enum EntitiesDescriptor {
    /// Nothing.
    #[default]
    None,
    /// A fixed list.
    List(Vec<EntityDescription>),
    /// Derived from the result payload and the original argument.
    Computed(EntitiesFn),
}

impl EntitiesDescriptor {
    /// A fixed list of entities.
    pub fn list<E: Into<EntityDescription>>(entities: impl IntoIterator<Item = E>) -> Self {
        EntitiesDescriptor::List(entities.into_iter().map(Into::into).collect())
    }

    /// Entities derived from `(result, arg)`.
    pub fn computed(
        func: impl Fn(&Value, &Value) -> Result<Vec<EntityDescription>, Error> + 'static,
    ) -> Self {
        EntitiesDescriptor::Computed(Rc::new(func))
    }
}

impl std::fmt::Debug for EntitiesDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitiesDescriptor::None => write!(f, "None"),
            EntitiesDescriptor::List(list) => f.debug_tuple("List").field(list).finish(),
            EntitiesDescriptor::Computed(_) => write!(f, "Computed(..)"),
        }
    }
}

/// Evaluates `descriptor` against a result and its argument.
///
/// The output is deduplicated and keeps first-seen order. Errors from a
/// computed descriptor are returned to the caller.
pub fn calculate_provided_by(
    descriptor: &EntitiesDescriptor,
    result: &Value,
    arg: &Value,
) -> Result<Vec<EntityDescription>, Error> {
    let entities = match descriptor {
        EntitiesDescriptor::None => return Ok(Vec::new()),
        EntitiesDescriptor::List(list) => list.clone(),
        EntitiesDescriptor::Computed(func) => func(result, arg)?,
    };

    let mut seen = HashSet::with_capacity(entities.len());
    Ok(entities
        .into_iter()
        .filter(|entity| seen.insert(entity.clone()))
        .collect())
}

/// Reverse index from provided entities to the query entries that provided them.
///
/// `entity type -> (id, or None for the whole type) -> query keys`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvidedIndex {
    by_type: HashMap<String, HashMap<Option<EntityId>, BTreeSet<QueryCacheKey>>>,
}

impl ProvidedIndex {
    /// Replaces whatever `key` provided before with `entities`.
    pub(crate) fn provide(&mut self, key: &QueryCacheKey, entities: &[EntityDescription]) {
        self.remove_key(key);
        for entity in entities {
            self.by_type
                .entry(entity.entity_type.clone())
                .or_default()
                .entry(entity.id.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    /// Drops every reference to `key`.
    pub(crate) fn remove_key(&mut self, key: &QueryCacheKey) {
        self.by_type.retain(|_, ids| {
            ids.retain(|_, keys| {
                keys.remove(key);
                !keys.is_empty()
            });
            !ids.is_empty()
        });
    }

    /// Query entries affected by invalidating `entity`.
    ///
    /// A type-only entity matches every provider of that type. An entity with an
    /// id only matches providers of that exact id.
    pub fn affected_by(&self, entity: &EntityDescription) -> BTreeSet<QueryCacheKey> {
        let Some(ids) = self.by_type.get(&entity.entity_type) else {
            return BTreeSet::new();
        };

        match &entity.id {
            None => ids.values().flatten().cloned().collect(),
            Some(id) => ids.get(&Some(id.clone())).cloned().unwrap_or_default(),
        }
    }

    /// Entities currently provided by `key`.
    pub fn provided_by(&self, key: &QueryCacheKey) -> Vec<EntityDescription> {
        let mut entities: Vec<_> = self
            .by_type
            .iter()
            .flat_map(|(entity_type, ids)| {
                ids.iter()
                    .filter(|(_, keys)| keys.contains(key))
                    .map(|(id, _)| EntityDescription {
                        entity_type: entity_type.clone(),
                        id: id.clone(),
                    })
            })
            .collect();
        entities.sort();
        entities
    }

    /// True if nothing is provided.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(args: &str) -> QueryCacheKey {
        QueryCacheKey::new("getPost", args)
    }

    #[test]
    fn list_descriptor_is_deduplicated() {
        let descriptor = EntitiesDescriptor::list(vec![
            EntityDescription::from("Post"),
            EntityDescription::from(("Post", 1)),
            EntityDescription::from("Post"),
        ]);

        let entities = calculate_provided_by(&descriptor, &json!(null), &json!(null)).unwrap();

        assert_eq!(
            entities,
            vec![
                EntityDescription::of_type("Post"),
                EntityDescription::with_id("Post", 1)
            ]
        );
    }

    #[test]
    fn computed_descriptor_sees_result_and_arg() {
        let descriptor = EntitiesDescriptor::computed(|result, arg| {
            let mut entities = vec![EntityDescription::with_id("User", arg["user"].to_string())];
            for post in result.as_array().into_iter().flatten() {
                let id = post["id"].as_i64().ok_or_else(|| {
                    Error::EntityDescriptor("post without numeric id".into())
                })?;
                entities.push(EntityDescription::with_id("Post", id));
            }
            Ok(entities)
        });

        let entities = calculate_provided_by(
            &descriptor,
            &json!([{ "id": 1 }, { "id": 2 }, { "id": 1 }]),
            &json!({ "user": 7 }),
        )
        .unwrap();

        assert_eq!(
            entities,
            vec![
                EntityDescription::with_id("User", "7"),
                EntityDescription::with_id("Post", 1),
                EntityDescription::with_id("Post", 2),
            ]
        );

        let error = calculate_provided_by(&descriptor, &json!([{ "id": "x" }]), &json!({}));
        assert!(matches!(error, Err(Error::EntityDescriptor(_))));
    }

    #[test]
    fn provide_replaces_previous_entities() {
        let mut index = ProvidedIndex::default();
        index.provide(&key("1"), &[EntityDescription::with_id("Post", 1)]);
        index.provide(&key("1"), &[EntityDescription::with_id("Post", 2)]);

        assert!(index
            .affected_by(&EntityDescription::with_id("Post", 1))
            .is_empty());
        assert_eq!(
            index.provided_by(&key("1")),
            vec![EntityDescription::with_id("Post", 2)]
        );
    }

    #[test]
    fn lookup_by_type_and_by_id() {
        let mut index = ProvidedIndex::default();
        index.provide(&key("1"), &[EntityDescription::with_id("Post", 1)]);
        index.provide(&key("2"), &[EntityDescription::with_id("Post", 2)]);
        index.provide(&key("list"), &[EntityDescription::of_type("Post")]);
        index.provide(&key("user"), &[EntityDescription::with_id("User", 1)]);

        let by_id = index.affected_by(&EntityDescription::with_id("Post", 1));
        assert_eq!(by_id, BTreeSet::from([key("1")]));

        let by_type = index.affected_by(&EntityDescription::of_type("Post"));
        assert_eq!(by_type, BTreeSet::from([key("1"), key("2"), key("list")]));

        assert!(index
            .affected_by(&EntityDescription::of_type("Comment"))
            .is_empty());
    }

    #[test]
    fn remove_key_prunes_empty_buckets() {
        let mut index = ProvidedIndex::default();
        index.provide(
            &key("1"),
            &[
                EntityDescription::with_id("Post", 1),
                EntityDescription::of_type("Post"),
            ],
        );
        index.remove_key(&key("1"));
        assert!(index.is_empty());
    }

    #[test]
    fn numeric_strings_are_the_same_id() {
        assert_eq!(EntityId::from("1"), EntityId::from(1));
        assert_eq!(EntityId::from("-3"), EntityId::Int(-3));
        assert_eq!(EntityId::from("01"), EntityId::Str("01".into()));
        assert_eq!(EntityId::from("a"), EntityId::Str("a".into()));

        let parsed: EntityId = serde_json::from_value(json!("7")).unwrap();
        assert_eq!(parsed, EntityId::Int(7));
        assert_eq!(serde_json::to_value(EntityId::from("a")).unwrap(), json!("a"));

        let mut index = ProvidedIndex::default();
        index.provide(&key("1"), &[EntityDescription::with_id("Post", "1")]);
        assert_eq!(
            index.affected_by(&EntityDescription::with_id("Post", 1)),
            BTreeSet::from([key("1")])
        );
    }
}
