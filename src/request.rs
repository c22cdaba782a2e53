//! Update-request classification and normalization.
//!
//! The driver accepts the historically dynamic call shapes of
//! collection-driver APIs (bare id, id string, structured query, combined
//! `{query, update}` object) as explicit tagged variants, resolved once at
//! the entry point rather than branching at every call site.

use serde_json::Value;

use crate::document::{DocumentId, Query, UpdateDoc, ID_FIELD};
use crate::error::MalformedRequestError;

/// JSON type name, for malformed-request diagnostics.
pub(crate) const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Options accompanying an update request.
///
/// `multi` selects a multi-document mutation (which never notifies).
/// `acknowledge` and `projection` are the storage-specific options the
/// interceptor force-overrides on the find-and-modify path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Mutate every matching document instead of exactly one.
    pub multi: bool,
    /// Request write acknowledgment from the store.
    pub acknowledge: bool,
    /// Restrict the fields of any returned document.
    pub projection: Option<Vec<String>>,
}

impl UpdateOptions {
    /// Options for a multi-document update.
    #[must_use]
    pub fn multi() -> Self {
        Self {
            multi: true,
            ..Self::default()
        }
    }
}

/// The search argument of an update: an identifier or a structured query.
///
/// The two forms are equivalent: `Id(x)` is rewritten to the query
/// `{"_id": x}` before dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Search {
    /// A bare identifier (shorthand form).
    Id(DocumentId),
    /// A structured query, which may or may not contain `_id`.
    Query(Query),
}

impl Search {
    /// Classifies a raw JSON search value.
    ///
    /// Strings are identifiers, objects are queries; anything else cannot
    /// target a document and is rejected before any storage call.
    pub fn from_value(value: Value) -> Result<Self, MalformedRequestError> {
        match value {
            Value::String(s) => Ok(Self::Id(DocumentId::from(s))),
            Value::Object(map) => Ok(Self::Query(map)),
            other => Err(MalformedRequestError::UnclassifiableSearch {
                found: json_type_name(&other),
            }),
        }
    }

    /// Rewrites the shorthand form into its equivalent query.
    #[must_use]
    pub fn into_query(self) -> Query {
        match self {
            Self::Id(id) => {
                let mut query = Query::new();
                query.insert(ID_FIELD.to_string(), Value::String(id.into()));
                query
            }
            Self::Query(query) => query,
        }
    }
}

impl From<DocumentId> for Search {
    fn from(id: DocumentId) -> Self {
        Self::Id(id)
    }
}

impl From<&DocumentId> for Search {
    fn from(id: &DocumentId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<&str> for Search {
    fn from(id: &str) -> Self {
        Self::Id(DocumentId::from(id))
    }
}

impl From<Query> for Search {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

/// A normalized find-and-modify request: the target and the mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModifySpec {
    /// What to find.
    pub target: Search,
    /// The mutation to apply to the first match.
    pub update: UpdateDoc,
}

impl ModifySpec {
    /// Builds a spec from an already-classified target.
    pub fn new(target: impl Into<Search>, update: UpdateDoc) -> Self {
        Self {
            target: target.into(),
            update,
        }
    }

    /// Resolves a raw JSON find-and-modify request.
    ///
    /// Accepts the four equivalent call shapes:
    /// - `{"query": <object>, "update": <object>}` — embedded update wins
    ///   over `sibling_update`;
    /// - `{"query": <id string>, "update": <object>}` — the id is wrapped
    ///   as `{"_id": id}`;
    /// - a bare query object plus `sibling_update`;
    /// - a bare id string plus `sibling_update`.
    pub fn from_value(
        value: Value,
        sibling_update: Option<UpdateDoc>,
    ) -> Result<Self, MalformedRequestError> {
        let (target, embedded) = match value {
            Value::Object(mut map) => match map.remove("query") {
                Some(Value::Object(query)) => {
                    let embedded = take_update(&mut map);
                    (Search::Query(query), embedded)
                }
                Some(Value::String(id)) => {
                    let embedded = take_update(&mut map);
                    (Search::Id(DocumentId::from(id)), embedded)
                }
                Some(other) => {
                    // Not a recognizable embedded query; the whole first
                    // argument is the query.
                    map.insert("query".to_string(), other);
                    (Search::Query(map), None)
                }
                None => (Search::Query(map), None),
            },
            Value::String(id) => (Search::Id(DocumentId::from(id)), None),
            other => {
                return Err(MalformedRequestError::UnclassifiableSearch {
                    found: json_type_name(&other),
                })
            }
        };

        let update = embedded
            .or(sibling_update)
            .ok_or(MalformedRequestError::MissingUpdate)?;

        Ok(Self { target, update })
    }
}

fn take_update(map: &mut serde_json::Map<String, Value>) -> Option<UpdateDoc> {
    match map.remove("update") {
        Some(Value::Object(update)) => Some(update),
        Some(other) => {
            map.insert("update".to_string(), other);
            None
        }
        None => None,
    }
}
