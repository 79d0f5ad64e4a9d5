//! Document bodies and the collection path convention.
//!
//! A document is a JSON record keyed by `(type, id)`. Its persisted body
//! holds only the `attributes` and `relationships` sections -- type and id
//! are derived from the tree path, never duplicated in the body. The one
//! exception is the internal card collection, whose bodies embed `id` and
//! `type` explicitly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// A document body: two flat key-value sections.
///
/// The canonical byte form is JSON with sorted object keys (the workspace
/// builds `serde_json` without `preserve_order`, so maps serialize sorted).
/// Serializing the same logical document always yields the same bytes, and
/// therefore the same blob id -- unrelated formatting can never produce a
/// diff.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    pub attributes: BTreeMap<String, Value>,
    pub relationships: BTreeMap<String, Value>,
}

/// Serialized shape of a document body.
///
/// `id` and `doc_type` are only populated for internal card documents.
#[derive(Serialize, Deserialize)]
struct BodyRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    doc_type: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    relationships: BTreeMap<String, Value>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document from an attributes map.
    pub fn with_attributes(attributes: BTreeMap<String, Value>) -> Self {
        Self {
            attributes,
            relationships: BTreeMap::new(),
        }
    }

    /// Set a single attribute (builder style, handy in tests).
    pub fn attr(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set a single relationship (builder style).
    pub fn rel(mut self, key: impl Into<String>, value: Value) -> Self {
        self.relationships.insert(key.into(), value);
        self
    }

    /// Canonical body bytes: attributes/relationships only.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, TypeError> {
        let repr = BodyRepr {
            id: None,
            doc_type: None,
            attributes: self.attributes.clone(),
            relationships: self.relationships.clone(),
        };
        serde_json::to_vec(&repr).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Canonical body bytes for an internal card document, with the
    /// identity embedded.
    pub fn to_card_bytes(&self, doc_type: &str, id: &str) -> Result<Vec<u8>, TypeError> {
        let repr = BodyRepr {
            id: Some(id.to_string()),
            doc_type: Some(doc_type.to_string()),
            attributes: self.attributes.clone(),
            relationships: self.relationships.clone(),
        };
        serde_json::to_vec(&repr).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode a body, returning the document and any embedded identity.
    ///
    /// Regular documents decode to `(doc, None)`; card documents decode to
    /// `(doc, Some((type, id)))`.
    pub fn decode(data: &[u8]) -> Result<(Self, Option<(String, String)>), TypeError> {
        let repr: BodyRepr =
            serde_json::from_slice(data).map_err(|e| TypeError::Serialization(e.to_string()))?;
        let embedded = match (repr.doc_type, repr.id) {
            (Some(t), Some(i)) => Some((t, i)),
            _ => None,
        };
        Ok((
            Self {
                attributes: repr.attributes,
                relationships: repr.relationships,
            },
            embedded,
        ))
    }

    /// Shallow section merge: for each top-level key in `other`, the new
    /// value overrides the old. Sections are merged as key-value maps, not
    /// deep-merged.
    pub fn merge_from(&mut self, other: &Document) {
        for (k, v) in &other.attributes {
            self.attributes.insert(k.clone(), v.clone());
        }
        for (k, v) in &other.relationships {
            self.relationships.insert(k.clone(), v.clone());
        }
    }

    /// Key-level three-way merge of two documents derived from `base`.
    ///
    /// Per top-level key in each section: agreement takes either side, a
    /// key changed (or removed) on one side takes that side, and the same
    /// key changed differently on both sides makes the documents
    /// unmergeable (`None`). Values are compared whole -- no deep merge
    /// inside a key.
    pub fn three_way_merge(base: &Document, ours: &Document, theirs: &Document) -> Option<Document> {
        Some(Document {
            attributes: merge_section(&base.attributes, &ours.attributes, &theirs.attributes)?,
            relationships: merge_section(
                &base.relationships,
                &ours.relationships,
                &theirs.relationships,
            )?,
        })
    }
}

fn merge_section(
    base: &BTreeMap<String, Value>,
    ours: &BTreeMap<String, Value>,
    theirs: &BTreeMap<String, Value>,
) -> Option<BTreeMap<String, Value>> {
    let mut keys = std::collections::BTreeSet::new();
    keys.extend(base.keys());
    keys.extend(ours.keys());
    keys.extend(theirs.keys());

    let mut merged = BTreeMap::new();
    for key in keys {
        let b = base.get(key);
        let o = ours.get(key);
        let t = theirs.get(key);
        let taken = if o == t {
            o
        } else if o == b {
            t
        } else if t == b {
            o
        } else {
            return None;
        };
        if let Some(value) = taken {
            merged.insert(key.clone(), value.clone());
        }
    }
    Some(merged)
}

/// The three document collections and their path layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Schema documents: `schema/<type>/<id>.json`.
    Schema,
    /// Content documents: `contents/<type>/<id>.json`.
    Contents,
    /// Internal card documents, stored flat: `cards/<id>.json`.
    Cards,
}

impl Collection {
    /// The top-level category directory for this collection.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Contents => "contents",
            Self::Cards => "cards",
        }
    }

    /// Parse a category directory name.
    pub fn from_category(name: &str) -> Option<Self> {
        match name {
            "schema" => Some(Self::Schema),
            "contents" => Some(Self::Contents),
            "cards" => Some(Self::Cards),
            _ => None,
        }
    }

    /// The tree path for a document in this collection.
    pub fn path_for(&self, doc_type: &str, id: &str) -> String {
        match self {
            Self::Schema | Self::Contents => {
                format!("{}/{}/{}.json", self.category(), doc_type, id)
            }
            Self::Cards => format!("{}/{}.json", self.category(), id),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category())
    }
}

/// A parsed document path: `(collection, type, id)`.
///
/// For the flat card collection the path carries no type; `doc_type` is the
/// category name and consumers take the real type from the embedded body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocPath {
    pub collection: Collection,
    pub doc_type: String,
    pub id: String,
}

impl DocPath {
    /// Parse a tree path back into its document identity.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        let segments: Vec<&str> = path.split('/').collect();
        let bad = || TypeError::InvalidPath(path.to_string());

        let (collection, doc_type, file) = match segments.as_slice() {
            [category, doc_type, file] => {
                let collection = Collection::from_category(category).ok_or_else(bad)?;
                if collection == Collection::Cards {
                    return Err(bad());
                }
                (collection, doc_type.to_string(), *file)
            }
            [category, file] => {
                let collection = Collection::from_category(category).ok_or_else(bad)?;
                if collection != Collection::Cards {
                    return Err(bad());
                }
                (collection, category.to_string(), *file)
            }
            _ => return Err(bad()),
        };

        let id = file.strip_suffix(".json").ok_or_else(bad)?;
        if id.is_empty() || doc_type.is_empty() {
            return Err(bad());
        }

        Ok(Self {
            collection,
            doc_type,
            id: id.to_string(),
        })
    }

    /// Rebuild the tree path.
    pub fn to_path(&self) -> String {
        self.collection.path_for(&self.doc_type, &self.id)
    }
}
