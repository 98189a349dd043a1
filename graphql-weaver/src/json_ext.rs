//! JSON manipulation for response stitching.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::map::Entry;
pub(crate) use serde_json::Value;

/// A JSON object.
pub type Object = serde_json::Map<String, Value>;

/// One step in a GraphQL response path, a key into an object or an index
/// into a list.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(index) => write!(f, "{index}"),
            PathElement::Key(key) => write!(f, "{key}"),
        }
    }
}

/// A GraphQL response path, e.g. `/people/3/name`.
///
/// Serializes to the flat list the `errors[].path` member of a GraphQL
/// response carries.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_slice<T: AsRef<str>>(keys: &[T]) -> Self {
        Self(
            keys.iter()
                .map(|key| PathElement::Key(key.as_ref().to_string()))
                .collect(),
        )
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(PathElement::Key(key.into()));
        next
    }

    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(PathElement::Index(index));
        next
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shift a sub-response path into this path's coordinate system.
    ///
    /// The first `remove_prefix_len` elements of `sub` correspond to the
    /// ancestor chain a sub-query wrapped around the requested selection;
    /// they are dropped and the remainder is appended to `self`.
    pub fn join_sub_path(&self, sub: &Path, remove_prefix_len: usize) -> Path {
        let mut elements = self.0.clone();
        elements.extend(sub.0.iter().skip(remove_prefix_len).cloned());
        Path(elements)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.0.iter() {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

/// Extension trait for [`serde_json::Value`].
pub(crate) trait ValueExt {
    /// Deep merge the JSON objects and arrays, overriding scalar values in
    /// `&mut self` if they already exist.
    fn deep_merge(&mut self, other: Self);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.entry(key) {
                        Entry::Vacant(e) => {
                            e.insert(value);
                        }
                        Entry::Occupied(e) => {
                            e.into_mut().deep_merge(value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (a_value, b_value) in a.iter_mut().zip(b.into_iter()) {
                    a_value.deep_merge(b_value);
                }
            }
            (_, Value::Null) => {}
            (a, b) => {
                *a = b;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn path_serializes_to_flat_list() {
        let path = Path::empty().key("people").index(3).key("name");
        assert_eq!(
            serde_json::to_value(&path).unwrap(),
            json!(["people", 3, "name"])
        );
        let back: Path = serde_json::from_value(json!(["people", 3, "name"])).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn join_sub_path_drops_the_ancestor_chain() {
        let outer = Path::empty().key("A_person").key("countryCode_link");
        let sub = Path::from_slice(&["countryByCode", "name"]);
        assert_eq!(
            outer.join_sub_path(&sub, 1),
            Path::empty()
                .key("A_person")
                .key("countryCode_link")
                .key("name")
        );
    }

    #[test]
    fn join_sub_path_with_empty_outer_keeps_sub() {
        let sub = Path::from_slice(&["hello"]);
        assert_eq!(Path::empty().join_sub_path(&sub, 0), sub);
    }

    #[test]
    fn deep_merge_combines_objects() {
        let mut a = json!({"person": {"name": "Ada"}});
        a.deep_merge(json!({"person": {"born": 1815}}));
        assert_eq!(a, json!({"person": {"name": "Ada", "born": 1815}}));
    }
}
