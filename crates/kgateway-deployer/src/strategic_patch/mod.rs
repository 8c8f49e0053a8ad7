//! A strategic merge patch engine for opaque JSON documents.
//!
//! The engine merges user supplied, partial Kubernetes resource specs onto fully rendered ones.
//! It follows the [strategic merge patch] conventions:
//!
//! - Scalars in the patch replace the generated value.
//! - Maps are merged recursively, a `null` value removes the field.
//! - Lists with a registered [`MergeKey`] are merged element by element, all other lists are
//!   replaced.
//! - `$patch: delete` on a list element removes the matching element.
//! - `$patch: replace` on a map replaces the lists of that map verbatim, on a list element it
//!   replaces the matching element instead of merging it.
//!
//! Directives are consumed while merging and never show up in the merged document.
//!
//! ```
//! # use kgateway_deployer::strategic_patch::StrategicMerge;
//! use serde_json::json;
//!
//! let base = json!({
//!     "replicas": 1,
//!     "template": {"spec": {"containers": [
//!         {"name": "proxy", "image": "proxy:1"},
//!         {"name": "sidecar", "image": "sidecar:1"},
//!     ]}},
//! });
//! let patch = json!({
//!     "replicas": 3,
//!     "template": {"spec": {"containers": [
//!         {"name": "sidecar", "$patch": "delete"},
//!     ]}},
//! });
//!
//! let merged = StrategicMerge::default().merge(base, &patch).unwrap();
//! assert_eq!(merged, json!({
//!     "replicas": 3,
//!     "template": {"spec": {"containers": [{"name": "proxy", "image": "proxy:1"}]}},
//! }));
//! ```
//!
//! [strategic merge patch]: https://github.com/kubernetes/community/blob/master/contributors/devel/sig-api-machinery/strategic-merge-patch.md

use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use tracing::debug;

mod directive;
mod merge_keys;
mod path;

pub use directive::{Directive, PATCH_DIRECTIVE_KEY};
pub use merge_keys::{MergeKey, MergeKeyRegistry};
pub use path::FieldPath;

use directive::PatchMap;
use merge_keys::Identity;
use path::Scope;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse patch fragment as JSON"))]
    ParseFragment { source: serde_json::Error },

    #[snafu(display(
        "invalid {PATCH_DIRECTIVE_KEY:?} value {value} at {path}, expected one of \"merge\", \"replace\" or \"delete\""
    ))]
    InvalidDirective { value: Value, path: FieldPath },

    #[snafu(display("unknown directive {key:?} at {path}"))]
    UnknownDirective { key: String, path: FieldPath },

    #[snafu(display(
        "directive {PATCH_DIRECTIVE_KEY:?}: {directive} at {path} is only allowed on list elements"
    ))]
    DirectiveOutOfScope { directive: Directive, path: FieldPath },
}

/// A patch list element that can be matched against the generated list.
struct KeyedElement<'a> {
    index: usize,
    identity: Identity<'a>,
    patch: PatchMap<'a>,
}

/// Merges patch documents onto base documents using strategic merge patch semantics.
///
/// The engine is stateless apart from its [`MergeKeyRegistry`], one instance can be shared by any
/// number of merges.
#[derive(Clone, Debug, Default)]
pub struct StrategicMerge {
    merge_keys: MergeKeyRegistry,
}

impl StrategicMerge {
    pub fn new(merge_keys: MergeKeyRegistry) -> Self {
        Self { merge_keys }
    }

    /// Merges `patch` onto `base` and returns the merged document.
    ///
    /// `base` is consumed, callers keep their original untouched until the merge succeeded. A
    /// `null` patch removes the whole document and results in [`Value::Null`].
    pub fn merge(&self, base: Value, patch: &Value) -> Result<Value> {
        let merged = self.merge_value(Some(base), patch, &Scope::root())?;
        Ok(merged.unwrap_or(Value::Null))
    }

    /// Like [`StrategicMerge::merge`], but parses the patch from raw JSON first.
    pub fn merge_json(&self, base: Value, patch: &str) -> Result<Value> {
        let patch: Value = serde_json::from_str(patch).context(ParseFragmentSnafu)?;
        self.merge(base, &patch)
    }

    /// Returns [`None`] if the value should be removed from its parent map.
    fn merge_value(
        &self,
        base: Option<Value>,
        patch: &Value,
        scope: &Scope<'_>,
    ) -> Result<Option<Value>> {
        match patch {
            Value::Null => Ok(None),
            Value::Object(patch_map) => {
                let patch_map = PatchMap::parse(patch_map, scope)?;
                if patch_map.directive == Directive::Delete {
                    return DirectiveOutOfScopeSnafu {
                        directive: Directive::Delete,
                        path: scope.path(),
                    }
                    .fail();
                }

                Ok(Some(Value::Object(self.merge_map(base, &patch_map, scope)?)))
            }
            // Lists nested directly in lists (or at the root) have no field name to look up a
            // merge key for
            Value::Array(items) => Ok(Some(Value::Array(self.replace_list(items, scope)?))),
            scalar => Ok(Some(scalar.clone())),
        }
    }

    /// A `base` that is missing or not a map is treated like an empty map.
    fn merge_map(
        &self,
        base: Option<Value>,
        patch: &PatchMap<'_>,
        scope: &Scope<'_>,
    ) -> Result<Map<String, Value>> {
        let mut merged = match base {
            Some(Value::Object(base)) => base,
            _ => Map::new(),
        };

        for (key, value) in &patch.fields {
            let field_scope = scope.field(key);
            let current = merged.remove(*key);

            let merged_value = match value {
                Value::Array(items) => Some(Value::Array(self.merge_list(
                    key,
                    current,
                    items,
                    patch.directive,
                    &field_scope,
                )?)),
                _ => self.merge_value(current, value, &field_scope)?,
            };

            if let Some(merged_value) = merged_value {
                merged.insert((*key).to_owned(), merged_value);
            }
        }

        Ok(merged)
    }

    fn merge_list(
        &self,
        field: &str,
        base: Option<Value>,
        patch: &[Value],
        parent_directive: Directive,
        scope: &Scope<'_>,
    ) -> Result<Vec<Value>> {
        if parent_directive == Directive::Replace {
            return self.replace_list(patch, scope);
        }

        let Some(merge_key) = self.merge_keys.get(field) else {
            return self.replace_list(patch, scope);
        };

        let Some(elements) = keyed_elements(merge_key, patch, scope)? else {
            debug!(
                field = %field,
                path = %scope.path(),
                "patch list contains elements without merge key, replacing the whole list"
            );
            return self.replace_list(patch, scope);
        };

        let mut base_items: Vec<Option<Value>> = match base {
            Some(Value::Array(items)) => items.into_iter().map(Some).collect(),
            _ => Vec::new(),
        };
        let mut appended: Vec<Option<Value>> = Vec::new();

        for element in elements {
            let element_scope = scope.index(element.index);

            match element.patch.directive {
                Directive::Delete => {
                    for slot in base_items.iter_mut().chain(appended.iter_mut()) {
                        if matches_identity(Option::as_ref(slot), merge_key, &element.identity) {
                            *slot = None;
                        }
                    }
                }
                Directive::Replace => {
                    let replacement =
                        Value::Object(self.merge_map(None, &element.patch, &element_scope)?);
                    match find_slot(&mut base_items, &mut appended, merge_key, &element.identity)
                    {
                        Some(slot) => *slot = Some(replacement),
                        None => appended.push(Some(replacement)),
                    }
                }
                Directive::Merge => {
                    match find_slot(&mut base_items, &mut appended, merge_key, &element.identity)
                    {
                        Some(slot) => {
                            let current = slot.take();
                            *slot = Some(Value::Object(self.merge_map(
                                current,
                                &element.patch,
                                &element_scope,
                            )?));
                        }
                        None => appended.push(Some(Value::Object(self.merge_map(
                            None,
                            &element.patch,
                            &element_scope,
                        )?))),
                    }
                }
            }
        }

        Ok(base_items.into_iter().chain(appended).flatten().collect())
    }

    /// Resolves a patch list without a base list to merge with.
    ///
    /// Elements marked for deletion are dropped, as there is nothing to delete them from.
    fn replace_list(&self, patch: &[Value], scope: &Scope<'_>) -> Result<Vec<Value>> {
        let mut replaced = Vec::with_capacity(patch.len());

        for (index, item) in patch.iter().enumerate() {
            let item_scope = scope.index(index);

            match item {
                Value::Object(item) => {
                    let element = PatchMap::parse(item, &item_scope)?;
                    if element.directive == Directive::Delete {
                        continue;
                    }
                    replaced.push(Value::Object(self.merge_map(None, &element, &item_scope)?));
                }
                Value::Array(nested) => {
                    replaced.push(Value::Array(self.replace_list(nested, &item_scope)?));
                }
                // null is a regular list item, it only deletes map fields
                other => replaced.push(other.clone()),
            }
        }

        Ok(replaced)
    }
}

/// Parses all patch list elements, returns [`None`] if any of them has no identity.
fn keyed_elements<'a>(
    merge_key: &MergeKey,
    patch: &'a [Value],
    scope: &Scope<'_>,
) -> Result<Option<Vec<KeyedElement<'a>>>> {
    let mut elements = Vec::with_capacity(patch.len());

    for (index, item) in patch.iter().enumerate() {
        let Value::Object(item) = item else {
            return Ok(None);
        };

        let element = PatchMap::parse(item, &scope.index(index))?;
        let Some(identity) = merge_key.identity(|field| element.get(field)) else {
            return Ok(None);
        };

        elements.push(KeyedElement {
            index,
            identity,
            patch: element,
        });
    }

    Ok(Some(elements))
}

fn matches_identity(item: Option<&Value>, merge_key: &MergeKey, identity: &Identity<'_>) -> bool {
    item.and_then(Value::as_object)
        .and_then(|map| merge_key.identity(|field| map.get(field)))
        .is_some_and(|candidate| candidate == *identity)
}

/// Finds the slot of the first element matching `identity`, preferring generated elements over
/// the ones appended by the current patch.
fn find_slot<'s>(
    base_items: &'s mut [Option<Value>],
    appended: &'s mut [Option<Value>],
    merge_key: &MergeKey,
    identity: &Identity<'_>,
) -> Option<&'s mut Option<Value>> {
    base_items
        .iter_mut()
        .chain(appended.iter_mut())
        .find(|slot| matches_identity(Option::as_ref(slot), merge_key, identity))
}
