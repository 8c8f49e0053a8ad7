use std::collections::BTreeMap;

use serde_json::Value;

/// The merge keys of the lists in the Kubernetes core and apps APIs, keyed by list field name.
///
/// Based on the `patchMergeKey` markers of the upstream API types. `tolerations` is matched by
/// `key` on top of that, users expect a toleration to be overridable.
const WELL_KNOWN_MERGE_KEYS: &[(&str, &[&str])] = &[
    ("conditions", &["type"]),
    ("containers", &["name"]),
    ("env", &["name"]),
    ("ephemeralContainers", &["name"]),
    ("hostAliases", &["ip"]),
    ("imagePullSecrets", &["name"]),
    ("initContainers", &["name"]),
    // Container ports are keyed by containerPort, Service ports by port
    ("ports", &["containerPort", "port"]),
    ("readinessGates", &["conditionType"]),
    ("resourceClaims", &["name"]),
    ("secrets", &["name"]),
    ("tolerations", &["key"]),
    ("topologySpreadConstraints", &["topologyKey", "whenUnsatisfiable"]),
    ("volumeDevices", &["devicePath"]),
    ("volumeMounts", &["mountPath"]),
    ("volumes", &["name"]),
];

/// The values of the merge key fields of a list element, in the order of [`MergeKey::fields`].
pub(crate) type Identity<'a> = Vec<Option<&'a Value>>;

/// The field(s) identifying an element of a mergeable list.
///
/// Elements are matched by comparing the values of all key fields, a field missing from both
/// elements counts as equal. An element without any of the fields has no identity at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeKey {
    fields: Vec<String>,
}

impl MergeKey {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Computes the identity of a list element, `lookup` resolves a field of the element.
    ///
    /// Returns [`None`] if none of the key fields is set (`null` counts as not set).
    pub(crate) fn identity<'v, F>(&self, lookup: F) -> Option<Identity<'v>>
    where
        F: Fn(&str) -> Option<&'v Value>,
    {
        let identity: Identity<'v> = self
            .fields
            .iter()
            .map(|field| lookup(field).filter(|value| !value.is_null()))
            .collect();

        identity.iter().any(Option::is_some).then_some(identity)
    }
}

impl From<&str> for MergeKey {
    fn from(field: &str) -> Self {
        Self::new([field])
    }
}

impl<const N: usize> From<[&str; N]> for MergeKey {
    fn from(fields: [&str; N]) -> Self {
        Self::new(fields)
    }
}

/// Maps list field names to the [`MergeKey`] used to merge their elements.
///
/// Lists without a registered merge key are always replaced as a whole.
///
/// ```
/// # use kgateway_deployer::strategic_patch::{MergeKey, MergeKeyRegistry};
/// let registry = MergeKeyRegistry::empty().with_merge_key("listeners", "port");
///
/// assert_eq!(registry.get("listeners"), Some(&MergeKey::from("port")));
/// assert_eq!(registry.get("containers"), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeKeyRegistry {
    merge_keys: BTreeMap<String, MergeKey>,
}

impl MergeKeyRegistry {
    /// A registry without any merge keys, every list is replaced.
    pub fn empty() -> Self {
        Self {
            merge_keys: BTreeMap::new(),
        }
    }

    /// A registry containing the merge keys of the well-known Kubernetes lists.
    pub fn kubernetes() -> Self {
        WELL_KNOWN_MERGE_KEYS
            .iter()
            .fold(Self::empty(), |registry, (field, key_fields)| {
                registry.with_merge_key(*field, MergeKey::new(key_fields.iter().copied()))
            })
    }

    /// Registers (or overrides) the merge key of the list field `field`.
    pub fn with_merge_key(
        mut self,
        field: impl Into<String>,
        merge_key: impl Into<MergeKey>,
    ) -> Self {
        self.merge_keys.insert(field.into(), merge_key.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&MergeKey> {
        self.merge_keys.get(field)
    }
}

impl Default for MergeKeyRegistry {
    fn default() -> Self {
        Self::kubernetes()
    }
}
