use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        autoscaling::v2::HorizontalPodAutoscaler,
        core::v1::{Service, ServiceAccount},
        policy::v1::PodDisruptionBudget,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{Resource, ResourceExt, core::DynamicObject};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use snafu::ResultExt;

use super::{DecodeSpecSnafu, EncodeSpecSnafu, MergeSpecSnafu, ParseObjectSnafu, Result};
use crate::{crd::ObjectMetadata, strategic_patch::StrategicMerge};

/// Fields of a ServiceAccount that are never touched by its overlay spec.
const PRESERVED_SERVICE_ACCOUNT_FIELDS: &[&str] = &["apiVersion", "kind", "metadata"];

/// The kinds of rendered objects that can be customized with an overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ResourceKind {
    Deployment,
    Service,
    ServiceAccount,
    PodDisruptionBudget,
    HorizontalPodAutoscaler,
}

/// A Kubernetes object produced by rendering the Gateway chart.
///
/// Objects of a [`ResourceKind`] are held as their typed representation, everything else is kept
/// as an opaque [`DynamicObject`] and passed through untouched.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RenderedObject {
    Deployment(Deployment),
    Service(Service),
    ServiceAccount(ServiceAccount),
    PodDisruptionBudget(PodDisruptionBudget),
    HorizontalPodAutoscaler(HorizontalPodAutoscaler),
    Other(DynamicObject),
}

impl RenderedObject {
    /// Converts a generic object into its typed representation, based on `apiVersion` and `kind`.
    pub fn from_dynamic(object: DynamicObject) -> Result<Self> {
        let rendered = if is_type::<Deployment>(&object) {
            Self::Deployment(parse(object, ResourceKind::Deployment)?)
        } else if is_type::<Service>(&object) {
            Self::Service(parse(object, ResourceKind::Service)?)
        } else if is_type::<ServiceAccount>(&object) {
            Self::ServiceAccount(parse(object, ResourceKind::ServiceAccount)?)
        } else if is_type::<PodDisruptionBudget>(&object) {
            Self::PodDisruptionBudget(parse(object, ResourceKind::PodDisruptionBudget)?)
        } else if is_type::<HorizontalPodAutoscaler>(&object) {
            Self::HorizontalPodAutoscaler(parse(object, ResourceKind::HorizontalPodAutoscaler)?)
        } else {
            Self::Other(object)
        };

        Ok(rendered)
    }

    /// Returns the overlayable kind of this object, or [`None`] for pass-through objects.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Self::Deployment(_) => Some(ResourceKind::Deployment),
            Self::Service(_) => Some(ResourceKind::Service),
            Self::ServiceAccount(_) => Some(ResourceKind::ServiceAccount),
            Self::PodDisruptionBudget(_) => Some(ResourceKind::PodDisruptionBudget),
            Self::HorizontalPodAutoscaler(_) => Some(ResourceKind::HorizontalPodAutoscaler),
            Self::Other(_) => None,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Deployment(object) => object.meta(),
            Self::Service(object) => object.meta(),
            Self::ServiceAccount(object) => object.meta(),
            Self::PodDisruptionBudget(object) => object.meta(),
            Self::HorizontalPodAutoscaler(object) => object.meta(),
            Self::Other(object) => object.meta(),
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Deployment(object) => object.meta_mut(),
            Self::Service(object) => object.meta_mut(),
            Self::ServiceAccount(object) => object.meta_mut(),
            Self::PodDisruptionBudget(object) => object.meta_mut(),
            Self::HorizontalPodAutoscaler(object) => object.meta_mut(),
            Self::Other(object) => object.meta_mut(),
        }
    }

    pub fn name(&self) -> String {
        self.metadata().name.clone().unwrap_or_default()
    }

    /// Adds the overlay labels and annotations, overlay values win on conflicting keys.
    pub(crate) fn merge_metadata(&mut self, overlay: &ObjectMetadata) {
        let metadata = self.metadata_mut();
        merge_string_map(&mut metadata.labels, &overlay.labels);
        merge_string_map(&mut metadata.annotations, &overlay.annotations);
    }

    /// Merges `patch` onto the spec of this object.
    ///
    /// ServiceAccounts don't have a spec, the patch is merged onto the object body (everything but
    /// `apiVersion`, `kind` and `metadata`) instead. Pass-through objects are left untouched.
    pub(crate) fn merge_spec(&mut self, engine: &StrategicMerge, patch: &Value) -> Result<()> {
        let Some(kind) = self.kind() else {
            return Ok(());
        };
        let name = self.name();
        let merger = SpecMerger {
            engine,
            patch,
            kind,
            name: &name,
        };

        match self {
            Self::Deployment(object) => merger.merge_field(&mut object.spec),
            Self::Service(object) => merger.merge_field(&mut object.spec),
            Self::ServiceAccount(object) => merger.merge_body(object),
            Self::PodDisruptionBudget(object) => merger.merge_field(&mut object.spec),
            Self::HorizontalPodAutoscaler(object) => merger.merge_field(&mut object.spec),
            Self::Other(_) => Ok(()),
        }
    }
}

impl<'de> Deserialize<'de> for RenderedObject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = DynamicObject::deserialize(deserializer)?;
        Self::from_dynamic(object).map_err(serde::de::Error::custom)
    }
}

/// Carries everything needed to merge an overlay spec and to report failures.
struct SpecMerger<'a> {
    engine: &'a StrategicMerge,
    patch: &'a Value,
    kind: ResourceKind,
    name: &'a str,
}

impl SpecMerger<'_> {
    /// Merges the patch onto an optional typed spec, a missing spec is merged like an empty one.
    fn merge_field<S>(&self, spec: &mut Option<S>) -> Result<()>
    where
        S: Serialize + DeserializeOwned,
    {
        let base = serde_json::to_value(&*spec).with_context(|_| EncodeSpecSnafu {
            kind: self.kind,
            name: self.name,
        })?;
        let merged = self.merge(base)?;

        *spec = serde_json::from_value(merged).with_context(|_| DecodeSpecSnafu {
            kind: self.kind,
            name: self.name,
        })?;
        Ok(())
    }

    fn merge_body<K>(&self, object: &mut K) -> Result<()>
    where
        K: Serialize + DeserializeOwned,
    {
        let encoded = serde_json::to_value(&*object).with_context(|_| EncodeSpecSnafu {
            kind: self.kind,
            name: self.name,
        })?;
        let mut body = into_map(encoded);
        let preserved: Vec<(String, Value)> = PRESERVED_SERVICE_ACCOUNT_FIELDS
            .iter()
            .filter_map(|field| body.remove(*field).map(|value| ((*field).to_owned(), value)))
            .collect();

        let mut merged = into_map(self.merge(Value::Object(body))?);
        merged.extend(preserved);

        *object = serde_json::from_value(Value::Object(merged)).with_context(|_| {
            DecodeSpecSnafu {
                kind: self.kind,
                name: self.name,
            }
        })?;
        Ok(())
    }

    fn merge(&self, base: Value) -> Result<Value> {
        self.engine
            .merge(base, self.patch)
            .with_context(|_| MergeSpecSnafu {
                kind: self.kind,
                name: self.name,
            })
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn is_type<K>(object: &DynamicObject) -> bool
where
    K: Resource<DynamicType = ()>,
{
    object.types.as_ref().is_some_and(|types| {
        types.api_version == K::api_version(&()) && types.kind == K::kind(&())
    })
}

fn parse<K>(object: DynamicObject, kind: ResourceKind) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let name = object.name_any();
    object
        .try_parse()
        .with_context(|_| ParseObjectSnafu { kind, name })
}

fn merge_string_map(
    target: &mut Option<BTreeMap<String, String>>,
    overlay: &BTreeMap<String, String>,
) {
    if overlay.is_empty() {
        return;
    }

    target.get_or_insert_with(BTreeMap::new).extend(
        overlay
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
}
