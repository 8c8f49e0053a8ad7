//! This module contains the [`AgentgatewayParameters`] custom resource.
//!
//! Parameters are attached to a GatewayClass, a Gateway, or both. They tune the objects the
//! deployer renders for a Gateway in two ways: the configs feed into the rendering itself, the
//! overlays are merged onto the rendered objects afterwards.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{Snafu, ensure};

use crate::{overlay::ResourceKind, utils::crds::raw_object_schema};

/// The API group of [`AgentgatewayParameters`].
pub const AGENTGATEWAY_GROUP: &str = "agentgateway.dev";

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ValidationError {
    #[snafu(display("logging.level and logging.levels are mutually exclusive"))]
    ConflictingLogLevels,
}

/// Customizes the objects deployed for a Gateway running agentgateway.
///
/// Read the [overlay documentation](DOCS_BASE_URL_PLACEHOLDER/agentgateway/overlays) for more
/// information.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "agentgateway.dev",
    version = "v1alpha1",
    kind = "AgentgatewayParameters",
    plural = "agentgatewayparameters",
    shortname = "agpar",
    category = "kgateway",
    namespaced,
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct AgentgatewayParametersSpec {
    #[serde(flatten)]
    pub configs: AgentgatewayParametersConfigs,

    #[serde(flatten)]
    pub overlays: AgentgatewayParametersOverlays,
}

impl AgentgatewayParametersSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(logging) = &self.configs.logging {
            ensure!(
                logging.level.is_none() || logging.levels.is_empty(),
                ConflictingLogLevelsSnafu
            );
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentgatewayParametersConfigs {
    /// Common set of labels to apply to all generated resources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Common set of annotations to apply to all generated resources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Logging configuration of agentgateway. All logs default to the `info` level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<AgentgatewayParametersLogging>,

    /// The agentgateway container image. See
    /// <https://kubernetes.io/docs/concepts/containers/images> for details.
    ///
    /// Every part of the image can be overridden individually, unset parts keep their defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Environment variables of the agentgateway container.
    ///
    /// A variable replaces a generated variable of the same name. To remove a variable entirely
    /// use `$patch: delete` in the deployment overlay instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// The compute resources required by the agentgateway container. See
    /// <https://kubernetes.io/docs/concepts/configuration/manage-resources-containers/> for
    /// details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Raw agentgateway configuration, merged into the generated configuration file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub raw_config: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentgatewayParametersLogging {
    /// The log level of every component, for example `debug`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per component log levels, for example `rmcp=warn`. Can't be combined with `level`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<LoggingFormat>,
}

#[derive(
    Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize, strum::Display,
)]
pub enum LoggingFormat {
    Json,
    Plain,
}

/// A container image. See <https://kubernetes.io/docs/concepts/containers/images> for details.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// The image registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// The image repository (name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// The image tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// The hash digest of the image, e.g. `sha256:12345...`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// The image pull policy of the container. See
    /// <https://kubernetes.io/docs/concepts/containers/images/#image-pull-policy> for details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentgatewayParametersOverlays {
    /// Overrides for the generated Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<KubernetesResourceOverlay>,

    /// Overrides for the generated Service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<KubernetesResourceOverlay>,

    /// Overrides for the generated ServiceAccount.
    ///
    /// A ServiceAccount has no spec, the overlay spec is merged onto the top-level fields (like
    /// `imagePullSecrets`) instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<KubernetesResourceOverlay>,

    /// Overrides for the generated PodDisruptionBudget, if one is generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<KubernetesResourceOverlay>,

    /// Overrides for the generated HorizontalPodAutoscaler, if one is generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_pod_autoscaler: Option<KubernetesResourceOverlay>,
}

impl AgentgatewayParametersOverlays {
    /// Returns the declared overlays in the order they are applied.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &KubernetesResourceOverlay)> {
        [
            (ResourceKind::Deployment, &self.deployment),
            (ResourceKind::Service, &self.service),
            (ResourceKind::ServiceAccount, &self.service_account),
            (ResourceKind::PodDisruptionBudget, &self.pod_disruption_budget),
            (
                ResourceKind::HorizontalPodAutoscaler,
                &self.horizontal_pod_autoscaler,
            ),
        ]
        .into_iter()
        .filter_map(|(kind, overlay)| overlay.as_ref().map(|overlay| (kind, overlay)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Customizes a generated Kubernetes object using
/// [strategic merge patch](https://github.com/kubernetes/community/blob/master/contributors/devel/sig-api-machinery/strategic-merge-patch.md)
/// semantics.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesResourceOverlay {
    /// Labels and annotations added to the object, replacing generated values with the same key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMetadata>,

    /// A complete or partial spec of the object (e.g. a DeploymentSpec or ServiceSpec), merged
    /// onto the generated spec after everything else has been applied.
    ///
    /// - Scalars overwrite the generated value.
    /// - Lists with a merge key (like `containers`, merged on `name`) are merged element by
    ///   element, new elements are appended. All other lists are replaced.
    /// - A list element with `$patch: delete` removes the matching generated element:
    ///
    ///   ```yaml
    ///   template:
    ///     spec:
    ///       containers:
    ///         - name: unwanted-sidecar
    ///           $patch: delete
    ///   ```
    ///
    /// - A field set to `null` is removed, for example `nodeSelector: null`.
    /// - `$patch: replace` on a map makes its lists replace the generated lists verbatim:
    ///
    ///   ```yaml
    ///   template:
    ///     spec:
    ///       $patch: replace
    ///       containers:
    ///         - name: my-only-container
    ///           image: alpine
    ///   ```
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "raw_object_schema")]
    pub spec: Option<Value>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// More info: <https://kubernetes.io/docs/concepts/overview/working-with-objects/labels>
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// More info: <https://kubernetes.io/docs/concepts/overview/working-with-objects/annotations>
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}
