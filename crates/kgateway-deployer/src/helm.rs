//! The values handed to the Gateway chart.
//!
//! Only the values that [`AgentgatewayParameters`](crate::crd::AgentgatewayParameters) can
//! influence are modelled here, rendering the chart is done elsewhere.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

pub const AGENTGATEWAY_REGISTRY: &str = "ghcr.io/agentgateway";
pub const AGENTGATEWAY_IMAGE: &str = "agentgateway";

/// Grace period granted to a terminating gateway pod to drain connections.
const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 60;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to convert helm config into chart values"))]
    SerializeValues { source: serde_json::Error },
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<HelmGateway>,
}

impl HelmConfig {
    /// Returns the default values for the Gateway `namespace/name` of the class `gateway_class`.
    pub fn for_gateway(name: &str, namespace: &str, gateway_class: &str, image_tag: &str) -> Self {
        Self {
            gateway: Some(HelmGateway {
                name: Some(name.to_owned()),
                gateway_name: Some(name.to_owned()),
                gateway_namespace: Some(namespace.to_owned()),
                gateway_class_name: Some(gateway_class.to_owned()),
                image: Some(HelmImage::agentgateway(image_tag)),
                termination_grace_period_seconds: Some(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS),
                ..HelmGateway::default()
            }),
        }
    }

    /// Copies the infrastructure labels and annotations of the Gateway onto the values.
    ///
    /// The chart puts them on every object it renders for the Gateway.
    pub fn with_infrastructure(mut self, infrastructure: &GatewayInfrastructure) -> Self {
        if let Some(gateway) = self.gateway.as_mut() {
            gateway
                .gateway_labels
                .extend(infrastructure.labels.clone());
            gateway
                .gateway_annotations
                .extend(infrastructure.annotations.clone());
        }
        self
    }

    /// Converts the config into the (camelCase) JSON values of the chart.
    pub fn to_values(&self) -> Result<Value, Error> {
        serde_json::to_value(self).context(SerializeValuesSnafu)
    }
}

/// The `spec.infrastructure` of a Gateway, as far as the chart values are concerned.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfrastructure {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmGateway {
    // naming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gateway_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gateway_annotations: BTreeMap<String, String>,

    // pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_pod_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_pod_annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    // agentgateway container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<HelmImage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_config: Option<Map<String, Value>>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

impl HelmImage {
    /// The upstream agentgateway image in version `tag`.
    pub fn agentgateway(tag: &str) -> Self {
        Self {
            registry: Some(AGENTGATEWAY_REGISTRY.to_owned()),
            repository: Some(AGENTGATEWAY_IMAGE.to_owned()),
            tag: Some(tag.to_owned()),
            ..Self::default()
        }
    }
}
