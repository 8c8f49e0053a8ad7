//! Resolves the [`AgentgatewayParameters`] of a Gateway and applies them.
//!
//! Parameters can be referenced by the GatewayClass and by the Gateway itself. Both are applied,
//! the class-level parameters first and the Gateway-level parameters on top, so that a Gateway
//! can override what its class configures.
use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use tracing::debug;

use crate::{
    crd::{AGENTGATEWAY_GROUP, AgentgatewayParameters, AgentgatewayParametersLogging},
    helm::{HelmConfig, HelmImage},
    overlay::{self, OverlayApplier, RenderedObject},
};

pub const AGENTGATEWAY_PARAMETERS_KIND: &str = "AgentgatewayParameters";

/// The environment variable configuring the agentgateway log filter.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to apply the overlays of AgentgatewayParameters {parameters}"))]
    ApplyOverlays {
        source: overlay::Error,
        parameters: String,
    },

    #[snafu(display("AgentgatewayParameters {namespace}/{name} not found for {referrer}"))]
    ParametersNotFound {
        name: String,
        namespace: String,
        referrer: String,
    },

    #[snafu(display(
        "{referrer} references parameters of unsupported type group={group:?} kind={kind:?}, use {AGENTGATEWAY_PARAMETERS_KIND} instead"
    ))]
    UnsupportedParametersRef {
        group: String,
        kind: String,
        referrer: String,
    },
}

/// A reference to a parameters object, as found on a GatewayClass or a Gateway.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParametersRef {
    pub group: String,
    pub kind: String,
    pub name: String,

    /// Only honored on GatewayClass references, Gateways always look up their own namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ParametersRef {
    /// A reference to the [`AgentgatewayParameters`] called `name`.
    pub fn agentgateway(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            group: AGENTGATEWAY_GROUP.to_owned(),
            kind: AGENTGATEWAY_PARAMETERS_KIND.to_owned(),
            name: name.into(),
            namespace: namespace.map(ToOwned::to_owned),
        }
    }

    fn ensure_agentgateway(&self, referrer: &str) -> Result<()> {
        ensure!(
            self.group == AGENTGATEWAY_GROUP && self.kind == AGENTGATEWAY_PARAMETERS_KIND,
            UnsupportedParametersRefSnafu {
                group: &self.group,
                kind: &self.kind,
                referrer,
            }
        );
        Ok(())
    }
}

/// Looks up [`AgentgatewayParameters`] by name and namespace.
///
/// Cluster-scoped lookups (for GatewayClasses without a namespace) use an empty namespace.
pub trait ParametersLookup {
    fn get(&self, name: &str, namespace: &str) -> Option<&AgentgatewayParameters>;
}

impl ParametersLookup for [AgentgatewayParameters] {
    fn get(&self, name: &str, namespace: &str) -> Option<&AgentgatewayParameters> {
        self.iter().find(|parameters| {
            parameters.metadata.name.as_deref() == Some(name)
                && parameters.metadata.namespace.as_deref().unwrap_or_default() == namespace
        })
    }
}

/// The parts of a GatewayClass needed to resolve its parameters.
#[derive(Clone, Copy, Debug)]
pub struct GatewayClassRef<'a> {
    pub name: &'a str,
    pub parameters_ref: Option<&'a ParametersRef>,
}

/// The parts of a Gateway (its `infrastructure.parametersRef`) needed to resolve its parameters.
#[derive(Clone, Copy, Debug)]
pub struct GatewayRef<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub parameters_ref: Option<&'a ParametersRef>,
}

/// Resolves the class-level and Gateway-level parameters of a Gateway.
///
/// A missing GatewayClass is not an error, the Gateway simply has no class-level parameters.
/// References to anything but [`AgentgatewayParameters`] and dangling references are.
pub fn resolve_parameters<'a, L>(
    lookup: &'a L,
    gateway_class: Option<&GatewayClassRef<'_>>,
    gateway: &GatewayRef<'_>,
) -> Result<ResolvedParameters<'a>>
where
    L: ParametersLookup + ?Sized,
{
    let mut resolved = ResolvedParameters::default();

    if let Some(GatewayClassRef {
        name: class_name,
        parameters_ref: Some(parameters_ref),
    }) = gateway_class
    {
        let referrer = format!("GatewayClass {class_name}");
        parameters_ref.ensure_agentgateway(&referrer)?;

        let namespace = parameters_ref.namespace.as_deref().unwrap_or_default();
        let parameters = lookup.get(&parameters_ref.name, namespace).context(
            ParametersNotFoundSnafu {
                name: &parameters_ref.name,
                namespace,
                referrer,
            },
        )?;
        debug!(
            gateway_class = %class_name,
            parameters.name = %parameters_ref.name,
            parameters.namespace = namespace,
            "found AgentgatewayParameters for GatewayClass"
        );
        resolved.gateway_class = Some(parameters);
    }

    if let Some(parameters_ref) = gateway.parameters_ref {
        let referrer = format!("Gateway {}/{}", gateway.namespace, gateway.name);
        parameters_ref.ensure_agentgateway(&referrer)?;

        // Gateway-level parameters must live next to the Gateway
        let parameters = lookup
            .get(&parameters_ref.name, gateway.namespace)
            .context(ParametersNotFoundSnafu {
                name: &parameters_ref.name,
                namespace: gateway.namespace,
                referrer,
            })?;
        debug!(
            gateway.name = gateway.name,
            gateway.namespace = gateway.namespace,
            parameters.name = %parameters_ref.name,
            "found AgentgatewayParameters for Gateway"
        );
        resolved.gateway = Some(parameters);
    }

    Ok(resolved)
}

/// The parameters that apply to a single Gateway.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResolvedParameters<'a> {
    pub gateway_class: Option<&'a AgentgatewayParameters>,
    pub gateway: Option<&'a AgentgatewayParameters>,
}

impl<'a> ResolvedParameters<'a> {
    pub fn new(
        gateway_class: Option<&'a AgentgatewayParameters>,
        gateway: Option<&'a AgentgatewayParameters>,
    ) -> Self {
        Self {
            gateway_class,
            gateway,
        }
    }

    /// Class-level first, so that Gateway-level parameters win.
    fn in_order(&self) -> impl Iterator<Item = &'a AgentgatewayParameters> {
        self.gateway_class.into_iter().chain(self.gateway)
    }

    pub fn apply_to_helm_values(&self, values: &mut HelmConfig) {
        for parameters in self.in_order() {
            ParametersApplier::new(Some(parameters)).apply_to_helm_values(values);
        }
    }

    /// Applies the overlays of all resolved parameters to the rendered objects.
    pub fn post_process_objects(&self, objects: &mut [RenderedObject]) -> Result<()> {
        for parameters in self.in_order() {
            ParametersApplier::new(Some(parameters)).apply_overlays_to_objects(objects)?;
        }

        Ok(())
    }
}

/// Applies a single [`AgentgatewayParameters`], or nothing at all if there is none.
pub struct ParametersApplier<'a> {
    parameters: Option<&'a AgentgatewayParameters>,
}

impl<'a> ParametersApplier<'a> {
    pub fn new(parameters: Option<&'a AgentgatewayParameters>) -> Self {
        Self { parameters }
    }

    /// Applies the configs to the chart values, before the chart is rendered.
    ///
    /// Every set field overrides the corresponding value. Environment variables are applied last,
    /// so that an explicit `RUST_LOG` wins over the one derived from `logging`.
    pub fn apply_to_helm_values(&self, values: &mut HelmConfig) {
        let (Some(parameters), Some(gateway)) = (self.parameters, values.gateway.as_mut()) else {
            return;
        };
        let configs = &parameters.spec.configs;
        debug!(
            parameters = %parameters.name_any(),
            "applying AgentgatewayParameters to helm values"
        );

        if let Some(image) = &configs.image {
            let target = gateway.image.get_or_insert_with(HelmImage::default);
            set_if_some(&mut target.registry, image.registry.as_ref());
            set_if_some(&mut target.repository, image.repository.as_ref());
            set_if_some(&mut target.tag, image.tag.as_ref());
            set_if_some(&mut target.digest, image.digest.as_ref());
            set_if_some(&mut target.pull_policy, image.pull_policy.as_ref());
        }
        set_if_some(&mut gateway.resources, configs.resources.as_ref());

        if let Some(Value::Object(raw_config)) = &configs.raw_config {
            gateway.raw_config = Some(raw_config.clone());
        }

        gateway.extra_pod_labels.extend(configs.labels.clone());
        gateway
            .extra_pod_annotations
            .extend(configs.annotations.clone());

        if let Some(logging) = &configs.logging {
            if let Some(format) = logging.format {
                gateway.log_format = Some(format.to_string());
            }
            if let Some(filter) = log_filter(logging) {
                let log_env = EnvVar {
                    name: LOG_FILTER_ENV.to_owned(),
                    value: Some(filter),
                    ..EnvVar::default()
                };
                gateway.env = merge_env_vars(std::mem::take(&mut gateway.env), &[log_env]);
            }
        }

        gateway.env = merge_env_vars(std::mem::take(&mut gateway.env), &configs.env);
    }

    /// Applies the overlays to the rendered objects, after the chart is rendered.
    pub fn apply_overlays_to_objects(&self, objects: &mut [RenderedObject]) -> Result<()> {
        let Some(parameters) = self.parameters else {
            return Ok(());
        };

        OverlayApplier::new(&parameters.spec.overlays)
            .apply_overlays(objects)
            .with_context(|_| ApplyOverlaysSnafu {
                parameters: format!(
                    "{}/{}",
                    parameters.namespace().unwrap_or_default(),
                    parameters.name_any()
                ),
            })
    }
}

/// Merges two lists of environment variables, variables in `overrides` win by name.
///
/// The result contains the variables of `base` that are not overridden (in their order),
/// followed by all of `overrides`.
pub fn merge_env_vars(base: Vec<EnvVar>, overrides: &[EnvVar]) -> Vec<EnvVar> {
    if overrides.is_empty() {
        return base;
    }

    let overridden: BTreeSet<&str> = overrides.iter().map(|env| env.name.as_str()).collect();
    base.into_iter()
        .filter(|env| !overridden.contains(env.name.as_str()))
        .chain(overrides.iter().cloned())
        .collect()
}

/// The `RUST_LOG` filter described by `logging`, if it sets any level.
fn log_filter(logging: &AgentgatewayParametersLogging) -> Option<String> {
    match (&logging.level, logging.levels.as_slice()) {
        (Some(level), _) => Some(level.clone()),
        (None, []) => None,
        (None, levels) => Some(levels.join(",")),
    }
}

fn set_if_some<T: Clone>(target: &mut Option<T>, value: Option<&T>) {
    if let Some(value) = value {
        *target = Some(value.clone());
    }
}
