//! Applies the overlays declared in [`AgentgatewayParameters`](crate::crd::AgentgatewayParameters)
//! to the rendered Gateway objects.
//!
//! Overlays are applied in a fixed order: Deployment, Service, ServiceAccount,
//! PodDisruptionBudget and HorizontalPodAutoscaler. Every object of the overlay's kind is
//! patched, objects of other kinds are passed through untouched. An overlay without a matching
//! object is skipped silently, this commonly happens for the PodDisruptionBudget and
//! HorizontalPodAutoscaler, which are not rendered by default.
use serde_json::Value;
use snafu::Snafu;
use tracing::{debug, trace};

use crate::{
    crd::{AgentgatewayParametersOverlays, KubernetesResourceOverlay},
    strategic_patch::{self, StrategicMerge},
};

mod object;

pub use object::{RenderedObject, ResourceKind};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("the spec of the {kind} overlay must be an object"))]
    FragmentNotAnObject { kind: ResourceKind },

    #[snafu(display("failed to parse rendered {kind} {name:?}"))]
    ParseObject {
        source: kube::core::dynamic::ParseDynamicObjectError,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to encode the spec of {kind} {name:?} as JSON"))]
    EncodeSpec {
        source: serde_json::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to merge the {kind} overlay onto {name:?}"))]
    MergeSpec {
        source: strategic_patch::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("the {kind} overlay produced an invalid spec for {name:?}"))]
    DecodeSpec {
        source: serde_json::Error,
        kind: ResourceKind,
        name: String,
    },
}

/// Applies a set of overlays to rendered objects.
///
/// ```
/// # use kgateway_deployer::{
/// #     crd::AgentgatewayParametersOverlays,
/// #     overlay::{OverlayApplier, RenderedObject},
/// # };
/// let overlays = AgentgatewayParametersOverlays::default();
/// let mut objects: Vec<RenderedObject> = Vec::new();
///
/// OverlayApplier::new(&overlays).apply_overlays(&mut objects).unwrap();
/// ```
pub struct OverlayApplier<'a> {
    overlays: &'a AgentgatewayParametersOverlays,
    engine: StrategicMerge,
}

impl<'a> OverlayApplier<'a> {
    /// Creates an applier merging with the well-known Kubernetes merge keys.
    pub fn new(overlays: &'a AgentgatewayParametersOverlays) -> Self {
        Self::with_engine(overlays, StrategicMerge::default())
    }

    pub fn with_engine(
        overlays: &'a AgentgatewayParametersOverlays,
        engine: StrategicMerge,
    ) -> Self {
        Self { overlays, engine }
    }

    /// Applies every declared overlay to `objects` in place.
    ///
    /// Fails on the first object that can't be patched. That object is left as it was, objects
    /// patched before the failure keep their changes.
    pub fn apply_overlays(&self, objects: &mut [RenderedObject]) -> Result<()> {
        for (kind, overlay) in self.overlays.iter() {
            self.apply_overlay(kind, overlay, objects)?;
        }

        Ok(())
    }

    fn apply_overlay(
        &self,
        kind: ResourceKind,
        overlay: &KubernetesResourceOverlay,
        objects: &mut [RenderedObject],
    ) -> Result<()> {
        let spec_patch = spec_patch(kind, overlay)?;
        let mut matched = false;

        for object in objects.iter_mut().filter(|object| object.kind() == Some(kind)) {
            matched = true;
            debug!(%kind, name = %object.name(), "applying overlay");

            // Work on a copy, so that a failing merge leaves the object untouched
            let mut patched = object.clone();
            if let Some(metadata) = &overlay.metadata {
                patched.merge_metadata(metadata);
            }
            if let Some(spec_patch) = spec_patch {
                patched.merge_spec(&self.engine, spec_patch)?;
            }

            *object = patched;
        }

        if !matched {
            trace!(%kind, "no rendered object matches the overlay, skipping");
        }

        Ok(())
    }
}

/// Returns the spec patch of `overlay`, a missing or `null` spec means there is nothing to merge.
fn spec_patch(kind: ResourceKind, overlay: &KubernetesResourceOverlay) -> Result<Option<&Value>> {
    match &overlay.spec {
        None | Some(Value::Null) => Ok(None),
        Some(spec @ Value::Object(_)) => Ok(Some(spec)),
        Some(_) => FragmentNotAnObjectSnafu { kind }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use k8s_openapi::{
        api::{
            apps::v1::Deployment, core::v1::ServiceAccount,
            policy::v1::PodDisruptionBudget,
        },
        apimachinery::pkg::util::intstr::IntOrString,
    };
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::crd::ObjectMetadata;

    const DEPLOYMENT: &str = indoc! {"
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: gw
          labels:
            app.kubernetes.io/name: gw
        spec:
          replicas: 1
          selector:
            matchLabels:
              app.kubernetes.io/name: gw
          template:
            metadata:
              labels:
                app.kubernetes.io/name: gw
            spec:
              containers:
                - name: agentgateway
                  image: cr.agentgateway.dev/agentgateway:1.0.0
                  env:
                    - name: RUST_LOG
                      value: info
                - name: sidecar
                  image: sidecar:1
    "};

    const SERVICE: &str = indoc! {"
        apiVersion: v1
        kind: Service
        metadata:
          name: gw
        spec:
          type: LoadBalancer
          ports:
            - name: http
              port: 80
              targetPort: 8080
    "};

    const SERVICE_ACCOUNT: &str = indoc! {"
        apiVersion: v1
        kind: ServiceAccount
        metadata:
          name: gw
    "};

    const CONFIG_MAP: &str = indoc! {"
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: gw
        data:
          config.yaml: '{}'
    "};

    fn objects(documents: &[&str]) -> Vec<RenderedObject> {
        documents
            .iter()
            .map(|document| serde_yaml::from_str(document).expect("test object is valid"))
            .collect()
    }

    fn overlays(yaml: &str) -> AgentgatewayParametersOverlays {
        serde_yaml::from_str(yaml).expect("test overlays are valid")
    }

    fn deployment(object: &RenderedObject) -> &Deployment {
        match object {
            RenderedObject::Deployment(deployment) => deployment,
            other => panic!("expected a Deployment, got {other:?}"),
        }
    }

    #[test]
    fn deployment_labels_and_replicas_applied() {
        let mut objects = objects(&[DEPLOYMENT, SERVICE]);
        let overlays = overlays(indoc! {"
            deployment:
              metadata:
                labels:
                  team: networking
              spec:
                replicas: 3
        "});
        let service_before = objects[1].clone();

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let deployment = deployment(&objects[0]);
        let labels = deployment.metadata.labels.as_ref().expect("labels are set");
        assert_eq!(labels["team"], "networking");
        assert_eq!(labels["app.kubernetes.io/name"], "gw");

        let spec = deployment.spec.as_ref().expect("spec is set");
        assert_eq!(spec.replicas, Some(3));
        let containers = &spec
            .template
            .spec
            .as_ref()
            .expect("pod spec is set")
            .containers;
        assert_eq!(containers.len(), 2);
        assert_eq!(
            containers[0].image.as_deref(),
            Some("cr.agentgateway.dev/agentgateway:1.0.0")
        );

        assert_eq!(objects[1], service_before);
    }

    #[rstest]
    #[case::service_missing(&[DEPLOYMENT], indoc! {"
        service:
          metadata:
            labels:
              team: payments
          spec:
            type: LoadBalancer
    "})]
    #[case::pdb_and_hpa_missing(&[DEPLOYMENT, SERVICE], indoc! {"
        podDisruptionBudget:
          spec:
            minAvailable: 1
        horizontalPodAutoscaler:
          spec:
            maxReplicas: 5
    "})]
    fn overlay_without_matching_object_skipped(
        #[case] rendered: &[&str],
        #[case] declared: &str,
    ) {
        let mut objects = objects(rendered);
        let before = objects.clone();
        let overlays = overlays(declared);

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("missing objects are not an error");

        assert_eq!(objects, before);
    }

    #[test]
    fn container_deleted_and_env_merged() {
        let mut objects = objects(&[DEPLOYMENT]);
        let overlays = overlays(indoc! {"
            deployment:
              spec:
                template:
                  spec:
                    containers:
                      - name: sidecar
                        $patch: delete
                      - name: agentgateway
                        env:
                          - name: RUST_LOG
                            value: debug
                          - name: EXTRA
                            value: '1'
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let containers = &deployment(&objects[0])
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .expect("pod spec is set")
            .containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "agentgateway");

        let env: Vec<(&str, Option<&str>)> = containers[0]
            .env
            .iter()
            .flatten()
            .map(|var| (var.name.as_str(), var.value.as_deref()))
            .collect();
        assert_eq!(env, vec![("RUST_LOG", Some("debug")), ("EXTRA", Some("1"))]);
    }

    #[test]
    fn service_ports_merged_by_port() {
        let mut objects = objects(&[SERVICE]);
        let overlays = overlays(indoc! {"
            service:
              metadata:
                annotations:
                  service.beta.kubernetes.io/aws-load-balancer-type: nlb
              spec:
                type: ClusterIP
                ports:
                  - port: 80
                    name: web
                  - port: 443
                    name: https
                    targetPort: 8443
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let RenderedObject::Service(service) = &objects[0] else {
            panic!("expected a Service");
        };
        let spec = service.spec.as_ref().expect("spec is set");
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));

        let ports = spec.ports.as_ref().expect("ports are set");
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name.as_deref(), Some("web"));
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));
        assert_eq!(ports[1].port, 443);

        assert_eq!(
            service.metadata.annotations.as_ref().expect("annotations are set")
                ["service.beta.kubernetes.io/aws-load-balancer-type"],
            "nlb"
        );
    }

    #[test]
    fn service_account_body_merged() {
        let mut objects = objects(&[SERVICE_ACCOUNT]);
        let overlays = overlays(indoc! {"
            serviceAccount:
              metadata:
                annotations:
                  eks.amazonaws.com/role-arn: arn:aws:iam::123456789012:role/gw
              spec:
                automountServiceAccountToken: false
                imagePullSecrets:
                  - name: registry
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let RenderedObject::ServiceAccount(ServiceAccount {
            metadata,
            automount_service_account_token,
            image_pull_secrets,
            ..
        }) = &objects[0]
        else {
            panic!("expected a ServiceAccount");
        };
        assert_eq!(metadata.name.as_deref(), Some("gw"));
        assert_eq!(
            metadata.annotations.as_ref().expect("annotations are set")
                ["eks.amazonaws.com/role-arn"],
            "arn:aws:iam::123456789012:role/gw"
        );
        assert_eq!(*automount_service_account_token, Some(false));
        assert_eq!(
            image_pull_secrets
                .iter()
                .flatten()
                .map(|secret| secret.name.as_str())
                .collect::<Vec<_>>(),
            vec!["registry"]
        );
    }

    #[test]
    fn service_account_metadata_not_patchable_through_spec() {
        let mut objects = objects(&[SERVICE_ACCOUNT]);
        let overlays = overlays(indoc! {"
            serviceAccount:
              spec:
                metadata:
                  name: hijacked
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        assert_eq!(objects[0].name(), "gw");
    }

    #[test]
    fn pod_disruption_budget_patched() {
        let mut objects = objects(&[indoc! {"
            apiVersion: policy/v1
            kind: PodDisruptionBudget
            metadata:
              name: gw
            spec:
              minAvailable: 1
        "}]);
        let overlays = overlays(indoc! {"
            podDisruptionBudget:
              spec:
                minAvailable: null
                maxUnavailable: 50%
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let RenderedObject::PodDisruptionBudget(PodDisruptionBudget {
            spec: Some(spec), ..
        }) = &objects[0]
        else {
            panic!("expected a PodDisruptionBudget with spec");
        };
        assert_eq!(spec.min_available, None);
        assert_eq!(
            spec.max_unavailable,
            Some(IntOrString::String("50%".to_owned()))
        );
    }

    #[test]
    fn horizontal_pod_autoscaler_patched() {
        let mut objects = objects(&[indoc! {"
            apiVersion: autoscaling/v2
            kind: HorizontalPodAutoscaler
            metadata:
              name: gw
            spec:
              minReplicas: 1
              maxReplicas: 3
              scaleTargetRef:
                apiVersion: apps/v1
                kind: Deployment
                name: gw
        "}]);
        let overlays = overlays(indoc! {"
            horizontalPodAutoscaler:
              spec:
                maxReplicas: 10
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let RenderedObject::HorizontalPodAutoscaler(hpa) = &objects[0] else {
            panic!("expected a HorizontalPodAutoscaler");
        };
        let spec = hpa.spec.as_ref().expect("spec is set");
        assert_eq!(spec.max_replicas, 10);
        assert_eq!(spec.min_replicas, Some(1));
        assert_eq!(spec.scale_target_ref.name, "gw");
    }

    #[test]
    fn pass_through_objects_untouched() {
        let mut objects = objects(&[CONFIG_MAP, DEPLOYMENT]);
        let config_map = objects[0].clone();
        let overlays = overlays(indoc! {"
            deployment:
              metadata:
                labels:
                  team: networking
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        assert_eq!(objects[0], config_map);
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn null_spec_treated_as_absent() {
        let mut objects = objects(&[DEPLOYMENT]);
        let overlays = AgentgatewayParametersOverlays {
            deployment: Some(KubernetesResourceOverlay {
                metadata: Some(ObjectMetadata {
                    labels: [("team".to_owned(), "networking".to_owned())].into(),
                    ..ObjectMetadata::default()
                }),
                spec: Some(Value::Null),
            }),
            ..AgentgatewayParametersOverlays::default()
        };

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        let deployment = deployment(&objects[0]);
        assert_eq!(
            deployment.metadata.labels.as_ref().expect("labels are set")["team"],
            "networking"
        );
        assert_eq!(
            deployment.spec.as_ref().and_then(|spec| spec.replicas),
            Some(1)
        );
    }

    #[test]
    fn non_object_spec_rejected() {
        let mut objects = objects(&[DEPLOYMENT]);
        let overlays = AgentgatewayParametersOverlays {
            deployment: Some(KubernetesResourceOverlay {
                metadata: None,
                spec: Some(json!(["replicas", 3])),
            }),
            ..AgentgatewayParametersOverlays::default()
        };

        let error = OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect_err("spec must be an object");
        assert!(
            matches!(
                error,
                Error::FragmentNotAnObject {
                    kind: ResourceKind::Deployment
                }
            ),
            "{error:?}"
        );
    }

    #[test]
    fn failed_merge_leaves_object_untouched_and_stops() {
        let mut objects = objects(&[DEPLOYMENT, SERVICE]);
        let before = objects.clone();
        let overlays = overlays(indoc! {"
            deployment:
              metadata:
                labels:
                  team: networking
              spec:
                replicas: 3
                template:
                  spec:
                    containers: not-a-list
            service:
              spec:
                type: ClusterIP
        "});

        let error = OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect_err("containers must be a list");

        assert!(
            matches!(
                &error,
                Error::DecodeSpec {
                    kind: ResourceKind::Deployment,
                    name,
                    ..
                } if name == "gw"
            ),
            "{error:?}"
        );
        // Neither the failing Deployment nor the Service (overlaid later) changed
        assert_eq!(objects, before);
    }

    #[test]
    fn invalid_directive_reported_with_object() {
        let mut objects = objects(&[DEPLOYMENT]);
        let overlays = overlays(indoc! {"
            deployment:
              spec:
                template:
                  spec:
                    containers:
                      - name: sidecar
                        $patch: remove
        "});

        let error = OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect_err("directive is invalid");

        assert!(
            matches!(
                &error,
                Error::MergeSpec {
                    source: strategic_patch::Error::InvalidDirective { .. },
                    ..
                }
            ),
            "{error:?}"
        );
    }

    #[test]
    fn every_matching_object_patched() {
        let mut objects = objects(&[SERVICE, SERVICE]);
        let overlays = overlays(indoc! {"
            service:
              spec:
                externalTrafficPolicy: Local
        "});

        OverlayApplier::new(&overlays)
            .apply_overlays(&mut objects)
            .expect("overlay applies");

        for object in &objects {
            let RenderedObject::Service(service) = object else {
                panic!("expected a Service");
            };
            assert_eq!(
                service
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.external_traffic_policy.as_deref()),
                Some("Local")
            );
        }
    }
}
