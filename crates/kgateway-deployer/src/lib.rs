//! Post-processing of the Kubernetes objects rendered for a Gateway.
//!
//! The deployer renders a Deployment, Service, ServiceAccount and friends for every Gateway. Users
//! customize the result with `AgentgatewayParameters`, either by setting common configuration
//! (image, resources, env, ...) that feeds into the rendering, or by declaring overlays that are
//! merged onto the rendered objects afterwards using strategic merge patch semantics.
//!
//! - [`strategic_patch`] contains the merge engine operating on plain JSON documents.
//! - [`overlay`] applies declared overlays to a list of rendered objects.
//! - [`crd`] defines the `AgentgatewayParameters` custom resource.
//! - [`parameters`] resolves and applies parameters in their order of precedence.

pub mod crd;
pub mod helm;
pub mod logging;
pub mod overlay;
pub mod parameters;
pub mod strategic_patch;
pub mod utils;

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use schemars;
// Internal re-exports
pub use kgateway_shared as shared;
pub use kgateway_shared::crd::DocsVersion;
