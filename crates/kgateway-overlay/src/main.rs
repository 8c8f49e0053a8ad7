//! Applies AgentgatewayParameters to rendered Gateway objects without a cluster.
//!
//! Useful to preview what an overlay does to the objects of a Gateway, and to debug strategic
//! merge patches in isolation.
use std::{
    fs::File,
    io::{self, Read as _, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use kgateway_deployer::{
    crd::{AgentgatewayParameters, ValidationError},
    helm::{self, GatewayInfrastructure, HelmConfig},
    logging,
    overlay::RenderedObject,
    parameters::{self, ResolvedParameters},
    shared::{crd, yaml},
    strategic_patch::{self, StrategicMerge},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};
use tracing::info;

use crate::cli::{
    ApplyArguments, Cli, Command, CrdArguments, MergeArguments, OutputArguments,
    ParametersArguments, ValuesArguments,
};

mod cli;

const APP_NAME: &str = "kgateway-overlay";
const LOG_ENV: &str = "KGATEWAY_OVERLAY_LOG";

/// Path reading from stdin instead of a file.
const STDIN_PATH: &str = "-";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to read {path:?}"))]
    ReadInput { source: io::Error, path: PathBuf },

    #[snafu(display("failed to parse {path:?}"))]
    ParseInput { source: yaml::Error, path: PathBuf },

    #[snafu(display("expected exactly one document in {path:?}, found {count}"))]
    DocumentCount { path: PathBuf, count: usize },

    #[snafu(display("invalid AgentgatewayParameters in {path:?}"))]
    InvalidParameters {
        source: ValidationError,
        path: PathBuf,
    },

    #[snafu(display("failed to apply AgentgatewayParameters"))]
    ApplyParameters { source: parameters::Error },

    #[snafu(display("failed to merge {patch:?} onto {base:?}"))]
    MergeDocuments {
        source: strategic_patch::Error,
        base: PathBuf,
        patch: PathBuf,
    },

    #[snafu(display("failed to build the chart values"))]
    BuildValues { source: helm::Error },

    #[snafu(display("failed to print the CustomResourceDefinition"))]
    PrintCrd { source: crd::Error },

    #[snafu(display("failed to create output file {path:?}"))]
    CreateOutput { source: io::Error, path: PathBuf },

    #[snafu(display("failed to write output"))]
    WriteOutput { source: yaml::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[snafu::report]
fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME, cli.log_format).context(InitializeLoggingSnafu)?;

    match cli.command {
        Command::Crd(arguments) => print_crd(&arguments),
        Command::Apply(arguments) => apply(&arguments),
        Command::Values(arguments) => values(&arguments),
        Command::Merge(arguments) => merge(&arguments),
    }
}

fn print_crd(arguments: &CrdArguments) -> Result<()> {
    let writer = output_writer(&arguments.output)?;
    crd::write_crd::<AgentgatewayParameters, _>(&arguments.docs_version, writer)
        .context(PrintCrdSnafu)
}

fn apply(arguments: &ApplyArguments) -> Result<()> {
    let mut objects: Vec<RenderedObject> = read_documents(&arguments.objects)?;
    let (class_parameters, gateway_parameters) = read_parameters(&arguments.parameters)?;

    ResolvedParameters::new(class_parameters.as_ref(), gateway_parameters.as_ref())
        .post_process_objects(&mut objects)
        .context(ApplyParametersSnafu)?;
    info!(objects = objects.len(), "applied overlays to rendered objects");

    write_documents(&objects, &arguments.output)
}

fn values(arguments: &ValuesArguments) -> Result<()> {
    let (class_parameters, gateway_parameters) = read_parameters(&arguments.parameters)?;

    let infrastructure = GatewayInfrastructure {
        labels: arguments.gateway_labels.iter().cloned().collect(),
        annotations: arguments.gateway_annotations.iter().cloned().collect(),
    };
    let mut values = HelmConfig::for_gateway(
        &arguments.gateway_name,
        &arguments.gateway_namespace,
        &arguments.gateway_class,
        &arguments.image_tag,
    )
    .with_infrastructure(&infrastructure);
    ResolvedParameters::new(class_parameters.as_ref(), gateway_parameters.as_ref())
        .apply_to_helm_values(&mut values);

    let values = values.to_values().context(BuildValuesSnafu)?;
    write_documents(&[values], &arguments.output)
}

fn merge(arguments: &MergeArguments) -> Result<()> {
    let base: Value = read_document(&arguments.base)?;
    let patch: Value = read_document(&arguments.patch)?;

    let merged = StrategicMerge::default()
        .merge(base, &patch)
        .with_context(|_| MergeDocumentsSnafu {
            base: &arguments.base,
            patch: &arguments.patch,
        })?;

    write_documents(&[merged], &arguments.output)
}

fn read_parameters(
    arguments: &ParametersArguments,
) -> Result<(Option<AgentgatewayParameters>, Option<AgentgatewayParameters>)> {
    let read = |path: &Option<PathBuf>| -> Result<Option<AgentgatewayParameters>> {
        let Some(path) = path else {
            return Ok(None);
        };

        let parameters: AgentgatewayParameters = read_document(path)?;
        parameters
            .spec
            .validate()
            .context(InvalidParametersSnafu { path })?;
        Ok(Some(parameters))
    };

    Ok((
        read(&arguments.class_parameters)?,
        read(&arguments.gateway_parameters)?,
    ))
}

fn read_documents<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut input = String::new();
    if path == Path::new(STDIN_PATH) {
        io::stdin()
            .read_to_string(&mut input)
            .context(ReadInputSnafu { path })?;
    } else {
        input = std::fs::read_to_string(path).context(ReadInputSnafu { path })?;
    }

    yaml::deserialize_documents(&input).context(ParseInputSnafu { path })
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut documents = read_documents(path)?;
    ensure!(
        documents.len() == 1,
        DocumentCountSnafu {
            path,
            count: documents.len()
        }
    );

    Ok(documents.remove(0))
}

fn output_writer(output: &OutputArguments) -> Result<Box<dyn Write>> {
    Ok(match &output.output {
        Some(path) => Box::new(File::create(path).context(CreateOutputSnafu { path })?),
        None => Box::new(io::stdout().lock()),
    })
}

fn write_documents<T: serde::Serialize>(documents: &[T], output: &OutputArguments) -> Result<()> {
    let writer = output_writer(output)?;
    yaml::serialize_documents(documents, writer).context(WriteOutputSnafu)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use kgateway_deployer::DocsVersion;
    use tempfile::TempDir;

    use super::*;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("test file can be written");
        path
    }

    fn output(dir: &TempDir) -> OutputArguments {
        OutputArguments {
            output: Some(dir.path().join("out.yaml")),
        }
    }

    fn read_output(dir: &TempDir) -> Vec<Value> {
        read_documents(&dir.path().join("out.yaml")).expect("output is valid YAML")
    }

    #[test]
    fn apply_patches_rendered_objects() {
        let dir = TempDir::new().expect("temp dir can be created");
        let objects = write_file(&dir, "objects.yaml", indoc! {"
            apiVersion: v1
            kind: ServiceAccount
            metadata:
              name: gw
            ---
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: gw
            data:
              config.yaml: '{}'
        "});
        let parameters = write_file(&dir, "parameters.yaml", indoc! {"
            apiVersion: agentgateway.dev/v1alpha1
            kind: AgentgatewayParameters
            metadata:
              name: tuned
              namespace: gateways
            spec:
              serviceAccount:
                metadata:
                  labels:
                    team: networking
        "});

        apply(&ApplyArguments {
            objects,
            parameters: ParametersArguments {
                class_parameters: None,
                gateway_parameters: Some(parameters),
            },
            output: output(&dir),
        })
        .expect("apply succeeds");

        let documents = read_output(&dir);
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["metadata"]["labels"]["team"], "networking");
        assert_eq!(documents[1]["kind"], "ConfigMap");
    }

    #[test]
    fn crd_written_to_output() {
        let dir = TempDir::new().expect("temp dir can be created");

        print_crd(&CrdArguments {
            docs_version: DocsVersion::Main,
            output: output(&dir),
        })
        .expect("CRD is printed");

        let documents = read_output(&dir);
        assert_eq!(documents.len(), 1);
        assert_eq!(
            documents[0]["metadata"]["name"],
            "agentgatewayparameters.agentgateway.dev"
        );
    }

    #[test]
    fn invalid_parameters_rejected() {
        let dir = TempDir::new().expect("temp dir can be created");
        let parameters = write_file(&dir, "parameters.yaml", indoc! {"
            apiVersion: agentgateway.dev/v1alpha1
            kind: AgentgatewayParameters
            metadata:
              name: tuned
            spec:
              logging:
                level: debug
                levels: [info]
        "});

        let error = read_parameters(&ParametersArguments {
            class_parameters: Some(parameters),
            gateway_parameters: None,
        })
        .expect_err("level and levels conflict");
        assert!(matches!(error, Error::InvalidParameters { .. }), "{error:?}");
    }

    #[test]
    fn merge_writes_merged_document() {
        let dir = TempDir::new().expect("temp dir can be created");
        let base = write_file(&dir, "base.yaml", indoc! {"
            containers:
              - name: proxy
                image: proxy:1
        "});
        let patch = write_file(&dir, "patch.yaml", indoc! {"
            containers:
              - name: proxy
                image: proxy:2
              - name: sidecar
                image: sidecar:1
        "});

        merge(&MergeArguments {
            base,
            patch,
            output: output(&dir),
        })
        .expect("merge succeeds");

        assert_eq!(
            read_output(&dir),
            vec![serde_json::json!({"containers": [
                {"name": "proxy", "image": "proxy:2"},
                {"name": "sidecar", "image": "sidecar:1"},
            ]})]
        );
    }

    #[test]
    fn multiple_documents_rejected_as_patch() {
        let dir = TempDir::new().expect("temp dir can be created");
        let path = write_file(&dir, "patch.yaml", "a: 1\n---\nb: 2\n");

        let error = read_document::<Value>(&path).expect_err("two documents");
        assert!(
            matches!(error, Error::DocumentCount { count: 2, .. }),
            "{error:?}"
        );
    }

    #[test]
    fn values_include_parameters() {
        let dir = TempDir::new().expect("temp dir can be created");
        let parameters = write_file(&dir, "parameters.yaml", indoc! {"
            apiVersion: agentgateway.dev/v1alpha1
            kind: AgentgatewayParameters
            metadata:
              name: tuned
            spec:
              image:
                tag: 1.2.3
        "});

        values(&ValuesArguments {
            gateway_name: "gw".to_owned(),
            gateway_namespace: "gateways".to_owned(),
            gateway_class: "agentgateway".to_owned(),
            gateway_labels: vec![("team".to_owned(), "payments".to_owned())],
            gateway_annotations: Vec::new(),
            image_tag: "latest".to_owned(),
            parameters: ParametersArguments {
                class_parameters: Some(parameters),
                gateway_parameters: None,
            },
            output: output(&dir),
        })
        .expect("values are built");

        let documents = read_output(&dir);
        assert_eq!(documents[0]["gateway"]["image"]["tag"], "1.2.3");
        assert_eq!(documents[0]["gateway"]["gatewayNamespace"], "gateways");
        assert_eq!(documents[0]["gateway"]["gatewayLabels"]["team"], "payments");
    }
}
