use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kgateway_deployer::{DocsVersion, logging::LogFormat};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Format of the log output written to stderr.
    #[arg(long, env = "KGATEWAY_OVERLAY_LOG_FORMAT", default_value_t, value_enum, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the AgentgatewayParameters CustomResourceDefinition.
    Crd(CrdArguments),

    /// Apply the overlays of AgentgatewayParameters to rendered objects.
    Apply(ApplyArguments),

    /// Print the chart values of a Gateway with AgentgatewayParameters applied.
    Values(ValuesArguments),

    /// Strategically merge a patch document onto a base document.
    Merge(MergeArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct CrdArguments {
    /// The kgateway version used for documentation links, `0.0.0-dev` links to the latest docs.
    #[arg(long, env = "KGATEWAY_VERSION", default_value = "0.0.0-dev")]
    pub docs_version: DocsVersion,

    #[command(flatten)]
    pub output: OutputArguments,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ApplyArguments {
    /// YAML stream of the rendered objects, `-` reads from stdin.
    #[arg(long, value_name = "FILE")]
    pub objects: PathBuf,

    #[command(flatten)]
    pub parameters: ParametersArguments,

    #[command(flatten)]
    pub output: OutputArguments,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ValuesArguments {
    /// Name of the Gateway.
    #[arg(long)]
    pub gateway_name: String,

    /// Namespace of the Gateway.
    #[arg(long, default_value = "default")]
    pub gateway_namespace: String,

    /// Name of the GatewayClass of the Gateway.
    #[arg(long, default_value = "agentgateway")]
    pub gateway_class: String,

    /// Label of the Gateway infrastructure, can be given multiple times.
    #[arg(long = "gateway-label", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub gateway_labels: Vec<(String, String)>,

    /// Annotation of the Gateway infrastructure, can be given multiple times.
    #[arg(long = "gateway-annotation", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub gateway_annotations: Vec<(String, String)>,

    /// Default tag of the agentgateway image.
    #[arg(long, env = "AGENTGATEWAY_IMAGE_TAG", default_value = "latest")]
    pub image_tag: String,

    #[command(flatten)]
    pub parameters: ParametersArguments,

    #[command(flatten)]
    pub output: OutputArguments,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct MergeArguments {
    /// The document to merge onto.
    #[arg(long, value_name = "FILE")]
    pub base: PathBuf,

    /// The strategic merge patch.
    #[arg(long, value_name = "FILE")]
    pub patch: PathBuf,

    #[command(flatten)]
    pub output: OutputArguments,
}

/// The parameters applying to a Gateway, class-level parameters are applied first.
#[derive(Debug, PartialEq, Eq, Args)]
pub struct ParametersArguments {
    /// AgentgatewayParameters referenced by the GatewayClass.
    #[arg(long, value_name = "FILE")]
    pub class_parameters: Option<PathBuf>,

    /// AgentgatewayParameters referenced by the Gateway.
    #[arg(long, value_name = "FILE")]
    pub gateway_parameters: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct OutputArguments {
    /// Write the result to this file instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(format!("expected KEY=VALUE, got {input:?}")),
    }
}
