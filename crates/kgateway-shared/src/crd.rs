//! Printing CustomResourceDefinitions with documentation links for a release.
use std::{fmt, io::Write, str::FromStr};

use semver::Version;
use snafu::{ResultExt, Snafu};

/// Stands in for the docs base URL in doc comments that end up in CRD descriptions.
pub const DOCS_BASE_URL_PLACEHOLDER: &str = "DOCS_BASE_URL_PLACEHOLDER";

const DOCS_BASE_URL: &str = "https://kgateway.dev/docs";

/// Version of unreleased builds, linking to the docs of the main branch.
const DEV_VERSION: &str = "0.0.0-dev";

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse {input:?} as semantic version"))]
    ParseSemanticVersion {
        source: semver::Error,
        input: String,
    },

    #[snafu(display("failed to serialize the CustomResourceDefinition {name:?}"))]
    SerializeCrd {
        source: serde_yaml::Error,
        name: String,
    },

    #[snafu(display("failed to write the CustomResourceDefinition {name:?}"))]
    WriteCrd {
        source: std::io::Error,
        name: String,
    },
}

/// The docs release that links in a CustomResourceDefinition point to.
///
/// Patch releases share their docs with the minor release, `0.0.0-dev` points to `main`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocsVersion {
    Main,
    Release { major: u64, minor: u64 },
}

impl FromStr for DocsVersion {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        if input == DEV_VERSION {
            return Ok(Self::Main);
        }

        let version = Version::from_str(input).context(ParseSemanticVersionSnafu { input })?;
        Ok(Self::Release {
            major: version.major,
            minor: version.minor,
        })
    }
}

impl fmt::Display for DocsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Release { major, minor } => write!(f, "{major}.{minor}.x"),
        }
    }
}

impl DocsVersion {
    pub fn base_url(&self) -> String {
        format!("{DOCS_BASE_URL}/{self}")
    }

    /// Points every [`DOCS_BASE_URL_PLACEHOLDER`] in `input` to the docs of this version.
    pub fn resolve_links(&self, input: &str) -> String {
        input.replace(DOCS_BASE_URL_PLACEHOLDER, &self.base_url())
    }
}

/// Writes the CustomResourceDefinition of `K` as a YAML document with resolved doc links.
pub fn write_crd<K, W>(docs_version: &DocsVersion, mut writer: W) -> Result<()>
where
    K: kube::CustomResourceExt,
    W: Write,
{
    let name = K::crd_name();
    let crd = serde_yaml::to_string(&K::crd()).context(SerializeCrdSnafu { name })?;

    write!(writer, "---\n{}", docs_version.resolve_links(&crd)).context(WriteCrdSnafu { name })
}
