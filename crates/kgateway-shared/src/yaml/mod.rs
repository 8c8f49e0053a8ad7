//! Reading and writing YAML document streams.
use std::io::Write;

use serde::{Deserialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to parse YAML document #{index}"))]
    ParseDocument {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("failed to decode YAML document #{index}"))]
    DecodeDocument {
        source: serde_yaml::Error,
        index: usize,
    },

    #[snafu(display("failed to write YAML document separator"))]
    WriteDocumentSeparator { source: std::io::Error },
}

/// Serializes every item of `values` as its own YAML document, each starting with `---`.
pub fn serialize_documents<T, W>(values: &[T], mut writer: W) -> Result<()>
where
    T: serde::Serialize,
    W: Write,
{
    for value in values {
        writer
            .write_all(b"---\n")
            .context(WriteDocumentSeparatorSnafu)?;
        serde_yaml::to_writer(&mut writer, value).context(SerializeYamlSnafu)?;
    }

    Ok(())
}

/// Parses a (possibly multi-document) YAML stream into a list of `T`.
///
/// Empty documents, like the one produced by a trailing `---`, are skipped.
pub fn deserialize_documents<T>(input: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
{
    let mut documents = Vec::new();

    for (index, document) in serde_yaml::Deserializer::from_str(input).enumerate() {
        let value =
            serde_yaml::Value::deserialize(document).context(ParseDocumentSnafu { index })?;
        if value.is_null() {
            continue;
        }

        documents.push(serde_yaml::from_value(value).context(DecodeDocumentSnafu { index })?);
    }

    Ok(documents)
}
