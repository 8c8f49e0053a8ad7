use serde_json::{Map, Value};
use snafu::OptionExt;

use super::{InvalidDirectiveSnafu, Result, UnknownDirectiveSnafu, path::Scope};

/// The map key carrying a [`Directive`] inside a patch document.
pub const PATCH_DIRECTIVE_KEY: &str = "$patch";

/// Every key starting with this prefix is reserved for directives.
const DIRECTIVE_PREFIX: char = '$';

/// Changes how the map (or list element) carrying it is merged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Directive {
    /// Regular strategic merge, the same as not specifying a directive.
    #[default]
    Merge,

    /// On a map: every list of the map replaces the generated list verbatim.
    /// On a list element: the matching element is replaced instead of merged.
    Replace,

    /// Removes the matching list element. Only valid on list elements.
    Delete,
}

impl Directive {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(|directive| directive.parse().ok())
    }
}

/// A patch map with its directive split off.
///
/// Only the remaining data fields are ever merged, so a directive can't leak into the output.
pub(crate) struct PatchMap<'a> {
    pub(crate) directive: Directive,
    pub(crate) fields: Vec<(&'a str, &'a Value)>,
}

impl<'a> PatchMap<'a> {
    pub(crate) fn parse(map: &'a Map<String, Value>, scope: &Scope<'_>) -> Result<Self> {
        let mut directive = Directive::default();
        let mut fields = Vec::with_capacity(map.len());

        for (key, value) in map {
            if key == PATCH_DIRECTIVE_KEY {
                directive = Directive::from_value(value).with_context(|| InvalidDirectiveSnafu {
                    value: value.clone(),
                    path: scope.path(),
                })?;
            } else if key.starts_with(DIRECTIVE_PREFIX) {
                return UnknownDirectiveSnafu {
                    key: key.clone(),
                    path: scope.path(),
                }
                .fail();
            } else {
                fields.push((key.as_str(), value));
            }
        }

        Ok(Self { directive, fields })
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields
            .iter()
            .find(|(field, _)| *field == key)
            .map(|(_, value)| *value)
    }
}
