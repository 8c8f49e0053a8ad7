use std::fmt::{Display, Write};

/// Tracks where in a patch document the merge currently is.
///
/// Scopes are chained to their parent, so the (comparatively expensive) [`FieldPath`] is only
/// built once an error actually needs to be reported.
#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    segment: Option<Segment<'a>>,
    parent: Option<&'a Scope<'a>>,
}

#[derive(Clone, Copy)]
enum Segment<'a> {
    Field(&'a str),
    Index(usize),
}

impl<'a> Scope<'a> {
    pub(crate) fn root() -> Self {
        Self {
            segment: None,
            parent: None,
        }
    }

    /// Creates a `Scope` for a map field of the current scope.
    pub(crate) fn field<'b>(&'b self, name: &'b str) -> Scope<'b> {
        Scope {
            segment: Some(Segment::Field(name)),
            parent: Some(self),
        }
    }

    /// Creates a `Scope` for a list item of the current scope.
    pub(crate) fn index(&self, index: usize) -> Scope<'_> {
        Scope {
            segment: Some(Segment::Index(index)),
            parent: Some(self),
        }
    }

    pub(crate) fn path(&self) -> FieldPath {
        let mut segments = Vec::new();
        let mut curr = Some(self);
        while let Some(curr_some) = curr {
            if let Some(segment) = curr_some.segment {
                segments.push(segment);
            }
            curr = curr_some.parent;
        }

        let mut path = String::new();
        for segment in segments.iter().rev() {
            match segment {
                Segment::Field(name) => {
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(name);
                }
                Segment::Index(index) => {
                    // Writing into a String can't fail
                    let _ = write!(path, "[{index}]");
                }
            }
        }

        FieldPath(path)
    }
}

/// The location of a value inside a patch document, for example `template.spec.containers[1]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath(String);

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_path_displayed() {
        let root = Scope::root();
        let template = root.field("template");
        let spec = template.field("spec");
        let containers = spec.field("containers");
        let container = containers.index(1);
        let env = container.field("env");

        assert_eq!(
            env.path().to_string(),
            "template.spec.containers[1].env"
        );
    }

    #[test]
    fn root_path_displayed() {
        assert_eq!(Scope::root().path().to_string(), "<root>");
        assert_eq!(Scope::root().index(3).path().to_string(), "[3]");
    }
}
