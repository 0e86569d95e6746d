use std::fmt;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::schema::NamedType;
use serde::Serialize;

/// One step of a [`SelectionPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A field, by response key.
    Field(Name),
    /// An inline fragment narrowing to the given type.
    TypeCondition(NamedType),
}

/// The logical location of a selection set, from the operation root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SelectionPath {
    segments: Arc<Vec<PathSegment>>,
}

impl SelectionPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    #[must_use]
    pub fn with_field(&self, response_key: Name) -> Self {
        self.with_segment(PathSegment::Field(response_key))
    }

    #[must_use]
    pub fn with_type_condition(&self, type_name: NamedType) -> Self {
        self.with_segment(PathSegment::TypeCondition(type_name))
    }

    fn with_segment(&self, segment: PathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(segment);
        Self {
            segments: Arc::new(segments),
        }
    }
}

impl fmt::Display for SelectionPath {
    /// Fields are joined with `.`; a type condition is attached to the preceding field as
    /// `|[Type]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Field(name) => {
                    if index > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                PathSegment::TypeCondition(type_name) => write!(f, "|[{type_name}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for SelectionPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
