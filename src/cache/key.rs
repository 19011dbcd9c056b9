//! Resource keys identifying cached entities and collections.

use std::fmt;

/// One element of a resource key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
  Name(String),
  Id(i64),
}

impl fmt::Display for KeySegment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeySegment::Name(name) => write!(f, "{}", name),
      KeySegment::Id(id) => write!(f, "{}", id),
    }
  }
}

impl From<&str> for KeySegment {
  fn from(value: &str) -> Self {
    KeySegment::Name(value.to_string())
  }
}

impl From<i64> for KeySegment {
  fn from(value: i64) -> Self {
    KeySegment::Id(value)
  }
}

/// Ordered tuple of segments naming a cached resource, e.g. `["project", 7]`.
///
/// Keys compare structurally: two keys are equal iff every segment is equal,
/// in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Vec<KeySegment>);

impl ResourceKey {
  /// Key with a single named segment.
  pub fn named(name: &str) -> Self {
    Self(vec![KeySegment::from(name)])
  }

  /// Append a segment, builder style.
  pub fn with(mut self, segment: impl Into<KeySegment>) -> Self {
    self.0.push(segment.into());
    self
  }

  /// True if `prefix` matches the leading segments of this key.
  pub fn starts_with(&self, prefix: &ResourceKey) -> bool {
    self.0.starts_with(&prefix.0)
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, segment) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", segment)?;
    }
    write!(f, "]")
  }
}
