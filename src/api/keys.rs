//! Resource keys for every backend resource.

use crate::cache::ResourceKey;

/// All projects; prefix of every single-project key
pub fn projects() -> ResourceKey {
  ResourceKey::named("projects")
}

pub fn project(id: i64) -> ResourceKey {
  projects().with(id)
}

pub fn todos() -> ResourceKey {
  ResourceKey::named("todos")
}

pub fn columns() -> ResourceKey {
  ResourceKey::named("kanban").with("columns")
}

pub fn settings() -> ResourceKey {
  ResourceKey::named("settings")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_project_keys_share_prefix() {
    assert!(project(3).starts_with(&projects()));
    assert_ne!(project(3), project(4));
    assert!(!todos().starts_with(&projects()));
  }
}
