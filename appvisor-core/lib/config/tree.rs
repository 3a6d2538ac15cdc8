//! The declarative app configuration store.
//!
//! Configuration is a hierarchical tree queried by `/`-separated paths such as
//! `/apps/cam/procs/main/faultAction`. Mapping nodes are addressed by key and sequence nodes by
//! their numeric index.

use std::{fs, path::Path};

use serde_json::Value;

use crate::{AppvisorError, AppvisorResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Read-only access to the hierarchical app configuration.
pub trait ConfigStore: Send + Sync {
    /// Returns true if a node exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Reads a scalar node as a string. A missing node yields `None`; a mapping or sequence node
    /// is an error.
    fn get_string(&self, path: &str) -> AppvisorResult<Option<String>>;

    /// Reads a boolean, falling back to `default` when the node is missing or not a boolean.
    fn get_bool(&self, path: &str, default: bool) -> bool;

    /// Reads an integer. A missing node yields `None`; any other non-integer node is an error.
    fn get_int(&self, path: &str) -> AppvisorResult<Option<i64>>;

    /// Lists the child names of a node in document order. Sequence children are named by index.
    fn children(&self, path: &str) -> Vec<String>;

    /// Reads a sequence (or mapping) of scalars as strings, in document order.
    fn string_list(&self, path: &str) -> AppvisorResult<Vec<String>> {
        self.children(path)
            .into_iter()
            .filter_map(|child| self.get_string(&join_path(path, &child)).transpose())
            .collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`ConfigStore`] holding the whole tree in memory.
#[derive(Debug, Clone, Default)]
pub struct ConfigTree {
    root: Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ConfigTree {
    /// Wraps an already parsed tree.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(yaml: &str) -> AppvisorResult<Self> {
        let root: Value = serde_yaml::from_str(yaml)?;
        Ok(Self::from_value(root))
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: &Path) -> AppvisorResult<Self> {
        let contents = fs::read_to_string(path)?;
        tracing::debug!("loaded configuration tree from {}", path.display());
        Self::from_yaml_str(&contents)
    }

    fn node(&self, path: &str) -> Option<&Value> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.root, |node, segment| match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ConfigStore for ConfigTree {
    fn exists(&self, path: &str) -> bool {
        matches!(self.node(path), Some(node) if !node.is_null())
    }

    fn get_string(&self, path: &str) -> AppvisorResult<Option<String>> {
        match self.node(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(AppvisorError::Config(format!(
                "node '{}' is not a scalar",
                path
            ))),
        }
    }

    fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.node(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Null) | None => default,
            Some(_) => {
                tracing::warn!("node '{}' is not a boolean, using {}", path, default);
                default
            }
        }
    }

    fn get_int(&self, path: &str) -> AppvisorResult<Option<i64>> {
        match self.node(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
                AppvisorError::Config(format!("node '{}' is not an integer", path))
            }),
            Some(_) => Err(AppvisorError::Config(format!(
                "node '{}' is not an integer",
                path
            ))),
        }
    }

    fn children(&self, path: &str) -> Vec<String> {
        match self.node(path) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(Value::Array(items)) => (0..items.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Joins a child name onto a configuration path.
pub fn join_path(base: &str, child: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), child.trim_start_matches('/'))
}

/// The last segment of a configuration path.
pub fn path_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
