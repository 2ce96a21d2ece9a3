use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::wire::params::Cell;

/// How a source file may be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    ReadOnly,
    ReadWrite,
    ReadWriteCreate,
}

/// An externally supplied database file and its open mode, indexed by position.
#[derive(Debug, Clone)]
pub struct Source {
    pub filename: String,
    pub mode: SourceMode,
}

impl Source {
    pub fn new(filename: impl Into<String>, mode: SourceMode) -> Self {
        Self {
            filename: filename.into(),
            mode,
        }
    }
}

/// A role's three flattened permission sets, as produced either directly
/// or by [`crate::role::RoleHierarchyBuilder::compile`].
#[derive(Debug, Clone, Default)]
pub struct RoleSpec {
    pub sources: Vec<usize>,
    pub statements: Vec<usize>,
    pub target_roles: Vec<usize>,
}

impl RoleSpec {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The ambient, structured logging sink (`tracing`) is always on; this is
/// the original library's separate user-supplied notification channel,
/// invoked alongside it rather than instead of it (SPEC_FULL.md §10.1).
pub type MessageSink = Arc<dyn Fn(&str) + Send + Sync>;

fn default_message_sink() -> MessageSink {
    Arc::new(|msg: &str| tracing::warn!(target: "sqlbox::message_sink", "{msg}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDirection {
    /// Applied to a bound parameter before it reaches the engine.
    In,
    /// Applied to an engine column before it reaches the wire.
    Out,
}

/// Mutable scratch handed to a filter; filters read from it and return an
/// owned replacement cell rather than a pointer/free-callback pair.
pub struct FilterScratch<'a> {
    pub stmt_idx: usize,
    pub col_idx: usize,
    pub cell: &'a Cell,
}

pub trait Filter: Send + Sync {
    fn apply(&self, scratch: &FilterScratch<'_>) -> Result<Cell>;
}

#[derive(Default)]
pub struct FilterTable {
    entries: Vec<(usize, usize, FilterDirection, Arc<dyn Filter>)>,
}

impl fmt::Debug for FilterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterTable")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl FilterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        stmt_idx: usize,
        col_idx: usize,
        direction: FilterDirection,
        filter: Arc<dyn Filter>,
    ) {
        self.entries.push((stmt_idx, col_idx, direction, filter));
    }

    pub fn lookup(
        &self,
        stmt_idx: usize,
        col_idx: usize,
        direction: FilterDirection,
    ) -> Option<&Arc<dyn Filter>> {
        self.entries
            .iter()
            .find(|(s, c, d, _)| *s == stmt_idx && *c == col_idx && *d == direction)
            .map(|(_, _, _, f)| f)
    }
}

/// Validated, immutable configuration shared (read-only, copied across
/// the fork) by both processes. Built via ordinary field assignment,
/// then locked in by [`BoxConfig::validate`] at `spawn` time.
#[derive(Debug, Clone)]
pub struct BoxConfig {
    pub sources: Vec<Source>,
    pub statements: Vec<String>,
    pub roles: Vec<RoleSpec>,
    pub default_role: usize,
    pub filters: Arc<FilterTable>,
    pub message_sink: MessageSink,
}

impl Default for BoxConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            statements: Vec::new(),
            roles: Vec::new(),
            default_role: 0,
            filters: Arc::new(FilterTable::new()),
            message_sink: default_message_sink(),
        }
    }
}

impl BoxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, source) in self.sources.iter().enumerate() {
            if source.filename.is_empty() {
                return Err(Error::Config(format!("source {idx} has an empty filename")));
            }
        }
        for (idx, stmt) in self.statements.iter().enumerate() {
            if stmt.is_empty() {
                return Err(Error::Config(format!(
                    "statement {idx} has empty SQL text"
                )));
            }
        }
        if !self.roles.is_empty() && self.default_role >= self.roles.len() {
            return Err(Error::Config(format!(
                "default role {} is out of range for {} roles",
                self.default_role,
                self.roles.len()
            )));
        }
        for (idx, role) in self.roles.iter().enumerate() {
            for &src in &role.sources {
                if src >= self.sources.len() {
                    return Err(Error::Config(format!(
                        "role {idx} references out-of-range source {src}"
                    )));
                }
            }
            for &stmt in &role.statements {
                if stmt >= self.statements.len() {
                    return Err(Error::Config(format!(
                        "role {idx} references out-of-range statement {stmt}"
                    )));
                }
            }
            for &target in &role.target_roles {
                if target >= self.roles.len() {
                    return Err(Error::Config(format!(
                        "role {idx} references out-of-range target role {target}"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filename_rejected() {
        let mut cfg = BoxConfig::new();
        cfg.sources.push(Source::new("", SourceMode::ReadWriteCreate));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_default_role_rejected() {
        let mut cfg = BoxConfig::new();
        cfg.roles.push(RoleSpec::new());
        cfg.default_role = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_permission_rejected() {
        let mut cfg = BoxConfig::new();
        let mut role = RoleSpec::new();
        role.sources.push(0);
        cfg.roles.push(role);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn well_formed_config_passes() {
        let mut cfg = BoxConfig::new();
        cfg.sources.push(Source::new(":memory:", SourceMode::ReadWriteCreate));
        cfg.statements.push("SELECT 1".to_string());
        let mut role = RoleSpec::new();
        role.sources.push(0);
        role.statements.push(0);
        cfg.roles.push(role);
        assert!(cfg.validate().is_ok());
    }
}
