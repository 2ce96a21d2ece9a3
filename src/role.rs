use crate::config::RoleSpec;
use crate::error::{Error, Result};

/// Produces a flattened `Vec<RoleSpec>` from a parent-pointer DAG, the
/// way the original hierarchy compiler turns `sqlbox_role_hier` into
/// per-role `sqlbox_role` permission sets: a two-pass walk that first
/// counts each ancestor's descendants, then assigns every node into
/// every ancestor's target-role set.
pub struct RoleHierarchyBuilder {
    parents: Vec<usize>,
    own_sources: Vec<Vec<usize>>,
    own_statements: Vec<Vec<usize>>,
}

impl RoleHierarchyBuilder {
    /// Allocates `count` roles, each initially its own parent (a root).
    pub fn new(count: usize) -> Self {
        Self {
            parents: (0..count).collect(),
            own_sources: vec![Vec::new(); count],
            own_statements: vec![Vec::new(); count],
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn grant_source(&mut self, role: usize, source: usize) {
        self.own_sources[role].push(source);
    }

    pub fn grant_statement(&mut self, role: usize, statement: usize) {
        self.own_statements[role].push(statement);
    }

    fn is_ancestor(&self, maybe_ancestor: usize, node: usize) -> bool {
        let mut cur = node;
        loop {
            if cur == maybe_ancestor {
                return true;
            }
            let next = self.parents[cur];
            if next == cur {
                return false;
            }
            cur = next;
        }
    }

    /// Assigns `child`'s parent to `parent`. A self-edge is a no-op
    /// success. Rejects if `child` already has a distinct parent, or if
    /// `child` is an ancestor of `parent` (which would create a cycle).
    pub fn make_child(&mut self, parent: usize, child: usize) -> Result<()> {
        if parent == child {
            return Ok(());
        }
        if self.parents[child] != child {
            return Err(Error::domain(format!(
                "role {child} already has a parent"
            )));
        }
        if self.is_ancestor(child, parent) {
            return Err(Error::domain(format!(
                "assigning role {child} as parent of {parent} would create a cycle"
            )));
        }
        self.parents[child] = parent;
        Ok(())
    }

    fn ancestors(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = node;
        loop {
            out.push(cur);
            let next = self.parents[cur];
            if next == cur {
                break;
            }
            cur = next;
        }
        out
    }

    /// Two-pass compile: first count each ancestor's descendant slots by
    /// walking up from every node, then walk up again assigning each
    /// node into every ancestor's target-role set. Statement/source
    /// permissions are unioned up the ancestor chain in the same pass.
    pub fn compile(&self) -> Vec<RoleSpec> {
        let n = self.parents.len();
        let mut specs: Vec<RoleSpec> = vec![RoleSpec::new(); n];

        for node in 0..n {
            let chain = self.ancestors(node);
            for &ancestor in &chain {
                if ancestor != node && !specs[ancestor].target_roles.contains(&node) {
                    specs[ancestor].target_roles.push(node);
                }
            }
            for &ancestor in &chain {
                for &src in &self.own_sources[ancestor] {
                    if !specs[node].sources.contains(&src) {
                        specs[node].sources.push(src);
                    }
                }
                for &stmt in &self.own_statements[ancestor] {
                    if !specs[node].statements.contains(&stmt) {
                        specs[node].statements.push(stmt);
                    }
                }
            }
        }

        specs
    }
}
