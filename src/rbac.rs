use crate::config::RoleSpec;

/// Per-operation membership checks against the current role's flattened
/// sets. An empty role table disables RBAC entirely (every check passes).
pub struct RbacGuard<'a> {
    roles: &'a [RoleSpec],
    current: usize,
}

impl<'a> RbacGuard<'a> {
    pub fn new(roles: &'a [RoleSpec], default_role: usize) -> Self {
        Self {
            roles,
            current: default_role,
        }
    }

    pub fn current_role(&self) -> usize {
        self.current
    }

    pub fn can_use_source(&self, source_idx: usize) -> bool {
        if self.roles.is_empty() {
            return true;
        }
        self.roles[self.current].sources.contains(&source_idx)
    }

    pub fn can_use_stmt(&self, stmt_idx: usize) -> bool {
        if self.roles.is_empty() {
            return true;
        }
        self.roles[self.current].statements.contains(&stmt_idx)
    }

    pub fn can_transition_role(&self, target_role: usize) -> bool {
        if self.roles.is_empty() {
            return true;
        }
        if target_role == self.current {
            return true;
        }
        self.roles[self.current].target_roles.contains(&target_role)
    }

    /// Applies a ROLE transition after the guard above has approved it.
    pub fn transition(&mut self, target_role: usize) {
        self.current = target_role;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_role_table_passes_everything() {
        let roles: Vec<RoleSpec> = Vec::new();
        let guard = RbacGuard::new(&roles, 0);
        assert!(guard.can_use_source(999));
        assert!(guard.can_use_stmt(999));
        assert!(guard.can_transition_role(999));
    }

    #[test]
    fn denies_unlisted_source_and_statement() {
        let mut role = RoleSpec::new();
        role.sources.push(0);
        role.statements.push(0);
        let roles = vec![role];
        let guard = RbacGuard::new(&roles, 0);
        assert!(guard.can_use_source(0));
        assert!(!guard.can_use_source(1));
        assert!(guard.can_use_stmt(0));
        assert!(!guard.can_use_stmt(1));
    }

    #[test]
    fn role_transition_updates_current() {
        let mut role0 = RoleSpec::new();
        role0.target_roles.push(1);
        let role1 = RoleSpec::new();
        let roles = vec![role0, role1];
        let mut guard = RbacGuard::new(&roles, 0);

        // stmt 0 not permitted for role 0 in this scenario
        assert!(!guard.can_use_stmt(0));
        assert!(guard.can_transition_role(1));
        guard.transition(1);
        assert_eq!(guard.current_role(), 1);
    }

    #[test]
    fn transition_into_current_role_is_noop_success() {
        let roles = vec![RoleSpec::new()];
        let guard = RbacGuard::new(&roles, 0);
        assert!(guard.can_transition_role(0));
    }
}
