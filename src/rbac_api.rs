//! Role- and permission-facing API.
//! --------------------------------
//! Convenience surface over the grouping store and the role graphs:
//! direct role queries delegate to the role manager, "implicit" queries
//! compose the direct relation with bounded graph reachability, and the
//! delete sweeps (`delete_user`, `delete_role`, domain sweeps) are
//! filtered removals that ripple through the normal mutation pipeline.

use std::collections::HashSet;

use crate::enforcer::Enforcer;
use crate::error::Result;
use crate::rbac::DEFAULT_MAX_HIERARCHY_LEVEL;
use crate::storage::Rule;

impl Enforcer {
    fn grouping_rule(user: &str, role: &str, domain: Option<&str>) -> Rule {
        let mut rule = vec![user.to_string(), role.to_string()];
        if let Some(d) = domain {
            rule.push(d.to_string());
        }
        rule
    }

    /// Position of the domain field within a policy definition, when the
    /// definition names one (`dom` or `domain` token).
    fn policy_domain_index(&self, ptype: &str) -> Option<usize> {
        self.model
            .field_index(ptype, "dom")
            .or_else(|| self.model.field_index(ptype, "domain"))
    }

    // --- direct role queries ---------------------------------------------

    pub fn get_roles_for_user(&self, user: &str) -> Vec<String> {
        self.role_manager("g").map(|rm| rm.read().get_roles(user, None)).unwrap_or_default()
    }

    pub fn get_roles_for_user_in_domain(&self, user: &str, domain: &str) -> Vec<String> {
        self.role_manager("g")
            .map(|rm| rm.read().get_roles(user, Some(domain)))
            .unwrap_or_default()
    }

    pub fn get_users_for_role(&self, role: &str) -> Vec<String> {
        self.role_manager("g").map(|rm| rm.read().get_users(role, None)).unwrap_or_default()
    }

    pub fn get_users_for_role_in_domain(&self, role: &str, domain: &str) -> Vec<String> {
        self.role_manager("g")
            .map(|rm| rm.read().get_users(role, Some(domain)))
            .unwrap_or_default()
    }

    pub fn has_role_for_user(&self, user: &str, role: &str) -> bool {
        self.get_roles_for_user(user).iter().any(|r| r == role)
    }

    pub fn has_role_for_user_in_domain(&self, user: &str, role: &str, domain: &str) -> bool {
        self.get_roles_for_user_in_domain(user, domain).iter().any(|r| r == role)
    }

    pub fn get_domains_for_user(&self, user: &str) -> Vec<String> {
        self.role_manager("g").map(|rm| rm.read().get_domains(user)).unwrap_or_default()
    }

    pub fn get_all_domains(&self) -> Vec<String> {
        self.role_manager("g").map(|rm| rm.read().get_all_domains()).unwrap_or_default()
    }

    // --- role mutation ----------------------------------------------------

    pub fn add_role_for_user(&mut self, user: &str, role: &str) -> Result<()> {
        self.add_grouping_policy(Self::grouping_rule(user, role, None))
    }

    pub fn add_role_for_user_in_domain(&mut self, user: &str, role: &str, domain: &str) -> Result<()> {
        self.add_grouping_policy(Self::grouping_rule(user, role, Some(domain)))
    }

    pub fn delete_role_for_user(&mut self, user: &str, role: &str) -> Result<()> {
        self.remove_grouping_policy(Self::grouping_rule(user, role, None))
    }

    pub fn delete_role_for_user_in_domain(&mut self, user: &str, role: &str, domain: &str) -> Result<()> {
        self.remove_grouping_policy(Self::grouping_rule(user, role, Some(domain)))
    }

    /// Remove every role of `user` (all domains).
    pub fn delete_roles_for_user(&mut self, user: &str) -> Result<Vec<Rule>> {
        self.remove_filtered_grouping_policy(0, vec![user.to_string()])
    }

    pub fn delete_roles_for_user_in_domain(&mut self, user: &str, domain: &str) -> Result<Vec<Rule>> {
        self.remove_filtered_grouping_policy(
            0,
            vec![user.to_string(), String::new(), domain.to_string()],
        )
    }

    /// Remove the user from every grouping rule and every policy rule.
    pub fn delete_user(&mut self, user: &str) -> Result<()> {
        let gtypes: Vec<String> = self.model.roles.keys().cloned().collect();
        for gtype in gtypes {
            self.remove_filtered_named_grouping_policy(&gtype, 0, vec![user.to_string()])?;
        }
        let ptypes: Vec<String> = self.model.policies.keys().cloned().collect();
        for ptype in ptypes {
            self.remove_filtered_named_policy(&ptype, 0, vec![user.to_string()])?;
        }
        Ok(())
    }

    /// Remove the role from inheritance rules (position 1) and from policy
    /// rules where it acts as the subject.
    pub fn delete_role(&mut self, role: &str) -> Result<()> {
        let gtypes: Vec<String> = self.model.roles.keys().cloned().collect();
        for gtype in gtypes {
            self.remove_filtered_named_grouping_policy(
                &gtype,
                1,
                vec![role.to_string()],
            )?;
        }
        let ptypes: Vec<String> = self.model.policies.keys().cloned().collect();
        for ptype in ptypes {
            self.remove_filtered_named_policy(&ptype, 0, vec![role.to_string()])?;
        }
        Ok(())
    }

    /// Remove every grouping and policy rule scoped to `domain`.
    pub fn delete_all_users_by_domain(&mut self, domain: &str) -> Result<()> {
        let gtypes: Vec<(String, usize)> = self
            .model
            .roles
            .iter()
            .map(|(k, a)| (k.clone(), a.arity))
            .collect();
        for (gtype, arity) in gtypes {
            if arity == 3 {
                self.remove_filtered_named_grouping_policy(
                    &gtype,
                    0,
                    vec![String::new(), String::new(), domain.to_string()],
                )?;
            }
        }
        let ptypes: Vec<String> = self.model.policies.keys().cloned().collect();
        for ptype in ptypes {
            if let Some(idx) = self.policy_domain_index(&ptype) {
                self.remove_filtered_named_policy(&ptype, idx, vec![domain.to_string()])?;
            }
        }
        Ok(())
    }

    /// Sweep whole domains. An empty list removes every domain-scoped
    /// rule: all grouping rules plus the policy rules of definitions that
    /// carry a domain field.
    pub fn delete_domains(&mut self, domains: &[&str]) -> Result<()> {
        if domains.is_empty() {
            let gtypes: Vec<String> = self.model.roles.keys().cloned().collect();
            for gtype in gtypes {
                self.remove_filtered_named_grouping_policy(&gtype, 0, vec![])?;
            }
            let ptypes: Vec<String> = self.model.policies.keys().cloned().collect();
            for ptype in ptypes {
                if self.policy_domain_index(&ptype).is_some() {
                    self.remove_filtered_named_policy(&ptype, 0, vec![])?;
                }
            }
            return Ok(());
        }
        for domain in domains {
            self.delete_all_users_by_domain(domain)?;
        }
        Ok(())
    }

    // --- permissions ------------------------------------------------------

    pub fn add_permission_for_user(&mut self, user: &str, permission: Vec<String>) -> Result<()> {
        let mut rule = vec![user.to_string()];
        rule.extend(permission);
        self.add_policy(rule)
    }

    pub fn delete_permission_for_user(&mut self, user: &str, permission: Vec<String>) -> Result<()> {
        let mut rule = vec![user.to_string()];
        rule.extend(permission);
        self.remove_policy(rule)
    }

    pub fn delete_permissions_for_user(&mut self, user: &str) -> Result<Vec<Rule>> {
        self.remove_filtered_policy(0, vec![user.to_string()])
    }

    pub fn get_permissions_for_user(&self, user: &str) -> Vec<Rule> {
        self.get_filtered_policy(0, &[user.to_string()])
    }

    pub fn get_permissions_for_user_in_domain(&self, user: &str, domain: &str) -> Vec<Rule> {
        let Some(idx) = self.policy_domain_index("p") else { return vec![] };
        self.get_policy()
            .into_iter()
            .filter(|rule| rule.first().map(|s| s == user).unwrap_or(false))
            .filter(|rule| rule.get(idx).map(|d| d == domain).unwrap_or(false))
            .collect()
    }

    pub fn has_permission_for_user(&self, user: &str, permission: Vec<String>) -> bool {
        let mut rule = vec![user.to_string()];
        rule.extend(permission);
        self.has_policy(&rule)
    }

    // --- implicit (closure) queries ---------------------------------------

    /// Roles reachable from `user` through the inheritance graph, bounded
    /// the same way `has_link` is. Breadth-first order, deduplicated.
    pub fn get_implicit_roles_for_user(&self, user: &str, domain: Option<&str>) -> Vec<String> {
        let Some(rm) = self.role_manager("g") else { return vec![] };
        let rm = rm.read();
        let mut out: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(user.to_string());
        let mut frontier: Vec<String> = vec![user.to_string()];
        for _level in 0..DEFAULT_MAX_HIERARCHY_LEVEL {
            let mut next: Vec<String> = Vec::new();
            for node in &frontier {
                for role in rm.get_roles(node, domain) {
                    if visited.insert(role.clone()) {
                        out.push(role.clone());
                        next.push(role);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        out
    }

    /// Users from which `role` is reachable (the inverse closure),
    /// excluding the role itself.
    pub fn get_implicit_users_for_role(&self, role: &str, domain: Option<&str>) -> Vec<String> {
        let Some(rm) = self.role_manager("g") else { return vec![] };
        let rm = rm.read();
        let mut out: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(role.to_string());
        let mut frontier: Vec<String> = vec![role.to_string()];
        for _level in 0..DEFAULT_MAX_HIERARCHY_LEVEL {
            let mut next: Vec<String> = Vec::new();
            for node in &frontier {
                for user in rm.get_users(node, domain) {
                    if visited.insert(user.clone()) {
                        out.push(user.clone());
                        next.push(user);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        out
    }

    /// Permissions held directly or through any implicit role.
    pub fn get_implicit_permissions_for_user(&self, user: &str, domain: Option<&str>) -> Vec<Rule> {
        let mut subjects = vec![user.to_string()];
        subjects.extend(self.get_implicit_roles_for_user(user, domain));
        let mut seen: HashSet<Rule> = HashSet::new();
        let mut out: Vec<Rule> = Vec::new();
        for subject in &subjects {
            let perms = match domain {
                Some(d) => self.get_permissions_for_user_in_domain(subject, d),
                None => self.get_permissions_for_user(subject),
            };
            for rule in perms {
                if seen.insert(rule.clone()) {
                    out.push(rule);
                }
            }
        }
        out
    }

    /// Every user that would pass `enforce([user, ...permission])`,
    /// excluding names that are themselves roles.
    pub fn get_implicit_users_for_permission(&self, permission: Vec<String>) -> Result<Vec<String>> {
        let roles: HashSet<String> = self.store.values_across("g", 1).into_iter().collect();
        let mut candidates: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for user in self.store.values_across("g", 0) {
            if seen.insert(user.clone()) {
                candidates.push(user);
            }
        }
        for sub in self.store.values_across("p", 0) {
            if seen.insert(sub.clone()) {
                candidates.push(sub);
            }
        }
        let mut out: Vec<String> = Vec::new();
        for user in candidates {
            if roles.contains(&user) {
                continue;
            }
            let mut request = vec![user.clone()];
            request.extend(permission.iter().cloned());
            if self.enforce(&request)? {
                out.push(user);
            }
        }
        Ok(out)
    }
}
