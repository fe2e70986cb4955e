use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use steward_core::{Error, Result};
use tracing::{debug, info};

use crate::audit::ActionAudit;

/// Effect of a matching rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleEffect {
    Allow,
    Deny,
}

/// One allow/deny rule. Empty role or action sets match any role/action;
/// conditions match by equality against the supplied context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyRule {
    pub effect: RuleEffect,
    #[serde(default)]
    pub roles: HashSet<String>,
    #[serde(default)]
    pub actions: HashSet<String>,
    #[serde(default)]
    pub conditions: HashMap<String, serde_json::Value>,
}

impl PolicyRule {
    pub fn new(effect: RuleEffect) -> Self {
        Self {
            effect,
            roles: HashSet::new(),
            actions: HashSet::new(),
            conditions: HashMap::new(),
        }
    }

    pub fn allow() -> Self {
        Self::new(RuleEffect::Allow)
    }

    pub fn deny() -> Self {
        Self::new(RuleEffect::Deny)
    }

    pub fn for_role(mut self, role: &str) -> Self {
        self.roles.insert(role.to_string());
        self
    }

    pub fn for_action(mut self, action: &str) -> Self {
        self.actions.insert(action.to_string());
        self
    }

    pub fn when(mut self, key: &str, value: serde_json::Value) -> Self {
        self.conditions.insert(key.to_string(), value);
        self
    }

    fn matches(&self, role: &str, action: &str, context: &HashMap<String, serde_json::Value>) -> bool {
        (self.roles.is_empty() || self.roles.contains(role))
            && (self.actions.is_empty() || self.actions.contains(action))
            && self
                .conditions
                .iter()
                .all(|(k, v)| context.get(k) == Some(v))
    }
}

/// A named, ordered set of rules with an enabled flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub rules: Vec<PolicyRule>,
    pub enabled: bool,
}

/// Holds policies in registration order and evaluates them.
///
/// Evaluation: iterate enabled policies in registration order; within a
/// policy, the first rule whose predicates all match decides; the first
/// enabled policy containing a matching rule decides overall. No match in
/// any enabled policy denies. Every evaluation appends an audit entry.
#[derive(Clone)]
pub struct SecurityPolicyManager {
    policies: Arc<RwLock<Vec<Policy>>>,
    audit: ActionAudit,
}

impl SecurityPolicyManager {
    pub fn new(audit: ActionAudit) -> Self {
        Self {
            policies: Arc::new(RwLock::new(Vec::new())),
            audit,
        }
    }

    pub fn audit(&self) -> &ActionAudit {
        &self.audit
    }

    pub fn add_policy(&self, name: &str, rules: Vec<PolicyRule>) -> Result<()> {
        let mut policies = self.write();
        if policies.iter().any(|p| p.name == name) {
            return Err(Error::Duplicate(format!("policy '{}' already exists", name)));
        }
        policies.push(Policy {
            name: name.to_string(),
            rules,
            enabled: true,
        });
        info!(policy = %name, "Policy added");
        Ok(())
    }

    pub fn remove_policy(&self, name: &str) -> Result<()> {
        let mut policies = self.write();
        let before = policies.len();
        policies.retain(|p| p.name != name);
        if policies.len() == before {
            return Err(Error::NotFound(format!("policy '{}' does not exist", name)));
        }
        info!(policy = %name, "Policy removed");
        Ok(())
    }

    pub fn enable_policy(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable_policy(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.read().iter().find(|p| p.name == name).map(|p| p.enabled)
    }

    /// Evaluate `role`/`action` against the policy set. Appends one audit
    /// entry per call.
    pub fn enforce(
        &self,
        role: &str,
        action: &str,
        context: &HashMap<String, serde_json::Value>,
    ) -> bool {
        let decision = {
            let policies = self.read();
            policies
                .iter()
                .filter(|p| p.enabled)
                .find_map(|policy| {
                    policy
                        .rules
                        .iter()
                        .find(|rule| rule.matches(role, action, context))
                        .map(|rule| (policy.name.clone(), rule.effect))
                })
        };

        let allowed = matches!(decision, Some((_, RuleEffect::Allow)));
        match &decision {
            Some((policy, effect)) => {
                debug!(role = %role, action = %action, policy = %policy, effect = ?effect, "Policy decision");
            }
            None => {
                debug!(role = %role, action = %action, "No matching rule; denied by default");
            }
        }

        let details: serde_json::Map<String, serde_json::Value> =
            context.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.audit.log_action(
            role,
            action,
            details,
            if allowed { "allowed" } else { "denied" },
            None,
        );
        allowed
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut policies = self.write();
        let policy = policies
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::NotFound(format!("policy '{}' does not exist", name)))?;
        policy.enabled = enabled;
        info!(policy = %name, enabled, "Policy toggled");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Policy>> {
        self.policies.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Policy>> {
        self.policies.write().unwrap_or_else(|e| e.into_inner())
    }
}
