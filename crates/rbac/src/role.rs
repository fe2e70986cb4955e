use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use steward_core::{Error, Result};
use tracing::{debug, info};

/// A named role: its own permission set plus the names of inherited roles.
/// Inheritance is by reference, not snapshot: permission checks resolve
/// against the parent's current set, so revoking from the parent revokes
/// transitively. Inherited permissions cannot be revoked from the child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub name: String,
    pub permissions: HashSet<String>,
    pub inherits: HashSet<String>,
}

impl Role {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            permissions: HashSet::new(),
            inherits: HashSet::new(),
        }
    }

    pub fn add_permission(&mut self, permission: &str) {
        self.permissions.insert(permission.to_string());
    }

    pub fn remove_permission(&mut self, permission: &str) {
        self.permissions.remove(permission);
    }

    /// Own permissions only; use `RoleManager::has_permission` for the
    /// inheritance-aware check.
    pub fn has_own_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Registry of roles and the catalog of assignable permissions.
/// Permissions must be registered before they can be assigned.
#[derive(Clone, Default)]
pub struct RoleManager {
    inner: Arc<RwLock<RoleState>>,
}

#[derive(Default)]
struct RoleState {
    roles: HashMap<String, Role>,
    /// Registered permission name -> description.
    permissions: HashMap<String, String>,
}

impl RoleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_role(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        if state.roles.contains_key(name) {
            return Err(Error::Duplicate(format!("role '{}' already exists", name)));
        }
        state.roles.insert(name.to_string(), Role::new(name));
        info!(role = %name, "Role created");
        Ok(())
    }

    pub fn get_role(&self, name: &str) -> Option<Role> {
        self.read().roles.get(name).cloned()
    }

    pub fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.write();
        if state.roles.remove(name).is_none() {
            return Err(Error::NotFound(format!("role '{}' does not exist", name)));
        }
        info!(role = %name, "Role deleted");
        Ok(())
    }

    pub fn register_permission(&self, name: &str, description: &str) {
        let mut state = self.write();
        state
            .permissions
            .insert(name.to_string(), description.to_string());
    }

    pub fn is_permission_registered(&self, name: &str) -> bool {
        self.read().permissions.contains_key(name)
    }

    pub fn assign_permission(&self, role: &str, permission: &str) -> Result<()> {
        let mut state = self.write();
        if !state.permissions.contains_key(permission) {
            return Err(Error::Validation(format!(
                "permission '{}' is not registered",
                permission
            )));
        }
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| Error::NotFound(format!("role '{}' does not exist", role)))?;
        entry.add_permission(permission);
        debug!(role = %role, permission = %permission, "Permission assigned");
        Ok(())
    }

    /// Remove a permission from the role's own set. Inherited permissions
    /// are untouched.
    pub fn revoke_permission(&self, role: &str, permission: &str) -> Result<()> {
        let mut state = self.write();
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| Error::NotFound(format!("role '{}' does not exist", role)))?;
        entry.remove_permission(permission);
        debug!(role = %role, permission = %permission, "Permission revoked");
        Ok(())
    }

    /// Make `child` inherit `parent`. Rejected when it would create an
    /// inheritance cycle.
    pub fn inherit(&self, child: &str, parent: &str) -> Result<()> {
        let mut state = self.write();
        if !state.roles.contains_key(parent) {
            return Err(Error::NotFound(format!("role '{}' does not exist", parent)));
        }
        if child == parent || Self::is_ancestor(&state.roles, child, parent) {
            return Err(Error::Validation(format!(
                "role '{}' cannot inherit '{}': inheritance cycle",
                child, parent
            )));
        }
        let entry = state
            .roles
            .get_mut(child)
            .ok_or_else(|| Error::NotFound(format!("role '{}' does not exist", child)))?;
        entry.inherits.insert(parent.to_string());
        info!(child = %child, parent = %parent, "Role inheritance added");
        Ok(())
    }

    /// Permission check resolving transitively through inheritance.
    pub fn has_permission(&self, role: &str, permission: &str) -> bool {
        let state = self.read();
        let mut visited = HashSet::new();
        let mut pending = vec![role.to_string()];
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(entry) = state.roles.get(&name) {
                if entry.has_own_permission(permission) {
                    return true;
                }
                pending.extend(entry.inherits.iter().cloned());
            }
        }
        false
    }

    pub fn get_all_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.read().roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    /// True when `ancestor` is reachable from `role` through inheritance.
    fn is_ancestor(roles: &HashMap<String, Role>, ancestor: &str, role: &str) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![role.to_string()];
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(entry) = roles.get(&name) {
                if entry.inherits.contains(ancestor) {
                    return true;
                }
                pending.extend(entry.inherits.iter().cloned());
            }
        }
        false
    }

    fn read(&self) -> RwLockReadGuard<'_, RoleState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoleState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
