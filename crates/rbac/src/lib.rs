pub mod audit;
pub mod policy;
pub mod role;

pub use audit::{ActionAudit, AuditEntry, AuditFilter};
pub use policy::{Policy, PolicyRule, RuleEffect, SecurityPolicyManager};
pub use role::{Role, RoleManager};
