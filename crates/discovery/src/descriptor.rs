use serde::{Deserialize, Serialize};

/// A single parameter of a discoverable method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodParam {
    pub name: String,
    pub type_name: Option<String>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl MethodParam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: None,
            required: true,
            default: None,
        }
    }

    pub fn with_type(mut self, type_name: &str) -> Self {
        self.type_name = Some(type_name.to_string());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A callable method exposed by a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<MethodParam>,
    pub return_type: Option<String>,
}

impl MethodDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            return_type: None,
        }
    }

    pub fn with_param(mut self, param: MethodParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_return_type(mut self, return_type: &str) -> Self {
        self.return_type = Some(return_type.to_string());
        self
    }
}

/// Structural metadata about the declaring type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DescriptorMetadata {
    pub namespace: String,
    pub short_name: String,
    pub is_abstract: bool,
    pub is_final: bool,
    /// Implemented interfaces (trait names in Rust sources).
    pub interfaces: Vec<String>,
    /// Reused behavior mixed into the type.
    pub mixins: Vec<String>,
    pub parent: Option<String>,
}

/// A catalog entry describing one discoverable capability. Immutable once
/// registered; re-registration under the same name replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDescriptor {
    /// Fully-qualified name, e.g. `services::billing::InvoiceService`.
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
    pub metadata: DescriptorMetadata,
}

impl ServiceDescriptor {
    pub fn new(name: &str) -> Self {
        let short_name = name.rsplit("::").next().unwrap_or(name).to_string();
        let namespace = name
            .strip_suffix(&format!("::{}", short_name))
            .unwrap_or("")
            .to_string();
        Self {
            name: name.to_string(),
            methods: Vec::new(),
            metadata: DescriptorMetadata {
                namespace,
                short_name,
                ..Default::default()
            },
        }
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.metadata.interfaces.push(interface.to_string());
        self
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name == name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.interfaces.iter().any(|i| i == tag)
            || self.metadata.mixins.iter().any(|m| m == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_splitting() {
        let descriptor = ServiceDescriptor::new("services::billing::InvoiceService");
        assert_eq!(descriptor.metadata.short_name, "InvoiceService");
        assert_eq!(descriptor.metadata.namespace, "services::billing");

        let bare = ServiceDescriptor::new("InvoiceService");
        assert_eq!(bare.metadata.short_name, "InvoiceService");
        assert_eq!(bare.metadata.namespace, "");
    }

    #[test]
    fn test_method_and_tag_lookup() {
        let descriptor = ServiceDescriptor::new("InvoiceService")
            .with_method(
                MethodDescriptor::new("issue")
                    .with_param(MethodParam::new("amount").with_type("u64"))
                    .with_return_type("Invoice"),
            )
            .with_interface("Billing");

        assert!(descriptor.has_method("issue"));
        assert!(!descriptor.has_method("void"));
        assert!(descriptor.has_tag("Billing"));
        assert!(!descriptor.has_tag("Reporting"));
    }
}
