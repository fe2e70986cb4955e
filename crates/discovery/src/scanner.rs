use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use steward_core::{DiscoveryConfig, Result};
use tracing::{debug, info};

use crate::descriptor::{DescriptorMetadata, MethodDescriptor, MethodParam, ServiceDescriptor};

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:#\[derive\(([^)]*)\)\]\n)?pub (struct|trait) (\w+)")
        .expect("type pattern")
});

static TRAIT_IMPL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^impl (\w+) for (\w+)").expect("trait impl pattern"));

static METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*pub (?:async )?fn (\w+)\(([^)]*)\)(?:\s*->\s*([^\{\n]+))?")
        .expect("method pattern")
});

/// Pluggable predicate deciding which discovered types are service
/// classes. Only matching types get a full descriptor.
pub trait ServiceProbe: Send + Sync {
    fn is_service(&self, path: &Path, type_name: &str, source: &str) -> bool;
}

/// Default probe: type names ending in a fixed suffix are services.
pub struct SuffixProbe {
    suffix: String,
}

impl SuffixProbe {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.to_string(),
        }
    }
}

impl Default for SuffixProbe {
    fn default() -> Self {
        Self::new("Service")
    }
}

impl ServiceProbe for SuffixProbe {
    fn is_service(&self, _path: &Path, type_name: &str, _source: &str) -> bool {
        type_name.ends_with(&self.suffix)
    }
}

/// Walks a source tree and builds service descriptors by syntactic match.
/// No parsing: declarations are recognized with line-anchored patterns,
/// and any file that cannot be read or yields nothing is skipped rather
/// than aborting the scan.
pub struct Scanner {
    config: DiscoveryConfig,
    probe: Box<dyn ServiceProbe>,
}

impl Scanner {
    pub fn new(config: DiscoveryConfig, probe: Box<dyn ServiceProbe>) -> Self {
        Self { config, probe }
    }

    pub fn with_defaults() -> Self {
        Self::new(DiscoveryConfig::default(), Box::<SuffixProbe>::default())
    }

    /// Scan the tree rooted at `root` and return descriptors for every
    /// recognized service type.
    pub fn scan(&self, root: &Path) -> Result<Vec<ServiceDescriptor>> {
        let mut descriptors = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    if dir == root {
                        return Err(e.into());
                    }
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    if !self.is_excluded(&path) {
                        pending.push(path);
                    }
                } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                    match std::fs::read_to_string(&path) {
                        Ok(source) => {
                            descriptors.extend(self.inspect_file(root, &path, &source));
                        }
                        Err(e) => {
                            debug!(file = %path.display(), error = %e, "Skipping unreadable file");
                        }
                    }
                }
            }
        }

        info!(count = descriptors.len(), root = %root.display(), "Discovery scan finished");
        Ok(descriptors)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.config.excluded_dirs.iter().any(|d| d == name))
            .unwrap_or(false)
    }

    fn inspect_file(&self, root: &Path, path: &Path, source: &str) -> Vec<ServiceDescriptor> {
        let namespace = module_path(root, path);
        let mut descriptors = Vec::new();

        for caps in TYPE_RE.captures_iter(source) {
            let kind = &caps[2];
            let type_name = &caps[3];
            if !self.probe.is_service(path, type_name, source) {
                continue;
            }

            let mixins: Vec<String> = caps
                .get(1)
                .map(|derives| {
                    derives
                        .as_str()
                        .split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty())
                        .collect()
                })
                .unwrap_or_default();

            let name = if namespace.is_empty() {
                type_name.to_string()
            } else {
                format!("{}::{}", namespace, type_name)
            };

            let descriptor = ServiceDescriptor {
                name,
                methods: extract_methods(source, type_name),
                metadata: DescriptorMetadata {
                    namespace: namespace.clone(),
                    short_name: type_name.to_string(),
                    is_abstract: kind == "trait",
                    is_final: kind == "struct",
                    interfaces: extract_interfaces(source, type_name),
                    mixins,
                    parent: None,
                },
            };
            debug!(service = %descriptor.name, methods = descriptor.methods.len(), "Service discovered");
            descriptors.push(descriptor);
        }
        descriptors
    }
}

/// Namespace of a file relative to the scan root, `::`-separated. `mod.rs`
/// and `lib.rs` contribute only their directory path.
fn module_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut parts: Vec<String> = relative
        .parent()
        .map(|p| {
            p.components()
                .filter_map(|c| c.as_os_str().to_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    if let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) {
        if stem != "mod" && stem != "lib" {
            parts.push(stem.to_string());
        }
    }
    parts.join("::")
}

/// Public methods of the inherent `impl` block for `type_name`, excluding
/// constructors.
fn extract_methods(source: &str, type_name: &str) -> Vec<MethodDescriptor> {
    let Some(body) = inherent_impl_body(source, type_name) else {
        return Vec::new();
    };

    METHOD_RE
        .captures_iter(body)
        .filter(|caps| !matches!(&caps[1], "new" | "default" | "drop"))
        .map(|caps| MethodDescriptor {
            name: caps[1].to_string(),
            params: parse_params(&caps[2]),
            return_type: caps.get(3).map(|r| r.as_str().trim().to_string()),
        })
        .collect()
}

fn inherent_impl_body<'a>(source: &'a str, type_name: &str) -> Option<&'a str> {
    let marker = format!("impl {} {{", type_name);
    let start = source.find(&marker)? + marker.len();
    let rest = &source[start..];
    // The impl block ends at the first brace back at column zero.
    let end = rest.find("\n}").unwrap_or(rest.len());
    Some(&rest[..end])
}

fn extract_interfaces(source: &str, type_name: &str) -> Vec<String> {
    TRAIT_IMPL_RE
        .captures_iter(source)
        .filter(|caps| &caps[2] == type_name)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn parse_params(raw: &str) -> Vec<MethodParam> {
    raw.split(',')
        .map(|p| p.trim())
        .filter(|p| !p.is_empty() && !p.ends_with("self"))
        .filter_map(|p| {
            let (name, type_name) = p.split_once(':')?;
            let type_name = type_name.trim();
            Some(MethodParam {
                name: name.trim().trim_start_matches("mut ").to_string(),
                type_name: Some(type_name.to_string()),
                required: !type_name.starts_with("Option<"),
                default: None,
            })
        })
        .collect()
}
