pub mod descriptor;
pub mod registry;
pub mod scanner;

pub use descriptor::{DescriptorMetadata, MethodDescriptor, MethodParam, ServiceDescriptor};
pub use registry::ServiceRegistry;
pub use scanner::{Scanner, ServiceProbe, SuffixProbe};
