pub mod adapter;
pub mod error;
pub mod http;
pub mod registry;
pub mod types;
pub mod vendors;

pub use adapter::EsimProvider;
pub use error::{ProviderError, ProviderResult};
pub use registry::{ProviderRecord, ProviderRegistry, ProviderResolver, RegistryError};
