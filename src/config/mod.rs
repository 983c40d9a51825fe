pub mod error;
pub mod load;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_server_config, BIND_ENV, CONFIG_PATH_ENV, DATABASE_ENV};
pub use settings::{ProviderUrls, ProxyConfig, ServerConfig};
