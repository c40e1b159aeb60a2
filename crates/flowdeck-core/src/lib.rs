pub mod config;
pub mod delivery;
pub mod error;
pub mod model;
pub mod policy;
pub mod security;
pub mod validation;

pub use config::{
    AppConfig, AuthConfig, ChatConfig, ConfigManager, DatabaseConfig, LoggingConfig,
    ServerConfig, Settings,
};
pub use delivery::*;
pub use error::*;
pub use model::*;
pub use security::{
    AuthContext, JwtManager, PasswordHasher, SecurityError, SecurityEvent, SecurityLogger,
};
