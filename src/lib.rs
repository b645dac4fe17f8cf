pub mod gateway;
pub mod security;
pub mod transport;
pub mod utils;

pub use gateway::{ApiGateway, AuthSeed, GatewayConfig, GatewayError, LogoutNavigator};
pub use transport::{ApiRequest, ApiResponse, RequestOptions};

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
