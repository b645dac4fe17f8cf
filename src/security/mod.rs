pub mod audit_log;
pub mod authenticator;
pub mod diagnostics;
pub mod session_store;
pub mod token_refresh;
