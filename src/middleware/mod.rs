pub mod logging;
pub mod security;

pub use logging::request_logging_middleware;
pub use security::security_headers_middleware;
