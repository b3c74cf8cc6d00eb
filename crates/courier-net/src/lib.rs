// Transport layer: request/response types and the reqwest-backed HTTP client.

pub mod error;
pub mod http;
pub mod transport;

pub use error::TransportError;
pub use http::HttpTransport;
pub use transport::{Method, Request, Response, ResponseHeaders, Transport};
