pub mod client;
pub mod error;
pub mod request;
pub mod transport;

#[cfg(test)]
pub mod mock;

pub use client::GenieClient;
pub use error::ApiError;
pub use request::{FileUpload, GenerateRequest};
pub use transport::{ApiRequest, ByteStream, HttpTransport, Method, Service, Transport};
