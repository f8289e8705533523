//! Rate-limited client for the Discord REST API.
//!
//! Every outbound call goes through [`RequestHandler::request`], which picks
//! the [`SequentialBucket`] for the call's route and resource and queues the
//! request there. Buckets learn their real limits from response headers;
//! the handler keeps the global limit that gates all of them.

mod bucket;
pub mod endpoints;
mod handler;
mod mutex;
mod request;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use bucket::SequentialBucket;
pub use handler::RequestHandler;
pub use mutex::{SequentialGuard, SequentialMutex};
pub use request::{major_parameter, route_for, HttpMethod, Request, RequestOptions};
pub use transport::{PreparedRequest, RawResponse, Transport};

#[cfg(feature = "io")]
pub use transport::ReqwestTransport;
