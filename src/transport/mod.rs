//! The `transport` module is responsible for the network side of the
//! client: Bayeux over HTTP long-polling.
//!
//! `http` is the thin seam to the HTTP stack (`reqwest` by default) and
//! `long_polling` owns the request/response cycle against the server
//! endpoint.

pub mod http;
pub mod long_polling;

pub use http::{HttpClient, HttpError, HttpResponse, ReqwestHttpClient};
pub use long_polling::{LongPollingTransport, TransportOwner};
