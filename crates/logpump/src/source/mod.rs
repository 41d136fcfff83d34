//! Log source collaborators.
//!
//! - `traits`: the fetch contract the iteration executor depends on
//! - `http`: a FilterLogEvents client over HTTP

mod http;
mod traits;

pub use http::HttpLogSource;
pub use traits::{FetchPage, FetchRequest, LogSource};
