//! The integration between [`tracing`] and [`scopeflow`].
//!
//! - [`fields`]: conventional names and representations for the fields
//!   logged while processing a request.
//! - [`RootSpan`]: the top-level span for a request, enriched with its outcome.
//! - [`log_failure`]: a ready-made error observer.
//!
//! [`tracing`]: https://docs.rs/tracing
pub mod fields;
mod observer;
mod root_span;

pub use observer::log_failure;
pub use root_span::RootSpan;
