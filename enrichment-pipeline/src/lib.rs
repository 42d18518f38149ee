#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod dispatcher;
pub mod handlers;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use handlers::{HandlerRegistry, JobHandler};
