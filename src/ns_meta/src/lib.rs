// ns_meta keeps a POSIX-like namespace in a relational database.
// FsSqlDriver does the work on a caller-supplied connection; NsMetaService wraps it
// in per-call transactions for async callers.

pub mod config;
pub mod dialect;
pub mod dir_stream;
pub mod driver;
pub mod schema;
pub mod service;

pub use config::DriverConfig;
pub use dialect::Dialect;
pub use dir_stream::DirectoryStream;
pub use driver::FsSqlDriver;
pub use service::NsMetaService;
