pub mod api;
pub mod error;
pub mod net;

// Re-exports for convenience
pub use api::{CommandAck, PlotterApi, ProgressFn, UploadSource};
pub use error::TransportError;
pub use net::{default_http_client, normalize_base_url, HttpPlotterApi};
