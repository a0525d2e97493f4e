pub mod app_core;
mod async_runtime;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod kernel;
pub mod poller;
pub mod repository;
pub mod uploads;
pub mod viewmodel;

pub use app_core::*;
pub use dispatcher::{CommandDispatcher, CommandHandle, DispatchSettings};
pub use domain::{ClientSettings, Connectivity, ReconciledState, StatusSource};
pub use error::ClientError;
pub use kernel::SyncKernel;
pub use poller::{PollOutcome, PollerSnapshot, StatusPoller};
pub use repository::ProjectRepository;
pub use uploads::{UploadCoordinator, UploadHandle};
pub use viewmodel::*;

pub use plotter_infra::{PlotterApi, UploadSource};
