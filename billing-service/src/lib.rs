pub mod api;
pub mod app;
pub mod backend;
pub mod billing;
pub mod clock;
pub mod config;
pub mod error;
pub mod household;
pub mod ledger;
pub mod metrics_server;
pub mod observability;
pub mod reports;
pub mod session;
pub mod submission;

pub use app::App;
pub use error::{BackendFailure, BillingError, ValidationErrors};
