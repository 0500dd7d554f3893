//! `tabbridge-kernel` – rule enforcement.
//!
//! Nothing here talks to the bus or the network. The kernel decides what is
//! allowed and refuses everything else.
//!
//! # Modules
//!
//! - [`validator`] – [`ConfigValidator`][validator::ConfigValidator]: the
//!   fail-fast startup gate. Produces a
//!   [`ValidatedConfig`][validator::ValidatedConfig] carrying the
//!   button_name and sensor-topic indices.
//! - [`file_gateway`] – [`FileGateway`][file_gateway::FileGateway]: upload,
//!   download and browse policy resolution plus path containment.

pub mod file_gateway;
pub mod validator;

pub use file_gateway::{
    BrowseListing, DownloadTarget, FileEntry, FileGateway, StagedUpload, StoredFile,
};
pub use validator::{ConfigValidator, ValidatedConfig};
