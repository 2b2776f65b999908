pub mod github_plugin;
pub mod pypi_plugin;
pub mod registry_client;

pub use github_plugin::GitHubReleaseHost;
pub use pypi_plugin::PyPiIndex;
pub use registry_client::{RemoteRegistryClient, UPLOAD_TIMEOUT_FACTOR};
