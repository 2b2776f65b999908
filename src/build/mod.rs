//! Build variants, wheel discovery and the command build collaborator

pub mod command_builder;
pub mod discovery;
pub mod variants;

pub use command_builder::CommandBuilder;
pub use discovery::{WheelFilename, find_wheels, newest_wheel_for, python_version_for, wheels_for};
pub use variants::{BuildConfig, VariantConfig, VariantFlags};
