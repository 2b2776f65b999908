pub mod linter;
pub mod version_resolver;
pub mod wheel_verifier;

pub use linter::CommandLinter;
pub use version_resolver::{
    FilenameLookup, GitTagLookup, InstalledPackageLookup, ResolvedVersion, VersionMismatch,
    VersionLookup, VersionResolver, is_valid_version, normalize_version,
};
pub use wheel_verifier::ArtifactVerifier;
