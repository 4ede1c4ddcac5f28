pub mod common;
pub mod document;
pub mod manifest;
pub mod olm;

pub use document::ResourceDocument;
pub use manifest::{InstallManifest, ManifestRole, ManifestSet, ManifestTemplates, OperatorScope};
