//! Asset pipeline for the `waverun` binary: manifest loading, the registry
//! builder and the leaf actions it wires together.

pub mod cli;
pub mod leaves;
pub mod manifest;
pub mod pipeline;

pub use cli::{execute, Args};
pub use leaves::{Variant, Workspace};
pub use manifest::{BuildManifest, ManifestError};
pub use pipeline::build_registry;
