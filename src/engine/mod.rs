//! The push-triggered deployment engine.

pub mod fetch;
pub mod packager;
pub mod pipeline;

pub use fetch::{CloneError, GitCliFetcher, SourceFetcher};
pub use packager::{Deployer, DeployError, ModalDeployer, PackageError};
pub use pipeline::{PushEvent, PushPipeline};
