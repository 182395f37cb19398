//! Recipe templates shared by every client of the catalog.

pub mod kubernetes;
pub mod rollup;
pub mod source;

pub use kubernetes::{KubernetesConfig, ResourceConfig, WorkloadConfig};
pub use rollup::RollupRecipe;

/// Group every service account joins, so the shared JWT file is readable.
pub const SHARED_GROUP: &str = "eth";

/// Remote directory holding start scripts.
pub const SCRIPTS_DIR: &str = "/data/scripts";
