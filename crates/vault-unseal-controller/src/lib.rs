pub mod crd;
pub mod descriptor_source;
pub mod metrics;
pub mod pod_watcher;
pub mod processor;
pub mod reconciler;

pub use crd::{VaultUnsealConfig, VaultUnsealConfigSpec, VaultUnsealConfigStatus};
pub use descriptor_source::{selector_matches, DescriptorSource};
pub use metrics::Metrics;
pub use processor::{CooldownRecord, UnsealProcessor, UnsealRequest};
pub use reconciler::{error_policy, reconcile, ReconcilerContext};
