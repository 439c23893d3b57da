//! Prints the `VaultUnsealConfig` CRD manifest as YAML, for `kubectl apply -f -`.

#![allow(clippy::print_stdout)]

use kube::CustomResourceExt;
use vault_unseal_controller::VaultUnsealConfig;

fn main() -> anyhow::Result<()> {
    let crd = VaultUnsealConfig::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    print!("{yaml}");
    Ok(())
}
