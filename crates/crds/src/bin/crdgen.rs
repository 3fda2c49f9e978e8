//! Prints the CRD manifests as a multi-document YAML stream.

use crds::{Infrastructure, Machine};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Machine::crd(), Infrastructure::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
