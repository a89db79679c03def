//! Prints the CRD manifests as a multi-document YAML stream.

use crds::{ClusterLogConfig, Interceptor, LogConfig, Sink, Vm};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        LogConfig::crd(),
        ClusterLogConfig::crd(),
        Sink::crd(),
        Interceptor::crd(),
        Vm::crd(),
    ];

    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }

    Ok(())
}
