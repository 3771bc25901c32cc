use anyhow::Context;
use kube::CustomResourceExt;
use workload_apps_operator::crd::{App, AppCatalog, Cluster, Release};

fn main() -> anyhow::Result<()> {
    for crd in [App::crd(), AppCatalog::crd(), Release::crd(), Cluster::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("serializing {name}"))?;
        println!("---");
        print!("{yaml}");
    }
    Ok(())
}
