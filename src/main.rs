use std::{env, sync::Arc};

use anyhow::Result;
use futures::StreamExt;
use kube::{
    runtime::{controller::Controller, watcher},
    Api, Client, CustomResourceExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spark_history_operator::reconciler::{error_policy, reconcile, Data};
use spark_history_operator::sparkhistory_types::SparkHistory;
use spark_history_operator::store::KubeStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or("");
    if cmd == "export" {
        info!("exporting custom resource definition");
        println!("{}", serde_yaml::to_string(&SparkHistory::crd())?);
        Ok(())
    } else if cmd == "run" {
        info!("running spark-history-operator");
        let client = Client::try_default().await?;
        let histories = Api::<SparkHistory>::all(client.clone());
        let data = Data {
            store: KubeStore::new(client),
        };

        Controller::new(histories, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, Arc::new(data))
            .for_each(|res| async move {
                match res {
                    Ok(o) => info!("reconciled {:?}", o),
                    Err(e) => warn!("reconcile failed: {}", e),
                }
            })
            .await;
        info!("controller terminated");
        Ok(())
    } else {
        warn!("wrong command; please use \"export\" or \"run\"");
        Ok(())
    }
}
