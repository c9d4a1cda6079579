use std::sync::Arc;

use judgerlib::broker::{Broker, RedisBroker};
use judgerlib::config::layered;
use judgerlib::queue::JobQueue;
use judgerlib::results::{ArtifactStore, ResultChannel, ResultReader};
use log::info;
use rocket::figment::Figment;
use rocket::{routes, Build, Rocket};

use crate::config::{Config, ServerConfig};
use crate::tasks::{queue_size, tasks_result, tasks_status, tasks_submit};

mod config;
mod errors;
mod tasks;

// multipart framing on top of the file itself
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

fn build_rocket(
    figment: Figment,
    queue: JobQueue,
    reader: ResultReader,
    server: ServerConfig,
) -> Rocket<Build> {
    // one byte past the maximum still reaches the handler, which answers 413
    let file_limit = server.max_file_size_bytes + 1;
    let figment = figment
        .merge(("limits.file", file_limit))
        .merge(("limits.data-form", file_limit + FORM_OVERHEAD_BYTES));

    rocket::custom(figment)
        .manage(queue)
        .manage(reader)
        .manage(server)
        .mount(
            "/",
            routes![tasks_submit, queue_size, tasks_status, tasks_result],
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_module("judger", log::LevelFilter::Debug)
        .filter_module("judgerlib", log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let figment = layered(Figment::from(rocket::Config::default()));
    let app_config = figment.extract::<Config>()?;

    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&app_config.broker.url).await?);
    info!("connected to broker at {}", app_config.broker.url);

    let queue = JobQueue::new(broker.clone(), &app_config.broker);
    let reader = ResultReader::new(
        ResultChannel::new(broker, &app_config.broker),
        ArtifactStore::new(app_config.results.artifact_dir.clone()),
    );

    build_rocket(figment, queue, reader, app_config.server)
        .launch()
        .await?;

    Ok(())
}
