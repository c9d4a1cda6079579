use futures_util::StreamExt;
use judgerlib::queue::JobQueue;
use judgerlib::results::{ResultReader, TaskPhase};
use judgerlib::task::{is_plain_id, new_submission_id, Task, MAX_TIME_LIMIT};
use log::{error, info, warn};
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::response::stream::ByteStream;
use rocket::serde::json::Json;
use rocket::{get, post, FromForm, State};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::errors::AppError;

#[derive(FromForm)]
pub struct Submission<'r> {
    file: TempFile<'r>,
    time_limit: i64,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct RoSubmitted {
    id: String,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct RoQueue {
    queue_size: usize,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct RoTaskStatus {
    id: String,
    status: TaskPhase,
}

#[post("/submit", data = "<submission>")]
pub async fn tasks_submit(
    mut submission: Form<Submission<'_>>,
    queue: &State<JobQueue>,
    cfg: &State<ServerConfig>,
) -> Result<Json<RoSubmitted>, AppError> {
    if submission.time_limit <= 0 || submission.time_limit as u64 > MAX_TIME_LIMIT {
        return Err(AppError::HttpError(Status::BadRequest));
    }
    if submission.file.len() > cfg.max_file_size_bytes {
        return Err(AppError::HttpError(Status::PayloadTooLarge));
    }

    let id = new_submission_id();
    tokio::fs::create_dir_all(&cfg.upload_dir).await?;
    let stored_path = cfg.upload_dir.join(format!("{id}.img"));
    submission.file.copy_to(&stored_path).await?;
    let stored_path = tokio::fs::canonicalize(&stored_path).await?;

    let task = Task::new(id, stored_path.clone(), submission.time_limit as u64)?;
    if let Err(e) = queue.enqueue(&task).await {
        if let Err(rm) = tokio::fs::remove_file(&stored_path).await {
            warn!("could not remove {}: {}", stored_path.display(), rm);
        }
        return Err(e.into());
    }

    info!("submission stored: {} -> {}", task.id(), stored_path.display());
    Ok(Json(RoSubmitted {
        id: task.id().to_string(),
    }))
}

#[get("/queue")]
pub async fn queue_size(queue: &State<JobQueue>) -> Result<Json<RoQueue>, AppError> {
    let queue_size = queue.size().await?;
    Ok(Json(RoQueue { queue_size }))
}

#[get("/tasks/<id>")]
pub async fn tasks_status(
    id: String,
    reader: &State<ResultReader>,
) -> Result<Json<RoTaskStatus>, AppError> {
    if !is_plain_id(&id) {
        return Err(AppError::HttpError(Status::NotFound));
    }
    let status = reader.phase(&id).await?;
    Ok(Json(RoTaskStatus { id, status }))
}

#[get("/tasks/<id>/result")]
pub async fn tasks_result(
    id: String,
    reader: &State<ResultReader>,
) -> Result<ByteStream![Vec<u8>], AppError> {
    if !is_plain_id(&id) {
        return Err(AppError::HttpError(Status::NotFound));
    }
    let output = reader.follow(&id);

    Ok(ByteStream! {
        let mut output = Box::pin(output);
        while let Some(part) = output.next().await {
            match part {
                Ok(bytes) => yield bytes,
                Err(e) => {
                    error!("result stream of {} broke off: {}", id, e);
                    break;
                }
            }
        }
    })
}
