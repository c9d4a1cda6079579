use std::io;
use std::path::Path;

use serde::Deserialize;
use tokio::fs;

use crate::error::RunnerError;

/// How the image is placed where the boot loader fetches it.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StagingMode {
    #[default]
    Symlink,
    Copy,
}

fn failure(path: &Path) -> impl FnOnce(io::Error) -> RunnerError + '_ {
    move |source| RunnerError::StagingFailure {
        path: path.to_path_buf(),
        source,
    }
}

/// Replaces whatever is at `target` with `image`. The uploaded image itself
/// is never moved.
pub async fn stage(image: &Path, target: &Path, mode: StagingMode) -> Result<(), RunnerError> {
    let meta = fs::metadata(image).await.map_err(failure(image))?;
    if !meta.is_file() {
        return Err(failure(image)(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(failure(parent))?;
    }
    match fs::remove_file(target).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(failure(target)(e)),
    }

    match mode {
        StagingMode::Symlink => link(image, target).await?,
        StagingMode::Copy => {
            fs::copy(image, target).await.map_err(failure(target))?;
        }
    }
    log::debug!("staged {} at {}", image.display(), target.display());
    Ok(())
}

#[cfg(unix)]
async fn link(image: &Path, target: &Path) -> Result<(), RunnerError> {
    let image = fs::canonicalize(image).await.map_err(failure(image))?;
    fs::symlink(&image, target).await.map_err(failure(target))
}

#[cfg(not(unix))]
async fn link(image: &Path, target: &Path) -> Result<(), RunnerError> {
    log::warn!("symlinks unsupported here, copying {}", image.display());
    fs::copy(image, target).await.map_err(failure(target))?;
    Ok(())
}
