use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::error;

/// Reads a JSON snapshot, falling back to the default value when the file is
/// absent or unreadable.
pub async fn load_data<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(data) => data,
            Err(err) => {
                error!("failed to parse data file {}: {err}", path.display());
                T::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(err) => {
            error!("failed to read data file {}: {err}", path.display());
            T::default()
        }
    }
}

pub async fn persist_data<T: Serialize>(path: &Path, data: &T) -> Result<(), std::io::Error> {
    let payload = serde_json::to_vec_pretty(data)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(path, payload).await
}
