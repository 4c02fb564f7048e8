use chrono::Duration;

use crate::models::job::{JobFile, JobOutput};
use crate::models::media::{extension_for_mime, extension_of};
use crate::services::storage::{ObjectStore, StorageError};

/// Describe every media output as a downloadable file.
///
/// Files are named `file{i}.{ext}` in output order; the extension comes from
/// the mime type, then the URI, then falls back to `bin`. Text output has no
/// files and yields `None`.
pub async fn build_files(
    output: &JobOutput,
    storage: &dyn ObjectStore,
    url_ttl: Duration,
) -> Result<Option<Vec<JobFile>>, StorageError> {
    let JobOutput::Media(media) = output else {
        return Ok(None);
    };
    if media.is_empty() {
        return Ok(None);
    }

    let mut files = Vec::with_capacity(media.len());
    for (index, item) in media.iter().enumerate() {
        let extension = item
            .mime_type
            .as_deref()
            .and_then(extension_for_mime)
            .map(str::to_string)
            .or_else(|| extension_of(&item.uri))
            .unwrap_or_else(|| "bin".to_string());

        let url = storage.sign_url(&item.uri, url_ttl).await?;
        files.push(JobFile {
            name: format!("file{index}.{extension}"),
            uri: item.uri.clone(),
            url,
            mime_type: item.mime_type.clone(),
            size: item.size,
        });
    }
    Ok(Some(files))
}
