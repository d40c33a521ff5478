use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::AppResult;
use crate::report::Report;

/// Serialize every report, then write them next to `output`.
///
/// Nothing touches the disk until all reports have serialized, so a failing view
/// never leaves a partial set of artifacts behind.
#[tracing::instrument(name = "Saving reports to disk", level = "debug", skip(reports))]
pub async fn write_reports<P: AsRef<Path> + std::fmt::Debug>(
    output: P,
    reports: &[Report],
) -> AppResult<Vec<PathBuf>> {
    let rendered = reports
        .iter()
        .map(|report| Ok((report.path_for(output.as_ref()), serde_json::to_string_pretty(report)?)))
        .collect::<AppResult<Vec<(PathBuf, String)>>>()?;

    let mut written = Vec::with_capacity(rendered.len());
    for (path, data) in rendered {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        write_file(&path, data).await?;
        info!("Saved {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Write raw string data to a file, overwriting any existing content.
async fn write_file<P: AsRef<Path> + std::fmt::Debug>(output: P, data: String) -> AppResult<()> {
    debug!("Writing {:?}", output);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(output)
        .await?;
    file.write_all(data.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
