//! The per-file conversion loop and the deletion phase that follows it.

use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::Result;
use fs_err as fs;
use log::{debug, error, info, warn};

use crate::{
    auth::Session,
    config::Config,
    confirm::Confirm,
    drive_api::{FileFilter, RemoteFileRef, RemoteStore},
    transcode::transcode,
};

const OUTPUT_EXTENSION: &str = "jpg";

/// One successfully converted remote file.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub input: RemoteFileRef,
    pub output_path: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl ConversionResult {
    /// How much smaller the output is than the download, in percent.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }

        (1.0 - self.compressed_size as f64 / self.original_size as f64) * 100.0
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub listed: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub deleted: usize,
    pub results: Vec<ConversionResult>,
}

/// Where the converted version of `remote_name` goes: same base name, JPEG
/// extension, inside `output_dir`. Names without a base name (empty, `.` or
/// `..`) have nowhere to go.
pub fn output_path(output_dir: &Path, remote_name: &str) -> Option<PathBuf> {
    let mut file_name = Path::new(remote_name).file_stem()?.to_os_string();
    file_name.push(".");
    file_name.push(OUTPUT_EXTENSION);

    Some(output_dir.join(file_name))
}

/// Converts every listed file that has no output yet, then offers to delete
/// the remote originals of the ones that made it. Only a failed listing is
/// returned as an error; per-file failures are logged and counted.
pub async fn run_batch(
    store: &dyn RemoteStore,
    session: &Session,
    config: &Config,
    confirm: &mut dyn Confirm,
) -> Result<BatchReport> {
    let files = store
        .list_matching(
            session,
            &FileFilter::heic(),
            config.folder_id.as_deref(),
            config.all_pages,
        )
        .await?;

    let mut report = BatchReport {
        listed: files.len(),
        ..BatchReport::default()
    };

    if files.is_empty() {
        info!("No HEIC files found");
        return Ok(report);
    }

    info!("Found {} HEIC files", files.len());

    for file in files {
        let Some(output_path) = output_path(&config.output_dir, &file.name) else {
            warn!("Skipping {:?} ({}): name has no usable base name", file.name, file.id);
            report.skipped += 1;
            continue;
        };

        if output_path.exists() {
            info!("Skipping {} (already exists)", file.name);
            report.skipped += 1;
            continue;
        }

        info!("Processing {}...", file.name);
        debug!(
            "{} is {} bytes, created {}",
            file.id, file.size_bytes, file.created_at
        );

        match convert(store, session, config, &file, &output_path).await {
            Ok(result) => {
                info!(
                    "Converted {} -> {} ({}KB -> {}KB, {:.1}% smaller)",
                    file.name,
                    result.output_path.display(),
                    result.original_size / 1024,
                    result.compressed_size / 1024,
                    result.compression_ratio()
                );
                report.processed += 1;
                report.results.push(result);
            }
            Err(err) => {
                error!("Error processing {}: {:#}", file.name, err);
                report.failed += 1;
            }
        }
    }

    info!("Successfully processed {} files", report.processed);

    if !report.results.is_empty() {
        let approved = config.auto_delete || confirm.confirm_deletion(report.results.len());

        if approved {
            for result in &report.results {
                match store.delete(session, &result.input).await {
                    Ok(()) => {
                        info!("Deleted original HEIC file: {}", result.input.name);
                        report.deleted += 1;
                    }
                    Err(err) => error!("Error deleting file {}: {}", result.input.name, err),
                }
            }

            info!(
                "Deleted {} original HEIC files from Google Drive",
                report.deleted
            );
        }
    }

    debug!(
        "{} listed, {} skipped, {} failed",
        report.listed, report.skipped, report.failed
    );
    info!(
        "Run complete: {} processed, {} deleted",
        report.processed, report.deleted
    );

    Ok(report)
}

async fn convert(
    store: &dyn RemoteStore,
    session: &Session,
    config: &Config,
    file: &RemoteFileRef,
    output_path: &Path,
) -> Result<ConversionResult> {
    let source = store.fetch(session, file).await?;
    let jpeg = transcode(&source, config.quality, config.max_dimensions)?;
    write_output(output_path, &jpeg)?;

    Ok(ConversionResult {
        input: file.clone(),
        output_path: output_path.to_owned(),
        original_size: source.len() as u64,
        compressed_size: jpeg.len() as u64,
    })
}

/// Writes through a `.part` file and renames it into place, so an output path
/// only ever holds a complete image.
fn write_output(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let partial = path.with_extension(format!("{}.part", OUTPUT_EXTENSION));
    let written = fs::write(&partial, contents).and_then(|()| fs::rename(&partial, path));

    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }

    written
}
