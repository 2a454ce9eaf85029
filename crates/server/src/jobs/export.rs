// crates/server/src/jobs/export.rs
//! Export: pack the application data directory into one bundle file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chatshell_core::archive::{bundle_file_name, BundleWriter};
use chatshell_core::data_dir::{collect_files, discard_dir};
use chatshell_core::{ExportSummary, JobResult};
use chrono::Utc;

use super::context::{JobContext, JobError};
use super::runner::JobOutput;

const SCANNED_PERCENT: f64 = 5.0;
const PACKED_PERCENT: f64 = 95.0;

/// Write a bundle of everything under `data_dir` into `out_dir`.
///
/// `out_dir` belongs to this job: on cancel or failure it is removed, so no
/// partial archive is ever left behind.
pub fn run(ctx: &JobContext, data_dir: &Path, out_dir: &Path) -> Result<JobOutput, JobError> {
    let guard = OutputDir::new(out_dir.to_path_buf());
    let output = pack(ctx, data_dir, out_dir)?;
    guard.keep();
    Ok(output)
}

fn pack(ctx: &JobContext, data_dir: &Path, out_dir: &Path) -> Result<JobOutput, JobError> {
    ctx.stage("scanning", "Scanning application data")?;
    let files = collect_files(data_dir)
        .map_err(|e| JobError::failed("Could not scan the application data", e))?;
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    let count = files.len();
    ctx.progress(
        SCANNED_PERCENT,
        format!("Found {count} files ({total_bytes} bytes)"),
    )?;

    std::fs::create_dir_all(out_dir)
        .map_err(|e| JobError::failed("Could not prepare the export folder", e))?;
    let file_name = bundle_file_name(Utc::now());
    let target = out_dir.join(&file_name);
    let partial = out_dir.join(format!("{file_name}.partial"));

    ctx.stage("packing", format!("Packing {count} files"))?;
    let file = File::create(&partial)
        .map_err(|e| JobError::failed("Could not create the archive", e))?;
    let mut writer = BundleWriter::new(BufWriter::new(file), count as u64)
        .map_err(|e| JobError::failed("Could not write the archive", e))?;

    let mut packed_bytes = 0u64;
    for (i, entry) in files.iter().enumerate() {
        ctx.checkpoint()?;
        let data = std::fs::read(&entry.path)
            .map_err(|e| JobError::failed(format!("Could not read {}", entry.name), e))?;
        writer
            .append(&entry.name, &data)
            .map_err(|e| JobError::failed("Could not write the archive", e))?;
        packed_bytes += data.len() as u64;
        ctx.progress(
            packing_percent(packed_bytes, total_bytes, i + 1, count),
            format!("Packed {}/{count} files", i + 1),
        )?;
    }

    ctx.stage("finalizing", "Finalizing archive")?;
    let mut buffered = writer
        .finish()
        .map_err(|e| JobError::failed("Could not finish the archive", e))?;
    buffered
        .flush()
        .map_err(|e| JobError::failed("Could not finish the archive", e))?;
    let file = buffered
        .into_inner()
        .map_err(|e| JobError::failed("Could not finish the archive", e.into_error()))?;
    file.sync_all()
        .map_err(|e| JobError::failed("Could not finish the archive", e))?;
    drop(file);

    std::fs::rename(&partial, &target)
        .map_err(|e| JobError::failed("Could not finish the archive", e))?;
    let size_bytes = std::fs::metadata(&target)
        .map_err(|e| JobError::failed("Could not finish the archive", e))?
        .len();

    Ok(JobOutput::new(JobResult::Export(ExportSummary {
        file_name,
        size_bytes,
        entry_count: count as u64,
    }))
    .with_artifact(target))
}

/// Byte-weighted progress through the packing stage; falls back to the file
/// count when every file is empty.
fn packing_percent(done_bytes: u64, total_bytes: u64, done_files: usize, total_files: usize) -> f64 {
    let fraction = if total_bytes > 0 {
        done_bytes as f64 / total_bytes as f64
    } else if total_files > 0 {
        done_files as f64 / total_files as f64
    } else {
        1.0
    };
    SCANNED_PERCENT + (PACKED_PERCENT - SCANNED_PERCENT) * fraction.clamp(0.0, 1.0)
}

/// Removes the job's output directory on drop unless [`keep`](Self::keep) ran.
struct OutputDir {
    path: Option<PathBuf>,
}

impl OutputDir {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for OutputDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            discard_dir(&path);
        }
    }
}
