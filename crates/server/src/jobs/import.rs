// crates/server/src/jobs/import.rs
//! Import: verify a bundle, unpack it beside the live data, then swap.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatshell_core::archive::BundleReader;
use chatshell_core::data_dir::{discard_dir, staging_dir, swap_in, write_staged};
use chatshell_core::{ArchiveError, ImportSummary, JobResult};

use super::context::{JobContext, JobError};
use super::runner::JobOutput;

const OPENED_PERCENT: f64 = 5.0;
const EXTRACTED_PERCENT: f64 = 90.0;

/// Replace `data_dir` with the contents of the bundle at `source`.
///
/// The live directory is untouched until every entry has been verified and
/// written to staging. Cancellation is honoured up to the swap; once the
/// swap starts the import runs to completion.
pub fn run(ctx: &JobContext, source: &Path, data_dir: &Path) -> Result<JobOutput, JobError> {
    ctx.stage("verifying", "Opening backup archive")?;
    let file = File::open(source)
        .map_err(|e| JobError::failed("Could not open the backup archive", e))?;
    let total_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
    let consumed = Arc::new(AtomicU64::new(0));
    let counted = CountingReader {
        inner: file,
        consumed: Arc::clone(&consumed),
    };
    let mut bundle = BundleReader::open(BufReader::new(counted)).map_err(invalid_archive)?;
    let expected = bundle.header().entry_count;
    ctx.progress(OPENED_PERCENT, format!("Archive holds {expected} files"))?;

    let staging = StagingDir::create(staging_dir(data_dir, ctx.id()))?;

    ctx.stage("extracting", format!("Extracting {expected} files"))?;
    let mut entry_count = 0u64;
    let mut bytes_written = 0u64;
    loop {
        ctx.checkpoint()?;
        let Some(entry) = bundle.next_entry().map_err(invalid_archive)? else {
            break;
        };
        write_staged(staging.path(), &entry.path, &entry.data).map_err(|e| {
            JobError::failed(format!("Could not write {}", entry.path.display()), e)
        })?;
        entry_count += 1;
        bytes_written += entry.data.len() as u64;
        ctx.progress(
            extract_percent(consumed.load(Ordering::Relaxed), total_bytes),
            format!("Extracted {entry_count}/{expected} files"),
        )?;
    }

    ctx.stage("swapping", "Replacing application data")?;
    swap_in(data_dir, staging.path(), ctx.id())
        .map_err(|e| JobError::failed("Could not replace the application data", e))?;
    staging.release();

    Ok(JobOutput::new(JobResult::Import(ImportSummary {
        entry_count,
        bytes_written,
    })))
}

fn invalid_archive(err: ArchiveError) -> JobError {
    match err {
        ArchiveError::Io(e) => JobError::failed("Could not read the backup archive", e),
        other => JobError::failed("The backup archive is invalid", other),
    }
}

/// Compressed bytes consumed mapped onto the extracting stage.
fn extract_percent(consumed: u64, total: u64) -> f64 {
    if total == 0 {
        return OPENED_PERCENT;
    }
    let fraction = (consumed as f64 / total as f64).clamp(0.0, 1.0);
    OPENED_PERCENT + (EXTRACTED_PERCENT - OPENED_PERCENT) * fraction
}

struct CountingReader<R> {
    inner: R,
    consumed: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Staging directory removed on drop unless the swap consumed it.
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    fn create(path: PathBuf) -> Result<Self, JobError> {
        discard_dir(&path);
        std::fs::create_dir_all(&path)
            .map_err(|e| JobError::failed("Could not prepare the import staging area", e))?;
        Ok(Self { path, armed: true })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.armed {
            discard_dir(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatshell_core::archive::BundleWriter;
    use chatshell_core::data_dir::collect_files;
    use chatshell_core::{JobKind, JobPatch, JobStore};
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::RecvError;

    fn context() -> (Arc<JobStore>, JobContext) {
        let store = Arc::new(JobStore::new());
        let id = store.create(JobKind::Import);
        store.update(&id, JobPatch::running("verifying")).unwrap();
        (Arc::clone(&store), JobContext::new(id, store))
    }

    fn write_bundle(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = BundleWriter::new(File::create(path).unwrap(), entries.len() as u64).unwrap();
        for (name, data) in entries {
            writer.append(name, data).unwrap();
        }
        writer.finish().unwrap();
    }

    fn live_files(root: &Path) -> Vec<(String, Vec<u8>)> {
        collect_files(root)
            .unwrap()
            .into_iter()
            .map(|f| (f.name, std::fs::read(f.path).unwrap()))
            .collect()
    }

    #[test]
    fn test_import_replaces_data() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        write_staged(&data, Path::new("stale.txt"), b"old").unwrap();
        let source = tmp.path().join("backup.chatshell.gz");
        write_bundle(
            &source,
            &[("chats/1.json", b"[1]".as_slice()), ("settings.json", b"{}".as_slice())],
        );
        let (store, ctx) = context();

        let output = run(&ctx, &source, &data).unwrap();

        assert_eq!(
            output.result,
            JobResult::Import(ImportSummary {
                entry_count: 2,
                bytes_written: 5,
            })
        );
        assert_eq!(
            live_files(&data),
            vec![
                ("chats/1.json".to_string(), b"[1]".to_vec()),
                ("settings.json".to_string(), b"{}".to_vec()),
            ]
        );
        assert!(!staging_dir(&data, ctx.id()).exists());
        assert_eq!(store.get(ctx.id()).unwrap().stage, "swapping");
    }

    #[test]
    fn test_invalid_archive_fails_and_keeps_data() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        write_staged(&data, Path::new("keep.txt"), b"keep").unwrap();
        let source = tmp.path().join("notes.txt");
        std::fs::write(&source, b"definitely not a bundle").unwrap();
        let (_store, ctx) = context();

        let err = run(&ctx, &source, &data).unwrap_err();

        let JobError::Failed(reason) = err else {
            panic!("expected a failure");
        };
        assert!(reason.starts_with("The backup archive is invalid"), "{reason}");
        assert_eq!(live_files(&data), vec![("keep.txt".to_string(), b"keep".to_vec())]);
    }

    #[test]
    fn test_missing_source_fails_readably() {
        let tmp = tempfile::tempdir().unwrap();
        let (_store, ctx) = context();
        let err = run(&ctx, &tmp.path().join("gone.gz"), &tmp.path().join("data")).unwrap_err();
        assert!(matches!(err, JobError::Failed(ref r) if r.starts_with("Could not open the backup archive")));
    }

    #[test]
    fn test_cancel_before_start_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        write_staged(&data, Path::new("keep.txt"), b"keep").unwrap();
        let source = tmp.path().join("backup.chatshell.gz");
        write_bundle(&source, &[("new.txt", b"new".as_slice())]);
        let (store, ctx) = context();
        store.request_cancel(ctx.id()).unwrap();

        assert_eq!(run(&ctx, &source, &data), Err(JobError::Cancelled));
        assert_eq!(live_files(&data), vec![("keep.txt".to_string(), b"keep".to_vec())]);
        assert_eq!(store.get(ctx.id()).unwrap().stage, "verifying");
    }

    #[test]
    fn test_cancel_mid_extraction_discards_staging() {
        const ENTRIES: usize = 3000;
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        write_staged(&data, Path::new("keep.txt"), b"keep").unwrap();
        let source = tmp.path().join("backup.chatshell.gz");
        let names: Vec<String> = (0..ENTRIES).map(|i| format!("chats/{i:05}.json")).collect();
        let entries: Vec<(&str, &[u8])> = names
            .iter()
            .map(|n| (n.as_str(), b"[\"message\"]".as_slice()))
            .collect();
        write_bundle(&source, &entries);
        let (store, ctx) = context();
        let staging = staging_dir(&data, ctx.id());

        // Cancel as soon as any extracted entry is reported. Reaching the
        // swap first means the cancel came too late.
        let mut events = store.subscribe();
        let canceller = {
            let store = Arc::clone(&store);
            let id = ctx.id().to_string();
            let staging = staging.clone();
            std::thread::spawn(move || loop {
                match events.blocking_recv() {
                    Ok(job) if job.message.starts_with("Extracted ") => {
                        let staged = staging.join("chats").join("00000.json").is_file();
                        store.request_cancel(&id).unwrap();
                        return staged;
                    }
                    Ok(job) if job.stage == "swapping" => return false,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return false,
                }
            })
        };

        let result = run(&ctx, &source, &data);
        let staged_before_cancel = canceller.join().unwrap();

        assert_eq!(result, Err(JobError::Cancelled));
        assert!(staged_before_cancel, "cancel should land after staging was written");
        assert!(!staging.exists());
        assert_eq!(live_files(&data), vec![("keep.txt".to_string(), b"keep".to_vec())]);
        let job = store.get(ctx.id()).unwrap();
        assert_eq!(job.stage, "extracting");
        assert!(job.cancel_requested);
    }

    #[test]
    fn test_extract_percent_bounds() {
        assert_eq!(extract_percent(0, 0), OPENED_PERCENT);
        assert_eq!(extract_percent(50, 100), 47.5);
        assert_eq!(extract_percent(500, 100), EXTRACTED_PERCENT);
    }
}
