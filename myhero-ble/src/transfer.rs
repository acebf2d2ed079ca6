//! Chunked upload/download state machine
//!
//! At most one transfer exists. The open file and the chunk buffer live inside
//! the active variant of [`Slot`], so a second transfer cannot be represented
//! and the file handle disappears as soon as the transfer stops.
//!
//! ```text
//! Idle -> UploadPending   -> Uploading   -> Complete | Error -> Idle
//! Idle -> DownloadPending -> Downloading -> Complete | Error -> Idle
//! ```

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::*;
use myhero_proto::Progress;

use crate::files::Storage;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    UploadPending,
    Uploading,
    DownloadPending,
    Downloading,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    Upload,
    Download,
}

/// Result of accepting an upload chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// More bytes expected
    Ready,
    /// Declared size reached and verified on storage
    Complete,
}

/// Result of refilling the download buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// A chunk of this many bytes is buffered
    Ready(usize),
    /// End of file, the transfer is complete
    Complete,
    /// The read failed, the transfer is in the error state
    Failed,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub state: TransferState,
    pub direction: Direction,
    pub transferred: u32,
    pub total: u32,
}

impl TransferSnapshot {
    pub fn percent(&self) -> u8 {
        percent(self.transferred, self.total)
    }

    pub fn progress(&self) -> Progress {
        Progress { transferred: self.transferred, total: self.total }
    }
}

pub fn percent(transferred: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (u64::from(transferred) * 100 / u64::from(total)).min(u64::from(u8::MAX)) as u8
}

struct Upload {
    path: PathBuf,
    file: File,
    total: u32,
    transferred: u32,
    receiving: bool,
}

struct Download {
    path: PathBuf,
    file: File,
    total: u32,
    transferred: u32,
    buffer: Vec<u8>,
    chunk_len: usize,
    chunk_ready: bool,
    reading: bool,
}

struct Finished {
    direction: Direction,
    path: PathBuf,
    succeeded: bool,
    transferred: u32,
    total: u32,
}

enum Slot {
    Idle,
    Upload(Upload),
    Download(Download),
    Finished(Finished),
}

pub struct TransferEngine {
    storage: Storage,
    chunk_size: usize,
    slot: Slot,
    generation: u64,
    last: Progress,
}

impl TransferEngine {
    pub fn new(storage: Storage, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
            slot: Slot::Idle,
            generation: 0,
            last: Progress::default(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Chunk size for the next download; a running one keeps its buffer
    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Identifies the current transfer; bumped on every start and cancel
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> TransferState {
        match &self.slot {
            Slot::Idle => TransferState::Idle,
            Slot::Upload(u) if u.receiving => TransferState::Uploading,
            Slot::Upload(_) => TransferState::UploadPending,
            Slot::Download(d) if d.reading => TransferState::Downloading,
            Slot::Download(_) => TransferState::DownloadPending,
            Slot::Finished(f) if f.succeeded => TransferState::Complete,
            Slot::Finished(_) => TransferState::Error,
        }
    }

    pub fn direction(&self) -> Direction {
        match &self.slot {
            Slot::Idle => Direction::None,
            Slot::Upload(_) => Direction::Upload,
            Slot::Download(_) => Direction::Download,
            Slot::Finished(f) => f.direction,
        }
    }

    /// True while a file is open for a transfer
    pub fn is_active(&self) -> bool {
        matches!(self.slot, Slot::Upload(_) | Slot::Download(_))
    }

    /// Path of the file a transfer is working on
    pub fn active_path(&self) -> Option<&Path> {
        match &self.slot {
            Slot::Upload(u) => Some(&u.path),
            Slot::Download(d) => Some(&d.path),
            Slot::Finished(f) => Some(&f.path),
            Slot::Idle => None,
        }
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let (transferred, total) = match &self.slot {
            Slot::Idle => (self.last.transferred, self.last.total),
            Slot::Upload(u) => (u.transferred, u.total),
            Slot::Download(d) => (d.transferred, d.total),
            Slot::Finished(f) => (f.transferred, f.total),
        };
        TransferSnapshot { state: self.state(), direction: self.direction(), transferred, total }
    }

    pub fn percent(&self) -> u8 {
        self.snapshot().percent()
    }

    fn ensure_idle(&self) -> Result<()> {
        if matches!(self.slot, Slot::Idle) {
            Ok(())
        } else {
            Err(Error::InvalidState("transfer already in progress"))
        }
    }

    /// Create (or truncate) `name` and wait for `total` bytes
    pub fn start_upload(&mut self, name: &str, total: u32) -> Result<()> {
        self.ensure_idle()?;
        if total == 0 {
            return Err(Error::InvalidArgument("upload size must be positive".to_string()));
        }
        let path = self.storage.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;

        self.generation += 1;
        self.slot = Slot::Upload(Upload {
            path,
            file,
            total,
            transferred: 0,
            receiving: false,
        });
        info!("Upload started: {} ({} bytes)", name, total);
        Ok(())
    }

    /// Append one chunk of an upload.
    ///
    /// Validation failures leave the engine untouched. A write failure or a
    /// final size that does not match the declared one deletes the file and
    /// moves the engine to the error state.
    pub fn receive_chunk(&mut self, data: &[u8]) -> Result<UploadStatus> {
        let Slot::Upload(upload) = &mut self.slot else {
            warn!("Unexpected data chunk - not in upload state");
            return Err(Error::InvalidState("no upload in progress"));
        };
        // Writes are peer-paced and sized by the peer's MTU, not the download chunk
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty chunk".to_string()));
        }
        upload.receiving = true;

        if let Err(e) = upload.file.write_all(data) {
            error!("Write failed after {} bytes: {}", upload.transferred, e);
            self.fail_upload();
            return Err(e.into());
        }
        upload.transferred = upload.transferred.saturating_add(data.len() as u32);
        debug!("Received chunk: {} bytes, progress: {}/{}", data.len(), upload.transferred, upload.total);

        if upload.transferred < upload.total {
            return Ok(UploadStatus::Ready);
        }
        self.finish_upload()
    }

    fn finish_upload(&mut self) -> Result<UploadStatus> {
        let Slot::Upload(upload) = std::mem::replace(&mut self.slot, Slot::Idle) else {
            return Err(Error::InvalidState("no upload in progress"));
        };
        let Upload { path, file, total, transferred, .. } = upload;

        let finished = |succeeded| Finished {
            direction: Direction::Upload,
            path: path.clone(),
            succeeded,
            transferred,
            total,
        };
        // The on-disk size, not the byte counter, decides the outcome
        match close_and_measure(file, &path) {
            Ok(actual) if actual == u64::from(total) => {
                info!("Upload complete: {}", path.display());
                self.slot = Slot::Finished(finished(true));
                Ok(UploadStatus::Complete)
            }
            Ok(actual) => {
                error!("Upload size mismatch: expected {}, got {}", total, actual);
                remove_partial(&path);
                self.slot = Slot::Finished(finished(false));
                Err(Error::SizeMismatch { expected: u64::from(total), actual })
            }
            Err(e) => {
                error!("Upload verification failed: {}", e);
                remove_partial(&path);
                self.slot = Slot::Finished(finished(false));
                Err(e.into())
            }
        }
    }

    fn fail_upload(&mut self) {
        if let Slot::Upload(upload) = std::mem::replace(&mut self.slot, Slot::Idle) {
            let Upload { path, file, total, transferred, .. } = upload;
            drop(file);
            remove_partial(&path);
            self.slot = Slot::Finished(Finished {
                direction: Direction::Upload,
                path,
                succeeded: false,
                transferred,
                total,
            });
        }
    }

    /// Open `name` for reading and buffer its first chunk. Returns the size.
    ///
    /// An empty file completes immediately.
    pub fn start_download(&mut self, name: &str) -> Result<u32> {
        self.ensure_idle()?;
        let path = self.storage.resolve(name)?;
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Download rejected - file not found: {}", path.display());
                return Err(Error::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::InvalidArgument(format!("not a file: {name}")));
        }
        let total = u32::try_from(meta.len())
            .map_err(|_| Error::InvalidArgument(format!("{name} is too large to transfer")))?;
        let file = File::open(&path)?;

        let mut download = Download {
            path,
            file,
            total,
            transferred: 0,
            buffer: vec![0u8; self.chunk_size],
            chunk_len: 0,
            chunk_ready: false,
            reading: false,
        };
        // A failed first read leaves nothing behind, so the engine stays idle
        let first = fill(&mut download)?;

        self.generation += 1;
        info!("Download started: {} ({} bytes)", name, total);
        if first == 0 {
            info!("Download complete: {} is empty", download.path.display());
            self.slot = Slot::Finished(Finished {
                direction: Direction::Download,
                path: download.path,
                succeeded: true,
                transferred: 0,
                total,
            });
        } else {
            self.slot = Slot::Download(download);
        }
        Ok(total)
    }

    /// The buffered download chunk; reading it does not advance the engine
    pub fn current_chunk(&self) -> Result<&[u8]> {
        match &self.slot {
            Slot::Download(d) if d.chunk_ready => Ok(&d.buffer[..d.chunk_len]),
            _ => {
                warn!("No chunk ready");
                Err(Error::InvalidState("no chunk ready"))
            }
        }
    }

    /// Mark the buffered chunk consumed and refill it.
    ///
    /// Returns `None` outside a download.
    pub fn chunk_read_complete(&mut self) -> Option<ChunkOutcome> {
        let Slot::Download(download) = &mut self.slot else {
            warn!("Chunk read complete outside a download, ignoring");
            return None;
        };
        download.chunk_ready = false;
        download.reading = true;

        let outcome = match fill(download) {
            Ok(0) => ChunkOutcome::Complete,
            Ok(n) => ChunkOutcome::Ready(n),
            Err(e) => {
                error!("Error preparing chunk: {}", e);
                ChunkOutcome::Failed
            }
        };
        if !matches!(outcome, ChunkOutcome::Ready(_)) {
            self.close_download(outcome == ChunkOutcome::Complete);
        }
        Some(outcome)
    }

    fn close_download(&mut self, succeeded: bool) {
        if let Slot::Download(download) = std::mem::replace(&mut self.slot, Slot::Idle) {
            let Download { path, total, transferred, .. } = download;
            if succeeded {
                info!("Download complete: {}", path.display());
            }
            self.slot = Slot::Finished(Finished {
                direction: Direction::Download,
                path,
                succeeded,
                transferred,
                total,
            });
        }
    }

    /// Return from `Complete`/`Error` to `Idle` once the peer was told
    pub fn finish(&mut self) {
        if let Slot::Finished(f) = &self.slot {
            self.last = Progress { transferred: f.transferred, total: f.total };
            self.slot = Slot::Idle;
        }
    }

    /// Swap the open file of the running transfer
    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) {
        match &mut self.slot {
            Slot::Upload(u) => u.file = file,
            Slot::Download(d) => d.file = file,
            Slot::Idle | Slot::Finished(_) => {}
        }
    }

    /// Abort whatever is running; partial uploads are deleted.
    /// Returns false when there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        let slot = std::mem::replace(&mut self.slot, Slot::Idle);
        let (transferred, total) = match slot {
            Slot::Idle => return false,
            Slot::Upload(Upload { path, file, transferred, total, .. }) => {
                drop(file);
                remove_partial(&path);
                (transferred, total)
            }
            Slot::Download(Download { transferred, total, .. }) => (transferred, total),
            Slot::Finished(Finished { transferred, total, .. }) => (transferred, total),
        };
        self.last = Progress { transferred, total };
        self.generation += 1;
        info!("Transfer cancelled");
        true
    }
}

fn fill(download: &mut Download) -> std::io::Result<usize> {
    let n = read_full(&mut download.file, &mut download.buffer)?;
    download.chunk_len = n;
    download.chunk_ready = n > 0;
    download.transferred = download.transferred.saturating_add(n as u32);
    if n > 0 {
        debug!("Prepared chunk: {} bytes, progress: {}/{}", n, download.transferred, download.total);
    }
    Ok(n)
}

/// Read until the buffer is full or the file ends
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn close_and_measure(mut file: File, path: &Path) -> std::io::Result<u64> {
    file.flush()?;
    file.sync_all()?;
    drop(file);
    Ok(fs::metadata(path)?.len())
}

fn remove_partial(path: &Path) {
    warn!("Deleting partial upload: {}", path.display());
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            error!("Failed to delete {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(chunk: usize) -> (tempfile::TempDir, TransferEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = TransferEngine::new(Storage::new(dir.path(), "/Storage"), chunk);
        (dir, engine)
    }

    #[test]
    fn upload_walks_the_states() {
        let (dir, mut engine) = engine(500);
        engine.start_upload("song.wav", 1200).unwrap();
        assert_eq!(engine.state(), TransferState::UploadPending);

        let mut seen = Vec::new();
        for len in [500, 500, 200] {
            let status = engine.receive_chunk(&vec![7u8; len]).unwrap();
            seen.push((status, engine.state(), engine.snapshot().transferred));
        }
        assert_eq!(
            seen,
            vec![
                (UploadStatus::Ready, TransferState::Uploading, 500),
                (UploadStatus::Ready, TransferState::Uploading, 1000),
                (UploadStatus::Complete, TransferState::Complete, 1200),
            ]
        );
        assert_eq!(engine.percent(), 100);
        assert_eq!(fs::read(dir.path().join("song.wav")).unwrap().len(), 1200);

        engine.finish();
        assert_eq!(engine.state(), TransferState::Idle);
        assert_eq!(engine.snapshot().progress(), Progress { transferred: 1200, total: 1200 });
    }

    #[test]
    fn overshoot_fails_verification_and_deletes_the_file() {
        let (dir, mut engine) = engine(64);
        engine.start_upload("a.wav", 100).unwrap();
        engine.receive_chunk(&[1u8; 60]).unwrap();
        let err = engine.receive_chunk(&[1u8; 60]).unwrap_err();

        assert!(matches!(err, Error::SizeMismatch { expected: 100, actual: 120 }));
        assert_eq!(engine.state(), TransferState::Error);
        assert!(!dir.path().join("a.wav").exists());

        engine.finish();
        engine.start_upload("a.wav", 10).unwrap();
        assert_eq!(engine.state(), TransferState::UploadPending);
    }

    #[test]
    fn upload_validation_leaves_state_alone() {
        let (_dir, mut engine) = engine(16);
        assert!(matches!(engine.receive_chunk(b"x"), Err(Error::InvalidState(_))));
        assert!(matches!(engine.start_upload("a.wav", 0), Err(Error::InvalidArgument(_))));
        assert!(matches!(engine.start_upload("../a.wav", 5), Err(Error::InvalidArgument(_))));
        assert_eq!(engine.state(), TransferState::Idle);

        engine.start_upload("a.wav", 40).unwrap();
        assert!(matches!(engine.receive_chunk(&[]), Err(Error::InvalidArgument(_))));
        assert_eq!(engine.state(), TransferState::UploadPending);
        assert!(matches!(engine.start_download("a.wav"), Err(Error::InvalidState(_))));
        assert!(matches!(engine.start_upload("b.wav", 5), Err(Error::InvalidState(_))));
    }

    #[test]
    fn upload_chunks_may_exceed_the_download_chunk() {
        let (dir, mut engine) = engine(490);
        engine.start_upload("big.wav", 1018).unwrap();
        assert_eq!(engine.receive_chunk(&[9u8; 509]).unwrap(), UploadStatus::Ready);
        assert_eq!(engine.receive_chunk(&[9u8; 509]).unwrap(), UploadStatus::Complete);
        assert_eq!(fs::read(dir.path().join("big.wav")).unwrap().len(), 1018);
    }

    #[test]
    fn failed_write_deletes_the_partial_upload() {
        let (dir, mut engine) = engine(490);
        engine.start_upload("rec/a.wav", 1000).unwrap();
        engine.receive_chunk(&[1u8; 100]).unwrap();
        // A read-only handle makes the next write fail
        engine.replace_file(File::open(dir.path().join("rec/a.wav")).unwrap());

        assert!(matches!(engine.receive_chunk(&[1u8; 100]), Err(Error::Io(_))));
        assert_eq!(engine.state(), TransferState::Error);
        assert!(!engine.is_active());
        assert!(!dir.path().join("rec/a.wav").exists());

        engine.finish();
        assert_eq!(engine.state(), TransferState::Idle);
        assert_eq!(engine.snapshot().transferred, 100);
    }

    #[test]
    fn failed_read_ends_the_download_in_error() {
        let (dir, mut engine) = engine(490);
        fs::write(dir.path().join("src.wav"), vec![5u8; 1000]).unwrap();
        engine.start_download("src.wav").unwrap();
        // A write-only handle makes the next refill fail
        engine.replace_file(File::create(dir.path().join("other.wav")).unwrap());

        assert_eq!(engine.chunk_read_complete(), Some(ChunkOutcome::Failed));
        assert_eq!(engine.state(), TransferState::Error);
        assert!(engine.current_chunk().is_err());
        assert_eq!(fs::read(dir.path().join("src.wav")).unwrap().len(), 1000);

        engine.finish();
        assert_eq!(engine.state(), TransferState::Idle);
    }

    #[test]
    fn small_download_is_one_chunk() {
        let (dir, mut engine) = engine(490);
        let body: Vec<u8> = (0..77u8).collect();
        fs::write(dir.path().join("memo.wav"), &body).unwrap();

        assert_eq!(engine.start_download("memo.wav").unwrap(), 77);
        assert_eq!(engine.state(), TransferState::DownloadPending);
        assert_eq!(engine.current_chunk().unwrap(), &body[..]);

        assert_eq!(engine.chunk_read_complete(), Some(ChunkOutcome::Complete));
        assert_eq!(engine.state(), TransferState::Complete);
        assert!(engine.current_chunk().is_err());
        engine.finish();
        assert_eq!(engine.state(), TransferState::Idle);
    }

    #[test]
    fn download_drains_in_order() {
        let (dir, mut engine) = engine(490);
        let body: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
        fs::write(dir.path().join("long.wav"), &body).unwrap();

        engine.start_download("long.wav").unwrap();
        let mut received = engine.current_chunk().unwrap().to_vec();
        let mut steps = 0;
        loop {
            steps += 1;
            match engine.chunk_read_complete().unwrap() {
                ChunkOutcome::Ready(n) => {
                    assert_eq!(engine.state(), TransferState::Downloading);
                    let chunk = engine.current_chunk().unwrap();
                    assert_eq!(chunk.len(), n);
                    received.extend_from_slice(chunk);
                }
                ChunkOutcome::Complete => break,
                ChunkOutcome::Failed => panic!("read failed"),
            }
        }
        assert_eq!(steps, 1500usize.div_ceil(490));
        assert_eq!(received, body);
        assert_eq!(engine.snapshot().transferred, 1500);
    }

    #[test]
    fn download_of_missing_or_empty_files() {
        let (dir, mut engine) = engine(490);
        assert!(matches!(engine.start_download("missing.wav"), Err(Error::NotFound(_))));
        assert_eq!(engine.state(), TransferState::Idle);

        fs::write(dir.path().join("empty.wav"), b"").unwrap();
        assert_eq!(engine.start_download("empty.wav").unwrap(), 0);
        assert_eq!(engine.state(), TransferState::Complete);
    }

    #[test]
    fn cancel_is_idempotent_and_cleans_up_uploads() {
        let (dir, mut engine) = engine(490);
        assert!(!engine.cancel());
        let generation = engine.generation();

        engine.start_upload("part.wav", 1000).unwrap();
        engine.receive_chunk(&[0u8; 100]).unwrap();
        assert!(engine.cancel());
        assert!(!engine.cancel());
        assert_eq!(engine.state(), TransferState::Idle);
        assert!(!dir.path().join("part.wav").exists());
        assert!(engine.generation() > generation);
    }

    #[test]
    fn cancel_keeps_downloaded_source() {
        let (dir, mut engine) = engine(4);
        fs::write(dir.path().join("keep.wav"), b"0123456789").unwrap();
        engine.start_download("keep.wav").unwrap();
        engine.chunk_read_complete();
        assert!(engine.cancel());
        assert!(dir.path().join("keep.wav").exists());
        assert!(engine.chunk_read_complete().is_none());
    }

    #[test]
    fn percent_floors_and_handles_zero_total() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(3, 3), 100);
    }
}
