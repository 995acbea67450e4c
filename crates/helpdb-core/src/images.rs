//! Image download queue.
//!
//! Every image a viewer asks for becomes an [`ImageJob`]. Jobs move through
//! a small state machine:
//!
//! ```text
//! Todo ──start──▶ InProgress ──▶ Done
//!   │                  │
//!   └──────────────────┴──▶ Abort
//! None  (duplicate of an in-flight job for the same viewer; reaped unfetched)
//! ```
//!
//! The queue never blocks and never spawns. The host calls
//! [`ImageQueue::drain`] from its idle loop; each call polls in-flight
//! transfers once and starts at most one new job. A URL is fetched at most
//! once at a time: other jobs for the same URL wait and receive the same
//! outcome when the transfer finishes.
//!
//! Transfers come from a [`Fetcher`] as byte-chunk streams. Outcomes are
//! recorded in the [`ObjectCache`]: ok on success, failed on a negative
//! answer or a body that is not an image, and incomplete on interruption so
//! the next access retries.

use crate::cache::{CacheHandle, CacheLookup, CacheStatus, ObjectCache};
use crate::config::{ImageConfig, LoadPolicy};
use futures::StreamExt;
use futures::stream::BoxStream;
use futures::task::noop_waker_ref;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Identifies the viewer a job delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(pub u64);

/// Identifies a job within its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u64);

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting to be started.
    Todo,
    /// Transfer running.
    InProgress,
    /// Delivered.
    Done,
    /// Failed or cancelled.
    Abort,
    /// Coalesced duplicate; never fetched.
    None,
}

impl JobStatus {
    const fn is_pending(self) -> bool {
        matches!(self, Self::Todo | Self::InProgress)
    }
}

/// Failure reported by a [`Fetcher`] stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Definitive negative answer (e.g. not found). Cached as failed.
    #[error("transfer refused: {0}")]
    Negative(String),
    /// Connection dropped or timed out. Retried on next access.
    #[error("transfer interrupted: {0}")]
    Interrupted(String),
}

impl From<TransferError> for crate::Error {
    fn from(err: TransferError) -> Self {
        Self::Transfer(err.to_string())
    }
}

/// Stream of body chunks for one URL.
pub type Transfer = BoxStream<'static, Result<Vec<u8>, TransferError>>;

/// Network transport collaborator.
pub trait Fetcher {
    /// Starts retrieving `url`. The stream ends after the last chunk.
    fn fetch(&mut self, url: &str) -> Transfer;
}

/// Reply of a progressive decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// Consumed this many bytes and wants more.
    NeedMore {
        /// Bytes used from the start of the offered slice.
        consumed: usize,
    },
    /// Image complete after consuming this many bytes.
    Done {
        /// Bytes used from the start of the offered slice.
        consumed: usize,
    },
    /// The data is not an image.
    NotImage,
}

/// Final result handed to a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery<'a> {
    /// Complete image data.
    Image {
        /// Raw bytes.
        data: &'a [u8],
        /// Sniffed format.
        kind: ImageType,
    },
    /// Body was retrieved but is not a recognized image.
    NotImage,
    /// Retrieval failed.
    Failed(&'a str),
}

/// Viewer side of the queue.
pub trait ImageSink {
    /// Offers unread bytes of a progressive job.
    fn decode(&mut self, viewer: ViewerId, url: &str, data: &[u8]) -> DecodeStep {
        let _ = (viewer, url, data);
        DecodeStep::NeedMore { consumed: 0 }
    }

    /// Delivers the final outcome of a job. Called once per job.
    fn deliver(&mut self, viewer: ViewerId, url: &str, delivery: Delivery<'_>);
}

/// Host idle-loop hook.
pub trait Scheduler {
    /// Work was queued; start calling [`ImageQueue::drain`].
    fn resume(&mut self);
    /// Nothing left; stop calling [`ImageQueue::drain`].
    fn suspend(&mut self);
}

/// [`Scheduler`] that only records whether draining is wanted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdleFlag {
    active: bool,
}

impl IdleFlag {
    /// Whether the host should keep draining.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }
}

impl Scheduler for IdleFlag {
    fn resume(&mut self) {
        self.active = true;
    }

    fn suspend(&mut self) {
        self.active = false;
    }
}

/// Image formats recognized by [`sniff_image_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// `GIF87a` / `GIF89a`
    Gif,
    /// Compressed GIF variant, `GZF87a` / `GZF89a`
    Gzf,
    /// Flag image, `FLG`
    Flag,
    /// `FF D8`
    Jpeg,
    /// PNG signature
    Png,
    /// `/* XPM */`
    Xpm,
    /// `#define`
    Xbm,
    /// `II*\0`
    TiffLittle,
    /// `MM\0*`
    TiffBig,
    /// `P1` to `P6`
    Pnm,
}

/// Identifies an image from its first bytes.
///
/// Used to reject bodies that are not images at all, typically an HTML page
/// served in place of a redirected image.
///
/// ```rust
/// use helpdb_core::images::{ImageType, sniff_image_type};
///
/// assert_eq!(sniff_image_type(b"GIF89a\x01\x00"), Some(ImageType::Gif));
/// assert_eq!(sniff_image_type(b"<html><body>Moved</body>"), None);
/// ```
#[must_use]
pub fn sniff_image_type(data: &[u8]) -> Option<ImageType> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    let head = &data[..data.len().min(8)];

    let kind = match head {
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => ImageType::Gif,
        [b'G', b'Z', b'F', b'8', b'7' | b'9', b'a', ..] => ImageType::Gzf,
        [b'F', b'L', b'G', ..] => ImageType::Flag,
        [0xFF, 0xD8, ..] => ImageType::Jpeg,
        _ if head.starts_with(PNG) => ImageType::Png,
        _ if head.starts_with(b"/* XPM") => ImageType::Xpm,
        _ if head.starts_with(b"#define") => ImageType::Xbm,
        [b'I', b'I', b'*', 0, ..] => ImageType::TiffLittle,
        [b'M', b'M', 0, b'*', ..] => ImageType::TiffBig,
        [b'P', b'1'..=b'6', rest @ ..] if rest.first().is_none_or(u8::is_ascii_whitespace) => {
            ImageType::Pnm
        },
        _ => return None,
    };
    Some(kind)
}

/// Where a job's bytes go on disk.
enum Target {
    /// A ring slot.
    Cached(CacheHandle),
    /// Scratch file for a viewer with caching disabled; removed on drop.
    Scratch(TempPath),
}

impl Target {
    fn path(&self) -> &Path {
        match self {
            Self::Cached(handle) => handle.path(),
            Self::Scratch(path) => path,
        }
    }
}

/// One image request.
pub struct ImageJob {
    /// Queue-assigned id.
    pub id: JobId,
    /// Viewer the image is delivered to.
    pub viewer: ViewerId,
    /// URL, or a file path for local jobs.
    pub url: String,
    /// Current state.
    pub status: JobStatus,
    /// Partial data is streamed to the decoder.
    pub progressive: bool,
    /// `url` names a local file; no transfer or caching.
    pub local: bool,
    /// Viewer no longer wants the result.
    pub inactive: bool,
    target: Option<Target>,
    writer: Option<File>,
    stream: Option<Transfer>,
    buffer: Vec<u8>,
    consumed: usize,
}

impl ImageJob {
    /// File receiving the job's bytes, once started.
    #[must_use]
    pub fn cache_path(&self) -> Option<&Path> {
        self.target.as_ref().map(Target::path)
    }

    /// Bytes received so far.
    #[must_use]
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(chunk)?;
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    // Stops the transfer and removes partial output.
    fn cancel(&mut self) {
        self.stream = None;
        self.writer = None;
        if let Some(target) = &self.target {
            unlink(target.path());
        }
    }
}

impl fmt::Debug for ImageJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageJob")
            .field("id", &self.id)
            .field("viewer", &self.viewer)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("progressive", &self.progressive)
            .field("local", &self.local)
            .field("inactive", &self.inactive)
            .field("received", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// Result of one [`ImageQueue::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// No job is waiting or running.
    Empty,
    /// Something advanced; call again.
    Busy,
    /// Jobs are running but nothing arrived this tick.
    Waiting,
}

enum Finish {
    Data,
    FromCache,
    CachedFailure,
    NotImage,
    Negative(String),
    Interrupted(String),
}

impl From<TransferError> for Finish {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Negative(msg) => Self::Negative(msg),
            TransferError::Interrupted(msg) => Self::Interrupted(msg),
        }
    }
}

enum Polled {
    Idle,
    Progress,
    Finished(Finish),
}

/// Per-process queue of image jobs.
pub struct ImageQueue {
    jobs: Vec<ImageJob>,
    free: Vec<ImageJob>,
    fetcher: Box<dyn Fetcher>,
    scheduler: Box<dyn Scheduler>,
    policy: LoadPolicy,
    min_progressive_bytes: usize,
    cache_enabled: bool,
    nocache_viewers: HashSet<ViewerId>,
    started: bool,
    next_id: u64,
    fetches: usize,
}

impl fmt::Debug for ImageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageQueue")
            .field("jobs", &self.jobs)
            .field("free", &self.free.len())
            .field("policy", &self.policy)
            .field("started", &self.started)
            .field("fetches", &self.fetches)
            .finish_non_exhaustive()
    }
}

impl ImageQueue {
    /// Creates a queue.
    pub fn new(config: &ImageConfig, fetcher: Box<dyn Fetcher>, scheduler: Box<dyn Scheduler>) -> Self {
        Self {
            jobs: Vec::new(),
            free: Vec::new(),
            fetcher,
            scheduler,
            policy: config.policy,
            min_progressive_bytes: config.min_progressive_bytes,
            cache_enabled: true,
            nocache_viewers: HashSet::new(),
            started: false,
            next_id: 0,
            fetches: 0,
        }
    }

    /// Load policy for new jobs.
    #[must_use]
    pub const fn policy(&self) -> LoadPolicy {
        self.policy
    }

    /// Changes the load policy for new jobs.
    pub fn set_policy(&mut self, policy: LoadPolicy) {
        self.policy = policy;
    }

    /// Turns ring caching on or off for every viewer.
    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    /// Turns ring caching on or off for one viewer. Uncached jobs write to
    /// scratch files that are removed when the job is reaped.
    pub fn set_viewer_caching(&mut self, viewer: ViewerId, enabled: bool) {
        if enabled {
            self.nocache_viewers.remove(&viewer);
        } else {
            self.nocache_viewers.insert(viewer);
        }
    }

    /// Number of transfers started so far.
    #[must_use]
    pub const fn fetch_count(&self) -> usize {
        self.fetches
    }

    /// Whether any job is waiting or running.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.jobs.iter().any(|j| j.status.is_pending())
    }

    /// Live jobs in enqueue order.
    pub fn jobs(&self) -> impl Iterator<Item = &ImageJob> {
        self.jobs.iter()
    }

    /// Looks up a job, live or awaiting reap.
    #[must_use]
    pub fn job(&self, id: JobId) -> Option<&ImageJob> {
        self.jobs.iter().chain(&self.free).find(|j| j.id == id)
    }

    /// State of a job.
    #[must_use]
    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.job(id).map(|j| j.status)
    }

    /// Queues `url` for `viewer`.
    ///
    /// A request duplicating a pending job of the same viewer is recorded as
    /// [`JobStatus::None`]. Under the sync policy nothing starts until
    /// [`run_now`](Self::run_now); otherwise draining is resumed once
    /// [`start`](Self::start) has been called.
    pub fn enqueue(&mut self, viewer: ViewerId, url: &str) -> JobId {
        self.push(viewer, url, false)
    }

    /// Queues a local image file for `viewer`.
    pub fn enqueue_local(&mut self, viewer: ViewerId, path: &Path) -> JobId {
        self.push(viewer, &path.to_string_lossy(), true)
    }

    fn push(&mut self, viewer: ViewerId, url: &str, local: bool) -> JobId {
        let duplicate = self
            .jobs
            .iter()
            .any(|j| j.viewer == viewer && j.url == url && j.status.is_pending());
        let id = JobId(self.next_id);
        self.next_id += 1;

        let status = if duplicate { JobStatus::None } else { JobStatus::Todo };
        self.jobs.push(ImageJob {
            id,
            viewer,
            url: url.to_string(),
            status,
            progressive: self.policy == LoadPolicy::Progressive,
            local,
            inactive: false,
            target: None,
            writer: None,
            stream: None,
            buffer: Vec::new(),
            consumed: 0,
        });
        debug!(viewer = viewer.0, url, ?status, "Image job queued");

        if !duplicate && self.started && self.policy != LoadPolicy::Sync {
            self.scheduler.resume();
        }
        id
    }

    /// Page is displayed; let queued jobs run.
    pub fn start(&mut self) {
        self.started = true;
        if self.has_pending() {
            self.scheduler.resume();
        }
    }

    /// Runs one job to completion, blocking on its transfer.
    ///
    /// Returns the job's final state, or `None` for an unknown id.
    pub fn run_now(
        &mut self,
        id: JobId,
        cache: &mut ObjectCache,
        sink: &mut dyn ImageSink,
    ) -> Option<JobStatus> {
        let index = self.jobs.iter().position(|j| j.id == id)?;
        if self.jobs[index].status == JobStatus::Todo {
            self.begin(index, cache, sink);
        }
        if self.jobs[index].status == JobStatus::InProgress {
            let finish = futures::executor::block_on(self.collect(index));
            self.finish(index, finish, cache, sink);
        }
        Some(self.jobs[index].status)
    }

    async fn collect(&mut self, index: usize) -> Finish {
        let job = &mut self.jobs[index];
        let Some(mut stream) = job.stream.take() else {
            return Finish::Interrupted("transfer not started".into());
        };
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if let Err(e) = job.write(&chunk) {
                        return Finish::Interrupted(e.to_string());
                    }
                },
                Err(e) => return e.into(),
            }
        }
        Finish::Data
    }

    /// One idle tick: polls running transfers and starts at most one job.
    pub fn drain(&mut self, cache: &mut ObjectCache, sink: &mut dyn ImageSink) -> DrainStatus {
        self.reap();
        if !self.has_pending() {
            self.scheduler.suspend();
            return DrainStatus::Empty;
        }

        let mut cx = TaskContext::from_waker(noop_waker_ref());
        let mut progressed = false;
        for index in 0..self.jobs.len() {
            if self.jobs[index].status != JobStatus::InProgress {
                continue;
            }
            match self.poll_job(index, &mut cx, sink) {
                Polled::Idle => {},
                Polled::Progress => progressed = true,
                Polled::Finished(finish) => {
                    self.finish(index, finish, cache, sink);
                    progressed = true;
                },
            }
        }

        if self.start_next(cache, sink) {
            progressed = true;
        }

        if !self.has_pending() {
            self.scheduler.suspend();
            DrainStatus::Empty
        } else if progressed {
            DrainStatus::Busy
        } else {
            DrainStatus::Waiting
        }
    }

    fn poll_job(&mut self, index: usize, cx: &mut TaskContext<'_>, sink: &mut dyn ImageSink) -> Polled {
        let min = self.min_progressive_bytes;
        let job = &mut self.jobs[index];
        let Some(mut stream) = job.stream.take() else {
            return Polled::Finished(Finish::Interrupted("transfer lost".into()));
        };

        let mut progressed = false;
        loop {
            match stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Err(e) = job.write(&chunk) {
                        return Polled::Finished(Finish::Interrupted(e.to_string()));
                    }
                    progressed = true;
                },
                Poll::Ready(Some(Err(e))) => return Polled::Finished(e.into()),
                Poll::Ready(None) => return Polled::Finished(Finish::Data),
                Poll::Pending => break,
            }
        }
        job.stream = Some(stream);

        let unread = job.buffer.len() - job.consumed;
        if job.progressive && unread > 0 && unread >= min {
            match sink.decode(job.viewer, &job.url, &job.buffer[job.consumed..]) {
                DecodeStep::NeedMore { consumed } | DecodeStep::Done { consumed } => {
                    job.consumed += consumed.min(unread);
                },
                DecodeStep::NotImage => return Polled::Finished(Finish::NotImage),
            }
        }

        if progressed { Polled::Progress } else { Polled::Idle }
    }

    fn start_next(&mut self, cache: &mut ObjectCache, sink: &mut dyn ImageSink) -> bool {
        let in_flight: HashSet<&str> = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::InProgress)
            .map(|j| j.url.as_str())
            .collect();
        let Some(index) = self
            .jobs
            .iter()
            .position(|j| j.status == JobStatus::Todo && !in_flight.contains(j.url.as_str()))
        else {
            return false;
        };
        self.begin(index, cache, sink);
        true
    }

    // Moves a todo job forward: answers it from disk or the cache, or
    // starts its transfer.
    fn begin(&mut self, index: usize, cache: &mut ObjectCache, sink: &mut dyn ImageSink) {
        let url = self.jobs[index].url.clone();

        if self.jobs[index].local {
            match fs::read(&url) {
                Ok(bytes) => {
                    self.jobs[index].buffer = bytes;
                    self.finish(index, Finish::FromCache, cache, sink);
                },
                Err(e) => self.finish(index, Finish::Negative(e.to_string()), cache, sink),
            }
            return;
        }

        if self.cache_enabled {
            match cache.get(&url) {
                CacheLookup::Hit(path) => match fs::read(&path) {
                    Ok(bytes) => {
                        debug!(url, "Image served from cache");
                        self.jobs[index].buffer = bytes;
                        self.finish(index, Finish::FromCache, cache, sink);
                        return;
                    },
                    Err(e) => warn!(url, "Cached image unreadable, refetching: {e}"),
                },
                CacheLookup::Failed => {
                    self.finish(index, Finish::CachedFailure, cache, sink);
                    return;
                },
                CacheLookup::Miss => {},
            }
        }

        let viewer = self.jobs[index].viewer;
        let target = if self.cache_enabled && !self.nocache_viewers.contains(&viewer) {
            cache.add(&url).map(Target::Cached)
        } else {
            tempfile::Builder::new()
                .prefix("image")
                .tempfile_in(cache.dir())
                .map(|file| Target::Scratch(file.into_temp_path()))
                .map_err(Into::into)
        };
        let opened = target.and_then(|target| {
            let writer = OpenOptions::new().create(true).append(true).open(target.path())?;
            Ok((target, writer))
        });

        match opened {
            Ok((target, writer)) => {
                let stream = self.fetcher.fetch(&url);
                self.fetches += 1;
                let job = &mut self.jobs[index];
                job.target = Some(target);
                job.writer = Some(writer);
                job.stream = Some(stream);
                job.status = JobStatus::InProgress;
                debug!(viewer = viewer.0, url, "Image transfer started");
            },
            Err(e) => {
                warn!(url, "Cannot prepare image file: {e}");
                self.finish(index, Finish::Interrupted(e.to_string()), cache, sink);
            },
        }
    }

    fn finish(&mut self, index: usize, finish: Finish, cache: &mut ObjectCache, sink: &mut dyn ImageSink) {
        let job = &mut self.jobs[index];
        job.stream = None;
        job.writer = None;
        let data = std::mem::take(&mut job.buffer);
        let kind = sniff_image_type(&data);

        let (status, persist, message) = match finish {
            Finish::Data if kind.is_some() => (JobStatus::Done, Some(CacheStatus::Ok), None),
            Finish::FromCache if kind.is_some() => (JobStatus::Done, None, None),
            Finish::Data | Finish::NotImage => (JobStatus::Abort, Some(CacheStatus::Failed), None),
            Finish::FromCache => (JobStatus::Abort, None, None),
            Finish::CachedFailure => (
                JobStatus::Abort,
                None,
                Some("previous transfer failed".to_string()),
            ),
            Finish::Negative(msg) => (JobStatus::Abort, Some(CacheStatus::Failed), Some(msg)),
            Finish::Interrupted(msg) => (JobStatus::Abort, Some(CacheStatus::Incomplete), Some(msg)),
        };

        if let (Some(Target::Cached(handle)), Some(outcome)) = (&job.target, persist) {
            if let Err(e) = cache.set_complete(handle, outcome) {
                warn!(url = %job.url, "Could not record image outcome: {e}");
            }
        }
        if status != JobStatus::Done {
            if let Some(target) = &job.target {
                unlink(target.path());
            }
        }
        job.status = status;

        let delivery = match (&message, kind) {
            (Some(msg), _) => Delivery::Failed(msg),
            (None, Some(kind)) if status == JobStatus::Done => Delivery::Image { data: &data, kind },
            (None, _) => Delivery::NotImage,
        };

        let url = job.url.clone();
        let viewer = job.viewer;
        info!(viewer = viewer.0, url, ?status, bytes = data.len(), "Image job finished");
        sink.deliver(viewer, &url, delivery);

        let local = job.local;
        for other in &mut self.jobs {
            if other.status == JobStatus::Todo && other.url == url && other.local == local {
                other.status = status;
                debug!(viewer = other.viewer.0, url, "Sharing image outcome");
                sink.deliver(other.viewer, &url, delivery);
            }
        }
    }

    /// Cancels every pending job of `viewer`, removing partial files, and
    /// retires them to the free list.
    ///
    /// Jobs of other viewers for the same URLs are not touched; one of them
    /// starts its own transfer on a later drain. Returns the number of jobs
    /// cancelled.
    pub fn abort_viewer(&mut self, viewer: ViewerId) -> usize {
        let (cancelled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|j| j.viewer == viewer && (j.status.is_pending() || j.status == JobStatus::None));
        self.jobs = kept;

        let count = cancelled.len();
        for mut job in cancelled {
            if job.status == JobStatus::InProgress {
                job.cancel();
            }
            job.status = JobStatus::Abort;
            job.inactive = true;
            self.free.push(job);
        }
        if count > 0 {
            debug!(viewer = viewer.0, count, "Image jobs aborted");
        }
        count
    }

    /// Retires every job of `viewer` to the free list.
    pub fn deactivate_viewer(&mut self, viewer: ViewerId) -> usize {
        let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|j| j.viewer == viewer);
        self.jobs = kept;

        let count = retired.len();
        for mut job in retired {
            if job.status == JobStatus::InProgress {
                job.cancel();
                job.status = JobStatus::Abort;
            }
            job.inactive = true;
            self.free.push(job);
        }
        count
    }

    /// Drops the jobs retired since the last reap, then retires coalesced
    /// duplicates and finished jobs. A finished job stays queryable through
    /// [`job`](Self::job) until the following reap. Done jobs holding a
    /// scratch file stay live until their viewer is deactivated.
    ///
    /// Returns the number of jobs dropped.
    pub fn reap(&mut self) -> usize {
        let count = self.free.len();
        self.free.clear();

        let (retired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|j| match j.status {
                JobStatus::Todo | JobStatus::InProgress => false,
                JobStatus::Done => !matches!(j.target, Some(Target::Scratch(_))),
                JobStatus::Abort | JobStatus::None => true,
            });
        self.jobs = kept;
        self.free.extend(retired);
        count
    }
}

fn unlink(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => warn!(file = %path.display(), "Failed to remove partial image: {e}"),
    }
}

/// Drains `queue` on a timer until it reports [`DrainStatus::Empty`].
pub async fn run_until_idle(
    queue: &mut ImageQueue,
    cache: &mut ObjectCache,
    sink: &mut dyn ImageSink,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        if queue.drain(cache, sink) == DrainStatus::Empty {
            break;
        }
    }
}

/// Path a caller can hand to [`ImageQueue::enqueue_local`].
#[must_use]
pub fn local_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}
