//! Background thumbnail loader.
//!
//! Flow:
//!   1. `ThumbLoader::submit_load(path, size, cb)` → cache hit fires `cb` at once,
//!      otherwise a job goes onto the worker queue
//!   2. `thumb-worker-N` threads probe → read (pre-scaled) → rescale, put the
//!      result in the shared cache and report back over a channel
//!   3. `ThumbLoader::pump()` on the control thread → fires callbacks of tasks
//!      that were not cancelled
//!
//! Workers never run callbacks and never touch anything but the cache, so the
//! control thread needs no locking of its own. Identical requests that arrive
//! while a decode is in flight ride along on that decode.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::decode::{fit_within, CodecSource, DecodeError, ImageSource};
use crate::thumbs::{make_key, Bitmap, ThumbCache, ThumbKey};

/// Default size of the decode pool.
pub const DEFAULT_WORKERS: usize = 4;

// ── Stats (shared with the UI via Arc) ──────────────────────────────────

#[derive(Default)]
pub struct LoaderStats {
    pub decoded: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
    pub active: AtomicU32,
    last_error: Mutex<String>,
}

impl LoaderStats {
    fn record_done(&self) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fail(&self, err: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut le = self.last_error.lock();
        le.clear();
        le.extend(err.chars().take(120));
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }
}

// ── Tasks ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Handle for one request. Kept by whoever asked; cancelling it guarantees
/// the callback will not fire afterwards.
#[derive(Debug)]
pub struct LoadTask {
    id: TaskId,
    key: ThumbKey,
    cancelled: Arc<AtomicBool>,
}

impl LoadTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> &ThumbKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.key.path
    }

    pub fn size(&self) -> u32 {
        self.key.size
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

type ReadyFn = Box<dyn FnOnce(Option<Bitmap>)>;

struct Waiter {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
    on_ready: ReadyFn,
}

/// Cancel flags of everyone waiting on one decode. The job is dead only
/// when all of them are set.
#[derive(Clone, Default)]
struct Interest(Arc<Mutex<Vec<Arc<AtomicBool>>>>);

impl Interest {
    fn add(&self, flag: Arc<AtomicBool>) {
        self.0.lock().push(flag);
    }

    fn abandoned(&self) -> bool {
        self.0.lock().iter().all(|f| f.load(Ordering::Acquire))
    }
}

struct InFlight {
    interest: Interest,
    waiters: Vec<Waiter>,
}

struct Job {
    key: ThumbKey,
    interest: Interest,
}

enum Outcome {
    Ready(Bitmap),
    Failed,
    Abandoned,
}

struct Finished {
    key: ThumbKey,
    outcome: Outcome,
}

// ── Loader ──────────────────────────────────────────────────────────────

pub struct ThumbLoader {
    cache: Arc<ThumbCache>,
    pub stats: Arc<LoaderStats>,
    job_tx: Option<Sender<Job>>,
    done_rx: Receiver<Finished>,
    in_flight: HashMap<ThumbKey, InFlight>,
    next_id: u64,
    handles: Vec<JoinHandle<()>>,
}

impl ThumbLoader {
    /// Real codec, default pool size.
    pub fn start(cache: Arc<ThumbCache>) -> std::io::Result<Self> {
        Self::with_source(cache, Arc::new(CodecSource), DEFAULT_WORKERS)
    }

    pub fn with_source(
        cache: Arc<ThumbCache>,
        source: Arc<dyn ImageSource>,
        workers: usize,
    ) -> std::io::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<Finished>();
        let stats = Arc::new(LoaderStats::default());

        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let cache = cache.clone();
            let source = source.clone();
            let stats = stats.clone();
            let h = thread::Builder::new()
                .name(format!("thumb-worker-{}", worker_id))
                .spawn(move || worker_loop(job_rx, done_tx, cache, source, stats))?;
            handles.push(h);
        }
        debug!("thumbs: {} workers", workers);

        Ok(ThumbLoader {
            cache,
            stats,
            job_tx: Some(job_tx),
            done_rx,
            in_flight: HashMap::new(),
            next_id: 0,
            handles,
        })
    }

    pub fn cache(&self) -> &Arc<ThumbCache> {
        &self.cache
    }

    /// Request a thumbnail of `path` no larger than `size` on either side.
    ///
    /// Never blocks on decoding. On a cache hit `on_ready` runs before this
    /// returns; otherwise it runs from a later `pump()`, with `None` if the
    /// image could not be decoded.
    pub fn submit_load<F>(&mut self, path: &Path, size: u32, on_ready: F) -> LoadTask
    where
        F: FnOnce(Option<Bitmap>) + 'static,
    {
        let key = make_key(path, size);
        self.next_id += 1;
        let task = LoadTask {
            id: TaskId(self.next_id),
            key: key.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        if let Some(bitmap) = self.cache.get(&key) {
            on_ready(Some(bitmap));
            return task;
        }

        let waiter = Waiter {
            id: task.id,
            cancelled: task.cancelled.clone(),
            on_ready: Box::new(on_ready),
        };

        if let Some(entry) = self.in_flight.get_mut(&key) {
            debug!("thumb join in-flight: {}", path.display());
            entry.interest.add(task.cancelled.clone());
            entry.waiters.push(waiter);
            return task;
        }

        self.dispatch(key, vec![waiter]);
        task
    }

    /// Cancel `task`. Its callback is dropped without being called; the
    /// decode itself stops at its next checkpoint unless others still want it.
    pub fn cancel(&mut self, task: &LoadTask) {
        task.cancel();
        if let Some(entry) = self.in_flight.get_mut(&task.key) {
            entry.waiters.retain(|w| w.id != task.id);
        }
    }

    /// Number of distinct decodes not yet reported back.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Deliver finished decodes. Returns how many callbacks ran.
    pub fn pump(&mut self) -> usize {
        let mut fired = 0;
        while let Ok(done) = self.done_rx.try_recv() {
            fired += self.deliver(done);
        }
        fired
    }

    /// Like `pump`, but waits up to `timeout` for the first result.
    pub fn pump_wait(&mut self, timeout: Duration) -> usize {
        if self.in_flight.is_empty() {
            return 0;
        }
        match self.done_rx.recv_timeout(timeout) {
            Ok(done) => self.deliver(done) + self.pump(),
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => self.fail_stranded(),
        }
    }

    /// Every worker is gone: nothing in flight will ever report back, so
    /// answer its live waiters with `None`.
    fn fail_stranded(&mut self) -> usize {
        warn!("thumb workers gone, failing {} pending decode(s)", self.in_flight.len());
        let mut fired = 0;
        for (_, entry) in self.in_flight.drain() {
            for w in entry.waiters {
                if !w.cancelled.load(Ordering::Acquire) {
                    (w.on_ready)(None);
                    fired += 1;
                }
            }
        }
        fired
    }

    /// Queue a decode for `key`. Returns callbacks fired synchronously, which
    /// only happens when the pool is gone.
    fn dispatch(&mut self, key: ThumbKey, waiters: Vec<Waiter>) -> usize {
        let interest = Interest::default();
        for w in &waiters {
            interest.add(w.cancelled.clone());
        }
        let job = Job {
            key: key.clone(),
            interest: interest.clone(),
        };

        let sent = match &self.job_tx {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            warn!("thumb pool unavailable: {}", key.path.display());
            let n = waiters.len();
            for w in waiters {
                (w.on_ready)(None);
            }
            return n;
        }

        self.in_flight.insert(key, InFlight { interest, waiters });
        0
    }

    fn deliver(&mut self, done: Finished) -> usize {
        let Some(entry) = self.in_flight.remove(&done.key) else {
            return 0;
        };
        let live: Vec<Waiter> = entry
            .waiters
            .into_iter()
            .filter(|w| !w.cancelled.load(Ordering::Acquire))
            .collect();

        match done.outcome {
            Outcome::Ready(bitmap) => {
                let n = live.len();
                for w in live {
                    (w.on_ready)(Some(bitmap.clone()));
                }
                n
            }
            Outcome::Failed => {
                let n = live.len();
                for w in live {
                    (w.on_ready)(None);
                }
                n
            }
            Outcome::Abandoned => {
                if live.is_empty() {
                    return 0;
                }
                // Someone joined after the worker gave up.
                if let Some(bitmap) = self.cache.get(&done.key) {
                    let n = live.len();
                    for w in live {
                        (w.on_ready)(Some(bitmap.clone()));
                    }
                    return n;
                }
                debug!("thumb re-dispatch: {}", done.key.path.display());
                self.dispatch(done.key, live)
            }
        }
    }
}

impl Drop for ThumbLoader {
    fn drop(&mut self) {
        for entry in self.in_flight.values() {
            for w in &entry.waiters {
                w.cancelled.store(true, Ordering::Release);
            }
        }
        self.job_tx = None;
        for h in self.handles.drain(..) {
            h.join().ok();
        }
    }
}

// ── Worker loop ─────────────────────────────────────────────────────────

fn worker_loop(
    jobs: Receiver<Job>,
    done: Sender<Finished>,
    cache: Arc<ThumbCache>,
    source: Arc<dyn ImageSource>,
    stats: Arc<LoaderStats>,
) {
    while let Ok(job) = jobs.recv() {
        stats.active.fetch_add(1, Ordering::Relaxed);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            render(&*source, &job.key.path, job.key.size, &|| {
                job.interest.abandoned()
            })
        }));
        stats.active.fetch_sub(1, Ordering::Relaxed);

        let outcome = match result {
            Err(payload) => {
                let msg = panic_message(&*payload);
                warn!("thumb decoder panicked on {}: {}", job.key.path.display(), msg);
                stats.record_fail(&format!("panic: {}", msg));
                Outcome::Failed
            }
            Ok(result) => settle(result, &job.key, &cache, &stats),
        };

        if done.send(Finished { key: job.key, outcome }).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Turn a finished render into an outcome, caching successes.
fn settle(
    result: Result<Option<image::RgbaImage>, DecodeError>,
    key: &ThumbKey,
    cache: &ThumbCache,
    stats: &LoaderStats,
) -> Outcome {
    match result {
        Ok(Some(img)) => {
            let bitmap: Bitmap = Arc::new(img);
            cache.put(key.clone(), bitmap.clone());
            stats.record_done();
            Outcome::Ready(bitmap)
        }
        Ok(None) => {
            stats.record_cancel();
            Outcome::Abandoned
        }
        Err(e) => {
            debug!("thumb failed {}: {}", key.path.display(), e);
            stats.record_fail(&e.to_string());
            Outcome::Failed
        }
    }
}

/// Decode `path` into a thumbnail no larger than `size`. `Ok(None)` means
/// the job was cancelled at one of the checkpoints.
fn render(
    source: &dyn ImageSource,
    path: &Path,
    size: u32,
    cancelled: &dyn Fn() -> bool,
) -> Result<Option<image::RgbaImage>, DecodeError> {
    if cancelled() {
        return Ok(None);
    }
    let info = source.probe(path)?;
    let hint = fit_within(info.width, info.height, size);

    if cancelled() {
        return Ok(None);
    }
    let mut img = source.read(path, hint)?;

    if cancelled() {
        return Ok(None);
    }
    let size = size.max(1);
    if img.width() > size || img.height() > size {
        img = source.rescale(img, size);
    }
    img.apply_orientation(info.orientation);

    if img.width() == 0 || img.height() == 0 {
        return Err(DecodeError::Empty);
    }
    Ok(Some(img.into_rgba8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::SourceInfo;
    use image::metadata::Orientation;
    use image::{DynamicImage, RgbImage};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    /// Pretends every path is a `w` x `h` image. Optionally blocks in
    /// `probe` until the test lets it go.
    struct FakeSource {
        width: u32,
        height: u32,
        reads: AtomicUsize,
        gate: Option<crossbeam_channel::Receiver<()>>,
        fail: bool,
    }

    impl FakeSource {
        fn new(width: u32, height: u32) -> Self {
            FakeSource {
                width,
                height,
                reads: AtomicUsize::new(0),
                gate: None,
                fail: false,
            }
        }
    }

    impl ImageSource for FakeSource {
        fn probe(&self, _path: &Path) -> Result<SourceInfo, DecodeError> {
            if let Some(gate) = &self.gate {
                gate.recv().ok();
            }
            if self.fail {
                return Err(DecodeError::Unsupported("fake".into()));
            }
            Ok(SourceInfo {
                width: self.width,
                height: self.height,
                orientation: Orientation::NoTransforms,
            })
        }

        fn read(&self, _path: &Path, hint: Option<(u32, u32)>) -> Result<DynamicImage, DecodeError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let (w, h) = hint.unwrap_or((self.width, self.height));
            Ok(DynamicImage::ImageRgb8(RgbImage::new(w, h)))
        }
    }

    type Results = Rc<RefCell<Vec<Option<(u32, u32)>>>>;

    fn collector() -> Results {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn record(results: &Results) -> impl FnOnce(Option<Bitmap>) + 'static {
        let results = results.clone();
        move |b| results.borrow_mut().push(b.map(|b| b.dimensions()))
    }

    fn drain(loader: &mut ThumbLoader) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while loader.pending() > 0 && Instant::now() < deadline {
            loader.pump_wait(Duration::from_millis(50));
        }
        assert_eq!(loader.pending(), 0, "loader did not settle");
    }

    fn touch(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, b"x").unwrap();
        p
    }

    #[test]
    fn decodes_and_scales_real_png() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("wide.png");
        RgbImage::new(400, 200).save(&p).unwrap();

        let cache = Arc::new(ThumbCache::new(10));
        let mut loader = ThumbLoader::start(cache.clone()).unwrap();
        let results = collector();
        loader.submit_load(&p, 100, record(&results));
        drain(&mut loader);

        assert_eq!(*results.borrow(), vec![Some((100, 50))]);
        assert!(cache.contains(&make_key(&p, 100)));
        assert_eq!(loader.stats.decoded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn small_image_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("tiny.png");
        RgbImage::new(30, 20).save(&p).unwrap();

        let mut loader = ThumbLoader::start(Arc::new(ThumbCache::new(10))).unwrap();
        let results = collector();
        loader.submit_load(&p, 120, record(&results));
        drain(&mut loader);
        assert_eq!(*results.borrow(), vec![Some((30, 20))]);
    }

    #[test]
    fn cache_hit_fires_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "a.jpg");
        let source = Arc::new(FakeSource::new(200, 100));
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), source.clone(), 2).unwrap();

        let first = collector();
        loader.submit_load(&p, 50, record(&first));
        drain(&mut loader);
        assert_eq!(*first.borrow(), vec![Some((50, 25))]);

        let second = collector();
        loader.submit_load(&p, 50, record(&second));
        // no pump needed
        assert_eq!(*second.borrow(), vec![Some((50, 25))]);
        assert_eq!(loader.pending(), 0);
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unreadable_file_reports_none() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("broken.png");
        std::fs::write(&p, b"not an image").unwrap();

        let mut loader = ThumbLoader::start(Arc::new(ThumbCache::new(10))).unwrap();
        let results = collector();
        loader.submit_load(&p, 64, record(&results));
        drain(&mut loader);

        assert_eq!(*results.borrow(), vec![None]);
        assert_eq!(loader.stats.failed.load(Ordering::Relaxed), 1);
        assert!(!loader.stats.last_error().is_empty());
        assert!(loader.cache().is_empty());
    }

    #[test]
    fn missing_file_reports_none() {
        let mut loader = ThumbLoader::start(Arc::new(ThumbCache::new(10))).unwrap();
        let results = collector();
        loader.submit_load(Path::new("/no/such/picture.png"), 64, record(&results));
        drain(&mut loader);
        assert_eq!(*results.borrow(), vec![None]);
    }

    #[test]
    fn cancelled_task_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "slow.jpg");
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        let source = Arc::new(FakeSource {
            gate: Some(open_rx),
            ..FakeSource::new(300, 300)
        });
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), source.clone(), 1).unwrap();

        let results = collector();
        let task = loader.submit_load(&p, 100, record(&results));
        loader.cancel(&task);
        assert!(task.is_cancelled());
        open_tx.send(()).unwrap();
        drain(&mut loader);

        assert!(results.borrow().is_empty());
        // stopped before the read checkpoint
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
        assert_eq!(loader.stats.cancelled.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn cancel_via_handle_only_still_suppresses_callback() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "a.png");
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        let source = Arc::new(FakeSource {
            gate: Some(open_rx),
            ..FakeSource::new(100, 100)
        });
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), source, 1).unwrap();

        let results = collector();
        let task = loader.submit_load(&p, 10, record(&results));
        task.cancel();
        open_tx.send(()).unwrap();
        drain(&mut loader);
        assert!(results.borrow().is_empty());
    }

    #[test]
    fn one_cancel_does_not_starve_other_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "shared.jpg");
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        let source = Arc::new(FakeSource {
            gate: Some(open_rx),
            ..FakeSource::new(400, 400)
        });
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), source.clone(), 2).unwrap();

        let dropped = collector();
        let kept = collector();
        let a = loader.submit_load(&p, 40, record(&dropped));
        let _b = loader.submit_load(&p, 40, record(&kept));
        loader.cancel(&a);
        open_tx.send(()).unwrap();
        drain(&mut loader);

        assert!(dropped.borrow().is_empty());
        assert_eq!(*kept.borrow(), vec![Some((40, 40))]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_identical_requests_decode_once() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "same.jpg");
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        let source = Arc::new(FakeSource {
            gate: Some(open_rx),
            ..FakeSource::new(1000, 500)
        });
        let cache = Arc::new(ThumbCache::new(10));
        let mut loader = ThumbLoader::with_source(cache.clone(), source.clone(), 4).unwrap();

        let results = collector();
        for _ in 0..10 {
            loader.submit_load(&p, 100, record(&results));
        }
        assert_eq!(loader.pending(), 1);
        for _ in 0..4 {
            open_tx.send(()).unwrap();
        }
        drain(&mut loader);

        assert_eq!(results.borrow().len(), 10);
        assert!(results.borrow().iter().all(|r| *r == Some((100, 50))));
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_sizes_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "multi.jpg");
        let source = Arc::new(FakeSource::new(800, 800));
        let cache = Arc::new(ThumbCache::new(10));
        let mut loader = ThumbLoader::with_source(cache.clone(), source.clone(), 2).unwrap();

        let results = collector();
        loader.submit_load(&p, 60, record(&results));
        loader.submit_load(&p, 120, record(&results));
        drain(&mut loader);

        let mut got = results.borrow().clone();
        got.sort();
        assert_eq!(got, vec![Some((60, 60)), Some((120, 120))]);
        assert_eq!(cache.len(), 2);
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_source_counts_failures() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "bad.jpg");
        let source = Arc::new(FakeSource {
            fail: true,
            ..FakeSource::new(10, 10)
        });
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), source, 1).unwrap();
        let results = collector();
        loader.submit_load(&p, 10, record(&results));
        drain(&mut loader);
        assert_eq!(*results.borrow(), vec![None]);
        assert_eq!(loader.stats.last_error(), "unsupported: fake");
    }

    struct PanickingSource;

    impl ImageSource for PanickingSource {
        fn probe(&self, _path: &Path) -> Result<SourceInfo, DecodeError> {
            panic!("decoder blew up");
        }

        fn read(&self, _path: &Path, _hint: Option<(u32, u32)>) -> Result<DynamicImage, DecodeError> {
            unreachable!("probe always panics")
        }
    }

    #[test]
    fn panicking_decoder_fails_task_and_keeps_worker() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(&dir, "a.jpg");
        let b = touch(&dir, "b.jpg");
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), Arc::new(PanickingSource), 1)
                .unwrap();
        let results = collector();

        loader.submit_load(&a, 50, record(&results));
        drain(&mut loader);
        assert_eq!(*results.borrow(), vec![None]);

        // the single worker survived and serves the next request
        loader.submit_load(&b, 50, record(&results));
        drain(&mut loader);
        assert_eq!(*results.borrow(), vec![None, None]);
        assert_eq!(loader.stats.failed.load(Ordering::Relaxed), 2);
        assert_eq!(loader.stats.active.load(Ordering::Relaxed), 0);
        assert_eq!(loader.stats.last_error(), "panic: decoder blew up");
    }

    #[test]
    fn drop_with_work_in_flight_joins_workers() {
        let dir = tempfile::tempdir().unwrap();
        let p = touch(&dir, "pending.jpg");
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        let source = Arc::new(FakeSource {
            gate: Some(open_rx),
            ..FakeSource::new(50, 50)
        });
        let mut loader =
            ThumbLoader::with_source(Arc::new(ThumbCache::new(10)), source, 1).unwrap();
        let results = collector();
        loader.submit_load(&p, 10, record(&results));
        open_tx.send(()).unwrap();
        drop(loader);
        assert!(results.borrow().is_empty());
    }

    #[test]
    fn render_stops_at_first_checkpoint() {
        let source = FakeSource::new(10, 10);
        let out = render(&source, Path::new("x"), 5, &|| true).unwrap();
        assert!(out.is_none());
        assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stats_last_error_truncated() {
        let stats = LoaderStats::default();
        stats.record_fail(&"é".repeat(300));
        assert_eq!(stats.last_error().chars().count(), 120);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
    }
}
