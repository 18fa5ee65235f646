use crate::{
    detector::{FaceBox, FaceDetector},
    error::{DetectError, EngineError},
    model::FaceNetwork,
};
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
        mpsc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

/// Jobs that may wait for the engine before new requests are turned away.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Represents the current state of the detection engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EngineState {
    /// The engine is waiting for work.
    Idle,
    /// The engine is running a detection.
    Processing,
}

impl EngineState {
    /// Returns the state as a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Processing => "processing",
        }
    }
}

struct DetectionJob {
    id: u64,
    path: PathBuf,
    reply: oneshot::Sender<Result<Vec<FaceBox>, DetectError>>,
}

/// Runs face detection on a dedicated thread that owns the network.
///
/// The network handle is never shared between threads, so backends whose
/// forward pass needs exclusive access can be used as-is. Jobs are served in
/// submission order from a bounded queue; jobs whose caller already gave up
/// are skipped. A panic inside a detection is reported to its caller and the
/// thread keeps serving.
pub struct DetectionEngine {
    state: Arc<Mutex<EngineState>>,
    req_tx: Option<mpsc::SyncSender<DetectionJob>>,
    inference_handle: Option<JoinHandle<()>>,
    id_counter: AtomicU64,
    processed: Arc<AtomicU64>,
    timeout: Duration,
}

impl DetectionEngine {
    /// Creates a new engine; the detector is moved to the background thread.
    ///
    /// `timeout` bounds how long a caller waits for a single detection.
    pub fn new<N>(detector: FaceDetector<N>, timeout: Duration) -> Self
    where
        N: FaceNetwork + Send + 'static,
    {
        Self::with_queue_capacity(detector, timeout, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`DetectionEngine::new`] with at most `capacity` jobs waiting.
    pub fn with_queue_capacity<N>(
        mut detector: FaceDetector<N>,
        timeout: Duration,
        capacity: usize,
    ) -> Self
    where
        N: FaceNetwork + Send + 'static,
    {
        let (req_tx, req_rx) = mpsc::sync_channel::<DetectionJob>(capacity.max(1));
        let state = Arc::new(Mutex::new(EngineState::Idle));
        let processed = Arc::new(AtomicU64::new(0));

        let inference_handle = std::thread::spawn({
            let state = state.clone();
            let processed = processed.clone();
            move || {
                while let Ok(job) = req_rx.recv() {
                    if job.reply.is_closed() {
                        log::debug!("Skipping abandoned detection {}", job.id);
                        continue;
                    }
                    log::debug!("Running detection {} on {}", job.id, job.path.display());

                    set_state(&state, EngineState::Processing);
                    let start_time = Instant::now();

                    let result = catch_unwind(AssertUnwindSafe(|| detector.detect_path(&job.path)))
                        .unwrap_or_else(|panic| Err(DetectError::Panicked(panic_message(&*panic))));

                    log::debug!(
                        "Detection {} completed in {:?}",
                        job.id,
                        start_time.elapsed()
                    );
                    processed.fetch_add(1, Ordering::Relaxed);
                    set_state(&state, EngineState::Idle);

                    // the caller may have timed out and gone away
                    let _ = job.reply.send(result);
                }
            }
        });

        Self {
            state,
            req_tx: Some(req_tx),
            inference_handle: Some(inference_handle),
            id_counter: AtomicU64::new(0),
            processed,
            timeout,
        }
    }

    /// Returns the current state of the engine.
    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of detections completed so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Queues a detection of the image at `path` and waits for its result.
    ///
    /// The file must stay in place until this future resolves.
    pub async fn detect(&self, path: PathBuf) -> Result<Vec<FaceBox>, EngineError> {
        let tx = self.req_tx.as_ref().ok_or(EngineError::Closed)?;
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();

        tx.try_send(DetectionJob { id, path, reply })
            .map_err(|e| match e {
                mpsc::TrySendError::Full(_) => EngineError::Busy,
                mpsc::TrySendError::Disconnected(_) => EngineError::Closed,
            })?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(EngineError::Closed),
            Err(_) => {
                log::warn!("Detection {id} timed out");
                Err(EngineError::Timeout(self.timeout))
            }
        }
    }

    /// Stops the engine and waits for the background thread to finish.
    pub fn stop(&mut self) {
        self.req_tx.take();
        if let Some(handle) = self.inference_handle.take() {
            if handle.join().is_err() {
                log::error!("Detection thread panicked");
            }
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn set_state(state: &Mutex<EngineState>, value: EngineState) {
    *state.lock().unwrap_or_else(PoisonError::into_inner) = value;
}
