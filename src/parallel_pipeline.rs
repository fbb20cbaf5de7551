// THEORY:
// The `ParallelPipeline` runs the same stack as `MotionPipeline`, but analyses
// several frames at once. It splits every frame into the two halves the engine
// already separates: stateless feature extraction, which any worker may run in
// any order, and the motion commit, which must see frames strictly in sequence.
//
// Key architectural principles:
// 1.  **Worker Pool**: a dispatcher hands `FrameTask`s round-robin to a fixed set
//     of workers sized from `num_cpus`. Each worker runs the CPU-heavy analysis on
//     the blocking pool and answers through a oneshot channel.
// 2.  **Ordered Commit**: finished analyses are parked in `pending_frames` until
//     every earlier frame has been committed. The ordered state (estimator,
//     pending map, next expected id) sits behind one async mutex, which is the
//     only synchronization point of the pipeline: the snapshot swap can never
//     race a motion computation.
// 3.  **Failures Keep Their Slot**: a frame that fails analysis is still
//     committed, as an error, so later frames are never stalled behind it.
// 4.  **Buffer Pool**: frame copies handed to workers come from a small pool of
//     pre-sized buffers and go back to it after analysis.

use crate::core_modules::frame_analyzer::{FrameAnalyzer, FrameFeatures};
use crate::error::{FlowError, Result};
use crate::pipeline::{EstimatorState, FrameReport, MotionStage, PipelineConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const FRAME_POOL_SIZE: usize = 8;

/// A frame copy owned by the worker that analyses it.
#[derive(Clone)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub frame_id: u64,
    pub timestamp: Instant,
}

/// What a worker sends back for one frame.
pub struct AnalysisOutcome {
    pub frame_id: u64,
    /// The frame copy, returned for reuse.
    pub buffer: Vec<u8>,
    pub features: Result<FrameFeatures>,
}

pub struct FrameTask {
    pub frame_buffer: FrameBuffer,
    pub result_sender: oneshot::Sender<Result<AnalysisOutcome>>,
}

pub struct WorkerPool {
    task_sender: mpsc::UnboundedSender<FrameTask>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the dispatcher and `worker_count` workers; needs a Tokio runtime.
    pub fn new(analyzer: FrameAnalyzer, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let analyzer = Arc::new(analyzer);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<FrameTask>())
            .unzip();

        // Single dispatcher distributing tasks round-robin
        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                // A dropped task drops its reply sender, which the caller sees as an error.
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % worker_senders.len();
            }
        });

        let workers = worker_receivers
            .into_iter()
            .map(|mut worker_receiver| {
                let analyzer = Arc::clone(&analyzer);
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let outcome = Self::process_frame_worker(Arc::clone(&analyzer), task.frame_buffer).await;
                        let _ = task.result_sender.send(outcome);
                    }
                })
            })
            .collect();

        Self {
            task_sender,
            dispatcher,
            workers,
        }
    }

    async fn process_frame_worker(analyzer: Arc<FrameAnalyzer>, frame_buffer: FrameBuffer) -> Result<AnalysisOutcome> {
        let frame_id = frame_buffer.frame_id;
        let queued_at = frame_buffer.timestamp;
        let outcome = tokio::task::spawn_blocking(move || AnalysisOutcome {
            frame_id,
            features: analyzer.analyze(&frame_buffer.data),
            buffer: frame_buffer.data,
        })
        .await
        .map_err(|e| FlowError::WorkerPool(format!("analysis of frame {frame_id} failed: {e}")))?;
        debug!(frame = frame_id, elapsed = ?queued_at.elapsed(), "frame analysed");
        Ok(outcome)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn process_frame(&self, frame_buffer: FrameBuffer) -> Result<AnalysisOutcome> {
        let (result_sender, result_receiver) = oneshot::channel();

        let task = FrameTask {
            frame_buffer,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| FlowError::WorkerPool("failed to send task to worker pool".into()))?;

        result_receiver
            .await
            .map_err(|_| FlowError::WorkerPool("failed to receive result from worker".into()))?
    }

    /// Closes the task queue and waits for every worker to drain it.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        let _ = self.dispatcher.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Everything that must change in frame order.
struct OrderedState {
    stage: MotionStage,
    next_expected_frame: u64,
    pending_frames: HashMap<u64, Result<FrameFeatures>>,
    waiters: HashMap<u64, oneshot::Sender<Result<FrameReport>>>,
}

impl OrderedState {
    /// Commits every parked frame that is next in line.
    fn commit_ready(&mut self) {
        while let Some(features) = self.pending_frames.remove(&self.next_expected_frame) {
            let frame_id = self.next_expected_frame;
            let report = features.and_then(|f| self.stage.commit(frame_id, f));
            if let Err(e) = &report {
                warn!(frame = frame_id, error = %e, "frame skipped");
            }
            if let Some(waiter) = self.waiters.remove(&frame_id) {
                let _ = waiter.send(report);
            }
            self.next_expected_frame += 1;
        }
    }
}

pub struct ParallelPipeline {
    config: PipelineConfig,
    worker_pool: WorkerPool,
    frame_buffer_pool: Arc<Mutex<VecDeque<Vec<u8>>>>,
    frame_counter: AtomicU64,
    ordered: Mutex<OrderedState>,
}

impl ParallelPipeline {
    /// Pool sized to the machine; needs a Tokio runtime.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_workers(config, num_cpus::get())
    }

    pub fn with_workers(config: PipelineConfig, worker_count: usize) -> Result<Self> {
        let analyzer = FrameAnalyzer::new(&config)?;
        let worker_pool = WorkerPool::new(analyzer, worker_count);

        let frame_bytes = config.image_width as usize * config.image_height as usize * 4;
        let frame_pool: VecDeque<Vec<u8>> = (0..FRAME_POOL_SIZE).map(|_| vec![0u8; frame_bytes]).collect();

        info!(
            workers = worker_pool.worker_count(),
            variant = ?config.variant,
            "parallel pipeline configured"
        );

        Ok(Self {
            ordered: Mutex::new(OrderedState {
                stage: MotionStage::new(&config),
                next_expected_frame: 0,
                pending_frames: HashMap::new(),
                waiters: HashMap::new(),
            }),
            config,
            worker_pool,
            frame_buffer_pool: Arc::new(Mutex::new(frame_pool)),
            frame_counter: AtomicU64::new(0),
        })
    }

    /// Analyses one RGBA frame and commits it after all earlier frames.
    ///
    /// Frame ids are assigned when the returned future is first polled, so
    /// concurrent callers must poll in frame order (as `join_all` does).
    pub async fn process_frame(&self, frame_data: &[u8]) -> Result<FrameReport> {
        let frame_id = self.frame_counter.fetch_add(1, Ordering::SeqCst);
        let features = self.analyze(frame_id, frame_data).await;

        let (report_sender, report_receiver) = oneshot::channel();
        {
            let mut ordered = self.ordered.lock().await;
            ordered.waiters.insert(frame_id, report_sender);
            ordered.pending_frames.insert(frame_id, features);
            ordered.commit_ready();
        }

        report_receiver
            .await
            .map_err(|_| FlowError::WorkerPool(format!("report for frame {frame_id} was dropped")))?
    }

    async fn analyze(&self, frame_id: u64, frame_data: &[u8]) -> Result<FrameFeatures> {
        let frame_buffer = self.get_frame_buffer(frame_data, frame_id).await;
        match self.worker_pool.process_frame(frame_buffer).await {
            Ok(outcome) => {
                self.return_frame_buffer(outcome.buffer).await;
                outcome.features
            }
            Err(e) => {
                // The buffer was lost with the task; replace it so the pool keeps its size.
                self.return_frame_buffer(vec![0u8; frame_data.len()]).await;
                Err(e)
            }
        }
    }

    async fn get_frame_buffer(&self, frame_data: &[u8], frame_id: u64) -> FrameBuffer {
        let mut buffer = {
            let mut pool = self.frame_buffer_pool.lock().await;
            pool.pop_front().unwrap_or_default()
        };

        // Resize buffer if needed
        buffer.resize(frame_data.len(), 0);
        buffer.copy_from_slice(frame_data);

        FrameBuffer {
            data: buffer,
            frame_id,
            timestamp: Instant::now(),
        }
    }

    pub async fn return_frame_buffer(&self, buffer: Vec<u8>) {
        let mut pool = self.frame_buffer_pool.lock().await;
        if pool.len() < FRAME_POOL_SIZE {
            pool.push_back(buffer);
        }
    }

    pub async fn state(&self) -> EstimatorState {
        self.ordered.lock().await.stage.state()
    }

    /// Number of frames committed so far, failed ones included.
    pub async fn committed_frames(&self) -> u64 {
        self.ordered.lock().await.next_expected_frame
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.worker_pool.worker_count()
    }

    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
    }
}
