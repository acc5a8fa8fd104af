//! Execution engine.
//!
//! The engine owns the worker pool and the capability, and exposes the
//! three execution shapes: parallel batches of one family, sequential
//! chains, and mixed-family dispatch (see [`dispatch`](super::dispatch)).

use crate::capability::VisionCapability;
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, EngineResult, ValidationReport};
use crate::core::task::{BatchOutcome, Family, TaskDescriptor};
use crate::core::types::ImageValue;
use crate::execution::batch::{self, PreparedTask};
use crate::execution::chain::{self, ChainOptions, ChainOutcome, ImageSource};
use crate::execution::progress::{CancellationToken, RunControl};
use crate::session::ImageSession;
use crate::vision::BuiltinCapability;
use log::{error, info};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Batch, chain and mixed-family executor.
///
/// One engine is meant to be shared by every request: its pool bounds the
/// number of capability calls running at once.
pub struct Engine {
    config: EngineConfig,
    capability: Arc<dyn VisionCapability>,
    pool: ThreadPool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("capability", &self.capability.name())
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Engine {
    /// Create an engine around a capability.
    pub fn new(capability: Arc<dyn VisionCapability>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let prefix = config.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_workers)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .panic_handler(|payload| {
                error!("Worker panicked outside a task: {}", batch::panic_message(payload.as_ref()))
            })
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;
        info!(
            "Engine ready: {} workers, capability '{}', task timeout {:?}",
            config.max_workers,
            capability.name(),
            config.task_timeout
        );
        Ok(Self {
            config,
            capability,
            pool,
        })
    }

    /// Create an engine backed by [`BuiltinCapability`].
    pub fn builtin(config: EngineConfig) -> EngineResult<Self> {
        Self::new(Arc::new(BuiltinCapability::new()), config)
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The capability every task is delegated to.
    pub fn capability(&self) -> &dyn VisionCapability {
        self.capability.as_ref()
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Validate a single-family task list without running it.
    pub fn validate(&self, family: Family, tasks: &[TaskDescriptor]) -> Result<(), ValidationReport> {
        batch::prepare(tasks, Some(family), false).map(|_| ())
    }

    /// Run tasks of one family in parallel against `base`.
    ///
    /// Fails only on validation; task failures are recorded in the outcome,
    /// which always holds one entry per submitted task.
    pub fn run_batch(&self, base: &ImageValue, family: Family, tasks: &[TaskDescriptor]) -> EngineResult<BatchOutcome> {
        self.run_batch_with(base, family, tasks, &RunControl::default())
    }

    /// [`run_batch`](Self::run_batch) with cancellation and progress reporting.
    pub fn run_batch_with(
        &self,
        base: &ImageValue,
        family: Family,
        tasks: &[TaskDescriptor],
        control: &RunControl,
    ) -> EngineResult<BatchOutcome> {
        let prepared = batch::prepare(tasks, Some(family), false)?;
        Ok(self.execute_prepared(base, family, prepared, control))
    }

    pub(crate) fn execute_prepared(
        &self,
        base: &ImageValue,
        family: Family,
        tasks: Vec<PreparedTask>,
        control: &RunControl,
    ) -> BatchOutcome {
        batch::execute(
            &self.pool,
            &self.capability,
            base,
            family,
            tasks,
            self.config.task_timeout,
            control,
        )
    }

    /// Run filter/transform steps in order against a session image.
    ///
    /// With `options.mutate_session` the final image replaces the session's
    /// current image and one history record per step is appended. On any
    /// error the session is left untouched.
    pub fn run_chain(
        &self,
        session: &mut ImageSession,
        steps: &[TaskDescriptor],
        options: ChainOptions,
    ) -> EngineResult<ChainOutcome> {
        self.run_chain_with(session, steps, options, &CancellationToken::new())
    }

    /// [`run_chain`](Self::run_chain) with cancellation between steps.
    pub fn run_chain_with(
        &self,
        session: &mut ImageSession,
        steps: &[TaskDescriptor],
        options: ChainOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<ChainOutcome> {
        let base = match options.source {
            ImageSource::Current => session.current().clone(),
            ImageSource::Original => session.original().clone(),
        };
        let mut outcome = self.chain_on(&base, steps, cancel)?;
        if options.mutate_session {
            session.commit(outcome.image.clone(), outcome.applied.iter().cloned());
            outcome.committed = true;
            info!(
                "Session {} committed {} step(s), revision {}",
                session.id(),
                outcome.applied.len(),
                session.revision()
            );
        }
        Ok(outcome)
    }

    /// Run filter/transform steps in order against a bare image.
    pub fn run_chain_on(&self, image: &ImageValue, steps: &[TaskDescriptor]) -> EngineResult<ChainOutcome> {
        self.chain_on(image, steps, &CancellationToken::new())
    }

    fn chain_on(
        &self,
        image: &ImageValue,
        steps: &[TaskDescriptor],
        cancel: &CancellationToken,
    ) -> EngineResult<ChainOutcome> {
        let prepared = batch::prepare(steps, None, true)?;
        let outcome = chain::run(self.capability.as_ref(), image, steps, prepared, cancel)?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{Script, ScriptedCapability};
    use crate::core::error::{ChainError, ValidationError};
    use crate::core::task::TaskResult;
    use crate::execution::progress::{ProgressTracker, ProgressUpdate};
    use crate::vision::fixtures::test_card;
    use image::{DynamicImage, GenericImageView, RgbImage};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    fn scripted(cap: ScriptedCapability, config: EngineConfig) -> (Engine, Arc<ScriptedCapability>) {
        let cap = Arc::new(cap);
        let engine = Engine::new(cap.clone(), config).unwrap();
        (engine, cap)
    }

    fn blur(sigma: f64) -> TaskDescriptor {
        TaskDescriptor::filter("gaussian_blur").with_param("sigma", sigma)
    }

    fn small_image() -> ImageValue {
        ImageValue::new(DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Engine::builtin(EngineConfig::new().with_max_workers(0)).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_failure_is_isolated() {
        let (engine, _) = scripted(
            ScriptedCapability::new().on(2, Script::Fail("bad kernel".to_string())),
            EngineConfig::default(),
        );
        let tasks = vec![blur(1.0), blur(2.0), blur(3.0)];
        let outcome = engine.run_batch(&small_image(), Family::Filter, &tasks).unwrap();

        assert_eq!(outcome.len(), 3);
        assert!(outcome.get("filter_0").unwrap().is_success());
        assert!(outcome.get("filter_2").unwrap().is_success());
        let err = outcome.get("filter_1").unwrap().error().unwrap();
        assert!(err.contains("bad kernel"));
    }

    #[test]
    fn test_panic_is_contained() {
        let (engine, _) = scripted(ScriptedCapability::new().on(2, Script::Panic), EngineConfig::default());
        let outcome = engine
            .run_batch(&small_image(), Family::Filter, &[blur(1.0), blur(2.0)])
            .unwrap();
        assert!(outcome.get("filter_0").unwrap().is_success());
        assert!(outcome.get("filter_1").unwrap().error().unwrap().starts_with("panicked"));

        // The pool survives and keeps serving.
        let again = engine.run_batch(&small_image(), Family::Filter, &[blur(1.0)]).unwrap();
        assert_eq!(again.success_count(), 1);
    }

    #[test]
    fn test_barrier_waits_for_slowest_task() {
        let (engine, _) = scripted(
            ScriptedCapability::new().on(5, Script::Sleep(Duration::from_millis(150), 1)),
            EngineConfig::default(),
        );
        let started = Instant::now();
        let outcome = engine
            .run_batch(&small_image(), Family::Filter, &[blur(1.0), blur(5.0)])
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(outcome.success_count(), 2);
    }

    #[test]
    fn test_tasks_run_concurrently() {
        let (engine, _) = scripted(
            ScriptedCapability::new().on(7, Script::Sleep(Duration::from_millis(200), 1)),
            EngineConfig::new().with_max_workers(4),
        );
        let tasks: Vec<_> = (0..4).map(|_| blur(7.0)).collect();
        let started = Instant::now();
        let outcome = engine.run_batch(&small_image(), Family::Filter, &tasks).unwrap();
        assert_eq!(outcome.success_count(), 4);
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_timeout_marks_slow_task() {
        let (engine, _) = scripted(
            ScriptedCapability::new().on(9, Script::Sleep(Duration::from_millis(500), 1)),
            EngineConfig::new().with_task_timeout(Duration::from_millis(50)),
        );
        let started = Instant::now();
        let outcome = engine
            .run_batch(&small_image(), Family::Filter, &[blur(1.0), blur(9.0)])
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(outcome.len(), 2);
        assert!(outcome.get("filter_0").unwrap().is_success());
        assert!(outcome.get("filter_1").unwrap().error().unwrap().contains("timed out"));
    }

    #[test]
    fn test_queued_tasks_time_out_behind_hung_worker() {
        let (engine, cap) = scripted(
            ScriptedCapability::new().on(9, Script::Sleep(Duration::from_millis(400), 1)),
            EngineConfig::new()
                .with_max_workers(1)
                .with_task_timeout(Duration::from_millis(50)),
        );

        let started = Instant::now();
        let outcome = engine
            .run_batch(&small_image(), Family::Filter, &[blur(9.0), blur(1.0)])
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(outcome.get("filter_0").unwrap().error().unwrap().starts_with("timed out after"));
        assert_eq!(outcome.get("filter_1").unwrap().error(), Some("timed out waiting for a worker"));

        // The only worker is still asleep; the next batch is bounded by the
        // deadline instead of queueing behind it.
        let started = Instant::now();
        let second = engine.run_batch(&small_image(), Family::Filter, &[blur(1.0)]).unwrap();
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(second.get("filter_0").unwrap().error(), Some("timed out waiting for a worker"));

        // Once the worker is free again, abandoned jobs are skipped and new
        // work runs normally.
        std::thread::sleep(Duration::from_millis(500));
        let third = engine.run_batch(&small_image(), Family::Filter, &[blur(1.0)]).unwrap();
        assert_eq!(third.success_count(), 1);
        assert_eq!(cap.calls.lock().len(), 2);
    }

    #[test]
    fn test_panicking_progress_callback_is_contained() {
        let (engine, cap) = scripted(ScriptedCapability::new(), EngineConfig::new().with_max_workers(2));
        let tracker = Arc::new(ProgressTracker::new().with_callback(|update| {
            if let ProgressUpdate::TaskStarted { task_id } = update {
                panic!("listener rejected {}", task_id);
            }
        }));
        let control = RunControl::new().with_progress(tracker);
        let outcome = engine
            .run_batch_with(&small_image(), Family::Filter, &[blur(1.0), blur(2.0)], &control)
            .unwrap();

        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.failure_count(), 2);
        assert!(outcome
            .get("filter_0")
            .unwrap()
            .error()
            .unwrap()
            .starts_with("panicked: listener rejected"));
        assert!(cap.calls.lock().is_empty());

        let again = engine.run_batch(&small_image(), Family::Filter, &[blur(1.0)]).unwrap();
        assert_eq!(again.success_count(), 1);
    }

    #[test]
    fn test_cancelled_tasks_fail_without_running() {
        let (engine, cap) = scripted(ScriptedCapability::new(), EngineConfig::default());
        let control = RunControl::new();
        control.cancel.cancel();
        let outcome = engine
            .run_batch_with(&small_image(), Family::Filter, &[blur(1.0), blur(2.0)], &control)
            .unwrap();
        assert_eq!(outcome.len(), 2);
        assert!(outcome.iter().all(|(_, r)| r.error() == Some("cancelled")));
        assert!(cap.calls.lock().is_empty());
    }

    #[test]
    fn test_progress_events() {
        let (engine, _) = scripted(ScriptedCapability::new(), EngineConfig::default());
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&finished);
        let tracker = Arc::new(ProgressTracker::new().with_callback(move |update| {
            if let ProgressUpdate::TaskFinished { task_id, .. } = update {
                sink.lock().push(task_id);
            }
        }));
        let control = RunControl::new().with_progress(Arc::clone(&tracker));
        engine
            .run_batch_with(&small_image(), Family::Filter, &[blur(1.0), blur(2.0), blur(3.0)], &control)
            .unwrap();

        let mut seen = finished.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["filter_0", "filter_1", "filter_2"]);
        assert_eq!(tracker.finished(), 3);
    }

    #[test]
    fn test_validation_runs_before_dispatch() {
        let (engine, cap) = scripted(ScriptedCapability::new(), EngineConfig::default());
        let tasks = vec![blur(1.0), TaskDescriptor::filter("sepia")];
        let err = engine.run_batch(&small_image(), Family::Filter, &tasks).unwrap_err();
        match err {
            EngineError::Validation(report) => {
                assert!(matches!(report.errors[0], ValidationError::UnknownOperation { .. }))
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(cap.calls.lock().is_empty());

        let err = engine.run_batch(&small_image(), Family::Filter, &[]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(ref r) if r.errors == vec![ValidationError::EmptyBatch]));
    }

    #[test]
    fn test_base_image_is_not_modified() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let base = ImageValue::new(test_card(48, 32));
        let before = base.image().as_bytes().to_vec();
        let tasks = vec![
            TaskDescriptor::filter("gaussian_blur").with_param("sigma", 2.0),
            TaskDescriptor::filter("threshold"),
            TaskDescriptor::filter("gamma").with_param("gamma", 2.2),
        ];
        let outcome = engine.run_batch(&base, Family::Filter, &tasks).unwrap();
        assert_eq!(outcome.success_count(), 3);
        assert_eq!(base.image().as_bytes(), before.as_slice());
    }

    #[test]
    fn test_builtin_batch_with_crop_out_of_bounds() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let base = ImageValue::new(test_card(40, 30));
        let tasks = vec![
            TaskDescriptor::transform("rotation").with_param("angle", 30.0),
            TaskDescriptor::transform("crop")
                .with_id("too_big")
                .with_param("x", 0)
                .with_param("y", 0)
                .with_param("width", 100)
                .with_param("height", 10),
        ];
        let outcome = engine.run_batch(&base, Family::Transform, &tasks).unwrap();
        assert!(outcome.get("transform_0").unwrap().is_success());
        assert!(outcome.get("too_big").unwrap().error().is_some());
        assert_eq!(outcome.base_shape(), Some(base.shape()));
    }

    #[test]
    fn test_chain_order_matters() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let base = ImageValue::new(test_card(60, 40));
        let crop = TaskDescriptor::transform("crop")
            .with_param("x", 0)
            .with_param("y", 0)
            .with_param("width", 30)
            .with_param("height", 40);
        let rotate = TaskDescriptor::transform("rotation").with_param("angle", 90.0);

        let crop_first = engine.run_chain_on(&base, &[crop.clone(), rotate.clone()]).unwrap();
        let rotate_first = engine.run_chain_on(&base, &[rotate, crop]).unwrap();

        assert_eq!(crop_first.image.image().dimensions(), (40, 30));
        assert_eq!(rotate_first.image.image().dimensions(), (30, 40));
        assert_ne!(crop_first.image, rotate_first.image);
    }

    #[test]
    fn test_chain_failure_commits_nothing() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let mut session = ImageSession::new(ImageValue::new(test_card(20, 20)));
        let steps = vec![
            TaskDescriptor::filter("grayscale"),
            TaskDescriptor::transform("crop")
                .with_param("x", 15)
                .with_param("y", 0)
                .with_param("width", 10)
                .with_param("height", 10),
        ];
        let err = engine.run_chain(&mut session, &steps, ChainOptions::default()).unwrap_err();
        match err {
            EngineError::Chain(ChainError::StepFailed { index, operation, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(operation, "crop");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(session.revision(), 0);
        assert!(session.history().is_empty());
        assert!(session.current().shares_buffer_with(session.original()));
    }

    #[test]
    fn test_chain_stops_at_first_failing_step() {
        let (engine, cap) = scripted(
            ScriptedCapability::new().on(2, Script::Fail("kernel too wide".to_string())),
            EngineConfig::default(),
        );
        let mut session = ImageSession::new(small_image());
        let steps = vec![blur(1.0), blur(2.0), blur(3.0)];
        let err = engine.run_chain(&mut session, &steps, ChainOptions::default()).unwrap_err();

        match err {
            EngineError::Chain(ChainError::StepFailed {
                index,
                operation,
                message,
            }) => {
                assert_eq!(index, 1);
                assert_eq!(operation, "gaussian_blur");
                assert!(message.contains("kernel too wide"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(cap.calls.lock().len(), 2);
        assert_eq!(session.revision(), 0);
        assert!(session.history().is_empty());
        assert!(session.current().shares_buffer_with(session.original()));
    }

    #[test]
    fn test_chain_commits_to_session() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let mut session = ImageSession::new(ImageValue::new(test_card(20, 10)));
        let steps = vec![
            TaskDescriptor::transform("flip").with_param("flip_code", 0),
            TaskDescriptor::transform("color_adjustment")
                .with_param("channel", "red")
                .with_param("value", 40),
            TaskDescriptor::transform("resize").with_param("width", 10).with_param("height", 5),
        ];
        let outcome = engine.run_chain(&mut session, &steps, ChainOptions::default()).unwrap();

        assert!(outcome.committed);
        assert_eq!(outcome.step_durations.len(), 3);
        assert_eq!(session.revision(), 1);
        assert_eq!(session.current().image().dimensions(), (10, 5));
        let ops: Vec<_> = session.history().iter().map(|a| a.operation.as_str()).collect();
        assert_eq!(ops, vec!["flip", "color_adjustment", "resize"]);
        assert_eq!(session.history()[1].task_id, "transform_1");
    }

    #[test]
    fn test_chain_dry_run_and_original_source() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let mut session = ImageSession::new(ImageValue::new(test_card(20, 10)));
        let shrink = vec![TaskDescriptor::transform("resize").with_param("width", 4).with_param("height", 4)];
        engine.run_chain(&mut session, &shrink, ChainOptions::default()).unwrap();

        let options = ChainOptions::new().with_source(ImageSource::Original).dry_run();
        let outcome = engine
            .run_chain(&mut session, &[TaskDescriptor::filter("grayscale")], options)
            .unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.image.image().dimensions(), (20, 10));
        assert_eq!(session.revision(), 1);
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_chain_rejects_feature_step() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let err = engine
            .run_chain_on(&small_image(), &[TaskDescriptor::feature("fast_corners")])
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_chain_cancelled() {
        let engine = Engine::builtin(EngineConfig::default()).unwrap();
        let mut session = ImageSession::new(small_image());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .run_chain_with(&mut session, &[TaskDescriptor::filter("sobel")], ChainOptions::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, EngineError::Chain(ChainError::Cancelled { index: 0 })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_outcome_has_one_entry_per_task(fail_mask in proptest::collection::vec(any::<bool>(), 1..12)) {
            let mut cap = ScriptedCapability::new();
            for (i, fail) in fail_mask.iter().enumerate() {
                if *fail {
                    cap = cap.on(i as u64 + 1, Script::Fail(format!("task {}", i)));
                }
            }
            let (engine, _) = scripted(cap, EngineConfig::new().with_max_workers(3));
            let tasks: Vec<_> = (0..fail_mask.len()).map(|i| blur(i as f64 + 1.0)).collect();
            let outcome = engine.run_batch(&small_image(), Family::Filter, &tasks).unwrap();

            prop_assert_eq!(outcome.len(), tasks.len());
            prop_assert_eq!(outcome.failure_count(), fail_mask.iter().filter(|f| **f).count());
            for i in 0..tasks.len() {
                let id = format!("filter_{}", i);
                prop_assert!(outcome.get(&id).is_some());
                prop_assert_eq!(outcome.get(&id).map(TaskResult::is_success), Some(!fail_mask[i]));
            }
        }
    }
}
