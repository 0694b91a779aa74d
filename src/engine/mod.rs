//! Memoized, concurrent execution of the compiler stages.
//!
//! Each stage (compile, build, validate, output) keeps a [`TaskCache`] of
//! at-most-once tasks. A task is either queued on the worker pool of its
//! [`ResultType`] or run inline by a caller that needs its value right away.
//! Every queued task is also recorded in the results queue, which the
//! compiler drains to collect errors.

mod build;
mod cache;
mod compile;
mod executor;
mod results;
mod task;
mod valid;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender, unbounded};
use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::compiler::{CompilerOptions, CompilerStatistics};
use crate::error::PanError;
use crate::source::SourceRepository;

pub use build::BuildResult;
pub use cache::{BuildCache, CompileCache, TaskCache};
pub use results::FinalResult;
pub use task::{Job, Task};

use executor::WorkerPool;

/// Kind of work a task does. Each kind has its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultType {
    Compiled,
    Build,
    Valid1,
    Output,
    Dependency,
    Annotation,
}

impl ResultType {
    pub const ALL: [ResultType; 6] = [
        ResultType::Compiled,
        ResultType::Build,
        ResultType::Valid1,
        ResultType::Output,
        ResultType::Dependency,
        ResultType::Annotation,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            ResultType::Compiled => "compile",
            ResultType::Build => "build",
            ResultType::Valid1 => "validate",
            ResultType::Output => "output",
            ResultType::Dependency => "dependency",
            ResultType::Annotation => "annotation",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Default)]
struct Counters {
    started: [AtomicUsize; 6],
    finished: [AtomicUsize; 6],
}

/// Everything shared by the tasks of one compiler run.
pub struct Session {
    pub(crate) options: CompilerOptions,
    pub(crate) repository: SourceRepository,
    pub(crate) compiled: CompileCache,
    pub(crate) built: BuildCache,
    pub(crate) validated: TaskCache<Arc<FinalResult>>,
    /// Source files whose objects get written out.
    pub(crate) requested: HashSet<Utf8PathBuf>,
    pools: Vec<WorkerPool>,
    results: (Sender<Arc<dyn Job>>, Receiver<Arc<dyn Job>>),
    submitted: AtomicUsize,
    counters: Counters,
    task_style: ProgressStyle,
    started: Instant,
}

impl Session {
    pub(crate) fn new(
        options: CompilerOptions,
        requested: HashSet<Utf8PathBuf>,
    ) -> Result<Arc<Session>, PanError> {
        let repository =
            SourceRepository::new(options.session_dir.clone(), options.include_dirs.clone())?;
        let task_style = crate::utils::task_style()
            .map_err(|e| PanError::configuration(format!("invalid progress style: {e}")))?;
        let threads = options.threads;

        Ok(Arc::new_cyclic(|session: &Weak<Session>| Session {
            compiled: TaskCache::new(session.clone(), ResultType::Compiled, compile::compile),
            built: BuildCache::new(session.clone(), build::build),
            validated: TaskCache::new(session.clone(), ResultType::Valid1, valid::validate),
            pools: ResultType::ALL
                .iter()
                .map(|&rt| WorkerPool::new(rt, threads))
                .collect(),
            results: unbounded(),
            submitted: AtomicUsize::new(0),
            counters: Counters::default(),
            task_style,
            started: Instant::now(),
            options,
            repository,
            requested,
        }))
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn repository(&self) -> &SourceRepository {
        &self.repository
    }

    /// Queues a job on the pool for its result type and records it in the
    /// results queue.
    pub(crate) fn submit(&self, job: Arc<dyn Job>) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let pool = &self.pools[job.result_type().index()];
        let _ = self.results.0.send(Arc::clone(&job));
        pool.submit(job);
    }

    pub(crate) fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub(crate) fn results(&self) -> &Receiver<Arc<dyn Job>> {
        &self.results.1
    }

    /// Wraps a stage body into a task that reports progress and statistics.
    pub(crate) fn instrument<T, F>(self: &Arc<Self>, result_type: ResultType, key: &str, body: F) -> Arc<Task<T>>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Arc<Session>, &str) -> Result<T, PanError> + Send + 'static,
    {
        let session = Arc::downgrade(self);
        let name = key.to_string();
        Arc::new(Task::new(key, result_type, move || {
            let session = session
                .upgrade()
                .ok_or_else(|| PanError::compiler("compiler session is gone"))?;

            let span = tracing::span!(Level::INFO, "task", name = %name, kind = %result_type);
            span.pb_set_style(&session.task_style);
            span.pb_set_message(&format!("{result_type} {name}"));
            let _enter = span.enter();

            session.counters.started[result_type.index()].fetch_add(1, Ordering::Relaxed);
            let result = body(&session, &name);
            session.counters.finished[result_type.index()].fetch_add(1, Ordering::Relaxed);
            result
        }))
    }

    /// Queues a task that is not memoized in any cache.
    pub(crate) fn spawn<T, F>(self: &Arc<Self>, result_type: ResultType, key: &str, body: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&Arc<Session>, &str) -> Result<T, PanError> + Send + 'static,
    {
        let task = self.instrument(result_type, key, body);
        self.submit(task);
    }

    /// Queues the compilation of `file`. Without formatters no build reads
    /// the template back, so it is not cached.
    pub(crate) fn submit_compile(self: &Arc<Self>, file: &Utf8Path) -> Result<(), PanError> {
        if self.options.formatters.is_empty() {
            self.spawn(ResultType::Compiled, file.as_str(), compile::compile);
        } else {
            self.compiled.retrieve(file.as_str(), false)?;
        }
        Ok(())
    }

    pub(crate) fn ensure_minimum_build_thread_limit(&self, threads: usize) {
        self.pools[ResultType::Build.index()].ensure_minimum(threads);
    }

    pub(crate) fn build_pool_size(&self) -> usize {
        self.pools[ResultType::Build.index()].size()
    }

    pub(crate) fn shutdown(&self) {
        for pool in &self.pools {
            pool.shutdown();
        }
    }

    pub(crate) fn statistics(&self, file_count: usize) -> CompilerStatistics {
        let read = |counters: &[AtomicUsize; 6]| {
            let mut out = [0; 6];
            for (slot, counter) in out.iter_mut().zip(counters) {
                *slot = counter.load(Ordering::Relaxed);
            }
            out
        };
        CompilerStatistics {
            file_count,
            started: read(&self.counters.started),
            finished: read(&self.counters.finished),
            build_time: self.elapsed(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Joining here could mean a worker joining itself.
        for pool in &self.pools {
            pool.close();
        }
    }
}
