use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::ArcStr;
use crate::engine::{BuildResult, Job, ResultType, Session, Task};
use crate::error::PanError;
use crate::template::Template;

pub(crate) type TaskBody<T> = fn(&Arc<Session>, &str) -> Result<T, PanError>;

/// Memoized tasks of one kind, keyed by string.
///
/// The first request for a key creates the task; every later request gets
/// the same task back, whether it is still queued, running or finished.
pub struct TaskCache<T> {
    session: Weak<Session>,
    result_type: ResultType,
    tasks: DashMap<ArcStr, Arc<Task<T>>>,
    body: TaskBody<T>,
}

impl<T: Clone + Send + Sync + 'static> TaskCache<T> {
    pub(crate) fn new(session: Weak<Session>, result_type: ResultType, body: TaskBody<T>) -> Self {
        TaskCache {
            session,
            result_type,
            tasks: DashMap::new(),
            body,
        }
    }

    /// Task for `key`, created on first request. With `inline` the calling
    /// thread runs it, which does nothing if it already ran or is running.
    /// Otherwise a newly created task is queued on its worker pool.
    pub fn retrieve(&self, key: &str, inline: bool) -> Result<Arc<Task<T>>, PanError> {
        let existing = self.tasks.get(key).map(|task| Arc::clone(task.value()));
        let (task, created) = match existing {
            Some(task) => (task, false),
            None => {
                let session = self.session()?;
                match self.tasks.entry(ArcStr::from(key)) {
                    Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                    Entry::Vacant(entry) => {
                        let task = session.instrument(self.result_type, key, self.body);
                        entry.insert(Arc::clone(&task));
                        (task, true)
                    }
                }
            }
        };

        if inline {
            task.run();
        } else if created {
            let session = self.session()?;
            session.submit(Arc::clone(&task) as Arc<dyn Job>);
        }
        Ok(task)
    }

    pub fn wait_for_result(&self, key: &str) -> Result<T, PanError> {
        self.retrieve(key, true)?.get()
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<Task<T>>> {
        self.tasks.get(key).map(|task| Arc::clone(task.value()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn session(&self) -> Result<Arc<Session>, PanError> {
        self.session
            .upgrade()
            .ok_or_else(|| PanError::compiler("compiler session is gone"))
    }
}

/// Compiled templates, keyed by source file path.
pub type CompileCache = TaskCache<Arc<Template>>;

/// Built object trees, keyed by object name, plus the graph of objects
/// currently waiting on one another.
pub struct BuildCache {
    tasks: TaskCache<BuildResult>,
    dependencies: Mutex<HashMap<String, String>>,
}

impl BuildCache {
    pub(crate) fn new(session: Weak<Session>, body: TaskBody<BuildResult>) -> Self {
        BuildCache {
            tasks: TaskCache::new(session, ResultType::Build, body),
            dependencies: Mutex::new(HashMap::new()),
        }
    }

    pub fn retrieve(&self, object: &str, inline: bool) -> Result<Arc<Task<BuildResult>>, PanError> {
        self.tasks.retrieve(object, inline)
    }

    pub fn wait_for_result(&self, object: &str) -> Result<BuildResult, PanError> {
        self.tasks.wait_for_result(object)
    }

    pub fn lookup(&self, object: &str) -> Option<Arc<Task<BuildResult>>> {
        self.tasks.lookup(object)
    }

    /// Records that `object` waits on `depends_on`, refusing an edge that
    /// would close a cycle. Each blocked build holds a worker, so the build
    /// pool is grown to keep one free.
    pub fn set_dependency(&self, object: &str, depends_on: &str) -> Result<(), PanError> {
        let mut deps = self.dependencies.lock().unwrap();

        let mut next = Some(depends_on);
        while let Some(current) = next {
            if current == object {
                return Err(PanError::evaluation(cycle_message(&deps, object, depends_on)));
            }
            next = deps.get(current).map(String::as_str);
        }

        deps.insert(object.to_string(), depends_on.to_string());
        if let Some(session) = self.tasks.session.upgrade() {
            session.ensure_minimum_build_thread_limit(deps.len() + 1);
        }
        debug!(object, depends_on, "object dependency");
        Ok(())
    }
}

/// `object -> depends_on -> ... -> object`
fn cycle_message(deps: &HashMap<String, String>, object: &str, depends_on: &str) -> String {
    let mut chain = vec![object];
    let mut current = depends_on;
    while current != object {
        chain.push(current);
        match deps.get(current) {
            Some(next) => current = next,
            None => break,
        }
    }
    chain.push(object);
    format!("circular object dependency: {}", chain.join(" -> "))
}
