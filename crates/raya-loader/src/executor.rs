//! Graph-wide execution.
//!
//! A top-level load runs in two passes:
//! 1. [`instantiate_all`] walks every record reachable from the root and
//!    waits until each one is linked;
//! 2. [`post_order_exec`] runs execute steps dependencies-first, using the
//!    current import stack as the cycle guard.

use std::rc::{Rc, Weak};

use futures_util::future::{try_join_all, FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{InstantiationFailure, LoaderError, SharedError};
use crate::linker::upgrade;
use crate::loader::{Loader, WeakLoader};
use crate::namespace::Namespace;
use crate::record::{LoadRecord, Outcome};
use crate::registration::{ExecuteFn, Execution};

/// Visited set for one top-level load.
///
/// Remembers which record first discovered each identifier so a failure can
/// be attributed to every record on the path from the root.
#[derive(Debug, Default)]
pub(crate) struct GraphWalk {
    visited: FxHashSet<String>,
    discovered_by: FxHashMap<String, String>,
}

impl GraphWalk {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as visited. Returns `false` if it was already queued.
    pub(crate) fn enter(&mut self, id: &str, parent: Option<&str>) -> bool {
        if !self.visited.insert(id.to_string()) {
            return false;
        }
        if let Some(parent) = parent {
            self.discovered_by.insert(id.to_string(), parent.to_string());
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.visited.len()
    }

    /// Records between the root and `id`, nearest first, excluding `id`
    pub(crate) fn ancestors(&self, id: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(parent) = self.discovered_by.get(current) {
            if path.iter().any(|seen| seen == parent) {
                break;
            }
            path.push(parent.clone());
            current = parent;
        }
        path
    }
}

type Linked = LocalBoxFuture<'static, (Weak<LoadRecord>, Result<(), SharedError>)>;

fn linked(record: &Rc<LoadRecord>) -> Linked {
    let waiting = match (record.error(), record.pending_link()) {
        (Some(error), _) => Err(error),
        (None, link) => Ok(link),
    };
    let record = Rc::downgrade(record);
    async move {
        let result = match waiting {
            Err(error) => Err(error),
            Ok(Some(link)) => link.await,
            Ok(None) => Ok(()),
        };
        (record, result)
    }
    .boxed_local()
}

/// Wait until every record reachable from `root` is linked.
///
/// Records are queued the first time they are seen; all queued link
/// outcomes progress concurrently. Only weak handles are held across
/// awaits.
pub(crate) async fn instantiate_all(
    loader: &WeakLoader,
    root: &Weak<LoadRecord>,
) -> Result<(), SharedError> {
    let mut walk = GraphWalk::new();
    let mut worklist = FuturesUnordered::new();
    {
        let (_, root) = upgrade(loader, root)?;
        walk.enter(&root.id, None);
        worklist.push(linked(&root));
    }

    while let Some((record, result)) = worklist.next().await {
        let (loader, record) = upgrade(loader, &record)?;
        if let Err(error) = result {
            loader.record_failed(&record, error.clone(), false);
            for ancestor in walk.ancestors(&record.id) {
                if let Some(ancestor) = loader.record(&ancestor) {
                    loader.record_failed(&ancestor, error.clone(), false);
                }
            }
            return Err(error);
        }
        for dependency in record.dependency_loads() {
            if walk.enter(&dependency.id, Some(&record.id)) {
                trace!("walk {} -> {}", record.id, dependency.id);
                worklist.push(linked(&dependency));
            }
        }
    }
    trace!("instantiated {} records", walk.len());
    Ok(())
}

/// Run `record` after its dependencies.
///
/// Returns the record's outstanding completion when it (or something it
/// waits on) is still running asynchronously.
pub(crate) fn post_order_exec(
    loader: &Loader,
    record: &Rc<LoadRecord>,
    stack: &mut Vec<String>,
) -> Result<Option<Outcome>, SharedError> {
    if stack.iter().any(|id| *id == record.id) {
        trace!("cycle back to {}", record.id);
        return Ok(None);
    }
    let execute = match record.take_execute() {
        Some(execute) => execute,
        None => {
            if let Some(error) = record.error() {
                return Err(error);
            }
            return Ok(record.pending_evaluation());
        }
    };

    stack.push(record.id.clone());
    let mut pending = Vec::new();
    for dependency in record.dependency_loads() {
        match post_order_exec(loader, &dependency, stack) {
            Ok(Some(outcome)) => pending.push(outcome),
            Ok(None) => {}
            Err(error) => {
                stack.pop();
                loader.record_failed(record, error.clone(), false);
                return Err(error);
            }
        }
    }
    stack.pop();

    if pending.is_empty() {
        return run_execute(loader, record, execute);
    }

    trace!("{} waits on {} pending dependencies", record.id, pending.len());
    let deferred_loader = loader.downgrade();
    let deferred_record = Rc::downgrade(record);
    let deferred = async move {
        let joined = try_join_all(pending).await;
        // Strong handles must not live across the await below: this future
        // is stored in the record it runs.
        let next = {
            let (loader, record) = upgrade(&deferred_loader, &deferred_record)?;
            if let Err(error) = joined {
                loader.record_failed(&record, error.clone(), false);
                return Err(error);
            }
            run_execute(&loader, &record, execute)?
        };
        match next {
            Some(outcome) => outcome.await,
            None => Ok(()),
        }
    }
    .boxed_local()
    .shared();
    record.set_pending_evaluation(deferred.clone());
    Ok(Some(deferred))
}

fn run_execute(
    loader: &Loader,
    record: &Rc<LoadRecord>,
    execute: ExecuteFn,
) -> Result<Option<Outcome>, SharedError> {
    debug!("executing {}", record.id);
    match execute() {
        Ok(Execution::Complete) => {
            loader.record_evaluated(record);
            Ok(None)
        }
        Ok(Execution::Pending(completion)) => {
            let weak_loader = loader.downgrade();
            let weak_record = Rc::downgrade(record);
            let outcome = async move {
                let settled = completion.await;
                let (loader, awaited) = upgrade(&weak_loader, &weak_record)?;
                match settled {
                    Ok(()) => {
                        loader.record_evaluated(&awaited);
                        Ok(())
                    }
                    Err(thrown) => {
                        let error = Rc::new(LoaderError::Execution {
                            id: awaited.id.clone(),
                            source: thrown,
                        });
                        loader.record_failed(&awaited, error.clone(), true);
                        Err(error)
                    }
                }
            }
            .boxed_local()
            .shared();
            record.set_pending_evaluation(outcome.clone());
            Ok(Some(outcome))
        }
        Err(thrown) => {
            let error = Rc::new(LoaderError::Execution {
                id: record.id.clone(),
                source: thrown,
            });
            loader.record_failed(record, error.clone(), true);
            Err(error)
        }
    }
}

/// The memoized future behind `Loader::import` for one root record.
///
/// Stored on the root record, so it holds the loader and the record weakly.
pub(crate) async fn top_level_load(
    loader: WeakLoader,
    record: Weak<LoadRecord>,
    id: String,
) -> Result<Namespace, SharedError> {
    let result = execute_graph(&loader, &record).await;
    let record = match record.upgrade() {
        Some(record) => record,
        None => {
            return Err(Rc::new(LoaderError::instantiation(
                &id,
                None,
                InstantiationFailure::LoaderDropped,
            )))
        }
    };
    record.clear_completion();
    result.map(|()| record.namespace.clone())
}

async fn execute_graph(loader: &WeakLoader, record: &Weak<LoadRecord>) -> Result<(), SharedError> {
    instantiate_all(loader, record).await?;
    let pending = {
        let (loader, record) = upgrade(loader, record)?;
        let mut stack = Vec::new();
        post_order_exec(&loader, &record, &mut stack)?
    };
    if let Some(outcome) = pending {
        outcome.await?;
    }
    Ok(())
}
