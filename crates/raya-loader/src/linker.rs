//! Instantiation and linking of load records.
//!
//! Both phases are memoized per record (see `Loader::get_or_create`). Linking
//! a record waits for its own instantiation and for each dependency's
//! instantiation, never for a dependency's linking: the graph-wide pass in
//! the executor takes care of that, which keeps cycles from deadlocking.

use std::rc::{Rc, Weak};

use futures_util::future::try_join_all;
use log::{debug, trace};

use crate::error::{InstantiationFailure, LoaderError, SharedError};
use crate::loader::{Loader, WeakLoader};
use crate::record::{LoadRecord, Outcome, Subscription};
use crate::registration::Exporter;

fn dropped(id: &str) -> SharedError {
    Rc::new(LoaderError::instantiation(id, None, InstantiationFailure::LoaderDropped))
}

pub(crate) fn upgrade(
    loader: &WeakLoader,
    record: &Weak<LoadRecord>,
) -> Result<(Loader, Rc<LoadRecord>), SharedError> {
    match (loader.upgrade(), record.upgrade()) {
        (Some(loader), Some(record)) => Ok((loader, record)),
        (_, Some(record)) => Err(dropped(&record.id)),
        (_, None) => Err(dropped("<released record>")),
    }
}

/// Ask the instantiator for a registration and declare it
pub(crate) async fn instantiate(
    loader: WeakLoader,
    record: Weak<LoadRecord>,
) -> Result<(), SharedError> {
    let pending = {
        let (strong_loader, strong_record) = upgrade(&loader, &record)?;
        debug!("instantiating {}", strong_record.id);
        strong_loader.inner.instantiator.instantiate(
            &strong_record.id,
            strong_record.referrer(),
            &strong_loader,
        )
    };
    let result = pending.await;

    let (loader, record) = upgrade(&loader, &record)?;
    let registration = match result {
        Ok(registration) => registration,
        Err(error) => {
            let error = Rc::new(error);
            loader.record_failed(&record, error.clone(), true);
            return Err(error);
        }
    };

    let exporter = Exporter::new(&record);
    let context = loader.create_context(&record.id);
    let (dependencies, declaration) = registration.declare(exporter, context);
    trace!("{} declared dependencies {:?}", record.id, dependencies);
    record.declared(dependencies, declaration);
    Ok(())
}

/// Resolve every dependency specifier and wire live bindings
pub(crate) async fn link(
    loader: WeakLoader,
    record: Weak<LoadRecord>,
    instantiated: Outcome,
) -> Result<(), SharedError> {
    instantiated.await?;
    let (loader, record) = upgrade(&loader, &record)?;

    let pending = record
        .dependency_specifiers()
        .into_iter()
        .enumerate()
        .map(|(slot, specifier)| link_dependency(loader.clone(), record.clone(), slot, specifier));

    match try_join_all(pending).await {
        Ok(dependencies) => {
            debug!("linked {} ({} dependencies)", record.id, dependencies.len());
            record.set_dependency_loads(dependencies);
            Ok(())
        }
        Err(error) => {
            loader.record_failed(&record, error.clone(), false);
            Err(error)
        }
    }
}

async fn link_dependency(
    loader: Loader,
    importer: Rc<LoadRecord>,
    slot: usize,
    specifier: String,
) -> Result<Rc<LoadRecord>, SharedError> {
    let id = loader
        .resolve_unshared(&specifier, &importer.id)
        .map_err(|source| {
            Rc::new(LoaderError::Link {
                importer: importer.id.clone(),
                specifier: specifier.clone(),
                source: Box::new(source),
            })
        })?;
    let dependency = loader.get_or_create(&id, Some(&importer.id));
    if let Some(error) = dependency.error() {
        return Err(error);
    }
    if let Some(instantiated) = dependency.pending_instantiation() {
        instantiated.await?;
    }

    if let Some(setter) = importer.setter(slot) {
        dependency.subscribe(Subscription::new(&importer, slot));
        // Push the current namespace right away when the dependency already
        // published something or has nothing left to instantiate; later
        // changes arrive through the subscription.
        if dependency.has_hoisted_exports() || dependency.pending_instantiation().is_none() {
            trace!("initial binding {} -> {}[{}]", dependency.id, importer.id, slot);
            setter(&dependency.namespace);
        }
    }
    Ok(dependency)
}
