//! Idempotent apply helpers shared by every orchestration step
//!
//! A pass may run again before the effects of the previous one are visible,
//! so every create is get-or-create and every delete tolerates a missing
//! object.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::store::{ClusterStore, ManagedObject};
use crate::error::{Error, Result};

/// Outcome of [`ensure_created`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Existing,
}

impl Applied {
    pub fn created(&self) -> bool {
        matches!(self, Applied::Created)
    }
}

/// Outcome of a cleanup step whose failure must not block teardown
#[derive(Debug)]
pub enum Cleanup {
    Removed,
    AlreadyAbsent,
    /// The delete failed; the error was logged and teardown continued
    Skipped(Error),
}

/// Create `desired` unless an object with its name already exists.
///
/// An existing object is left untouched, and losing a create race to another
/// writer counts as success.
pub async fn ensure_created<S, K>(store: &S, desired: &K) -> Result<Applied>
where
    S: ClusterStore + ?Sized,
    K: ManagedObject,
{
    let name = desired.name_any();
    let namespace = desired.namespace();

    match store.get::<K>(&name, namespace.as_deref()).await {
        Ok(_) => return Ok(Applied::Existing),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    match store.create(desired).await {
        Ok(_) => {
            info!("Created {} {}", K::kind(&()), name);
            Ok(Applied::Created)
        }
        Err(e) if e.is_already_exists() => {
            debug!("{} {} appeared concurrently", K::kind(&()), name);
            Ok(Applied::Existing)
        }
        Err(e) => Err(e),
    }
}

/// Delete an object, treating a missing object as success.
///
/// Returns whether anything was deleted.
pub async fn ensure_deleted<S, K>(store: &S, name: &str, namespace: Option<&str>) -> Result<bool>
where
    S: ClusterStore + ?Sized,
    K: ManagedObject,
{
    match store.delete::<K>(name, namespace).await {
        Ok(()) => {
            info!("Deleted {} {}", K::kind(&()), name);
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            debug!("{} {} already absent", K::kind(&()), name);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Delete an object without ever failing the caller
pub async fn delete_best_effort<S, K>(store: &S, name: &str, namespace: Option<&str>) -> Cleanup
where
    S: ClusterStore + ?Sized,
    K: ManagedObject,
{
    match ensure_deleted::<S, K>(store, name, namespace).await {
        Ok(true) => Cleanup::Removed,
        Ok(false) => Cleanup::AlreadyAbsent,
        Err(e) => {
            warn!("Failed to delete {} {}, continuing: {}", K::kind(&()), name, e);
            Cleanup::Skipped(e)
        }
    }
}

/// Fetch an object that may legitimately be absent
pub async fn get_optional<S, K>(store: &S, name: &str, namespace: Option<&str>) -> Result<Option<K>>
where
    S: ClusterStore + ?Sized,
    K: ManagedObject,
{
    match store.get::<K>(name, namespace).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
