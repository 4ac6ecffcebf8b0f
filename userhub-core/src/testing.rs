//! Test doubles for exercising partial-failure paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::coordinator::{Incident, IncidentSink};
use crate::error::StoreError;
use crate::profile::{Profile, ProfileStore, ProfileTx};

/// Wraps a store so that, once armed, every commit rolls back and fails.
pub struct FailingCommitStore<S> {
    inner: S,
    armed: Arc<AtomicBool>,
}

impl<S> FailingCommitStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.armed.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: ProfileStore> ProfileStore for FailingCommitStore<S> {
    async fn begin(&self) -> Result<Box<dyn ProfileTx>, StoreError> {
        Ok(Box::new(FailingCommitTx {
            inner: self.inner.begin().await?,
            armed: self.armed.clone(),
        }))
    }
}

struct FailingCommitTx {
    inner: Box<dyn ProfileTx>,
    armed: Arc<AtomicBool>,
}

#[async_trait]
impl ProfileTx for FailingCommitTx {
    async fn find(&mut self, uid: &str) -> Result<Option<Profile>, StoreError> {
        self.inner.find(uid).await
    }

    async fn insert(&mut self, profile: &Profile) -> Result<(), StoreError> {
        self.inner.insert(profile).await
    }

    async fn update(&mut self, profile: &Profile) -> Result<(), StoreError> {
        self.inner.update(profile).await
    }

    async fn delete(&mut self, uid: &str) -> Result<bool, StoreError> {
        self.inner.delete(uid).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.armed.load(Ordering::SeqCst) {
            self.inner.rollback().await?;
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

/// Keeps every reported incident in memory.
#[derive(Debug, Default)]
pub struct RecordingIncidentSink {
    incidents: Mutex<Vec<Incident>>,
}

impl RecordingIncidentSink {
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IncidentSink for RecordingIncidentSink {
    fn report(&self, incident: &Incident) {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(incident.clone());
    }
}
