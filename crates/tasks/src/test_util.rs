//! Shared fixtures for workflow tests.

use crate::runtime::{Enqueuer, TaskContext, WorkerEnv};
use carelink_core::memory::MemoryStore;
use carelink_core::store::{StaffStore, VisitStore};
use carelink_core::{CoreError, Staff, StaffRole, Stores, Visit};
use carelink_realtime::{Broadcaster, ChannelRegistry};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Captures enqueue calls instead of running them.
#[derive(Default)]
pub(crate) struct RecordingEnqueuer {
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl Enqueuer for RecordingEnqueuer {
    fn enqueue_json(&self, task_name: &str, args: Value) -> Result<Uuid, CoreError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((task_name.to_string(), args));
        Ok(Uuid::new_v4())
    }
}

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub stores: Stores,
    pub registry: ChannelRegistry,
    pub enqueuer: Arc<RecordingEnqueuer>,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            stores: Stores::from_backend(store.clone()),
            store,
            registry: ChannelRegistry::new(),
            enqueuer: Arc::new(RecordingEnqueuer::default()),
        }
    }

    pub fn env(&self) -> WorkerEnv {
        WorkerEnv {
            stores: self.stores.clone(),
            broadcaster: Arc::new(self.registry.clone()) as Arc<dyn Broadcaster>,
        }
    }

    /// Context for a first attempt with the default ceiling.
    pub fn ctx(&self) -> TaskContext {
        self.ctx_attempt(1, 3)
    }

    pub fn ctx_attempt(&self, attempt: u32, max_retries: u32) -> TaskContext {
        TaskContext::new(&self.env(), self.enqueuer.clone(), attempt, max_retries)
    }

    pub async fn seed_visit(&self) -> Visit {
        let visit = Visit::new(
            Uuid::new_v4(),
            "Sarah Williams",
            "St Mary's",
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        self.store
            .insert_visit(visit.clone())
            .await
            .expect("visit insert should succeed");
        visit
    }

    pub async fn seed_admin(&self, region_id: Uuid) -> Staff {
        let admin = Staff {
            id: Uuid::new_v4(),
            name: "Priya Anand".into(),
            email: "priya@example.org".into(),
            role: StaffRole::RegionAdmin,
            region_id: Some(region_id),
        };
        self.store
            .insert_staff(admin.clone())
            .await
            .expect("staff insert should succeed");
        admin
    }
}
