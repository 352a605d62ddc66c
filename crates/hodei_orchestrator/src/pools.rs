//! Pool manager: capacity bookkeeping, drain/resume/maintenance, quotas.
//!
//! A pool's capacity is the sum of its non-terminated workers' reported
//! resources; `used + available <= total` holds by construction because every
//! reserve checks the remainder first. The quota evaluator is nested here:
//! admission consults the namespace quota before the scheduler looks at
//! workers at all.

use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::models::{Event, EventKind, Pool, Quota, QuotaLimits};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hodei_ids::{PoolId, WorkerId};
use hodei_protocol::{PoolKind, PoolStatus, QuotaPolicyMode, ResourceSpec};
use hodei_state::{delete_entity, save_entity, Repository};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Provisioner capability behind a pool. Real backends (kubernetes, docker,
/// vm, bare metal) live outside the control plane; the local no-op variant
/// keeps single-node setups and tests honest.
#[async_trait]
pub trait Provisioner: Send + Sync {
    fn kind(&self) -> PoolKind;

    async fn reserve(&self, pool: &Pool) -> Result<()>;

    async fn release(&self, pool: &Pool) -> Result<()>;

    async fn list_workers(&self, pool: &Pool) -> Result<Vec<WorkerId>>;

    async fn terminate(&self, pool: &Pool, worker: &WorkerId) -> Result<()>;
}

/// Workers join on their own; there is nothing to provision.
pub struct LocalProvisioner;

#[async_trait]
impl Provisioner for LocalProvisioner {
    fn kind(&self) -> PoolKind {
        PoolKind::Local
    }

    async fn reserve(&self, _pool: &Pool) -> Result<()> {
        Ok(())
    }

    async fn release(&self, _pool: &Pool) -> Result<()> {
        Ok(())
    }

    async fn list_workers(&self, _pool: &Pool) -> Result<Vec<WorkerId>> {
        Ok(Vec::new())
    }

    async fn terminate(&self, _pool: &Pool, _worker: &WorkerId) -> Result<()> {
        Ok(())
    }
}

pub struct PoolManager {
    repo: Arc<dyn Repository>,
    events: Arc<EventBus>,
    provisioner: Arc<dyn Provisioner>,
    pools: Mutex<HashMap<PoolId, Pool>>,
    /// Quotas keyed by namespace (ids stay stable for the API)
    quotas: Mutex<HashMap<String, Quota>>,
}

impl PoolManager {
    pub fn new(
        repo: Arc<dyn Repository>,
        events: Arc<EventBus>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            repo,
            events,
            provisioner,
            pools: Mutex::new(HashMap::new()),
            quotas: Mutex::new(HashMap::new()),
        }
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    pub async fn load_from_repo(&self) -> Result<usize> {
        let pools: Vec<Pool> = hodei_state::load_entities(self.repo.as_ref()).await?;
        let quotas: Vec<Quota> = hodei_state::load_entities(self.repo.as_ref()).await?;
        let count = pools.len() + quotas.len();

        let mut pool_map = self.pools.lock().expect("pool lock poisoned");
        for mut pool in pools {
            // Worker-contributed capacity does not survive a restart; it is
            // rebuilt as workers re-register.
            pool.capacity.total = ResourceSpec::ZERO;
            pool.capacity.used = ResourceSpec::ZERO;
            pool.capacity.slots_used = 0;
            pool_map.insert(pool.id.clone(), pool);
        }
        drop(pool_map);

        let mut quota_map = self.quotas.lock().expect("quota lock poisoned");
        for mut quota in quotas {
            quota.usage.concurrent_jobs = 0;
            quota.usage.cpu_millis = 0;
            quota.usage.memory_mb = 0;
            quota_map.insert(quota.namespace.clone(), quota);
        }
        Ok(count)
    }

    // ========================================================================
    // Pool CRUD
    // ========================================================================

    pub async fn create_pool(&self, name: &str, kind: PoolKind, slots: u32) -> Result<Pool> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::ValidationFailed(
                "pool name must not be empty".to_string(),
            ));
        }
        let pool = Pool::new(name, kind, slots);
        {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            pools.insert(pool.id.clone(), pool.clone());
        }
        save_entity(self.repo.as_ref(), &pool).await?;
        self.events
            .publish(Event::new(EventKind::PoolCreated).pool(&pool.id));
        info!("Pool {} created ({}, {} slots)", pool.name, kind, slots);
        Ok(pool)
    }

    /// Rename and/or resize a pool. Shrinking the slot cap below the current
    /// worker count is a conflict; draining first is the supported path.
    pub async fn update_pool(
        &self,
        pool_id: &PoolId,
        name: Option<&str>,
        slots: Option<u32>,
    ) -> Result<Pool> {
        let pool = self
            .update_pool_inner(pool_id, |pool| {
                if let Some(name) = name {
                    if name.trim().is_empty() {
                        return Err(OrchestratorError::ValidationFailed(
                            "pool name must not be empty".to_string(),
                        ));
                    }
                    pool.name = name.to_string();
                }
                if let Some(slots) = slots {
                    if slots < pool.capacity.slots_used {
                        return Err(OrchestratorError::Conflict(format!(
                            "pool {} has {} workers, cannot shrink to {} slots",
                            pool.name, pool.capacity.slots_used, slots
                        )));
                    }
                    pool.capacity.slots_total = slots;
                }
                Ok(())
            })
            .await?;
        self.events
            .publish(Event::new(EventKind::PoolUpdated).pool(pool_id));
        Ok(pool)
    }

    pub async fn delete_pool(&self, pool_id: &PoolId) -> Result<()> {
        {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            let pool = pools
                .get(pool_id)
                .ok_or_else(|| OrchestratorError::not_found("pool", pool_id.to_string()))?;
            if pool.capacity.slots_used > 0 {
                return Err(OrchestratorError::Conflict(format!(
                    "pool {} still has {} registered workers",
                    pool_id, pool.capacity.slots_used
                )));
            }
            pools.remove(pool_id);
        }
        delete_entity::<Pool>(self.repo.as_ref(), pool_id.as_str()).await?;
        self.events
            .publish(Event::new(EventKind::PoolDeleted).pool(pool_id));
        Ok(())
    }

    pub fn get(&self, pool_id: &PoolId) -> Option<Pool> {
        let pools = self.pools.lock().expect("pool lock poisoned");
        pools.get(pool_id).cloned()
    }

    pub fn list(&self) -> Vec<Pool> {
        let pools = self.pools.lock().expect("pool lock poisoned");
        let mut list: Vec<Pool> = pools.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Pools the scheduler may currently place executions in.
    pub fn schedulable(&self) -> Vec<Pool> {
        let pools = self.pools.lock().expect("pool lock poisoned");
        pools.values().filter(|p| p.schedulable()).cloned().collect()
    }

    // ========================================================================
    // Worker attachment (registration path)
    // ========================================================================

    /// Admit a worker into a pool, folding its resources into the total.
    /// Rejects when the pool is at its slot cap or not accepting workers.
    pub async fn attach_worker(&self, pool_id: &PoolId, resources: &ResourceSpec) -> Result<()> {
        let pool = {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            let pool = pools
                .get_mut(pool_id)
                .ok_or_else(|| OrchestratorError::not_found("pool", pool_id.to_string()))?;
            if pool.status == PoolStatus::Error {
                return Err(OrchestratorError::RegistrationRejected(format!(
                    "pool {} is in ERROR state",
                    pool.name
                )));
            }
            if pool.capacity.slots_available() == 0 {
                return Err(OrchestratorError::RegistrationRejected(format!(
                    "pool {} is at its {}-worker cap",
                    pool.name, pool.capacity.slots_total
                )));
            }
            pool.capacity.slots_used += 1;
            pool.capacity.total = pool.capacity.total.saturating_add(resources);
            pool.updated_at = Utc::now();
            pool.clone()
        };
        save_entity(self.repo.as_ref(), &pool).await?;
        Ok(())
    }

    /// Remove a worker's contribution (unregister or loss).
    pub async fn detach_worker(&self, pool_id: &PoolId, resources: &ResourceSpec) -> Result<()> {
        let pool = {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            let Some(pool) = pools.get_mut(pool_id) else {
                return Ok(());
            };
            pool.capacity.slots_used = pool.capacity.slots_used.saturating_sub(1);
            pool.capacity.total = pool.capacity.total.saturating_sub(resources);
            // Anything still "used" beyond the shrunk total is reconciled as
            // its executions settle.
            pool.updated_at = Utc::now();
            pool.clone()
        };
        save_entity(self.repo.as_ref(), &pool).await?;
        Ok(())
    }

    // ========================================================================
    // Capacity reservation (scheduler path)
    // ========================================================================

    pub async fn reserve_capacity(&self, pool_id: &PoolId, request: &ResourceSpec) -> Result<()> {
        let pool = {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            let pool = pools
                .get_mut(pool_id)
                .ok_or_else(|| OrchestratorError::not_found("pool", pool_id.to_string()))?;
            if !request.fits_within(&pool.capacity.available()) {
                return Err(OrchestratorError::CapacityExhausted(format!(
                    "pool {} has {} free, requested {}",
                    pool.name,
                    pool.capacity.available(),
                    request
                )));
            }
            pool.capacity.used = pool.capacity.used.saturating_add(request);
            pool.updated_at = Utc::now();
            pool.clone()
        };
        save_entity(self.repo.as_ref(), &pool).await?;
        Ok(())
    }

    pub async fn release_capacity(&self, pool_id: &PoolId, request: &ResourceSpec) -> Result<()> {
        let pool = {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            let Some(pool) = pools.get_mut(pool_id) else {
                return Ok(());
            };
            pool.capacity.used = pool.capacity.used.saturating_sub(request);
            pool.updated_at = Utc::now();
            pool.clone()
        };
        save_entity(self.repo.as_ref(), &pool).await?;
        Ok(())
    }

    // ========================================================================
    // Drain / resume / maintenance
    // ========================================================================

    /// Flip a pool to DRAINING. Existing executions run to completion; the
    /// force-after-timeout cancellation of stragglers is driven by the facade,
    /// which knows about executions.
    pub async fn drain(&self, pool_id: &PoolId) -> Result<Pool> {
        let pool = self
            .update_pool_inner(pool_id, |pool| {
                if pool.status == PoolStatus::Draining {
                    return Err(OrchestratorError::Conflict(format!(
                        "pool {} is already draining",
                        pool.name
                    )));
                }
                pool.status = PoolStatus::Draining;
                Ok(())
            })
            .await?;
        self.events
            .publish(Event::new(EventKind::PoolDraining).pool(pool_id));
        info!("Pool {} draining", pool.name);
        Ok(pool)
    }

    pub async fn resume(&self, pool_id: &PoolId) -> Result<Pool> {
        let pool = self
            .update_pool_inner(pool_id, |pool| {
                if pool.status != PoolStatus::Draining && pool.status != PoolStatus::Maintenance {
                    return Err(OrchestratorError::Conflict(format!(
                        "pool {} is {}, nothing to resume",
                        pool.name, pool.status
                    )));
                }
                pool.status = PoolStatus::Active;
                pool.allow_new_jobs = true;
                pool.maintenance_reason = None;
                Ok(())
            })
            .await?;
        self.events
            .publish(Event::new(EventKind::PoolResumed).pool(pool_id));
        info!("Pool {} resumed", pool.name);
        Ok(pool)
    }

    pub async fn set_maintenance(
        &self,
        pool_id: &PoolId,
        reason: &str,
        allow_new_jobs: bool,
    ) -> Result<Pool> {
        let pool = self
            .update_pool_inner(pool_id, |pool| {
                pool.status = PoolStatus::Maintenance;
                pool.maintenance_reason = Some(reason.to_string());
                pool.allow_new_jobs = allow_new_jobs;
                Ok(())
            })
            .await?;
        self.events
            .publish(Event::new(EventKind::PoolUpdated).pool(pool_id));
        Ok(pool)
    }

    async fn update_pool_inner<F>(&self, pool_id: &PoolId, mutate: F) -> Result<Pool>
    where
        F: FnOnce(&mut Pool) -> Result<()>,
    {
        let pool = {
            let mut pools = self.pools.lock().expect("pool lock poisoned");
            let pool = pools
                .get_mut(pool_id)
                .ok_or_else(|| OrchestratorError::not_found("pool", pool_id.to_string()))?;
            mutate(pool)?;
            pool.updated_at = Utc::now();
            pool.clone()
        };
        save_entity(self.repo.as_ref(), &pool).await?;
        Ok(pool)
    }

    // ========================================================================
    // Quotas
    // ========================================================================

    pub async fn set_quota(
        &self,
        namespace: &str,
        mode: QuotaPolicyMode,
        limits: QuotaLimits,
    ) -> Result<Quota> {
        let quota = {
            let mut quotas = self.quotas.lock().expect("quota lock poisoned");
            let quota = quotas
                .entry(namespace.to_string())
                .and_modify(|q| {
                    q.mode = mode;
                    q.limits = limits;
                    q.updated_at = Utc::now();
                })
                .or_insert_with(|| Quota::new(namespace, mode, limits));
            quota.clone()
        };
        save_entity(self.repo.as_ref(), &quota).await?;
        Ok(quota)
    }

    pub fn get_quota(&self, namespace: &str) -> Option<Quota> {
        let quotas = self.quotas.lock().expect("quota lock poisoned");
        quotas.get(namespace).cloned()
    }

    pub fn list_quotas(&self) -> Vec<Quota> {
        let quotas = self.quotas.lock().expect("quota lock poisoned");
        let mut list: Vec<Quota> = quotas.values().cloned().collect();
        list.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        list
    }

    pub async fn delete_quota(&self, namespace: &str) -> Result<()> {
        let removed = {
            let mut quotas = self.quotas.lock().expect("quota lock poisoned");
            quotas.remove(namespace)
        };
        let quota =
            removed.ok_or_else(|| OrchestratorError::not_found("quota", namespace.to_string()))?;
        delete_entity::<Quota>(self.repo.as_ref(), quota.id.as_str()).await?;
        Ok(())
    }

    fn violation(quota: &Quota, request: &ResourceSpec, now: chrono::DateTime<Utc>) -> Option<String> {
        let limits = &quota.limits;
        let usage = &quota.usage;
        if limits.max_concurrent_jobs > 0 && usage.concurrent_jobs >= limits.max_concurrent_jobs {
            return Some(format!(
                "concurrent jobs at limit ({})",
                limits.max_concurrent_jobs
            ));
        }
        if limits.max_cpu_millis > 0
            && usage.cpu_millis.saturating_add(request.cpu_millis) > limits.max_cpu_millis
        {
            return Some(format!("cpu limit {} milli-cores", limits.max_cpu_millis));
        }
        if limits.max_memory_mb > 0
            && usage.memory_mb.saturating_add(request.memory_mb) > limits.max_memory_mb
        {
            return Some(format!("memory limit {} MB", limits.max_memory_mb));
        }
        if limits.max_jobs_per_hour > 0 {
            let hour_ago = now - ChronoDuration::hours(1);
            let in_window = usage.recent_dispatches.iter().filter(|t| **t > hour_ago).count();
            if in_window as u32 >= limits.max_jobs_per_hour {
                return Some(format!("rate limit {} jobs/hour", limits.max_jobs_per_hour));
            }
        }
        if limits.max_jobs_per_day > 0 {
            let day_ago = now - ChronoDuration::days(1);
            let in_window = usage.recent_dispatches.iter().filter(|t| **t > day_ago).count();
            if in_window as u32 >= limits.max_jobs_per_day {
                return Some(format!("rate limit {} jobs/day", limits.max_jobs_per_day));
            }
        }
        None
    }

    /// Quota admission check. ENFORCE blocks, WARN admits and emits a
    /// warning event, MONITOR only records. A namespace without a quota is
    /// unconstrained.
    pub fn admit(&self, namespace: &str, request: &ResourceSpec) -> Result<()> {
        let quotas = self.quotas.lock().expect("quota lock poisoned");
        let Some(quota) = quotas.get(namespace) else {
            return Ok(());
        };
        let Some(detail) = Self::violation(quota, request, Utc::now()) else {
            return Ok(());
        };
        match quota.mode {
            QuotaPolicyMode::Enforce => Err(OrchestratorError::QuotaExceeded {
                namespace: namespace.to_string(),
                detail,
            }),
            QuotaPolicyMode::Warn => {
                warn!("Quota warning for namespace '{}': {}", namespace, detail);
                self.events.publish(
                    Event::new(EventKind::QuotaWarning)
                        .payload(serde_json::json!({ "namespace": namespace, "detail": detail })),
                );
                Ok(())
            }
            QuotaPolicyMode::Monitor => Ok(()),
        }
    }

    /// Record a dispatch against the namespace quota.
    pub async fn reserve_quota(&self, namespace: &str, request: &ResourceSpec) -> Result<()> {
        let quota = {
            let mut quotas = self.quotas.lock().expect("quota lock poisoned");
            let Some(quota) = quotas.get_mut(namespace) else {
                return Ok(());
            };
            let now = Utc::now();
            quota.usage.concurrent_jobs += 1;
            quota.usage.cpu_millis = quota.usage.cpu_millis.saturating_add(request.cpu_millis);
            quota.usage.memory_mb = quota.usage.memory_mb.saturating_add(request.memory_mb);
            quota.usage.recent_dispatches.push(now);
            let day_ago = now - ChronoDuration::days(1);
            quota.usage.recent_dispatches.retain(|t| *t > day_ago);
            quota.updated_at = now;
            quota.clone()
        };
        save_entity(self.repo.as_ref(), &quota).await?;
        Ok(())
    }

    pub async fn release_quota(&self, namespace: &str, request: &ResourceSpec) -> Result<()> {
        let quota = {
            let mut quotas = self.quotas.lock().expect("quota lock poisoned");
            let Some(quota) = quotas.get_mut(namespace) else {
                return Ok(());
            };
            quota.usage.concurrent_jobs = quota.usage.concurrent_jobs.saturating_sub(1);
            quota.usage.cpu_millis = quota.usage.cpu_millis.saturating_sub(request.cpu_millis);
            quota.usage.memory_mb = quota.usage.memory_mb.saturating_sub(request.memory_mb);
            quota.updated_at = Utc::now();
            quota.clone()
        };
        save_entity(self.repo.as_ref(), &quota).await?;
        Ok(())
    }

    /// Scheduler fairness: dispatches in the last 60 s stay under
    /// `max_jobs_per_hour / 60`. Namespaces without a rate limit always pass.
    pub fn fairness_allows(&self, namespace: &str) -> bool {
        let quotas = self.quotas.lock().expect("quota lock poisoned");
        let Some(quota) = quotas.get(namespace) else {
            return true;
        };
        if quota.limits.max_jobs_per_hour == 0 {
            return true;
        }
        let per_minute = (quota.limits.max_jobs_per_hour / 60).max(1);
        let minute_ago = Utc::now() - ChronoDuration::seconds(60);
        let recent = quota
            .usage
            .recent_dispatches
            .iter()
            .filter(|t| **t > minute_ago)
            .count();
        (recent as u32) < per_minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_state::MemoryRepository;

    fn manager() -> PoolManager {
        PoolManager::new(
            Arc::new(MemoryRepository::new()),
            Arc::new(EventBus::new()),
            Arc::new(LocalProvisioner),
        )
    }

    #[tokio::test]
    async fn test_attach_detach_tracks_capacity() {
        let mgr = manager();
        let pool = mgr.create_pool("p", PoolKind::Local, 2).await.unwrap();
        let res = ResourceSpec::new(2000, 4096, 0);

        mgr.attach_worker(&pool.id, &res).await.unwrap();
        let pool_now = mgr.get(&pool.id).unwrap();
        assert_eq!(pool_now.capacity.total, res);
        assert_eq!(pool_now.capacity.slots_used, 1);

        mgr.detach_worker(&pool.id, &res).await.unwrap();
        let pool_now = mgr.get(&pool.id).unwrap();
        assert_eq!(pool_now.capacity.total, ResourceSpec::ZERO);
        assert_eq!(pool_now.capacity.slots_used, 0);
    }

    #[tokio::test]
    async fn test_slot_cap_rejects_registration() {
        let mgr = manager();
        let pool = mgr.create_pool("p", PoolKind::Local, 1).await.unwrap();
        let res = ResourceSpec::new(1000, 1024, 0);

        mgr.attach_worker(&pool.id, &res).await.unwrap();
        let err = mgr.attach_worker(&pool.id, &res).await.unwrap_err();
        assert_eq!(err.kind(), "RegistrationRejected");
    }

    #[tokio::test]
    async fn test_reserve_respects_capacity_invariant() {
        let mgr = manager();
        let pool = mgr.create_pool("p", PoolKind::Local, 4).await.unwrap();
        mgr.attach_worker(&pool.id, &ResourceSpec::new(1000, 1024, 0))
            .await
            .unwrap();

        mgr.reserve_capacity(&pool.id, &ResourceSpec::new(800, 512, 0))
            .await
            .unwrap();
        let err = mgr
            .reserve_capacity(&pool.id, &ResourceSpec::new(800, 512, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CapacityExhausted");

        mgr.release_capacity(&pool.id, &ResourceSpec::new(800, 512, 0))
            .await
            .unwrap();
        let pool_now = mgr.get(&pool.id).unwrap();
        assert_eq!(pool_now.capacity.used, ResourceSpec::ZERO);
    }

    #[tokio::test]
    async fn test_draining_pool_not_schedulable() {
        let mgr = manager();
        let pool = mgr.create_pool("p", PoolKind::Local, 4).await.unwrap();
        assert_eq!(mgr.schedulable().len(), 1);

        mgr.drain(&pool.id).await.unwrap();
        assert!(mgr.schedulable().is_empty());

        mgr.resume(&pool.id).await.unwrap();
        assert_eq!(mgr.schedulable().len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_excludes_pool() {
        let mgr = manager();
        let pool = mgr.create_pool("p", PoolKind::Local, 4).await.unwrap();
        mgr.set_maintenance(&pool.id, "disk swap", false).await.unwrap();
        assert!(mgr.schedulable().is_empty());

        mgr.resume(&pool.id).await.unwrap();
        assert_eq!(mgr.schedulable().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_enforce_blocks_at_limit() {
        let mgr = manager();
        mgr.set_quota(
            "team-a",
            QuotaPolicyMode::Enforce,
            QuotaLimits {
                max_concurrent_jobs: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let req = ResourceSpec::ZERO;
        mgr.admit("team-a", &req).unwrap();
        mgr.reserve_quota("team-a", &req).await.unwrap();

        let err = mgr.admit("team-a", &req).unwrap_err();
        assert_eq!(err.kind(), "QuotaExceeded");

        mgr.release_quota("team-a", &req).await.unwrap();
        mgr.admit("team-a", &req).unwrap();
    }

    #[tokio::test]
    async fn test_quota_warn_admits() {
        let mgr = manager();
        mgr.set_quota(
            "team-b",
            QuotaPolicyMode::Warn,
            QuotaLimits {
                max_concurrent_jobs: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let req = ResourceSpec::ZERO;
        mgr.reserve_quota("team-b", &req).await.unwrap();
        // Over the limit, but WARN admits anyway.
        mgr.admit("team-b", &req).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_namespace_unconstrained() {
        let mgr = manager();
        mgr.admit("nobody", &ResourceSpec::new(u64::MAX, u64::MAX, 0))
            .unwrap();
        assert!(mgr.fairness_allows("nobody"));
    }

    #[tokio::test]
    async fn test_fairness_window() {
        let mgr = manager();
        mgr.set_quota(
            "team-c",
            QuotaPolicyMode::Enforce,
            QuotaLimits {
                max_jobs_per_hour: 60,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(mgr.fairness_allows("team-c"));
        mgr.reserve_quota("team-c", &ResourceSpec::ZERO).await.unwrap();
        // 60/hour => 1 per minute; one dispatch this minute exhausts it.
        assert!(!mgr.fairness_allows("team-c"));
    }

    #[tokio::test]
    async fn test_delete_pool_with_workers_conflicts() {
        let mgr = manager();
        let pool = mgr.create_pool("p", PoolKind::Local, 2).await.unwrap();
        mgr.attach_worker(&pool.id, &ResourceSpec::new(1, 1, 0))
            .await
            .unwrap();

        let err = mgr.delete_pool(&pool.id).await.unwrap_err();
        assert_eq!(err.kind(), "Conflict");

        mgr.detach_worker(&pool.id, &ResourceSpec::new(1, 1, 0))
            .await
            .unwrap();
        mgr.delete_pool(&pool.id).await.unwrap();
        assert!(mgr.get(&pool.id).is_none());
    }
}
