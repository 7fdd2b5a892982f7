//! Repository facade: the mutation protocol and temporal queries for one
//! entity kind

use crate::core::chain::VersionChain;
use crate::core::mutation::{
    plan_correct, plan_insert, plan_terminate, plan_transfer, plan_update_as_of, MutationPlan,
};
use crate::core::record::{AttributeSet, EntityId, EntityKind, VersionRecord};
use crate::core::temporal::{Bound, Timestamp};
use crate::error::{Error, Result};
use crate::query::{execute_query, Predicate, TemporalMode, TemporalQuery};
use crate::storage::{JournalEntry, ScanFilter};
use crate::store::BitemporalStore;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::{debug, info};

/// Typed access to the entities of one kind
pub struct Repository<A> {
    store: BitemporalStore,
    kind: EntityKind,
    _attributes: PhantomData<fn() -> A>,
}

impl<A> Clone for Repository<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            kind: self.kind.clone(),
            _attributes: PhantomData,
        }
    }
}

impl<A: AttributeSet> Repository<A> {
    pub(crate) fn new(store: BitemporalStore, kind: EntityKind) -> Self {
        Self {
            store,
            kind,
            _attributes: PhantomData,
        }
    }

    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Current instant of the store's clock
    pub fn now(&self) -> Timestamp {
        self.store.clock.now()
    }

    /// Create an entity. Without an `id` one is taken from the store's
    /// identity allocator; `effective` defaults to now.
    pub async fn insert(
        &self,
        id: Option<EntityId>,
        attributes: A,
        effective: Option<Timestamp>,
    ) -> Result<VersionRecord<A>> {
        let id = match id {
            Some(id) => id,
            None => {
                let allocator = self.store.allocator.as_ref().ok_or_else(|| {
                    Error::Configuration(format!(
                        "insert into {} without an identity and no allocator configured",
                        self.kind.name
                    ))
                })?;
                EntityId::Numeric(allocator.next_id(&self.kind.name)?)
            }
        };
        let written = self
            .mutate(&id, |chain, now| plan_insert(chain, attributes, effective, now))
            .await?;
        written
            .into_iter()
            .next()
            .ok_or_else(|| Error::InconsistentChain(format!("insert of {id} wrote nothing")))
    }

    /// Correct what is believed now; the business interval is kept
    pub async fn update(&self, id: &EntityId, attributes: A) -> Result<VersionRecord<A>> {
        let written = self
            .mutate(id, |chain, now| plan_correct(chain, attributes, now))
            .await?;
        written
            .into_iter()
            .next()
            .ok_or_else(|| Error::InconsistentChain(format!("update of {id} wrote nothing")))
    }

    /// Change attributes from `effective` onward within the period holding it.
    /// Returns the new records, earliest business period first.
    pub async fn update_as_of(
        &self,
        id: &EntityId,
        attributes: A,
        effective: Timestamp,
    ) -> Result<Vec<VersionRecord<A>>> {
        self.mutate(id, |chain, now| {
            plan_update_as_of(chain, attributes, effective, now)
        })
        .await
    }

    /// Schedule new attributes from `effective` on, closing the open-ended
    /// business period there
    pub async fn transfer(
        &self,
        id: &EntityId,
        attributes: A,
        effective: Timestamp,
    ) -> Result<Vec<VersionRecord<A>>> {
        self.mutate(id, |chain, now| {
            plan_transfer(chain, attributes, effective, now)
        })
        .await
    }

    /// End the entity now
    pub async fn terminate(&self, id: &EntityId) -> Result<()> {
        self.mutate(id, |chain, now| plan_terminate(chain, None, now))
            .await
            .map(|_| ())
    }

    /// End the entity from business date `effective` on
    pub async fn terminate_as_of(&self, id: &EntityId, effective: Timestamp) -> Result<()> {
        self.mutate(id, |chain, now| plan_terminate(chain, Some(effective), now))
            .await
            .map(|_| ())
    }

    /// What is believed now about the entity today
    pub async fn find_by_id(&self, id: &EntityId) -> Result<Option<VersionRecord<A>>> {
        let now = self.store.clock.now();
        let chain = self.load_chain(id).await?;
        Ok(chain.current_as_of(now)?.cloned())
    }

    /// What was believed at `processing` about the entity at `business`
    pub async fn find_by_id_as_of(
        &self,
        id: &EntityId,
        business: Timestamp,
        processing: impl Into<Bound>,
    ) -> Result<Option<VersionRecord<A>>> {
        let chain = self.load_chain(id).await?;
        Ok(chain.as_of(business, processing)?.cloned())
    }

    /// Every record of the entity, oldest processing first
    pub async fn history(&self, id: &EntityId) -> Result<Vec<VersionRecord<A>>> {
        let chain = self.load_chain(id).await?;
        Ok(chain.history().into_iter().cloned().collect())
    }

    /// Currently believed records of the entity across business time
    pub async fn timeline(&self, id: &EntityId) -> Result<Vec<VersionRecord<A>>> {
        let chain = self.load_chain(id).await?;
        Ok(chain.timeline().into_iter().cloned().collect())
    }

    /// Every entity as believed now, today
    pub async fn find_all(&self) -> Result<Vec<VersionRecord<A>>> {
        self.find(&TemporalQuery::current(self.store.clock.now()))
            .await
    }

    /// Every entity that existed at `business` as recorded at `processing`
    pub async fn find_all_as_of(
        &self,
        business: Timestamp,
        processing: impl Into<Bound>,
    ) -> Result<Vec<VersionRecord<A>>> {
        self.find(&TemporalQuery::as_of(business, processing)).await
    }

    /// Run a temporal query over every entity of this kind
    pub async fn find(&self, query: &TemporalQuery) -> Result<Vec<VersionRecord<A>>> {
        let chains = self.load_all().await?;
        Ok(execute_query(&chains, query)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// First match of `query`, in result order
    pub async fn find_one(&self, query: &TemporalQuery) -> Result<Option<VersionRecord<A>>> {
        let query = query.clone().limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    pub async fn count(&self, query: &TemporalQuery) -> Result<usize> {
        let chains = self.load_all().await?;
        Ok(execute_query(&chains, query)?.len())
    }

    pub async fn exists(&self, query: &TemporalQuery) -> Result<bool> {
        Ok(self.find_one(query).await?.is_some())
    }

    /// Current entities matching `predicate` today
    pub async fn find_where(&self, predicate: Predicate) -> Result<Vec<VersionRecord<A>>> {
        self.find(&TemporalQuery::current(self.store.clock.now()).filter(predicate))
            .await
    }

    /// Believed changes taking effect strictly after `after`, earliest first
    pub async fn scheduled_changes(&self, after: Timestamp) -> Result<Vec<VersionRecord<A>>> {
        self.find(&TemporalQuery::new(TemporalMode::Scheduled { after }))
            .await
    }

    /// Highest numeric identity stored for this kind
    pub async fn max_numeric_id(&self) -> Result<Option<i64>> {
        let journal = self.store.journal.read().await;
        let entries = journal.scan_all(&ScanFilter::kind(&self.kind.name)).await?;
        Ok(entries.iter().filter_map(|e| e.entity_id().as_numeric()).max())
    }

    /// Move the identity allocator past every stored numeric identity
    pub async fn seed_allocator(&self) -> Result<()> {
        let Some(allocator) = &self.store.allocator else {
            return Ok(());
        };
        if let Some(max) = self.max_numeric_id().await? {
            allocator.advance_past(&self.kind.name, max);
            debug!(kind = %self.kind.name, max, "Seeded identity allocator");
        }
        Ok(())
    }

    async fn load_chain(&self, id: &EntityId) -> Result<VersionChain<A>> {
        let entries = {
            let journal = self.store.journal.read().await;
            journal.scan(&self.kind.name, id).await?
        };
        let records = entries
            .iter()
            .map(JournalEntry::to_record)
            .collect::<Result<Vec<_>>>()?;
        VersionChain::from_records(id.clone(), self.kind.temporality, records)
    }

    /// One chain per entity, in order of first appearance in the journal
    async fn load_all(&self) -> Result<Vec<VersionChain<A>>> {
        let entries = {
            let journal = self.store.journal.read().await;
            journal.scan_all(&ScanFilter::kind(&self.kind.name)).await?
        };
        let mut order: Vec<(EntityId, Vec<VersionRecord<A>>)> = Vec::new();
        let mut position: HashMap<EntityId, usize> = HashMap::new();
        for entry in &entries {
            let record = entry.to_record()?;
            let slot = *position.entry(entry.entity_id().clone()).or_insert_with(|| {
                order.push((entry.entity_id().clone(), Vec::new()));
                order.len() - 1
            });
            order[slot].1.push(record);
        }
        order
            .into_iter()
            .map(|(id, records)| VersionChain::from_records(id, self.kind.temporality, records))
            .collect()
    }

    /// Plan under the identity's writer lock, stage the plan on a copy of the
    /// chain, then persist every revision in one batch. Nothing is written
    /// unless the whole mutation is valid.
    async fn mutate<F>(&self, id: &EntityId, plan: F) -> Result<Vec<VersionRecord<A>>>
    where
        F: FnOnce(&VersionChain<A>, Timestamp) -> Result<MutationPlan<A>>,
    {
        let lock = self.store.locks.lock_for(&self.kind.name, id);
        let result = {
            let _guard = lock.lock().await;
            debug!(kind = %self.kind.name, id = %id, "Acquired writer lock");
            self.mutate_locked(id, plan).await
        };
        drop(lock);
        self.store.locks.release(&self.kind.name, id);
        result
    }

    async fn mutate_locked<F>(&self, id: &EntityId, plan: F) -> Result<Vec<VersionRecord<A>>>
    where
        F: FnOnce(&VersionChain<A>, Timestamp) -> Result<MutationPlan<A>>,
    {
        let chain = self.load_chain(id).await?;
        let now = self.store.clock.now();
        let plan = plan(&chain, now)?;
        debug!(
            kind = %self.kind.name,
            id = %id,
            operation = %plan.operation,
            closes = ?plan.closes,
            inserts = plan.inserts.len(),
            "Planned mutation"
        );

        let mut staged = chain;
        let written = plan.apply(&mut staged)?;
        staged.verify()?;

        let entries = written
            .iter()
            .map(|record| JournalEntry::from_record(&self.kind.name, record, now))
            .collect::<Result<Vec<_>>>()?;
        self.store.journal.write().await.append_batch(entries).await?;

        info!(
            kind = %self.kind.name,
            id = %id,
            operation = %plan.operation,
            at = %now,
            records = written.len(),
            "Committed mutation"
        );
        Ok(plan.inserts)
    }
}
