//! Mutation protocol: insert, correct, update-as-of, transfer and terminate.
//!
//! Planners are pure: they read a chain and a processing instant and return
//! a [`MutationPlan`] listing which open records to close and which records
//! to write. Applying the plan to a staged copy of the chain re-validates
//! every invariant before anything reaches storage.

use crate::core::chain::VersionChain;
use crate::core::record::{Temporality, VersionRecord};
use crate::core::temporal::{Bound, Interval, Timestamp};
use crate::error::{Error, Result};
use std::fmt;

/// Kind of mutation, used for logging and returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Correct,
    UpdateAsOf,
    Transfer,
    Terminate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Insert => "insert",
            Operation::Correct => "correct",
            Operation::UpdateAsOf => "update_as_of",
            Operation::Transfer => "transfer",
            Operation::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// Everything one mutation writes, stamped with a single processing instant
#[derive(Debug, Clone)]
pub struct MutationPlan<A> {
    pub operation: Operation,
    /// Processing instant for every closure and every new record
    pub at: Timestamp,
    /// Sequence numbers of open records to close at `at`
    pub closes: Vec<u64>,
    /// New records, each opening at `at`
    pub inserts: Vec<VersionRecord<A>>,
}

impl<A: Clone> MutationPlan<A> {
    fn new(operation: Operation, at: Timestamp) -> Self {
        Self {
            operation,
            at,
            closes: Vec::new(),
            inserts: Vec::new(),
        }
    }

    /// Apply to `chain`, returning the revisions to persist: closed copies
    /// first, then new records. On error the chain may be partially changed,
    /// so callers apply plans to a staged copy.
    pub fn apply(&self, chain: &mut VersionChain<A>) -> Result<Vec<VersionRecord<A>>> {
        let mut written = Vec::with_capacity(self.closes.len() + self.inserts.len());
        for seq in &self.closes {
            written.push(chain.close(*seq, self.at)?.clone());
        }
        for record in &self.inserts {
            chain.append(record.clone())?;
            written.push(record.clone());
        }
        Ok(written)
    }
}

/// First version of an entity: business `[effective, ∞)` (bi-temporal) and
/// processing `[now, ∞)`.
pub fn plan_insert<A: Clone>(
    chain: &VersionChain<A>,
    attributes: A,
    effective: Option<Timestamp>,
    now: Timestamp,
) -> Result<MutationPlan<A>> {
    let mut plan = MutationPlan::new(Operation::Insert, now);
    let business = match chain.temporality() {
        Temporality::UniTemporal => {
            if let Some(active) = chain.records().find(|r| r.is_current()) {
                return Err(Error::IdentityConflict(format!(
                    "{} already has current record #{}",
                    chain.id(),
                    active.seq()
                )));
            }
            None
        }
        Temporality::BiTemporal => {
            let effective = effective.unwrap_or(now);
            let active = chain.records().find(|r| {
                r.is_current() && r.business().map_or(true, |b| b.thru() > Bound::At(effective))
            });
            if let Some(active) = active {
                return Err(Error::IdentityConflict(format!(
                    "{} is active from {} (record #{}), cannot insert effective {effective}",
                    chain.id(),
                    active.business().map_or(now, |b| b.from()),
                    active.seq()
                )));
            }
            Some(Interval::open(effective))
        }
    };
    plan.inserts.push(VersionRecord::new(
        chain.id().clone(),
        chain.next_seq(),
        attributes,
        business,
        Interval::open(now),
    ));
    Ok(plan)
}

/// Replace what is believed now with new attributes, keeping the corrected
/// record's business interval exactly.
pub fn plan_correct<A: Clone>(
    chain: &VersionChain<A>,
    attributes: A,
    now: Timestamp,
) -> Result<MutationPlan<A>> {
    let target = require_current(chain, now)?;
    let mut plan = MutationPlan::new(Operation::Correct, now);
    plan.closes.push(target.seq());
    plan.inserts.push(VersionRecord::new(
        chain.id().clone(),
        chain.next_seq(),
        attributes,
        target.business().copied(),
        Interval::open(now),
    ));
    Ok(plan)
}

/// Change attributes from `effective` to the end of the business period
/// containing it. A period starting before `effective` is split there; one
/// starting exactly at `effective` is replaced whole.
///
/// Uni-temporal chains have no business axis, so this is a plain correction.
pub fn plan_update_as_of<A: Clone>(
    chain: &VersionChain<A>,
    attributes: A,
    effective: Timestamp,
    now: Timestamp,
) -> Result<MutationPlan<A>> {
    if chain.temporality() == Temporality::UniTemporal {
        return plan_correct(chain, attributes, now);
    }
    let target = require_current(chain, effective)?;
    let business = require_business(target)?;
    let mut plan = MutationPlan::new(Operation::UpdateAsOf, now);
    plan.closes.push(target.seq());
    let mut seq = chain.next_seq();
    let changed = if business.from() < effective {
        let (before, after) = business.split_at(effective)?;
        plan.inserts.push(target.restated(seq, before, now));
        seq += 1;
        after
    } else {
        business
    };
    plan.inserts.push(VersionRecord::new(
        chain.id().clone(),
        seq,
        attributes,
        Some(changed),
        Interval::open(now),
    ));
    Ok(plan)
}

/// Schedule a change: the open-ended business period is closed at
/// `effective` and a sibling carrying the new attributes starts there.
pub fn plan_transfer<A: Clone>(
    chain: &VersionChain<A>,
    attributes: A,
    effective: Timestamp,
    now: Timestamp,
) -> Result<MutationPlan<A>> {
    if chain.temporality() == Temporality::UniTemporal {
        return Err(Error::Configuration(format!(
            "transfer of {} needs a business axis; use a correction instead",
            chain.id()
        )));
    }
    let target = chain
        .timeline()
        .into_iter()
        .find(|r| r.business().map_or(false, |b| b.is_infinite() && b.contains(effective)))
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{} has no open-ended business period containing {effective}",
                chain.id()
            ))
        })?;
    let (before, after) = require_business(target)?.split_at(effective)?;
    let mut plan = MutationPlan::new(Operation::Transfer, now);
    let seq = chain.next_seq();
    plan.closes.push(target.seq());
    plan.inserts.push(target.restated(seq, before, now));
    plan.inserts.push(VersionRecord::new(
        chain.id().clone(),
        seq + 1,
        attributes,
        Some(after),
        Interval::open(now),
    ));
    Ok(plan)
}

/// End the entity.
///
/// Bi-temporal: the period containing `effective` is cut short there and
/// every later believed period is dropped; history stays queryable.
/// Uni-temporal: the current record is closed with no replacement.
pub fn plan_terminate<A: Clone>(
    chain: &VersionChain<A>,
    effective: Option<Timestamp>,
    now: Timestamp,
) -> Result<MutationPlan<A>> {
    let mut plan = MutationPlan::new(Operation::Terminate, now);
    if chain.temporality() == Temporality::UniTemporal {
        let target = require_current(chain, now)?;
        plan.closes.push(target.seq());
        return Ok(plan);
    }
    let effective = effective.unwrap_or(now);
    let target = require_current(chain, effective)?;
    let business = require_business(target)?;
    plan.closes.push(target.seq());
    plan.closes.extend(
        chain
            .timeline()
            .into_iter()
            .filter(|r| r.seq() != target.seq())
            .filter(|r| r.business().map_or(false, |b| b.from() >= effective))
            .map(|r| r.seq()),
    );
    if business.from() < effective {
        let kept = business.closed_at(effective)?;
        plan.inserts.push(target.restated(chain.next_seq(), kept, now));
    }
    Ok(plan)
}

fn require_current<A: Clone>(chain: &VersionChain<A>, business_time: Timestamp) -> Result<&VersionRecord<A>> {
    chain.current_as_of(business_time)?.ok_or_else(|| {
        Error::NotFound(format!(
            "{} has no current record as of {business_time}",
            chain.id()
        ))
    })
}

fn require_business<A: Clone>(record: &VersionRecord<A>) -> Result<Interval> {
    record.business().copied().ok_or_else(|| {
        Error::InconsistentChain(format!(
            "record {}#{} has no business interval",
            record.id(),
            record.seq()
        ))
    })
}
