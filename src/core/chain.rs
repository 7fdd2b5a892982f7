//! Version chain: every record of one logical entity

use crate::core::record::{EntityId, Temporality, VersionRecord};
use crate::core::temporal::{Bound, Timestamp};
use crate::error::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// The complete version history of a single entity.
///
/// Invariants, checked on every [`VersionChain::append`]:
/// - no two records overlap on both axes at once, so each business instant
///   has at most one currently believed record;
/// - records are never edited; the only permitted change is closing an open
///   processing interval through [`VersionChain::close`].
#[derive(Debug, Clone)]
pub struct VersionChain<A> {
    /// Entity this chain belongs to
    id: EntityId,
    temporality: Temporality,
    /// Records keyed by their sequence number
    records: BTreeMap<u64, VersionRecord<A>>,
}

impl<A: Clone> VersionChain<A> {
    /// Create an empty chain for an entity
    pub fn new(id: EntityId, temporality: Temporality) -> Self {
        Self {
            id,
            temporality,
            records: BTreeMap::new(),
        }
    }

    /// Rebuild a chain from stored records and check it end to end
    pub fn from_records(
        id: EntityId,
        temporality: Temporality,
        records: impl IntoIterator<Item = VersionRecord<A>>,
    ) -> Result<Self> {
        let mut chain = Self::new(id, temporality);
        for record in records {
            chain.check_shape(&record)?;
            if chain.records.insert(record.seq(), record).is_some() {
                return Err(Error::InconsistentChain(format!(
                    "duplicate sequence number in chain {}",
                    chain.id
                )));
            }
        }
        chain.verify()?;
        Ok(chain)
    }

    /// Get entity ID
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn temporality(&self) -> Temporality {
        self.temporality
    }

    /// Check if chain is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Sequence number the next appended record must use
    pub fn next_seq(&self) -> u64 {
        self.records.last_key_value().map_or(0, |(seq, _)| seq + 1)
    }

    /// All records in sequence order
    pub fn records(&self) -> impl Iterator<Item = &VersionRecord<A>> {
        self.records.values()
    }

    pub fn get(&self, seq: u64) -> Option<&VersionRecord<A>> {
        self.records.get(&seq)
    }

    /// The record currently believed to hold at `business_time`.
    ///
    /// More than one match means the chain is broken; no record is picked.
    pub fn current_as_of(&self, business_time: Timestamp) -> Result<Option<&VersionRecord<A>>> {
        self.unique(|r| r.is_current() && r.valid_at(business_time), || {
            format!("current as of {business_time}")
        })
    }

    /// The record valid at `business_time` as recorded at `processing_time`.
    ///
    /// Passing `Bound::Infinity` as processing time asks what is believed now.
    pub fn as_of(
        &self,
        business_time: Timestamp,
        processing_time: impl Into<Bound>,
    ) -> Result<Option<&VersionRecord<A>>> {
        let processing_time = processing_time.into();
        self.unique(
            |r| r.valid_at(business_time) && r.processing().contains_bound(processing_time),
            || format!("as of business {business_time}, processing {processing_time}"),
        )
    }

    /// Every record, oldest processing first; records written by the same
    /// mutation are ordered by business start.
    pub fn history(&self) -> Vec<&VersionRecord<A>> {
        let mut history: Vec<_> = self.records.values().collect();
        history.sort_by_key(|r| (r.processing().from(), r.business().map(|b| b.from()), r.seq()));
        history
    }

    /// Currently believed records across business time, earliest first
    pub fn timeline(&self) -> Vec<&VersionRecord<A>> {
        let mut timeline: Vec<_> = self.records.values().filter(|r| r.is_current()).collect();
        timeline.sort_by_key(|r| (r.business().map(|b| b.from()), r.seq()));
        timeline
    }

    /// Earliest processing instant in the chain
    pub fn first_recorded(&self) -> Option<Timestamp> {
        self.records.values().map(|r| r.processing().from()).min()
    }

    /// Admit a new record after checking it against the whole chain
    pub fn append(&mut self, record: VersionRecord<A>) -> Result<()> {
        self.check_shape(&record)?;
        if self.records.contains_key(&record.seq()) {
            return Err(Error::Overlap(format!(
                "chain {} already holds record #{}",
                self.id,
                record.seq()
            )));
        }
        if let Some(existing) = self.records.values().find(|r| collides(r, &record)) {
            return Err(Error::Overlap(format!(
                "record #{} {} overlaps record #{} {} in chain {}",
                record.seq(),
                describe(&record),
                existing.seq(),
                describe(existing),
                self.id
            )));
        }
        self.records.insert(record.seq(), record);
        Ok(())
    }

    /// Close the processing interval of record `seq` at `at`
    pub fn close(&mut self, seq: u64, at: Timestamp) -> Result<&VersionRecord<A>> {
        let closed = self
            .records
            .get(&seq)
            .ok_or_else(|| {
                Error::NotFound(format!("record #{seq} in chain {}", self.id))
            })?
            .closed_at(at)?;
        self.records.insert(seq, closed);
        Ok(&self.records[&seq])
    }

    /// Re-check every invariant over the whole chain.
    ///
    /// Sweeps processing time in order. The records believed at the sweep
    /// instant never overlap on business time, so a new record can only
    /// collide with the live one that starts nearest before it ends.
    pub fn verify(&self) -> Result<()> {
        let mut by_processing: Vec<_> = self.records.values().collect();
        by_processing.sort_by_key(|r| (r.processing().from(), r.seq()));

        let mut live: BTreeMap<Option<Timestamp>, &VersionRecord<A>> = BTreeMap::new();
        let mut expiries = BinaryHeap::new();
        for record in by_processing {
            self.check_shape(record)?;

            let now = Bound::At(record.processing().from());
            while let Some(Reverse((thru, start, seq))) = expiries.peek().copied() {
                if thru > now {
                    break;
                }
                expiries.pop();
                if live.get(&start).is_some_and(|r| r.seq() == seq) {
                    live.remove(&start);
                }
            }

            let start = record.business().map(|b| b.from());
            let nearest = match record.business().map(|b| b.thru()) {
                Some(Bound::At(thru)) => live.range(..Some(thru)).next_back(),
                _ => live.iter().next_back(),
            };
            if let Some((_, &other)) = nearest {
                if collides(other, record) {
                    return Err(Error::InconsistentChain(format!(
                        "records #{} {} and #{} {} overlap in chain {}",
                        other.seq(),
                        describe(other),
                        record.seq(),
                        describe(record),
                        self.id
                    )));
                }
            }

            live.insert(start, record);
            expiries.push(Reverse((record.processing().thru(), start, record.seq())));
        }
        Ok(())
    }

    fn check_shape(&self, record: &VersionRecord<A>) -> Result<()> {
        if record.id() != &self.id {
            return Err(Error::InconsistentChain(format!(
                "record for {} offered to chain {}",
                record.id(),
                self.id
            )));
        }
        let has_business = record.business().is_some();
        match (self.temporality, has_business) {
            (Temporality::BiTemporal, false) => Err(Error::InconsistentChain(format!(
                "bi-temporal chain {} needs a business interval on record #{}",
                self.id,
                record.seq()
            ))),
            (Temporality::UniTemporal, true) => Err(Error::InconsistentChain(format!(
                "uni-temporal chain {} cannot carry a business interval on record #{}",
                self.id,
                record.seq()
            ))),
            _ => Ok(()),
        }
    }

    fn unique<F, D>(&self, pred: F, describe_query: D) -> Result<Option<&VersionRecord<A>>>
    where
        F: Fn(&VersionRecord<A>) -> bool,
        D: FnOnce() -> String,
    {
        let mut matches = self.records.values().filter(|r| pred(r));
        let first = matches.next();
        if let Some(second) = matches.next() {
            return Err(Error::InconsistentChain(format!(
                "chain {} has records #{} and #{} both {}",
                self.id,
                first.map_or(0, |r| r.seq()),
                second.seq(),
                describe_query()
            )));
        }
        Ok(first)
    }
}

fn collides<A: Clone>(a: &VersionRecord<A>, b: &VersionRecord<A>) -> bool {
    a.business_overlaps(b) && a.processing().overlaps(b.processing())
}

fn describe<A: Clone>(record: &VersionRecord<A>) -> String {
    match record.business() {
        Some(business) => format!("business {business} processing {}", record.processing()),
        None => format!("processing {}", record.processing()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::temporal::Interval;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    fn bi(seq: u64, amount: i64, business: (i64, Option<i64>), processing: (i64, Option<i64>)) -> VersionRecord<i64> {
        let interval = |(from, thru): (i64, Option<i64>)| match thru {
            Some(thru) => Interval::new(ts(from), ts(thru)).unwrap(),
            None => Interval::open(ts(from)),
        };
        VersionRecord::new(
            EntityId::Numeric(1),
            seq,
            amount,
            Some(interval(business)),
            interval(processing),
        )
    }

    #[test]
    fn test_chain_creation() {
        let chain: VersionChain<i64> = VersionChain::new(EntityId::Numeric(1), Temporality::BiTemporal);
        assert!(chain.is_empty());
        assert_eq!(chain.next_seq(), 0);
        assert_eq!(chain.current_as_of(ts(0)).unwrap(), None);
    }

    #[test]
    fn test_append_rejects_double_current() {
        let mut chain = VersionChain::new(EntityId::Numeric(1), Temporality::BiTemporal);
        chain.append(bi(0, 100, (0, None), (10, None))).unwrap();

        let err = chain.append(bi(1, 200, (50, None), (20, None))).unwrap_err();
        assert!(matches!(err, Error::Overlap(_)));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_wrong_shape() {
        let mut chain = VersionChain::new(EntityId::Numeric(1), Temporality::UniTemporal);
        let err = chain.append(bi(0, 1, (0, None), (0, None))).unwrap_err();
        assert!(matches!(err, Error::InconsistentChain(_)));

        let mut chain = VersionChain::new(EntityId::Numeric(2), Temporality::BiTemporal);
        let err = chain.append(bi(0, 1, (0, None), (0, None))).unwrap_err();
        assert!(matches!(err, Error::InconsistentChain(_)));
    }

    #[test]
    fn test_close_then_correct() {
        let mut chain = VersionChain::new(EntityId::Numeric(1), Temporality::BiTemporal);
        chain.append(bi(0, 100, (0, None), (10, None))).unwrap();
        chain.close(0, ts(20)).unwrap();
        chain.append(bi(1, 150, (0, None), (20, None))).unwrap();

        assert_eq!(*chain.current_as_of(ts(5)).unwrap().unwrap().attributes(), 150);
        assert_eq!(*chain.as_of(ts(5), ts(15)).unwrap().unwrap().attributes(), 100);
        assert_eq!(chain.as_of(ts(5), ts(5)).unwrap(), None);
        assert_eq!(*chain.as_of(ts(5), Bound::Infinity).unwrap().unwrap().attributes(), 150);

        let history: Vec<_> = chain.history().iter().map(|r| *r.attributes()).collect();
        assert_eq!(history, vec![100, 150]);
        chain.verify().unwrap();
    }

    #[test]
    fn test_close_same_instant_fails() {
        let mut chain = VersionChain::new(EntityId::Numeric(1), Temporality::BiTemporal);
        chain.append(bi(0, 100, (0, None), (10, None))).unwrap();
        assert!(matches!(chain.close(0, ts(10)), Err(Error::InvalidInterval(_))));
        assert!(matches!(chain.close(7, ts(20)), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_current_lookup_refuses_to_pick() {
        // Loaded behind the validator's back: two open records at business 0.
        let mut chain = VersionChain::new(EntityId::Numeric(1), Temporality::BiTemporal);
        chain.records.insert(0, bi(0, 100, (0, None), (10, None)));
        chain.records.insert(1, bi(1, 200, (0, None), (20, None)));

        assert!(matches!(chain.current_as_of(ts(1)), Err(Error::InconsistentChain(_))));
        assert!(matches!(chain.verify(), Err(Error::InconsistentChain(_))));
    }

    #[test]
    fn test_from_records_validates() {
        let records = vec![bi(0, 100, (0, None), (10, None)), bi(1, 200, (0, None), (20, None))];
        assert!(VersionChain::from_records(EntityId::Numeric(1), Temporality::BiTemporal, records).is_err());
    }

    #[test]
    fn test_verify_finds_overlap_across_processing() {
        // #2 was believed over [5, 30) and collides with both later records
        let records = vec![
            bi(0, 100, (0, Some(50)), (10, None)),
            bi(1, 200, (50, None), (10, None)),
            bi(2, 300, (40, Some(60)), (5, Some(30))),
        ];
        let err = VersionChain::from_records(EntityId::Numeric(1), Temporality::BiTemporal, records)
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentChain(_)));

        // Closed exactly where the next belief starts: no overlap
        let records = vec![
            bi(0, 100, (0, None), (10, Some(20))),
            bi(1, 150, (0, Some(40)), (20, None)),
            bi(2, 300, (40, None), (20, None)),
        ];
        VersionChain::from_records(EntityId::Numeric(1), Temporality::BiTemporal, records).unwrap();
    }

    #[test]
    fn test_verify_long_correction_chain() {
        let n = 5_000;
        let records = (0..n).map(|i| {
            let closed = if i + 1 < n { Some(i + 1) } else { None };
            bi(i as u64, i, (0, None), (i, closed))
        });
        let chain = VersionChain::from_records(EntityId::Numeric(1), Temporality::BiTemporal, records)
            .unwrap();
        assert_eq!(chain.len(), 5_000);
        assert_eq!(*chain.current_as_of(ts(0)).unwrap().unwrap().attributes(), n - 1);
    }

    #[test]
    fn test_timeline_orders_by_business() {
        let mut chain = VersionChain::new(EntityId::Numeric(1), Temporality::BiTemporal);
        chain.append(bi(0, 100, (0, None), (10, None))).unwrap();
        chain.close(0, ts(20)).unwrap();
        chain.append(bi(1, 100, (0, Some(50)), (20, None))).unwrap();
        chain.append(bi(2, 300, (50, None), (20, None))).unwrap();

        let timeline: Vec<_> = chain.timeline().iter().map(|r| r.seq()).collect();
        assert_eq!(timeline, vec![1, 2]);
        assert_eq!(chain.first_recorded(), Some(ts(10)));
    }
}
