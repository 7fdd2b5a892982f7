//! Query executor

use crate::core::chain::VersionChain;
use crate::core::record::{AttributeSet, VersionRecord};
use crate::core::temporal::{Bound, Timestamp};
use crate::error::Result;
use crate::query::predicate::Predicate;

/// Which slice of the two time axes a query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalMode {
    /// What is believed now about the given business instant
    Current { business: Timestamp },
    /// What was believed at `processing` about the `business` instant
    AsOf { business: Timestamp, processing: Bound },
    /// Every record ever written, oldest processing first
    History,
    /// Currently believed records across all business time
    Timeline,
    /// Currently believed records taking effect strictly after `after`
    Scheduled { after: Timestamp },
}

/// A temporal query over a set of chains
#[derive(Debug, Clone)]
pub struct TemporalQuery {
    pub mode: TemporalMode,
    pub predicate: Predicate,
    pub limit: Option<usize>,
}

impl TemporalQuery {
    pub fn new(mode: TemporalMode) -> Self {
        Self {
            mode,
            predicate: Predicate::All,
            limit: None,
        }
    }

    pub fn current(business: Timestamp) -> Self {
        Self::new(TemporalMode::Current { business })
    }

    pub fn as_of(business: Timestamp, processing: impl Into<Bound>) -> Self {
        Self::new(TemporalMode::AsOf {
            business,
            processing: processing.into(),
        })
    }

    /// Add a filter, AND-ed with any filter already set
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::take(&mut self.predicate).and(predicate);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Run `query` over `chains`.
///
/// Point-in-time modes yield at most one record per chain, in chain order.
/// `History` and `Timeline` keep each chain's own ordering; `Scheduled`
/// is ordered by business start across all chains.
pub fn execute_query<'a, A, I>(chains: I, query: &TemporalQuery) -> Result<Vec<&'a VersionRecord<A>>>
where
    A: AttributeSet,
    I: IntoIterator<Item = &'a VersionChain<A>>,
{
    let mut out = Vec::new();
    for chain in chains {
        match query.mode {
            TemporalMode::Current { business } => out.extend(chain.current_as_of(business)?),
            TemporalMode::AsOf {
                business,
                processing,
            } => out.extend(chain.as_of(business, processing)?),
            TemporalMode::History => out.extend(chain.history()),
            TemporalMode::Timeline => out.extend(chain.timeline()),
            TemporalMode::Scheduled { after } => out.extend(
                chain
                    .timeline()
                    .into_iter()
                    .filter(|r| r.business().is_some_and(|b| b.from() > after)),
            ),
        }
    }
    out.retain(|r| query.predicate.matches(r.attributes()));
    if let TemporalMode::Scheduled { .. } = query.mode {
        out.sort_by_key(|r| r.business().map(|b| b.from()));
    }
    if let Some(limit) = query.limit {
        out.truncate(limit);
    }
    Ok(out)
}
