//! # Processor
//!
//! Drives one product issuance against a record store:
//! read, analyze, re-read under lock, merge, write.
//!
//! The engine works from an unlocked snapshot. The ingester never trusts
//! that snapshot: it re-reads the store under the lock so writers that
//! ran in between are not lost.

use crate::config::VtecConfig;
use crate::engine::{AnalysisOutcome, AnalysisRequest, VtecEngine};
use crate::ingester::{Ingester, MergeResult};
use crate::storage::{RecordQuery, RecordStore};
use crate::{PolicyWarning, VtecError, VtecRecord};
use serde::{Deserialize, Serialize};

/// Result of an issuance: what was analyzed and how the store changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueOutcome {
    pub analyzed: Vec<VtecRecord>,
    pub merge: MergeResult,
}

impl IssueOutcome {
    /// Engine and ingester warnings together.
    #[must_use]
    pub fn warnings(&self) -> Vec<&PolicyWarning> {
        self.merge.warnings.iter().collect()
    }
}

/// Engine plus ingester bound to one configuration.
#[derive(Debug)]
pub struct VtecProcessor<'a> {
    engine: VtecEngine<'a>,
    ingester: Ingester<'a>,
}

impl<'a> VtecProcessor<'a> {
    #[must_use]
    pub fn new(config: &'a VtecConfig) -> Self {
        Self::with_engine(VtecEngine::new(config))
    }

    /// Use a pre-built engine (e.g. with a custom national ETN feed).
    #[must_use]
    pub fn with_engine(engine: VtecEngine<'a>) -> Self {
        let ingester = Ingester::new(engine.config());
        Self { engine, ingester }
    }

    /// Analyze without writing.
    pub fn preview(
        &self,
        store: &mut dyn RecordStore,
        request: &AnalysisRequest,
    ) -> Result<AnalysisOutcome, VtecError> {
        let records = store.get_records(&RecordQuery::all(), false)?;
        self.engine.analyze(request, &records)
    }

    /// Analyze, then merge the analyzed records into the store.
    ///
    /// Engine warnings are carried into the merge result.
    pub fn issue(
        &self,
        store: &mut dyn RecordStore,
        request: &AnalysisRequest,
    ) -> Result<IssueOutcome, VtecError> {
        let AnalysisOutcome { analyzed, warnings } = self.preview(store, request)?;
        let mut merge =
            self.ingester
                .merge_into_store(store, &analyzed, request.creation_time)?;
        let mut all = warnings;
        all.append(&mut merge.warnings);
        merge.warnings = all;
        Ok(IssueOutcome { analyzed, merge })
    }
}
