//! One flush cycle, end to end.
//!
//! ```text
//! sealed batches → enrich → prepare → infer (1 call) → reconcile → route
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{EnforcementSink, GenerationBackend, HistorySource, PolicyProvider};
use crate::config::ResolvedConfig;
use crate::domain::{ActionRecord, Batch, EnrichedBatch, SourceId};

use super::enricher::ContextEnricher;
use super::faults::Fault;
use super::orchestrator::InferenceOrchestrator;
use super::reconciler::ResponseReconciler;
use super::router::ActionRouter;

/// Receives the batches sealed by each scheduler flush
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, batches: Vec<Batch>);
}

/// What a single cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,

    /// Number of conversations sent to the backend (0 means no call)
    pub conversations: usize,

    /// Reconciled records per source, no-ops included, in batch order
    pub actions: Vec<(SourceId, Vec<ActionRecord>)>,

    /// Sources the enforcement sink was invoked for
    pub routed_sources: usize,

    pub faults: Vec<Fault>,
}

impl CycleReport {
    /// Reconciled records for one source
    pub fn actions_for(&self, source: &SourceId) -> &[ActionRecord] {
        self.actions
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, actions)| actions.as_slice())
            .unwrap_or(&[])
    }
}

/// Enrich, infer, reconcile and route a set of sealed batches
pub struct FlushPipeline {
    enricher: Arc<ContextEnricher>,
    orchestrator: InferenceOrchestrator,
    reconciler: ResponseReconciler,
    router: ActionRouter,
}

impl FlushPipeline {
    pub fn new(
        enricher: ContextEnricher,
        orchestrator: InferenceOrchestrator,
        reconciler: ResponseReconciler,
        router: ActionRouter,
    ) -> Self {
        Self {
            enricher: Arc::new(enricher),
            orchestrator,
            reconciler,
            router,
        }
    }

    /// Wire a pipeline from resolved configuration and adapters
    pub fn from_config(
        config: &ResolvedConfig,
        history: Arc<dyn HistorySource>,
        policy: Arc<dyn PolicyProvider>,
        backend: Arc<dyn GenerationBackend>,
        sink: Arc<dyn EnforcementSink>,
    ) -> Self {
        Self::new(
            ContextEnricher::new(
                history,
                config.batching.history_limit,
                config.batching.enrichment_timeout(),
            ),
            InferenceOrchestrator::new(
                backend,
                policy,
                config.policy.system_prompt.clone(),
                config.batching.inference_timeout(),
            ),
            ResponseReconciler::new(config.reconcile.clone()),
            ActionRouter::new(sink),
        )
    }

    /// Run one cycle over the given batches.
    ///
    /// Never fails: every degradation is recorded in the report's faults.
    #[instrument(skip_all, fields(batches = batches.len()))]
    pub async fn run_cycle(&self, batches: Vec<Batch>) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let enriched = self.enrich_all(batches).await;

        let (requests, mut faults) = self.orchestrator.prepare(&enriched);
        let outcome = self.orchestrator.infer(&requests).await;
        faults.extend(outcome.fault);

        let mut actions = Vec::with_capacity(requests.len());
        for (request, output) in requests.iter().zip(outcome.outputs) {
            let records = match output {
                Some(raw) => {
                    let reconciliation = self.reconciler.reconcile(&raw, &request.schema);
                    faults.extend(reconciliation.faults);
                    reconciliation.actions
                }
                None => Vec::new(),
            };
            actions.push((request.source.clone(), records));
        }

        let routed_sources = self.router.route(actions.clone()).await;

        info!(
            %cycle_id,
            conversations = requests.len(),
            routed_sources,
            faults = faults.len(),
            "Cycle complete"
        );

        CycleReport {
            cycle_id,
            conversations: requests.len(),
            actions,
            routed_sources,
            faults,
        }
    }

    /// Refresh every batch concurrently, keeping their order
    async fn enrich_all(&self, batches: Vec<Batch>) -> Vec<EnrichedBatch> {
        let count = batches.len();
        let mut fallback: HashMap<usize, Batch> = HashMap::with_capacity(count);
        let mut tasks = JoinSet::new();

        for (idx, batch) in batches.into_iter().enumerate() {
            fallback.insert(idx, batch.clone());
            let enricher = Arc::clone(&self.enricher);
            tasks.spawn(async move { (idx, enricher.enrich(batch).await) });
        }

        let mut slots: Vec<Option<EnrichedBatch>> = (0..count).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, enriched)) => slots[idx] = Some(enriched),
                Err(e) => warn!(error = %e, "Enrichment task failed"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.or_else(|| fallback.remove(&idx).map(EnrichedBatch::from_sealed)))
            .collect()
    }
}

#[async_trait]
impl BatchHandler for FlushPipeline {
    async fn handle(&self, batches: Vec<Batch>) {
        self.run_cycle(batches).await;
    }
}
