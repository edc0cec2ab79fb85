use std::sync::Arc;

use crate::{
    config::AppConfig,
    hub::BroadcastHub,
    insights::{
        ExtractionScheduler, InsightExtractor, LlmSentimentScorer, NeutralScorer, SentimentScorer,
    },
    llm::LanguageModel,
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub hub: Arc<BroadcastHub>,
    pub scorer: Arc<dyn SentimentScorer>,
    /// `None` when no language model is configured.
    pub extractor: Option<Arc<InsightExtractor>>,
    pub scheduler: Arc<ExtractionScheduler>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        let timeout = config.model_timeout();
        let (scorer, extractor): (Arc<dyn SentimentScorer>, _) = match model {
            Some(model) => (
                Arc::new(LlmSentimentScorer::new(model.clone(), timeout)),
                Some(Arc::new(InsightExtractor::new(model, timeout))),
            ),
            None => (Arc::new(NeutralScorer), None),
        };

        Self {
            store,
            hub: Arc::new(BroadcastHub::new(config.hub_queue_capacity)),
            scheduler: Arc::new(ExtractionScheduler::new(config.insight_every_segments)),
            scorer,
            extractor,
            config: Arc::new(config),
        }
    }

    pub fn model_configured(&self) -> bool {
        self.extractor.is_some()
    }
}
