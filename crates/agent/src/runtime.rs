use std::str::FromStr;
use std::sync::Arc;

use carbonex_core::config::{AppConfig, VectorStoreConfig, VectorStoreProvider};
use carbonex_core::errors::CollaboratorError;

use crate::calculator::{CalculationObserver, CalculatorAgent};
use crate::formalities::FormalitiesAgent;
use crate::ingest::Ingestor;
use crate::llm::{LlmClient, OpenAiClient};
use crate::memory::InMemoryVectorStore;
use crate::rag::RetrievalResponder;
use crate::retrieval::{KnowledgeBase, QdrantStore, VectorStore};

/// The two document collections the assistants read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnowledgeDomain {
    Education,
    Formalities,
}

impl KnowledgeDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Education => "education",
            Self::Formalities => "formalities",
        }
    }

    pub fn collection(self, config: &VectorStoreConfig) -> &str {
        match self {
            Self::Education => &config.education_collection,
            Self::Formalities => &config.formalities_collection,
        }
    }
}

impl FromStr for KnowledgeDomain {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "education" => Ok(Self::Education),
            "formalities" => Ok(Self::Formalities),
            other => {
                Err(format!("unknown knowledge domain `{other}` (expected education|formalities)"))
            }
        }
    }
}

/// Collaborators and assistants shared by every request.
#[derive(Clone)]
pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn VectorStore>,
    vector_store: VectorStoreConfig,
    calculator: CalculatorAgent,
    formalities: FormalitiesAgent,
    education: RetrievalResponder,
}

impl AgentRuntime {
    pub fn from_config(config: &AppConfig) -> Result<Self, CollaboratorError> {
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_config(&config.llm)?);
        let store: Arc<dyn VectorStore> = match config.vector_store.provider {
            VectorStoreProvider::Qdrant => {
                Arc::new(QdrantStore::from_config(&config.vector_store)?)
            }
            VectorStoreProvider::Memory => Arc::new(InMemoryVectorStore::default()),
        };
        Ok(Self::with_collaborators(llm, store, config.vector_store.clone()))
    }

    pub fn with_collaborators(
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn VectorStore>,
        vector_store: VectorStoreConfig,
    ) -> Self {
        let knowledge = |domain: KnowledgeDomain| {
            KnowledgeBase::new(llm.clone(), store.clone(), domain.collection(&vector_store))
        };
        let calculator = CalculatorAgent::new(llm.clone());
        let formalities = FormalitiesAgent::new(
            llm.clone(),
            knowledge(KnowledgeDomain::Formalities),
            vector_store.top_k,
        );
        let education = RetrievalResponder::new(
            knowledge(KnowledgeDomain::Education),
            llm.clone(),
            vector_store.top_k,
        );

        Self { llm, store, vector_store, calculator, formalities, education }
    }

    pub fn with_calculation_observer(mut self, observer: Arc<dyn CalculationObserver>) -> Self {
        self.calculator = self.calculator.with_observer(observer);
        self
    }

    pub fn calculator(&self) -> &CalculatorAgent {
        &self.calculator
    }

    pub fn formalities(&self) -> &FormalitiesAgent {
        &self.formalities
    }

    pub fn education(&self) -> &RetrievalResponder {
        &self.education
    }

    /// Whether the vector store behind both knowledge bases answers.
    pub async fn ping_store(&self) -> Result<(), CollaboratorError> {
        self.store.ping().await
    }

    pub fn collection(&self, domain: KnowledgeDomain) -> &str {
        domain.collection(&self.vector_store)
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.llm.clone(), self.store.clone(), self.vector_store.vector_size)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use carbonex_core::config::{AppConfig, VectorStoreProvider};
    use carbonex_core::domain::conversation::CalculatorState;

    use super::{AgentRuntime, KnowledgeDomain};
    use crate::memory::{InMemoryVectorStore, ScriptedLlmClient};
    use crate::rag::NO_RESULTS_MESSAGE;
    use crate::retrieval::VectorStore;

    #[test]
    fn knowledge_domains_parse_and_map_to_collections() {
        let config = AppConfig::default().vector_store;
        assert_eq!("Education".parse::<KnowledgeDomain>(), Ok(KnowledgeDomain::Education));
        assert!("faq".parse::<KnowledgeDomain>().is_err());
        assert_eq!(KnowledgeDomain::Education.collection(&config), "carbon_credits_kb");
        assert_eq!(KnowledgeDomain::Formalities.collection(&config), "formalities_kb");
    }

    #[test]
    fn memory_provider_builds_without_network() {
        let mut config = AppConfig::default();
        config.vector_store.provider = VectorStoreProvider::Memory;
        assert!(AgentRuntime::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn assistants_share_the_configured_collaborators() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let store = Arc::new(InMemoryVectorStore::default());
        store.ensure_collection("carbon_credits_kb", 256).await.expect("collection");
        let runtime =
            AgentRuntime::with_collaborators(llm.clone(), store, AppConfig::default().vector_store);

        let answer = runtime.education().answer("what is a carbon credit?").await;
        assert_eq!(answer.answer, NO_RESULTS_MESSAGE);

        let reply = runtime.calculator().reply("textiles", CalculatorState::default()).await;
        assert_eq!(reply.conversation_state.sector.as_deref(), Some("textiles"));
        assert_eq!(llm.embed_calls(), 1);
    }
}
