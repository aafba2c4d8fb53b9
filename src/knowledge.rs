//! Knowledge collaborator contract.

use crate::error::Result;
use async_trait::async_trait;

/// Options for a retrieval call.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    /// Maximum number of chunks to return.
    pub limit: Option<usize>,

    /// Exact queries decided upstream by analysis. When non-empty these are
    /// executed once, with no further decision-making inside retrieval.
    pub search_queries: Vec<String>,
}

/// Supplies supplementary knowledge chunks for reply composition.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        preference_key: &str,
        query: &str,
        options: RetrieveOptions,
    ) -> Result<Vec<String>>;
}

/// Retriever used when no knowledge base is configured.
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeRetriever for NoKnowledge {
    async fn retrieve(
        &self,
        _preference_key: &str,
        _query: &str,
        _options: RetrieveOptions,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
