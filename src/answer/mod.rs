// Answer composition
// Grounding prompt construction and the query operation built on retrieval


use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::attributes::Attributes;
use crate::retrieval::{RetrievedChunk, Retriever};
use crate::{RagError, Result};

/// Returned without calling the model when nothing relevant was retrieved
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I don't have enough information in the knowledge base to answer that question.";

/// Which configured generative model answers a query
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Fast,
    Intelligent,
}

impl std::fmt::Display for ModelTier {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ModelTier::Fast => write!(f, "fast"),
            ModelTier::Intelligent => write!(f, "intelligent"),
        }
    }
}

/// External text completion capability
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Complete `prompt` with the model configured for `tier`. Never retried.
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedAnswer {
    pub answer: String,
    /// Attributes of every chunk used, in retrieval order, duplicates kept
    pub sources: Vec<Attributes>,
}

/// Query result as exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Attributes>,
    pub context_used: Vec<String>,
}

/// Build the grounding prompt for `query` from retrieved chunk texts, nearest first
#[inline]
pub fn build_prompt(project_name: &str, query: &str, retrieved: &[RetrievedChunk]) -> String {
    let context = retrieved.iter().map(|chunk| chunk.text.as_str()).join("\n\n");

    format!(
        "You are a helpful assistant for the '{project_name}' project. \
         Use the following pieces of context to answer the user's question. \
         If you don't know the answer based on the context, say so. \
         Do not make up information.\n\n\
         Context:\n{context}\n\n\
         Question:\n{query}\n\n\
         Answer:"
    )
}

/// Turns retrieved chunks into a grounded answer with citations
pub struct AnswerComposer {
    model: Arc<dyn GenerativeModel>,
    project_name: String,
}

impl AnswerComposer {
    #[inline]
    pub fn new(model: Arc<dyn GenerativeModel>, project_name: impl Into<String>) -> Self {
        Self {
            model,
            project_name: project_name.into(),
        }
    }

    /// Answer `query` from `retrieved` with a single model call.
    ///
    /// With nothing retrieved the model is not called and a fixed insufficient-context
    /// answer is returned. Model failures and empty completions are errors.
    #[inline]
    pub async fn compose(
        &self,
        query: &str,
        retrieved: &[RetrievedChunk],
        tier: ModelTier,
    ) -> Result<ComposedAnswer> {
        if retrieved.is_empty() {
            info!("No context retrieved, answering with insufficient context notice");
            return Ok(ComposedAnswer {
                answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let prompt = build_prompt(&self.project_name, query, retrieved);
        debug!(
            "Generating answer with {} model from {} chunks",
            tier,
            retrieved.len()
        );

        let answer = self.model.complete(&prompt, tier).await?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(RagError::Generation(
                "model returned an empty answer".to_string(),
            ));
        }

        Ok(ComposedAnswer {
            answer: answer.to_string(),
            sources: retrieved.iter().map(|c| c.attributes.clone()).collect(),
        })
    }
}

/// The query operation: retrieve, then compose
pub struct QueryService {
    retriever: Retriever,
    composer: AnswerComposer,
}

impl QueryService {
    #[inline]
    pub fn new(retriever: Retriever, composer: AnswerComposer) -> Self {
        Self {
            retriever,
            composer,
        }
    }

    /// Answer `query` from the knowledge base using up to `k` chunks, or the retriever's
    /// default when `k` is `None`
    #[inline]
    pub async fn answer(
        &self,
        query: &str,
        tier: ModelTier,
        k: Option<usize>,
    ) -> Result<QueryResponse> {
        let retrieved = match k {
            Some(k) => self.retriever.retrieve_k(query, k).await?,
            None => self.retriever.retrieve(query).await?,
        };

        let composed = self.composer.compose(query, &retrieved, tier).await?;

        Ok(QueryResponse {
            answer: composed.answer,
            sources: composed.sources,
            context_used: retrieved.into_iter().map(|c| c.text).collect(),
        })
    }
}
