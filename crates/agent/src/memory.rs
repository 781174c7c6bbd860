//! In-process collaborators: a cosine-similarity vector store usable as a
//! real provider, and a scripted completion client for deterministic runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::RwLock;

use carbonex_core::errors::CollaboratorError;

use crate::llm::{FragmentStream, LlmClient};
use crate::retrieval::{ChunkPayload, RetrievedChunk, VectorPoint, VectorStore};

pub const SCRIPTED_EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<VectorPoint>>>,
}

impl InMemoryVectorStore {
    /// Embeds `text` with `llm` and stores it as a single chunk.
    pub async fn insert_text(
        &self,
        llm: &dyn LlmClient,
        collection: &str,
        section: &str,
        text: &str,
    ) -> Result<(), CollaboratorError> {
        let vector = llm.embed(text).await?;
        let chunk_index = self.len(collection).await;
        let point = VectorPoint {
            id: uuid::Uuid::new_v4().to_string(),
            vector,
            payload: ChunkPayload {
                text: text.to_string(),
                section: section.to_string(),
                source: "inline".to_string(),
                category: "general".to_string(),
                chunk_index,
            },
        };
        self.upsert(collection, vec![point]).await
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections.read().await.get(collection).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ping(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        _vector_size: usize,
    ) -> Result<(), CollaboratorError> {
        self.collections.write().await.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), CollaboratorError> {
        let mut collections = self.collections.write().await;
        let stored = collections.entry(collection.to_string()).or_default();
        for point in points {
            match stored.iter_mut().find(|existing| existing.id == point.id) {
                Some(existing) => *existing = point,
                None => stored.push(point),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        let collections = self.collections.read().await;
        let Some(points) = collections.get(collection) else {
            return Err(CollaboratorError::Retrieval(format!(
                "collection `{collection}` does not exist"
            )));
        };

        let mut scored: Vec<_> = points
            .iter()
            .map(|point| (cosine_similarity(vector, &point.vector), point))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, point)| RetrievedChunk {
                text: point.payload.text.clone(),
                section: point.payload.section.clone(),
                score,
                source_document: point.payload.source.clone(),
            })
            .collect())
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

/// Bag-of-words vector: every lowercase alphanumeric token is hashed into
/// one of a fixed number of buckets.
pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; SCRIPTED_EMBEDDING_DIMENSIONS];
    for token in text
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.len() > 2)
    {
        let hash = token
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
        vector[(hash % SCRIPTED_EMBEDDING_DIMENSIONS as u64) as usize] += 1.0;
    }
    vector
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedPrompt {
    pub prompt: String,
    pub system: Option<String>,
}

#[derive(Clone, Debug)]
struct StreamScript {
    fragments: Vec<String>,
    failure: Option<String>,
}

/// Completion client that replays queued replies. An empty queue is a
/// completion failure, so unexpected calls surface in tests.
#[derive(Default)]
pub struct ScriptedLlmClient {
    completions: Mutex<VecDeque<Result<String, CollaboratorError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    embedding_failure: Mutex<Option<String>>,
    prompts: Mutex<Vec<RecordedPrompt>>,
    completion_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_completion(&self, reply: impl Into<String>) -> &Self {
        locked(&self.completions).push_back(Ok(reply.into()));
        self
    }

    pub fn push_completion_error(&self, message: impl Into<String>) -> &Self {
        locked(&self.completions).push_back(Err(CollaboratorError::Completion(message.into())));
        self
    }

    pub fn push_stream(&self, fragments: &[&str]) -> &Self {
        locked(&self.streams).push_back(StreamScript {
            fragments: fragments.iter().map(|fragment| fragment.to_string()).collect(),
            failure: None,
        });
        self
    }

    /// Yields `fragments`, then fails with `message`.
    pub fn push_failing_stream(&self, fragments: &[&str], message: impl Into<String>) -> &Self {
        locked(&self.streams).push_back(StreamScript {
            fragments: fragments.iter().map(|fragment| fragment.to_string()).collect(),
            failure: Some(message.into()),
        });
        self
    }

    pub fn fail_embeddings(&self, message: impl Into<String>) -> &Self {
        *locked(&self.embedding_failure) = Some(message.into());
        self
    }

    pub fn completion_calls(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<RecordedPrompt> {
        locked(&self.prompts).clone()
    }

    fn record(&self, prompt: &str, system: Option<&str>) {
        locked(&self.prompts).push(RecordedPrompt {
            prompt: prompt.to_string(),
            system: system.map(str::to_string),
        });
    }

    fn next_completion(&self) -> Result<String, CollaboratorError> {
        locked(&self.completions).pop_front().unwrap_or_else(|| {
            Err(CollaboratorError::Completion("no scripted completion left".to_string()))
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, CollaboratorError> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt, system);
        self.next_completion()
    }

    /// Replays the next stream script, or the next queued completion as a
    /// single fragment when no script is queued.
    async fn complete_stream(
        &self,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<FragmentStream, CollaboratorError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.record(prompt, system);

        let script = locked(&self.streams).pop_front();
        let items: Vec<Result<String, CollaboratorError>> = match script {
            Some(script) => {
                let mut items: Vec<_> = script.fragments.into_iter().map(Ok).collect();
                if let Some(message) = script.failure {
                    items.push(Err(CollaboratorError::Completion(message)));
                }
                items
            }
            None => vec![Ok(self.next_completion()?)],
        };
        Ok(Box::pin(stream::iter(items)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        let failure = locked(&self.embedding_failure).clone();
        if let Some(message) = failure {
            return Err(CollaboratorError::Embedding(message));
        }
        Ok(hashed_embedding(text))
    }
}
