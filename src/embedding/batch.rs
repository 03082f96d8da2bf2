use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use super::provider::EmbeddingProvider;

/// One text to embed, keyed by an arbitrary caller-chosen id (a node uuid,
/// or `"{uuid}:{view}"` when a node has more than one view pending).
#[derive(Debug, Clone)]
pub struct EmbedTask {
    pub id: String,
    pub text: String,
}

/// Result of a batch embedding operation.
#[derive(Debug, Serialize)]
pub struct EmbeddingResult {
    pub vectors: HashMap<String, Vec<f32>>,
    pub api_calls: usize,
}

const MAX_CONCURRENT: usize = 4;

/// Split `tasks` into batches of `batch_size` and embed them concurrently
/// (bounded to [`MAX_CONCURRENT`] in-flight HTTP calls), matching the
/// teacher's buffer-unordered batching shape.
pub async fn embed_tasks(
    provider: &dyn EmbeddingProvider,
    tasks: &[EmbedTask],
    batch_size: usize,
    on_batch: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
) -> crate::Result<EmbeddingResult> {
    if tasks.is_empty() {
        return Ok(EmbeddingResult {
            vectors: HashMap::new(),
            api_calls: 0,
        });
    }

    let batches: Vec<Vec<&EmbedTask>> = tasks.chunks(batch_size.max(1)).map(|b| b.iter().collect()).collect();
    let total_batches = batches.len();

    type BatchResult = crate::Result<Vec<(String, Vec<f32>)>>;
    let mut stream = stream::iter(batches.into_iter().map(|batch| {
        let ids: Vec<String> = batch.iter().map(|t| t.id.clone()).collect();
        let texts: Vec<String> = batch.iter().map(|t| t.text.clone()).collect();
        async move {
            let vectors = provider.embed_batch(&texts).await?;
            let result: BatchResult = Ok(ids.into_iter().zip(vectors).collect());
            result
        }
    }))
    .buffer_unordered(MAX_CONCURRENT);

    let mut vectors = HashMap::new();
    let mut api_calls = 0usize;
    let mut completed = 0usize;

    while let Some(result) = stream.next().await {
        let pairs = result?;
        api_calls += 1;
        completed += 1;
        for (id, vector) in pairs {
            vectors.insert(id, vector);
        }
        if let Some(cb) = &on_batch {
            cb(completed, total_batches);
        }
    }

    Ok(EmbeddingResult { vectors, api_calls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockProvider;

    fn task(id: &str, text: &str) -> EmbedTask {
        EmbedTask {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn embeds_every_task() {
        let provider = MockProvider::new("mock-v1".into(), 16);
        let tasks = vec![task("a", "hello"), task("b", "world")];
        let result = embed_tasks(&provider, &tasks, 10, None).await.unwrap();
        assert_eq!(result.vectors.len(), 2);
        assert!(result.vectors.contains_key("a"));
        assert!(result.vectors.contains_key("b"));
    }

    #[tokio::test]
    async fn batches_by_size() {
        let provider = MockProvider::new("mock-v1".into(), 16);
        let tasks: Vec<EmbedTask> = (0..5).map(|i| task(&format!("t{i}"), "x")).collect();
        let result = embed_tasks(&provider, &tasks, 2, None).await.unwrap();
        assert_eq!(result.vectors.len(), 5);
        assert_eq!(result.api_calls, 3);
    }

    #[tokio::test]
    async fn empty_tasks_makes_no_calls() {
        let provider = MockProvider::new("mock-v1".into(), 16);
        let result = embed_tasks(&provider, &[], 10, None).await.unwrap();
        assert!(result.vectors.is_empty());
        assert_eq!(result.api_calls, 0);
    }

    #[tokio::test]
    async fn progress_callback_fires_per_batch() {
        let provider = MockProvider::new("mock-v1".into(), 16);
        let tasks: Vec<EmbedTask> = (0..4).map(|i| task(&format!("t{i}"), "x")).collect();
        let seen = std::sync::Mutex::new(Vec::new());
        let cb = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
        embed_tasks(&provider, &tasks, 2, Some(&cb)).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
