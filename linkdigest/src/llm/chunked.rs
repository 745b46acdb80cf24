//! Map-reduce summarization for content longer than the chunk threshold.
//!
//! Each chunk is summarized on its own with a compact template; surviving
//! chunk summaries are merged in chunk order and summarized once more with
//! the caller's template.

use tracing::{info, warn};

use super::prompt::CHUNK_PROMPT_TEMPLATE;
use super::{LlmClient, LlmError, SummaryOutcome};

/// One contiguous slice of the content, `index` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkJob<'a> {
    pub index: usize,
    pub text: &'a str,
}

/// Split `content` into slices of `chunk_size` characters. The last slice may
/// be shorter; concatenating all slices gives back `content`.
pub fn split_chunks(content: &str, chunk_size: usize) -> Vec<ChunkJob<'_>> {
    let chunk_size = chunk_size.max(1);
    let mut jobs = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (byte_idx, _) in content.char_indices() {
        if count == chunk_size {
            jobs.push(ChunkJob {
                index: jobs.len() + 1,
                text: &content[start..byte_idx],
            });
            start = byte_idx;
            count = 0;
        }
        count += 1;
    }
    if start < content.len() {
        jobs.push(ChunkJob {
            index: jobs.len() + 1,
            text: &content[start..],
        });
    }

    jobs
}

pub async fn summarize_chunked(
    client: &LlmClient,
    url: &str,
    prompt_template: &str,
    content: &str,
    chunk_size: usize,
) -> SummaryOutcome {
    let chunks = split_chunks(content, chunk_size);
    let total = chunks.len();
    info!("Chunking content for URL={} into {} chunks", url, total);

    let mut chunk_summaries = Vec::with_capacity(total);
    let mut chunk_tokens = 0;
    let mut failed = 0;

    for chunk in &chunks {
        let result = client
            .summarize_once(url, CHUNK_PROMPT_TEMPLATE, Some(chunk.text))
            .await;
        chunk_tokens += result.tokens_consumed;

        if !result.success {
            failed += 1;
            warn!(
                "Chunk summarize failed for URL={} chunk={}/{} error={}",
                url,
                chunk.index,
                total,
                result.error.as_deref().unwrap_or("unknown")
            );
            continue;
        }

        let summary = result.summary.trim();
        if !summary.is_empty() {
            chunk_summaries.push(format!("[片段{}] {}", chunk.index, summary));
        }
    }

    if chunk_summaries.is_empty() {
        return SummaryOutcome::failed(
            client.effective_model(),
            chunk_tokens,
            LlmError::ChunkAggregation.to_string(),
        );
    }

    let merged = chunk_summaries.join("\n\n");
    let mut outcome = client.summarize_once(url, prompt_template, Some(&merged)).await;
    outcome.tokens_consumed += chunk_tokens;

    if failed > 0 {
        let warning = format!("{}/{} chunks failed during chunk summarization", failed, total);
        if !outcome.success {
            let existing = outcome.error.take().unwrap_or_default();
            outcome.error = Some(format!("{} final_error={}", warning, existing).trim().to_string());
        }
        outcome.warning = Some(warning);
    }

    outcome
}
