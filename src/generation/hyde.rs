//! Hypothetical document generation for HyDE retrieval
//!
//! Requests K independent abstracts for a claim, concurrently. Each attempt can
//! fail on its own (timeout, backend error, unusable output) without affecting the
//! others; callers get every success plus every per-attempt error.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::{GenerationClient, GenerationError};
use crate::errors::EvidenceError;

/// Generated text standing in for a real document during one query.
#[derive(Debug, Clone, PartialEq)]
pub struct HypotheticalDocument {
    /// 1-based attempt index, for logs only
    pub index: usize,
    pub text: String,
}

/// Build the prompt asking for a hypothetical abstract.
pub fn build_hyde_prompt(query: &str) -> String {
    format!(
        "You are assisting a literature search for scientific fact-checking.\n\
         Write a concise, plausible abstract (about 150 words) of a peer-reviewed paper \
         that directly addresses the claim or question below. Use the vocabulary a \
         researcher in the field would use.\n\
         Output only the abstract text, with no title, heading or commentary.\n\n\
         Claim: {query}"
    )
}

/// Strip reasoning blocks and leading labels from a model response.
///
/// Returns `GenerationError::Malformed` if nothing usable remains.
pub fn clean_hypothetical(raw: &str) -> Result<String, GenerationError> {
    let think_re = Regex::new(r"(?s)<think>.*?</think>")
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;
    let label_re = Regex::new(
        r"(?i)^\s*(?:\*\*|#+\s*)?(?:hypothetical\s+)?(?:abstract|answer|passage)\s*(?::\s*(?:\*\*)?|(?:\*\*)?\s*:)\s*",
    )
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let without_think = think_re.replace_all(raw, "");
    let text = label_re.replace(without_think.trim(), "");
    let text = text.trim();

    if text.is_empty() {
        return Err(GenerationError::Malformed(
            "model returned no abstract text".to_string(),
        ));
    }
    Ok(text.to_string())
}

/// Orchestrates K generation attempts against a shared client.
pub struct HypotheticalDocumentGenerator {
    client: Arc<dyn GenerationClient>,
    attempt_timeout: Duration,
}

impl HypotheticalDocumentGenerator {
    pub fn new(client: Arc<dyn GenerationClient>, attempt_timeout: Duration) -> Self {
        HypotheticalDocumentGenerator {
            client,
            attempt_timeout,
        }
    }

    /// Generate up to `k` hypothetical documents for `query_text`.
    ///
    /// k = 0 returns immediately without touching the backend. Each attempt is
    /// bounded by the per-attempt timeout and, if given, by `deadline`.
    /// Documents come back in index order regardless of completion order.
    pub async fn generate(
        &self,
        query_text: &str,
        k: usize,
        temperature: f32,
        deadline: Option<Instant>,
    ) -> (Vec<HypotheticalDocument>, Vec<EvidenceError>) {
        if k == 0 {
            return (Vec::new(), Vec::new());
        }

        let budget = match deadline {
            Some(deadline) => self
                .attempt_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.attempt_timeout,
        };
        let budget_ms = budget.as_millis() as u64;
        let prompt: Arc<str> = Arc::from(build_hyde_prompt(query_text));

        let mut tasks = JoinSet::new();
        for index in 1..=k {
            let client = Arc::clone(&self.client);
            let prompt = Arc::clone(&prompt);
            tasks.spawn(async move {
                let outcome =
                    match tokio::time::timeout(budget, client.generate(&prompt, temperature)).await
                    {
                        Ok(Ok(raw)) => clean_hypothetical(&raw),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(GenerationError::Timeout(budget_ms)),
                    };
                (index, outcome)
            });
        }

        let mut pending: BTreeSet<usize> = (1..=k).collect();
        let mut documents = Vec::with_capacity(k);
        let mut errors = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(text))) => {
                    pending.remove(&index);
                    tracing::debug!(index, chars = text.len(), "Hypothetical document generated");
                    documents.push(HypotheticalDocument { index, text });
                }
                Ok((index, Err(source))) => {
                    pending.remove(&index);
                    tracing::warn!(index, error = %source, "Hypothetical document generation failed");
                    errors.push(EvidenceError::Generation { index, source });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Hypothetical document task failed");
                }
            }
        }

        // Tasks that panicked never reported their index.
        for index in pending {
            errors.push(EvidenceError::Generation {
                index,
                source: GenerationError::Generation("generation task aborted".to_string()),
            });
        }

        documents.sort_by_key(|d| d.index);
        errors.sort_by_key(|e| e.branch());
        (documents, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every call whose sequence number is listed in `fail_on`.
    struct ScriptedClient {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        delay: Duration,
        output: String,
    }

    impl ScriptedClient {
        fn new(output: &str) -> Self {
            ScriptedClient {
                calls: AtomicUsize::new(0),
                fail_on: Vec::new(),
                delay: Duration::ZERO,
                output: output.to_string(),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_on.contains(&call) {
                return Err(GenerationError::Api {
                    status: 500,
                    message: "overloaded".to_string(),
                });
            }
            Ok(self.output.clone())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_clean_strips_think_block_and_label() {
        let raw = "<think>the user wants an abstract</think>\n**Abstract:** Aspirin lowered stroke incidence.";
        assert_eq!(
            clean_hypothetical(raw).unwrap(),
            "Aspirin lowered stroke incidence."
        );
        assert_eq!(
            clean_hypothetical("  Plain abstract text.  ").unwrap(),
            "Plain abstract text."
        );
        // Only labels followed by a colon are stripped
        assert_eq!(
            clean_hypothetical("Abstract reasoning declines with age.").unwrap(),
            "Abstract reasoning declines with age."
        );
    }

    #[test]
    fn test_clean_rejects_empty_output() {
        assert!(matches!(
            clean_hypothetical("<think>hmm</think>   "),
            Err(GenerationError::Malformed(_))
        ));
        assert!(clean_hypothetical("Abstract:").is_err());
    }

    #[test]
    fn test_prompt_embeds_claim() {
        let prompt = build_hyde_prompt("Vitamin D prevents influenza");
        assert!(prompt.ends_with("Claim: Vitamin D prevents influenza"));
    }

    #[tokio::test]
    async fn test_zero_k_skips_backend() {
        let client = Arc::new(ScriptedClient::new("text"));
        let generator = HypotheticalDocumentGenerator::new(client.clone(), Duration::from_secs(1));

        let (docs, errors) = generator.generate("claim", 0, 0.7, None).await;

        assert!(docs.is_empty());
        assert!(errors.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let mut client = ScriptedClient::new("An abstract.");
        client.fail_on = vec![2];
        let client = Arc::new(client);
        let generator = HypotheticalDocumentGenerator::new(client.clone(), Duration::from_secs(1));

        let (docs, errors) = generator.generate("claim", 3, 0.7, None).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(docs.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(docs.windows(2).all(|w| w[0].index < w[1].index));
    }

    #[tokio::test]
    async fn test_all_attempts_time_out() {
        let mut client = ScriptedClient::new("too late");
        client.delay = Duration::from_secs(5);
        let generator =
            HypotheticalDocumentGenerator::new(Arc::new(client), Duration::from_millis(20));

        let (docs, errors) = generator.generate("claim", 2, 0.7, None).await;

        assert!(docs.is_empty());
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(
            e,
            EvidenceError::Generation {
                source: GenerationError::Timeout(_),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_deadline_shortens_attempt_budget() {
        let mut client = ScriptedClient::new("too late");
        client.delay = Duration::from_millis(500);
        let generator =
            HypotheticalDocumentGenerator::new(Arc::new(client), Duration::from_secs(30));
        let deadline = Instant::now() + Duration::from_millis(20);

        let started = Instant::now();
        let (docs, errors) = generator.generate("claim", 1, 0.7, Some(deadline)).await;

        assert!(docs.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
