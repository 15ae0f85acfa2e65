//! [`ChangeReviewer`] backed by an [`LlmClient`].

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use keeper_reconcile::{ChangeReviewer, ModelVerdict, ReviewOutcome, ReviewRequest, Verdict};
use serde::Deserialize;
use tracing::{debug, info};

use crate::prompt::{SYSTEM_PROMPT, user_prompt};
use crate::{LlmClient, extract_json};

pub struct LlmReviewer {
    client: Box<dyn LlmClient>,
}

impl LlmReviewer {
    pub fn new(client: Box<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChangeReviewer for LlmReviewer {
    fn name(&self) -> String {
        self.client.label()
    }

    async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        if request.is_empty() {
            return Ok(ReviewOutcome::default());
        }
        debug!(provider = %request.provider, reviewer = %self.client.label(), "requesting review");
        let reply = self
            .client
            .complete(SYSTEM_PROMPT, &user_prompt(request))
            .await
            .context("LLM call failed")?;
        let outcome = parse_response(&reply).context("parsing LLM response")?;
        info!(
            provider = %request.provider,
            approved = outcome.count(Verdict::Approve),
            flagged = outcome.count(Verdict::Flag),
            rejected = outcome.count(Verdict::Reject),
            "review complete"
        );
        Ok(outcome)
    }
}

/// Verdict as the model wrote it, before the verdict string is checked.
#[derive(Deserialize)]
struct RawVerdict {
    model_name: String,
    verdict: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct RawOutcome {
    #[serde(default)]
    verdicts: Vec<RawVerdict>,
}

/// Parses a reviewer reply.  An unknown verdict string fails the whole
/// reply; confidence is clamped into `0.0..=1.0`.
pub fn parse_response(reply: &str) -> Result<ReviewOutcome> {
    let json = extract_json(reply).ok_or_else(|| anyhow!("no valid JSON found in response"))?;
    let raw: RawOutcome = serde_json::from_str(json).context("unmarshaling judge response")?;

    let mut verdicts = Vec::with_capacity(raw.verdicts.len());
    for v in raw.verdicts {
        let verdict = match v.verdict.as_str() {
            "approve" => Verdict::Approve,
            "flag" => Verdict::Flag,
            "reject" => Verdict::Reject,
            other => bail!("invalid verdict {other:?} for model {}", v.model_name),
        };
        verdicts.push(ModelVerdict {
            model_name: v.model_name,
            verdict,
            confidence: v.confidence.clamp(0.0, 1.0),
            concerns: v.concerns,
            reasoning: v.reasoning,
        });
    }
    Ok(ReviewOutcome { verdicts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_catalog::DiscoveredModel;
    use keeper_reconcile::ReviewEntry;
    use std::sync::{Arc, Mutex};

    /// Replays a fixed reply and records the prompts it was sent.
    struct Scripted {
        reply: Result<String, String>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LlmClient for Scripted {
        fn label(&self) -> String {
            "scripted/test".to_string()
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.seen.lock().unwrap().push(user.to_string());
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            provider: "openai".to_string(),
            new: vec![ReviewEntry::from(&DiscoveredModel::named("gpt-5"))],
            updated: vec![],
        }
    }

    fn reviewer(reply: Result<&str, &str>) -> (LlmReviewer, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = Scripted {
            reply: reply.map(str::to_string).map_err(str::to_string),
            seen: Arc::clone(&seen),
        };
        (LlmReviewer::new(Box::new(client)), seen)
    }

    #[test]
    fn parse_clamps_confidence() {
        let outcome = parse_response(
            r#"```json
{"verdicts":[{"model_name":"a","verdict":"approve","confidence":1.7},
             {"model_name":"b","verdict":"reject","confidence":-0.2,"concerns":["x"]}]}
```"#,
        )
        .unwrap();
        assert_eq!(outcome.verdicts[0].confidence, 1.0);
        assert_eq!(outcome.verdicts[1].confidence, 0.0);
        assert!(outcome.has_rejections());
    }

    #[test]
    fn parse_rejects_unknown_verdicts_and_garbage() {
        let err = parse_response(r#"{"verdicts":[{"model_name":"a","verdict":"maybe"}]}"#).unwrap_err();
        assert!(err.to_string().contains("invalid verdict"));
        assert!(parse_response("I could not decide.").is_err());
    }

    #[tokio::test]
    async fn review_round_trip_through_client() {
        let (reviewer, seen) = reviewer(Ok(
            r#"Here is my review: {"verdicts":[{"model_name":"gpt-5","verdict":"flag","confidence":0.6,"concerns":["no pricing"],"reasoning":"new"}]}"#,
        ));
        let outcome = reviewer.review(&request()).await.unwrap();
        assert!(outcome.has_flags());
        assert_eq!(outcome.verdicts[0].concerns, ["no pricing"]);
        assert!(seen.lock().unwrap()[0].contains("## New Models"));
    }

    #[tokio::test]
    async fn client_errors_propagate() {
        let (reviewer, _) = reviewer(Err("429 Too Many Requests"));
        let err = reviewer.review(&request()).await.unwrap_err();
        assert!(format!("{err:#}").contains("429"));
    }

    #[tokio::test]
    async fn empty_request_skips_the_call() {
        let (reviewer, seen) = reviewer(Ok("unused"));
        let outcome = reviewer
            .review(&ReviewRequest {
                provider: "openai".to_string(),
                ..ReviewRequest::default()
            })
            .await
            .unwrap();
        assert!(outcome.verdicts.is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }
}
