//! Prompts for the catalog reviewer.

use std::fmt::Write as _;

use keeper_reconcile::ReviewRequest;

pub const SYSTEM_PROMPT: &str = r#"You are a model catalog reviewer for an AI gateway. Your job is to evaluate proposed changes to a model catalog and identify issues.

For each model in the changeset, evaluate:

1. **Capabilities**: Are the inferred capabilities reasonable for this model type? (e.g., an embedding model should NOT have "chat" or "function_calling")
2. **Pricing**: Is the pricing plausible? Compare against known market rates. Flag suspiciously high or low prices.
3. **Limits**: Are the token limits reasonable? (e.g., max_completion_tokens should not exceed max_tokens, context windows should match known specs)
4. **Status**: Is the status appropriate? (e.g., a brand-new model shouldn't be "deprecated")
5. **Changes**: For updated models, are the field changes plausible? (e.g., a price dropping 90% is suspicious)

Respond with a JSON object containing a "verdicts" array. Each verdict must have:
- "model_name": the model identifier
- "verdict": one of "approve", "flag", or "reject"
  - "approve": the model data looks correct
  - "flag": something looks suspicious but might be correct and needs human review
  - "reject": the data is clearly wrong and should not be merged
- "confidence": a float between 0 and 1 indicating your confidence
- "concerns": an array of strings describing specific issues (empty if approved)
- "reasoning": a brief explanation of your assessment

Be conservative: prefer "flag" over "reject" unless the data is clearly incorrect.
Only "reject" when you are highly confident the data is wrong (e.g., an embedding model with chat capabilities, negative pricing, max_completion_tokens > max_tokens).

Respond ONLY with the JSON object, no other text."#;

/// Renders the change set as one fenced JSON block per entry.
pub fn user_prompt(request: &ReviewRequest) -> String {
    let mut b = String::new();
    let _ = writeln!(b, "Provider: {}\n", request.provider);

    if !request.new.is_empty() {
        b.push_str("## New Models\n\n");
        for entry in &request.new {
            push_json_block(&mut b, entry);
        }
    }

    if !request.updated.is_empty() {
        b.push_str("## Updated Models\n\n");
        for update in &request.updated {
            push_json_block(&mut b, update);
        }
    }
    b
}

fn push_json_block(b: &mut String, value: &impl serde::Serialize) {
    let json = serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string());
    let _ = write!(b, "```json\n{json}\n```\n\n");
}
