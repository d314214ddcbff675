//! Token pricing and message cost accounting.

use serde_json::Value;

use crate::db::Database;
use crate::error::AgentError;
use crate::llm::LlmUsage;

/// USD per million tokens (input, output).
const MODEL_PRICING: [(&str, f64, f64); 4] = [
    ("gemini-3-flash-preview", 0.075, 0.30),
    ("gemini-3-pro-preview", 1.25, 5.00),
    ("gemini-3-pro-image-preview", 2.00, 12.00),
    ("gemini-2.0-flash", 0.075, 0.30),
];

/// Flat USD per generated image.
const IMAGE_GENERATION_COST_USD: f64 = 0.04;

fn pricing_for(model: &str) -> (f64, f64) {
    MODEL_PRICING
        .iter()
        .find(|(name, _, _)| *name == model)
        .map(|(_, input, output)| (*input, *output))
        // Unknown models get the flash rate rather than silently zero cost.
        .unwrap_or((0.075, 0.30))
}

/// Token cost in USD for one call.
pub fn token_cost_usd(model: &str, usage: &LlmUsage) -> f64 {
    let (input_rate, output_rate) = pricing_for(model);
    usage.input_tokens as f64 / 1_000_000.0 * input_rate
        + usage.output_tokens as f64 / 1_000_000.0 * output_rate
}

/// Counts generated images across full tool results and prices them flat.
pub fn image_cost_usd(full_tool_results: &[Value]) -> Option<f64> {
    let images: usize = full_tool_results
        .iter()
        .filter_map(|r| r.pointer("/_full_result/images"))
        .filter_map(Value::as_array)
        .map(Vec::len)
        .sum();
    if images == 0 {
        None
    } else {
        Some(images as f64 * IMAGE_GENERATION_COST_USD)
    }
}

/// Computes and persists the cost row for one assistant message.
/// `mode` labels the path (chat / stream / agent) for the logs only.
#[allow(clippy::too_many_arguments)]
pub async fn calculate_and_save_message_cost(
    db: &Database,
    message_id: &str,
    conversation_id: &str,
    user_id: &str,
    model: &str,
    usage: &LlmUsage,
    full_tool_results: &[Value],
    mode: &str,
) -> Result<(), AgentError> {
    let cost = token_cost_usd(model, usage);
    let image_cost = image_cost_usd(full_tool_results);
    db.save_message_cost(
        message_id,
        conversation_id,
        user_id,
        model,
        usage.input_tokens,
        usage.output_tokens,
        cost,
        image_cost,
    )
    .await?;
    tracing::debug!(
        %message_id,
        model,
        mode,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        cost_usd = cost,
        image_cost_usd = image_cost.unwrap_or(0.0),
        "message cost saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flash_pricing_matches_table() {
        let usage = LlmUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        };
        let cost = token_cost_usd("gemini-3-flash-preview", &usage);
        assert!((cost - 0.375).abs() < 1e-9);
    }

    #[test]
    fn unknown_models_fall_back_to_flash_rate() {
        let usage = LlmUsage {
            input_tokens: 2_000_000,
            output_tokens: 0,
        };
        assert!((token_cost_usd("mystery-model", &usage) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn image_cost_counts_generated_images() {
        let results = vec![
            json!({"_full_result": {"images": [{"data": "a"}, {"data": "b"}]}}),
            json!({"echo": 1}),
        ];
        assert_eq!(image_cost_usd(&results), Some(0.08));
        assert_eq!(image_cost_usd(&[json!({"echo": 1})]), None);
    }
}
