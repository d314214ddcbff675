//! Image generation tool. The image bytes travel in `_full_result`; the
//! model sees only the prompt echo and mime type.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::llm::ImageGenerator;
use crate::scope::RequestScope;

use super::{Tool, ToolSpec, FULL_RESULT_KEY, TOOL_GENERATE_IMAGE};

const VALID_ASPECT_RATIOS: [&str; 5] = ["1:1", "16:9", "9:16", "4:3", "3:4"];

pub struct GenerateImageTool {
    generator: Arc<dyn ImageGenerator>,
    max_prompt_length: usize,
}

impl GenerateImageTool {
    pub fn new(generator: Arc<dyn ImageGenerator>, max_prompt_length: usize) -> Self {
        Self {
            generator,
            max_prompt_length,
        }
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        TOOL_GENERATE_IMAGE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GENERATE_IMAGE.into(),
            description: "Generate an image from a text prompt. The image is attached to \
                          your reply automatically; do not describe it as unavailable."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "What to draw"},
                    "aspect_ratio": {
                        "type": "string",
                        "enum": VALID_ASPECT_RATIOS,
                        "description": "Optional aspect ratio, default 1:1"
                    }
                },
                "required": ["prompt"]
            }),
        }
    }

    async fn call(&self, args: Value, _scope: &RequestScope) -> Result<Value, AgentError> {
        let prompt = args
            .get("prompt")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AgentError::Validation("generate_image requires a prompt".into()))?;
        if prompt.chars().count() > self.max_prompt_length {
            return Err(AgentError::Validation(format!(
                "image prompt too long ({} chars, max {})",
                prompt.chars().count(),
                self.max_prompt_length
            )));
        }
        let aspect_ratio = match args.get("aspect_ratio").and_then(Value::as_str) {
            None => None,
            Some(ratio) if VALID_ASPECT_RATIOS.contains(&ratio) => Some(ratio),
            Some(ratio) => {
                return Err(AgentError::Validation(format!(
                    "invalid aspect ratio '{ratio}'"
                )))
            }
        };

        let image = self.generator.generate(prompt, aspect_ratio).await?;
        Ok(json!({
            "prompt": prompt,
            "mime_type": image.mime_type,
            "status": "image generated",
            FULL_RESULT_KEY: {
                "images": [{"mime_type": image.mime_type, "data": image.data, "prompt": prompt}]
            },
        }))
    }
}
