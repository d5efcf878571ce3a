use super::result::StepResult;
use crate::error::Result;
use crate::llm::CompletionClient;
use crate::prompts::{PromptLibrary, Variables};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applied to raw model output before it is stored
pub type PostProcess = fn(&str) -> String;

/// Runs one stage: render, complete once, post-process.
///
/// Errors never leave `execute`; they become a failed [`StepResult`].
#[derive(Clone)]
pub struct StageExecutor {
    client: Arc<dyn CompletionClient>,
    prompts: Arc<PromptLibrary>,
}

impl StageExecutor {
    pub fn new(client: Arc<dyn CompletionClient>, prompts: Arc<PromptLibrary>) -> Self {
        Self { client, prompts }
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    pub async fn execute(
        &self,
        stage: usize,
        template: &str,
        variables: &Variables,
        post_process: Option<PostProcess>,
    ) -> StepResult {
        match self.try_execute(template, variables, post_process).await {
            Ok(content) => {
                debug!("Stage {} produced {} chars", stage, content.len());
                StepResult::success(content)
            }
            Err(e) => {
                warn!("Stage {} failed: {}", stage, e);
                StepResult::failure(e.to_string())
            }
        }
    }

    async fn try_execute(
        &self,
        template: &str,
        variables: &Variables,
        post_process: Option<PostProcess>,
    ) -> Result<String> {
        let prompt = self.prompts.get(template)?.render(variables)?;
        let raw = self.client.complete(&prompt).await?;
        Ok(match post_process {
            Some(f) => f(&raw),
            None => raw,
        })
    }
}

/// Default post-processing for stage text
pub fn trim_output(raw: &str) -> String {
    raw.trim().to_string()
}
