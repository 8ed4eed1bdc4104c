//! Implementation of the `gantry ask` command.

use anyhow::Result;
use clap::Args;
use uuid::Uuid;

use crate::application::Runtime;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::config::Config;
use crate::domain::models::request::TurnResponse;

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The user message for this turn
    pub message: String,

    /// Conversation the turn belongs to
    #[arg(short = 'C', long, default_value = "default")]
    pub conversation: String,

    /// Id of the pending question this message answers
    #[arg(long)]
    pub answer_to: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
pub struct AskOutput {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub conversation: String,
}

impl CommandOutput for AskOutput {
    fn to_human(&self) -> String {
        let mut parts = vec![self.message.clone()];
        if let Some(code) = &self.code {
            parts.push(format!("```\n{code}\n```"));
        }
        if self.question_id.is_some() {
            parts.push(format!(
                "Answer with: gantry ask -C {} \"<your answer>\"",
                self.conversation
            ));
        }
        if let Some(error) = &self.error {
            parts.push(format!(
                "{} {error}",
                console::style("turn error:").red().bold()
            ));
        }
        parts.join("\n\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: AskArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::build(config).await?;
    let response = runtime
        .engine
        .run_turn(&args.conversation, &args.message, args.answer_to)
        .await;

    let output_data = from_response(response, args.conversation);
    output(&output_data, json_mode);
    Ok(())
}

fn from_response(response: TurnResponse, conversation: String) -> AskOutput {
    AskOutput {
        message: response.message,
        code: response.code,
        question_id: response.question_id,
        error: response.error,
        conversation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_output_includes_answer_hint_when_question_pending() {
        let out = from_response(
            TurnResponse {
                message: "Which format should the export use?".to_string(),
                question_id: Some(Uuid::new_v4()),
                ..TurnResponse::default()
            },
            "conv-7".to_string(),
        );
        let human = out.to_human();
        assert!(human.contains("Which format"));
        assert!(human.contains("gantry ask -C conv-7"));
    }

    #[test]
    fn test_json_output_omits_empty_fields() {
        let out = from_response(
            TurnResponse {
                message: "Done.".to_string(),
                ..TurnResponse::default()
            },
            "default".to_string(),
        );
        let value = out.to_json();
        assert_eq!(value["message"], "Done.");
        assert!(value.get("code").is_none());
        assert!(value.get("error").is_none());
    }
}
