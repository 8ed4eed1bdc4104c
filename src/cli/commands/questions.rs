//! Implementation of the `gantry questions` commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets, Attribute, Cell, ContentArrangement, Table};

use crate::adapters::sqlite::{initialize_database, SqliteQuestionStore};
use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::config::Config;
use crate::domain::models::question::PendingQuestion;
use crate::domain::ports::question_store::QuestionStore;

#[derive(Subcommand, Debug)]
pub enum QuestionCommands {
    /// List open questions across conversations
    List,

    /// Show the pending question for one conversation
    Show {
        /// Conversation id
        conversation: String,
    },

    /// Delete expired questions
    Purge,
}

#[derive(Debug, serde::Serialize)]
struct ListOutput {
    questions: Vec<PendingQuestion>,
}

impl CommandOutput for ListOutput {
    fn to_human(&self) -> String {
        if self.questions.is_empty() {
            return "No open questions.".to_string();
        }

        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Conversation").add_attribute(Attribute::Bold),
            Cell::new("Stage").add_attribute(Attribute::Bold),
            Cell::new("Question").add_attribute(Attribute::Bold),
            Cell::new("Expires").add_attribute(Attribute::Bold),
        ]);
        for q in &self.questions {
            table.add_row(vec![
                Cell::new(&q.id.to_string()[..8]),
                Cell::new(&q.conversation_id),
                Cell::new(q.source_stage.as_str()),
                Cell::new(truncate(&q.question_text, 48)),
                Cell::new(q.expires_at.format("%Y-%m-%d %H:%M UTC").to_string()),
            ]);
        }
        format!("{table}\n\n{} open question(s)", self.questions.len())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.questions).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct ShowOutput {
    conversation: String,
    question: Option<PendingQuestion>,
}

impl CommandOutput for ShowOutput {
    fn to_human(&self) -> String {
        let Some(q) = &self.question else {
            return format!("No pending question for conversation {}.", self.conversation);
        };
        let mut lines = vec![
            "Pending question:".to_string(),
            format!("  ID: {}", q.id),
            format!("  Run: {}", q.run_id),
            format!("  Conversation: {}", q.conversation_id),
            format!("  Source stage: {}", q.source_stage.as_str()),
            format!("  Question: {}", q.question_text),
        ];
        if let Some(hint) = &q.expected_answer_hint {
            lines.push(format!("  Expected answer: {hint}"));
        }
        lines.push(format!(
            "  Created: {}",
            q.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(format!(
            "  Expires: {}",
            q.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct PurgeOutput {
    purged: u64,
}

impl CommandOutput for PurgeOutput {
    fn to_human(&self) -> String {
        format!("Purged {} expired question(s).", self.purged)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(command: QuestionCommands, config: Config, json_mode: bool) -> Result<()> {
    let pool = initialize_database(&config.database)
        .await
        .context("Failed to open database")?;
    let store = SqliteQuestionStore::new(pool);

    match command {
        QuestionCommands::List => {
            let questions = store.list_open().await?;
            output(&ListOutput { questions }, json_mode);
        }
        QuestionCommands::Show { conversation } => {
            let question = store.peek(&conversation).await?;
            output(
                &ShowOutput {
                    conversation,
                    question,
                },
                json_mode,
            );
        }
        QuestionCommands::Purge => {
            let purged = store.purge_expired().await?;
            output(&PurgeOutput { purged }, json_mode);
        }
    }

    Ok(())
}
