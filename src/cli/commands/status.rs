//! Implementation of the `gantry status` command.

use anyhow::Result;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::adapters::sqlite::verify_connection;
use crate::application::Runtime;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::config::Config;

#[derive(Debug, serde::Serialize)]
struct ServiceStatus {
    name: &'static str,
    endpoint: String,
    reachable: bool,
}

#[derive(Debug, serde::Serialize)]
struct StatusOutput {
    services: Vec<ServiceStatus>,
    database_ok: bool,
    open_questions: usize,
}

impl StatusOutput {
    fn all_ok(&self) -> bool {
        self.database_ok && self.services.iter().all(|s| s.reachable)
    }
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let use_colors = console::colors_enabled();
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Component").add_attribute(Attribute::Bold),
            Cell::new("Endpoint").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
        ]);

        for service in &self.services {
            table.add_row(vec![
                Cell::new(service.name),
                Cell::new(&service.endpoint),
                state_cell(service.reachable, use_colors),
            ]);
        }
        table.add_row(vec![
            Cell::new("database"),
            Cell::new("sqlite"),
            state_cell(self.database_ok, use_colors),
        ]);

        let summary = if self.all_ok() {
            console::style("All components healthy.").green().to_string()
        } else {
            console::style("Some components are unreachable.")
                .red()
                .bold()
                .to_string()
        };

        format!(
            "{table}\n\n{summary}\nOpen questions: {}",
            self.open_questions
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn state_cell(ok: bool, use_colors: bool) -> Cell {
    match (ok, use_colors) {
        (true, true) => Cell::new("ok").fg(Color::Green),
        (true, false) => Cell::new("ok"),
        (false, true) => Cell::new("unreachable").fg(Color::Red),
        (false, false) => Cell::new("unreachable"),
    }
}

pub async fn execute(config: Config, json_mode: bool) -> Result<()> {
    let runtime = Runtime::build(config).await?;

    let (completion, sandbox, analysis, retrieval) = tokio::join!(
        runtime.completion.health_check(),
        runtime.sandbox.health_check(),
        runtime.analysis.health_check(),
        runtime.retrieval.health_check(),
    );

    let endpoints = &runtime.config.endpoints;
    let services = vec![
        ServiceStatus {
            name: "completion",
            endpoint: endpoints.completion_url.clone(),
            reachable: matches!(completion, Ok(true)),
        },
        ServiceStatus {
            name: "sandbox",
            endpoint: endpoints.sandbox_url.clone(),
            reachable: matches!(sandbox, Ok(true)),
        },
        ServiceStatus {
            name: "analysis",
            endpoint: endpoints.analysis_url.clone(),
            reachable: matches!(analysis, Ok(true)),
        },
        ServiceStatus {
            name: "retrieval",
            endpoint: endpoints.retrieval_url.clone(),
            reachable: matches!(retrieval, Ok(true)),
        },
    ];

    let database_ok = verify_connection(&runtime.pool).await.is_ok();
    let open_questions = runtime
        .questions
        .list_open()
        .await
        .map(|q| q.len())
        .unwrap_or(0);

    output(
        &StatusOutput {
            services,
            database_ok,
            open_questions,
        },
        json_mode,
    );
    Ok(())
}
