// puc/src/cli/run.rs
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use puc_common::config::Config;
use puc_common::error::{PucError, Result};
use puc_common::model::ActivationState;
use puc_common::WorkItemId;
use puc_core::{Container, PublicationHandle};
use tracing::{debug, error, info};

use crate::cli::status::{self, EventSummary};
use crate::demo::{DemoFactory, InMemoryRegistry};
use crate::scenario::Scenario;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (JSON) to replay
    pub scenario: PathBuf,

    /// Fail unless this work item ends up active (unit name or module/unit id)
    #[arg(long = "expect-active", value_name = "ITEM")]
    pub expect_active: Vec<String>,

    /// Provider to use when no unit of a module names one
    #[arg(long, value_name = "CLASS")]
    pub default_provider: Option<String>,

    /// Threads draining work item lanes
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

/// Final view of one work item.
struct ItemReport {
    id: WorkItemId,
    state: Option<ActivationState>,
    selections: Vec<String>,
    publication: Option<PublicationHandle>,
}

impl RunArgs {
    fn effective_config(&self, config: &Config) -> Config {
        let mut config = config.clone();
        if let Some(provider) = &self.default_provider {
            config = config.with_default_provider(provider.clone());
        }
        if let Some(workers) = self.workers {
            config = config.with_worker_threads(workers);
        }
        config
    }

    pub async fn run(&self, config: &Config) -> Result<()> {
        let scenario = Scenario::load(&self.scenario)?;
        let config = self.effective_config(config);
        debug!("Running scenario with {} worker(s)", config.worker_threads);

        let registry = Arc::new(InMemoryRegistry::default());
        let container = Arc::new(Container::new(
            config,
            Arc::new(DemoFactory),
            registry.clone(),
        ));
        let event_handler = tokio::spawn(status::handle_events(container.subscribe()));

        let replaying = Arc::clone(&container);
        let (errors, reports) = tokio::task::spawn_blocking(move || {
            let errors = scenario.replay(&replaying);
            replaying.wait_idle();
            let reports = snapshot(&replaying);
            replaying.shutdown();
            (errors, reports)
        })
        .await
        .map_err(|e| PucError::Config(format!("scenario replay panicked: {e}")))?;
        drop(container);

        let summary = event_handler.await.unwrap_or_else(|e| {
            error!("Event handler failed: {}", e);
            EventSummary::default()
        });
        debug!("Registry holds {} reference(s) after shutdown", registry.references());

        for err in &errors {
            eprintln!("{}: {}", "Rejected".red().bold(), err);
        }
        print_reports(&reports);
        println!(
            "{} {} activated, {} failed, {} deactivated, {} rejected, {} ignored",
            "==>".bold().blue(),
            summary.activated,
            summary.failed,
            summary.deactivated,
            summary.rejected,
            summary.ignored
        );

        check_expectations(&self.expect_active, &reports)
    }
}

fn snapshot(container: &Container) -> Vec<ItemReport> {
    let mut ids = container.declared_items();
    ids.sort();
    ids.into_iter()
        .map(|id| {
            let selections = container
                .selections(&id)
                .iter()
                .map(|(kind, ann)| format!("{kind}={}", ann.id))
                .collect();
            ItemReport {
                state: container.state(&id),
                publication: container.lifecycle().publication(&id),
                selections,
                id,
            }
        })
        .collect()
}

fn print_reports(reports: &[ItemReport]) {
    if reports.is_empty() {
        println!("{}", "No work items declared".yellow());
        return;
    }
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.add_row(Row::new(vec![
        Cell::new("Item").style_spec("b"),
        Cell::new("State").style_spec("b"),
        Cell::new("Selections").style_spec("b"),
        Cell::new("Publication").style_spec("b"),
    ]));
    for report in reports {
        let state = match report.state {
            Some(ActivationState::Active) => Cell::new("active").style_spec("Fg"),
            Some(ActivationState::Waiting) => Cell::new("waiting").style_spec("Fy"),
            None => Cell::new("gone"),
        };
        table.add_row(Row::new(vec![
            Cell::new(&report.id.to_string()),
            state,
            Cell::new(&report.selections.join("\n")),
            Cell::new(
                &report
                    .publication
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]));
    }
    table.printstd();
}

fn check_expectations(expected: &[String], reports: &[ItemReport]) -> Result<()> {
    let mut missing = Vec::new();
    for name in expected {
        let active = reports.iter().any(|r| {
            (r.id.name == *name || r.id.to_string() == *name)
                && r.state == Some(ActivationState::Active)
        });
        if active {
            info!("Expected item {} is active", name);
        } else {
            missing.push(name.clone());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PucError::Config(format!(
            "expected active but not: {}",
            missing.join(", ")
        )))
    }
}
