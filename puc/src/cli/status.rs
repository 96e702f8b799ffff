// puc/src/cli/status.rs
use colored::*;
use puc_common::events::ContainerEvent;
use tokio::sync::broadcast;

/// Counts gathered while streaming events, shown once the channel closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventSummary {
    pub activated: usize,
    pub failed: usize,
    pub deactivated: usize,
    pub rejected: usize,
    pub ignored: usize,
    pub missed: u64,
}

impl EventSummary {
    fn record(&mut self, event: &ContainerEvent) {
        match event {
            ContainerEvent::Activated { .. } => self.activated += 1,
            ContainerEvent::ActivationFailed { .. } => self.failed += 1,
            ContainerEvent::Deactivated { .. } => self.deactivated += 1,
            ContainerEvent::RequirementRejected { .. } => self.rejected += 1,
            ContainerEvent::AnnouncementIgnored { .. } => self.ignored += 1,
            _ => {}
        }
    }
}

fn describe(event: &ContainerEvent) -> String {
    match event {
        ContainerEvent::WorkItemDeclared { item, kinds } => {
            let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
            format!(
                "{} {} needs {}",
                "declared".cyan(),
                item.to_string().cyan(),
                kinds.join(", ").dimmed()
            )
        }
        ContainerEvent::WorkItemWithdrawn { item } => {
            format!("{} {}", "withdrawn".dimmed(), item.to_string().cyan())
        }
        ContainerEvent::RequirementRejected { item, kind, error } => format!(
            "{} {} {}: {}",
            "rejected".red(),
            item.to_string().cyan(),
            kind,
            error.red()
        ),
        ContainerEvent::AnnouncementIgnored {
            announcement,
            kind,
            reason,
        } => format!(
            "{} {} for {}: {}",
            "ignored".yellow(),
            announcement,
            kind,
            reason.yellow()
        ),
        ContainerEvent::Bound {
            item,
            kind,
            announcement,
        } => format!(
            "{} {} {} -> {}",
            "bound".blue(),
            item.to_string().cyan(),
            kind,
            announcement
        ),
        ContainerEvent::Unbound {
            item,
            kind,
            announcement,
        } => format!(
            "{} {} {} -/- {}",
            "unbound".magenta(),
            item.to_string().cyan(),
            kind,
            announcement
        ),
        ContainerEvent::Activated { item, selections } => format!(
            "{} {} with {} selection(s)",
            "active".green().bold(),
            item.to_string().cyan(),
            selections.len()
        ),
        ContainerEvent::ActivationFailed { item, error } => format!(
            "{} {}: {}",
            "failed".red().bold(),
            item.to_string().cyan(),
            error.red()
        ),
        ContainerEvent::Deactivated { item } => {
            format!("{} {}", "deactivated".yellow(), item.to_string().cyan())
        }
    }
}

/// Streams container events to stderr until every sender is gone.
pub async fn handle_events(mut event_rx: broadcast::Receiver<ContainerEvent>) -> EventSummary {
    let mut summary = EventSummary::default();

    loop {
        match event_rx.recv().await {
            Ok(event) => {
                summary.record(&event);
                eprintln!("{} {}", "==>".bold().blue(), describe(&event));
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                summary.missed += n;
                eprintln!("{} {} event(s) dropped", "Warning:".yellow(), n);
            }
        }
    }

    summary
}
