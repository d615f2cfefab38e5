use anyhow::Result;

use super::with_store;
use crate::config::SecureRailsConfig;
use crate::transport::{BatchReport, CheckpointSlot, LocationEvidence, WorkflowEngine};

pub struct StatusCommand {
    pub batch: String,
}

impl StatusCommand {
    pub async fn execute(&self, config: &SecureRailsConfig) -> Result<()> {
        let order = config.workflow.checkpoint_order;
        let batch = self.batch.clone();
        let report = with_store(config, |store| async move {
            let engine = WorkflowEngine::new(store, order);
            Ok(engine.batch_report(&batch).await?)
        })
        .await?;

        print!("{}", render(&self.batch, &report));
        Ok(())
    }
}

fn evidence_line(label: &str, evidence: Option<&LocationEvidence>) -> String {
    match evidence {
        Some(e) => format!(
            "  {label:<13} {} at {}{}\n",
            e.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            e.address,
            if e.verified_by_qr { " [QR verified]" } else { "" }
        ),
        None => format!("  {label:<13} -\n"),
    }
}

pub fn render(batch_id: &str, report: &BatchReport) -> String {
    let mut out = format!("BATCH {batch_id}\n");
    match &report.batch {
        Some(batch) => out.push_str(&format!(
            "Vendor: {} / {} ({})\n",
            batch.vendor_name,
            batch.factory_name.as_deref().unwrap_or("Unknown Factory"),
            batch.factory_location.as_deref().unwrap_or("Unknown Location"),
        )),
        None => out.push_str("Vendor: not found in vendor records\n"),
    }

    if report.logs.is_empty() {
        out.push_str("No transport logs recorded\n");
    }
    for log in &report.logs {
        out.push_str(&format!(
            "\nTransporter {} - {} -> {} ({}/3 checkpoints)\n",
            log.transporter_id,
            log.status,
            log.destination,
            log.checkpoints_completed()
        ));
        out.push_str(&evidence_line("dispatch", log.dispatch.as_ref()));
        for slot in CheckpointSlot::ALL {
            out.push_str(&evidence_line(&slot.to_string(), log.checkpoint(slot)));
        }
        out.push_str(&evidence_line("delivery", log.delivery.as_ref()));
    }

    for receiver in &report.receivers {
        out.push_str(&format!(
            "\nReceived {} by {} at {}\n",
            receiver.receiving_date, receiver.receiver_name, receiver.location
        ));
    }
    out
}
