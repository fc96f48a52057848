//! Compact output rendering helpers for the `--format text` CLI surface.
//!
//! JSON is the default and machine-facing; these helpers keep the human view
//! short and readable on a workstation terminal.

use crate::core::model::{Employee, ProductionSchema, StageRecord, Unit, UnitStatus};
use crate::plugins::certificate::Certificate;
use crate::plugins::publication::PublicationResult;
use crate::plugins::units::UnitSummary;
use colored::{ColoredString, Colorize};

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

pub fn status_label(status: UnitStatus) -> ColoredString {
    let s = status.as_str();
    match status {
        UnitStatus::Created => s.bright_white(),
        UnitStatus::InProgress => s.bright_cyan(),
        UnitStatus::AwaitingCertification => s.bright_yellow(),
        UnitStatus::Publishing => s.bright_magenta(),
        UnitStatus::Certified => s.bright_green().bold(),
        UnitStatus::Failed => s.bright_red().bold(),
    }
}

fn record_line(record: &StageRecord) -> String {
    let state = if record.is_open() {
        "open".bright_cyan()
    } else if record.interrupted {
        "interrupted".bright_red()
    } else {
        "done".bright_green()
    };
    format!(
        "#{} {} [{}] by {} ({}s)",
        record.seq,
        record.stage_id,
        state,
        record.employee_rfid_card_id,
        record.actual_duration_seconds.unwrap_or_default()
    )
}

fn unit_lines(unit: &Unit, depth: usize, out: &mut Vec<String>) {
    let pad = "  ".repeat(depth);
    out.push(format!(
        "{}{} {} {} {}",
        pad,
        unit.internal_id.bold(),
        unit.uuid.dimmed(),
        unit.schema_id,
        status_label(unit.status())
    ));
    if let Some(reason) = &unit.failure_reason {
        out.push(format!("{}  reason: {}", pad, compact_line(reason, 80)));
    }
    for record in &unit.stage_records {
        out.push(format!("{}  {}", pad, record_line(record)));
    }
    for sub in &unit.sub_units {
        unit_lines(sub, depth + 1, out);
    }
}

pub fn render_unit(unit: &Unit) -> String {
    let mut out = Vec::new();
    unit_lines(unit, 0, &mut out);
    out.join("\n")
}

pub fn render_unit_summaries(units: &[UnitSummary]) -> String {
    if units.is_empty() {
        return "no units".dimmed().to_string();
    }
    units
        .iter()
        .map(|u| {
            format!(
                "{} {} {} {}",
                u.internal_id.bold(),
                u.uuid.dimmed(),
                compact_line(&u.unit_name, 32),
                status_label(u.status)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_schema(schema: &ProductionSchema) -> String {
    let mut out = vec![format!(
        "{} {} ({})",
        schema.schema_id.bold(),
        schema.unit_name,
        schema.schema_type.as_str()
    )];
    if !schema.required_component_schema_ids.is_empty() {
        out.push(format!(
            "  components: {}",
            schema.required_component_schema_ids.join(", ")
        ));
    }
    for (i, stage) in schema.stages.iter().enumerate() {
        out.push(format!(
            "  {}. {} {} @ {}",
            i + 1,
            stage.stage_id,
            compact_line(&stage.name, 40),
            stage.workplace
        ));
    }
    out.join("\n")
}

pub fn render_employees(employees: &[Employee]) -> String {
    if employees.is_empty() {
        return "no employees".dimmed().to_string();
    }
    employees
        .iter()
        .map(|e| format!("{} {} ({})", e.rfid_card_id.bold(), e.name, e.position))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_certificate(cert: &Certificate) -> String {
    let mut out = vec![format!(
        "{} {} {}",
        cert.internal_id.bold(),
        cert.unit_name,
        cert.unit_uuid.dimmed()
    )];
    for stage in &cert.stage_records {
        out.push(format!(
            "  {} {} by {} ({}s){}",
            stage.schema_id.dimmed(),
            compact_line(&stage.name, 40),
            stage.employee_rfid_card_id,
            stage.actual_duration_seconds,
            if stage.interrupted { " interrupted" } else { "" }
        ));
    }
    if let Some(address) = &cert.content_address {
        out.push(format!("  address: {}", address));
    }
    if let Some(reference) = &cert.ledger_reference {
        out.push(format!("  ledger: {}", reference));
    }
    out.join("\n")
}

pub fn render_publication(result: &PublicationResult) -> String {
    format!(
        "{} {}\n  address: {}\n  ledger: {}\n  link: {}",
        "certified".bright_green().bold(),
        result.unit_uuid,
        result.content_address,
        result.ledger_reference,
        result.link.underline()
    )
}
