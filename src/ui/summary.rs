use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::orchestrator::planner::{BulkReport, Tier, TierKeywords, TierPlan};
use crate::orchestrator::state::ServiceState;
use crate::orchestrator::Fleet;

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(
        header
            .iter()
            .map(|h| Cell::new(h).set_alignment(CellAlignment::Left))
            .collect::<Vec<_>>(),
    );
    table
}

/// Indent the table by 2 spaces.
fn indented(table: &Table) -> String {
    let mut out = String::new();
    for line in table.to_string().lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn status_text(status: &str, use_color: bool) -> String {
    if !use_color {
        return format!("\u{25cf} {}", status);
    }
    match status {
        "running" => format!("{} {}", "\u{25cf}".green(), "running".green()),
        "starting" => format!("{} {}", "\u{25cf}".yellow(), "starting".yellow()),
        "failed" => format!("{} {}", "\u{25cf}".red(), "failed".red()),
        other => format!("{} {}", "\u{25cf}".dimmed(), other.dimmed()),
    }
}

fn heading(text: &str, use_color: bool) -> String {
    if use_color {
        format!("  {}\n", text.bold())
    } else {
        format!("  {}\n", text)
    }
}

/// Discovered services with category, tier and resolved port.
pub fn render_services(fleet: &Fleet) -> String {
    let mut table = new_table(&["Service", "Category", "Tier", "Port"]);
    for service in &fleet.services {
        table.add_row(vec![
            Cell::new(&service.name),
            Cell::new(service.category.as_str()),
            Cell::new(fleet.tier_of(service).as_str()),
            Cell::new(fleet.port_of(service)),
        ]);
    }
    indented(&table)
}

/// Service / tier / URL / PID / status for a running session.
pub fn render_status(
    states: &[ServiceState],
    keywords: &TierKeywords,
    url_scheme: &str,
    use_color: bool,
) -> String {
    let mut table = new_table(&["Service", "Tier", "URL", "PID", "Status"]);
    for state in states {
        let pid = match state.process_id() {
            0 => "-".to_string(),
            pid => pid.to_string(),
        };
        table.add_row(vec![
            Cell::new(&state.name),
            Cell::new(keywords.classify(&state.name).as_str()),
            Cell::new(format!("{}://localhost:{}", url_scheme, state.port)),
            Cell::new(pid),
            Cell::new(status_text(state.status_label(), use_color)),
        ]);
    }
    indented(&table)
}

/// Tier-by-tier bulk start order and the required-tier guard.
pub fn render_plan(plan: &TierPlan, required_minimum: usize, use_color: bool) -> String {
    let mut out = String::new();
    for (idx, (tier, names)) in plan.tiers().iter().enumerate() {
        let mode = match tier {
            Tier::Communication => "concurrent",
            _ => "sequential",
        };
        out.push_str(&heading(&format!("{}. {} ({})", idx + 1, tier, mode), use_color));
        if names.is_empty() {
            out.push_str("     -\n");
        }
        for name in names.iter() {
            out.push_str(&format!("     {}\n", name));
        }
    }

    out.push('\n');
    let found = plan.required.len();
    let verdict = if found >= required_minimum {
        let text = format!("guard passes: {} of {} required services", found, required_minimum);
        if use_color {
            text.green().to_string()
        } else {
            text
        }
    } else {
        let text = format!(
            "guard fails: {} of {} required services, bulk start will refuse to run",
            found, required_minimum
        );
        if use_color {
            text.red().to_string()
        } else {
            text
        }
    };
    out.push_str(&format!("  {}\n", verdict));
    out
}

pub fn render_bulk_report(report: &BulkReport, use_color: bool) -> String {
    let mut table = new_table(&["Service", "Result"]);
    for name in &report.started {
        table.add_row(vec![Cell::new(name), Cell::new(status_text("running", use_color))]);
    }
    for name in &report.skipped {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(status_text("skipped", use_color)),
        ]);
    }
    for (name, error) in &report.failed {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(format!("{}\n{}", status_text("failed", use_color), error)),
        ]);
    }
    indented(&table)
}

pub fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

pub fn print_session_help() {
    let color = use_color();
    println!();
    print!("{}", heading("Commands", color));
    println!("    start|stop|toggle <service>   manage one service");
    println!("    start-all | stop-all          bulk start / stop");
    println!("    ps                            service status");
    println!("    logs <service>                print captured console output");
    println!("    show|hide <service>           echo a service's console live");
    println!("    quit                          stop everything and exit");
    println!();
    if color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}
