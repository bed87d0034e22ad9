use anyhow::Result;

use crate::cli::GlobalOpts;
use crate::ui::summary::{render_plan, use_color};

pub fn run(global: &GlobalOpts) -> Result<()> {
    let fleet = super::load_fleet(global)?;
    let bulk = &fleet.config.bulk;

    println!();
    print!(
        "{}",
        render_plan(&fleet.tier_plan(), bulk.required_minimum, use_color())
    );
    println!(
        "  settle delay between sequential starts: {}",
        humantime::format_duration(bulk.settle_delay())
    );
    println!();
    Ok(())
}
