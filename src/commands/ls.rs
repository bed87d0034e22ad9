use anyhow::Result;

use crate::cli::GlobalOpts;
use crate::ui::summary::render_services;

pub fn run(global: &GlobalOpts) -> Result<()> {
    let fleet = super::load_fleet(global)?;

    if fleet.services.is_empty() {
        println!("No services found under {}", fleet.root.join("src").display());
        return Ok(());
    }

    println!();
    println!(
        "  {} ({} services)",
        fleet.root.display(),
        fleet.services.len()
    );
    println!();
    print!("{}", render_services(&fleet));
    println!();
    Ok(())
}
