pub mod doctor;
pub mod ls;
pub mod plan;
pub mod up;

use anyhow::Result;

use crate::cli::GlobalOpts;
use crate::config::recent::RecentSolution;
use crate::config::resolve::resolve_root;
use crate::orchestrator::Fleet;

/// Resolve the solution root, load it, and remember it for next time
/// unless `--no-recent` is set.
pub fn load_fleet(global: &GlobalOpts) -> Result<Fleet> {
    let root = resolve_root(
        global.root.as_deref(),
        global.config_file.as_deref(),
        !global.no_recent,
    )?;
    let fleet = Fleet::load(&root, global.config_file.as_deref())?;
    if !global.no_recent {
        RecentSolution::record(&fleet.root);
    }
    Ok(fleet)
}
