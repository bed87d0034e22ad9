use anyhow::Result;
use std::process::Command;

use crate::cli::GlobalOpts;
use crate::config;
use crate::config::model::BuildConfig;
use crate::config::resolve::resolve_root;
use crate::orchestrator::Fleet;

pub fn run(global: &GlobalOpts) -> Result<()> {
    println!("devfleet doctor");
    println!("===============");
    println!();

    let root = resolve_root(
        global.root.as_deref(),
        global.config_file.as_deref(),
        !global.no_recent,
    )
    .ok();
    // A broken config should not stop the toolchain check.
    let build = root
        .as_deref()
        .and_then(|r| config::load_for_root(r, global.config_file.as_deref()).ok())
        .map(|c| c.build)
        .unwrap_or_else(BuildConfig::default);

    let mut all_ok = true;

    match Command::new(&build.program).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            println!("  [ok] {:<16} {}", build.program, version);
        }
        _ => {
            println!("  [!!] {:<16} not found", build.program);
            all_ok = false;
        }
    }

    if let Some(root) = &root {
        match Fleet::load(root, global.config_file.as_deref()) {
            Ok(fleet) => {
                println!(
                    "  [ok] {:<16} {} ({} services)",
                    "solution",
                    root.display(),
                    fleet.services.len()
                );
                let (found, minimum) = fleet.required_guard();
                if found >= minimum {
                    println!("  [ok] {:<16} {} of {} for bulk start", "required tier", found, minimum);
                } else {
                    println!(
                        "  [!!] {:<16} {} of {}, bulk start will refuse to run",
                        "required tier", found, minimum
                    );
                    all_ok = false;
                }
            }
            Err(e) => {
                println!("  [!!] {:<16} {:#}", "solution", e);
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Install the .NET SDK and run from a solution root.");
    }

    Ok(())
}
