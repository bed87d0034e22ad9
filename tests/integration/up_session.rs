#![cfg(unix)]

use crate::common::{free_port, TestSolution};
use predicates::prelude::*;
use std::time::Duration;

/// A `build` script run by `sh` that writes a fake assembly. The launcher
/// then runs the assembly with the same program, so its body is shell.
fn fake_build(solution: &TestSolution, category_dir: &str, name: &str, body: &str) {
    let script = format!(
        "mkdir -p bin/Debug/net8.0\nprintf '%s\\n' '{body}' > bin/Debug/net8.0/{name}.dll\n"
    );
    std::fs::write(solution.project_dir(category_dir, name).join("build"), script).unwrap();
}

#[test]
fn crash_before_ready_is_reported_with_exit_code() {
    let solution = TestSolution::new();
    solution
        .project("Services", "Location", free_port())
        .config("[build]\nprogram = \"sh\"\nsanitize_connection_strings = false\n");
    fake_build(&solution, "Services", "Location", "echo booting; exit 3");

    solution
        .cmd()
        .args(["up", "Location"])
        .timeout(Duration::from_secs(60))
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains("'Location' exited before becoming ready"))
        .stderr(predicate::str::contains("exit code 3"))
        .stdout(predicate::str::contains("All services stopped."));
}

#[test]
fn failed_build_is_reported() {
    let solution = TestSolution::new();
    solution
        .project("Services", "Location", free_port())
        .config("[build]\nprogram = \"sh\"\n");
    std::fs::write(
        solution.project_dir("Services", "Location").join("build"),
        "echo 'error CS1002: ; expected'\nexit 1\n",
    )
    .unwrap();

    solution
        .cmd()
        .args(["up", "Location"])
        .timeout(Duration::from_secs(60))
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains("build of 'Location' failed"))
        .stderr(predicate::str::contains("CS1002"));
}

#[test]
fn unknown_service_suggests_closest_name() {
    let solution = TestSolution::new();
    solution.project("Services", "Location", free_port());

    solution
        .cmd()
        .args(["up", "Locaton"])
        .timeout(Duration::from_secs(60))
        .write_stdin("")
        .assert()
        .success()
        .stderr(predicate::str::contains("did you mean 'Location'?"));
}
