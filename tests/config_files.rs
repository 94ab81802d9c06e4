//! ---
//! rover_section: "15-testing-qa-runbook"
//! rover_subsection: "integration-tests"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Checks the shipped configuration files."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use rover_common::AppConfig;

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn console_config_parses_and_targets_local_emulator() {
    let content = read("configs/roverctl.toml");
    assert!(content.starts_with("# ---"), "config must carry the frontmatter header");
    let config: AppConfig = content.parse().expect("valid console config");
    let endpoint = config.link.endpoint().expect("link endpoint");
    assert_eq!(endpoint.as_str(), "ws://127.0.0.1:8080/ws");
    assert_eq!(endpoint.port(), Some(config.sim.listen.port()));
    assert_eq!(config.dispatch.drive_period, Duration::from_millis(100));
    assert_eq!(
        config.calibration_base().expect("derived base").as_str(),
        "http://127.0.0.1:8080/"
    );
}
