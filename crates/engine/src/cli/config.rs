//! `config validate` and `config show`.

use fc_domain::config::{Config, ConfigSeverity};

/// Validate the configuration and print the findings. Returns `false` when
/// any hard error is present.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{config_path}: OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    println!(
        "{config_path}: {} issue(s), {errors} error(s)",
        issues.len()
    );
    errors == 0
}

/// Dump the resolved configuration as TOML with secrets blanked.
pub fn show(config: &Config) {
    let mut shown = config.clone();
    if !shown.transport.api_hash.is_empty() {
        shown.transport.api_hash = "<redacted>".into();
    }
    match toml::to_string_pretty(&shown) {
        Ok(raw) => println!("{raw}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
