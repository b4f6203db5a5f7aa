//! `oc-gateway doctor`: a handful of pass/fail checks against the
//! resolved configuration, run before trusting `serve` to come up clean.
//! Shape mirrors the teacher's `cli::doctor` module — named checks, a
//! `print_check` helper, a final summary.

use oc_domain::config::{Config, ConfigSeverity};

pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("oc-gateway doctor");
    println!("=================\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_storage(config, &mut all_passed);
    check_auth(config);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists { config_path.to_owned() } else { format!("{config_path} not found (using defaults)") },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check("Config validation", error_count == 0, format!("{} issue(s) ({error_count} error(s))", issues.len()));
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_storage(config: &Config, all_passed: &mut bool) {
    if config.storage.is_memory() {
        print_check("Storage backend", true, "in-memory (no durability across restarts)".into());
        return;
    }

    let path = std::path::Path::new(&config.storage.db_path);
    let exists = path.exists() || std::fs::create_dir_all(path).is_ok();
    let writable = if exists {
        let probe = path.join(".oc_gateway_doctor_probe");
        let ok = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    } else {
        false
    };

    let ok = exists && writable;
    let detail = match (exists, writable) {
        (true, true) => format!("{} (writable)", path.display()),
        (true, false) => format!("{} (not writable)", path.display()),
        _ => format!("{} (does not exist and could not be created)", path.display()),
    };
    print_check("Storage backend", ok, detail);
    if !ok {
        *all_passed = false;
    }
}

fn check_auth(config: &Config) {
    let configured = std::env::var(&config.auth.token_env).map(|v| !v.is_empty()).unwrap_or(false);
    print_check(
        "API bearer-token auth",
        true,
        if configured {
            format!("enabled via ${}", config.auth.token_env)
        } else {
            format!("disabled — set ${} to require a token", config.auth.token_env)
        },
    );
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
