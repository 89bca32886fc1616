use tfrelay_domain::config::ConfigSeverity;
use tfrelay_domain::Config;

/// Runs diagnostic checks and prints a summary. Returns `Ok(true)` when
/// every check passes.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("tfrelay doctor");
    println!("==============\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_cache_dir_writable(config, &mut all_passed);
    check_registry_reachable(config, &mut all_passed).await;

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
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({error_count} error(s))", issues.len()),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

fn check_cache_dir_writable(config: &Config, all_passed: &mut bool) {
    let dir = config.cache.resolved_cache_dir();
    let created = std::fs::create_dir_all(&dir).is_ok();
    let writable = if created {
        let probe = dir.join(".tfrelay_doctor_probe");
        let w = std::fs::write(&probe, b"probe").is_ok();
        let _ = std::fs::remove_file(&probe);
        w
    } else {
        false
    };

    let ok = created && writable;
    let detail = if ok {
        format!("{} (writable)", dir.display())
    } else {
        format!("{} (not writable)", dir.display())
    };

    print_check("Provider cache directory", ok, detail);
    if !ok {
        *all_passed = false;
    }
}

async fn check_registry_reachable(config: &Config, all_passed: &mut bool) {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(_) => {
            print_check("Registries reachable", false, "failed to build HTTP client".into());
            *all_passed = false;
            return;
        }
    };

    for registry in &config.cache.registry_names {
        let url = format!("https://{registry}/.well-known/terraform.json");
        let reachable = client.get(&url).send().await.is_ok();
        print_check(
            &format!("Registry {registry} reachable"),
            reachable,
            if reachable { url } else { format!("{url} unreachable") },
        );
        if !reachable {
            *all_passed = false;
        }
    }
}

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
