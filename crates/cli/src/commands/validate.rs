//! `ctxpack validate` — Configuration and intent batch checks.

use std::path::Path;

use ctxpack_config::CtxpackConfig;
use ctxpack_core::intent::validate_batch;

use super::apply::{parse_intents, read_input};

pub fn run(
    config_path: Option<&Path>,
    intents: Option<&str>,
    print_default: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if print_default {
        print!("{}", CtxpackConfig::default_toml());
        return Ok(());
    }

    println!("🔍 Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");
            config
        }
        Err(e) => {
            println!("   ❌ {e}");
            return Err(e);
        }
    };

    let mut warnings = Vec::new();
    if config.store.backend == "github" {
        if config.store.owner.is_empty() || config.store.repo.is_empty() {
            warnings.push("No repository set (store.owner/store.repo or CTXPACK_REPO)");
        }
        if config.store.token.is_none() {
            warnings.push("No token set (CTXPACK_GITHUB_TOKEN or GITHUB_TOKEN)");
        }
    }
    if config.pack.inline_sections().next().is_none() {
        warnings.push("Pack layout has no inline sections; captures will land in source files");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    let store = &config.store;
    println!(
        "   Store:     {} {}/{}@{}",
        store.backend, store.owner, store.repo, store.branch
    );
    println!(
        "   Root:      {} (read-only: {})",
        config.documents.root,
        config.documents.read_only.join(", ")
    );
    println!(
        "   Pack:      {} ({} sections)",
        config.pack_store_path(),
        config.pack.sections.len()
    );
    println!("   Retry:     {} attempts", config.retry.max_attempts);

    if let Some(input) = intents {
        println!();
        println!("🔍 Validating intents from {input}...");
        let batch = parse_intents(&read_input(input)?)
            .map_err(|e| format!("Invalid intent JSON: {e}"))?;
        let rules = config.path_rules();
        let result = validate_batch(&batch, &rules, config.documents.max_content_bytes);
        if result.is_valid() {
            println!("   ✅ {} intent(s) valid", result.valid.len());
            for v in result.valid.iter().filter(|v| v.truncated) {
                println!("   ⚠️  Content would be truncated for {}", v.path);
            }
        } else {
            for r in &result.invalid {
                println!("   ❌ #{} {}: {}", r.index, r.intent.path, r.reason);
            }
            let invalid = result.invalid.len();
            return Err(format!("{invalid} of {} intent(s) invalid", batch.len()).into());
        }
    }

    Ok(())
}
