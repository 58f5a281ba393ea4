//! `cadence config` — Configuration management commands.

use crate::app::CliResult;
use cadence_config::AppConfig;
use std::path::Path;

pub async fn show(path: &Path) -> CliResult {
    let mut config =
        AppConfig::load_with_env(path).map_err(|e| format!("Failed to load config: {e}"))?;
    if config.inference.api_key.is_some() {
        config.inference.api_key = Some("***".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub async fn validate(path: &Path) -> CliResult {
    println!("🔍 Validating {}...", path.display());

    let config = match AppConfig::load_with_env(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set CADENCE_API_KEY or OPENAI_API_KEY)".to_string());
    }
    for seed in &config.loops.definitions {
        if let Err(e) = cadence_loops::registry::validate_schedule(&seed.schedule, chrono::Utc::now())
        {
            warnings.push(format!("Loop '{}': {e}", seed.id));
        }
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
    println!("   Endpoint:  {}", config.inference.api_url);
    println!("   Model:     {}", config.inference.model);
    println!("   Store:     {:?} ({})", config.store.backend, config.store.path.display());
    println!("   Guard:     {:?}", config.loops.guard);
    println!("   Loops:     {} declared", config.loops.definitions.len());
    Ok(())
}

pub async fn init(path: &Path, force: bool) -> CliResult {
    if path.exists() && !force {
        println!("⚠️  {} already exists (use --force to overwrite).", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, AppConfig::default_toml()).await?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}

pub async fn path(path: &Path) -> CliResult {
    println!("{}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        init(&path, false).await.unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.loops.tick_interval_secs, 60);
    }

    #[tokio::test]
    async fn init_does_not_clobber_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "base_system_prompt = \"custom\"\n").unwrap();

        init(&path, false).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("custom"));

        init(&path, true).await.unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("custom"));
    }
}
