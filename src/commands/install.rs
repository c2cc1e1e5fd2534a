use colored::Colorize;
use ladle::manifest::ArchitectureKey;
use ladle::{LadleError, PackageManager, Result};

pub async fn install(pm: &PackageManager, apps: &[String], arch: ArchitectureKey) -> Result<()> {
    if apps.is_empty() {
        println!("{} No apps specified", "✗".red());
        return Ok(());
    }

    for identifier in apps {
        match pm.install(identifier, arch).await {
            Ok(result) => {
                println!(
                    "{} Installed {} {} {}",
                    "✓".green(),
                    result.name.bold().green(),
                    result.version,
                    format!(
                        "({} cached, {} downloaded, {}ms)",
                        result.cache_hits, result.downloaded, result.time_ms
                    )
                    .dimmed()
                );
                if result.held {
                    println!("  {} held at {}", "⚠".yellow(), result.version);
                }
                if !result.notes.is_empty() {
                    println!("{}", "Notes".bold());
                    println!("{}", result.notes);
                }
            }
            Err(e) => match e.root() {
                LadleError::AlreadyInstalled { .. } | LadleError::Held(_) => {
                    println!("  {} {}", "⚠".yellow(), e.root());
                }
                _ => return Err(e),
            },
        }
    }

    Ok(())
}

pub fn uninstall(pm: &PackageManager, apps: &[String], purge: bool) -> Result<()> {
    for identifier in apps {
        let installed = match pm.installed(identifier) {
            Ok(installed) => installed,
            Err(e @ LadleError::NotInstalled(_)) => {
                println!("  {} {}", "⚠".yellow(), e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let result = pm.uninstall(&installed, installed.architecture)?;
        if purge {
            pm.purge_app_dir(&result.name)?;
        }
        println!(
            "{} Uninstalled {} {}",
            "✓".green(),
            result.name.bold(),
            result.version.dimmed()
        );
    }

    Ok(())
}

pub async fn download(
    pm: &PackageManager,
    apps: &[String],
    arch: ArchitectureKey,
    force: bool,
) -> Result<()> {
    let mut failures = 0;

    for identifier in apps {
        let report = pm.download(identifier, arch, force).await?;
        println!("{} {}", report.name.bold(), report.version.dimmed());

        for path in &report.cached {
            println!("  {} {} {}", "✓".green(), path.display(), "(cached)".dimmed());
        }
        for path in &report.downloaded {
            println!("  {} {}", "✓".green(), path.display());
        }
        for (url, error) in &report.failed {
            println!("  {} {}: {}", "✗".red(), url, error);
        }
        failures += report.failed.len();
    }

    if failures > 0 {
        return Err(anyhow::anyhow!("{} download(s) failed", failures).into());
    }
    Ok(())
}
