use colored::Colorize;
use ladle::{PackageManager, Result};

pub fn hold(pm: &PackageManager, apps: &[String], hold: bool) -> Result<()> {
    for identifier in apps {
        if hold {
            pm.hold(identifier)?;
            println!("  {} Held {}", "✓".green(), identifier.bold());
        } else {
            pm.unhold(identifier)?;
            println!("  {} Unheld {}", "✓".green(), identifier.bold());
        }
    }
    Ok(())
}

pub fn cache_show(pm: &PackageManager, app: Option<&str>) -> Result<()> {
    let entries = pm.cache_entries(app)?;
    let mut total = 0u64;

    for path in &entries {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        total += size;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        println!("{} {}", format_size(size).dimmed(), name);
    }

    println!(
        "{} files, {}",
        entries.len().to_string().bold(),
        format_size(total).bold()
    );
    Ok(())
}

pub fn cache_rm(pm: &PackageManager, apps: &[String]) -> Result<()> {
    for app in apps {
        let removed = pm.cache_remove(app)?;
        println!(
            "  {} Removed {} cached files for {}",
            "✓".green(),
            removed.len(),
            app.bold()
        );
    }
    Ok(())
}

pub fn bucket_list(pm: &PackageManager) -> Result<()> {
    for bucket in pm.buckets()? {
        println!("{} {}", bucket.name().bold(), bucket.dir().display().to_string().dimmed());
    }
    Ok(())
}

pub fn bucket_known(pm: &PackageManager) -> Result<()> {
    for bucket in pm.known_buckets()? {
        println!("{} {}", bucket.name.bold(), bucket.url.dimmed());
    }
    Ok(())
}

pub fn bucket_rm(pm: &PackageManager, name: &str) -> Result<()> {
    pm.remove_bucket(name)?;
    println!("{} Removed bucket {}", "✓".green(), name.bold());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
