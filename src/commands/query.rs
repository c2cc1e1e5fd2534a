use colored::Colorize;
use ladle::resolver::Dependencies;
use ladle::{PackageManager, Result};

pub fn list(pm: &PackageManager, json: bool) -> Result<()> {
    let apps = pm.list()?;

    if json {
        #[derive(serde::Serialize)]
        struct Row<'a> {
            name: &'a str,
            version: &'a str,
            bucket: &'a str,
            architecture: String,
            hold: bool,
        }

        let rows: Vec<Row<'_>> = apps
            .iter()
            .map(|app| Row {
                name: &app.name,
                version: &app.version,
                bucket: app.bucket_name(),
                architecture: app.architecture.to_string(),
                hold: app.hold,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if apps.is_empty() {
        println!("No apps installed");
        return Ok(());
    }

    for app in &apps {
        print!("{} {}", app.name.bold(), app.version);
        if !app.bucket_name().is_empty() {
            print!(" {}", format!("[{}]", app.bucket_name()).dimmed());
        }
        if app.hold {
            print!(" {}", "held".yellow());
        }
        println!();
    }
    Ok(())
}

pub fn status(pm: &PackageManager) -> Result<()> {
    let outdated = pm.outdated()?;
    if outdated.is_empty() {
        println!("{} Everything is up to date", "✓".green());
        return Ok(());
    }

    println!("{}", "==> Outdated".bold().yellow());
    for app in &outdated {
        let mut line = format!("{} {} -> {}", app.name.bold(), app.installed, app.latest.green());
        if app.manifest_deleted {
            line.push_str(&format!(" {}", "(manifest removed)".red()));
        }
        if app.hold {
            line.push_str(&format!(" {}", "(held)".yellow()));
        }
        println!("{}", line);
    }
    Ok(())
}

pub fn info(pm: &PackageManager, identifier: &str, json: bool) -> Result<()> {
    let (app, _) = pm.resolve(identifier)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&app)?);
        return Ok(());
    }

    println!("{}", format!("==> {}", app.name).bold().green());
    if !app.description.is_empty() {
        println!("{}", app.description);
    }
    println!("{}: {}", "Version".bold(), app.version);
    if !app.bucket_name().is_empty() {
        println!("{}: {}", "Bucket".bold(), app.bucket_name());
    }
    if !app.bin.is_empty() {
        let names: Vec<String> = app.bin.iter().map(|b| b.shim_name()).collect();
        println!("{}: {}", "Binaries".bold(), names.join(", "));
    }
    if !app.depends.is_empty() {
        let deps: Vec<String> = app.depends.iter().map(ToString::to_string).collect();
        println!("{}: {}", "Depends".bold(), deps.join(", "));
    }
    if let Ok(installed) = pm.installed(&app.name) {
        println!(
            "{}: {} ({})",
            "Installed".bold(),
            pm.config().current_dir(&installed.name).display(),
            installed.architecture
        );
    }
    if !app.notes.is_empty() {
        println!("{}", "Notes".bold());
        println!("{}", app.notes);
    }
    Ok(())
}

pub fn cat(pm: &PackageManager, identifier: &str) -> Result<()> {
    let (_, raw) = pm.resolve(identifier)?;
    println!("{}", String::from_utf8_lossy(&raw));
    Ok(())
}

pub fn depends(pm: &PackageManager, identifier: &str, reverse: bool) -> Result<()> {
    let tree = if reverse {
        pm.reverse_dependencies(identifier)?
    } else {
        pm.dependencies(identifier)?
    };

    if tree.children.is_empty() {
        let what = if reverse { "dependents" } else { "dependencies" };
        println!("{} No {}", "✓".green(), what);
        return Ok(());
    }

    print_tree(&tree, 0);

    let missing = tree.unresolved();
    if !missing.is_empty() {
        println!();
        for dependency in missing {
            println!("  {} {} not found in any bucket", "⚠".yellow(), dependency);
        }
    }
    Ok(())
}

fn print_tree(node: &Dependencies, depth: usize) {
    let label = node.dependency.to_string();
    let label = if node.app.is_some() {
        label.normal()
    } else {
        label.red()
    };
    println!("{}{}", "  ".repeat(depth), label);
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}

pub fn versions(pm: &PackageManager, identifier: &str, limit: usize) -> Result<()> {
    let versions = pm.versions(identifier, limit)?;
    if versions.is_empty() {
        println!("No versions found in bucket history");
        return Ok(());
    }
    for version in versions {
        println!("{}", version);
    }
    Ok(())
}
