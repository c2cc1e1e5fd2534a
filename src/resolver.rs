//! Dependency trees, forward and reverse.
//!
//! Forward trees answer "what does this app need", reverse trees "what
//! needs this app". Both follow `depends` entries recursively and fail with
//! [`LadleError::DependencyCycle`] instead of recursing forever on cyclic
//! manifests.

use crate::bucket::{self, get_bucket};
use crate::config::Config;
use crate::decoder::ManifestDecoder;
use crate::error::{LadleError, Result};
use crate::manifest::{App, DetailField, Dependency};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

/// A node in a dependency tree
#[derive(Debug, Clone, Serialize)]
pub struct Dependencies {
    /// What was asked for
    pub dependency: Dependency,
    /// `None` when no bucket has a manifest for `dependency`
    #[serde(skip)]
    pub app: Option<App>,
    pub children: Vec<Dependencies>,
}

impl Dependencies {
    /// Number of levels, counting this node
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Dependencies::depth).max().unwrap_or(0)
    }

    /// Every dependency below this node that couldn't be resolved
    pub fn unresolved(&self) -> Vec<&Dependency> {
        let mut missing = Vec::new();
        for child in &self.children {
            if child.app.is_none() {
                missing.push(&child.dependency);
            }
            missing.extend(child.unresolved());
        }
        missing
    }
}

fn key_of(app: &App) -> Dependency {
    Dependency {
        bucket: app.bucket_name().to_string(),
        name: app.name.clone(),
    }
}

fn check_cycle(path: &[Dependency], next: &Dependency) -> Result<()> {
    if path.contains(next) {
        let mut chain: Vec<String> = path.iter().map(ToString::to_string).collect();
        chain.push(next.to_string());
        return Err(LadleError::DependencyCycle(chain));
    }
    Ok(())
}

fn lookup(config: &Config, dependency: &Dependency) -> Result<Option<App>> {
    if dependency.bucket.is_empty() {
        return bucket::find_available_app(config, &dependency.name);
    }
    Ok(get_bucket(config, &dependency.bucket).find_app(&dependency.name))
}

/// Forward tree rooted at `app`. `app.depends` must already be loaded; the
/// manifests of dependencies are read as needed.
pub fn dependency_tree(config: &Config, app: &App) -> Result<Dependencies> {
    let mut decoder = ManifestDecoder::new();
    let mut path = vec![key_of(app)];
    let children = forward_children(config, &mut decoder, app, &mut path)?;

    Ok(Dependencies {
        dependency: key_of(app),
        app: Some(app.clone()),
        children,
    })
}

fn forward_children(
    config: &Config,
    decoder: &mut ManifestDecoder,
    app: &App,
    path: &mut Vec<Dependency>,
) -> Result<Vec<Dependencies>> {
    let mut children = Vec::new();

    for dependency in &app.depends {
        check_cycle(path, dependency)?;

        let Some(mut found) = lookup(config, dependency)? else {
            debug!(dependency = %dependency, "unresolved dependency");
            children.push(Dependencies {
                dependency: dependency.clone(),
                app: None,
                children: vec![],
            });
            continue;
        };
        found.load_details_with(decoder, &[DetailField::Depends])?;

        path.push(dependency.clone());
        let grandchildren = forward_children(config, decoder, &found, path)?;
        path.pop();

        children.push(Dependencies {
            dependency: dependency.clone(),
            app: Some(found),
            children: grandchildren,
        });
    }

    Ok(children)
}

/// Load `depends` for every app in parallel, one decoder per worker.
pub fn preload_dependencies(apps: &mut [App]) -> Result<()> {
    apps.par_iter_mut()
        .map_init(ManifestDecoder::new, |decoder, app| {
            app.load_details_with(decoder, &[DetailField::Depends])
        })
        .collect::<Result<Vec<()>>>()?;
    Ok(())
}

/// Reverse tree: every app in `all_apps` that depends on `target`, and
/// recursively what depends on those. Run [`preload_dependencies`] on
/// `all_apps` first.
pub fn reverse_dependency_tree(all_apps: &[App], target: &App) -> Result<Dependencies> {
    let mut path = vec![key_of(target)];
    let children = reverse_children(all_apps, &key_of(target), &mut path)?;

    Ok(Dependencies {
        dependency: key_of(target),
        app: Some(target.clone()),
        children,
    })
}

fn reverse_children(
    all_apps: &[App],
    target: &Dependency,
    path: &mut Vec<Dependency>,
) -> Result<Vec<Dependencies>> {
    let mut children = Vec::new();

    for app in all_apps {
        // Every declared dependency counts, not just the first
        if !app.depends.iter().any(|d| d == target) {
            continue;
        }

        let key = key_of(app);
        check_cycle(path, &key)?;

        path.push(key.clone());
        let grandchildren = reverse_children(all_apps, &key, path)?;
        path.pop();

        children.push(Dependencies {
            dependency: key,
            app: Some(app.clone()),
            children: grandchildren,
        });
    }

    Ok(children)
}
