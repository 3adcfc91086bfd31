// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::BuildFile;
use crate::errors::{Result, WorkdagError};

/// Validate references and basic shape of a loaded build file.
///
/// Note: cycles in `deps`/`needs` are *not* an error here. The planner
/// detects them per item and converts them into terminal error states so
/// that unrelated work still runs. Use [`check_acyclic`] (the `validate`
/// subcommand does) to report them ahead of time.
pub fn validate_build_file(build: &BuildFile) -> Result<()> {
    ensure_has_items(build)?;
    validate_global_config(build)?;
    validate_references(build)?;
    Ok(())
}

fn ensure_has_items(build: &BuildFile) -> Result<()> {
    if build.tasks.is_empty() && build.services.is_empty() {
        return Err(WorkdagError::Config(
            "build file must contain at least one [task.<name>] or [service.<name>] section"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(_build: &BuildFile) -> Result<()> {
    // workers = 0 is meaningful (unbounded), and cache_mode is strongly
    // typed during deserialization; nothing to check currently.
    Ok(())
}

fn validate_references(build: &BuildFile) -> Result<()> {
    let check = |name: &str, deps: &[String], needs: &[String], cmd_len: usize| -> Result<()> {
        if cmd_len == 0 {
            return Err(WorkdagError::Config(format!(
                "item '{}' has an empty `cmd` list",
                name
            )));
        }
        for dep in deps {
            if !build.tasks.contains_key(dep) {
                return Err(WorkdagError::Config(format!(
                    "item '{}' has unknown task '{}' in `deps`",
                    name, dep
                )));
            }
        }
        for need in needs {
            if !build.services.contains_key(need) {
                return Err(WorkdagError::Config(format!(
                    "item '{}' has unknown service '{}' in `needs`",
                    name, need
                )));
            }
        }
        Ok(())
    };

    for (name, entry) in build.tasks.iter() {
        check(name, &entry.cfg.deps, &entry.cfg.needs, entry.cfg.cmd.len())?;
    }
    for (name, entry) in build.services.iter() {
        check(name, &entry.cfg.deps, &entry.cfg.needs, entry.cfg.cmd.len())?;
    }

    Ok(())
}

/// Report whether the combined deps/needs relation is acyclic.
///
/// Edge direction: requirement -> requirer. A topological sort fails exactly
/// when there is a cycle; the offending item is named in the error.
pub fn check_acyclic(build: &BuildFile) -> Result<()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in build.tasks.keys() {
        graph.add_node(name.as_str());
    }
    for name in build.services.keys() {
        graph.add_node(name.as_str());
    }

    let task_edges = build
        .tasks
        .iter()
        .map(|(name, entry)| (name, &entry.cfg.deps, &entry.cfg.needs));
    let service_edges = build
        .services
        .iter()
        .map(|(name, entry)| (name, &entry.cfg.deps, &entry.cfg.needs));

    for (name, deps, needs) in task_edges.chain(service_edges) {
        for dep in deps {
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
        for need in needs {
            graph.add_edge(need.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(WorkdagError::Cycle(format!(
                "cycle detected in the deps/needs graph involving '{}'",
                node
            )))
        }
    }
}
