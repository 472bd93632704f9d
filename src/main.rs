use anyhow::Context;

use sshpilot::config::{
    AppConfig, BackupManager, BackupPaths, GroupManager, GroupNode, ImportMode, SortPreset,
    apply_connection_sort,
};
use sshpilot::connection::ConnectionManager;

fn main() -> anyhow::Result<()> {
    let log_dir = match std::env::var(sshpilot::config::paths::LOG_DIR_ENV) {
        Ok(dir) if dir.is_empty() => None,
        Ok(dir) => Some(std::path::PathBuf::from(dir)),
        Err(_) => sshpilot::config::paths::ensure_log_dir().ok(),
    };
    let _guard = sshpilot::logging::init_logging(log_dir.clone()).context("initializing logging")?;

    tracing::info!("Starting sshPilot");
    if let Some(dir) = &log_dir {
        tracing::info!("Logging to {}", dir.display());
    }

    let settings = AppConfig::load().context("loading settings")?;

    let mut connections =
        ConnectionManager::from_settings(&settings).context("resolving SSH config path")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("export") | Some("import") => {
            return run_backup(&args, connections.config_path());
        }
        _ => {}
    }

    connections
        .load()
        .with_context(|| format!("loading {}", connections.config_path().display()))?;
    for warning in connections.warnings() {
        eprintln!("warning: {}", warning);
    }

    let mut groups = GroupManager::load_default().context("loading groups")?;
    let nicknames: Vec<&str> = connections
        .connections()
        .iter()
        .map(|c| c.nickname.as_str())
        .collect();
    groups.sync_connections(nicknames.as_slice())?;

    match SortPreset::from_id(&settings.ui.sort_preset) {
        Some(preset) => {
            apply_connection_sort(&mut groups, preset)?;
        }
        None => tracing::warn!("Unknown sort preset '{}'", settings.ui.sort_preset),
    }

    if let [command, query] = args.as_slice() {
        if command == "search" {
            for record in connections.search(query) {
                print_connection(&record.nickname, &connections, 0);
            }
            return Ok(());
        }
    }

    println!("{}", connections.config_path().display());
    for node in groups.get_group_hierarchy() {
        print_group(&node, &connections, 0);
    }
    for nickname in groups.root_connections() {
        print_connection(nickname, &connections, 0);
    }
    if !connections.rules().is_empty() {
        println!("({} rule blocks)", connections.rules().len());
    }

    Ok(())
}

/// `export <file>` and `import <file> [replace|merge]`
fn run_backup(args: &[String], ssh_config: &std::path::Path) -> anyhow::Result<()> {
    let paths = BackupPaths::for_ssh_config(ssh_config)
        .context("could not determine the configuration directory")?;
    let manager = BackupManager::new(paths);

    match args {
        [command, file] if command == "export" => {
            manager
                .export_to(std::path::Path::new(file))
                .with_context(|| format!("exporting to {}", file))?;
            println!("exported to {}", file);
        }
        [command, file, rest @ ..] if command == "import" && rest.len() <= 1 => {
            let mode = match rest.first() {
                Some(id) => ImportMode::from_id(id)
                    .with_context(|| format!("unknown import mode '{}'", id))?,
                None => ImportMode::default(),
            };
            let report = manager
                .import_from(std::path::Path::new(file), mode, true)
                .with_context(|| format!("importing {}", file))?;
            if let Some(saved) = &report.auto_backup {
                println!("previous configuration saved to {}", saved.display());
            }
            println!(
                "imported {} hosts and {} groups",
                report.added_hosts.len(),
                report.added_groups.len()
            );
        }
        _ => anyhow::bail!("usage: sshpilot export <file> | import <file> [replace|merge]"),
    }
    Ok(())
}

fn print_group(node: &GroupNode, connections: &ConnectionManager, depth: usize) {
    let marker = if node.group.expanded { "-" } else { "+" };
    println!("{}{} {}/", "  ".repeat(depth), marker, node.group.name);
    if !node.group.expanded {
        return;
    }
    for child in &node.children {
        print_group(child, connections, depth + 1);
    }
    for nickname in &node.group.connections {
        print_connection(nickname, connections, depth + 1);
    }
}

fn print_connection(nickname: &str, connections: &ConnectionManager, depth: usize) {
    let indent = "  ".repeat(depth);
    match connections.find_connection(nickname) {
        Some(record) => {
            let user = record
                .username
                .as_deref()
                .map(|u| format!("{}@", u))
                .unwrap_or_default();
            println!(
                "{}  {} ({}{}:{})",
                indent,
                record.nickname,
                user,
                record.target_host(),
                record.port
            );
        }
        None => println!("{}  {} (missing)", indent, nickname),
    }
}
