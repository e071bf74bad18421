use anyhow::{Context, Result, anyhow};
use colored::*;
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use crate::config::savepoint::{Actor, PhaseStatus, PushStatus, Savepoint, SavepointId};
use crate::config::settings::Settings;
use crate::drivers::selector::{select_dump_backend, select_vcs_backend};
use crate::drivers::{DatabaseDump, VersionControl};
use crate::guard::validate_revision;
use crate::orchestrator::{OperationResult, RestoreTestMode, SavepointOrchestrator, short};
use crate::storage::{HistoryStore, JsonHistoryStore, ListFilter};
use crate::utils::clock::SystemClock;
use crate::utils::io::{absolute, to_slash};

/// Everything a command needs for one project root.
struct Project {
    settings: Settings,
    vcs: Box<dyn VersionControl>,
    db: Box<dyn DatabaseDump>,
    store: JsonHistoryStore,
}

impl Project {
    fn open(root: &Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(r) => r.clone(),
            None => std::env::current_dir()?,
        };
        if !root.is_dir() {
            return Err(anyhow!("project root {} is not a directory", root.display()));
        }
        let root = absolute(&root).with_context(|| format!("resolving {}", root.display()))?;
        let settings = Settings::load(&root)?;
        let vcs = select_vcs_backend(&root, &settings);
        let db = select_dump_backend(&settings);
        let store = JsonHistoryStore::new(settings.history_path());
        Ok(Self { settings, vcs, db, store })
    }

    fn with_orchestrator<T>(&self, f: impl FnOnce(&SavepointOrchestrator<'_>) -> T) -> Result<T> {
        let clock = SystemClock;
        let orchestrator =
            SavepointOrchestrator::new(&self.settings, self.vcs.as_ref(), self.db.as_ref(), &self.store, &clock)?;
        Ok(f(&orchestrator))
    }
}

pub fn do_create(root: &Option<PathBuf>, message: &str, actor: Actor) -> Result<()> {
    let project = Project::open(root)?;
    let bar = create_progress_bar("Creating savepoint");
    let result = project.with_orchestrator(|o| o.create(message, actor))?;
    bar.finish_and_clear();

    print_messages(&result);
    if let Some(sp) = &result.data {
        let glyph = if result.success { "✔".green().bold() } else { "✖".red().bold() };
        println!("{} {}", glyph, format!("Savepoint #{} recorded", sp.id).bold());
        println!("  {:<9} {}", "revision", sp.revision_id.as_deref().map(short).unwrap_or("-"));
        println!("  {:<9} {}", "dump", sp.dump_path.as_deref().unwrap_or("-"));
        println!("  {:<9} {}", "push", push_label(sp.push_status));
    }
    verdict(&result, "create")
}

pub fn do_restore(root: &Option<PathBuf>, id: SavepointId, no_backup: bool) -> Result<()> {
    let project = Project::open(root)?;
    let bar = create_progress_bar(&format!("Restoring savepoint #{}", id));
    let result = project.with_orchestrator(|o| o.restore(id, !no_backup))?;
    bar.finish_and_clear();

    print_messages(&result);
    if let Some(report) = &result.data {
        if let Some(backup) = report.safety_backup_id {
            println!("{} {}", "i".yellow().bold(), format!("Safety savepoint #{} taken first", backup).yellow());
        }
        if let Some(rev) = &report.revision_restored {
            println!("{} {}", "✔".green().bold(), format!("Files reset to {}", short(rev)).green());
        }
        if report.database_restored {
            println!("{} {}", "✔".green().bold(), "Database restored".green());
        }
    }
    if result.success {
        println!("{} {}", "✔".green().bold(), format!("Restored savepoint #{}", id).green());
    }
    verdict(&result, "restore")
}

pub fn do_restore_test(
    root: &Option<PathBuf>,
    id: SavepointId,
    mode: RestoreTestMode,
    target_dir: Option<&Path>,
    target_db: Option<&str>,
) -> Result<()> {
    let project = Project::open(root)?;
    let label = match mode {
        RestoreTestMode::DryRun => format!("Checking savepoint #{}", id),
        RestoreTestMode::SeparateEnv => format!("Rebuilding savepoint #{} in a separate environment", id),
    };
    let bar = create_progress_bar(&label);
    let result = project.with_orchestrator(|o| o.restore_test(id, mode, target_dir, target_db))?;
    bar.finish_and_clear();

    print_messages(&result);
    if let Some(report) = &result.data {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
        let check = |v: Option<bool>| match v {
            Some(true) => "ok",
            Some(false) => "FAILED",
            None => "-",
        };
        table.add_row(vec![Cell::new("revision reachable"), Cell::new(check(report.revision_reachable))]);
        table.add_row(vec![Cell::new("dump verified"), Cell::new(check(report.dump_verified))]);
        if let Some(size) = report.dump_size {
            table.add_row(vec![Cell::new("dump size"), Cell::new(format!("{} bytes", size))]);
        }
        if mode == RestoreTestMode::SeparateEnv {
            table.add_row(vec![Cell::new("target directory"), Cell::new(report.target_dir.as_deref().unwrap_or("-"))]);
            table.add_row(vec![Cell::new("target database"), Cell::new(report.target_db.as_deref().unwrap_or("-"))]);
            table.add_row(vec![Cell::new("files copied"), Cell::new(report.files_copied)]);
            table.add_row(vec![
                Cell::new("config rewritten"),
                Cell::new(if report.config_rewritten { "yes" } else { "no" }),
            ]);
        }
        println!("{}", table);
    }
    if result.success {
        println!("{} {}", "✔".green().bold(), format!("Savepoint #{} is restorable", id).green());
    }
    verdict(&result, "restore test")
}

pub fn do_list(root: &Option<PathBuf>, limit: Option<usize>, actor: Option<Actor>) -> Result<()> {
    let project = Project::open(root)?;
    let rows = project.store.list(&ListFilter { actor, limit, newest_first: true })?;

    if rows.is_empty() {
        println!("{} {}", "i".yellow().bold(), "No savepoints found".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Created").add_attribute(Attribute::Bold),
            Cell::new("By").add_attribute(Attribute::Bold),
            Cell::new("Message").add_attribute(Attribute::Bold),
            Cell::new("Revision").add_attribute(Attribute::Bold),
            Cell::new("Files").add_attribute(Attribute::Bold),
            Cell::new("Database").add_attribute(Attribute::Bold),
            Cell::new("Push").add_attribute(Attribute::Bold),
        ]);

    for s in &rows {
        table.add_row(vec![
            Cell::new(s.id),
            Cell::new(s.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(s.created_by),
            Cell::new(&s.message),
            Cell::new(s.revision_id.as_deref().map(short).unwrap_or("-")),
            Cell::new(phase_label(s.filesystem_status)),
            Cell::new(phase_label(s.database_status)),
            Cell::new(push_label(s.push_status)),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn do_show(root: &Option<PathBuf>, id: Option<SavepointId>, revision: Option<&str>) -> Result<()> {
    let project = Project::open(root)?;
    let sp = match (id, revision) {
        (Some(id), _) => project.store.get(id)?.ok_or_else(|| anyhow!("savepoint {} not found", id))?,
        (None, Some(rev)) => {
            let rev = validate_revision(rev)?;
            project
                .store
                .get_by_revision(rev)?
                .ok_or_else(|| anyhow!("no savepoint recorded for revision {}", rev))?
        }
        (None, None) => return Err(anyhow!("give a savepoint id or --revision")),
    };
    println!("{}", detail_table(&sp));
    Ok(())
}

pub fn do_status(root: &Option<PathBuf>) -> Result<()> {
    let project = Project::open(root)?;
    let result = project.with_orchestrator(|o| o.status())?;
    print_messages(&result);

    if let Some(st) = &result.data {
        println!("{} {}", "Project".bold(), st.project_root);
        match &st.vcs_unavailable {
            Some(why) => println!("{} {}: {}", "✖".red().bold(), st.vcs, why.red()),
            None => {
                println!("{} {}", "✔".green().bold(), st.vcs);
                let branch = st.branch.clone().unwrap_or_else(|| "(detached)".into());
                let head = st.head.as_deref().map(short).unwrap_or("(no commits)");
                let state = match st.clean {
                    Some(true) => "clean".green(),
                    Some(false) => "dirty".yellow(),
                    None => "unknown".normal(),
                };
                println!("  {} @ {} ({})", branch, head, state);
            }
        }
        match &st.database_unavailable {
            Some(why) => println!("{} {}: {}", "✖".red().bold(), st.database, why.red()),
            None => println!(
                "{} {} ({})",
                "✔".green().bold(),
                st.database,
                project.settings.database.connection.database
            ),
        }
        match st.latest_savepoint {
            Some(id) => println!("{} latest savepoint #{}", "i".yellow().bold(), id),
            None => println!("{} {}", "i".yellow().bold(), "No savepoints yet".yellow()),
        }
        println!("{} {}", "i".yellow().bold(), format!("history at {}", to_slash(project.store.path())).dimmed());
    }
    verdict(&result, "status")
}

pub fn do_version() {
    println!("{} {}", "savepoint".bold(), env!("CARGO_PKG_VERSION").cyan());
}

fn detail_table(sp: &Savepoint) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    let rows: Vec<(&str, String)> = vec![
        ("id", sp.id.to_string()),
        ("message", sp.message.clone()),
        ("created", sp.created_at.format("%Y-%m-%d %H:%M:%S %:z").to_string()),
        ("created by", sp.created_by.to_string()),
        ("revision", sp.revision_id.clone().unwrap_or_else(|| "-".into())),
        ("dump", sp.dump_path.clone().unwrap_or_else(|| "-".into())),
        ("dump size", sp.dump_size.map(|s| format!("{} bytes", s)).unwrap_or_else(|| "-".into())),
        ("dump sha256", sp.dump_sha256.clone().unwrap_or_else(|| "-".into())),
        ("files", sp.filesystem_status.to_string()),
        ("database", sp.database_status.to_string()),
        ("push", sp.push_status.to_string()),
    ];
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key).add_attribute(Attribute::Bold), Cell::new(value)]);
    }
    table
}

fn phase_label(status: PhaseStatus) -> ColoredString {
    match status {
        PhaseStatus::Success => "ok".green(),
        PhaseStatus::Failed => "failed".red(),
        PhaseStatus::Skipped => "skipped".yellow(),
    }
}

fn push_label(status: PushStatus) -> ColoredString {
    match status {
        PushStatus::Success => "pushed".green(),
        PushStatus::Failed => "failed".red(),
        PushStatus::Skipped => "skipped".yellow(),
        PushStatus::Absent => "-".normal(),
    }
}

fn print_messages<T>(result: &OperationResult<T>) {
    for w in &result.warnings {
        eprintln!("{} {}: {}", "!".yellow().bold(), "Warning".yellow(), w);
    }
    for e in &result.errors {
        eprintln!("{} {}: {}", "✖".red().bold(), "Error".red(), e);
    }
}

fn verdict<T>(result: &OperationResult<T>, operation: &str) -> Result<()> {
    if result.success {
        Ok(())
    } else {
        Err(anyhow!("{} failed", operation))
    }
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");
    bar.set_style(style);
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::savepoint::NewSavepoint;
    use chrono::Local;

    fn sample() -> Savepoint {
        NewSavepoint {
            revision_id: Some("0123456789abcdef".into()),
            message: "before upgrade".into(),
            dump_path: Some("backups/backup_2024-01-01_00-00-00.sql".into()),
            dump_sha256: None,
            dump_size: Some(2048),
            created_by: Actor::Web,
            filesystem_status: PhaseStatus::Success,
            database_status: PhaseStatus::Failed,
            push_status: PushStatus::Absent,
            created_at: Local::now(),
        }
        .into_savepoint(7)
    }

    #[test]
    fn detail_table_lists_every_field() {
        let rendered = detail_table(&sample()).to_string();
        for needle in ["before upgrade", "0123456789abcdef", "2048 bytes", "failed", "absent", "web"] {
            assert!(rendered.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn failed_result_becomes_error() {
        let ok: OperationResult<()> = OperationResult::new().finish(true);
        assert!(verdict(&ok, "create").is_ok());
        let bad: OperationResult<()> = OperationResult::new().fail("boom");
        assert_eq!(verdict(&bad, "create").unwrap_err().to_string(), "create failed");
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Project::open(&Some(dir.path().join("nope"))).err().unwrap();
        assert!(err.to_string().contains("is not a directory"));
    }
}
