use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Result, eyre};
use std::path::PathBuf;
use tabtodo::config::{Backend, Config, DynStorage};
use tabtodo::{Outcome, Priority, Task, TaskFilter, TaskStore, is_valid_site_url};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tabtodo")]
#[command(about = "tabtodo - the new-tab dashboard's to-do list")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Config file (default: ~/.config/tabtodo/config.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the task data (overrides config)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Storage backend: file, sqlite or memory (overrides config)
    #[arg(short, long)]
    backend: Option<Backend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task
    Add {
        #[arg(required = true)]
        text: Vec<String>,

        /// low, medium or high
        #[arg(short, long, default_value = "low")]
        priority: Priority,
    },

    /// List tasks in display order
    List {
        /// all, active or completed
        #[arg(short, long, default_value = "all")]
        filter: TaskFilter,

        /// Show full task ids
        #[arg(long)]
        ids: bool,
    },

    /// Show every field of a task
    Show { task: String },

    /// Mark a task done, or not done again
    Toggle { task: String },

    /// Delete a task
    Remove { task: String },

    /// Change a task's fields
    Edit {
        task: String,

        #[arg(long)]
        text: Option<String>,

        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,

        #[arg(long)]
        clear_description: bool,

        /// Add a related site (repeatable)
        #[arg(long = "site")]
        sites: Vec<String>,

        /// Drop all related sites before adding any --site values
        #[arg(long)]
        clear_sites: bool,

        #[arg(short, long)]
        priority: Option<Priority>,
    },

    /// Move a task before another one, or to a position (1 = top)
    Move {
        task: String,

        #[arg(long, conflicts_with = "to", required_unless_present = "to")]
        before: Option<String>,

        #[arg(long)]
        to: Option<usize>,
    },

    /// Delete every completed task
    ClearCompleted,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    // Setup tracing: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut store = TaskStore::load_with_key(config.open_storage()?, &config.key);

    run(&mut store, cli.command)?;

    if let Err(e) = store.flush() {
        warn_user(&format!("{:#}", e));
    }

    Ok(())
}

fn run(store: &mut TaskStore<DynStorage>, command: Commands) -> Result<()> {
    match command {
        Commands::Add { text, priority } => {
            let outcome = store.add(&text.join(" "), priority);
            match &outcome.id {
                Some(id) => println!("Added {}", id.dimmed()),
                None => println!("Nothing to add: task text is empty"),
            }
            report(outcome);
        }
        Commands::List { filter, ids } => {
            print_list(store, filter, ids);
        }
        Commands::Show { task } => {
            let id = resolve_id(store, &task)?;
            if let Some(task) = store.get(&id) {
                print_task(task);
            }
        }
        Commands::Toggle { task } => {
            let id = resolve_id(store, &task)?;
            let outcome = store.toggle(&id);
            if let Some(task) = store.get(&id) {
                let state = if task.completed { "done" } else { "not done" };
                println!("{} is now {}", task.text.bold(), state);
            }
            report(outcome);
        }
        Commands::Remove { task } => {
            let id = resolve_id(store, &task)?;
            let text = store.get(&id).map(|t| t.text.clone()).unwrap_or_default();
            let outcome = store.remove(&id);
            println!("Removed {}", text.bold());
            report(outcome);
        }
        Commands::Edit {
            task,
            text,
            description,
            clear_description,
            sites,
            clear_sites,
            priority,
        } => {
            let id = resolve_id(store, &task)?;

            if let Some(bad) = sites.iter().find(|s| !is_valid_site_url(s.trim())) {
                return Err(eyre!("Not a valid URL: {} (e.g. https://example.com)", bad));
            }

            let mut updated = store
                .get(&id)
                .cloned()
                .ok_or_else(|| eyre!("Task disappeared: {}", id))?;

            if let Some(text) = text {
                if text.trim().is_empty() {
                    return Err(eyre!("Task text cannot be empty"));
                }
                updated.text = text;
            }
            if clear_description {
                updated.description = None;
            } else if let Some(description) = description {
                updated.description = Some(description);
            }
            if clear_sites {
                updated.related_sites = None;
            }
            if !sites.is_empty() {
                updated
                    .related_sites
                    .get_or_insert_with(Vec::new)
                    .extend(sites.into_iter().map(|s| s.trim().to_string()));
            }
            if let Some(priority) = priority {
                updated.priority = priority;
            }

            let outcome = store.edit(updated);
            if outcome.changed {
                println!("Updated {}", id.dimmed());
            } else {
                println!("Nothing changed");
            }
            report(outcome);
        }
        Commands::Move { task, before, to } => {
            let id = resolve_id(store, &task)?;
            let outcome = match (before, to) {
                (Some(before), _) => {
                    let before_id = resolve_id(store, &before)?;
                    store.reorder(&id, &before_id)
                }
                (None, Some(position)) => store.move_to(&id, position.saturating_sub(1)),
                (None, None) => return Err(eyre!("Give either --before or --to")),
            };
            if !outcome.changed {
                println!("Nothing moved");
            }
            report(outcome);
            print_list(store, TaskFilter::All, false);
        }
        Commands::ClearCompleted => {
            let before = store.len();
            let outcome = store.clear_completed();
            println!("Cleared {} completed task(s)", before - store.len());
            report(outcome);
        }
    }

    Ok(())
}

/// Find a task by full id, list position (1-based), or unique id prefix
fn resolve_id<S: tabtodo::Storage>(store: &TaskStore<S>, reference: &str) -> Result<String> {
    let reference = reference.trim();

    if let Some(task) = store.get(reference) {
        return Ok(task.id.clone());
    }

    if let Ok(position) = reference.parse::<usize>() {
        if let Some(task) = position.checked_sub(1).and_then(|i| store.tasks().get(i)) {
            return Ok(task.id.clone());
        }
    }

    let matches: Vec<&Task> = store.tasks().iter().filter(|t| t.id.starts_with(reference)).collect();
    match matches.as_slice() {
        [task] => Ok(task.id.clone()),
        [] => Err(eyre!("No task matches '{}'", reference)),
        _ => Err(eyre!("'{}' matches {} tasks, use more of the id", reference, matches.len())),
    }
}

fn print_list<S: tabtodo::Storage>(store: &TaskStore<S>, filter: TaskFilter, ids: bool) {
    let visible = store.filter(filter);
    if visible.is_empty() {
        println!("{}", "No tasks".dimmed());
    }

    for task in visible {
        // Positions always refer to the full list so they can be passed back in
        let position = store.tasks().iter().position(|t| t.id == task.id).unwrap_or(0) + 1;
        let check = if task.completed { "[x]".green() } else { "[ ]".normal() };
        let text = if task.completed {
            task.text.strikethrough().dimmed()
        } else {
            task.text.normal()
        };

        print!("{:>3}. {} {} {}", position, check, priority_label(task.priority), text);
        if ids {
            print!("  {}", task.id.dimmed());
        }
        println!();
    }

    let counts = store.counts();
    println!(
        "{}",
        format!(
            "{} total, {} active, {} completed",
            counts.total, counts.active, counts.completed
        )
        .dimmed()
    );
}

fn print_task(task: &Task) {
    println!("{}  {}", "id:".bold(), task.id);
    println!("{}  {}", "text:".bold(), task.text);
    println!("{}  {}", "done:".bold(), if task.completed { "yes" } else { "no" });
    println!("{}  {}", "priority:".bold(), priority_label(task.priority));
    println!("{}  {}", "created:".bold(), format_created_at(task.created_at));
    if let Some(description) = &task.description {
        println!("{}  {}", "description:".bold(), description);
    }
    if !task.sites().is_empty() {
        println!("{}", "related sites:".bold());
        for site in task.sites() {
            println!("  - {}", site.blue().underline());
        }
    }
}

fn priority_label(priority: Priority) -> colored::ColoredString {
    let label = format!("{:<6}", priority.as_str());
    match priority {
        Priority::High => label.red(),
        Priority::Medium => label.yellow(),
        Priority::Low => label.green(),
    }
}

fn format_created_at(ms: i64) -> String {
    if ms <= 0 {
        return "unknown".to_string();
    }
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn report(outcome: Outcome) {
    if let Some(warning) = outcome.warning {
        warn_user(&format!("change kept for this session but not saved: {}", warning));
    }
}

fn warn_user(message: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), message);
}
