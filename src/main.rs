use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use repocache::{CacheConfig, CacheEntry, CacheManager};

#[derive(Parser)]
#[command(
    name = "repocache",
    about = "Mirror remote and local repositories into a managed on-disk cache"
)]
struct Cli {
    /// Cache root directory (defaults to the system cache dir)
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    /// Freshness window in seconds before entries read as stale
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Total cache size ceiling in bytes (0 = unlimited)
    #[arg(long, global = true)]
    max_size: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a repository or directory into the cache
    Cache {
        /// Remote URL or local path
        source: String,

        /// Entry name (derived from the source if omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// Force a re-check and update of a cached entry
    Refresh {
        /// Entry name
        name: String,
    },

    /// Remove a cached entry and its mirror
    Remove {
        /// Entry name
        name: String,
    },

    /// Remove all cached entries
    Clear,

    /// List cached entries
    List,

    /// Show one entry in detail
    Get {
        /// Entry name
        name: String,
    },

    /// Show aggregate cache statistics
    Stats,

    /// Print the on-disk mirror path of an entry
    Path {
        /// Entry name
        name: String,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let mut config = match &cli.cache_root {
        Some(root) => CacheConfig::new(root),
        None => CacheConfig::default(),
    };
    if let Some(secs) = cli.timeout_secs {
        config = config.with_default_timeout(Duration::from_secs(secs));
    }
    if let Some(bytes) = cli.max_size {
        config = config.with_max_cache_size(bytes);
    }

    let result = run(config, cli.command);
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: CacheConfig, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let manager = CacheManager::new(config)?;

    match command {
        Commands::Cache { source, name } => {
            let entry = manager.cache(&source, name.as_deref())?;
            print_entry(&entry);
        }
        Commands::Refresh { name } => {
            let entry = manager.refresh(&name)?;
            print_entry(&entry);
        }
        Commands::Remove { name } => {
            manager.remove(&name)?;
            println!("Removed {}", name);
        }
        Commands::Clear => {
            let report = manager.clear()?;
            println!("Removed {} entries", report.removed);
            for (name, err) in &report.failures {
                eprintln!("  failed to remove {}: {}", name, err);
            }
        }
        Commands::List => {
            let entries = manager.list();
            if entries.is_empty() {
                println!("No repositories cached");
                return Ok(());
            }
            println!(
                "{:<24} {:<6} {:<8} {:>12} {:<14} SOURCE",
                "NAME", "TYPE", "STATUS", "SIZE", "COMMIT"
            );
            println!("{}", "-".repeat(100));
            for entry in entries {
                println!(
                    "{:<24} {:<6} {:<8} {:>12} {:<14} {}",
                    entry.name,
                    entry.cache_type.to_string(),
                    entry.status.to_string(),
                    entry.size_bytes,
                    short_commit(&entry),
                    entry.source
                );
            }
        }
        Commands::Get { name } => {
            let entry = manager.get_detailed(&name)?;
            print_entry(&entry);
        }
        Commands::Stats => {
            let stats = manager.stats();
            println!("Repository Cache");
            println!("  Entries:    {}", stats.total_entries);
            println!("    git:      {}", stats.git_entries);
            println!("    local:    {}", stats.local_entries);
            println!(
                "  Status:     {} fresh / {} stale / {} missing / {} error",
                stats.fresh, stats.stale, stats.missing, stats.error
            );
            println!("  Total size: {} bytes", stats.total_size_bytes);
            if stats.max_size_bytes > 0 {
                println!("  Quota:      {} bytes", stats.max_size_bytes);
                println!("  Full:       {}", if stats.is_full { "yes" } else { "no" });
            } else {
                println!("  Quota:      unlimited");
            }
        }
        Commands::Path { name } => {
            let path = manager.cached_path(&name)?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn print_entry(entry: &CacheEntry) {
    println!("{}", entry.name);
    println!("  Source:    {}", entry.source);
    println!("  Type:      {}", entry.cache_type);
    println!("  Status:    {}", entry.status);
    println!("  Mirror:    {}", entry.cache_path.display());
    println!("  Size:      {} bytes", entry.size_bytes);
    if let Some(commit) = &entry.local_commit_hash {
        println!("  Commit:    {}", commit);
    }
    if let Some(branch) = &entry.local_branch {
        println!("  Branch:    {}", branch);
    }
    if entry.has_upstream_changes {
        println!("  Upstream:  changed");
    }
    if let Some(summary) = &entry.upstream_changes_summary {
        if let Some(commits) = summary.commits {
            println!("  Commits:   {} new", commits);
        }
        println!(
            "  Files:     +{} ~{} -{}",
            summary.files_added, summary.files_modified, summary.files_removed
        );
    }
}

fn short_commit(entry: &CacheEntry) -> String {
    match &entry.local_commit_hash {
        Some(commit) if commit.len() > 12 => commit[..12].to_string(),
        Some(commit) => commit.clone(),
        None => "-".to_string(),
    }
}
