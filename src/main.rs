use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::Parser;

use taskherd::config::Config;
use taskherd::git::Repository;
use taskherd::scheduler::{TaskManager, queue_summary};

mod cli;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .format_timestamp_secs()
    .format_target(false)
    .init();

    if let Err(e) = run(cli) {
        log::error!("{e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let repo_root = match cli.directory {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to determine current directory")?,
    };
    let repo = Repository::at(&repo_root);
    let cfg = Config::load(&repo_root)?;

    match cli.command {
        Commands::Run { jobs, tasks } => {
            let mut cfg = cfg;
            if let Some(jobs) = jobs {
                if jobs == 0 {
                    anyhow::bail!("-j must be at least 1");
                }
                cfg.max_concurrent = jobs;
            }

            // Sanity-check the repository and mainline before any state is touched.
            repo.rev_parse(&cfg.mainline)
                .with_context(|| format!("mainline branch {:?} not found", cfg.mainline))?;

            let shutdown = Arc::new(AtomicBool::new(false));
            #[cfg(unix)]
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&shutdown))
                    .context("failed to register signal handler")?;
            }

            let mut manager = TaskManager::new(repo, cfg, tasks)?;
            manager.recover()?;
            manager.run(&shutdown)
        }
        Commands::Status => {
            for (queue, slugs) in queue_summary(&cfg, &repo_root)? {
                println!("{queue} ({}):", slugs.len());
                for slug in slugs {
                    println!("  {slug}");
                }
            }
            Ok(())
        }
    }
}
