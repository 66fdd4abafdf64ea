// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-assembly CLI - static module dependency tooling
//!
//! ## Commands
//!
//! - `scan`: list the `require` identifiers a script declares
//! - `resolve`: turn identifiers into canonical URLs
//! - `graph`: load a module tree from disk and print it

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use spacey_loader::{Domain, DomainConfig, FsHost, Module, Setup, Status, VERSION};
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "spacey-assembly",
    about = "Module loader and dependency resolver powered by Spacey",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// JSON loader configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the dependencies declared by a script
    Scan {
        /// Script file
        file: PathBuf,
    },

    /// Resolve identifiers to canonical URLs
    Resolve {
        /// Identifiers to resolve
        #[arg(required = true)]
        ids: Vec<String>,

        /// Resolve relative identifiers against this module URL
        #[arg(short, long)]
        referrer: Option<String>,
    },

    /// Load a module tree from a directory and print it
    Graph {
        /// Directory served under the base URL
        root: PathBuf,

        /// Entry module identifier
        main: String,

        /// Base URL the directory is served under
        #[arg(short, long)]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_loader=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_loader=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = DomainConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scan { file } => {
            let source = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            for reference in spacey_loader::scan_dependencies(&source) {
                println!("{}", reference);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Resolve { ids, referrer } => {
            let domain = Domain::new(config, Arc::new(spacey_loader::CatalogHost::new()))?;
            for id in ids {
                let url = domain.resolve(&id, referrer.as_deref())?;
                println!("{} {} {}", id.cyan(), "->".dimmed(), url);
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Graph {
            root,
            main,
            base_url,
        } => {
            if let Some(base_url) = base_url {
                config.apply(Setup::base_url(base_url));
            }
            let host = FsHost::new(root, config.base_url.clone());
            let domain = Domain::new(config, Arc::new(host))?;
            let entry = domain.resolve(&main, None)?;

            let outcome = domain.load(main.as_str()).await;
            match domain.module(&entry) {
                Some(module) => print_tree(&module, "", true, &mut HashSet::new()),
                None => println!("{}", entry.red()),
            }

            println!();
            println!(
                "{} modules, {} failed",
                domain.registry().len().yellow(),
                domain
                    .modules()
                    .iter()
                    .filter(|module| module.status() == Status::Error)
                    .count()
                    .red()
            );

            match outcome {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red().bold(), e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

/// Print a module and its dependencies as a tree
fn print_tree(module: &Arc<Module>, prefix: &str, last: bool, seen: &mut HashSet<String>) {
    let branch = if prefix.is_empty() {
        ""
    } else if last {
        "└── "
    } else {
        "├── "
    };
    let status = module.status();
    let label = match status {
        Status::Error => format!("{} [{}]", module.url().red(), status.red()),
        _ => format!("{} [{}]", module.url().green(), status.dimmed()),
    };

    if !seen.insert(module.url().to_string()) {
        println!("{}{}{} {}", prefix, branch, label, "(seen)".dimmed());
        return;
    }
    println!("{}{}{}", prefix, branch, label);

    let child_prefix = if prefix.is_empty() {
        " ".to_string()
    } else if last {
        format!("{}    ", prefix)
    } else {
        format!("{}│   ", prefix)
    };
    let dependencies = module.dependencies();
    let count = dependencies.len();
    for (i, dependency) in dependencies.iter().enumerate() {
        print_tree(dependency, &child_prefix, i + 1 == count, seen);
    }
}
