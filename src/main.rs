use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;

use lumi_orchestra::driver::fake::FakeDriver;
use lumi_orchestra::driver::hierarchy::parse_uiautomator_xml;
use lumi_orchestra::driver::Driver;
use lumi_orchestra::parser::{parse_flow_file, FlowCommand};
use lumi_orchestra::{runner, OrchestraConfig};

#[derive(Parser)]
#[command(name = "lumi-orchestra")]
#[command(author = "NL Team")]
#[command(version = "0.1.0")]
#[command(about = "Flow execution engine for UI automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a flow file and print its command tree
    Check {
        /// Path to the flow YAML file
        path: PathBuf,
    },

    /// Dry-run a flow against a recorded screen
    Run {
        /// Path to the flow YAML file
        path: PathBuf,

        /// UIAutomator XML dump served as the screen
        #[arg(long)]
        hierarchy: Option<PathBuf>,

        /// App id treated as installed. Can be specified multiple times.
        #[arg(short, long)]
        app: Vec<String>,

        /// Engine configuration file (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Continue on failure
        #[arg(long, default_value = "false")]
        continue_on_failure: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { path } => {
            let flow = parse_flow_file(&path)?;
            println!("{} {}", "✓".green().bold(), path.display());
            print_tree(&flow, 1);
        }

        Commands::Run {
            path,
            hierarchy,
            app,
            config,
            continue_on_failure,
        } => {
            let config = match config {
                Some(file) => OrchestraConfig::load(&file)?,
                None => OrchestraConfig::default(),
            };

            let driver = FakeDriver::new();
            for app_id in &app {
                driver.add_installed_app(app_id);
            }
            if let Some(file) = hierarchy {
                let xml = std::fs::read_to_string(&file)?;
                driver.set_hierarchy(parse_uiautomator_xml(&xml)?);
            }
            driver.open().await?;

            let (success, summary) =
                runner::run_flow_file(Box::new(driver), &path, config, continue_on_failure).await?;

            println!();
            println!(
                "  {} commands: {} completed, {} failed, {} skipped",
                summary.total_commands,
                summary.completed.to_string().green(),
                summary.failed.to_string().red(),
                summary.skipped.to_string().yellow()
            );
            if let Some(ms) = summary.total_duration_ms {
                println!("  Duration: {}ms", ms);
            }

            if !success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn print_tree(commands: &[FlowCommand], depth: usize) {
    for cmd in commands {
        println!(
            "{}{} {}",
            "  ".repeat(depth),
            format!("{}", cmd.id).dimmed(),
            cmd.command.description()
        );
        print_tree(cmd.command.sub_commands(), depth + 1);
    }
}
