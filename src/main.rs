//! strataplan - Automatic storage layout planner
//!
//! Computes the final storage topology of an unattended install from a
//! profile, without touching any disk.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strataplan::config::Profile;
use strataplan::proposal::AutoinstDevicesCreator;
use strataplan::report::{print_plan_summary, PlanReport};

#[derive(Parser)]
#[command(name = "strataplan")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the storage layout described by a profile
    Plan {
        /// Path to profile file
        #[arg(short, long, env = "STRATAPLAN_PROFILE")]
        profile: String,

        /// Print the resulting topology as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a profile
    Validate {
        /// Path to profile file
        profile: String,
    },

    /// Generate a sample profile
    GenerateProfile {
        /// Output path for profile file
        #[arg(short, long, default_value = "strataplan.toml")]
        output: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // Logs go to stderr so JSON output stays parseable
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Plan { profile, json } => cmd_plan(&profile, json)?,
        Commands::Validate { profile } => cmd_validate(&profile)?,
        Commands::GenerateProfile { output } => cmd_generate_profile(&output)?,
    }

    Ok(())
}

fn cmd_plan(profile_path: &str, json: bool) -> Result<()> {
    info!("Loading profile from {}", profile_path);
    let profile = Profile::from_file(profile_path)?;
    profile.validate()?;

    let graph = profile.to_devicegraph()?;
    let catalog = profile.to_catalog()?;

    let creator = AutoinstDevicesCreator::new(graph);
    let plan = creator.populated_devicegraph(&catalog, &profile.disks)?;

    if json {
        println!("{}", PlanReport::new(&plan).to_json()?);
    } else {
        print_plan_summary(&plan);
    }

    Ok(())
}

fn cmd_validate(profile_path: &str) -> Result<()> {
    let profile = Profile::from_file(profile_path)?;
    profile.validate()?;
    println!("✓ Profile is valid");
    Ok(())
}

fn cmd_generate_profile(output: &str) -> Result<()> {
    let content = Profile::sample().to_toml()?;
    std::fs::write(output, content)?;
    println!("✓ Sample profile written to {}", output);
    Ok(())
}
