//! dspfit command line
//!
//! Build Faust DSP classes and fit their parameters against reference data.
//!
//! # Usage
//!
//! ```bash
//! # Build every class, plotting their behaviour
//! dspfit build --plot-dir plots/build
//!
//! # Run a fit job from dspfit.yaml
//! dspfit fit triode_plate
//!
//! # Same, with a fixed seed and a JSON report, keeping the defaults files
//! dspfit fit triode_plate --seed 7 --no-update --report reports/triode_plate.json
//!
//! # Level-compensation curves for the amp
//! dspfit calibrate
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use dspfit_faust::{
    config::ProjectConfig,
    project,
    runner::{RunOptions, Runner},
    toolchain::{CxxCompiler, Faust2Hpp},
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dspfit")]
#[command(about = "Build Faust DSP classes and fit them against reference data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to project config YAML
    #[arg(short, long, default_value = "dspfit.yaml", global = true)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean, merge parameter files and build every configured class
    Build {
        /// Plot each class's behaviour into this directory
        #[arg(long)]
        plot_dir: Option<PathBuf>,
    },

    /// Print level-compensation curves from the calibrate section
    Calibrate,

    /// Run a fit job
    Fit {
        /// Job name from the config
        job: String,

        /// Output JSON report path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Leave the defaults file untouched
        #[arg(long)]
        no_update: bool,

        /// Seed for the stage perturbations
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List configured classes and fit jobs
    List,

    /// Generate default project config and directories
    Init,

    /// Check that faust2hpp and the C++ compiler run
    CheckToolchain,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match &cli.command {
        Commands::Build { plot_dir } => build(&cli, plot_dir.as_deref()),
        Commands::Calibrate => calibrate(&cli),
        Commands::Fit {
            job,
            report,
            no_update,
            seed,
        } => fit(&cli, job, report.as_deref(), *no_update, *seed),
        Commands::List => list(&cli),
        Commands::Init => init_config(&cli),
        Commands::CheckToolchain => check_toolchain(&cli),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ProjectConfig> {
    if cli.config.exists() {
        Ok(ProjectConfig::load(&cli.config)?)
    } else {
        println!("  {} Config not found, using defaults", "⚠".yellow());
        Ok(ProjectConfig::default_config())
    }
}

fn build(cli: &Cli, plot_dir: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    println!("{} Building {} classes...", "▶".blue(), config.build.classes.len());

    let built = project::build_all(&config, plot_dir)?;
    for class in &built {
        println!(
            "  {} {} ({} parameters) -> {}",
            "✓".green(),
            class.class_name.bold(),
            class.dsp.parameters().len(),
            class.dsp.path().display()
        );
        for plot in &class.plots {
            println!("      {}", plot.display().to_string().dimmed());
        }
    }
    Ok(())
}

fn calibrate(cli: &Cli) -> anyhow::Result<()> {
    let runner = Runner::new(load_config(cli)?);
    println!("{} Running calibration sweeps...", "▶".blue());

    for (parameter, curve) in runner.calibrate()? {
        println!("{}", parameter.bold());
        println!("{curve}");
    }
    Ok(())
}

fn fit(cli: &Cli, job: &str, report: Option<&Path>, no_update: bool, seed: Option<u64>) -> anyhow::Result<()> {
    let runner = Runner::new(load_config(cli)?).with_options(RunOptions { no_update, seed });
    println!("{} Running fit job {}...", "▶".blue(), job.bold());

    let result = runner.run_job(job)?;
    result.print_summary();

    if let Some(path) = report {
        result.save_json(path)?;
        println!("{} Report saved to: {}", "✓".green(), path.display());
    }
    Ok(())
}

fn list(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    println!("{}", "Classes".bold());
    println!("{}", "─".repeat(50));
    for class in &config.build.classes {
        println!("  • {}", class.green());
    }
    for group in &config.build.merge {
        println!("  • {} {}", group.target.green(), format!("= {}", group.sources.join(" + ")).dimmed());
    }

    println!("\n{}", "Fit jobs".bold());
    println!("{}", "─".repeat(50));
    for (name, job) in &config.fits {
        let methods: Vec<String> = job.methods.iter().map(ToString::to_string).collect();
        println!("  • {} - {}", name.blue().bold(), job.class_name);
        println!("    Records: {}", job.records.len());
        println!("    Methods: {}", methods.join(" → ").dimmed());
        if let Some(ref monitor) = job.monitor {
            println!("    Monitor: {}", monitor.yellow());
        }
    }

    if let Some(ref cal) = config.calibrate {
        println!("\n{}", "Calibration".bold());
        println!("{}", "─".repeat(50));
        println!("  • {} sweeps {}", cal.class_name.green(), cal.sweeps.join(", "));
    }

    Ok(())
}

fn init_config(cli: &Cli) -> anyhow::Result<()> {
    let config = ProjectConfig::default_config();
    config.save(&cli.config)?;
    println!("{} Created default config at: {}", "✓".green(), cli.config.display());

    let dirs = [
        &config.paths.dsp_dir,
        &config.paths.headers_dir,
        &config.paths.build_dir,
    ];
    for dir in dirs {
        std::fs::create_dir_all(dir)?;
    }

    println!("{} Created directories:", "✓".green());
    for dir in dirs {
        println!("  • {}", dir.display());
    }
    Ok(())
}

fn check_toolchain(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    println!("{} Checking toolchain...", "▶".blue());

    let faust = Faust2Hpp::new(config.toolchain.faust2hpp.clone());
    let cxx = CxxCompiler::new(config.toolchain.cxx.clone());

    let mut ok = true;
    for (name, result) in [(faust.program(), faust.check()), (cxx.program(), cxx.check())] {
        match result {
            Ok(version) => println!("{} {} found: {}", "✓".green(), name, version.dimmed()),
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                ok = false;
            }
        }
    }

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
