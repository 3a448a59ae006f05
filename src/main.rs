//! tri-install - Main entry point
//!
//! Thin front-end over the library: load plan and snapshots, run one stage,
//! report with ✓/✗ status lines.

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use std::fs;
use std::path::Path;

use tri_install::cli::{Cli, Commands, ENGINE_ENV, EngineArgs, PlanArgs};
use tri_install::engine::compiler::{ConfigText, compile};
use tri_install::engine::storage::{ValidatedPlan, validate_disk_selection};
use tri_install::hardware::{HardwareCatalog, bytes_to_human};
use tri_install::installer::{
    Artifact, InstallEvent, InstallerSupervisor, refind_archive_available,
};
use tri_install::logic::packages::{
    PackageCatalog, build_tree, default_user_shell, flatten_selection, selection_size_bytes,
    set_install_packages,
};
use tri_install::plan::InstallPlan;
use tri_install::process_guard;
use tri_install::types::{BootLoader, CompileMode};

/// Lines of the engine log shown by `artifacts` without `--full`
const LOG_TAIL_LINES: usize = 40;

/// Initialize the logger with appropriate settings
fn init_logger() {
    use env_logger::Builder;
    use std::io::Write;

    Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}:{}] {}",
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env() // Allows RUST_LOG env var to override
        .init();
}

fn main() -> Result<()> {
    init_logger();
    info!("tri-install starting up");

    // The engine keeps running if we are interrupted; we only detach
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    debug!("Signal handlers initialized");

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    match cli.command {
        Commands::Validate { input } => run_validate(&input),
        Commands::Summary { input, output } => run_summary(&input, output.as_deref()),
        Commands::Install { input, engine } => run_install(&input, &engine),
        Commands::Packages {
            catalog,
            select,
            plan,
        } => run_packages(&catalog, &select, plan.as_deref()),
        Commands::Artifacts { engine, full } => run_artifacts(&engine, full),
    }
}

/// Load plan and hardware snapshot, then validate; exits on violations
fn load_and_validate(input: &PlanArgs) -> Result<ValidatedPlan> {
    let plan = InstallPlan::load_from_file(&input.plan)?;
    let catalog = HardwareCatalog::load_from_file(&input.hardware)?;

    match validate_disk_selection(&plan, &catalog) {
        Ok(validated) => Ok(validated),
        Err(e) => {
            error!("Plan validation failed: {} violation(s)", e.violations().len());
            eprintln!("✗ Install plan does not fit this system:");
            for violation in e.violations() {
                eprintln!("  - {}", violation);
            }
            std::process::exit(1);
        }
    }
}

fn compile_or_exit(validated: &ValidatedPlan, mode: CompileMode) -> ConfigText {
    match compile(validated, mode) {
        Ok(text) => text,
        Err(e) => {
            error!("Compilation failed: {}", e);
            eprintln!("✗ Install plan is incomplete: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_validate(input: &PlanArgs) -> Result<()> {
    info!("Validating install plan: {:?}", input.plan);
    let validated = load_and_validate(input)?;
    // Catch compile errors too, so `validate` means "ready to install"
    compile_or_exit(&validated, CompileMode::Summary);

    println!("✓ Install plan is valid for this system");
    println!("{}", validated.summary());
    Ok(())
}

fn run_summary(input: &PlanArgs, output: Option<&Path>) -> Result<()> {
    let validated = load_and_validate(input)?;
    let summary = compile_or_exit(&validated, CompileMode::Summary);

    match output {
        Some(path) => {
            fs::write(path, summary.as_str())
                .with_context(|| format!("Failed to write summary to {:?}", path))?;
            println!("✓ Summary written to {:?}", path);
        }
        None => print!("{}", summary),
    }
    Ok(())
}

fn run_install(input: &PlanArgs, engine: &EngineArgs) -> Result<()> {
    let validated = load_and_validate(input)?;
    let config = compile_or_exit(&validated, CompileMode::Full);
    let summary = compile_or_exit(&validated, CompileMode::Summary);
    debug!("Engine configuration:\n{}", summary);

    if validated.plan().boot_loader() == BootLoader::Refind && !refind_archive_available() {
        warn!("rEFInd selected but its archive is missing from the install media");
    }

    let command = engine.to_engine_command(std::env::var(ENGINE_ENV).ok());
    info!("Engine: {:?} {:?}", command.program, command.args);
    let supervisor = InstallerSupervisor::new(command);
    let observer = supervisor.subscribe();

    supervisor
        .start(&config)
        .context("Failed to start installation")?;

    for event in observer {
        match event {
            InstallEvent::Output(line) => println!("{}", line),
            InstallEvent::Finished { success, exit_code } => {
                debug!("Engine finished: success={} exit_code={:?}", success, exit_code);
            }
        }
    }

    match supervisor.wait() {
        Ok(()) => {
            println!("✓ Installation completed successfully");
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            if let Some(log) = supervisor.install_log().content() {
                eprintln!("--- engine log (last {} lines) ---", LOG_TAIL_LINES);
                eprintln!("{}", tail(log, LOG_TAIL_LINES));
            }
            std::process::exit(1);
        }
    }
}

fn run_packages(catalog_path: &Path, select: &[String], plan_path: Option<&Path>) -> Result<()> {
    let catalog = PackageCatalog::load_from_file(catalog_path)?;
    let mut tree = build_tree(&catalog)?;

    for item in select {
        let id = tree.find_path(item).or_else(|| tree.find(item));
        match id {
            Some(id) => tree.select(id),
            None => bail!("Unknown package or category: {}", item),
        }
    }

    let packages = flatten_selection(&tree);
    println!("{}", packages.join(" "));
    println!(
        "✓ {} package(s), {} installed size, default shells {}",
        packages.len(),
        bytes_to_human(selection_size_bytes(&tree)),
        default_user_shell(&tree).join(", ")
    );

    if let Some(path) = plan_path {
        let mut plan = InstallPlan::load_from_file(path)?;
        set_install_packages(&mut plan, &tree);
        plan.save_to_file(path)?;
        println!("✓ Install list stored in {:?}", path);
    }
    Ok(())
}

fn run_artifacts(engine: &EngineArgs, full: bool) -> Result<()> {
    let command = engine.to_engine_command(std::env::var(ENGINE_ENV).ok());
    let supervisor = InstallerSupervisor::new(command);

    let mut missing = false;
    for (label, artifact) in [
        ("Engine log", supervisor.install_log()),
        ("Engine config", supervisor.install_config()),
    ] {
        match artifact {
            Artifact::Available(content) => {
                println!("✓ {}:", label);
                println!("{}", if full { content.as_str() } else { tail(&content, LOG_TAIL_LINES) });
            }
            Artifact::Partial { content, reason } => {
                println!("⚠ {} ({}):", label, reason);
                println!("{}", if full { content.as_str() } else { tail(&content, LOG_TAIL_LINES) });
            }
            Artifact::Unavailable(reason) => {
                eprintln!("✗ {} unavailable: {}", label, reason);
                missing = true;
            }
        }
    }

    if missing {
        std::process::exit(1);
    }
    Ok(())
}

/// Last `n` lines of `text`
fn tail(text: &str, n: usize) -> &str {
    let trimmed = text.trim_end_matches('\n');
    match trimmed.rmatch_indices('\n').nth(n.saturating_sub(1)) {
        Some((idx, _)) if n > 0 => &trimmed[idx + 1..],
        _ => trimmed,
    }
}
