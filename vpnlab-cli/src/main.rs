mod display;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::{debug, info, warn};

use vpnlab_core::differ::{create_plan, destroy_plan};
use vpnlab_core::graph::DependencyGraph;
use vpnlab_core::interpreter::{ApplyResult, EffectOutcome, Interpreter};
use vpnlab_core::parser::{self, ParsedFile};
use vpnlab_core::patch::patch_tunnel_startup;
use vpnlab_core::plan::Plan;
use vpnlab_core::provider::Provider;
use vpnlab_core::resource::{Bindings, ResourceId, State};
use vpnlab_core::schema::ResourceSchema;
use vpnlab_core::validation::{self, Diagnostic};
use vpnlab_provider_aws::AwsProvider;
use vpnlab_provider_aws::validation::{normalize, validate_topology};
use vpnlab_state::{
    BackendConfig, LocalBackend, ResourceState, StateBackend, StateFile, create_backend,
};

use display::{print_diagnostics, print_diff, print_outputs, print_plan};

#[derive(Parser)]
#[command(name = "vpnlab")]
#[command(about = "Provision and tear down an AWS site-to-site VPN lab", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the declaration without calling AWS
    Validate {
        /// Path to .tf file
        #[arg(default_value = "main.tf")]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        /// Path to .tf file
        #[arg(default_value = "main.tf")]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to .tf file
        #[arg(default_value = "main.tf")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Destroy every resource recorded in the state
    Destroy {
        /// Path to .tf file
        #[arg(default_value = "main.tf")]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Print declared outputs using the recorded state
    Output {
        /// Path to .tf file
        #[arg(default_value = "main.tf")]
        file: PathBuf,
    },
    /// Make VPN connections start both tunnels from the AWS side
    Patch {
        /// Path to .tf file
        file: PathBuf,

        /// Print the diff without writing
        #[arg(long)]
        dry_run: bool,

        /// Keep a timestamped copy of the original file
        #[arg(long)]
        backup: bool,

        /// Also rewrite startup actions set to something other than "start"
        #[arg(long)]
        enforce_start: bool,
    },
    /// Remove a stale state lock
    ForceUnlock {
        /// ID of the lock to remove
        lock_id: String,

        /// Path to .tf file
        #[arg(default_value = "main.tf")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply { file, auto_approve } => run_apply(&file, auto_approve).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Output { file } => run_output(&file).await,
        Commands::Patch {
            file,
            dry_run,
            backup,
            enforce_start,
        } => run_patch(&file, dry_run, backup, enforce_start),
        Commands::ForceUnlock { lock_id, file } => run_force_unlock(&lock_id, &file).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// RUST_LOG wins over -v
fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    let mut all_schemas = HashMap::new();
    for schema in vpnlab_provider_aws::schemas::all_schemas() {
        all_schemas.insert(schema.resource_type.clone(), schema);
    }
    all_schemas
}

/// Parsed declaration with provider-side normalization and schema defaults applied
struct Loaded {
    parsed: ParsedFile,
    schemas: HashMap<String, ResourceSchema>,
    base_dir: PathBuf,
}

fn load(file: &Path) -> Result<Loaded, String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;

    let mut parsed = parser::parse(&content).map_err(|e| format!("Parse error: {}", e))?;
    let schemas = get_schemas();

    for resource in &mut parsed.resources {
        normalize(resource);
        if let Some(schema) = schemas.get(&resource.id.resource_type) {
            schema.apply_defaults(&mut resource.attributes);
        }
    }
    debug!(
        "loaded {} resources from {}",
        parsed.resources.len(),
        file.display()
    );

    let base_dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    Ok(Loaded {
        parsed,
        schemas,
        base_dir,
    })
}

/// All static checks; warnings are printed, errors fail the command
fn check(loaded: &Loaded) -> Result<Vec<Diagnostic>, String> {
    let mut diagnostics = validation::validate(&loaded.parsed, &loaded.schemas);
    diagnostics.extend(validate_topology(&loaded.parsed));
    diagnostics.sort_by_key(|d| d.severity);

    print_diagnostics(&diagnostics);

    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        return Err(format!("{} validation error(s)", errors));
    }
    Ok(diagnostics)
}

fn run_validate(file: &Path) -> Result<(), String> {
    let loaded = load(file)?;

    println!("{}", "Validating...".cyan());
    let diagnostics = check(&loaded)?;

    println!(
        "{}",
        format!(
            "✓ {} resources validated successfully.",
            loaded.parsed.resources.len()
        )
        .green()
        .bold()
    );
    if !diagnostics.is_empty() {
        println!("  ({} warning(s))", diagnostics.len());
    }

    for resource in &loaded.parsed.resources {
        println!("  • {}", resource.id);
    }

    Ok(())
}

fn aws_region(parsed: &ParsedFile) -> Option<&str> {
    parsed
        .provider("aws")
        .and_then(|p| p.attributes.get("region"))
        .and_then(|v| v.as_str())
}

async fn get_provider(parsed: &ParsedFile) -> AwsProvider {
    let provider = AwsProvider::new(aws_region(parsed)).await;
    info!("using AWS region {}", provider.region());
    provider
}

/// Backend from the `terraform { backend }` block; local paths are relative to the declaration
fn backend_config(parsed: &ParsedFile, base_dir: &Path) -> BackendConfig {
    let config = parsed
        .backend
        .as_ref()
        .map(BackendConfig::from_declaration)
        .unwrap_or_default();
    if config.backend_type != "local" {
        return config;
    }

    let path = config
        .get_string("path")
        .unwrap_or(LocalBackend::DEFAULT_STATE_FILE);
    BackendConfig::local(base_dir.join(path).to_string_lossy())
}

async fn get_backend(loaded: &Loaded) -> Result<Box<dyn StateBackend>, String> {
    let config = backend_config(&loaded.parsed, &loaded.base_dir);
    create_backend(&config).await.map_err(|e| e.to_string())
}

async fn read_state(backend: &dyn StateBackend) -> Result<StateFile, String> {
    let state = backend
        .read_state()
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?;
    Ok(state.unwrap_or_default())
}

/// Read every declared resource, by recorded identifier or by address tag
async fn read_current_states(
    provider: &impl Provider,
    loaded: &Loaded,
    state: &StateFile,
) -> Result<HashMap<ResourceId, State>, String> {
    let mut current = HashMap::new();
    for resource in &loaded.parsed.resources {
        let identifier = state.identifier_of(&resource.id);
        let read = provider
            .read(&resource.id, identifier)
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        if identifier.is_some() && !read.exists {
            warn!("{} is recorded in state but no longer exists", resource.id);
        }
        current.insert(resource.id.clone(), read);
    }
    Ok(current)
}

fn plan_changes(
    loaded: &Loaded,
    current: &HashMap<ResourceId, State>,
    state: &StateFile,
) -> Result<Plan, String> {
    let declared: Vec<ResourceId> = loaded
        .parsed
        .resources
        .iter()
        .map(|r| r.id.clone())
        .collect();
    let orphans = state.orphans(&declared);
    create_plan(&loaded.parsed.resources, current, &loaded.schemas, &orphans)
        .map_err(|e| e.to_string())
}

async fn run_plan(file: &Path) -> Result<(), String> {
    let loaded = load(file)?;
    check(&loaded)?;

    let backend = get_backend(&loaded).await?;
    let state = read_state(backend.as_ref()).await?;
    let provider = get_provider(&loaded.parsed).await;

    let current = read_current_states(&provider, &loaded, &state).await?;
    let plan = plan_changes(&loaded, &current, &state)?;
    print_plan(&plan);
    Ok(())
}

fn confirm(question: &str, warning: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!("  {}", warning.yellow());
    print!("\n  Enter a value: ");
    std::io::stdout().flush().map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();
    Ok(input.trim() == "yes")
}

async fn run_apply(file: &Path, auto_approve: bool) -> Result<(), String> {
    let loaded = load(file)?;
    check(&loaded)?;

    let backend = get_backend(&loaded).await?;
    let lock = backend
        .acquire_lock("apply")
        .await
        .map_err(|e| e.to_string())?;
    debug!("acquired lock {} on {}", lock.id, backend.location());

    let result = apply_locked(&loaded, backend.as_ref(), auto_approve).await;

    if let Err(e) = backend.release_lock(&lock).await {
        warn!("Failed to release lock {}: {}", lock.id, e);
    }
    result
}

async fn apply_locked(
    loaded: &Loaded,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state = read_state(backend).await?;
    let provider = get_provider(&loaded.parsed).await;

    let current = read_current_states(&provider, loaded, &state).await?;
    let plan = plan_changes(loaded, &current, &state)?;

    // Pick up resources found by tag or drifted since the last run
    let dependencies = dependency_map(loaded);
    for read in current.values().filter(|s| s.exists) {
        let deps = dependencies
            .get(&read.id.address())
            .cloned()
            .unwrap_or_default();
        state.upsert_resource(ResourceState::from_state(read, provider.name(), deps));
    }

    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        save_state(backend, &mut state).await?;
        print_outputs(&loaded.parsed, &state.bindings());
        return Ok(());
    }

    print_plan(&plan);
    println!();

    if !auto_approve
        && !confirm(
            "Do you want to perform these actions?",
            "Only 'yes' will be accepted to approve.",
        )?
    {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let bindings: Bindings = current
        .values()
        .filter(|s| s.exists)
        .map(|s| (s.id.address(), s.binding_attributes()))
        .collect();
    let provider_name = provider.name();
    let result = Interpreter::new(provider).apply(&plan, bindings).await;

    display::print_outcomes(&plan, &result);
    record_outcomes(&mut state, &result, provider_name, &dependencies);
    save_state(backend, &mut state).await?;

    println!();
    if result.is_success() {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", result.success_count)
                .green()
                .bold()
        );
        print_outputs(&loaded.parsed, &state.bindings());
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            result.success_count, result.failure_count
        ))
    }
}

/// Addresses each declared resource depends on, deduplicated
fn dependency_map(loaded: &Loaded) -> HashMap<String, Vec<String>> {
    let graph = DependencyGraph::from_resources(&loaded.parsed.resources);
    graph
        .nodes()
        .iter()
        .map(|address| {
            let mut deps: Vec<String> = graph
                .dependencies_of(address)
                .iter()
                .map(|d| d.target.clone())
                .collect();
            deps.sort();
            deps.dedup();
            (address.clone(), deps)
        })
        .collect()
}

/// Fold successful effects into the state file
fn record_outcomes(
    state: &mut StateFile,
    result: &ApplyResult,
    provider_name: &str,
    dependencies: &HashMap<String, Vec<String>>,
) {
    for outcome in result.outcomes.iter().flatten() {
        match outcome {
            EffectOutcome::Created { state: read } | EffectOutcome::Updated { state: read } => {
                let deps = dependencies
                    .get(&read.id.address())
                    .cloned()
                    .unwrap_or_default();
                state.upsert_resource(ResourceState::from_state(read, provider_name, deps));
            }
            EffectOutcome::Deleted { id } => {
                state.remove_resource(&id.resource_type, &id.name);
            }
            EffectOutcome::Skipped { .. } => {}
        }
    }
}

async fn save_state(backend: &dyn StateBackend, state: &mut StateFile) -> Result<(), String> {
    state.increment_serial();
    backend
        .write_state(state)
        .await
        .map_err(|e| format!("Failed to write state: {}", e))?;
    info!("wrote state serial {} to {}", state.serial, backend.location());
    Ok(())
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let loaded = load(file)?;

    let backend = get_backend(&loaded).await?;
    let lock = backend
        .acquire_lock("destroy")
        .await
        .map_err(|e| e.to_string())?;

    let result = destroy_locked(&loaded, backend.as_ref(), auto_approve).await;

    if let Err(e) = backend.release_lock(&lock).await {
        warn!("Failed to release lock {}: {}", lock.id, e);
    }
    result
}

async fn destroy_locked(
    loaded: &Loaded,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let mut state = read_state(backend).await?;
    let tracked = state.tracked();

    if tracked.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    let plan = destroy_plan(&tracked).map_err(|e| e.to_string())?;

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for effect in plan.effects() {
        println!("  {} {}", "-".red().bold(), effect.resource_id());
    }
    println!();
    println!(
        "Plan: {} to destroy.",
        plan.effects().len().to_string().red()
    );
    println!();

    if !auto_approve
        && !confirm(
            "Do you really want to destroy all resources?",
            "This action cannot be undone. Type 'yes' to confirm.",
        )?
    {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let provider = get_provider(&loaded.parsed).await;
    let provider_name = provider.name();
    let result = Interpreter::new(provider)
        .apply(&plan, state.bindings())
        .await;

    display::print_outcomes(&plan, &result);
    record_outcomes(&mut state, &result, provider_name, &HashMap::new());
    save_state(backend, &mut state).await?;

    println!();
    if result.is_success() {
        println!(
            "{}",
            format!(
                "Destroy complete! {} resources destroyed.",
                result.success_count
            )
            .green()
            .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            result.success_count, result.failure_count
        ))
    }
}

async fn run_output(file: &Path) -> Result<(), String> {
    let loaded = load(file)?;
    let backend = get_backend(&loaded).await?;
    let state = read_state(backend.as_ref()).await?;

    if loaded.parsed.outputs.is_empty() {
        println!("{}", "No outputs declared.".yellow());
        return Ok(());
    }
    print_outputs(&loaded.parsed, &state.bindings());
    Ok(())
}

/// `<file>.<YYYYmmdd-HHMMSS>.bak`
fn backup_path(file: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(format!(".{}.bak", now.format("%Y%m%d-%H%M%S")));
    PathBuf::from(name)
}

fn run_patch(file: &Path, dry_run: bool, backup: bool, enforce_start: bool) -> Result<(), String> {
    let content = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;

    let report = patch_tunnel_startup(&content, enforce_start);
    for message in &report.messages {
        println!("  {}", message);
    }

    if !report.modified {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    if dry_run {
        print_diff(file, &content, &report.text);
        println!();
        println!("{}", "Dry run: file not written.".yellow());
        return Ok(());
    }

    if backup {
        let path = backup_path(file, chrono::Local::now());
        fs::write(&path, &content)
            .map_err(|e| format!("Failed to write backup {}: {}", path.display(), e))?;
        println!("Backup written to {}", path.display());
    }

    fs::write(file, &report.text)
        .map_err(|e| format!("Failed to write {}: {}", file.display(), e))?;
    println!(
        "{}",
        format!(
            "✓ Patched {} ({} VPN connection block(s)).",
            file.display(),
            report.blocks
        )
        .green()
        .bold()
    );
    Ok(())
}

async fn run_force_unlock(lock_id: &str, file: &Path) -> Result<(), String> {
    let loaded = load(file)?;
    let backend = get_backend(&loaded).await?;

    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "{}",
        format!("Lock {} removed from {}.", lock_id, backend.location()).green()
    );
    Ok(())
}
