//! amdp - model learning and robust value iteration for active-measurement MDPs
//!
//! Commands:
//! - `learn`: sample a table-driven environment into a learned model
//! - `solve`: learn a model, then compute its ICVaR values
//! - `check`: resolve and validate the solver configuration
//! - `version`

use amdp_config::{resolve_config, validate_config, SolverConfig, CONFIG_SCHEMA_VERSION};
use amdp_core::exit_codes::ExitCode;
use amdp_core::learner::{LearnerError, ModelLearner};
use amdp_core::logging::{
    event_names, generate_run_id, init_logging, LogConfig, LogContext, LogFormat, Stage,
};
use amdp_core::log_event;
use amdp_core::model::{ExplicitModel, ModelError, RobustModel};
use amdp_core::output::OutputFormat;
use amdp_core::solver::{IcvarError, IcvarSolver};
use amdp_core::TabularEnv;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Learn and solve active-measurement MDPs
#[derive(Parser)]
#[command(name = "amdp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Solver configuration file (JSON or TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "json")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Seed for every random draw (overrides the configuration)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Log format on stderr: human or jsonl
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn a model by sampling an explicit environment
    Learn(LearnArgs),
    /// Learn a model and compute robust (ICVaR) values
    Solve(SolveArgs),
    /// Validate the resolved configuration
    Check,
    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct LearnArgs {
    /// Environment model file (P, R, StateSize, ActionSize, MeasureCost, s_init)
    #[arg(long)]
    env: PathBuf,

    /// Number of sampled episodes
    #[arg(long)]
    episodes: Option<usize>,

    /// Step cap per episode
    #[arg(long)]
    max_steps: Option<usize>,

    /// Write the learned model here
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SolveArgs {
    /// Environment model file
    #[arg(long)]
    env: PathBuf,

    /// Number of model-learning episodes
    #[arg(long)]
    episodes: Option<usize>,

    /// Number of value-iteration sweeps
    #[arg(long)]
    updates: Option<usize>,

    /// Perturbation budget in (0, 1]
    #[arg(long)]
    alpha: Option<f64>,

    /// Write the robust model here
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    init_logging(&LogConfig::from_env(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.log_format,
    ));

    let ctx = LogContext::new(generate_run_id());
    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_STARTED,
        Stage::Init,
        "amdp started",
        version = env!("CARGO_PKG_VERSION")
    );

    let exit_code = match &cli.command {
        Commands::Learn(args) => run_learn(&cli.global, &ctx, args),
        Commands::Solve(args) => run_solve(&cli.global, &ctx, args),
        Commands::Check => run_check(&cli.global, &ctx),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    log_event!(
        ctx,
        DEBUG,
        event_names::RUN_FINISHED,
        Stage::Init,
        "amdp finished",
        exit_code = exit_code.as_i32()
    );
    std::process::exit(exit_code.as_i32());
}

/// A failed command: exit code plus message.
struct Failure {
    code: ExitCode,
    message: String,
}

impl Failure {
    fn new(code: ExitCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ModelError> for Failure {
    fn from(err: ModelError) -> Self {
        let code = match err {
            ModelError::Io { .. } => ExitCode::IoError,
            _ => ExitCode::ModelError,
        };
        Failure::new(code, err.to_string())
    }
}

impl From<LearnerError> for Failure {
    fn from(err: LearnerError) -> Self {
        let code = match err {
            LearnerError::DegenerateRow { .. } => ExitCode::InternalError,
            _ => ExitCode::ModelError,
        };
        Failure::new(code, err.to_string())
    }
}

impl From<IcvarError> for Failure {
    fn from(err: IcvarError) -> Self {
        match err {
            IcvarError::Learner(inner) => inner.into(),
            IcvarError::InvalidBudget { .. }
            | IcvarError::InvalidEpsilon { .. }
            | IcvarError::InvalidDiscount { .. } => {
                Failure::new(ExitCode::ConfigError, err.to_string())
            }
            IcvarError::ShapeMismatch { .. } | IcvarError::RowMass { .. } => {
                Failure::new(ExitCode::ModelError, err.to_string())
            }
            IcvarError::Redistribution { .. } => {
                Failure::new(ExitCode::InternalError, err.to_string())
            }
        }
    }
}

/// Log and print a failure. Argument and configuration errors belong to
/// startup whichever command hit them; the rest carry the command's stage.
fn report_failure(
    global: &GlobalOpts,
    ctx: &LogContext,
    stage: Stage,
    failure: Failure,
) -> ExitCode {
    let message = failure.message.as_str();
    let exit_code = failure.code.as_i32();
    match failure.code {
        ExitCode::ArgsError => {
            log_event!(
                ctx,
                ERROR,
                event_names::ARGS_ERROR,
                Stage::Init,
                message,
                exit_code = exit_code
            )
        }
        ExitCode::ConfigError => {
            log_event!(
                ctx,
                ERROR,
                event_names::CONFIG_ERROR,
                Stage::Init,
                message,
                exit_code = exit_code
            )
        }
        ExitCode::ModelError => {
            log_event!(
                ctx,
                ERROR,
                event_names::MODEL_ERROR,
                stage,
                message,
                exit_code = exit_code
            )
        }
        ExitCode::IoError => {
            log_event!(
                ctx,
                ERROR,
                event_names::IO_ERROR,
                stage,
                message,
                exit_code = exit_code
            )
        }
        ExitCode::Clean | ExitCode::InternalError => {
            log_event!(
                ctx,
                ERROR,
                event_names::INTERNAL_ERROR,
                stage,
                message,
                exit_code = exit_code
            )
        }
    }
    match global.format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "status": "error",
                "code": failure.code.code_name(),
                "exit_code": failure.code.as_i32(),
                "message": failure.message,
            });
            print_json(&output);
        }
        OutputFormat::Summary => eprintln!("error: {}", failure.message),
        OutputFormat::Exitcode => {}
    }
    failure.code
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

/// Resolve, load and validate the configuration, then apply the global seed.
fn load_config(global: &GlobalOpts, ctx: &LogContext) -> Result<SolverConfig, Failure> {
    if let Some(path) = &global.config {
        if !path.exists() {
            return Err(Failure::new(
                ExitCode::ConfigError,
                format!("config file not found: {}", path.display()),
            ));
        }
    }

    let resolved = resolve_config(global.config.as_deref());
    let config = match &resolved.path {
        Some(path) => {
            let config = SolverConfig::load(path)
                .map_err(|e| Failure::new(ExitCode::ConfigError, e.to_string()))?;
            log_event!(
                ctx,
                INFO,
                event_names::CONFIG_LOADED,
                Stage::Init,
                "Configuration loaded",
                path = path.display().to_string().as_str(),
                source = resolved.source.to_string().as_str()
            );
            config
        }
        None => {
            log_event!(
                ctx,
                DEBUG,
                event_names::CONFIG_DEFAULT_USED,
                Stage::Init,
                "Using built-in configuration"
            );
            SolverConfig::default()
        }
    };
    Ok(config.with_seed(global.seed))
}

fn load_environment(
    path: &Path,
    seed: Option<u64>,
    ctx: &LogContext,
) -> Result<TabularEnv, Failure> {
    let model = ExplicitModel::import(path)?;
    log_event!(
        ctx,
        INFO,
        event_names::MODEL_LOADED,
        Stage::Init,
        "Environment model loaded",
        states = model.state_size,
        actions = model.action_size
    );
    TabularEnv::from_model(&model, seed)
        .map_err(|e| Failure::new(ExitCode::ModelError, e.to_string()))
}

fn run_learn(global: &GlobalOpts, ctx: &LogContext, args: &LearnArgs) -> ExitCode {
    match learn(global, ctx, args) {
        Ok(()) => ExitCode::Clean,
        Err(failure) => report_failure(global, ctx, Stage::Learn, failure),
    }
}

fn learn(global: &GlobalOpts, ctx: &LogContext, args: &LearnArgs) -> Result<(), Failure> {
    let mut config = load_config(global, ctx)?;
    if let Some(episodes) = args.episodes {
        config.learner.episodes = episodes;
    }
    if let Some(max_steps) = args.max_steps {
        config.learner.max_steps = max_steps;
    }
    validate_config(&config).map_err(|e| Failure::new(ExitCode::ArgsError, e.to_string()))?;

    let env = load_environment(&args.env, config.seed, ctx)?;
    let mut learner = ModelLearner::new(env, config.learner.clone())?;
    let report = learner.learn()?;
    let snapshot = learner.snapshot();
    let model = ExplicitModel::from_learned(
        &snapshot,
        config.icvar.action_block,
        config.icvar.use_biased_rewards,
    );

    if let Some(path) = &args.output {
        model.export(path)?;
    }

    let dims = learner.dims();
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "command": "learn",
            "status": "ok",
            "run_id": ctx.run_id,
            "episodes": report.episodes(),
            "total_steps": report.total_steps(),
            "mean_reward": report.mean_reward(),
            "state_size": dims.state_size,
            "action_size": dims.action_size(),
            "action_block": config.icvar.action_block.to_string(),
            "output": args.output.as_ref().map(|p| p.display().to_string()),
            "model": model,
        })),
        OutputFormat::Summary => println!(
            "learned {} states x {} actions from {} episodes (mean reward {:.4})",
            dims.state_size,
            dims.action_size(),
            report.episodes(),
            report.mean_reward()
        ),
        OutputFormat::Exitcode => {}
    }
    Ok(())
}

fn run_solve(global: &GlobalOpts, ctx: &LogContext, args: &SolveArgs) -> ExitCode {
    match solve(global, ctx, args) {
        Ok(()) => ExitCode::Clean,
        Err(failure) => report_failure(global, ctx, Stage::Solve, failure),
    }
}

fn solve(global: &GlobalOpts, ctx: &LogContext, args: &SolveArgs) -> Result<(), Failure> {
    let mut config = load_config(global, ctx)?;
    if let Some(episodes) = args.episodes {
        config.learner.episodes = episodes;
    }
    if let Some(updates) = args.updates {
        config.icvar.updates = updates;
    }
    if let Some(alpha) = args.alpha {
        config.icvar.perturbation_budget = alpha;
    }
    validate_config(&config).map_err(|e| Failure::new(ExitCode::ArgsError, e.to_string()))?;

    let env = load_environment(&args.env, config.seed, ctx)?;
    let (mut solver, sampling) = IcvarSolver::learn_model(env, &config, config.learner.episodes)?;
    let report = solver.solve(config.icvar.updates)?;

    let robust = RobustModel::from_solver(&solver);
    if let Some(path) = &args.output {
        robust.export(path)?;
    }

    let dims = solver.dims();
    let s_init = dims.initial_state;
    let policy: Vec<usize> = solver
        .icvar()
        .outer_iter()
        .map(|row| amdp_math::argmax(row.iter()).unwrap_or(0))
        .collect();
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "command": "solve",
            "status": "ok",
            "run_id": ctx.run_id,
            "alpha": config.icvar.perturbation_budget,
            "episodes": sampling.episodes(),
            "sweeps": report.sweeps,
            "final_residual": report.final_residual,
            "initial_state": s_init,
            "icvar_initial": solver.icvar_max()[s_init],
            "q_initial": solver.q_max()[s_init],
            "icvar_max": solver.icvar_max().to_vec(),
            "q_max": solver.q_max().to_vec(),
            "policy": policy,
            "output": args.output.as_ref().map(|p| p.display().to_string()),
        })),
        OutputFormat::Summary => println!(
            "ICVaR(s{}) = {:.4}, Q(s{}) = {:.4} after {} sweeps (alpha {}, residual {:.2e})",
            s_init,
            solver.icvar_max()[s_init],
            s_init,
            solver.q_max()[s_init],
            report.sweeps,
            config.icvar.perturbation_budget,
            report.final_residual
        ),
        OutputFormat::Exitcode => {}
    }
    Ok(())
}

fn run_check(global: &GlobalOpts, ctx: &LogContext) -> ExitCode {
    let resolved = resolve_config(global.config.as_deref());
    match load_config(global, ctx) {
        Ok(config) => {
            match global.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "check": "config",
                    "status": "ok",
                    "source": resolved.source.to_string(),
                    "path": resolved.path.as_ref().map(|p| p.display().to_string()),
                    "using_defaults": resolved.path.is_none(),
                    "config": config,
                })),
                OutputFormat::Summary => println!(
                    "config ok ({}{})",
                    resolved.source,
                    resolved
                        .path
                        .as_ref()
                        .map(|p| format!(": {}", p.display()))
                        .unwrap_or_default()
                ),
                OutputFormat::Exitcode => {}
            }
            ExitCode::Clean
        }
        Err(failure) => report_failure(global, ctx, Stage::Init, failure),
    }
}

fn print_version(global: &GlobalOpts) {
    let version_info = serde_json::json!({
        "amdp_version": env!("CARGO_PKG_VERSION"),
        "config_schema_version": CONFIG_SCHEMA_VERSION,
        "rust_version": env!("CARGO_PKG_RUST_VERSION"),
    });

    match global.format {
        OutputFormat::Json => print_json(&version_info),
        OutputFormat::Exitcode => {}
        OutputFormat::Summary => {
            println!("amdp {}", env!("CARGO_PKG_VERSION"));
            println!("config schema version: {}", CONFIG_SCHEMA_VERSION);
        }
    }
}
