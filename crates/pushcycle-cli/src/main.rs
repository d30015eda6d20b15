//! pushcycle - trigger CI builds by cycling a short-lived git branch
//!
//! ## Commands
//!
//! - `run`: reconcile, commit the workspace to the trigger branch, push it,
//!   wait for the build to pick it up, then delete it from the remote
//! - `reconcile`: only remove a stale trigger branch, locally and remotely

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};

use pushcycle_core::metrics::METRICS;
use pushcycle_core::telemetry::{init_tracing, LogFormat};
use pushcycle_core::{
    BranchCycleOrchestrator, BranchName, CommitIdentity, CredentialInjection, CredentialSource,
    Credentials, CycleConfig, CycleReport, GitRepository, HttpStatusProbe, Interrupt,
    InterruptibleWaiter, ReconcileOutcome, WaitOutcome,
};

/// Timeout of a single confirmation request.
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "pushcycle")]
#[command(version = pushcycle_core::VERSION)]
#[command(about = "Trigger CI builds by pushing and removing an ephemeral git branch", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full trigger cycle
    Run(RunArgs),

    /// Delete a stale trigger branch without running a cycle
    Reconcile(TargetArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Trigger branch name
    #[arg(short, long)]
    branch: String,

    /// Repository working tree
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Remote to push to
    #[arg(long, env = "PUSHCYCLE_REMOTE", default_value = pushcycle_core::DEFAULT_REMOTE)]
    remote: String,

    #[command(flatten)]
    credentials: CredentialArgs,
}

#[derive(Args, Debug)]
struct CredentialArgs {
    /// Git username (falls back to $GIT_USERNAME)
    #[arg(long, requires = "git_token")]
    git_username: Option<String>,

    /// Git token or password (falls back to $GIT_PASSWORD)
    #[arg(long, requires = "git_username")]
    git_token: Option<String>,

    /// How credentials are handed to git
    #[arg(long, value_enum, default_value_t = CredentialMode::Userinfo)]
    credential_mode: CredentialMode,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CredentialMode {
    /// Embed `user:token` in the push URL
    Userinfo,
    /// Serve credentials through an inline credential helper
    Helper,
}

impl From<CredentialMode> for CredentialInjection {
    fn from(mode: CredentialMode) -> Self {
        match mode {
            CredentialMode::Userinfo => CredentialInjection::Userinfo,
            CredentialMode::Helper => CredentialInjection::Helper,
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Delete every .gitignore before staging so ignored files are committed
    #[arg(long)]
    purge_gitignore: bool,

    /// Trigger window in seconds (upper bound when --confirm-url is set)
    #[arg(long, env = "PUSHCYCLE_WAIT_SECS", default_value_t = 60)]
    wait_secs: u64,

    /// URL that answers 2xx once the build has been triggered
    #[arg(long, env = "PUSHCYCLE_CONFIRM_URL")]
    confirm_url: Option<String>,

    /// Seconds between confirmation requests
    #[arg(long, env = "PUSHCYCLE_POLL_SECS", default_value_t = 10)]
    poll_secs: u64,

    /// Author and committer name of the trigger commit
    #[arg(long, env = "PUSHCYCLE_IDENTITY_NAME", default_value = "Jenkins")]
    identity_name: String,

    /// Author and committer email of the trigger commit
    #[arg(long, env = "PUSHCYCLE_IDENTITY_EMAIL", default_value = "null")]
    identity_email: String,

    /// Print the cycle report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(LogFormat::from_json_flag(cli.json), level);

    let interrupt = Interrupt::new();
    let on_ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting");
            on_ctrl_c.raise();
        }
    });

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args, interrupt).await,
        Commands::Reconcile(args) => cmd_reconcile(args, interrupt).await,
    };
    METRICS.flush();
    result
}

fn credential_source(args: &CredentialArgs) -> Result<CredentialSource> {
    match (&args.git_username, &args.git_token) {
        (Some(user), Some(token)) => Ok(CredentialSource::Explicit(
            Credentials::new(user.as_str(), token.as_str())?,
        )),
        _ => Ok(CredentialSource::Environment),
    }
}

fn target_config(args: &TargetArgs) -> Result<CycleConfig> {
    let branch = BranchName::new(args.branch.as_str()).context("Invalid --branch")?;
    Ok(CycleConfig::new(branch)
        .with_remote(args.remote.as_str())
        .with_credentials(credential_source(&args.credentials)?)
        .with_injection(args.credentials.credential_mode.into()))
}

fn run_config(args: &RunArgs) -> Result<CycleConfig> {
    let config = target_config(&args.target)?
        .with_purge_gitignore(args.purge_gitignore)
        .with_identity(CommitIdentity::new(
            args.identity_name.as_str(),
            args.identity_email.as_str(),
        ))
        .with_trigger_wait(Duration::from_secs(args.wait_secs))
        .with_poll_interval(Duration::from_secs(args.poll_secs));
    config.validate()?;
    Ok(config)
}

/// Run a full trigger cycle
async fn cmd_run(args: RunArgs, interrupt: Interrupt) -> Result<()> {
    let config = run_config(&args)?;
    let workspace = args.target.workspace.clone();
    let confirm_url = args.confirm_url.clone();
    let branch = config.branch.clone();

    // The blocking HTTP client must be built and dropped off the async runtime.
    let report = tokio::task::spawn_blocking(move || -> Result<CycleReport> {
        let repo = GitRepository::open(&workspace)
            .with_context(|| format!("Failed to open repository at {}", workspace.display()))?;
        let waiter = InterruptibleWaiter::new(interrupt.clone());
        let mut orchestrator =
            BranchCycleOrchestrator::new(repo, waiter, config).with_interrupt(interrupt);
        if let Some(url) = confirm_url {
            let probe = HttpStatusProbe::new(url, PROBE_REQUEST_TIMEOUT)?;
            orchestrator = orchestrator.with_probe(Box::new(probe));
        }
        Ok(orchestrator.run()?)
    })
    .await
    .context("Cycle task failed")?
    .with_context(|| format!("Trigger cycle for branch {branch} failed"))?;

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(())
}

/// Reconcile only
async fn cmd_reconcile(args: TargetArgs, interrupt: Interrupt) -> Result<()> {
    let config = target_config(&args)?;
    config.validate()?;
    let workspace = args.workspace.clone();

    let outcome = tokio::task::spawn_blocking(move || -> Result<ReconcileOutcome> {
        let repo = GitRepository::open(&workspace)
            .with_context(|| format!("Failed to open repository at {}", workspace.display()))?;
        let waiter = InterruptibleWaiter::new(interrupt.clone());
        let orchestrator =
            BranchCycleOrchestrator::new(repo, waiter, config).with_interrupt(interrupt);
        let remote = orchestrator.resolve_remote()?;
        Ok(orchestrator.reconcile(&remote)?)
    })
    .await
    .context("Reconcile task failed")?
    .with_context(|| format!("Reconcile of branch {} failed", args.branch))?;

    info!(state = ?outcome.initial, "reconcile finished");
    print!("{}", render_reconcile(&args.branch, &outcome));
    Ok(())
}

fn render_reconcile(branch: &str, outcome: &ReconcileOutcome) -> String {
    format!(
        "Reconciled {branch}\n  Found:  {:?}\n  Local:  {:?}\n  Remote: {:?}\n",
        outcome.initial, outcome.local, outcome.remote
    )
}

fn render_report(report: &CycleReport) -> String {
    let wait = match &report.wait {
        WaitOutcome::Elapsed { waited_ms } => format!("waited {}s", waited_ms / 1000),
        WaitOutcome::Confirmed { after_ms, polls } => {
            format!("confirmed after {}s ({polls} polls)", after_ms / 1000)
        }
        WaitOutcome::Unconfirmed { waited_ms, polls } => {
            format!("NOT confirmed within {}s ({polls} polls)", waited_ms / 1000)
        }
    };
    let mut out = String::new();
    out.push_str(&format!("Cycle {} complete\n", report.cycle_id));
    out.push_str(&format!("  Branch:  {}\n", report.branch));
    out.push_str(&format!("  Commit:  {}\n", report.commit));
    out.push_str(&format!("  Remote:  {}\n", report.remote));
    if !report.purged_gitignores.is_empty() {
        out.push_str(&format!(
            "  Purged:  {} .gitignore file(s)\n",
            report.purged_gitignores.len()
        ));
    }
    out.push_str(&format!("  Trigger: {wait}\n"));
    out.push_str(&format!("  Cleanup: {:?}\n", report.cleanup));
    out.push_str(&format!("  Took:    {}ms\n", report.duration_ms()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushcycle_core::{BranchDeletion, BranchState};
    use std::path::Path;
    use std::process::Command;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn run_git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    #[test]
    fn test_run_args_build_config() {
        let cli = parse(&[
            "pushcycle",
            "run",
            "--branch",
            "xc-trigger-42",
            "--purge-gitignore",
            "--wait-secs",
            "5",
            "--poll-secs",
            "1",
            "--identity-name",
            "CI",
            "--identity-email",
            "ci@example.com",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let config = run_config(&args).unwrap();

        assert_eq!(config.branch.as_str(), "xc-trigger-42");
        assert!(config.purge_gitignore);
        assert_eq!(config.trigger_wait, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.identity, CommitIdentity::new("CI", "ci@example.com"));
        assert!(matches!(config.credentials, CredentialSource::Environment));
    }

    #[test]
    fn test_explicit_credentials_and_helper_mode() {
        let cli = parse(&[
            "pushcycle",
            "reconcile",
            "--branch",
            "t",
            "--git-username",
            "u",
            "--git-token",
            "secret",
            "--credential-mode",
            "helper",
        ]);
        let Commands::Reconcile(args) = cli.command else {
            panic!("expected reconcile");
        };
        let config = target_config(&args).unwrap();

        assert_eq!(config.injection, CredentialInjection::Helper);
        match config.credentials {
            CredentialSource::Explicit(creds) => assert_eq!(creds.username(), "u"),
            other => panic!("unexpected credentials: {other:?}"),
        }
    }

    #[test]
    fn test_username_without_token_is_rejected() {
        let err = Cli::try_parse_from(["pushcycle", "run", "--branch", "t", "--git-username", "u"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_blank_branch_is_rejected() {
        let cli = parse(&["pushcycle", "run", "--branch", "  "]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let err = run_config(&args).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid --branch"));
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["pushcycle", "--json", "reconcile", "--branch", "t", "-v"]);
        assert!(cli.json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_render_reconcile() {
        let outcome = ReconcileOutcome {
            initial: BranchState::RemoteOnly,
            detached_head: false,
            local: BranchDeletion::AlreadyAbsent,
            remote: BranchDeletion::Deleted,
        };
        let text = render_reconcile("t", &outcome);
        assert!(text.starts_with("Reconciled t\n"));
        assert!(text.contains("Remote: Deleted"));
    }

    #[tokio::test]
    async fn test_cmd_reconcile_removes_stale_branch() {
        let remote = tempfile::tempdir().unwrap();
        run_git(remote.path(), &["init", "--bare", "--quiet"]);
        let work = tempfile::tempdir().unwrap();
        run_git(work.path(), &["init", "--quiet"]);
        run_git(work.path(), &["config", "user.name", "test-user"]);
        run_git(work.path(), &["config", "user.email", "test@example.com"]);
        run_git(work.path(), &["commit", "--quiet", "--allow-empty", "-m", "initial"]);
        run_git(
            work.path(),
            &["remote", "add", "origin", remote.path().to_str().unwrap()],
        );
        run_git(work.path(), &["branch", "t"]);
        run_git(work.path(), &["push", "--quiet", "origin", "t"]);

        let cli = parse(&[
            "pushcycle",
            "reconcile",
            "--branch",
            "t",
            "--workspace",
            work.path().to_str().unwrap(),
        ]);
        let Commands::Reconcile(args) = cli.command else {
            panic!("expected reconcile");
        };
        cmd_reconcile(args, Interrupt::new()).await.unwrap();

        assert_eq!(run_git(work.path(), &["branch", "--list", "t"]), "");
        assert_eq!(run_git(work.path(), &["ls-remote", "--heads", "origin"]), "");
    }

    #[tokio::test]
    async fn test_cmd_run_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cli = parse(&[
            "pushcycle",
            "run",
            "--branch",
            "t",
            "--workspace",
            dir.path().to_str().unwrap(),
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let err = cmd_run(args, Interrupt::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open repository"));
    }
}
