//! LLM-driven GitHub issue fixer.
//!
//! Plans a fix for a goal or issue, executes the plan step by step with
//! repository tools, and replans after every step until a pull request is
//! open or the iteration budget runs out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

use fixer::core::types::{RunContext, RunOutcome, RunStatus};
use fixer::events::RunEvent;
use fixer::exit_codes;
use fixer::io::config::{FixerConfig, load_config};
use fixer::io::run_log::RunLog;
use fixer::logging;
use fixer::looping::{LoopConfig, run_fix};
use fixer::model::AnyModel;
use fixer::planner::Planner;
use fixer::tools::fix::FixCodeTool;
use fixer::tools::github::{GitHubService, compose_issue_goal, register_repository_tools};
use fixer::tools::{ToolRegistry, builtin_specs};

#[derive(Parser)]
#[command(name = "fixer", version, about = "LLM-driven GitHub issue fixer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and execute a fix, opening a pull request.
    Run {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Print the plan for a goal without executing anything.
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List the registered tools and their argument schemas.
    Tools,
}

#[derive(clap::Args)]
struct TargetArgs {
    /// Repository coordinate, `owner/name`.
    #[arg(long)]
    repository: String,

    /// Issue number to fetch the goal from.
    #[arg(long, conflicts_with = "goal")]
    issue: Option<u64>,

    /// Goal text (alternative to --issue).
    #[arg(long)]
    goal: Option<String>,

    /// Environment variable holding the GitHub token.
    #[arg(long, default_value = "GITHUB_TOKEN")]
    token_env: String,

    /// Config file path.
    #[arg(long, default_value = ".fixer/config.toml")]
    config: PathBuf,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { target } => cmd_run(&target),
        Command::Plan { target } => cmd_plan(&target),
        Command::Tools => cmd_tools(),
    }
}

fn cmd_run(target: &TargetArgs) -> Result<i32> {
    let cfg = load_config(&target.config)?;
    let service = Arc::new(build_service(target, &cfg)?);

    // Auth problems are fatal before any planning happens, but still
    // produce a structured outcome.
    if let Err(err) = service.verify_auth() {
        let outcome = RunOutcome::error(
            format!("Cannot authenticate to GitHub for {}", target.repository),
            vec![format!("{err:#}")],
        );
        print_outcome(&outcome)?;
        return Ok(exit_codes::ERROR);
    }

    let (run_id, goal) = resolve_goal(&service, target)?;
    let ctx = RunContext {
        run_id,
        goal,
        repository: target.repository.clone(),
        base_branch: cfg.base_branch.clone(),
    };

    let model = Arc::new(AnyModel::from_config(&cfg)?);
    let mut registry = ToolRegistry::new();
    register_repository_tools(&mut registry, service.clone(), &ctx);
    registry.register(Box::new(FixCodeTool::new(model.clone())));

    let run_log = RunLog::create(std::path::Path::new("."), &ctx.run_id)?;
    let loop_config = LoopConfig::from_config(&cfg);
    let outcome = run_fix(
        &ctx,
        &loop_config,
        model.as_ref(),
        &registry,
        Some(&run_log),
        log_event,
    );

    print_outcome(&outcome)?;
    Ok(match outcome.status {
        RunStatus::Success => exit_codes::OK,
        RunStatus::Partial => exit_codes::PARTIAL,
        RunStatus::Error => exit_codes::ERROR,
    })
}

fn cmd_plan(target: &TargetArgs) -> Result<i32> {
    let cfg = load_config(&target.config)?;

    let goal = match target.issue {
        Some(number) => {
            let service = build_service(target, &cfg)?;
            let issue = service
                .get_issue(&target.repository, number)
                .context("fetch issue")?;
            compose_issue_goal(&issue)
        }
        None => target
            .goal
            .clone()
            .ok_or_else(|| anyhow!("provide --issue or --goal"))?,
    };

    let ctx = RunContext {
        run_id: "plan-preview".to_string(),
        goal,
        repository: target.repository.clone(),
        base_branch: cfg.base_branch.clone(),
    };
    let model = AnyModel::from_config(&cfg)?;
    let steps = Planner::new().plan(&model, &ctx, &builtin_specs())?;

    for (index, step) in steps.iter().enumerate() {
        println!("{}. {step}", index + 1);
    }
    Ok(exit_codes::OK)
}

fn cmd_tools() -> Result<i32> {
    for spec in builtin_specs() {
        println!("{}: {}", spec.name, spec.description);
        println!(
            "{}",
            serde_json::to_string_pretty(&spec.parameters).context("serialize schema")?
        );
        println!();
    }
    Ok(exit_codes::OK)
}

fn build_service(target: &TargetArgs, cfg: &FixerConfig) -> Result<GitHubService> {
    let token = std::env::var(&target.token_env)
        .with_context(|| format!("read GitHub token from ${}", target.token_env))?;
    GitHubService::new(token, Duration::from_secs(cfg.request_timeout_secs))
}

fn resolve_goal(service: &GitHubService, target: &TargetArgs) -> Result<(String, String)> {
    if let Some(number) = target.issue {
        let issue = service
            .get_issue(&target.repository, number)
            .context("fetch issue")?;
        return Ok((format!("issue-{number}"), compose_issue_goal(&issue)));
    }
    let goal = target
        .goal
        .clone()
        .ok_or_else(|| anyhow!("provide --issue or --goal"))?;
    Ok((adhoc_run_id(), goal))
}

fn adhoc_run_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!("run-{seconds}")
}

fn log_event(event: &RunEvent) {
    match event {
        RunEvent::PlanCreated { steps, .. } => info!(steps = steps.len(), "plan created"),
        RunEvent::StepStarted { iter, step, .. } => info!(iter, step = %step, "step started"),
        RunEvent::ToolInvoked { tool, ok, .. } => info!(tool = %tool, ok, "tool invoked"),
        RunEvent::StepCompleted { iter, .. } => info!(iter, "step completed"),
        RunEvent::PlanRevised { remaining, .. } => {
            info!(remaining = remaining.len(), "plan revised");
        }
        RunEvent::RunStarted { .. } | RunEvent::RunCompleted { .. } => {}
    }
}

fn print_outcome(outcome: &RunOutcome) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(outcome).context("serialize outcome")?;
    payload.push('\n');
    print!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixer::tools::github::GitHubIssue;

    #[test]
    fn parse_run_with_issue() {
        let cli = Cli::parse_from([
            "fixer",
            "run",
            "--repository",
            "acme/widget",
            "--issue",
            "2",
        ]);
        let Command::Run { target } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(target.repository, "acme/widget");
        assert_eq!(target.issue, Some(2));
        assert_eq!(target.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn parse_plan_with_goal() {
        let cli = Cli::parse_from([
            "fixer",
            "plan",
            "--repository",
            "acme/widget",
            "--goal",
            "fix the typo",
        ]);
        let Command::Plan { target } = cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(target.goal.as_deref(), Some("fix the typo"));
    }

    #[test]
    fn issue_and_goal_conflict() {
        let result = Cli::try_parse_from([
            "fixer",
            "run",
            "--repository",
            "acme/widget",
            "--issue",
            "2",
            "--goal",
            "fix it",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn issue_goal_includes_title_and_body() {
        let issue = GitHubIssue {
            number: 2,
            title: "SyntaxError: invalid syntax".to_string(),
            body: Some("missing colon on line 4".to_string()),
            state: "open".to_string(),
            html_url: "https://github.com/acme/widget/issues/2".to_string(),
        };

        let goal = compose_issue_goal(&issue);
        assert!(goal.contains("#2 SyntaxError"));
        assert!(goal.contains("missing colon on line 4"));
    }
}
