// src/cli/handlers/run.rs
//
// Runs a named command across all matching projects, in dependency order,
// with bounded concurrency. A project only starts once every filtered
// project it depends on has settled.

use crate::CancellationToken;
use crate::cli::CliError;
use crate::cli::args::RunArgs;
use crate::cli::handlers::commons::{self, App};
use crate::constants::{EXIT_NO_MATCHING_COMMAND, EXIT_RUN_FAILED};
use crate::core::evaluator::{self, ContextMap};
use crate::core::paths;
use crate::models::{
    ConditionBehaviour, FailureBehavior, ProjectCommand, ProjectCommandStatus, ProjectWithVersion,
};
use crate::system::executor::{self, ExecutionError, ExecutionRequest};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

pub fn handle(args: Vec<String>, cancellation: &CancellationToken) -> Result<()> {
    let args = RunArgs::parse_from(args);
    if args.no_color {
        colored::control::set_override(false);
    }

    let app = App::initialize()?;
    app.context.set_parameters(&args.context)?;

    commons::block_on(run(app, args, cancellation.clone()))
}

struct RunState {
    app: App,
    /// Every filtered project, whether or not it defines the command.
    projects: Vec<ProjectWithVersion>,
    command: String,
    cancellation: CancellationToken,
    /// Signalled whenever a project settles, waking the scheduler.
    settled: Notify,
    cancel_on_failure: bool,
}

async fn run(app: App, args: RunArgs, cancellation: CancellationToken) -> Result<()> {
    let projects = commons::filter_projects(&app, &args.filter).await?;

    let mut to_run = Vec::new();
    for project in &projects {
        if project.project.command_steps(&args.command).is_some() {
            to_run.push(project.clone());
        }
    }
    if to_run.is_empty() {
        return Err(CliError::new(
            format!("No matching projects define command `{}`", args.command),
            EXIT_NO_MATCHING_COMMAND,
        )
        .into());
    }

    let state = Arc::new(RunState {
        app,
        projects,
        command: args.command,
        cancellation,
        settled: Notify::new(),
        cancel_on_failure: !args.continue_on_failure,
    });

    // Filtered projects without the command settle immediately so nothing
    // waits on them.
    for project in &state.projects {
        let name = &project.project.name;
        if project.project.command_steps(&state.command).is_some() {
            state.app.context.set_status(name, ProjectCommandStatus::Pending);
        } else {
            update_status(
                &state,
                name,
                ProjectCommandStatus::Skipped,
                &format!("Command `{}` not defined", state.command),
            );
        }
    }

    {
        let cancellation = state.cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancellation.cancel();
            }
        });
    }

    let semaphore = Arc::new(Semaphore::new(args.concurrency.max(1)));
    let mut handles = Vec::new();
    while !to_run.is_empty() {
        if state.cancellation.is_cancelled() {
            break;
        }

        let ready = next_ready(&to_run, &state.projects, args.ignore_dependencies, |name| {
            state.app.context.get_status(name)
        });
        let Some(index) = ready else {
            tokio::select! {
                () = state.settled.notified() => {}
                () = state.cancellation.cancelled() => {}
            }
            continue;
        };

        let project = to_run.remove(index);
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let state = Arc::clone(&state);
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            run_project(&state, &project).await;
        }));
    }

    for handle in handles {
        handle.await?;
    }

    // Anything still queued after a cancellation never ran.
    for project in &to_run {
        update_status(
            &state,
            &project.project.name,
            ProjectCommandStatus::Skipped,
            "Cancelled",
        );
    }

    if state.cancellation.is_cancelled() {
        return Err(CliError::new(
            format!("Command `{}` failed", state.command),
            EXIT_RUN_FAILED,
        )
        .into());
    }
    Ok(())
}

/// Picks the first queued project whose dependency projects have all
/// settled. Dependencies outside the filtered set are not waited on.
fn next_ready<F>(
    to_run: &[ProjectWithVersion],
    all: &[ProjectWithVersion],
    ignore_dependencies: bool,
    status_of: F,
) -> Option<usize>
where
    F: Fn(&str) -> Option<ProjectCommandStatus>,
{
    to_run.iter().position(|candidate| {
        ignore_dependencies
            || !all.iter().any(|other| {
                !other.project.dir.eq_ignore_ascii_case(&candidate.project.dir)
                    && candidate
                        .project
                        .dependencies
                        .iter()
                        .any(|d| d.eq_ignore_ascii_case(&other.project.dir))
                    && status_of(&other.project.name).is_some_and(|s| !s.is_settled())
            })
    })
}

async fn run_project(state: &RunState, project: &ProjectWithVersion) {
    let name = &project.project.name;
    if state.cancellation.is_cancelled() {
        update_status(state, name, ProjectCommandStatus::Skipped, "Cancelled");
        state.settled.notify_one();
        return;
    }

    update_status(
        state,
        name,
        ProjectCommandStatus::Running,
        &format!("Running `{}`", state.command),
    );

    let steps = project.project.command_steps(&state.command).unwrap_or(&[]);
    for step in steps {
        match run_step(state, project, step).await {
            StepOutcome::Continue => {}
            StepOutcome::Skip(reason) => {
                update_status(state, name, ProjectCommandStatus::Skipped, &reason);
                state.settled.notify_one();
                return;
            }
            StepOutcome::Fail(reason) => {
                update_status(state, name, ProjectCommandStatus::Failed, &reason);
                if state.cancel_on_failure {
                    state.cancellation.cancel();
                }
                state.settled.notify_one();
                return;
            }
        }
    }

    update_status(
        state,
        name,
        ProjectCommandStatus::Success,
        &format!("Command `{}` succeeded", state.command),
    );
    state.settled.notify_one();
}

enum StepOutcome {
    Continue,
    Skip(String),
    Fail(String),
}

async fn run_step(
    state: &RunState,
    project: &ProjectWithVersion,
    step: &ProjectCommand,
) -> StepOutcome {
    let context = match state
        .app
        .context
        .project_context(&state.projects, project, Some(&state.command))
    {
        Ok(context) => context,
        Err(error) => return StepOutcome::Fail(format!("failed to evaluate '{error}'")),
    };

    if let Some(outcome) = check_condition(step, &context) {
        return outcome;
    }

    let command = match evaluator::evaluate_template(&step.command, &context) {
        Ok(command) => command,
        Err(error) => return StepOutcome::Fail(format!("failed to evaluate '{error}'")),
    };
    let mut arguments = Vec::new();
    for argument in step.arguments.iter().flatten() {
        match evaluator::evaluate_template(argument, &context) {
            Ok(argument) => arguments.push(argument),
            Err(error) => return StepOutcome::Fail(format!("failed to evaluate '{error}'")),
        }
    }

    let env = match state
        .app
        .context
        .project_environment(project, Some(&state.command))
    {
        Ok(env) => env,
        Err(error) => return StepOutcome::Fail(format!("failed to evaluate '{error}'")),
    };

    // Step working directories are relative to the project directory.
    let working_dir = match &step.working_directory {
        Some(dir) => paths::resolve_relative_to(&project.project.dir, dir),
        None => project.project.dir.clone(),
    };

    let request = ExecutionRequest {
        command,
        arguments,
        shell: step.shell.clone().unwrap_or_default(),
        working_dir: paths::to_file_path(state.app.base_dir.as_path(), &working_dir),
        env,
        cancellation: state.cancellation.clone(),
    };

    let name = project.project.name.as_str();
    let result = executor::execute(request, |line| {
        let label = output_label(state.app.context.get_status(name), name);
        if line.stderr {
            eprintln!("[{label}] {}", line.text);
        } else {
            println!("[{label}] {}", line.text);
        }
    })
    .await;

    let display = step.display_name();
    match result {
        Ok(()) => StepOutcome::Continue,
        Err(ExecutionError::Cancelled) => StepOutcome::Skip("Cancelled".to_string()),
        Err(ExecutionError::NonZeroExit { code, .. }) => {
            let reason = format!("{display} failed with code {code}");
            match step.failure_behavior() {
                FailureBehavior::Skip => StepOutcome::Skip(reason),
                FailureBehavior::Fail => StepOutcome::Fail(reason),
            }
        }
        Err(error) => StepOutcome::Fail(format!("{display} failed: {error}")),
    }
}

/// Output lines carry the project's current status color, which can change
/// mid-step when a concurrent failure cancels the run.
fn output_label(status: Option<ProjectCommandStatus>, name: &str) -> colored::ColoredString {
    status.unwrap_or(ProjectCommandStatus::Running).colored(name)
}

/// A falsy or unevaluable condition prevents the step from running.
fn check_condition(step: &ProjectCommand, context: &ContextMap) -> Option<StepOutcome> {
    let condition = step.condition.as_deref()?;
    let reason = match evaluator::evaluate(condition, context) {
        Ok(value) if value.is_truthy() => return None,
        Ok(_) => format!("Condition `{condition}` evaluated to false"),
        Err(error) => format!("Condition `{condition}` failed to evaluate '{error}'"),
    };
    Some(match step.condition_behaviour() {
        ConditionBehaviour::Skip => StepOutcome::Skip(reason),
        ConditionBehaviour::Fail => StepOutcome::Fail(reason),
    })
}

fn update_status(state: &RunState, name: &str, status: ProjectCommandStatus, reason: &str) {
    state.app.context.set_status(name, status);
    println!(
        "[{}] {}: {}",
        status.colored(name),
        status.colored(status.as_str()),
        reason
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ContextService;
    use crate::core::evaluator::Value;
    use crate::core::project_service::ProjectService;
    use crate::core::repository::Repository;
    use crate::models::{Project, ProjectVersion};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn versioned(name: &str, dir: &str, dependencies: &[&str]) -> ProjectWithVersion {
        ProjectWithVersion {
            project: Project {
                name: name.to_string(),
                dir: dir.to_string(),
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                ..Default::default()
            },
            version: ProjectVersion {
                hash: "abc".to_string(),
                hash_short: "abc".to_string(),
                timestamp: Utc::now(),
                ago: "now".to_string(),
                local_changes: None,
            },
        }
    }

    fn git_repo_with(definitions: &[(&str, &str)]) -> TempDir {
        let repo = TempDir::new().unwrap();
        let status = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(repo.path())
            .status()
            .unwrap();
        assert!(status.success());

        for (file, content) in definitions {
            let path = repo.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        repo
    }

    fn app_for(repo: &TempDir) -> App {
        let base_dir = repo.path().to_path_buf();
        let repository = Arc::new(Repository::new(base_dir.clone()));
        App {
            base_dir: base_dir.clone(),
            repository: Arc::clone(&repository),
            projects: ProjectService::new(base_dir.clone(), repository),
            context: ContextService::with_process_env(base_dir, vec![], vec![]),
        }
    }

    fn run_args(command: &str) -> RunArgs {
        RunArgs {
            command: command.to_string(),
            filter: Default::default(),
            continue_on_failure: false,
            ignore_dependencies: false,
            concurrency: 1,
            no_color: true,
            context: vec![],
        }
    }

    #[tokio::test]
    async fn runs_dependencies_before_dependants() {
        // --- Setup ---
        // `/a` sorts first but depends on `/z`, so `/z` must run first.
        let repo = git_repo_with(&[
            (
                "a/.project.yaml",
                "name: A\ndependencies: ['../z']\ncommands:\n  emit:\n    command: echo a >> ../order.log\n",
            ),
            (
                "z/.project.yaml",
                "name: Z\ncommands:\n  emit:\n    command: echo z >> ../order.log\n",
            ),
        ]);
        let app = app_for(&repo);

        // --- Execute ---
        run(app, run_args("emit"), CancellationToken::new())
            .await
            .unwrap();

        // --- Assert ---
        let order = fs::read_to_string(repo.path().join("order.log")).unwrap();
        assert_eq!(order, "z\na\n");
    }

    #[tokio::test]
    async fn failure_cancels_the_remaining_queue() {
        let repo = git_repo_with(&[
            (
                "a/.project.yaml",
                "name: A\ncommands:\n  emit:\n    command: exit 7\n",
            ),
            (
                "b/.project.yaml",
                "name: B\ndependencies: ['../a']\ncommands:\n  emit:\n    command: echo b > ../ran-b\n",
            ),
        ]);
        let app = app_for(&repo);

        let error = run(app, run_args("emit"), CancellationToken::new())
            .await
            .unwrap_err();

        let cli_error = error.downcast_ref::<CliError>().unwrap();
        assert_eq!(cli_error.exit_code, crate::constants::EXIT_RUN_FAILED);
        assert!(!repo.path().join("ran-b").exists());
    }

    #[tokio::test]
    async fn concurrency_limit_bounds_parallel_projects() {
        // --- Setup ---
        // Three independent projects; with a single slot their steps must
        // never interleave.
        let step = |name: &str| {
            format!(
                "name: {name}\ncommands:\n  emit:\n    command: echo start-{name} >> ../events.log; sleep 0.2; echo end-{name} >> ../events.log\n",
            )
        };
        let (a, b, c) = (step("a"), step("b"), step("c"));
        let repo = git_repo_with(&[
            ("a/.project.yaml", a.as_str()),
            ("b/.project.yaml", b.as_str()),
            ("c/.project.yaml", c.as_str()),
        ]);
        let app = app_for(&repo);

        // --- Execute ---
        run(app, run_args("emit"), CancellationToken::new())
            .await
            .unwrap();

        // --- Assert ---
        let events = fs::read_to_string(repo.path().join("events.log")).unwrap();
        let lines: Vec<&str> = events.lines().collect();
        assert_eq!(lines.len(), 6);
        for pair in lines.chunks(2) {
            let started = pair[0].strip_prefix("start-").unwrap();
            assert_eq!(pair[1], format!("end-{started}"));
        }
    }

    #[tokio::test]
    async fn failure_cancels_concurrent_running_projects() {
        // --- Setup ---
        // With two slots, the fast failure must interrupt the long-running
        // neighbour instead of letting it finish.
        let repo = git_repo_with(&[
            (
                "fast/.project.yaml",
                "name: Fast\ncommands:\n  emit:\n    command: exit 7\n",
            ),
            (
                "slow/.project.yaml",
                "name: Slow\ncommands:\n  emit:\n    command: sleep 5; echo done > ../slow-done\n",
            ),
        ]);
        let app = app_for(&repo);
        let mut args = run_args("emit");
        args.concurrency = 2;

        // --- Execute ---
        let started = std::time::Instant::now();
        let error = run(app, args, CancellationToken::new())
            .await
            .unwrap_err();

        // --- Assert ---
        let cli_error = error.downcast_ref::<CliError>().unwrap();
        assert_eq!(cli_error.exit_code, crate::constants::EXIT_RUN_FAILED);
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert!(!repo.path().join("slow-done").exists());
    }

    #[tokio::test]
    async fn missing_command_is_exit_21() {
        let repo = git_repo_with(&[("a/.project.yaml", "name: A\n")]);
        let app = app_for(&repo);

        let error = run(app, run_args("emit"), CancellationToken::new())
            .await
            .unwrap_err();

        let cli_error = error.downcast_ref::<CliError>().unwrap();
        assert_eq!(cli_error.exit_code, crate::constants::EXIT_NO_MATCHING_COMMAND);
    }

    #[test]
    fn waits_for_incomplete_dependency_projects() {
        // --- Setup ---
        let library = versioned("library", "/library", &[]);
        let service = versioned("service", "/service", &["/library", "/shared.yaml"]);
        let all = vec![library.clone(), service.clone()];
        let queued = vec![service.clone()];

        // --- Execute / Assert ---
        // Library still running: service is not ready.
        assert_eq!(
            next_ready(&queued, &all, false, |name| match name {
                "library" => Some(ProjectCommandStatus::Running),
                _ => Some(ProjectCommandStatus::Pending),
            }),
            None
        );

        // Library settled: service may start.
        assert_eq!(
            next_ready(&queued, &all, false, |name| match name {
                "library" => Some(ProjectCommandStatus::Success),
                _ => Some(ProjectCommandStatus::Pending),
            }),
            Some(0)
        );
    }

    #[test]
    fn ignore_dependencies_starts_everything() {
        let library = versioned("library", "/library", &[]);
        let service = versioned("service", "/service", &["/library"]);
        let all = vec![library.clone(), service.clone()];
        let queued = vec![service];

        assert_eq!(
            next_ready(&queued, &all, true, |_| Some(ProjectCommandStatus::Running)),
            Some(0)
        );
    }

    #[test]
    fn dependencies_outside_the_filter_are_not_awaited() {
        let service = versioned("service", "/service", &["/library"]);
        let all = vec![service.clone()];
        let queued = vec![service];

        // `/library` was filtered out entirely, so it has no status.
        assert_eq!(next_ready(&queued, &all, false, |_| None), Some(0));
    }

    #[test]
    fn self_dependency_does_not_deadlock() {
        let service = versioned("service", "/service", &["/service"]);
        let all = vec![service.clone()];
        let queued = vec![service];

        assert_eq!(
            next_ready(&queued, &all, false, |_| Some(ProjectCommandStatus::Pending)),
            Some(0)
        );
    }

    #[test]
    fn output_lines_use_the_live_status_color() {
        assert_eq!(
            output_label(Some(ProjectCommandStatus::Failed), "api").to_string(),
            ProjectCommandStatus::Failed.colored("api").to_string()
        );
        assert_eq!(
            output_label(None, "api").to_string(),
            ProjectCommandStatus::Running.colored("api").to_string()
        );
    }

    #[test]
    fn falsy_condition_skips_by_default() {
        // --- Setup ---
        let step = ProjectCommand {
            command: "echo hi".to_string(),
            condition: Some("stage == 'prod'".to_string()),
            ..Default::default()
        };
        let context: ContextMap = [("stage", Value::from("dev"))].into_iter().collect();

        // --- Execute ---
        let outcome = check_condition(&step, &context);

        // --- Assert ---
        match outcome {
            Some(StepOutcome::Skip(reason)) => {
                assert_eq!(reason, "Condition `stage == 'prod'` evaluated to false");
            }
            _ => panic!("expected a skip outcome"),
        }
    }

    #[test]
    fn falsy_condition_fails_when_configured() {
        let step = ProjectCommand {
            command: "echo hi".to_string(),
            condition: Some("false".to_string()),
            condition_behaviour: Some(ConditionBehaviour::Fail),
            ..Default::default()
        };
        let context = ContextMap::default();

        assert!(matches!(
            check_condition(&step, &context),
            Some(StepOutcome::Fail(_))
        ));
    }

    #[test]
    fn truthy_condition_lets_the_step_run() {
        let step = ProjectCommand {
            command: "echo hi".to_string(),
            condition: Some("tags.length == 0".to_string()),
            ..Default::default()
        };
        let context: ContextMap = [("tags", Value::List(vec![]))].into_iter().collect();

        assert!(check_condition(&step, &context).is_none());
    }

    #[test]
    fn unevaluable_condition_is_treated_as_falsy() {
        let step = ProjectCommand {
            command: "echo hi".to_string(),
            condition: Some("missing.member".to_string()),
            ..Default::default()
        };
        let context = ContextMap::default();

        assert!(matches!(
            check_condition(&step, &context),
            Some(StepOutcome::Skip(_))
        ));
    }
}
