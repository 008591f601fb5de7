//! Task handlers, one per stream.
//!
//! A handler serves the payload variant of its own stream. Anything else it is
//! given fails with `InvalidTask`, which the runner dead-letters at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::auth::TokenSource;
use crate::error::{ErrorKind, TaskFailure};
use crate::persistence::{PublicationStore, ScenarioDrafts};
use crate::publication::{PublishOutcome, Publisher, ReviewBackend};
use crate::types::{EmulationRunId, Task, TaskPayload, TestRunId};

/// Serves claimed tasks.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, task: &Task) -> impl Future<Output = Result<(), TaskFailure>> + Send;
}

fn wrong_variant(handler: &str, task: &Task) -> TaskFailure {
    TaskFailure::invalid(format!(
        "{handler} cannot serve {} task {}",
        task.payload.variant_name(),
        task.id
    ))
}

/// Runs the scenarios of a test run.
pub trait TestExecutor: Send + Sync {
    fn execute(&self, test_run_id: TestRunId) -> impl Future<Output = Result<(), TaskFailure>> + Send;
}

/// Starts an emulation session.
pub trait Emulator: Send + Sync {
    fn start(
        &self,
        emulation_run_id: EmulationRunId,
    ) -> impl Future<Output = Result<(), TaskFailure>> + Send;
}

/// Serves `PublishFeature` tasks.
pub struct PublicationHandler<B, S, St> {
    publisher: Arc<Publisher<B, S, St>>,
}

impl<B, S, St> PublicationHandler<B, S, St> {
    pub fn new(publisher: Arc<Publisher<B, S, St>>) -> Self {
        PublicationHandler { publisher }
    }
}

impl<B, S, St> TaskHandler for PublicationHandler<B, S, St>
where
    B: ReviewBackend,
    S: TokenSource,
    St: PublicationStore + ScenarioDrafts,
{
    async fn handle(&self, task: &Task) -> Result<(), TaskFailure> {
        let TaskPayload::PublishFeature {
            scenario_id,
            target_branch,
        } = &task.payload
        else {
            return Err(wrong_variant("publication handler", task));
        };

        match self
            .publisher
            .publish(&task.id, scenario_id, target_branch)
            .await
        {
            Ok(PublishOutcome::Submitted(_)) => Ok(()),
            Ok(PublishOutcome::AlreadySubmitted(request)) => {
                debug!(id = %request.id, "Review already submitted by an earlier delivery");
                Ok(())
            }
            Err(e) => Err(e.to_failure()),
        }
    }
}

/// Serves `RunTests` tasks.
pub struct TestRunHandler<E> {
    executor: E,
}

impl<E> TestRunHandler<E> {
    pub fn new(executor: E) -> Self {
        TestRunHandler { executor }
    }
}

impl<E: TestExecutor> TaskHandler for TestRunHandler<E> {
    async fn handle(&self, task: &Task) -> Result<(), TaskFailure> {
        match &task.payload {
            TaskPayload::RunTests { test_run_id } => self.executor.execute(*test_run_id).await,
            _ => Err(wrong_variant("test run handler", task)),
        }
    }
}

/// Serves `RunEmulation` tasks.
pub struct EmulationHandler<E> {
    emulator: E,
}

impl<E> EmulationHandler<E> {
    pub fn new(emulator: E) -> Self {
        EmulationHandler { emulator }
    }
}

impl<E: Emulator> TaskHandler for EmulationHandler<E> {
    async fn handle(&self, task: &Task) -> Result<(), TaskFailure> {
        match &task.payload {
            TaskPayload::RunEmulation { emulation_run_id } => {
                self.emulator.start(*emulation_run_id).await
            }
            _ => Err(wrong_variant("emulation handler", task)),
        }
    }
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Splits a command line on whitespace. No quoting is supported.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(CommandSpec {
            program,
            args: words.collect(),
        })
    }
}

/// Runs an external command per task, passing the run ID in its environment.
///
/// A non-zero exit is `ExecutionFailed`. A command that cannot be spawned is
/// `TransientInfra`, since the next delivery may land on a healthier host.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: CommandSpec,
    timeout: Option<Duration>,
}

pub const TEST_RUN_ID_VAR: &str = "OVERHAVE_TEST_RUN_ID";
pub const EMULATION_RUN_ID_VAR: &str = "OVERHAVE_EMULATION_RUN_ID";

impl CommandExecutor {
    pub fn new(command: CommandSpec) -> Self {
        CommandExecutor {
            command,
            timeout: None,
        }
    }

    /// Kills the command if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip(self), fields(program = %self.command.program))]
    async fn run(&self, var: &'static str, id: u64) -> Result<(), TaskFailure> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env(var, id.to_string())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TaskFailure::transient(format!("failed to spawn {}: {e}", self.command.program))
        })?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Command timed out");
                    return Err(TaskFailure::new(
                        ErrorKind::ExecutionFailed,
                        format!("{} timed out after {:?}", self.command.program, limit),
                    ));
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| TaskFailure::transient(format!("failed to wait for command: {e}")))?;

        if status.success() {
            info!("Command succeeded");
            Ok(())
        } else {
            Err(TaskFailure::new(
                ErrorKind::ExecutionFailed,
                format!("{} exited with {status}", self.command.program),
            ))
        }
    }
}

impl TestExecutor for CommandExecutor {
    async fn execute(&self, test_run_id: TestRunId) -> Result<(), TaskFailure> {
        self.run(TEST_RUN_ID_VAR, test_run_id.0).await
    }
}

impl Emulator for CommandExecutor {
    async fn start(&self, emulation_run_id: EmulationRunId) -> Result<(), TaskFailure> {
        self.run(EMULATION_RUN_ID_VAR, emulation_run_id.0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publication::publisher::tests::{FakeBackend, FakeTokens, publisher};
    use crate::types::{ReviewRef, ScenarioId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        runs: Mutex<Vec<u64>>,
    }

    impl TestExecutor for RecordingExecutor {
        async fn execute(&self, test_run_id: TestRunId) -> Result<(), TaskFailure> {
            self.runs.lock().unwrap().push(test_run_id.0);
            Ok(())
        }
    }

    impl Emulator for RecordingExecutor {
        async fn start(&self, emulation_run_id: EmulationRunId) -> Result<(), TaskFailure> {
            self.runs.lock().unwrap().push(emulation_run_id.0);
            Ok(())
        }
    }

    fn publish_task() -> Task {
        Task::new(TaskPayload::PublishFeature {
            scenario_id: ScenarioId::new("S1"),
            target_branch: "main".into(),
        })
    }

    fn test_task(id: u64) -> Task {
        Task::new(TaskPayload::RunTests {
            test_run_id: TestRunId(id),
        })
    }

    #[tokio::test]
    async fn test_run_handler_runs_executor() {
        let handler = TestRunHandler::new(RecordingExecutor::default());
        handler.handle(&test_task(7)).await.unwrap();
        assert_eq!(*handler.executor.runs.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn handlers_reject_other_variants() {
        let tests = TestRunHandler::new(RecordingExecutor::default());
        let failure = tests.handle(&publish_task()).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::InvalidTask);
        assert!(!failure.is_retriable());

        let emulation = EmulationHandler::new(RecordingExecutor::default());
        let failure = emulation.handle(&test_task(1)).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::InvalidTask);

        let publication = PublicationHandler::new(Arc::new(publisher(
            FakeBackend::default(),
            FakeTokens::default(),
        )));
        let failure = publication.handle(&test_task(1)).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::InvalidTask);
    }

    #[tokio::test]
    async fn publication_handler_publishes_and_tolerates_redelivery() {
        let handler = PublicationHandler::new(Arc::new(publisher(
            FakeBackend::creating(ReviewRef { id: 3, url: None }),
            FakeTokens::default(),
        )));
        let task = publish_task();
        handler.handle(&task).await.unwrap();
        handler.handle(&task.redelivered(1)).await.unwrap();
        assert_eq!(
            handler.publisher.backend().created.lock().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn publication_handler_maps_failures() {
        let handler = PublicationHandler::new(Arc::new(publisher(
            FakeBackend::default(),
            FakeTokens {
                reject: true,
                ..Default::default()
            },
        )));
        let failure = handler.handle(&publish_task()).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::AuthRequestRejected);
        assert!(!failure.is_retriable());
    }

    #[test]
    fn command_spec_parses() {
        assert_eq!(
            CommandSpec::parse("  run-tests --fast "),
            Some(CommandSpec {
                program: "run-tests".into(),
                args: vec!["--fast".into()]
            })
        );
        assert_eq!(CommandSpec::parse("   "), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_executor_passes_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("id");
        let script = format!("printf %s \"$OVERHAVE_TEST_RUN_ID\" > {}", out.display());
        let executor = CommandExecutor::new(CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script],
        });

        executor.execute(TestRunId(42)).await.unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "42");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_exit_codes_map_to_kinds() {
        let failing = CommandExecutor::new(CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 3".into()],
        });
        let failure = failing.start(EmulationRunId(1)).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ExecutionFailed);

        let missing = CommandExecutor::new(CommandSpec {
            program: "/nonexistent/overhave-runner".into(),
            args: Vec::new(),
        });
        let failure = missing.execute(TestRunId(1)).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::TransientInfra);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_timeout_is_execution_failure() {
        let slow = CommandExecutor::new(CommandSpec {
            program: "sleep".into(),
            args: vec!["5".into()],
        })
        .with_timeout(Some(Duration::from_millis(50)));
        let failure = slow.execute(TestRunId(1)).await.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::ExecutionFailed);
    }
}
