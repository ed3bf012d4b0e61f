//! Command dispatch: one interactive command at a time, a bounded pool of silent commands, and
//! a single completion context that delivers every outcome.
//!
//! Interactive commands are queued FIFO on one worker so that two authorization UIs never
//! overlap. Silent commands run concurrently, limited by a semaphore. Controllers run in their
//! own task; a panic there surfaces as [`ClientError::Internal`] instead of tearing down the
//! worker. Callbacks never run on a worker task: each outcome is handed to the completion task,
//! which invokes callbacks one by one in the order outcomes were produced.

pub mod command;

pub use command::*;

// std
use std::panic::{self, AssertUnwindSafe};
// crates.io
use tokio::{
	runtime::Handle,
	sync::{Semaphore, mpsc, oneshot},
	task::JoinError,
};
// self
use crate::{
	_prelude::*,
	error::{ClientError, ConfigError},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

type Completion = Box<dyn FnOnce() + Send>;

struct Job {
	command: Arc<Command>,
	callback: Arc<dyn AuthenticationCallback>,
}

/// Routes commands to the interactive worker or the silent pool.
pub struct CommandDispatcher {
	runtime: Handle,
	interactive: mpsc::UnboundedSender<Job>,
	completions: mpsc::UnboundedSender<Completion>,
	silent_permits: Arc<Semaphore>,
	max_concurrent_silent: usize,
	current: Arc<Mutex<Option<Uuid>>>,
}
impl CommandDispatcher {
	/// Starts the interactive worker and completion context on the current Tokio runtime.
	pub fn new(max_concurrent_silent: usize) -> Result<Self, ConfigError> {
		if max_concurrent_silent == 0 {
			return Err(ConfigError::InvalidField {
				field: "max_concurrent_silent",
				reason: "must be at least 1".into(),
			});
		}

		let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;
		let (completions, completion_rx) = mpsc::unbounded_channel();
		let (interactive, interactive_rx) = mpsc::unbounded_channel();
		let current = Arc::<Mutex<Option<Uuid>>>::default();

		runtime.spawn(run_completions(completion_rx));
		runtime.spawn(run_interactive(
			interactive_rx,
			runtime.clone(),
			completions.clone(),
			current.clone(),
		));

		Ok(Self {
			runtime,
			interactive,
			completions,
			silent_permits: Arc::new(Semaphore::new(max_concurrent_silent)),
			max_concurrent_silent,
			current,
		})
	}

	/// Queues `command`; `callback` receives exactly one outcome on the completion context.
	pub fn submit(
		&self,
		command: Command,
		callback: Arc<dyn AuthenticationCallback>,
	) -> Result<CommandHandle> {
		let command = Arc::new(command);
		let handle = command.handle();

		command.transition(CommandState::Queued);

		if command.is_interactive() {
			self.interactive
				.send(Job { command, callback })
				.map_err(|_| ClientError::DispatcherClosed)?;
		} else {
			let permits = self.silent_permits.clone();
			let runtime = self.runtime.clone();
			let completions = self.completions.clone();

			self.runtime.spawn(async move {
				let outcome = match permits.acquire_owned().await {
					Ok(_permit) => execute(&runtime, &command).await,
					Err(_) => Err(ClientError::DispatcherClosed.into()),
				};

				complete(&completions, &command, callback, outcome);
			});
		}

		Ok(handle)
	}

	/// Queues `command` and waits for its outcome.
	pub async fn dispatch(&self, command: Command) -> Result<CommandResult> {
		let (sender, receiver) = oneshot::channel();

		self.submit(command, Arc::new(ChannelCallback::new(sender)))?;

		receiver.await.map_err(|_| ClientError::DispatcherClosed)?
	}

	/// Correlation id of the interactive command currently executing, if any.
	pub fn current_interactive(&self) -> Option<Uuid> {
		*self.current.lock()
	}

	/// Upper bound on concurrently executing silent commands.
	pub fn max_concurrent_silent(&self) -> usize {
		self.max_concurrent_silent
	}
}
impl Debug for CommandDispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CommandDispatcher")
			.field("max_concurrent_silent", &self.max_concurrent_silent)
			.field("available_silent_permits", &self.silent_permits.available_permits())
			.field("current_interactive", &self.current_interactive())
			.finish()
	}
}

async fn run_interactive(
	mut jobs: mpsc::UnboundedReceiver<Job>,
	runtime: Handle,
	completions: mpsc::UnboundedSender<Completion>,
	current: Arc<Mutex<Option<Uuid>>>,
) {
	while let Some(Job { command, callback }) = jobs.recv().await {
		*current.lock() = Some(command.correlation_id());

		let outcome = execute(&runtime, &command).await;

		*current.lock() = None;

		complete(&completions, &command, callback, outcome);
	}
}

async fn run_completions(mut completions: mpsc::UnboundedReceiver<Completion>) {
	while let Some(deliver) = completions.recv().await {
		if panic::catch_unwind(AssertUnwindSafe(deliver)).is_err() {
			obs::warn("An authentication callback panicked");
		}
	}
}

async fn execute(runtime: &Handle, command: &Arc<Command>) -> Result<CommandResult> {
	let kind = if command.is_interactive() { FlowKind::Interactive } else { FlowKind::Silent };
	let span = FlowSpan::new(kind, "execute").with_correlation_id(command.correlation_id());

	command.transition(CommandState::Executing);

	let task = {
		let command = command.clone();

		runtime.spawn(span.instrument(async move { command.execute().await }))
	};
	let result = task.await.unwrap_or_else(|e| Err(aborted(e)));

	span.finish(match &result {
		Ok(CommandResult::Success(_)) => FlowOutcome::Success,
		Ok(CommandResult::Cancelled) => FlowOutcome::Cancelled,
		Err(_) => FlowOutcome::Failure,
	});

	result
}

fn complete(
	completions: &mpsc::UnboundedSender<Completion>,
	command: &Command,
	callback: Arc<dyn AuthenticationCallback>,
	outcome: Result<CommandResult>,
) {
	let state = match &outcome {
		Ok(CommandResult::Success(_)) => CommandState::Succeeded,
		Ok(CommandResult::Cancelled) => CommandState::Cancelled,
		Err(_) => CommandState::Failed,
	};

	command.transition(state);

	let deliver: Completion = Box::new(move || match outcome {
		Ok(CommandResult::Success(result)) => callback.on_success(result),
		Ok(CommandResult::Cancelled) => callback.on_cancel(),
		Err(e) => callback.on_error(e),
	});

	if completions.send(deliver).is_err() {
		obs::warn(format_args!(
			"Completion context is closed; dropping the outcome of command {}",
			command.correlation_id()
		));
	}
}

fn aborted(error: JoinError) -> Error {
	let message =
		if error.is_panic() { "the controller panicked".into() } else { error.to_string() };

	ClientError::Internal { message }.into()
}
