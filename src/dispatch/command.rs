//! Commands, their lifecycle, and caller-facing completion types.

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	controller::Controller,
	error::ClientError,
	obs,
	request::{AuthenticationResult, InteractiveRequest, SilentRequest},
};

/// Terminal outcome of a command that did not fail.
#[derive(Clone, Debug)]
pub enum CommandResult {
	/// A token was acquired.
	Success(AuthenticationResult),
	/// The user cancelled the interactive flow.
	Cancelled,
}
impl CommandResult {
	/// The result, if the command succeeded.
	pub fn into_success(self) -> Option<AuthenticationResult> {
		match self {
			Self::Success(result) => Some(result),
			Self::Cancelled => None,
		}
	}
}

/// Lifecycle of a command.
///
/// ```text
/// Created -> Queued -> Executing -> Succeeded | Failed | Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandState {
	/// Built but not yet submitted.
	Created,
	/// Waiting for the interactive worker or a silent permit.
	Queued,
	/// A controller is running.
	Executing,
	/// Delivered a token.
	Succeeded,
	/// Delivered an error.
	Failed,
	/// Delivered a user cancellation.
	Cancelled,
}
impl CommandState {
	/// Returns `true` for the three terminal states.
	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
	}
}

/// Receives command outcomes on the dispatcher's completion context.
///
/// Exactly one method is called per command, never from a worker task.
pub trait AuthenticationCallback
where
	Self: Send + Sync,
{
	/// A token was acquired.
	fn on_success(&self, result: AuthenticationResult);

	/// The command failed.
	fn on_error(&self, error: Error);

	/// The user cancelled.
	fn on_cancel(&self);
}

/// Request payload of a command.
#[derive(Clone, Debug)]
pub enum CommandKind {
	/// Interactive acquisition.
	Interactive(InteractiveRequest),
	/// Silent acquisition.
	Silent(SilentRequest),
}

/// One unit of work for the dispatcher.
pub struct Command {
	kind: CommandKind,
	controllers: Vec<Arc<dyn Controller>>,
	state: Arc<Mutex<CommandState>>,
}
impl Command {
	/// Interactive command executed by `controller`.
	pub fn interactive(request: InteractiveRequest, controller: Arc<dyn Controller>) -> Self {
		Self::new(CommandKind::Interactive(request), vec![controller])
	}

	/// Silent command that consults `controllers` in order, moving on only when one reports
	/// [`Error::UiRequired`].
	pub fn silent(request: SilentRequest, controllers: Vec<Arc<dyn Controller>>) -> Self {
		Self::new(CommandKind::Silent(request), controllers)
	}

	fn new(kind: CommandKind, controllers: Vec<Arc<dyn Controller>>) -> Self {
		Self { kind, controllers, state: Arc::new(Mutex::new(CommandState::Created)) }
	}

	/// Correlation id of the underlying request.
	pub fn correlation_id(&self) -> Uuid {
		match &self.kind {
			CommandKind::Interactive(request) => request.context.correlation_id,
			CommandKind::Silent(request) => request.context.correlation_id,
		}
	}

	/// Returns `true` for interactive commands.
	pub fn is_interactive(&self) -> bool {
		matches!(self.kind, CommandKind::Interactive(_))
	}

	/// Current lifecycle state.
	pub fn state(&self) -> CommandState {
		*self.state.lock()
	}

	/// Observer handle sharing this command's state.
	pub fn handle(&self) -> CommandHandle {
		CommandHandle { correlation_id: self.correlation_id(), state: self.state.clone() }
	}

	/// Runs the command's controllers.
	pub async fn execute(&self) -> Result<CommandResult> {
		match &self.kind {
			CommandKind::Interactive(request) => {
				let controller = self.controllers.first().ok_or_else(no_controller)?;

				controller.acquire_token(request).await
			},
			CommandKind::Silent(request) => {
				let mut last_error = None;

				for controller in &self.controllers {
					match controller.acquire_token_silent(request).await {
						Err(e) if e.is_ui_required() => {
							obs::debug(format_args!(
								"The {} controller requires interaction: {e}",
								controller.name()
							));

							last_error = Some(e);
						},
						result => return result.map(CommandResult::Success),
					}
				}

				Err(last_error.unwrap_or_else(no_controller))
			},
		}
	}

	pub(crate) fn transition(&self, next: CommandState) {
		*self.state.lock() = next;
	}
}
impl Debug for Command {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let controllers = self.controllers.iter().map(|c| c.name()).collect::<Vec<_>>();

		f.debug_struct("Command")
			.field("kind", &self.kind)
			.field("controllers", &controllers)
			.field("state", &self.state())
			.finish()
	}
}

/// Observer for a submitted command.
#[derive(Clone, Debug)]
pub struct CommandHandle {
	correlation_id: Uuid,
	state: Arc<Mutex<CommandState>>,
}
impl CommandHandle {
	/// Correlation id of the command.
	pub fn correlation_id(&self) -> Uuid {
		self.correlation_id
	}

	/// Current lifecycle state.
	pub fn state(&self) -> CommandState {
		*self.state.lock()
	}
}

/// Callback that forwards the outcome into a oneshot channel.
pub(crate) struct ChannelCallback(Mutex<Option<oneshot::Sender<Result<CommandResult>>>>);
impl ChannelCallback {
	pub(crate) fn new(sender: oneshot::Sender<Result<CommandResult>>) -> Self {
		Self(Mutex::new(Some(sender)))
	}

	fn send(&self, outcome: Result<CommandResult>) {
		if let Some(sender) = self.0.lock().take() {
			// The receiver may have been dropped by a caller that stopped waiting.
			let _ = sender.send(outcome);
		}
	}
}
impl AuthenticationCallback for ChannelCallback {
	fn on_success(&self, result: AuthenticationResult) {
		self.send(Ok(CommandResult::Success(result)));
	}

	fn on_error(&self, error: Error) {
		self.send(Err(error));
	}

	fn on_cancel(&self) {
		self.send(Ok(CommandResult::Cancelled));
	}
}

fn no_controller() -> Error {
	ClientError::Internal { message: "no controller accepted the command".into() }.into()
}
