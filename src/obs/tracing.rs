// std
use std::time::Instant;
// self
use crate::{
	_prelude::*,
	obs::{self, FlowKind, FlowOutcome},
};

/// Future returned by [`FlowSpan::instrument`]; a plain passthrough without `tracing`.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Future returned by [`FlowSpan::instrument`]; a plain passthrough without `tracing`.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// One observed attempt of a [`FlowKind`].
///
/// Creating the span counts an attempt. [`FlowSpan::finish`] counts the outcome, records the
/// elapsed time, and stamps both onto the `msal.flow` span when `tracing` is enabled.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	kind: FlowKind,
	started: Instant,
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Opens a span for `kind` at `stage` and counts the attempt.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		obs::record_flow_outcome(kind, FlowOutcome::Attempt);

		#[cfg(feature = "tracing")]
		let span = tracing::info_span!(
			"msal.flow",
			flow = kind.as_str(),
			stage,
			correlation_id = tracing::field::Empty,
			outcome = tracing::field::Empty,
			elapsed_ms = tracing::field::Empty,
		);
		#[cfg(not(feature = "tracing"))]
		let _ = stage;

		Self {
			kind,
			started: Instant::now(),
			#[cfg(feature = "tracing")]
			span,
		}
	}

	/// Tags the span with the request's correlation id.
	pub fn with_correlation_id(self, correlation_id: Uuid) -> Self {
		#[cfg(feature = "tracing")]
		self.span.record("correlation_id", tracing::field::display(correlation_id));
		#[cfg(not(feature = "tracing"))]
		let _ = correlation_id;

		self
	}

	/// Flow this span observes.
	pub fn kind(&self) -> FlowKind {
		self.kind
	}

	/// Runs `fut` inside the span without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			tracing::Instrument::instrument(fut, self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}

	/// Closes the attempt with `outcome`.
	pub fn finish(&self, outcome: FlowOutcome) {
		let elapsed = self.started.elapsed();

		obs::record_flow_outcome(self.kind, outcome);
		obs::record_flow_duration(self.kind, outcome, elapsed);

		#[cfg(feature = "tracing")]
		{
			self.span.record("outcome", outcome.as_str());
			self.span.record("elapsed_ms", elapsed.as_millis() as u64);
		}
	}

	/// [`Self::finish`] with the outcome derived from `result`.
	pub fn finish_with<T>(&self, result: &Result<T>) {
		self.finish(FlowOutcome::of(result));
	}
}

/// Emits a debug event in the current span.
pub fn debug(message: impl Display) {
	#[cfg(feature = "tracing")]
	tracing::debug!("{message}");
	#[cfg(not(feature = "tracing"))]
	let _ = message;
}

/// Emits a warning event in the current span.
pub fn warn(message: impl Display) {
	#[cfg(feature = "tracing")]
	tracing::warn!("{message}");
	#[cfg(not(feature = "tracing"))]
	let _ = message;
}
