//! Boundary to the markup-to-HTML converter.
//!
//! The converter is opaque to this crate: it may be slow, may fail, and is not
//! assumed to be thread-safe. Each worker builds its own handle through an
//! [`EngineFactory`] and never shares it, so handles must be `Send` but never
//! need to be `Sync`.

use thiserror::Error;

/// Why a block could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
	/// The engine reported a failure.
	#[error("render engine failed: {0}")]
	Engine(String),
	/// The engine produced output it considers unusable.
	#[error("render engine returned invalid output: {0}")]
	InvalidOutput(String),
	/// The engine panicked; its handle has been discarded.
	#[error("render engine panicked: {0}")]
	Panicked(String),
}

/// Converts one block of markup into an HTML fragment.
pub trait RenderEngine: Send {
	fn render(&mut self, source: &str) -> Result<String, RenderError>;
}

impl<F> RenderEngine for F
where
	F: FnMut(&str) -> Result<String, RenderError> + Send,
{
	fn render(&mut self, source: &str) -> Result<String, RenderError> {
		self(source)
	}
}

/// Builds engine handles, once per worker context.
pub trait EngineFactory: Send + Sync {
	fn create(&self) -> Box<dyn RenderEngine>;
}

impl<F, E> EngineFactory for F
where
	F: Fn() -> E + Send + Sync,
	E: RenderEngine + 'static,
{
	fn create(&self) -> Box<dyn RenderEngine> {
		Box::new(self())
	}
}

/// Fragment shown in place of a block the engine could not render.
///
/// The raw source is escaped so the preview stays readable and inert.
pub fn fallback_fragment(source: &str, error: &RenderError) -> String {
	format!(
		"<pre class=\"preview-render-error\" title=\"{}\">{}</pre>",
		html_escape(&error.to_string()),
		html_escape(source)
	)
}

pub fn html_escape(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#39;"),
			_ => out.push(c),
		}
	}
	out
}
