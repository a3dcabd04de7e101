//! Error categories shared by every boundary-facing operation.
//!
//! Each component has its own error enum. What crosses the trust boundary is only
//! the [`ErrorCategory`] and the sanitised [`ReportedError::public_message`]; the
//! full error (paths, wasmtime internals) stays in the logs.

use serde::{ Deserialize, Serialize };



/// Typed category of a failure, as reported to callers of the owning service.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize )]
#[serde( rename_all = "snake_case" )]
pub enum ErrorCategory {
	/// Invalid settings; fatal for startup or reload.
	Configuration,
	/// The unit's source failed to compile.
	Compile,
	/// The unit's source declares no usable namespace.
	MissingNamespace,
	/// Resolution refused by the sandbox blacklist.
	ForbiddenNamespace,
	/// No compiled unit with that qualified name.
	PluginNotFound,
	/// An artifact exists but cannot be instantiated or breaks the contract.
	PluginLoad,
	/// The unit failed while executing.
	PluginExecution,
	/// Source persistence failed.
	Store,
	/// Plugins are switched off in the settings.
	Disabled,
	/// Authentication failed or the account lacks the required role.
	Unauthorized,
	/// Required request parameters are missing.
	BadRequest,
	/// Anything else; details are only logged.
	Internal,
}

impl ErrorCategory {

	/// Status code hint for an HTTP transport.
	pub fn status_hint( self ) -> u16 { match self {
		Self::Disabled | Self::BadRequest | Self::Compile | Self::MissingNamespace => 400,
		Self::Unauthorized => 401,
		Self::ForbiddenNamespace => 403,
		Self::PluginNotFound => 404,
		Self::Configuration | Self::PluginLoad | Self::PluginExecution | Self::Store | Self::Internal => 500,
	}}

}

impl std::fmt::Display for ErrorCategory {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result { std::fmt::Debug::fmt( self, f )}
}

/// An error that can be reported across the trust boundary.
pub trait ReportedError: std::error::Error {

	fn category( &self ) -> ErrorCategory ;

	/// Message safe to hand to the caller. Defaults to the `Display` output, so
	/// implementors override it whenever `Display` may leak internals.
	fn public_message( &self ) -> String { self.to_string() }

}
