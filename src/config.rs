//! Settings of the plugin subsystem, read from TOML.
//!
//! ```toml
//! plugins_enabled = true
//! require_auth = true
//! required_role = "developer"
//! source_dir = "plugins/src"
//! output_dir = "plugins/compiled"
//! blacklist_prefixes = [ "host.server", "host.endpoints" ]
//!
//! [limits]
//! fuel = 1000000000
//! timeout_ms = 5000
//! ```
//!
//! Every key is optional; the defaults keep plugins switched off.

use std::path::{ Component, Path, PathBuf };
use serde::{ Deserialize, Serialize };
use thiserror::Error ;

use crate::error::{ ErrorCategory, ReportedError };
use crate::host::ExecutionLimits ;
use crate::policy::SandboxPolicy ;



/// Namespaces no unit may be resolved from unless configured otherwise.
pub const DEFAULT_BLACKLIST: [&str; 2] = [ "host.server", "host.endpoints" ];

#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default, deny_unknown_fields )]
pub struct Settings {
	/// Master switch; every service operation fails with `Disabled` while off.
	pub plugins_enabled: bool,
	/// Whether service operations require an authenticated account.
	pub require_auth: bool,
	/// Role the account must hold when auth is required. Empty means any account.
	pub required_role: String,
	/// Whether the namespace blacklist is enforced.
	pub sandbox_enabled: bool,
	pub source_dir: PathBuf,
	pub output_dir: PathBuf,
	pub blacklist_prefixes: Vec<String>,
	/// Threads compiling units during a reload.
	pub compile_workers: usize,
	pub limits: ExecutionLimits,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			plugins_enabled: false,
			require_auth: false,
			required_role: "developer".to_string(),
			sandbox_enabled: true,
			source_dir: PathBuf::from( "plugins/src" ),
			output_dir: PathBuf::from( "plugins/compiled" ),
			blacklist_prefixes: DEFAULT_BLACKLIST.iter().map(| prefix | prefix.to_string() ).collect(),
			compile_workers: std::thread::available_parallelism().map_or( 1, usize::from ).min( 4 ),
			limits: ExecutionLimits::default(),
		}
	}
}

/// Errors raised while reading or checking [`Settings`].
#[derive( Error, Debug )]
pub enum ConfigurationError {
	#[error( "Failed to read settings from '{}': {source}", path.display() )]
	Read { path: PathBuf, #[source] source: std::io::Error },
	#[error( "Malformed settings: {0}" )]
	Parse( #[from] toml::de::Error ),
	#[error( "Invalid settings: {0}" )]
	Invalid( String ),
}

impl ReportedError for ConfigurationError {
	fn category( &self ) -> ErrorCategory { ErrorCategory::Configuration }
	fn public_message( &self ) -> String { match self {
		Self::Read { source, .. } => format!( "Failed to read settings: {}", source.kind() ),
		other => other.to_string(),
	}}
}

impl Settings {

	/// Reads and validates settings from a TOML file.
	///
	/// # Errors
	/// Fails if the file cannot be read, is not valid TOML for these settings, or
	/// does not pass [`Settings::validate`].
	pub fn load( path: impl AsRef<Path> ) -> Result<Self, ConfigurationError> {
		let path = path.as_ref();
		let text = std::fs::read_to_string( path )
			.map_err(| source | ConfigurationError::Read { path: path.to_path_buf(), source })?;
		Self::from_toml_str( &text )
	}

	/// Parses and validates settings from TOML text.
	///
	/// # Errors
	/// See [`Settings::load`].
	pub fn from_toml_str( text: &str ) -> Result<Self, ConfigurationError> {
		let settings: Self = toml::from_str( text )?;
		settings.validate()?;
		Ok( settings )
	}

	/// Checks the invariants deserialisation cannot express.
	///
	/// The output directory is wiped by clean reloads, so it must neither be nor
	/// contain nor sit inside the source directory.
	///
	/// # Errors
	/// Returns [`ConfigurationError::Invalid`] naming the first offending setting.
	pub fn validate( &self ) -> Result<(), ConfigurationError> {
		let invalid = | message: &str | Err( ConfigurationError::Invalid( message.to_string() ));
		if self.compile_workers == 0 { return invalid( "compile_workers must be at least 1" )}
		if self.limits.fuel == 0 { return invalid( "limits.fuel must be positive" )}
		if self.limits.timeout_ms == 0 { return invalid( "limits.timeout_ms must be positive" )}
		if self.limits.memory_bytes == 0 { return invalid( "limits.memory_bytes must be positive" )}
		if self.limits.epoch_tick_ms == 0 { return invalid( "limits.epoch_tick_ms must be positive" )}
		if self.source_dir.as_os_str().is_empty() { return invalid( "source_dir must not be empty" )}
		if self.output_dir.as_os_str().is_empty() { return invalid( "output_dir must not be empty" )}
		let source = absolute( &self.source_dir );
		let output = absolute( &self.output_dir );
		if source.starts_with( &output ) || output.starts_with( &source ) {
			return invalid( "source_dir and output_dir must not coincide or contain one another" );
		}
		Ok(())
	}

	/// The blacklist in effect: empty when the sandbox is disabled.
	pub fn sandbox_policy( &self ) -> SandboxPolicy {
		match self.sandbox_enabled {
			true => SandboxPolicy::new( self.blacklist_prefixes.iter() ),
			false => SandboxPolicy::default(),
		}
	}

}

/// Absolute form of `path` with `.` and `..` folded away lexically, so aliases
/// of one directory compare equal.
fn absolute( path: &Path ) -> PathBuf {
	let absolute = std::path::absolute( path ).unwrap_or_else(|_| path.to_path_buf() );
	absolute.components().fold( PathBuf::new(), | mut normal, component | {
		match component {
			Component::CurDir => {},
			Component::ParentDir => { normal.pop(); },
			other => normal.push( other ),
		}
		normal
	})
}

#[cfg( test )]
mod tests {
	use super::* ;

	#[test]
	fn defaults_keep_plugins_off() {
		let settings = Settings::from_toml_str( "" ).unwrap();
		assert!( !settings.plugins_enabled );
		assert!( !settings.require_auth );
		assert_eq!( settings.required_role, "developer" );
		assert!( settings.sandbox_policy().is_forbidden( "host.server.Admin" ));
	}

	#[test]
	fn disabled_sandbox_forbids_nothing() {
		let settings = Settings::from_toml_str( "sandbox_enabled = false" ).unwrap();
		assert!( settings.sandbox_policy().prefixes().is_empty() );
	}

	#[test]
	fn nested_directories_are_rejected() {
		let result = Settings::from_toml_str( "source_dir = \"units\"\noutput_dir = \"units/out\"" );
		assert!( matches!( result, Err( ConfigurationError::Invalid( _ ))));
	}

	#[test]
	fn aliased_directories_are_rejected() {
		let same = Settings {
			source_dir: PathBuf::from( "units/src" ),
			output_dir: PathBuf::from( "units/tmp/../src" ),
			..Settings::default()
		};
		assert!( matches!( same.validate(), Err( ConfigurationError::Invalid( _ ))));

		let nested = Settings {
			source_dir: PathBuf::from( "units/./src" ),
			output_dir: PathBuf::from( "units/src/../src/out" ),
			..Settings::default()
		};
		assert!( matches!( nested.validate(), Err( ConfigurationError::Invalid( _ ))));

		let siblings = Settings {
			source_dir: PathBuf::from( "units/src" ),
			output_dir: PathBuf::from( "units/src/../out" ),
			..Settings::default()
		};
		assert!( siblings.validate().is_ok() );
	}

	#[test]
	fn zero_workers_are_rejected() {
		let result = Settings::from_toml_str( "compile_workers = 0" );
		assert!( matches!( result, Err( ConfigurationError::Invalid( _ ))));
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!( matches!( Settings::from_toml_str( "plugins_enabeld = true" ), Err( ConfigurationError::Parse( _ ))));
	}

	#[test]
	fn limits_are_read_from_their_table() {
		let settings = Settings::from_toml_str( "[limits]\nfuel = 10\ntimeout_ms = 20" ).unwrap();
		assert_eq!( settings.limits.fuel, 10 );
		assert_eq!( settings.limits.timeout_ms, 20 );
		assert_eq!( settings.limits.epoch_tick_ms, ExecutionLimits::default().epoch_tick_ms );
	}
}
