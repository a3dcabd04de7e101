//! Resolution of qualified names to runnable units.
//!
//! The [`IsolationLoader`] owns the one resolution cache of the process. Entries
//! are only ever added by a resolution; every mutation of the artifact directory
//! is followed by [`IsolationLoader::reset`], which drops the whole map. A cached
//! handle is never patched in place because the artifact behind it may have been
//! replaced or deleted.

use std::collections::HashMap ;
use std::path::{ Path, PathBuf };
use std::sync::Arc ;
use parking_lot::RwLock ;
use pipe_trait::Pipe ;
use thiserror::Error ;
use tracing::{ debug, info, warn };
use wasmtime::{ Engine, ExternType, InstancePre, Linker, Module };

use crate::compiler::artifact_path ;
use crate::error::{ ErrorCategory, ReportedError };
use crate::namespace::QualifiedName ;
use crate::policy::SandboxPolicy ;
use crate::sandbox::{ host_linker, UnitContext, EXECUTE_EXPORT };



/// A resolved unit, ready to be invoked any number of times.
///
/// Each invocation instantiates the pre-linked module into a fresh store, so
/// handles can be shared freely between threads and outlive a cache reset.
pub struct UnitHandle {
	qualified_name: QualifiedName,
	artifact: PathBuf,
	instance_pre: InstancePre<UnitContext>,
}

impl UnitHandle {
	#[inline] pub fn qualified_name( &self ) -> &QualifiedName { &self.qualified_name }
	#[inline] pub fn artifact( &self ) -> &Path { &self.artifact }
	#[inline] pub(crate) fn instance_pre( &self ) -> &InstancePre<UnitContext> { &self.instance_pre }
}

impl std::fmt::Debug for UnitHandle {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "UnitHandle" )
			.field( "qualified_name", &self.qualified_name )
			.field( "artifact", &self.artifact )
			.field( "instance_pre", &"<InstancePre>" )
			.finish()
	}
}

/// Errors that can occur while resolving a qualified name.
#[derive( Error, Debug )]
pub enum ResolveError {
	/// The name falls under a blacklisted namespace prefix.
	#[error( "Namespace of '{name}' is forbidden by sandbox entry '{prefix}'" )]
	ForbiddenNamespace { name: String, prefix: String },
	/// No artifact exists for the name.
	#[error( "Unit '{0}' not found" )]
	NotFound( String ),
	/// An artifact exists but cannot be turned into a unit.
	#[error( "Unit '{name}' could not be loaded: {reason}" )]
	Load { name: String, reason: String },
}

impl ReportedError for ResolveError {
	fn category( &self ) -> ErrorCategory { match self {
		Self::ForbiddenNamespace { .. } => ErrorCategory::ForbiddenNamespace,
		Self::NotFound( _ ) => ErrorCategory::PluginNotFound,
		Self::Load { .. } => ErrorCategory::PluginLoad,
	}}
	fn public_message( &self ) -> String { match self {
		Self::ForbiddenNamespace { name, .. } => format!( "Unit '{}' is in a forbidden namespace", name ),
		Self::NotFound( name ) => format!( "Unit '{}' not found", name ),
		Self::Load { name, .. } => format!( "Unit '{}' could not be loaded", name ),
	}}
}

#[derive( Default )]
struct LoaderCache {
	generation: u64,
	units: HashMap<QualifiedName, Arc<UnitHandle>>,
}

/// Resolves qualified names against an artifact directory, behind a namespace blacklist.
pub struct IsolationLoader {
	engine: Engine,
	linker: Linker<UnitContext>,
	output_dir: PathBuf,
	policy: SandboxPolicy,
	cache: RwLock<LoaderCache>,
}

impl std::fmt::Debug for IsolationLoader {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "IsolationLoader" )
			.field( "output_dir", &self.output_dir )
			.field( "policy", &self.policy )
			.field( "cached", &self.cached() )
			.finish_non_exhaustive()
	}
}

impl IsolationLoader {

	/// # Errors
	/// Fails if the host functions cannot be registered with the engine.
	pub fn new( engine: Engine, output_dir: impl Into<PathBuf>, policy: SandboxPolicy ) -> Result<Self, wasmtime::Error> {
		let linker = host_linker( &engine )?;
		Ok( Self {
			engine,
			linker,
			output_dir: output_dir.into(),
			policy,
			cache: RwLock::new( LoaderCache::default() ),
		})
	}

	#[inline] pub fn output_dir( &self ) -> &Path { &self.output_dir }
	#[inline] pub fn policy( &self ) -> &SandboxPolicy { &self.policy }

	/// Number of handles currently cached.
	pub fn cached( &self ) -> usize { self.cache.read().units.len() }

	/// Resolves `qualified_name` to a unit handle.
	///
	/// Blacklisted names are refused before anything else happens, so no artifact is
	/// ever probed for them. Cached handles are returned as they are; otherwise the
	/// artifact is loaded, checked against the unit contract and cached.
	///
	/// # Errors
	/// - [`ResolveError::ForbiddenNamespace`] if the name matches a blacklist entry
	/// - [`ResolveError::NotFound`] if the name is malformed or has no artifact
	/// - [`ResolveError::Load`] if the artifact does not compile, imports anything
	/// 	outside the host module, or lacks a conforming `execute` export
	pub fn resolve( &self, qualified_name: &str ) -> Result<Arc<UnitHandle>, ResolveError> {

		if let Some( prefix ) = self.policy.violation( qualified_name ) {
			warn!( unit = qualified_name, prefix, "refused resolution of forbidden namespace" );
			return Err( ResolveError::ForbiddenNamespace { name: qualified_name.to_string(), prefix: prefix.to_string() });
		}

		let name = QualifiedName::parse( qualified_name )
			.ok_or_else(|| ResolveError::NotFound( qualified_name.to_string() ))?;

		let generation = {
			let cache = self.cache.read();
			if let Some( handle ) = cache.units.get( &name ) {
				debug!( unit = %name, "unit cache hit" );
				return Ok( Arc::clone( handle ));
			}
			cache.generation
		};

		let handle = self.instantiate( name )?.pipe( Arc::new );

		let mut cache = self.cache.write();
		// a reset while loading means the artifact read may already be stale
		if cache.generation != generation { return Ok( handle )}
		Ok( Arc::clone( cache.units.entry( handle.qualified_name.clone() ).or_insert( handle )))

	}

	/// Drops every cached handle; the next resolutions load from disk again.
	///
	/// Handles already handed out stay valid.
	pub fn reset( &self ) {
		let mut cache = self.cache.write();
		let dropped = cache.units.len();
		cache.units.clear();
		cache.generation = cache.generation.wrapping_add( 1 );
		info!( dropped, generation = cache.generation, "unit cache reset" );
	}

	fn instantiate( &self, name: QualifiedName ) -> Result<UnitHandle, ResolveError> {

		let artifact = artifact_path( &self.output_dir, &name );
		if !artifact.is_file() { return Err( ResolveError::NotFound( name.to_string() ))}

		let load_error = | reason: String | ResolveError::Load { name: name.to_string(), reason };

		let module = Module::from_file( &self.engine, &artifact ).map_err(| err | load_error( err.to_string() ))?;
		check_contract( &module ).map_err( load_error )?;
		let instance_pre = self.linker.instantiate_pre( &module ).map_err(| err | load_error( err.to_string() ))?;

		info!( unit = %name, artifact = %artifact.display(), "loaded unit" );
		Ok( UnitHandle { qualified_name: name, artifact, instance_pre })

	}

}

/// A unit must export `execute` as a function taking and returning nothing.
fn check_contract( module: &Module ) -> Result<(), String> {
	match module.get_export( EXECUTE_EXPORT ) {
		Some( ExternType::Func( func )) if func.params().len() == 0 && func.results().len() == 0 => Ok(()),
		Some( ExternType::Func( _ )) => Err( format!( "export '{}' must have type [] -> []", EXECUTE_EXPORT )),
		Some( _ ) => Err( format!( "export '{}' is not a function", EXECUTE_EXPORT )),
		None => Err( format!( "missing export '{}'", EXECUTE_EXPORT )),
	}
}
