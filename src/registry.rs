//! Orchestration of source store, compiler, loader and execution host.
//!
//! All mutations go through the [`PluginRegistry`], which keeps two locks:
//!
//! - the **writer** mutex serialises mutations end to end, so at most one reload,
//! 	upload or delete runs at a time;
//! - the **gate** is taken shared by resolution and exclusively only for the short
//! 	moment compiled output is promoted into the artifact directory and the loader
//! 	cache is reset.
//!
//! Compilation always targets a staging directory next to the artifact directory,
//! outside the gate, so executions keep resolving while units compile.

use std::path::{ Path, PathBuf };
use std::sync::Arc ;
use itertools::Itertools ;
use parking_lot::{ Mutex, RwLock };
use pipe_trait::Pipe ;
use rayon::iter::{ ParallelBridge, ParallelIterator };
use thiserror::Error ;
use tracing::{ info, warn };

use crate::compiler::{ CompileError, CompiledUnit, Compiler, CompilerBackend, WatBackend, ARTIFACT_EXTENSION };
use crate::config::{ ConfigurationError, Settings };
use crate::error::{ ErrorCategory, ReportedError };
use crate::host::{ ExecutionError, ExecutionHost, ExecutionResult };
use crate::loader::{ IsolationLoader, ResolveError, UnitHandle };
use crate::namespace::QualifiedName ;
use crate::sandbox::{ sandbox_engine, Payload };
use crate::source::{ SourceStore, StoreError };



/// Errors that can occur while operating the registry.
#[derive( Error, Debug )]
pub enum RegistryError {
	#[error( "{0}" )] Configuration( #[from] ConfigurationError ),
	#[error( "{0}" )] Compile( #[from] CompileError ),
	#[error( "{0}" )] Store( #[from] StoreError ),
	#[error( "{0}" )] Resolve( #[from] ResolveError ),
	#[error( "{0}" )] Execution( #[from] ExecutionError ),
	/// The sandbox engine or one of its workers could not be set up.
	#[error( "Sandbox setup failed: {0}" )] Setup( String ),
	/// The artifact directory could not be prepared or updated.
	#[error( "{context} '{}': {source}", path.display() )]
	Structural { context: &'static str, path: PathBuf, #[source] source: std::io::Error },
}

impl RegistryError {
	/// Failures confined to a single unit; a reload skips these and carries on.
	fn is_unit_failure( &self ) -> bool { match self {
		Self::Compile( err ) => err.is_unit_error(),
		Self::Store( StoreError::Io { .. }) => true,
		_ => false,
	}}
}

impl ReportedError for RegistryError {
	fn category( &self ) -> ErrorCategory { match self {
		Self::Configuration( err ) => err.category(),
		Self::Compile( err ) => err.category(),
		Self::Store( err ) => err.category(),
		Self::Resolve( err ) => err.category(),
		Self::Execution( err ) => err.category(),
		Self::Setup( _ ) | Self::Structural { .. } => ErrorCategory::Internal,
	}}
	fn public_message( &self ) -> String { match self {
		Self::Configuration( err ) => err.public_message(),
		Self::Compile( err ) => err.public_message(),
		Self::Store( err ) => err.public_message(),
		Self::Resolve( err ) => err.public_message(),
		Self::Execution( err ) => err.public_message(),
		Self::Setup( _ ) => "Plugin sandbox unavailable".to_string(),
		Self::Structural { context, .. } => context.to_string(),
	}}
}

fn structural<'a>( context: &'static str, path: &'a Path ) -> impl FnOnce( std::io::Error ) -> RegistryError + 'a {
	move | source | RegistryError::Structural { context, path: path.to_path_buf(), source }
}

/// What happened to the source text after a successful compilation.
#[derive( Debug )]
pub enum StoreOutcome {
	Stored( PathBuf ),
	/// Persisting was not requested.
	Skipped,
	/// The unit is compiled and live, but its source could not be persisted, so
	/// the next clean reload will drop it.
	Failed( StoreError ),
}

/// Result of [`PluginRegistry::compile_and_store`].
#[derive( Debug )]
pub struct CompileReport {
	pub unit: CompiledUnit,
	pub stored: StoreOutcome,
}

impl CompileReport {
	#[inline] pub fn is_stored( &self ) -> bool { matches!( self.stored, StoreOutcome::Stored( _ ))}
}

/// Result of [`PluginRegistry::delete_source`].
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct DeleteReport {
	/// Source files removed.
	pub deleted: usize,
	/// Units compiled by the reload that followed.
	pub active: usize,
}

/// The plugin subsystem: stored sources, compiled artifacts, the resolution cache
/// and the execution host, kept consistent with each other.
pub struct PluginRegistry {
	store: SourceStore,
	compiler: Compiler,
	loader: IsolationLoader,
	host: ExecutionHost,
	output_dir: PathBuf,
	gate: RwLock<()>,
	writer: Mutex<()>,
	pool: rayon::ThreadPool,
}

impl std::fmt::Debug for PluginRegistry {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "PluginRegistry" )
			.field( "store", &self.store )
			.field( "loader", &self.loader )
			.field( "host", &self.host )
			.field( "workers", &self.pool.current_num_threads() )
			.finish_non_exhaustive()
	}
}

impl PluginRegistry {

	/// Builds a registry compiling WebAssembly text with [`WatBackend`].
	///
	/// Nothing is compiled yet; call [`PluginRegistry::load_all`] to pick up
	/// stored sources.
	///
	/// # Errors
	/// Fails on invalid settings, when either directory cannot be created, or when
	/// the sandbox cannot be set up.
	pub fn new( settings: &Settings ) -> Result<Self, RegistryError> {
		let engine = sandbox_engine().map_err(| err | RegistryError::Setup( err.to_string() ))?;
		Self::with_engine( settings, engine.clone(), WatBackend::new( engine ))
	}

	/// Like [`PluginRegistry::new`], with a custom compiler backend.
	///
	/// The backend must produce WebAssembly binaries loadable by the sandbox engine.
	///
	/// # Errors
	/// See [`PluginRegistry::new`].
	pub fn with_backend( settings: &Settings, backend: impl CompilerBackend + 'static ) -> Result<Self, RegistryError> {
		let engine = sandbox_engine().map_err(| err | RegistryError::Setup( err.to_string() ))?;
		Self::with_engine( settings, engine, backend )
	}

	fn with_engine( settings: &Settings, engine: wasmtime::Engine, backend: impl CompilerBackend + 'static ) -> Result<Self, RegistryError> {

		settings.validate()?;

		let store = SourceStore::open( &settings.source_dir )?;
		std::fs::create_dir_all( &settings.output_dir )
			.map_err( structural( "Failed to create artifact directory", &settings.output_dir ))?;

		let loader = IsolationLoader::new( engine.clone(), &settings.output_dir, settings.sandbox_policy() )
			.map_err(| err | RegistryError::Setup( err.to_string() ))?;
		let host = ExecutionHost::new( engine, settings.limits )
			.map_err(| err | RegistryError::Setup( err.to_string() ))?;
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads( settings.compile_workers )
			.thread_name(| index | format!( "wasm-unit-compile-{}", index ))
			.build()
			.map_err(| err | RegistryError::Setup( err.to_string() ))?;

		Ok( Self {
			store,
			compiler: Compiler::new( backend ),
			loader,
			host,
			output_dir: settings.output_dir.clone(),
			gate: RwLock::new(()),
			writer: Mutex::new(()),
			pool,
		})

	}

	#[inline] pub fn store( &self ) -> &SourceStore { &self.store }
	#[inline] pub fn loader( &self ) -> &IsolationLoader { &self.loader }
	#[inline] pub fn host( &self ) -> &ExecutionHost { &self.host }
	#[inline] pub fn output_dir( &self ) -> &Path { &self.output_dir }

	/// Compiles every stored source and makes the results live.
	///
	/// With `clean_first` the artifact directory ends up holding exactly the units
	/// compiled now; otherwise they are merged over the existing artifacts. Units
	/// that fail to compile are logged and skipped. Returns how many compiled.
	///
	/// # Errors
	/// Fails, without touching the artifact directory, when the source directory
	/// cannot be enumerated or the compiled output cannot be written.
	pub fn load_all( &self, clean_first: bool ) -> Result<usize, RegistryError> {
		let _writer = self.writer.lock();
		self.reload( clean_first )
	}

	fn reload( &self, clean_first: bool ) -> Result<usize, RegistryError> {

		let staging = self.staging()?;
		let sources = self.store.list_all()?;

		let ( units, failures ) = self.pool
			.install(|| sources
				.par_bridge()
				.map(| source | source
					.map_err( RegistryError::from )
					.and_then(| unit | self.compiler
						.compile( unit.simple_name(), unit.text(), staging.path() )
						.map_err( RegistryError::from )))
				.collect::<Vec<_>>())
			.into_iter()
			.partition_result::<Vec<_>, Vec<_>, _, _>();

		let mut skipped = 0 ;
		for failure in failures {
			if !failure.is_unit_failure() { return Err( failure )}
			warn!( error = %failure, "skipping unit" );
			skipped += 1 ;
		}

		self.promote( staging, clean_first )?;
		info!( compiled = units.len(), skipped, clean_first, "reloaded units" );
		Ok( units.len() )

	}

	/// Resolves a qualified name to a runnable unit.
	///
	/// # Errors
	/// The loader's [`ResolveError`], unchanged.
	pub fn resolve( &self, qualified_name: &str ) -> Result<Arc<UnitHandle>, ResolveError> {
		let _gate = self.gate.read();
		self.loader.resolve( qualified_name )
	}

	/// Compiles a single unit, makes it live and optionally persists its source.
	///
	/// A failed compilation changes nothing. The source is only persisted after the
	/// unit compiled; a failure to persist is reported in the returned
	/// [`CompileReport`] rather than as an error, since the unit is live by then.
	///
	/// # Errors
	/// - [`RegistryError::Compile`] if the unit fails to compile
	/// - [`RegistryError::Structural`] if the artifact cannot be promoted
	pub fn compile_and_store( &self, simple_name: &str, text: &str, store_source: bool ) -> Result<CompileReport, RegistryError> {

		let _writer = self.writer.lock();

		let staging = self.staging()?;
		let unit = self.compiler
			.compile( simple_name, text, staging.path() )?
			.promoted_to( &self.output_dir );
		self.promote( staging, false )?;

		let stored = match store_source {
			false => StoreOutcome::Skipped,
			true => match self.store.put( simple_name, text ) {
				Ok( path ) => StoreOutcome::Stored( path ),
				Err( err ) => {
					warn!( unit = %unit.qualified_name(), error = %err, "unit compiled but its source was not stored" );
					StoreOutcome::Failed( err )
				}
			},
		};

		Ok( CompileReport { unit, stored })

	}

	/// Deletes every stored source named `simple_name`, then performs a clean reload
	/// so the artifacts match the remaining sources.
	///
	/// An absent or blank name deletes nothing but still reloads.
	///
	/// # Errors
	/// Fails when the store cannot delete or the reload fails.
	pub fn delete_source( &self, simple_name: Option<&str> ) -> Result<DeleteReport, RegistryError> {
		let _writer = self.writer.lock();
		let deleted = self.store.delete_by_name( simple_name )?;
		let active = self.reload( true )?;
		Ok( DeleteReport { deleted, active })
	}

	/// Invokes an already resolved unit.
	///
	/// # Errors
	/// See [`ExecutionHost::invoke`].
	pub fn execute( &self, handle: &UnitHandle, payload: Payload ) -> Result<ExecutionResult, ExecutionError> {
		self.host.invoke( handle, payload )
	}

	/// Resolves and invokes a unit in one go.
	///
	/// The gate is released before the unit runs, so a reload never waits for
	/// executions to finish.
	///
	/// # Errors
	/// [`RegistryError::Resolve`] or [`RegistryError::Execution`].
	pub fn execute_named( &self, qualified_name: &str, payload: Payload ) -> Result<ExecutionResult, RegistryError> {
		let handle = self.resolve( qualified_name )?;
		self.execute( &handle, payload ).map_err( RegistryError::from )
	}

	/// Qualified names of every artifact currently in the artifact directory, sorted.
	///
	/// # Errors
	/// Fails when the artifact directory cannot be read.
	pub fn compiled_units( &self ) -> Result<Vec<QualifiedName>, RegistryError> {
		let _gate = self.gate.read();
		if !self.output_dir.is_dir() { return Ok( Vec::new() )}
		let read_dir = | dir: &Path | std::fs::read_dir( dir )
			.map_err( structural( "Failed to read artifact directory", &self.output_dir ));
		read_dir( &self.output_dir )?
			.flatten()
			.filter(| entry | entry.path().is_dir() )
			.map(| namespace_dir | read_dir( &namespace_dir.path() ).map(| entries | ( namespace_dir, entries )))
			.collect::<Result<Vec<_>, _>>()?
			.into_iter()
			.flat_map(|( namespace_dir, entries )| {
				let namespace = namespace_dir.file_name();
				entries.flatten().filter_map( move | entry | {
					let path = entry.path();
					if path.extension()?.to_str()? != ARTIFACT_EXTENSION { return None }
					let simple_name = path.file_stem()?.to_str()?.to_string();
					QualifiedName::new( namespace.to_str()?, simple_name )
				})
			})
			.sorted()
			.collect::<Vec<_>>()
			.pipe( Ok )
	}

	fn staging( &self ) -> Result<tempfile::TempDir, RegistryError> {
		let parent = match self.output_dir.parent() {
			Some( parent ) if !parent.as_os_str().is_empty() => parent,
			_ => Path::new( "." ),
		};
		tempfile::Builder::new()
			.prefix( ".staging-" )
			.tempdir_in( parent )
			.map_err( structural( "Failed to create staging directory", parent ))
	}

	/// Moves staged artifacts into place and resets the loader cache, as one step
	/// under the exclusive gate. A failed promotion leaves the cache untouched.
	fn promote( &self, staging: tempfile::TempDir, replace: bool ) -> Result<(), RegistryError> {

		let _gate = self.gate.write();

		match replace {
			true => self.replace_output( staging.path() )?,
			false => self.merge_output( staging.path() )?,
		}
		self.loader.reset();
		Ok(())

	}

	fn replace_output( &self, staged: &Path ) -> Result<(), RegistryError> {
		if self.output_dir.exists() {
			std::fs::remove_dir_all( &self.output_dir )
				.map_err( structural( "Failed to clear artifact directory", &self.output_dir ))?;
		}
		std::fs::rename( staged, &self.output_dir )
			.map_err( structural( "Failed to promote artifacts", &self.output_dir ))
	}

	fn merge_output( &self, staged: &Path ) -> Result<(), RegistryError> {
		let read_dir = | dir: &Path | std::fs::read_dir( dir )
			.map_err( structural( "Failed to read staged artifacts", staged ));
		for namespace_dir in read_dir( staged )?.flatten() {
			let target_dir = self.output_dir.join( namespace_dir.file_name() );
			std::fs::create_dir_all( &target_dir )
				.map_err( structural( "Failed to create artifact directory", &target_dir ))?;
			for artifact in read_dir( &namespace_dir.path() )?.flatten() {
				let target = target_dir.join( artifact.file_name() );
				std::fs::rename( artifact.path(), &target )
					.map_err( structural( "Failed to promote artifacts", &target ))?;
			}
		}
		Ok(())
	}

}
