//! Source → artifact compilation.
//!
//! The compiler owns the naming rules (namespace scan, artifact layout) while the
//! translation itself sits behind [`CompilerBackend`], so the toolchain can be
//! swapped without touching the registry. The shipped backend, [`WatBackend`],
//! turns WebAssembly text into a validated WebAssembly binary.

use std::io::Write ;
use std::path::{ Path, PathBuf };
use std::sync::Arc ;
use thiserror::Error ;
use tracing::{ debug, info };
use wasmtime::{ Engine, Module };

use crate::error::{ ErrorCategory, ReportedError };
use crate::namespace::{ is_valid_simple_name, scan_namespace, QualifiedName };



/// Extension of compiled artifacts.
pub const ARTIFACT_EXTENSION: &str = "bin" ;

/// Where the artifact of `unit` lives under `output_dir`: `<namespace>/<SimpleName>.bin`.
pub fn artifact_path( output_dir: &Path, unit: &QualifiedName ) -> PathBuf {
	output_dir
		.join( unit.namespace() )
		.join( format!( "{}.{}", unit.simple_name(), ARTIFACT_EXTENSION ))
}

/// A toolchain turning unit source text into artifact bytes.
pub trait CompilerBackend: Send + Sync {
	/// Translates `source` into the bytes of the artifact for `unit`.
	///
	/// # Errors
	/// Returns the toolchain diagnostics when translation fails. A backend must never
	/// report failure with an empty diagnostics string.
	fn compile( &self, unit: &QualifiedName, source: &str ) -> Result<Vec<u8>, String> ;
}

/// Compiles WebAssembly text and validates the result against the sandbox engine.
#[derive( Clone )]
pub struct WatBackend {
	engine: Engine,
}

impl WatBackend {
	/// `engine` must be the one units are later loaded with, so that validation
	/// accepts exactly the feature set the loader supports.
	pub fn new( engine: Engine ) -> Self { Self { engine }}
}

impl std::fmt::Debug for WatBackend {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "WatBackend" ).field( "engine", &"<Engine>" ).finish()
	}
}

impl CompilerBackend for WatBackend {
	fn compile( &self, unit: &QualifiedName, source: &str ) -> Result<Vec<u8>, String> {
		let binary = wat::parse_str( source ).map_err(| err | non_empty( err.to_string() ))?;
		Module::validate( &self.engine, &binary ).map_err(| err | non_empty( format!( "{:?}", err )))?;
		debug!( unit = %unit, bytes = binary.len(), "validated unit binary" );
		Ok( binary )
	}
}

fn non_empty( diagnostics: String ) -> String {
	match diagnostics.trim().is_empty() {
		true => "compilation failed without diagnostics".to_string(),
		false => diagnostics,
	}
}

/// Outcome of a successful compilation.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct CompiledUnit {
	qualified_name: QualifiedName,
	artifact: PathBuf,
	diagnostics: String,
}

impl CompiledUnit {
	#[inline] pub fn qualified_name( &self ) -> &QualifiedName { &self.qualified_name }
	#[inline] pub fn artifact( &self ) -> &Path { &self.artifact }
	/// Empty on success.
	#[inline] pub fn diagnostics( &self ) -> &str { &self.diagnostics }

	/// The same unit once its artifact has been moved under `output_dir`.
	pub(crate) fn promoted_to( self, output_dir: &Path ) -> Self {
		let artifact = artifact_path( output_dir, &self.qualified_name );
		Self { artifact, ..self }
	}
}

/// Errors that can occur while compiling a single unit.
#[derive( Error, Debug )]
pub enum CompileError {
	/// The simple name cannot name a unit.
	#[error( "Invalid unit name: '{0}'" )]
	InvalidName( String ),
	/// The source declares no namespace, or an empty or malformed one.
	#[error( "Namespace of unit '{0}' missing in source code or invalid" )]
	MissingNamespace( String ),
	/// The toolchain rejected the source.
	#[error( "Unit '{unit}' - {diagnostics}" )]
	Diagnostics { unit: String, diagnostics: String },
	/// The artifact could not be written.
	#[error( "Failed to write artifact '{}': {source}", path.display() )]
	Output { path: PathBuf, #[source] source: std::io::Error },
}

impl CompileError {
	/// Whether the failure is the unit's own fault, as opposed to the environment's.
	pub fn is_unit_error( &self ) -> bool { !matches!( self, Self::Output { .. })}
}

impl ReportedError for CompileError {
	fn category( &self ) -> ErrorCategory { match self {
		Self::InvalidName( _ ) | Self::Diagnostics { .. } => ErrorCategory::Compile,
		Self::MissingNamespace( _ ) => ErrorCategory::MissingNamespace,
		Self::Output { .. } => ErrorCategory::Internal,
	}}
	fn public_message( &self ) -> String { match self {
		Self::Output { .. } => "Failed to write compiled unit".to_string(),
		other => other.to_string(),
	}}
}

/// Compiles unit sources into artifacts laid out by namespace.
#[derive( Clone )]
pub struct Compiler {
	backend: Arc<dyn CompilerBackend>,
}

impl std::fmt::Debug for Compiler {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "Compiler" ).field( "backend", &"<CompilerBackend>" ).finish()
	}
}

impl Compiler {

	pub fn new( backend: impl CompilerBackend + 'static ) -> Self {
		Self { backend: Arc::new( backend )}
	}

	/// Compiles `source` as unit `simple_name`, writing the artifact under `output_dir`.
	///
	/// The qualified name is the namespace declared in `source` followed by
	/// `simple_name`. Nothing is written unless compilation succeeds.
	///
	/// # Errors
	/// - [`CompileError::InvalidName`] if `simple_name` is not an identifier
	/// - [`CompileError::MissingNamespace`] if the source declares no valid namespace
	/// - [`CompileError::Diagnostics`] if the backend rejects the source
	/// - [`CompileError::Output`] if the artifact cannot be written
	pub fn compile( &self, simple_name: &str, source: &str, output_dir: &Path ) -> Result<CompiledUnit, CompileError> {

		if !is_valid_simple_name( simple_name ) { return Err( CompileError::InvalidName( simple_name.to_string() ))}

		let qualified_name = scan_namespace( source )
			.and_then(| namespace | QualifiedName::new( namespace, simple_name ))
			.ok_or_else(|| CompileError::MissingNamespace( simple_name.to_string() ))?;

		let binary = self.backend
			.compile( &qualified_name, source )
			.map_err(| diagnostics | CompileError::Diagnostics { unit: simple_name.to_string(), diagnostics })?;

		let artifact = artifact_path( output_dir, &qualified_name );
		write_atomically( &artifact, &binary )?;
		info!( unit = %qualified_name, artifact = %artifact.display(), "compiled unit" );

		Ok( CompiledUnit { qualified_name, artifact, diagnostics: String::new() })

	}

}

/// Writes through a temporary sibling so a reader never sees a half-written artifact.
fn write_atomically( path: &Path, bytes: &[u8] ) -> Result<(), CompileError> {
	let output_error = | source: std::io::Error | CompileError::Output { path: path.to_path_buf(), source };
	let dir = path.parent().unwrap_or( Path::new( "." ));
	std::fs::create_dir_all( dir ).map_err( output_error )?;
	let mut file = tempfile::NamedTempFile::new_in( dir ).map_err( output_error )?;
	file.write_all( bytes ).map_err( output_error )?;
	file.persist( path ).map_err(| err | output_error( err.error ))?;
	Ok(())
}
