//! Persistent storage of uploaded unit sources.
//!
//! One file per unit, `<dir>/<SimpleName>.src`. Re-uploading a name overwrites
//! the previous text; content is never validated here.

use std::io::Write ;
use std::path::{ Path, PathBuf };
use thiserror::Error ;
use tracing::{ info, warn };

use crate::error::{ ErrorCategory, ReportedError };
use crate::namespace::{ is_valid_simple_name, scan_namespace };



/// Extension of stored source files.
pub const SOURCE_EXTENSION: &str = "src" ;

/// One stored unit source.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct SourceUnit {
	simple_name: String,
	text: String,
	path: PathBuf,
}

impl SourceUnit {
	#[inline] pub fn simple_name( &self ) -> &str { &self.simple_name }
	#[inline] pub fn text( &self ) -> &str { &self.text }
	#[inline] pub fn path( &self ) -> &Path { &self.path }
	/// Namespace declared by the text, if any.
	#[inline] pub fn declared_namespace( &self ) -> Option<&str> { scan_namespace( &self.text )}
}

/// Errors raised while persisting or enumerating sources.
#[derive( Error, Debug )]
pub enum StoreError {
	/// The simple name cannot be used as a file name.
	#[error( "Invalid unit name: '{0}'" )] InvalidName( String ),
	/// Filesystem failure on the given path.
	#[error( "Source store I/O error on '{}': {source}", path.display() )]
	Io { path: PathBuf, #[source] source: std::io::Error },
}

impl ReportedError for StoreError {
	fn category( &self ) -> ErrorCategory { ErrorCategory::Store }
	fn public_message( &self ) -> String { match self {
		Self::InvalidName( name ) => format!( "Invalid unit name: '{}'", name ),
		Self::Io { source, .. } => format!( "Failed to store source: {}", source.kind() ),
	}}
}

fn io_error( path: &Path ) -> impl FnOnce( std::io::Error ) -> StoreError + '_ {
	move | source | StoreError::Io { path: path.to_path_buf(), source }
}

/// Directory-backed store of unit sources.
#[derive( Debug, Clone )]
pub struct SourceStore {
	dir: PathBuf,
}

impl SourceStore {

	/// Opens the store, creating the directory when it does not exist yet.
	///
	/// # Errors
	/// Fails when the directory cannot be created.
	pub fn open( dir: impl Into<PathBuf> ) -> Result<Self, StoreError> {
		let dir = dir.into();
		std::fs::create_dir_all( &dir ).map_err( io_error( &dir ))?;
		Ok( Self { dir })
	}

	#[inline] pub fn dir( &self ) -> &Path { &self.dir }

	/// Location a unit with this simple name is stored at.
	pub fn path_of( &self, simple_name: &str ) -> PathBuf {
		self.dir.join( format!( "{}.{}", simple_name, SOURCE_EXTENSION ))
	}

	/// Writes or overwrites the source of `simple_name`. The previous text stays in
	/// place until the new one is complete.
	///
	/// # Errors
	/// Fails when the name is not a valid simple name or the write fails.
	pub fn put( &self, simple_name: &str, text: &str ) -> Result<PathBuf, StoreError> {
		if !is_valid_simple_name( simple_name ) { return Err( StoreError::InvalidName( simple_name.to_string() ))}
		let path = self.path_of( simple_name );
		let mut file = tempfile::NamedTempFile::new_in( &self.dir ).map_err( io_error( &path ))?;
		file.write_all( text.as_bytes() ).map_err( io_error( &path ))?;
		file.persist( &path ).map_err(| err | io_error( &path )( err.error ))?;
		info!( unit = simple_name, path = %path.display(), "stored unit source" );
		Ok( path )
	}

	/// Lazily enumerates every stored source.
	///
	/// Each call starts a fresh directory scan. Files without the source extension
	/// or whose name is not a valid simple name are skipped with a warning.
	///
	/// # Errors
	/// Fails when the directory cannot be read; per-file read failures are yielded
	/// as items.
	pub fn list_all( &self ) -> Result<impl Iterator<Item = Result<SourceUnit, StoreError>> + Send, StoreError> {
		let entries = std::fs::read_dir( &self.dir ).map_err( io_error( &self.dir ))?;
		let dir = self.dir.clone();
		Ok( entries.filter_map( move | entry | {
			let path = match entry {
				Ok( entry ) => entry.path(),
				Err( source ) => return Some( Err( StoreError::Io { path: dir.clone(), source })),
			};
			let simple_name = stored_name( &path )?;
			if !is_valid_simple_name( simple_name ) {
				warn!( path = %path.display(), "skipping source file with invalid unit name" );
				return None ;
			}
			let simple_name = simple_name.to_string();
			Some( std::fs::read_to_string( &path )
				.map( | text | SourceUnit { simple_name, text, path: path.clone() })
				.map_err( io_error( &path )))
		}))
	}

	/// Removes every stored file whose name, without extension and trimmed, equals
	/// `simple_name`, returning how many were removed.
	///
	/// Several files can match when the directory was edited by hand
	/// (`Echo.src` and `Echo .src`). An absent or blank name returns 0, exactly
	/// like a name without matches; callers that need to tell these apart check
	/// the parameter before calling.
	///
	/// # Errors
	/// Fails when the directory cannot be read or a matching file cannot be removed.
	pub fn delete_by_name( &self, simple_name: Option<&str> ) -> Result<usize, StoreError> {
		let Some( simple_name ) = simple_name.map( str::trim ).filter(| name | !name.is_empty() ) else { return Ok( 0 )};
		let entries = std::fs::read_dir( &self.dir ).map_err( io_error( &self.dir ))?;
		entries
			.map(| entry | entry.map(| entry | entry.path() ).map_err( io_error( &self.dir )))
			.filter(| path | match path {
				Ok( path ) => stored_name( path ) == Some( simple_name ),
				Err( _ ) => true,
			})
			.try_fold( 0, | deleted, path | {
				let path = path?;
				std::fs::remove_file( &path ).map_err( io_error( &path ))?;
				info!( unit = simple_name, path = %path.display(), "deleted unit source" );
				Ok( deleted + 1 )
			})
	}

}

/// Trimmed file stem of a regular `*.src` file.
fn stored_name( path: &Path ) -> Option<&str> {
	if !path.is_file() { return None }
	if path.extension()?.to_str()? != SOURCE_EXTENSION { return None }
	Some( path.file_stem()?.to_str()?.trim() )
}
