//! Upload, compile and run sandboxed WebAssembly units on demand.
//!
//! An operator submits the source of a **unit**, the crate compiles it into an
//! artifact, and the unit can later be invoked by name against a JSON payload.
//! Uploaded code is untrusted: it runs inside a Wasmtime sandbox that only offers
//! a handful of host functions, under fuel, time and memory bounds.
//!
//! # Core Concepts
//!
//! - **Unit**: a WebAssembly text module exporting `execute: [] -> []`. Its source
//! 	declares the namespace it lives in with a leading `;; namespace a.b;` comment,
//! 	and is addressed by its [`QualifiedName`] (`a.b.SimpleName`). See [`sandbox`]
//! 	for the host functions a unit may import.
//!
//! - [`SourceStore`]: the uploaded sources, one file per simple name.
//!
//! - [`Compiler`]: turns source text into an artifact laid out by namespace. The
//! 	toolchain is a [`CompilerBackend`]; [`WatBackend`] is the one shipped.
//!
//! - [`IsolationLoader`]: resolves qualified names to [`UnitHandle`]s through the
//! 	single resolution cache, refusing names matched by the [`SandboxPolicy`].
//!
//! - [`ExecutionHost`]: invokes a handle, turning every failure into an
//! 	[`ExecutionError`].
//!
//! - [`PluginRegistry`]: keeps all of the above consistent. Every mutation (upload,
//! 	delete, reload) is followed by a reset of the resolution cache.
//!
//! - [`PluginService`]: the endpoint facade, applying the access rules and
//! 	answering with JSON [`Envelope`]s.
//!
//! # Example
//!
//! ```
//! use wasm_unit_host::{ PluginRegistry, Settings };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = tempfile::tempdir()?;
//! let settings = Settings {
//! 	plugins_enabled: true,
//! 	source_dir: workspace.path().join( "src" ),
//! 	output_dir: workspace.path().join( "compiled" ),
//! 	..Settings::default()
//! };
//! let registry = PluginRegistry::new( &settings )?;
//!
//! let source = r#";; namespace sandbox.demo;
//! (module
//! 	(import "host" "output" (func $output (param i32 i32 i32 i32)))
//! 	(memory (export "memory") 1)
//! 	(data (i32.const 0) "status")
//! 	(data (i32.const 8) "success")
//! 	(func (export "execute")
//! 		(call $output (i32.const 0) (i32.const 6) (i32.const 8) (i32.const 7))))
//! "#;
//! let report = registry.compile_and_store( "Ok", source, true )?;
//! assert_eq!( report.unit.qualified_name().to_string(), "sandbox.demo.Ok" );
//!
//! let result = registry.execute_named( "sandbox.demo.Ok", Default::default() )?;
//! assert_eq!( result.status(), Some( "success" ));
//! # Ok(())
//! # }
//! ```

mod namespace ;
mod policy ;
mod error ;
mod source ;
mod compiler ;
pub mod sandbox ;
mod loader ;
mod host ;
mod registry ;
mod config ;
mod service ;

#[doc( no_inline )]
pub use wasmtime::Engine ;

pub use namespace::{ QualifiedName, scan_namespace, is_valid_namespace, is_valid_simple_name };
pub use policy::SandboxPolicy ;
pub use error::{ ErrorCategory, ReportedError };
pub use source::{ SourceStore, SourceUnit, StoreError, SOURCE_EXTENSION };
pub use compiler::{ Compiler, CompilerBackend, WatBackend, CompiledUnit, CompileError, artifact_path, ARTIFACT_EXTENSION };
pub use sandbox::{ sandbox_engine, Payload, HostFault };
pub use loader::{ IsolationLoader, UnitHandle, ResolveError };
pub use host::{ ExecutionHost, ExecutionLimits, ExecutionResult, ExecutionError };
pub use registry::{ PluginRegistry, RegistryError, CompileReport, StoreOutcome, DeleteReport };
pub use config::{ Settings, ConfigurationError, DEFAULT_BLACKLIST };
pub use service::{
	PluginService, AccountContext, Account, Credentials, Envelope, Outcome,
	ExecuteRequest, UploadRequest, DeleteRequest, ANONYMOUS,
};
