//! The wasm sandbox units run in.
//!
//! Units are plain WebAssembly modules. The only imports a unit can link against
//! are the functions of the [`HOST_MODULE`] module declared here; anything else
//! (WASI, other units, host internals) is simply absent from the linker, so a
//! module asking for it fails to load. Payload and result travel through these
//! host functions instead of through shared data structures:
//!
//! | import | signature | |
//! |---|---|---|
//! | `input` | `(key_ptr, key_len, out_ptr, out_cap) -> i32` | copies payload field `key` into `out`; strings raw, other values as JSON. Returns the full length or `-1` when absent |
//! | `output` | `(key_ptr, key_len, val_ptr, val_len)` | sets result field `key` to a string, or to `null` when `val_len < 0` |
//! | `output_json` | `(key_ptr, key_len, val_ptr, val_len) -> i32` | sets result field `key` to a JSON value. Returns `-1` if the text is not JSON |
//! | `log` | `(ptr, len)` | debug log line attributed to the unit |
//!
//! Pointers index the unit's exported [`MEMORY_EXPORT`]. Out-of-bounds access or
//! invalid UTF-8 traps the unit with a [`HostFault`].

use std::borrow::Cow ;
use std::collections::HashMap ;
use serde_json::{ Map, Value };
use thiserror::Error ;
use tracing::debug ;
use wasmtime::{ Caller, Config, Engine, Extern, Linker, Memory, StoreLimits, StoreLimitsBuilder };

use crate::namespace::QualifiedName ;



/// Import module offering the host functions.
pub const HOST_MODULE: &str = "host" ;
/// Export every unit must provide, of type `[] -> []`.
pub const EXECUTE_EXPORT: &str = "execute" ;
/// Linear memory export the host functions read from and write to.
pub const MEMORY_EXPORT: &str = "memory" ;

/// Structured payload handed to a unit.
pub type Payload = Map<String, Value> ;

/// Creates the engine every unit is compiled, validated and run with.
///
/// Fuel metering and epoch interruption are always on so that every call can be
/// bounded; wasm backtraces are off so trap messages never carry unit internals.
///
/// # Errors
/// Fails if wasmtime rejects the configuration for the host platform.
pub fn sandbox_engine() -> Result<Engine, wasmtime::Error> {
	let mut config = Config::new();
	config.consume_fuel( true );
	config.epoch_interruption( true );
	config.wasm_backtrace( false );
	Engine::new( &config )
}

/// Misuse of a host function by the unit. Traps the call.
#[derive( Error, Debug, Clone )]
#[error( "{0}" )]
pub struct HostFault( pub String );

fn fault( message: impl Into<String> ) -> wasmtime::Error {
	wasmtime::Error::new( HostFault( message.into() ))
}

/// Per-call state stored inside the wasmtime `Store`.
pub struct UnitContext {
	unit: QualifiedName,
	payload: Payload,
	output: Payload,
	output_sizes: HashMap<String, usize>,
	output_bytes: usize,
	output_budget: usize,
	pub(crate) limits: StoreLimits,
}

impl UnitContext {

	pub(crate) fn new( unit: QualifiedName, payload: Payload, memory_bytes: usize ) -> Self {
		Self {
			unit,
			payload,
			output: Map::new(),
			output_sizes: HashMap::new(),
			output_bytes: 0,
			output_budget: memory_bytes,
			limits: StoreLimitsBuilder::new()
				.memory_size( memory_bytes )
				.instances( 1 )
				.build(),
		}
	}

	#[inline] pub fn unit( &self ) -> &QualifiedName { &self.unit }

	pub(crate) fn into_output( self ) -> Payload { self.output }

	/// Stores one result field. Only the live fields count against the budget, so
	/// overwriting a key releases what its previous value used.
	fn record( &mut self, key: String, value: Value, size: usize ) -> wasmtime::Result<()> {
		let released = self.output_sizes.get( &key ).map_or( 0, | previous | key.len() + previous );
		let total = ( self.output_bytes - released ).saturating_add( key.len() ).saturating_add( size );
		if total > self.output_budget { return Err( fault( "result exceeds the memory limit" ))}
		self.output_bytes = total ;
		self.output_sizes.insert( key.clone(), size );
		self.output.insert( key, value );
		Ok(())
	}

}

impl std::fmt::Debug for UnitContext {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "UnitContext" )
			.field( "unit", &self.unit )
			.field( "payload", &self.payload )
			.field( "output", &self.output )
			.finish_non_exhaustive()
	}
}

macro_rules! declare_exports {
	(
		$linker_instance:expr,
		[
			$(( $module:expr, $name:literal, $function:expr )),*
			$(,)?
		]
	) => {
		vec![ $( $linker_instance.func_wrap( $module, $name, $function ).err() ),* ]
			.into_iter()
			.flatten()
			.collect::<Vec<_>>()
	};
}

/// Builds the linker units are instantiated with. It contains the host module and
/// nothing else.
///
/// # Errors
/// Fails if a host function cannot be registered.
pub(crate) fn host_linker( engine: &Engine ) -> Result<Linker<UnitContext>, wasmtime::Error> {
	let mut linker = Linker::new( engine );
	let linker_errors = declare_exports!( linker, [
		( HOST_MODULE, "input", input ),
		( HOST_MODULE, "output", output ),
		( HOST_MODULE, "output_json", output_json ),
		( HOST_MODULE, "log", log ),
	]);
	match linker_errors.into_iter().next() {
		Some( err ) => Err( err ),
		None => Ok( linker ),
	}
}

fn memory( caller: &mut Caller<'_, UnitContext> ) -> wasmtime::Result<Memory> {
	caller.get_export( MEMORY_EXPORT )
		.and_then( Extern::into_memory )
		.ok_or_else(|| fault( format!( "unit must export its linear memory as '{}'", MEMORY_EXPORT )))
}

fn range( ptr: i32, len: i32, size: usize ) -> wasmtime::Result<std::ops::Range<usize>> {
	let out_of_bounds = || fault( format!( "memory access out of bounds (ptr={}, len={})", ptr, len ));
	let start = usize::try_from( ptr ).map_err(|_| out_of_bounds() )?;
	let len = usize::try_from( len ).map_err(|_| out_of_bounds() )?;
	let end = start.checked_add( len ).ok_or_else( out_of_bounds )?;
	match end <= size {
		true => Ok( start..end ),
		false => Err( out_of_bounds() ),
	}
}

fn read_str( data: &[u8], ptr: i32, len: i32 ) -> wasmtime::Result<&str> {
	std::str::from_utf8( &data[range( ptr, len, data.len() )?] )
		.map_err(|_| fault( "string is not valid UTF-8" ))
}

fn input( mut caller: Caller<'_, UnitContext>, key_ptr: i32, key_len: i32, out_ptr: i32, out_cap: i32 ) -> wasmtime::Result<i32> {
	let memory = memory( &mut caller )?;
	let ( data, ctx ) = memory.data_and_store_mut( &mut caller );
	let key = read_str( data, key_ptr, key_len )?;
	let Some( value ) = ctx.payload.get( key ) else { return Ok( -1 )};
	let text = match value {
		Value::String( text ) => Cow::Borrowed( text.as_str() ),
		other => Cow::Owned( other.to_string() ),
	};
	let full_len = i32::try_from( text.len() ).map_err(|_| fault( "payload field too large" ))?;
	let out = range( out_ptr, out_cap, data.len() )?;
	let copied = text.len().min( out.len() );
	data[out.start..out.start + copied].copy_from_slice( &text.as_bytes()[..copied] );
	Ok( full_len )
}

fn output( mut caller: Caller<'_, UnitContext>, key_ptr: i32, key_len: i32, val_ptr: i32, val_len: i32 ) -> wasmtime::Result<()> {
	let memory = memory( &mut caller )?;
	let ( data, ctx ) = memory.data_and_store_mut( &mut caller );
	let key = read_str( data, key_ptr, key_len )?.to_owned();
	let ( value, size ) = match val_len < 0 {
		true => ( Value::Null, 0 ),
		false => {
			let text = read_str( data, val_ptr, val_len )?;
			( Value::String( text.to_owned() ), text.len() )
		}
	};
	ctx.record( key, value, size )
}

fn output_json( mut caller: Caller<'_, UnitContext>, key_ptr: i32, key_len: i32, val_ptr: i32, val_len: i32 ) -> wasmtime::Result<i32> {
	let memory = memory( &mut caller )?;
	let ( data, ctx ) = memory.data_and_store_mut( &mut caller );
	let key = read_str( data, key_ptr, key_len )?.to_owned();
	let text = read_str( data, val_ptr, val_len )?;
	match serde_json::from_str::<Value>( text ) {
		Ok( value ) => ctx.record( key, value, text.len() ).map(|()| 0 ),
		Err( _ ) => Ok( -1 ),
	}
}

fn log( mut caller: Caller<'_, UnitContext>, ptr: i32, len: i32 ) -> wasmtime::Result<()> {
	let memory = memory( &mut caller )?;
	let ( data, ctx ) = memory.data_and_store_mut( &mut caller );
	let message = read_str( data, ptr, len )?;
	debug!( target: "wasm_unit_host::unit", unit = %ctx.unit, "{}", message );
	Ok(())
}

#[cfg( test )]
mod tests {
	use super::* ;

	fn context( budget: usize ) -> UnitContext {
		let unit = QualifiedName::new( "sandbox.demo", "Echo" ).unwrap();
		UnitContext::new( unit, Map::new(), budget )
	}

	#[test]
	fn overwritten_fields_release_their_budget() {
		let mut ctx = context( 64 );
		for _ in 0..100 {
			ctx.record( "status".to_string(), Value::from( "success" ), 7 ).unwrap();
		}
		assert_eq!( ctx.output_bytes, 13 );
		assert_eq!( ctx.into_output().len(), 1 );
	}

	#[test]
	fn live_fields_stay_within_the_budget() {
		let mut ctx = context( 64 );
		ctx.record( "a".to_string(), Value::from( "x" ), 40 ).unwrap();
		assert!( ctx.record( "b".to_string(), Value::from( "y" ), 40 ).is_err() );
		ctx.record( "a".to_string(), Value::from( "z" ), 1 ).unwrap();
		ctx.record( "b".to_string(), Value::from( "y" ), 40 ).unwrap();
	}
}
