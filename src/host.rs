//! Invocation of resolved units.
//!
//! Every call gets a fresh `Store` and instance, so nothing a unit does survives
//! the call. Each call is bounded three ways: fuel, a wall-clock deadline through
//! epoch interruption, and a cap on linear memory.

use std::panic::AssertUnwindSafe ;
use std::sync::Arc ;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread::JoinHandle ;
use std::time::Duration ;
use serde::{ Deserialize, Serialize };
use serde_json::Value ;
use thiserror::Error ;
use tracing::{ error, info };
use wasmtime::{ Engine, Store, Trap };

use crate::error::{ ErrorCategory, ReportedError };
use crate::loader::UnitHandle ;
use crate::sandbox::{ HostFault, Payload, UnitContext, EXECUTE_EXPORT };



/// Per-call resource bounds.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct ExecutionLimits {
	/// Fuel granted to each call.
	pub fuel: u64,
	/// Wall-clock budget of each call, instantiation included.
	pub timeout_ms: u64,
	/// Cap on the unit's linear memory, also bounding the size of its result.
	pub memory_bytes: usize,
	/// Resolution of the deadline.
	pub epoch_tick_ms: u64,
}

impl Default for ExecutionLimits {
	fn default() -> Self {
		Self {
			fuel: 1_000_000_000,
			timeout_ms: 5_000,
			memory_bytes: 16 * 1024 * 1024,
			epoch_tick_ms: 10,
		}
	}
}

impl ExecutionLimits {

	/// Epoch ticks making up the timeout, rounded up; at least one.
	pub fn deadline_ticks( &self ) -> u64 {
		self.timeout_ms.div_ceil( self.epoch_tick_ms.max( 1 )).max( 1 )
	}

	#[inline] pub fn tick( &self ) -> Duration { Duration::from_millis( self.epoch_tick_ms.max( 1 ))}

}

/// Advances the engine epoch at a fixed rate until dropped.
struct EpochTicker {
	stop: Arc<AtomicBool>,
	thread: Option<JoinHandle<()>>,
}

impl EpochTicker {
	fn spawn( engine: Engine, tick: Duration ) -> std::io::Result<Self> {
		let stop = Arc::new( AtomicBool::new( false ));
		let stop_flag = Arc::clone( &stop );
		let thread = std::thread::Builder::new()
			.name( "wasm-unit-epoch".to_string() )
			.spawn( move || while !stop_flag.load( Ordering::Acquire ) {
				std::thread::sleep( tick );
				engine.increment_epoch();
			})?;
		Ok( Self { stop, thread: Some( thread )})
	}
}

impl Drop for EpochTicker {
	fn drop( &mut self ) {
		self.stop.store( true, Ordering::Release );
		if let Some( thread ) = self.thread.take() { let _ = thread.join(); }
	}
}

/// The JSON object a unit produced, its own `status` field included.
#[derive( Debug, Clone, PartialEq, Default, Serialize, Deserialize )]
#[serde( transparent )]
pub struct ExecutionResult( Payload );

impl ExecutionResult {
	#[inline] pub fn fields( &self ) -> &Payload { &self.0 }
	#[inline] pub fn get( &self, key: &str ) -> Option<&Value> { self.0.get( key )}
	/// The unit's own verdict, passed through untouched.
	pub fn status( &self ) -> Option<&str> { self.0.get( "status" ).and_then( Value::as_str )}
	#[inline] pub fn into_inner( self ) -> Payload { self.0 }
}

impl From<ExecutionResult> for Value {
	fn from( result: ExecutionResult ) -> Self { Value::Object( result.0 )}
}

/// Errors that can occur while invoking a unit.
///
/// Messages carry no backtraces and no host paths.
#[derive( Error, Debug, Clone, PartialEq, Eq )]
pub enum ExecutionError {
	/// The unit could not be instantiated, e.g. its memory exceeds the cap.
	#[error( "Unit could not be instantiated: {0}" )] Instantiation( String ),
	/// The unit hit a wasm trap.
	#[error( "Unit trapped: {0}" )] Trap( String ),
	/// The call ran out of fuel.
	#[error( "Unit exceeded its fuel budget" )] FuelExhausted,
	/// The call ran past its wall-clock deadline.
	#[error( "Unit exceeded its time limit" )] DeadlineExceeded,
	/// The unit misused a host function.
	#[error( "Unit misused the host interface: {0}" )] HostFault( String ),
	/// Host code panicked while serving the unit.
	#[error( "Unit execution panicked: {0}" )] Panicked( String ),
	/// Any other failure.
	#[error( "Unit execution failed: {0}" )] Other( String ),
}

impl ExecutionError {
	fn classify( err: &wasmtime::Error, fallback: fn( String ) -> Self ) -> Self {
		if let Some( fault ) = err.downcast_ref::<HostFault>() { return Self::HostFault( fault.0.clone() )}
		match err.downcast_ref::<Trap>() {
			Some( Trap::OutOfFuel ) => Self::FuelExhausted,
			Some( Trap::Interrupt ) => Self::DeadlineExceeded,
			Some( trap ) => Self::Trap( trap.to_string() ),
			None => fallback( first_line( &err.to_string() )),
		}
	}
}

impl ReportedError for ExecutionError {
	fn category( &self ) -> ErrorCategory { ErrorCategory::PluginExecution }
}

fn first_line( message: &str ) -> String {
	message.lines().next().unwrap_or_default().trim().to_string()
}

fn panic_message( panic: &( dyn std::any::Any + Send )) -> String {
	panic.downcast_ref::<&str>().map(| message | ( *message ).to_string() )
		.or_else(|| panic.downcast_ref::<String>().cloned() )
		.unwrap_or_else(|| "unknown panic".to_string() )
}

/// Runs units under the configured [`ExecutionLimits`].
pub struct ExecutionHost {
	engine: Engine,
	limits: ExecutionLimits,
	_ticker: EpochTicker,
}

impl std::fmt::Debug for ExecutionHost {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "ExecutionHost" )
			.field( "limits", &self.limits )
			.finish_non_exhaustive()
	}
}

impl ExecutionHost {

	/// `engine` must be the engine the units were resolved with. Starts the epoch
	/// ticker thread, which lives as long as the host.
	///
	/// # Errors
	/// Fails if the ticker thread cannot be spawned.
	pub fn new( engine: Engine, limits: ExecutionLimits ) -> std::io::Result<Self> {
		let ticker = EpochTicker::spawn( engine.clone(), limits.tick() )?;
		Ok( Self { engine, limits, _ticker: ticker })
	}

	#[inline] pub fn limits( &self ) -> &ExecutionLimits { &self.limits }

	/// Calls the unit's `execute` export with `payload` and returns what it wrote.
	///
	/// Whatever goes wrong, including a panic in host code, is returned as an
	/// [`ExecutionError`]; the host itself is never affected.
	///
	/// # Errors
	/// See [`ExecutionError`].
	pub fn invoke( &self, handle: &UnitHandle, payload: Payload ) -> Result<ExecutionResult, ExecutionError> {

		let outcome = std::panic::catch_unwind( AssertUnwindSafe(|| self.run( handle, payload )))
			.unwrap_or_else(| panic | Err( ExecutionError::Panicked( panic_message( &*panic ))));

		match &outcome {
			Ok( result ) => info!( unit = %handle.qualified_name(), status = result.status().unwrap_or( "-" ), "executed unit" ),
			Err( err ) => error!( unit = %handle.qualified_name(), error = %err, "unit execution failed" ),
		}
		outcome

	}

	fn run( &self, handle: &UnitHandle, payload: Payload ) -> Result<ExecutionResult, ExecutionError> {

		let context = UnitContext::new( handle.qualified_name().clone(), payload, self.limits.memory_bytes );
		let mut store = Store::new( &self.engine, context );
		store.limiter(| ctx | &mut ctx.limits );
		store.set_fuel( self.limits.fuel ).map_err(| err | ExecutionError::Other( first_line( &err.to_string() )))?;
		store.set_epoch_deadline( self.limits.deadline_ticks() );

		let instance = handle.instance_pre()
			.instantiate( &mut store )
			.map_err(| err | ExecutionError::classify( &err, ExecutionError::Instantiation ))?;
		let execute = instance
			.get_typed_func::<(), ()>( &mut store, EXECUTE_EXPORT )
			.map_err(| err | ExecutionError::Instantiation( first_line( &err.to_string() )))?;
		execute.call( &mut store, () ).map_err(| err | ExecutionError::classify( &err, ExecutionError::Other ))?;

		Ok( ExecutionResult( store.into_data().into_output() ))

	}

}

#[cfg( test )]
mod tests {
	use super::* ;

	#[test]
	fn deadline_ticks_round_up() {
		let limits = ExecutionLimits { timeout_ms: 25, epoch_tick_ms: 10, ..ExecutionLimits::default() };
		assert_eq!( limits.deadline_ticks(), 3 );
	}

	#[test]
	fn deadline_is_at_least_one_tick() {
		let limits = ExecutionLimits { timeout_ms: 1, epoch_tick_ms: 1_000, ..ExecutionLimits::default() };
		assert_eq!( limits.deadline_ticks(), 1 );
	}

	#[test]
	fn panic_payloads_become_messages() {
		let panic = std::panic::catch_unwind(|| panic!( "boom {}", 1 )).unwrap_err();
		assert_eq!( panic_message( &*panic ), "boom 1" );
	}

	#[test]
	fn only_the_first_line_is_reported() {
		assert_eq!( first_line( "wasm trap: unreachable\nwasm backtrace:\n  0: ..." ), "wasm trap: unreachable" );
	}
}
