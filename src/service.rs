//! Transport-free facade of the plugin endpoints.
//!
//! [`PluginService`] applies the access rules (master switch, authentication,
//! role) in front of the [`PluginRegistry`] and answers every request with an
//! [`Envelope`], the JSON object a transport sends back as is. Failures in an
//! envelope only ever carry a category and a sanitised message.

use std::sync::Arc ;
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Map, Value };
use tracing::{ error, info, warn };

use crate::config::Settings ;
use crate::error::{ ErrorCategory, ReportedError };
use crate::registry::{ PluginRegistry, RegistryError, StoreOutcome };
use crate::sandbox::Payload ;



/// Identity reported when authentication is not required.
pub const ANONYMOUS: &str = "anonymous" ;

/// Opaque authentication material, forwarded untouched to the [`AccountContext`].
pub type Credentials = Map<String, Value> ;

/// An authenticated account, as decided by the [`AccountContext`].
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Account {
	pub identity: String,
	/// Negative levels mark a failed authentication.
	pub access_level: i32,
	#[serde( default )]
	pub roles: Vec<String>,
}

impl Account {
	pub fn has_role( &self, role: &str ) -> bool { self.roles.iter().any(| held | held == role )}
}

/// Source of authentication decisions. The service never authenticates by itself.
pub trait AccountContext: Send + Sync {
	/// Returns the account the credentials belong to, or `None` when they are not
	/// accepted.
	fn authenticate( &self, credentials: &Credentials ) -> Option<Account> ;
}

#[derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct ExecuteRequest {
	pub qualified_name: Option<String>,
	pub data: Payload,
	pub credentials: Credentials,
}

#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct UploadRequest {
	pub simple_name: Option<String>,
	pub source: Option<String>,
	pub credentials: Credentials,
}

#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct DeleteRequest {
	pub simple_name: Option<String>,
	pub credentials: Credentials,
}

#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum Outcome { Success, Fail }

/// Response of a service operation.
#[derive( Debug, Clone, PartialEq, Serialize )]
pub struct Envelope {
	pub result: Outcome,
	#[serde( skip_serializing_if = "Option::is_none" )]
	pub category: Option<ErrorCategory>,
	#[serde( skip_serializing_if = "Option::is_none" )]
	pub error: Option<String>,
	#[serde( flatten )]
	pub fields: Map<String, Value>,
	/// Status code hint for an HTTP transport; not part of the body.
	#[serde( skip )]
	pub status: u16,
}

impl Envelope {

	pub fn success() -> Self {
		Self { result: Outcome::Success, category: None, error: None, fields: Map::new(), status: 200 }
	}

	pub fn fail( category: ErrorCategory, message: impl Into<String> ) -> Self {
		Self {
			result: Outcome::Fail,
			category: Some( category ),
			error: Some( message.into() ),
			fields: Map::new(),
			status: category.status_hint(),
		}
	}

	/// Failure envelope for `err`, exposing only its public message.
	pub fn from_error( err: &impl ReportedError ) -> Self {
		Self::fail( err.category(), err.public_message() )
	}

	pub fn with( mut self, key: &str, value: impl Into<Value> ) -> Self {
		self.fields.insert( key.to_string(), value.into() );
		self
	}

	#[inline] pub fn is_success( &self ) -> bool { self.result == Outcome::Success }
	#[inline] pub fn get( &self, key: &str ) -> Option<&Value> { self.fields.get( key )}

	/// The body as a JSON value.
	pub fn to_json( &self ) -> Value {
		serde_json::to_value( self ).unwrap_or_else(|_| json!({ "result": "fail" }))
	}

}

/// The plugin endpoints: execute, upload and delete, behind the access rules.
pub struct PluginService {
	settings: Settings,
	registry: Option<PluginRegistry>,
	accounts: Arc<dyn AccountContext>,
}

impl std::fmt::Debug for PluginService {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "PluginService" )
			.field( "settings", &self.settings )
			.field( "registry", &self.registry )
			.finish_non_exhaustive()
	}
}

impl PluginService {

	/// Sets up the service. With plugins disabled no registry is created and no
	/// directory is touched.
	///
	/// # Errors
	/// Fails when plugins are enabled and the registry cannot be created.
	pub fn new( settings: Settings, accounts: impl AccountContext + 'static ) -> Result<Self, RegistryError> {
		let registry = match settings.plugins_enabled {
			true => Some( PluginRegistry::new( &settings )?),
			false => None,
		};
		Ok( Self { settings, registry, accounts: Arc::new( accounts )})
	}

	/// Uses an existing registry, e.g. one built with a custom compiler backend.
	pub fn with_registry( settings: Settings, registry: PluginRegistry, accounts: impl AccountContext + 'static ) -> Self {
		let registry = settings.plugins_enabled.then_some( registry );
		Self { settings, registry, accounts: Arc::new( accounts )}
	}

	#[inline] pub fn settings( &self ) -> &Settings { &self.settings }
	#[inline] pub fn registry( &self ) -> Option<&PluginRegistry> { self.registry.as_ref() }

	/// Initial clean load of every stored unit. Does nothing while plugins are disabled.
	///
	/// # Errors
	/// See [`PluginRegistry::load_all`].
	pub fn start( &self ) -> Result<usize, RegistryError> {
		match &self.registry {
			Some( registry ) => {
				let active = registry.load_all( true )?;
				info!( active, "plugin service started" );
				Ok( active )
			},
			None => {
				info!( "plugins are disabled" );
				Ok( 0 )
			},
		}
	}

	/// Runs a unit against the request data.
	pub fn execute( &self, request: ExecuteRequest ) -> Envelope {

		let ( registry, user ) = match self.admit( &request.credentials ) {
			Ok( admitted ) => admitted,
			Err( envelope ) => return envelope,
		};
		let Some( qualified_name ) = non_blank( request.qualified_name.as_deref() ) else {
			return Envelope::fail( ErrorCategory::BadRequest, "Execution requires the parameter 'qualified_name'" );
		};

		match registry.execute_named( qualified_name, request.data ) {
			Ok( result ) => {
				info!( %user, unit = qualified_name, "plugin executed" );
				Envelope::success()
					.with( "user", user )
					.with( "plugin", qualified_name )
					.with( "data", result )
			},
			Err( err ) => {
				error!( %user, unit = qualified_name, error = %err, "plugin execution failed" );
				Envelope::from_error( &err )
			},
		}

	}

	/// Compiles and stores a unit, then reloads every unit from a clean slate.
	pub fn upload( &self, request: UploadRequest ) -> Envelope {

		let ( registry, user ) = match self.admit( &request.credentials ) {
			Ok( admitted ) => admitted,
			Err( envelope ) => return envelope,
		};
		let ( Some( simple_name ), Some( source )) = ( non_blank( request.simple_name.as_deref() ), request.source.as_deref().filter(| source | !source.trim().is_empty() )) else {
			return Envelope::fail( ErrorCategory::BadRequest, "Upload requires the parameters 'simple_name' and 'source'" );
		};

		let report = match registry.compile_and_store( simple_name, source, true ) {
			Ok( report ) => report,
			Err( err ) => {
				warn!( %user, unit = simple_name, error = %err, "plugin upload rejected" );
				return Envelope::from_error( &err );
			},
		};
		if let StoreOutcome::Failed( err ) = &report.stored {
			return Envelope::from_error( err ).with( "compiled", true ).with( "stored", false );
		}

		let ( reloaded, active ) = self.reload( registry );
		info!( %user, unit = %report.unit.qualified_name(), active, "plugin uploaded" );
		Envelope::success()
			.with( "user", user )
			.with( "plugin", report.unit.qualified_name().to_string() )
			.with( "compiled", true )
			.with( "stored", report.is_stored() )
			.with( "plugins_reloaded", reloaded )
			.with( "plugins_active", active )

	}

	/// Deletes the stored sources of a unit and reloads the rest.
	///
	/// A missing name is not an error: nothing is deleted, the reload still
	/// happens, and the envelope's `note` says why nothing was deleted.
	pub fn delete( &self, request: DeleteRequest ) -> Envelope {

		let ( registry, user ) = match self.admit( &request.credentials ) {
			Ok( admitted ) => admitted,
			Err( envelope ) => return envelope,
		};
		let simple_name = non_blank( request.simple_name.as_deref() );

		let report = match registry.delete_source( simple_name ) {
			Ok( report ) => report,
			Err( err ) => {
				error!( %user, unit = ?simple_name, error = %err, "plugin deletion failed" );
				return Envelope::from_error( &err );
			},
		};

		info!( %user, unit = ?simple_name, deleted = report.deleted, active = report.active, "plugin deleted" );
		let envelope = Envelope::success()
			.with( "user", user )
			.with( "plugins_deleted", report.deleted )
			.with( "plugins_reloaded", true )
			.with( "plugins_active", report.active );
		match ( report.deleted, simple_name ) {
			( 0, None ) => envelope.with( "note", "0 files deleted: parameter 'simple_name' is missing" ),
			( 0, Some( name )) => envelope.with( "note", format!( "0 files deleted: no source named '{}' found", name )),
			_ => envelope,
		}

	}

	/// The registry and the caller's identity, or the envelope refusing the request.
	fn admit( &self, credentials: &Credentials ) -> Result<( &PluginRegistry, String ), Envelope> {

		let Some( registry ) = &self.registry else {
			return Err( Envelope::fail( ErrorCategory::Disabled, "Plugins are deactivated, check the settings file" ));
		};
		if !self.settings.require_auth { return Ok(( registry, ANONYMOUS.to_string() ))}

		let role = self.settings.required_role.as_str();
		match self.accounts.authenticate( credentials ) {
			Some( account ) if account.access_level >= 0 && ( role.is_empty() || account.has_role( role )) =>
				Ok(( registry, account.identity )),
			_ => {
				warn!( role, "refused plugin request" );
				Err( Envelope::fail( ErrorCategory::Unauthorized, format!( "Authentication failed or user is missing role: {}", role )))
			},
		}

	}

	fn reload( &self, registry: &PluginRegistry ) -> ( bool, usize ) {
		match registry.load_all( true ) {
			Ok( active ) => ( true, active ),
			Err( err ) => {
				error!( error = %err, "reload after upload failed" );
				( false, registry.compiled_units().map_or( 0, | units | units.len() ))
			},
		}
	}

}

fn non_blank( value: Option<&str> ) -> Option<&str> {
	value.map( str::trim ).filter(| value | !value.is_empty() )
}
