use std::path::PathBuf ;
use anyhow::{ bail, Context };
use clap::{ Parser, Subcommand };
use tracing::info ;
use tracing_subscriber::EnvFilter ;

use wasm_unit_host::{
	Account, AccountContext, Credentials, DeleteRequest, Envelope, ExecuteRequest,
	Payload, PluginService, Settings, UploadRequest,
};



/// Operator tool for the plugin subsystem
#[derive( Parser, Debug )]
#[command( name = "wasm-unit-host", version, about )]
struct Cli {
	/// Settings file (TOML); defaults apply when omitted
	#[arg( short, long )]
	config: Option<PathBuf>,
	/// Log at debug level unless RUST_LOG says otherwise
	#[arg( short, long )]
	debug: bool,
	#[command( subcommand )]
	command: Command,
}

#[derive( Subcommand, Debug )]
enum Command {
	/// Recompile every stored unit
	Reload {
		/// Merge over the existing artifacts instead of starting clean
		#[arg( long )]
		keep: bool,
	},
	/// Compile a unit and store its source
	Upload {
		/// Simple name of the unit
		name: String,
		/// File holding the unit's source
		file: PathBuf,
	},
	/// Run a unit
	Execute {
		/// Qualified name, e.g. sandbox.demo.Echo
		qualified_name: String,
		/// JSON object handed to the unit
		data: Option<String>,
	},
	/// Delete the stored sources of a unit and reload the rest
	Delete {
		name: Option<String>,
	},
	/// List the compiled units
	List,
}

/// The local operator is trusted and holds whatever role the settings require.
struct LocalOperator { role: String }

impl AccountContext for LocalOperator {
	fn authenticate( &self, _: &Credentials ) -> Option<Account> {
		Some( Account { identity: "operator".to_string(), access_level: 0, roles: vec![ self.role.clone() ]})
	}
}

fn main() -> anyhow::Result<()> {

	let cli = Cli::parse();

	let default_level = if cli.debug { "debug" } else { "info" };
	tracing_subscriber::fmt()
		.with_env_filter( EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new( default_level )))
		.with_writer( std::io::stderr )
		.init();

	let settings = match &cli.config {
		Some( path ) => Settings::load( path ).with_context(|| format!( "loading settings from {}", path.display() ))?,
		None => Settings::default(),
	};
	let operator = LocalOperator { role: settings.required_role.clone() };
	let service = PluginService::new( settings, operator ).context( "setting up the plugin registry" )?;

	let envelope = match cli.command {
		Command::Reload { keep } => {
			let Some( registry ) = service.registry() else { bail!( "plugins are disabled" )};
			let active = registry.load_all( !keep )?;
			info!( active, "reload finished" );
			Envelope::success().with( "plugins_active", active )
		},
		Command::Upload { name, file } => {
			let source = std::fs::read_to_string( &file ).with_context(|| format!( "reading {}", file.display() ))?;
			service.upload( UploadRequest { simple_name: Some( name ), source: Some( source ), ..UploadRequest::default() })
		},
		Command::Execute { qualified_name, data } => {
			let data = match data {
				Some( text ) => serde_json::from_str::<Payload>( &text ).context( "payload must be a JSON object" )?,
				None => Payload::new(),
			};
			service.execute( ExecuteRequest { qualified_name: Some( qualified_name ), data, ..ExecuteRequest::default() })
		},
		Command::Delete { name } => service.delete( DeleteRequest { simple_name: name, ..DeleteRequest::default() }),
		Command::List => {
			let Some( registry ) = service.registry() else { bail!( "plugins are disabled" )};
			let units = registry.compiled_units()?.iter().map( ToString::to_string ).collect::<Vec<_>>();
			Envelope::success().with( "plugins", units )
		},
	};

	println!( "{}", serde_json::to_string_pretty( &envelope.to_json() )? );
	match envelope.is_success() {
		true => Ok(()),
		false => bail!( "request failed with status {}", envelope.status ),
	}

}
