#[allow( dead_code )]
mod accounts {

	use wasm_unit_host::{ Account, AccountContext, Credentials };

	/// Accepts `{ "user": <id>, "level": <n>, "roles": [..] }` as credentials verbatim.
	pub struct TrustingAccounts ;

	impl AccountContext for TrustingAccounts {
		fn authenticate( &self, credentials: &Credentials ) -> Option<Account> {
			let identity = credentials.get( "user" )?.as_str()?.to_string();
			let access_level = credentials.get( "level" ).and_then( serde_json::Value::as_i64 ).unwrap_or( 0 );
			let roles = credentials.get( "roles" )
				.and_then( serde_json::Value::as_array )
				.map(| roles | roles.iter().filter_map( serde_json::Value::as_str ).map( str::to_string ).collect() )
				.unwrap_or_default();
			Some( Account { identity, access_level: i32::try_from( access_level ).ok()?, roles })
		}
	}

	pub fn credentials( value: serde_json::Value ) -> Credentials {
		crate::workspace::payload( value )
	}

}
