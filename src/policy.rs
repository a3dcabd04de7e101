//! Namespace blacklist applied before any resolution.

/// A set of namespace prefixes that resolution must never satisfy.
///
/// A qualified name is forbidden when it equals one of the prefixes or continues
/// it at a segment boundary: the prefix `host.server` forbids `host.server` and
/// `host.server.Config` but not `host.serverless.Config`. The check is purely
/// textual and happens before any artifact lookup.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct SandboxPolicy {
	forbidden: Vec<String>,
}

impl SandboxPolicy {

	pub fn new( forbidden: impl IntoIterator<Item = impl Into<String>> ) -> Self {
		forbidden.into_iter().fold( Self::default(), | policy, prefix | policy.forbid( prefix ))
	}

	/// Adds a namespace, or a fully qualified unit name, to the blacklist.
	///
	/// Surrounding whitespace and trailing dots are ignored; empty entries are
	/// dropped so they cannot accidentally forbid everything.
	pub fn forbid( mut self, prefix: impl Into<String> ) -> Self {
		let prefix = prefix.into();
		let prefix = prefix.trim().trim_end_matches( '.' );
		if !prefix.is_empty() && !self.forbidden.iter().any(| existing | existing == prefix ) {
			self.forbidden.push( prefix.to_string() );
		}
		self
	}

	/// Returns the blacklist entry matching `qualified_name`, if any.
	pub fn violation( &self, qualified_name: &str ) -> Option<&str> {
		self.forbidden.iter()
			.find(| prefix | match qualified_name.strip_prefix( prefix.as_str() ) {
				Some( rest ) => rest.is_empty() || rest.starts_with( '.' ),
				None => false,
			})
			.map( String::as_str )
	}

	#[inline] pub fn is_forbidden( &self, qualified_name: &str ) -> bool { self.violation( qualified_name ).is_some() }

	#[inline] pub fn prefixes( &self ) -> &[String] { &self.forbidden }

}
