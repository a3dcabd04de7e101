//! Unit naming.
//!
//! A unit is addressed by its **qualified name**: the namespace declared in its
//! source text followed by its simple name, joined by a dot (`sandbox.demo.Echo`).
//! Both parts double as path components inside the output directory, so both are
//! restricted to identifier segments.

/// Marker that opens a namespace declaration inside a WAT line comment.
const DECLARATION_KEYWORD: &str = "namespace" ;



/// Namespace + simple name uniquely identifying a compiled unit.
#[derive( Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord )]
pub struct QualifiedName {
	namespace: String,
	simple_name: String,
}

impl QualifiedName {

	/// Builds a qualified name from its parts, or `None` if either part is malformed.
	pub fn new( namespace: impl Into<String>, simple_name: impl Into<String> ) -> Option<Self> {
		let namespace = namespace.into();
		let simple_name = simple_name.into();
		match is_valid_namespace( &namespace ) && is_valid_simple_name( &simple_name ) {
			true => Some( Self { namespace, simple_name }),
			false => None,
		}
	}

	/// Splits `namespace.SimpleName` at the last dot.
	///
	/// Names without a namespace are rejected: every unit declares one.
	pub fn parse( qualified: &str ) -> Option<Self> {
		let ( namespace, simple_name ) = qualified.rsplit_once( '.' )?;
		Self::new( namespace, simple_name )
	}

	#[inline] pub fn namespace( &self ) -> &str { &self.namespace }
	#[inline] pub fn simple_name( &self ) -> &str { &self.simple_name }

}

impl std::fmt::Display for QualifiedName {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		write!( f, "{}.{}", self.namespace, self.simple_name )
	}
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_simple_name( name: &str ) -> bool {
	let mut chars = name.chars();
	match chars.next() {
		Some( first ) if first.is_ascii_alphabetic() || first == '_' =>
			chars.all(| c | c.is_ascii_alphanumeric() || c == '_' ),
		_ => false,
	}
}

/// One or more simple-name segments joined by single dots.
pub fn is_valid_namespace( namespace: &str ) -> bool {
	!namespace.is_empty() && namespace.split( '.' ).all( is_valid_simple_name )
}

/// Finds the namespace declared in the leading comment block of a WAT source.
///
/// The declaration has the form `;; namespace sandbox.demo;` and must appear before
/// the first line of code; blank lines and other `;;` comments may precede it.
/// Returns `None` when no declaration is found or when the declared namespace is
/// empty or malformed.
///
/// ```
/// use wasm_unit_host::scan_namespace ;
///
/// let source = ";; Echo unit\n;; namespace sandbox.demo;\n(module)" ;
/// assert_eq!( scan_namespace( source ), Some( "sandbox.demo" ));
/// assert_eq!( scan_namespace( "(module)\n;; namespace late.decl;" ), None );
/// ```
pub fn scan_namespace( source: &str ) -> Option<&str> {
	source.lines()
		.map( str::trim )
		.take_while(| line | line.is_empty() || line.starts_with( ";;" ))
		.filter_map(| line | line.strip_prefix( ";;" ))
		.find_map( parse_declaration )
}

fn parse_declaration( comment: &str ) -> Option<&str> {
	let rest = comment.trim_start().strip_prefix( DECLARATION_KEYWORD )?;
	// `;; namespaces are...` is prose, not a declaration
	if !rest.starts_with( char::is_whitespace ) { return None }
	let declared = rest.trim().strip_suffix( ';' )?.trim();
	is_valid_namespace( declared ).then_some( declared )
}
