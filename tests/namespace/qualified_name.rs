use wasm_unit_host::{ QualifiedName, is_valid_simple_name };

#[test]
fn parse_splits_at_last_dot() {
    let name = QualifiedName::parse( "sandbox.demo.Echo" ).expect( "valid name" );
    assert_eq!( name.namespace(), "sandbox.demo" );
    assert_eq!( name.simple_name(), "Echo" );
    assert_eq!( name.to_string(), "sandbox.demo.Echo" );
}

#[test]
fn names_without_namespace_are_rejected() {
    assert_eq!( QualifiedName::parse( "Echo" ), None );
    assert_eq!( QualifiedName::parse( ".Echo" ), None );
    assert_eq!( QualifiedName::parse( "sandbox." ), None );
}

#[test]
fn path_components_are_rejected() {
    assert_eq!( QualifiedName::parse( "../etc.passwd" ), None );
    assert_eq!( QualifiedName::new( "sandbox", "a/b" ), None );
    assert_eq!( QualifiedName::new( "sandbox/demo", "Echo" ), None );
}

#[test]
fn simple_names_are_identifiers() {
    assert!( is_valid_simple_name( "Echo" ));
    assert!( is_valid_simple_name( "_echo_2" ));
    assert!( !is_valid_simple_name( "2echo" ));
    assert!( !is_valid_simple_name( "Echo " ));
    assert!( !is_valid_simple_name( "" ));
}
