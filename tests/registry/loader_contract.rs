use wasm_unit_host::{ ErrorCategory, ResolveError };

use crate::workspace::{ fixture, Workspace };

fn resolve_fixture( simple_name: &str, fixture_name: &str ) -> Result<(), ResolveError> {
    let workspace = Workspace::new();
    let registry = workspace.registry();
    let report = registry.compile_and_store( simple_name, &fixture( fixture_name ), true ).expect( "compilation failed" );
    registry.resolve( &report.unit.qualified_name().to_string() ).map(|_| ())
}

#[test]
fn missing_execute_export_fails_to_load() {
    match resolve_fixture( "NoExecute", "no_execute" ) {
        Err( ResolveError::Load { name, reason }) => {
            assert_eq!( name, "sandbox.broken.NoExecute" );
            assert!( reason.contains( "execute" ), "{}", reason );
        },
        other => panic!( "Expected load error, got: {:?}", other ),
    }
}

#[test]
fn mistyped_execute_export_fails_to_load() {
    assert_category!( resolve_fixture( "Mistyped", "wrong_signature" ), ErrorCategory::PluginLoad );
}

#[test]
fn imports_outside_the_host_module_fail_to_load() {
    assert_category!( resolve_fixture( "Escape", "foreign_import" ), ErrorCategory::PluginLoad );
}

#[test]
fn load_errors_do_not_expose_reasons() {
    let err = resolve_fixture( "Escape", "foreign_import" ).expect_err( "must fail" );
    let message = wasm_unit_host::ReportedError::public_message( &err );
    assert_eq!( message, "Unit 'sandbox.broken.Escape' could not be loaded" );
}

#[test]
fn corrupted_artifact_fails_to_load() {

    let workspace = Workspace::new();
    let registry = workspace.registry();
    registry.compile_and_store( "Echo", &fixture( "echo" ), true ).expect( "compilation failed" );
    std::fs::write( workspace.artifact( "sandbox.demo", "Echo" ), b"not wasm" ).unwrap();

    assert_category!( registry.resolve( "sandbox.demo.Echo" ), ErrorCategory::PluginLoad );

}
