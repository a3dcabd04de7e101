use wasm_unit_host::{ CompileError, ErrorCategory, RegistryError, ReportedError };

use crate::workspace::{ fixture, Workspace };

#[test]
fn syntax_error_writes_nothing() {

    let workspace = Workspace::new();
    let registry = workspace.registry();

    match registry.compile_and_store( "Broken", &fixture( "syntax_error" ), true ) {
        Err( RegistryError::Compile( CompileError::Diagnostics { unit, diagnostics })) => {
            assert_eq!( unit, "Broken" );
            assert!( !diagnostics.is_empty() );
        },
        other => panic!( "Expected diagnostics, got: {:#?}", other ),
    }

    assert!( !workspace.artifact( "sandbox.broken", "Broken" ).exists() );
    assert!( !workspace.source_dir().join( "Broken.src" ).exists() );
    assert_category!( registry.resolve( "sandbox.broken.Broken" ), ErrorCategory::PluginNotFound );

}

#[test]
fn validation_error_is_a_compile_error() {

    let workspace = Workspace::new();
    let registry = workspace.registry();

    let result = registry.compile_and_store( "Typed", &fixture( "type_error" ), true );
    assert!( matches!( result, Err( RegistryError::Compile( CompileError::Diagnostics { .. }))));
    assert!( !workspace.artifact( "sandbox.broken", "Typed" ).exists() );

}

#[test]
fn missing_namespace_is_reported() {

    let workspace = Workspace::new();
    let registry = workspace.registry();

    let err = registry.compile_and_store( "Lost", &fixture( "no_namespace" ), true ).expect_err( "must fail" );
    assert!( matches!( err, RegistryError::Compile( CompileError::MissingNamespace( _ ))));
    assert_eq!( err.category(), ErrorCategory::MissingNamespace );
    assert!( std::fs::read_dir( workspace.output_dir() ).unwrap().next().is_none() );

}

#[test]
fn invalid_simple_names_are_rejected() {

    let workspace = Workspace::new();
    let registry = workspace.registry();

    let err = registry.compile_and_store( "../Echo", &fixture( "echo" ), true ).expect_err( "must fail" );
    assert!( matches!( err, RegistryError::Compile( CompileError::InvalidName( _ ))));

}

#[test]
fn failed_compile_keeps_previous_artifact_live() {

    let workspace = Workspace::new();
    let registry = workspace.registry();
    registry.compile_and_store( "Echo", &fixture( "echo" ), true ).expect( "compilation failed" );
    registry.resolve( "sandbox.demo.Echo" ).expect( "resolution failed" );

    let broken = fixture( "syntax_error" ).replace( "sandbox.broken", "sandbox.demo" );
    assert!( registry.compile_and_store( "Echo", &broken, true ).is_err() );

    assert_eq!( registry.loader().cached(), 1 );
    assert_eq!( std::fs::read_to_string( workspace.source_dir().join( "Echo.src" )).unwrap(), fixture( "echo" ));
    registry.resolve( "sandbox.demo.Echo" ).expect( "resolution failed" );

}

#[test]
fn public_messages_hide_paths() {

    let workspace = Workspace::new();
    let registry = workspace.registry();
    let root = workspace.root().to_string_lossy().to_string();

    let err = registry.compile_and_store( "Broken", &fixture( "syntax_error" ), true ).expect_err( "must fail" );
    assert!( !err.public_message().contains( &root ));

}
