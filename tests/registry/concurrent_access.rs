use std::sync::Arc ;
use std::thread ;

use crate::workspace::{ fixture, payload, Workspace };

#[test]
fn executions_survive_concurrent_reloads() {

    let workspace = Workspace::new();
    let registry = Arc::new( workspace.registry() );
    registry.compile_and_store( "Echo", &fixture( "echo" ), true ).expect( "compilation failed" );

    let readers = ( 0..4 ).map(| index | {
        let registry = Arc::clone( &registry );
        thread::spawn( move || for _ in 0..20 {
            let name = format!( "reader-{}", index );
            let result = registry
                .execute_named( "sandbox.demo.Echo", payload( serde_json::json!({ "name": name.clone() })))
                .expect( "execution failed" );
            assert_eq!( result.get( "hello" ), Some( &serde_json::Value::String( name )));
        })
    }).collect::<Vec<_>>();

    for _ in 0..5 {
        registry.load_all( true ).expect( "reload failed" );
    }

    for reader in readers { reader.join().expect( "reader panicked" ); }

}

#[test]
fn handles_outlive_cache_resets() {

    let workspace = Workspace::new();
    let registry = workspace.registry();
    registry.compile_and_store( "Echo", &fixture( "echo" ), true ).expect( "compilation failed" );

    let handle = registry.resolve( "sandbox.demo.Echo" ).expect( "resolution failed" );
    registry.delete_source( Some( "Echo" )).expect( "deletion failed" );

    let result = registry.execute( &handle, payload( serde_json::json!({ "name": "Ann" }))).expect( "execution failed" );
    assert_eq!( result.status(), Some( "success" ));

}
