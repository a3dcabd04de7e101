use serde_json::json ;
use wasm_unit_host::{ DeleteRequest, ErrorCategory, ExecuteRequest, PluginService, UploadRequest };

use crate::accounts::TrustingAccounts ;
use crate::workspace::{ fixture, payload, Workspace };

fn started_service( workspace: &Workspace ) -> PluginService {
    let service = PluginService::new( workspace.settings.clone(), TrustingAccounts ).expect( "failed to create service" );
    service.start().expect( "start failed" );
    service
}

fn upload( service: &PluginService, simple_name: &str, fixture_name: &str ) -> wasm_unit_host::Envelope {
    service.upload( UploadRequest {
        simple_name: Some( simple_name.to_string() ),
        source: Some( fixture( fixture_name )),
        ..Default::default()
    })
}

#[test]
fn start_loads_stored_units() {

    let workspace = Workspace::new();
    workspace.write_source( "Echo.src", &fixture( "echo" ));
    let service = PluginService::new( workspace.settings.clone(), TrustingAccounts ).expect( "failed to create service" );

    assert_eq!( service.start().expect( "start failed" ), 1 );

}

#[test]
fn upload_then_execute() {

    let workspace = Workspace::new();
    let service = started_service( &workspace );

    let envelope = upload( &service, "Echo", "echo" );
    assert_eq!( envelope.to_json(), json!({
        "result": "success",
        "user": "anonymous",
        "plugin": "sandbox.demo.Echo",
        "compiled": true,
        "stored": true,
        "plugins_reloaded": true,
        "plugins_active": 1,
    }));

    let envelope = service.execute( ExecuteRequest {
        qualified_name: Some( "sandbox.demo.Echo".into() ),
        data: payload( json!({ "name": "Ann" })),
        ..Default::default()
    });
    assert_eq!( envelope.status, 200 );
    assert_eq!( envelope.to_json(), json!({
        "result": "success",
        "user": "anonymous",
        "plugin": "sandbox.demo.Echo",
        "data": { "status": "success", "hello": "Ann" },
    }));

}

#[test]
fn upload_requires_name_and_source() {

    let workspace = Workspace::new();
    let service = started_service( &workspace );

    for request in [
        UploadRequest { simple_name: Some( "Echo".into() ), ..Default::default() },
        UploadRequest { source: Some( fixture( "echo" )), ..Default::default() },
        UploadRequest { simple_name: Some( "  ".into() ), source: Some( fixture( "echo" )), ..Default::default() },
    ] {
        let envelope = service.upload( request );
        assert_eq!( envelope.category, Some( ErrorCategory::BadRequest ));
        assert_eq!( envelope.status, 400 );
    }

}

#[test]
fn upload_reports_compile_errors() {

    let workspace = Workspace::new();
    let service = started_service( &workspace );

    let envelope = upload( &service, "Broken", "syntax_error" );
    assert_eq!( envelope.category, Some( ErrorCategory::Compile ));
    assert!( envelope.get( "compiled" ).is_none() );

    let envelope = upload( &service, "Lost", "no_namespace" );
    assert_eq!( envelope.category, Some( ErrorCategory::MissingNamespace ));

}

#[test]
fn execute_failures_are_sanitised() {

    let workspace = Workspace::new();
    let service = started_service( &workspace );
    upload( &service, "Trap", "trap" );
    upload( &service, "Admin", "server_admin" );

    let execute = | name: &str | service.execute( ExecuteRequest { qualified_name: Some( name.into() ), ..Default::default() });

    let envelope = execute( "sandbox.faulty.Trap" );
    assert_eq!( envelope.category, Some( ErrorCategory::PluginExecution ));
    assert_eq!( envelope.status, 500 );
    assert!( envelope.get( "data" ).is_none() );

    let envelope = execute( "host.server.Admin" );
    assert_eq!( envelope.category, Some( ErrorCategory::ForbiddenNamespace ));
    assert_eq!( envelope.status, 403 );

    let envelope = execute( "sandbox.demo.Missing" );
    assert_eq!( envelope.category, Some( ErrorCategory::PluginNotFound ));
    assert_eq!( envelope.error.as_deref(), Some( "Unit 'sandbox.demo.Missing' not found" ));

    let envelope = service.execute( ExecuteRequest::default() );
    assert_eq!( envelope.category, Some( ErrorCategory::BadRequest ));

    let root = workspace.root().to_string_lossy().to_string();
    for name in [ "sandbox.faulty.Trap", "host.server.Admin", "sandbox.demo.Missing" ] {
        assert!( !execute( name ).to_json().to_string().contains( &root ));
    }

}

#[test]
fn delete_reports_counts_and_notes() {

    let workspace = Workspace::new();
    let service = started_service( &workspace );
    upload( &service, "Echo", "echo" );
    upload( &service, "Trap", "trap" );

    let envelope = service.delete( DeleteRequest { simple_name: Some( "Echo".into() ), ..Default::default() });
    assert_eq!( envelope.to_json(), json!({
        "result": "success",
        "user": "anonymous",
        "plugins_deleted": 1,
        "plugins_reloaded": true,
        "plugins_active": 1,
    }));

    let envelope = service.delete( DeleteRequest { simple_name: Some( "Echo".into() ), ..Default::default() });
    assert_eq!( envelope.get( "plugins_deleted" ), Some( &json!( 0 )));
    assert_eq!( envelope.get( "note" ), Some( &json!( "0 files deleted: no source named 'Echo' found" )));

    let envelope = service.delete( DeleteRequest::default() );
    assert!( envelope.is_success() );
    assert_eq!( envelope.get( "note" ), Some( &json!( "0 files deleted: parameter 'simple_name' is missing" )));
    assert_eq!( envelope.get( "plugins_active" ), Some( &json!( 1 )));

}

#[test]
fn requests_deserialise_from_json() {

    let request: ExecuteRequest = serde_json::from_value( json!({
        "qualified_name": "sandbox.demo.Echo",
        "data": { "name": "Ann" },
    })).expect( "invalid request" );
    assert_eq!( request.qualified_name.as_deref(), Some( "sandbox.demo.Echo" ));
    assert!( request.credentials.is_empty() );

}

#[test]
fn upload_reports_a_source_that_could_not_be_stored() {

    let workspace = Workspace::new();
    let service = started_service( &workspace );
    std::fs::create_dir_all( workspace.source_dir().join( "Echo.src" )).unwrap();

    let envelope = upload( &service, "Echo", "echo" );
    assert!( !envelope.is_success() );
    assert_eq!( envelope.category, Some( ErrorCategory::Store ));
    assert_eq!( envelope.get( "compiled" ), Some( &json!( true )));
    assert_eq!( envelope.get( "stored" ), Some( &json!( false )));
    let message = envelope.error.expect( "missing error message" );
    assert!( !message.contains( &*workspace.root().to_string_lossy() ), "path leaked: {}", message );

}
