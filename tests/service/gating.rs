use serde_json::json ;
use wasm_unit_host::{ DeleteRequest, ErrorCategory, ExecuteRequest, PluginService, UploadRequest };

use crate::accounts::{ credentials, TrustingAccounts };
use crate::workspace::{ fixture, Workspace };

fn service( configure: impl FnOnce( &mut wasm_unit_host::Settings )) -> ( Workspace, PluginService ) {
    let mut workspace = Workspace::new();
    configure( &mut workspace.settings );
    let service = PluginService::new( workspace.settings.clone(), TrustingAccounts ).expect( "failed to create service" );
    ( workspace, service )
}

fn upload_echo( credentials: wasm_unit_host::Credentials ) -> UploadRequest {
    UploadRequest { simple_name: Some( "Echo".into() ), source: Some( fixture( "echo" )), credentials }
}

#[test]
fn disabled_plugins_refuse_everything() {

    let ( workspace, service ) = service(| settings | settings.plugins_enabled = false );

    for envelope in [
        service.execute( ExecuteRequest { qualified_name: Some( "sandbox.demo.Echo".into() ), ..Default::default() }),
        service.upload( upload_echo( Default::default() )),
        service.delete( DeleteRequest::default() ),
    ] {
        assert!( !envelope.is_success() );
        assert_eq!( envelope.category, Some( ErrorCategory::Disabled ));
        assert_eq!( envelope.status, 400 );
    }
    assert_eq!( service.start().expect( "start failed" ), 0 );
    assert!( !workspace.source_dir().exists() );

}

#[test]
fn anonymous_access_without_auth() {

    let ( _workspace, service ) = service(| _ | ());

    let envelope = service.upload( upload_echo( Default::default() ));
    assert!( envelope.is_success(), "{:?}", envelope );
    assert_eq!( envelope.get( "user" ), Some( &json!( "anonymous" )));

}

#[test]
fn failed_authentication_is_unauthorized() {

    let ( _workspace, service ) = service(| settings | settings.require_auth = true );

    let envelope = service.upload( upload_echo( Default::default() ));
    assert_eq!( envelope.category, Some( ErrorCategory::Unauthorized ));
    assert_eq!( envelope.status, 401 );
    assert!( envelope.error.as_deref().unwrap_or_default().contains( "developer" ));

}

#[test]
fn negative_access_level_is_unauthorized() {

    let ( _workspace, service ) = service(| settings | settings.require_auth = true );

    let envelope = service.upload( upload_echo( credentials( json!({ "user": "ann", "level": -1, "roles": [ "developer" ]}))));
    assert_eq!( envelope.category, Some( ErrorCategory::Unauthorized ));

}

#[test]
fn missing_role_is_unauthorized() {

    let ( _workspace, service ) = service(| settings | settings.require_auth = true );

    let envelope = service.upload( upload_echo( credentials( json!({ "user": "ann", "roles": [ "user" ]}))));
    assert_eq!( envelope.category, Some( ErrorCategory::Unauthorized ));

}

#[test]
fn required_role_grants_access() {

    let ( _workspace, service ) = service(| settings | settings.require_auth = true );

    let envelope = service.upload( upload_echo( credentials( json!({ "user": "ann", "roles": [ "developer" ]}))));
    assert!( envelope.is_success(), "{:?}", envelope );
    assert_eq!( envelope.get( "user" ), Some( &json!( "ann" )));

}

#[test]
fn empty_role_accepts_any_account() {

    let ( _workspace, service ) = service(| settings | {
        settings.require_auth = true ;
        settings.required_role = String::new();
    });

    let envelope = service.upload( upload_echo( credentials( json!({ "user": "bob" }))));
    assert!( envelope.is_success(), "{:?}", envelope );

}
