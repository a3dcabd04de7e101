use wasm_unit_host::scan_namespace ;

#[test]
fn declaration_on_first_line() {
    assert_eq!( scan_namespace( ";; namespace sandbox.demo;\n(module)" ), Some( "sandbox.demo" ));
}

#[test]
fn declaration_after_comments_and_blank_lines() {
    let source = "\n;; Echo unit\n\n   ;;   namespace   a.b.c ;  \n(module)" ;
    assert_eq!( scan_namespace( source ), Some( "a.b.c" ));
}

#[test]
fn declaration_after_code_is_ignored() {
    assert_eq!( scan_namespace( "(module)\n;; namespace late.decl;" ), None );
}

#[test]
fn missing_declaration() {
    assert_eq!( scan_namespace( ";; just a comment\n(module)" ), None );
    assert_eq!( scan_namespace( "" ), None );
}

#[test]
fn empty_namespace_is_missing() {
    assert_eq!( scan_namespace( ";; namespace ;\n(module)" ), None );
    assert_eq!( scan_namespace( ";; namespace    ;\n(module)" ), None );
}

#[test]
fn malformed_namespaces_are_rejected() {
    assert_eq!( scan_namespace( ";; namespace a..b;\n(module)" ), None );
    assert_eq!( scan_namespace( ";; namespace ../escape;\n(module)" ), None );
    assert_eq!( scan_namespace( ";; namespace 1st.place;\n(module)" ), None );
}

#[test]
fn declaration_requires_terminating_semicolon() {
    assert_eq!( scan_namespace( ";; namespace sandbox.demo\n(module)" ), None );
}

#[test]
fn prose_starting_with_the_keyword_is_not_a_declaration() {
    let source = ";; namespaces are declared below\n;; namespace real.one;\n(module)" ;
    assert_eq!( scan_namespace( source ), Some( "real.one" ));
}

#[test]
fn first_declaration_wins() {
    assert_eq!( scan_namespace( ";; namespace first.one;\n;; namespace second.one;\n(module)" ), Some( "first.one" ));
}
