// Dependency trees over a real bucket layout


use ladle::LadleError;
use test_helpers::TestEnvironment;

fn chain() -> TestEnvironment {
    let env = TestEnvironment::new();
    env.write_manifest("main", "a", r#"{"version": "1", "depends": "b"}"#);
    env.write_manifest("main", "b", r#"{"version": "1", "depends": ["c"]}"#);
    env.write_manifest("main", "c", r#"{"version": "1"}"#);
    env.write_manifest("main", "unrelated", r#"{"version": "1"}"#);
    env
}

#[test]
fn test_forward_chain() {
    let env = chain();
    let tree = env.manager().dependencies("a").unwrap();

    assert_eq!(tree.depth(), 3);
    assert_eq!(tree.dependency.to_string(), "main/a");
    assert_eq!(tree.children[0].dependency.to_string(), "main/b");
    assert_eq!(tree.children[0].children[0].dependency.to_string(), "main/c");
    assert!(tree.unresolved().is_empty());
}

#[test]
fn test_reverse_chain() {
    let env = chain();
    let tree = env.manager().reverse_dependencies("c").unwrap();

    assert_eq!(tree.depth(), 3);
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].dependency.name, "b");
    assert_eq!(tree.children[0].children[0].dependency.name, "a");
}

#[test]
fn test_cross_bucket_dependency() {
    let env = TestEnvironment::new();
    env.write_manifest("main", "app", r#"{"version": "1", "depends": "extras/lib"}"#);
    env.write_manifest("extras", "lib", r#"{"version": "2"}"#);

    let tree = env.manager().dependencies("main/app").unwrap();
    let lib = tree.children[0].app.as_ref().unwrap();
    assert_eq!(lib.bucket.as_deref(), Some("extras"));
}

#[test]
fn test_missing_dependency_is_reported() {
    let env = TestEnvironment::new();
    env.write_manifest("main", "app", r#"{"version": "1", "depends": "ghost"}"#);

    let tree = env.manager().dependencies("app").unwrap();
    let missing = tree.unresolved();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].name, "ghost");
}

#[test]
fn test_reverse_cycle_is_an_error() {
    let env = TestEnvironment::new();
    env.write_manifest("main", "a", r#"{"version": "1", "depends": "b"}"#);
    env.write_manifest("main", "b", r#"{"version": "1", "depends": "a"}"#);

    let err = env.manager().reverse_dependencies("a").unwrap_err();
    assert!(matches!(err, LadleError::DependencyCycle(_)));
}
