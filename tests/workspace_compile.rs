//! End-to-end workspace resolution and compile planning over a real
//! directory tree with nested configuration scopes.

use std::fs;
use std::path::Path;

use tempfile::tempdir;

use protoforge::{Compiler, DirGroup, ToolchainCache, WorkspaceResolver};

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "syntax = \"proto3\";\n").unwrap();
}

fn fixture_tree(root: &Path) {
    fs::write(
        root.join("protoforge.toml"),
        "[protoc]\nversion = \"3.17.3\"\n",
    )
    .unwrap();
    touch(&root.join("api/v1/user.proto"));
    touch(&root.join("api/v1/order.proto"));
    touch(&root.join("api/common.proto"));

    fs::create_dir_all(root.join("vendor")).unwrap();
    fs::write(
        root.join("vendor/protoforge.toml"),
        "[protoc]\nversion = \"3.11.4\"\nincludes = [\"include\"]\n",
    )
    .unwrap();
    touch(&root.join("vendor/ext.proto"));
}

#[test]
fn resolves_nested_scopes_into_separate_groups() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);

    let unit = WorkspaceResolver::new().resolve(root, root).unwrap();
    assert_eq!(unit.group_count(), 3);
    assert_eq!(unit.file_count(), 4);
    assert_eq!(
        unit.display_files(),
        vec![
            "api/common.proto",
            "api/v1/order.proto",
            "api/v1/user.proto",
            "vendor/ext.proto",
        ]
    );

    let groups: Vec<&DirGroup> = unit.groups().collect();
    let api = groups.iter().find(|g| g.dir.ends_with("v1")).unwrap();
    assert_eq!(api.scope, root);
    assert_eq!(api.config.protoc.version, "3.17.3");

    let vendor = groups.iter().find(|g| g.dir.ends_with("vendor")).unwrap();
    assert_eq!(vendor.scope, root.join("vendor"));
    assert_eq!(vendor.config.protoc.version, "3.11.4");
}

#[test]
fn plan_commands_use_scope_includes_and_overridden_toolchain() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fixture_tree(root);

    let unit = WorkspaceResolver::new().resolve(root, root).unwrap();
    let compiler = Compiler::new(
        ToolchainCache::new()
            .with_protoc_bin_path("/opt/protoc/bin/protoc")
            .with_protoc_include_path("/opt/protoc/include"),
    );
    let commands = compiler.plan_commands(&unit).unwrap();
    assert_eq!(commands.len(), 3);
    for command in &commands {
        assert!(command.starts_with("/opt/protoc/bin/protoc -I "));
        assert!(command.contains("/opt/protoc/include"));
    }

    // the vendor group resolves its extra include against its own scope
    let vendor = commands
        .iter()
        .find(|c| c.ends_with("ext.proto"))
        .unwrap();
    assert!(vendor.contains(&root.join("vendor/include").display().to_string()));
}

#[cfg(unix)]
#[test]
fn compile_surfaces_failures_from_every_group() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let root = dir.path();
    touch(&root.join("api/a.proto"));
    touch(&root.join("models/b.proto"));

    // one diagnostic per invoked directory
    let fake = root.join("fake-protoc");
    fs::write(
        &fake,
        "#!/bin/sh\n\
         for arg in \"$@\"; do\n\
           case \"$arg\" in\n\
             *a.proto) echo 'a.proto:3:1: broken a' >&2 ;;\n\
             *b.proto) echo 'b.proto:7:1: broken b' >&2 ;;\n\
           esac\n\
         done\n\
         exit 1\n",
    )
    .unwrap();
    fs::set_permissions(&fake, fs::Permissions::from_mode(0o755)).unwrap();

    let unit = WorkspaceResolver::new().resolve(root, root).unwrap();
    let compiler = Compiler::new(
        ToolchainCache::new()
            .with_protoc_bin_path(&fake)
            .with_protoc_include_path(root),
    );
    let result = compiler.compile(&unit).unwrap();
    assert!(!result.is_success());
    assert_eq!(result.failures.len(), 2);
    // failures from independent groups come back in canonical order
    assert_eq!(result.failures[0].filename, "a.proto");
    assert_eq!(result.failures[1].filename, "b.proto");
}
