#![cfg(test)]

use crate::error::{ErrorKind, FsErrorKind};
use crate::vfs::{FileKind, MemFs};

#[test]
fn write_then_read_round_trips() {
    let fs = MemFs::new();
    fs.write_file("/hello.txt", "world").expect("write");
    assert_eq!(fs.read_to_string("/hello.txt").expect("read"), "world");
}

#[test]
fn read_missing_file_is_not_found() {
    let fs = MemFs::new();
    let err = fs.read_file("/absent.txt").expect_err("missing file");
    assert_eq!(err.kind, ErrorKind::Fs(FsErrorKind::NotFound));
}

#[test]
fn read_directory_is_rejected() {
    let fs = MemFs::new();
    fs.mkdir("/dir", false).expect("mkdir");
    let err = fs.read_file("/dir").expect_err("read dir");
    assert_eq!(err.kind, ErrorKind::Fs(FsErrorKind::IsDirectory));
}

#[test]
fn write_into_missing_parent_is_not_found() {
    let fs = MemFs::new();
    let err = fs.write_file("/no/such/file.txt", "x").expect_err("missing parent");
    assert_eq!(err.kind, ErrorKind::Fs(FsErrorKind::NotFound));
}

#[test]
fn append_creates_then_extends() {
    let fs = MemFs::new();
    fs.append_file("/log.txt", b"one").expect("create via append");
    fs.append_file("/log.txt", b" two").expect("append");
    assert_eq!(fs.read_to_string("/log.txt").unwrap(), "one two");
    assert_eq!(fs.stat("/log.txt").unwrap().size, 7);
}

#[test]
fn copy_file_duplicates_contents() {
    let fs = MemFs::new();
    fs.write_file("/src.bin", vec![1u8, 2, 3]).unwrap();
    fs.copy_file("/src.bin", "/dst.bin").expect("copy");
    assert_eq!(fs.read_file("/dst.bin").unwrap(), vec![1, 2, 3]);
}

#[test]
fn mkdir_recursive_builds_chain() {
    let fs = MemFs::new();
    fs.mkdir("/a/b/c", true).expect("mkdir -p");
    assert!(fs.stat("/a/b/c").unwrap().is_dir());
    // Existing directories are fine on the recursive path.
    fs.mkdir("/a/b", true).expect("idempotent");
}

#[test]
fn mkdir_non_recursive_requires_parent_and_absence() {
    let fs = MemFs::new();
    let err = fs.mkdir("/x/y", false).expect_err("missing parent");
    assert_eq!(err.kind, ErrorKind::Fs(FsErrorKind::NotFound));

    fs.mkdir("/x", false).unwrap();
    let err = fs.mkdir("/x", false).expect_err("already exists");
    assert_eq!(err.kind, ErrorKind::Fs(FsErrorKind::AlreadyExists));
}

#[test]
fn readdir_preserves_insertion_order() {
    let fs = MemFs::new();
    fs.mkdir("/dir", false).unwrap();
    fs.write_file("/dir/zeta.txt", "z").unwrap();
    fs.write_file("/dir/alpha.txt", "a").unwrap();
    fs.mkdir("/dir/mid", false).unwrap();

    assert_eq!(fs.readdir("/dir").unwrap(), vec!["zeta.txt", "alpha.txt", "mid"]);

    let types = fs.readdir_types("/dir").unwrap();
    assert_eq!(types[0].kind, FileKind::File);
    assert_eq!(types[2].kind, FileKind::Dir);
}

#[test]
fn rmdir_non_recursive_refuses_non_empty() {
    let fs = MemFs::new();
    fs.mkdir("/dir", false).unwrap();
    fs.write_file("/dir/file.txt", "x").unwrap();

    let err = fs.rmdir("/dir", false).expect_err("not empty");
    assert_eq!(err.kind, ErrorKind::Fs(FsErrorKind::NotEmpty));

    fs.rmdir("/dir", true).expect("recursive removal");
    assert!(!fs.exists("/dir"));
}

#[test]
fn rmdir_root_only_recursively() {
    let fs = MemFs::new();
    fs.write_file("/keep.txt", "x").unwrap();

    let err = fs.rmdir("/", false).expect_err("root is protected");
    assert_eq!(err.kind, ErrorKind::FsPermission);

    fs.rmdir("/", true).expect("recursive clear");
    assert!(fs.stat("/").unwrap().is_dir());
    assert!(fs.readdir("/").unwrap().is_empty());
}

#[test]
fn unlink_removes_files_but_not_directories() {
    let fs = MemFs::new();
    fs.write_file("/f.txt", "x").unwrap();
    fs.mkdir("/d", false).unwrap();

    fs.unlink("/f.txt").expect("unlink file");
    assert!(!fs.exists("/f.txt"));

    let err = fs.unlink("/d").expect_err("unlink dir");
    assert_eq!(err.kind, ErrorKind::FsPermission);
}

#[test]
fn rename_moves_nodes_and_replaces_files() {
    let fs = MemFs::new();
    fs.mkdir("/dir", false).unwrap();
    fs.write_file("/dir/a.txt", "a").unwrap();
    fs.write_file("/b.txt", "old").unwrap();

    fs.rename("/dir/a.txt", "/b.txt").expect("rename over file");
    assert_eq!(fs.read_to_string("/b.txt").unwrap(), "a");
    assert!(!fs.exists("/dir/a.txt"));
}

#[test]
fn rename_into_own_subtree_is_rejected() {
    let fs = MemFs::new();
    fs.mkdir("/dir", false).unwrap();
    let err = fs.rename("/dir", "/dir/inner").expect_err("self-move");
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
}

#[test]
fn chmod_updates_mode() {
    let fs = MemFs::new();
    fs.write_file("/f.txt", "x").unwrap();
    fs.chmod("/f.txt", 0o600).expect("chmod");
    assert_eq!(fs.stat("/f.txt").unwrap().mode, 0o600);
}

#[test]
fn write_updates_size_and_mtime() {
    let fs = MemFs::new();
    fs.write_file("/f.txt", "abc").unwrap();
    let before = fs.stat("/f.txt").unwrap();
    assert_eq!(before.size, 3);

    fs.write_file("/f.txt", "abcdef").unwrap();
    let after = fs.stat("/f.txt").unwrap();
    assert_eq!(after.size, 6);
    assert!(after.mtime >= before.mtime);
    assert_eq!(after.ino, before.ino);
}

#[test]
fn generation_advances_on_mutation_only() {
    let fs = MemFs::new();
    let start = fs.generation();
    let _ = fs.readdir("/");
    assert_eq!(fs.generation(), start);

    fs.write_file("/f.txt", "x").unwrap();
    assert!(fs.generation() > start);
}
