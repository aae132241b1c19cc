//! Integration test driving `FileSystem` over a real file-backed image,
//! including an unmount/remount cycle through `FileSystem::open`.

use uxfs::{Error, FileStorage, FileSystem, ROOT_INODE};

const NT: u64 = 1300;
const NI: u64 = 9;

#[test]
fn mkfs_populate_reopen_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.uxfs");

    {
        let storage = FileStorage::create(&path, NT).unwrap();
        let mut fs = FileSystem::mkfs(storage, NI).unwrap();

        fs.mkdir("/docs").unwrap();
        fs.mknod("/docs/readme.txt").unwrap();
        let id = fs.path2iid("/docs/readme.txt").unwrap();
        fs.write(id, b"hello, filesystem", 0).unwrap();

        fs.mknod("/top.txt").unwrap();
        let top = fs.path2iid("/top.txt").unwrap();
        fs.write(top, &[9u8; 20_000], 0).unwrap();
    }

    let storage = FileStorage::open(&path).unwrap();
    let mut fs = FileSystem::open(storage).unwrap();

    let id = fs.path2iid("/docs/readme.txt").unwrap();
    let mut buf = [0u8; 17];
    let n = fs.read(id, &mut buf, 0).unwrap();
    assert_eq!(n, 17);
    assert_eq!(&buf, b"hello, filesystem");

    let top = fs.path2iid("/top.txt").unwrap();
    let attr = fs.getattr(top).unwrap();
    assert_eq!(attr.size, 20_000);

    let entries = fs.readdir(ROOT_INODE).unwrap();
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"docs"));
    assert!(names.contains(&"top.txt"));

    fs.unlink("/top.txt").unwrap();
    assert_eq!(fs.path2iid("/top.txt"), Err(Error::NotFound));
}

#[test]
fn directory_lifecycle_across_mount() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.uxfs");

    let storage = FileStorage::create(&path, NT).unwrap();
    let mut fs = FileSystem::mkfs(storage, NI).unwrap();

    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.mknod("/a/b/f").unwrap();

    assert_eq!(fs.rmdir("/a"), Err(Error::NotEmpty));
    assert_eq!(fs.rmdir("/a/b"), Err(Error::NotEmpty));

    fs.unlink("/a/b/f").unwrap();
    fs.rmdir("/a/b").unwrap();
    fs.rmdir("/a").unwrap();

    assert_eq!(fs.path2iid("/a"), Err(Error::NotFound));
}

#[test]
fn truncate_shrink_then_grow_preserves_leading_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.uxfs");

    let storage = FileStorage::create(&path, NT).unwrap();
    let mut fs = FileSystem::mkfs(storage, NI).unwrap();

    fs.mknod("/f").unwrap();
    let id = fs.path2iid("/f").unwrap();
    fs.write(id, b"0123456789", 0).unwrap();
    fs.truncate(id, 4).unwrap();
    assert_eq!(fs.getattr(id).unwrap().size, 4);

    fs.truncate(id, 8).unwrap();
    let mut buf = [0xffu8; 8];
    fs.read(id, &mut buf, 0).unwrap();
    assert_eq!(&buf[..4], b"0123");
    assert_eq!(&buf[4..], &[0u8; 4]);
}
