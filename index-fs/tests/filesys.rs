use std::sync::Arc;

use block_dev::RamDisk;
use index_fs::{BLOCK_SIZE, Error, FileSystem, FreeMap, MAX_FILE_SIZE};

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn format(sectors: usize) -> FileSystem {
    init_log();
    FileSystem::format(Arc::new(RamDisk::new(sectors)), FreeMap::new(sectors)).unwrap()
}

#[test]
fn write_read_remove_while_open() {
    let mut fs = format(1024);
    let free = fs.allocator().free_count();

    fs.create(None, "f", 0).unwrap();
    let inode = fs.open(None, "f").unwrap();
    let data: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
    assert_eq!(2000, fs.write_at(&inode, &data, 0));
    assert_eq!(2000, fs.length(&inode));

    fs.remove(None, "f").unwrap();
    assert!(fs.is_removed(&inode));
    assert_eq!(Err(Error::NotFound), fs.open(None, "f").map(|_| ()));

    // 删除后已打开的使用者照常读取
    let mut buf = vec![0; 2000];
    assert_eq!(2000, fs.read_at(&inode, &mut buf, 0));
    assert_eq!(data, buf);

    fs.close_inode(inode);
    assert_eq!(free, fs.allocator().free_count());
    assert_eq!(0, fs.open_inodes());
}

#[test]
fn boundary_sizes_read_back_zero() {
    let sizes = [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, MAX_FILE_SIZE];
    let mut fs = format(16384 + 128 + 64);

    for (i, size) in sizes.into_iter().enumerate() {
        let name = format!("f{i}");
        fs.create(None, &name, size).unwrap();

        let inode = fs.open(None, &name).unwrap();
        assert_eq!(size, fs.length(&inode));
        let mut buf = vec![0xff; BLOCK_SIZE + 1];
        let tail = size.saturating_sub(buf.len());
        assert_eq!(size - tail, fs.read_at(&inode, &mut buf, tail));
        assert!(buf[..size - tail].iter().all(|&b| b == 0), "{size}");
        fs.close_inode(inode);

        // 只有最大的文件放不下第二份，删掉腾出空间
        fs.remove(None, &name).unwrap();
    }
}

#[test]
fn file_cannot_exceed_max_size() {
    let mut fs = format(256);
    assert_eq!(Err(Error::FileTooLarge), fs.create(None, "f", MAX_FILE_SIZE + 1));

    fs.create(None, "f", 0).unwrap();
    let inode = fs.open(None, "f").unwrap();
    assert_eq!(0, fs.write_at(&inode, b"x", MAX_FILE_SIZE));
    assert_eq!(0, fs.length(&inode));
    fs.close_inode(inode);
}

#[test]
fn sparse_extension_reads_zero() {
    let mut fs = format(512);
    fs.create(None, "sparse", 0).unwrap();
    let inode = fs.open(None, "sparse").unwrap();

    let far = 100 * BLOCK_SIZE + 7;
    assert_eq!(3, fs.write_at(&inode, b"end", far));
    assert_eq!(far + 3, fs.length(&inode));

    let mut buf = vec![0xff; far];
    assert_eq!(far, fs.read_at(&inode, &mut buf, 0));
    assert!(buf.iter().all(|&b| b == 0));
    fs.close_inode(inode);
}

#[test]
fn shared_open_sees_writes() {
    let mut fs = format(256);
    fs.create(None, "f", 0).unwrap();
    let a = fs.open(None, "f").unwrap();
    let b = fs.open(None, "/f").unwrap();
    assert_eq!(a, b);
    assert_eq!(2, fs.open_count(&a));
    assert_eq!(1, fs.open_inodes());

    fs.write_at(&a, b"shared", 0);
    let mut buf = [0; 6];
    assert_eq!(6, fs.read_at(&b, &mut buf, 0));
    assert_eq!(b"shared", &buf);

    fs.close_inode(a);
    fs.close_inode(b);
    assert_eq!(0, fs.open_inodes());
}

#[test]
fn nested_directories() {
    let mut fs = format(512);
    fs.mkdir(None, "/a").unwrap();
    fs.mkdir(None, "/a/b/").unwrap();
    fs.create(None, "/a/b/f", 10).unwrap();
    assert_eq!(Err(Error::NotFound), fs.mkdir(None, "/x/y"));
    assert_eq!(Err(Error::AlreadyExists), fs.mkdir(None, "a"));

    let mut b = fs.chdir(None, "a/b").unwrap();
    let entry = fs.list_next_entry(&mut b).unwrap();
    assert_eq!("f", entry.name);
    assert_eq!(None, fs.list_next_entry(&mut b));

    let inode = fs.open(Some(&b), "../b/f").unwrap();
    assert_eq!(10, fs.length(&inode));
    fs.close_inode(inode);

    assert_eq!(Err(Error::DirectoryNotEmpty), fs.remove(None, "a"));
    fs.remove(Some(&b), "f").unwrap();
    fs.close_dir(b);
    fs.remove(None, "a/b").unwrap();
    fs.remove(None, "a").unwrap();
    assert_eq!(0, fs.open_inodes());
}

#[test]
fn deny_write_protects_executable() {
    let mut fs = format(256);
    fs.create(None, "prog", 4).unwrap();
    let running = fs.open(None, "prog").unwrap();
    fs.deny_write(&running);

    let writer = fs.open(None, "prog").unwrap();
    assert_eq!(0, fs.write_at(&writer, b"evil", 0));
    fs.close_inode(writer);

    fs.allow_write(&running);
    fs.close_inode(running);

    let writer = fs.open(None, "prog").unwrap();
    assert_eq!(4, fs.write_at(&writer, b"good", 0));
    fs.close_inode(writer);
}

#[test]
fn volume_persists_across_remount() {
    init_log();
    let disk = Arc::new(RamDisk::new(1024));

    let mut fs = FileSystem::create_volume(disk.clone(), disk.sectors()).unwrap();
    fs.mkdir(None, "docs").unwrap();
    fs.create(None, "docs/readme", 0).unwrap();
    let inode = fs.open(None, "docs/readme").unwrap();
    assert_eq!(11, fs.write_at(&inode, b"hello world", 0));
    fs.close_inode(inode);
    let free = fs.allocator().free_count();
    fs.close_volume().unwrap();

    let mut fs = FileSystem::open_volume(disk.clone(), disk.sectors()).unwrap();
    assert_eq!(free, fs.allocator().free_count());

    let inode = fs.open(None, "/docs/readme").unwrap();
    let mut buf = [0; 11];
    assert_eq!(11, fs.read_at(&inode, &mut buf, 0));
    assert_eq!(b"hello world", &buf);
    fs.close_inode(inode);

    // 恢复出的位图不会把已占用的扇区再分出去
    fs.create(None, "docs/other", 2000).unwrap();
    let inode = fs.open(None, "docs/readme").unwrap();
    fs.read_at(&inode, &mut buf, 0);
    assert_eq!(b"hello world", &buf);
    fs.close_inode(inode);
    fs.close_volume().unwrap();
}

#[test]
fn exhaustion_is_recoverable() {
    let mut fs = format(64);
    let free = fs.allocator().free_count();

    assert_eq!(Err(Error::NoSpace), fs.create(None, "huge", 100 * BLOCK_SIZE));
    assert_eq!(free, fs.allocator().free_count());

    fs.create(None, "grow", 0).unwrap();
    let inode = fs.open(None, "grow").unwrap();
    let written = fs.write_at(&inode, &vec![1; 100 * BLOCK_SIZE], 0);
    assert!(written < 100 * BLOCK_SIZE);
    assert_eq!(written, fs.length(&inode));
    fs.close_inode(inode);

    fs.remove(None, "grow").unwrap();
    assert_eq!(free, fs.allocator().free_count());
}
