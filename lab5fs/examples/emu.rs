use lab5fs::io::FileBlockEmulatorBuilder;
use lab5fs::layout::ROOT_INO;
use lab5fs::{Credentials, FormatOptions, Lab5Fs, MountOptions};

pub fn main() -> lab5fs::Result<()> {
    let tmp = tempfile::tempfile()?;
    let dev = FileBlockEmulatorBuilder::from(tmp.try_clone()?)
        .with_block_size(64)
        .build()?;

    // format a fresh device and put a file under /
    let mut fs = Lab5Fs::format(dev, FormatOptions::default())?;
    let owner = Credentials { uid: 1000, gid: 1000 };
    let ino = fs.create(ROOT_INO, b"hello.txt", 0o644, owner)?;
    let blocknr = fs.bmap(ino, 0, true)?;
    println!("created /hello.txt as inode {} backed by {:?}", ino, blocknr);
    fs.unmount()?;

    // reopen the same medium without clearing it
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_size(64)
        .clear_medium(false)
        .build()?;
    let mut fs = Lab5Fs::mount(dev, MountOptions::default())?;
    println!("{:?}", fs.statfs());

    let mut root = fs.opendir(ROOT_INO, ROOT_INO)?;
    for entry in fs.read_entries(&mut root) {
        println!("{:>4} {}", entry.ino, entry.name);
    }
    println!("hello.txt -> inode {}", fs.lookup(ROOT_INO, b"hello.txt")?);
    Ok(())
}
