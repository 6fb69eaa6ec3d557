//! An instance of the filesystem and the operations exposed to the host VFS.
//!
//! All operations designate files by inode number. The filesystem serializes
//! mutation through `&mut self`: a host exposing parallel callers is expected
//! to wrap the instance in its own exclusive lock.
//!
//! Every mutating operation either commits in full or leaves the image
//! indistinguishable from its pre-call state, with one exception: shrinking a
//! file may be interrupted by a structural error and left partial, which the
//! caller observes as an I/O error.

use crate::bitmap;
use crate::dirent::DIRENT_SIZE;
use crate::dirent::DirectoryEntry;
use crate::dirent::NAME_MAX;
use crate::errno;
use crate::errno::EResult;
use crate::file::DirEntry;
use crate::file::FileType;
use crate::file::Mode;
use crate::file::OpenFlags;
use crate::file::Stat;
use crate::file::StatSet;
use crate::file::Statfs;
use crate::file::Uid;
use crate::img::BLOCK_SIZE;
use crate::img::Image;
use crate::inode::Inode;
use crate::inode::MAX_FILE_BLOCKS;
use crate::inode::size_to_blocks;
use crate::superblock::Superblock;
use crate::symlink;
use log::debug;
use log::info;

/// An instance of the filesystem.
pub struct ImgFs {
	/// The backing image.
	img: Image,
	/// The filesystem's superblock.
	sp: Superblock,
}

impl ImgFs {
	/// Mounts the filesystem contained in the given image.
	///
	/// If the image does not contain a valid filesystem, the function returns
	/// [`errno::EINVAL`].
	pub fn mount(img: Image) -> EResult<Self> {
		let sp = Superblock::read(&img)?;
		sp.check(img.nblocks())?;
		info!(
			"mounted filesystem: {} blocks, {} inodes",
			sp.total_blocks, sp.total_inodes
		);
		Ok(Self {
			img,
			sp,
		})
	}

	/// Unmounts the filesystem, returning the backing image.
	pub fn unmount(self) -> Image {
		self.img
	}

	/// Returns the filesystem's superblock.
	pub fn superblock(&self) -> &Superblock {
		&self.sp
	}

	/// Returns a view over the backing image.
	pub fn image(&self) -> &Image {
		&self.img
	}

	/// Reads the inode `ino`.
	fn inode(&self, ino: u32) -> EResult<Inode> {
		Inode::read(ino, &self.sp, &self.img)
	}

	/// Writes `inode` back at slot `ino`.
	fn update_inode(&mut self, ino: u32, inode: &Inode) -> EResult<()> {
		inode.write(ino, &self.sp, &mut self.img)
	}

	/// Reads the inode `ino`, which must be a directory.
	fn dir_inode(&self, ino: u32) -> EResult<Inode> {
		let inode = self.inode(ino)?;
		if inode.get_type() != Some(FileType::Directory) {
			return Err(errno::ENOTDIR);
		}
		Ok(inode)
	}

	/// Returns the device block holding the content of `inode` at file block
	/// `b`.
	///
	/// The block is required to exist: a zero mapping below the file's size
	/// is a structural error.
	fn content_block(&self, inode: &Inode, b: u32) -> EResult<u32> {
		inode
			.translate_blk_off(b, &self.sp, &self.img)?
			.ok_or(errno::EIO)
	}

	/// Changes the size of a file, allocating and freeing blocks as
	/// necessary.
	///
	/// On an out-of-space failure while growing, the file is rolled back to
	/// the size it had on entry before the error is returned.
	fn change_size(&mut self, inode: &mut Inode, new_size: u32) -> EResult<()> {
		if size_to_blocks(new_size) > MAX_FILE_BLOCKS {
			return Err(errno::EOVERFLOW);
		}
		let old_size = inode.size;
		while size_to_blocks(inode.size) < size_to_blocks(new_size) {
			if let Err(e) = inode.add_block(&self.sp, &mut self.img) {
				if e == errno::ENOSPC {
					while size_to_blocks(inode.size) > size_to_blocks(old_size) {
						inode.remove_block(&self.sp, &mut self.img)?;
					}
					inode.size = old_size;
				}
				return Err(e);
			}
		}
		while size_to_blocks(inode.size) > size_to_blocks(new_size) {
			inode.remove_block(&self.sp, &mut self.img)?;
		}
		inode.size = new_size;
		Ok(())
	}

	/// Reads the directory entry at offset `off` in `dir`.
	///
	/// Entries never straddle a block boundary since their size divides the
	/// block size.
	fn read_dirent(&self, dir: &Inode, off: u32) -> EResult<DirectoryEntry> {
		let blk = self.content_block(dir, off / BLOCK_SIZE)?;
		self.img
			.read_obj::<DirectoryEntry>(blk as u64 * BLOCK_SIZE as u64 + (off % BLOCK_SIZE) as u64)
	}

	/// Writes the directory entry `entry` at offset `off` in `dir`.
	fn write_dirent(&mut self, dir: &Inode, entry: &DirectoryEntry, off: u32) -> EResult<()> {
		let blk = self.content_block(dir, off / BLOCK_SIZE)?;
		self.img
			.write_obj::<DirectoryEntry>(entry, blk as u64 * BLOCK_SIZE as u64 + (off % BLOCK_SIZE) as u64)
	}

	/// Returns the directory entry with the given name, along with its offset
	/// in the directory.
	///
	/// If the entry does not exist, the function returns `None`.
	fn find_dirent(&self, dir: &Inode, name: &[u8]) -> EResult<Option<(u32, DirectoryEntry)>> {
		let mut off = 0;
		while off < dir.size {
			let entry = self.read_dirent(dir, off)?;
			if !entry.is_free() && entry.name() == name {
				return Ok(Some((off, entry)));
			}
			off += DIRENT_SIZE as u32;
		}
		Ok(None)
	}

	/// Returns the offset of a blank directory entry in `dir`, growing the
	/// directory by one entry if every slot is taken.
	///
	/// When the directory grows, its inode is written back immediately so the
	/// new block is reachable.
	fn create_blank_dirent(&mut self, dir_ino: u32, dir: &mut Inode) -> EResult<u32> {
		let mut off = 0;
		while off < dir.size {
			if self.read_dirent(dir, off)?.is_free() {
				return Ok(off);
			}
			off += DIRENT_SIZE as u32;
		}
		// No free slot: add one at the end. Directories only ever grow
		self.change_size(dir, off + DIRENT_SIZE as u32)?;
		self.update_inode(dir_ino, dir)?;
		Ok(off)
	}

	/// Returns the number of the first free inode slot.
	///
	/// If the inode table is full, the function returns [`errno::ENOSPC`].
	fn alloc_inode(&self) -> EResult<u32> {
		for ino in 1..self.sp.total_inodes {
			if self.inode(ino)?.is_free() {
				return Ok(ino);
			}
		}
		Err(errno::ENOSPC)
	}

	/// Looks up the name `name` in the directory `dir`.
	///
	/// If no entry has this name, the function returns `None`.
	pub fn lookup(&self, dir: u32, name: &[u8]) -> EResult<Option<u32>> {
		if name.len() > NAME_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		let dir_inode = self.dir_inode(dir)?;
		Ok(self.find_dirent(&dir_inode, name)?.map(|(_, e)| e.inode))
	}

	/// Iterates over the entries of the directory `dir`, starting at the
	/// cursor position `off`.
	///
	/// `parent` is the inode of the directory's parent, used to synthesize
	/// the `..` entry; `.` and `..` occupy cursor positions 0 and 1 and the
	/// entry at slot `i` is reported at position `2 + i`, free slots being
	/// skipped. The type reported for each entry is the type of the target
	/// inode.
	///
	/// `f` is called for each entry and returns whether the iteration may
	/// continue. The function returns the cursor position to resume from.
	pub fn readdir<F: FnMut(&DirEntry) -> bool>(
		&self,
		dir: u32,
		parent: u32,
		off: u64,
		mut f: F,
	) -> EResult<u64> {
		let dir_inode = self.dir_inode(dir)?;
		let mut pos = off;
		if pos == 0 {
			let ent = DirEntry {
				inode: dir,
				entry_type: FileType::Directory,
				name: b".",
				off: 0,
			};
			if !f(&ent) {
				return Ok(pos);
			}
			pos = 1;
		}
		if pos == 1 {
			let ent = DirEntry {
				inode: parent,
				entry_type: FileType::Directory,
				name: b"..",
				off: 1,
			};
			if !f(&ent) {
				return Ok(pos);
			}
			pos = 2;
		}
		loop {
			let entry_off = (pos - 2) * DIRENT_SIZE as u64;
			if entry_off >= dir_inode.size as u64 {
				break;
			}
			let entry = self.read_dirent(&dir_inode, entry_off as u32)?;
			if entry.is_free() {
				pos += 1;
				continue;
			}
			let target = self.inode(entry.inode)?;
			let entry_type = match target.get_type() {
				Some(FileType::Regular) => FileType::Regular,
				Some(FileType::Directory) => FileType::Directory,
				_ => FileType::Link,
			};
			let ent = DirEntry {
				inode: entry.inode,
				entry_type,
				name: entry.name(),
				off: pos,
			};
			if !f(&ent) {
				break;
			}
			pos += 1;
		}
		Ok(pos)
	}

	/// Creates a regular file named `name` in the directory `dir`, with the
	/// given mode.
	///
	/// On success, the function returns the new file's inode number.
	pub fn create(&mut self, dir: u32, name: &[u8], mode: Mode) -> EResult<u32> {
		if name.is_empty() {
			return Err(errno::EINVAL);
		}
		if name.len() > NAME_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		let mut dir_inode = self.dir_inode(dir)?;
		if self.find_dirent(&dir_inode, name)?.is_some() {
			return Err(errno::EEXIST);
		}
		let off = self.create_blank_dirent(dir, &mut dir_inode)?;
		let ino = self.alloc_inode()?;
		let inode = Inode {
			ftype: FileType::Regular.to_raw(),
			nlink: 1,
			mode,
			..Default::default()
		};
		self.update_inode(ino, &inode)?;
		let entry = DirectoryEntry::new(ino, name)?;
		self.write_dirent(&dir_inode, &entry, off)?;
		Ok(ino)
	}

	/// Creates a hard link to the inode `src` under the name `name` in the
	/// directory `dir`.
	///
	/// Hard links on directories are not allowed.
	pub fn link(&mut self, src: u32, dir: u32, name: &[u8]) -> EResult<()> {
		if name.is_empty() {
			return Err(errno::EINVAL);
		}
		if name.len() > NAME_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		let mut dir_inode = self.dir_inode(dir)?;
		let mut src_inode = self.inode(src)?;
		if src_inode.is_free() {
			return Err(errno::ENOENT);
		}
		if src_inode.get_type() == Some(FileType::Directory) {
			return Err(errno::EPERM);
		}
		if self.find_dirent(&dir_inode, name)?.is_some() {
			return Err(errno::EEXIST);
		}
		let off = self.create_blank_dirent(dir, &mut dir_inode)?;
		let entry = DirectoryEntry::new(src, name)?;
		self.write_dirent(&dir_inode, &entry, off)?;
		src_inode.nlink += 1;
		self.update_inode(src, &src_inode)
	}

	/// Removes the name `name` from the directory `dir`.
	///
	/// The slot is cleared in place and the target inode loses one link. When
	/// the last link goes away, the inode's blocks are released and the slot
	/// becomes free for reuse.
	pub fn unlink(&mut self, dir: u32, name: &[u8]) -> EResult<()> {
		let dir_inode = self.dir_inode(dir)?;
		let Some((off, entry)) = self.find_dirent(&dir_inode, name)? else {
			return Err(errno::ENOENT);
		};
		let mut target = self.inode(entry.inode)?;
		if target.get_type() == Some(FileType::Directory) {
			return Err(errno::EPERM);
		}
		let mut cleared = entry;
		cleared.inode = 0;
		self.write_dirent(&dir_inode, &cleared, off)?;
		target.nlink = target.nlink.saturating_sub(1);
		if target.nlink == 0 {
			target.free_content(&self.sp, &mut self.img)?;
			debug!("inode {} released", entry.inode);
			target = Inode::default();
		}
		self.update_inode(entry.inode, &target)
	}

	/// Creates a symbolic link named `name` in the directory `dir`, pointing
	/// to `target`.
	///
	/// The target text is stored inline in the inode and is limited to
	/// [`crate::inode::SYMLINK_MAX`] bytes.
	///
	/// On success, the function returns the new link's inode number.
	pub fn symlink(&mut self, dir: u32, name: &[u8], target: &[u8]) -> EResult<u32> {
		if name.is_empty() {
			return Err(errno::EINVAL);
		}
		if name.len() > NAME_MAX || target.len() > crate::inode::SYMLINK_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		let mut dir_inode = self.dir_inode(dir)?;
		if self.find_dirent(&dir_inode, name)?.is_some() {
			return Err(errno::EEXIST);
		}
		let ino = self.alloc_inode()?;
		let off = self.create_blank_dirent(dir, &mut dir_inode)?;
		let mut inode = Inode {
			ftype: FileType::Link.to_raw(),
			nlink: 1,
			mode: 0o777,
			..Default::default()
		};
		inode.set_link_target(target);
		self.update_inode(ino, &inode)?;
		let entry = DirectoryEntry::new(ino, name)?;
		self.write_dirent(&dir_inode, &entry, off)?;
		Ok(ino)
	}

	/// Resolves the target of the symbolic link `ino` for the user `uid`.
	pub fn follow_link(&self, ino: u32, uid: Uid) -> EResult<Vec<u8>> {
		let inode = self.inode(ino)?;
		if inode.get_type() != Some(FileType::Link) {
			return Err(errno::EINVAL);
		}
		Ok(symlink::resolve(inode.link_target(), uid)?.to_vec())
	}

	/// Reads from the file `ino` starting at offset `off` into `buf`.
	///
	/// The count is clamped to the end of the file. The function returns the
	/// number of bytes read.
	pub fn read(&self, ino: u32, off: u64, buf: &mut [u8]) -> EResult<usize> {
		let inode = self.inode(ino)?;
		match inode.get_type() {
			Some(FileType::Regular) => {}
			Some(FileType::Directory) => return Err(errno::EISDIR),
			_ => return Err(errno::EINVAL),
		}
		let size = inode.size as u64;
		if off >= size {
			return Ok(0);
		}
		let count = buf.len().min((size - off) as usize);
		let mut i = 0;
		while i < count {
			let pos = off + i as u64;
			let blk = self.content_block(&inode, (pos / BLOCK_SIZE as u64) as u32)?;
			let inner = (pos % BLOCK_SIZE as u64) as usize;
			let len = (count - i).min(BLOCK_SIZE as usize - inner);
			let slice = self.img.block(blk)?;
			buf[i..(i + len)].copy_from_slice(&slice[inner..(inner + len)]);
			i += len;
		}
		Ok(count)
	}

	/// Writes `buf` to the file `ino` starting at offset `off`.
	///
	/// If `flags` contains [`OpenFlags::APPEND`], the offset is reset to the
	/// end of the file first. Writing past the end grows the file; an
	/// out-of-space failure is surfaced before any byte is copied.
	///
	/// The function returns the number of bytes written.
	pub fn write(&mut self, ino: u32, off: u64, flags: OpenFlags, buf: &[u8]) -> EResult<usize> {
		let mut inode = self.inode(ino)?;
		match inode.get_type() {
			Some(FileType::Regular) => {}
			Some(FileType::Directory) => return Err(errno::EISDIR),
			_ => return Err(errno::EINVAL),
		}
		let pos = if flags.contains(OpenFlags::APPEND) {
			inode.size as u64
		} else {
			off
		};
		let end = pos + buf.len() as u64;
		if end > u32::MAX as u64 {
			return Err(errno::EOVERFLOW);
		}
		if end as u32 > inode.size {
			self.change_size(&mut inode, end as u32)?;
			self.update_inode(ino, &inode)?;
		}
		let mut i = 0;
		while i < buf.len() {
			let cur = pos + i as u64;
			let blk = self.content_block(&inode, (cur / BLOCK_SIZE as u64) as u32)?;
			let inner = (cur % BLOCK_SIZE as u64) as usize;
			let len = (buf.len() - i).min(BLOCK_SIZE as usize - inner);
			let slice = self.img.block_mut(blk)?;
			slice[inner..(inner + len)].copy_from_slice(&buf[i..(i + len)]);
			i += len;
		}
		Ok(buf.len())
	}

	/// Applies the attribute changes in `set` to the file `ino`.
	///
	/// A size change delegates to the size-change engine and is only allowed
	/// on regular files: resizing a directory is [`errno::EPERM`] and
	/// resizing a symbolic link is [`errno::EINVAL`].
	pub fn notify_change(&mut self, ino: u32, set: &StatSet) -> EResult<()> {
		let mut inode = self.inode(ino)?;
		if let Some(size) = set.size {
			match inode.get_type() {
				Some(FileType::Regular) => self.change_size(&mut inode, size)?,
				Some(FileType::Directory) => return Err(errno::EPERM),
				_ => return Err(errno::EINVAL),
			}
		}
		if let Some(mode) = set.mode {
			inode.mode = mode;
		}
		self.update_inode(ino, &inode)
	}

	/// Returns the status of the file `ino`.
	pub fn stat(&self, ino: u32) -> EResult<Stat> {
		let inode = self.inode(ino)?;
		if inode.is_free() {
			return Err(errno::ENOENT);
		}
		let file_type = inode.get_type().ok_or(errno::EIO)?;
		let blocks = match file_type {
			FileType::Link => 0,
			_ => size_to_blocks(inode.size),
		};
		Ok(Stat {
			file_type,
			mode: inode.mode,
			nlink: inode.nlink,
			size: inode.size,
			blocks,
		})
	}

	/// Returns the status of the filesystem.
	pub fn statfs(&self) -> EResult<Statfs> {
		let mut free_inodes = 0;
		for ino in 1..self.sp.total_inodes {
			if self.inode(ino)?.is_free() {
				free_inodes += 1;
			}
		}
		Ok(Statfs {
			block_size: BLOCK_SIZE,
			total_blocks: self.sp.total_blocks,
			free_blocks: bitmap::free_count(&self.img, &self.sp)?,
			total_inodes: self.sp.total_inodes,
			free_inodes,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::inode::DIRECT_BLOCKS_COUNT;
	use crate::inode::ENTRIES_PER_BLOCK;
	use crate::inode::ROOT_DIRECTORY_INODE;
	use crate::mkfs;

	const ROOT: u32 = ROOT_DIRECTORY_INODE;
	const ND: u32 = DIRECT_BLOCKS_COUNT as u32;
	const NI: u32 = ENTRIES_PER_BLOCK as u32;

	fn new_fs() -> ImgFs {
		ImgFs::mount(mkfs::format(512, 32).unwrap()).unwrap()
	}

	/// Collects the names reported by `readdir` from position 0.
	fn list(fs: &ImgFs, dir: u32) -> Vec<Vec<u8>> {
		let mut names = Vec::new();
		fs.readdir(dir, ROOT, 0, |e| {
			names.push(e.name.to_vec());
			true
		})
		.unwrap();
		names
	}

	#[test]
	fn mount_rejects_garbage() {
		let img = Image::new(64);
		assert!(ImgFs::mount(img).is_err());
	}

	#[test]
	fn fresh_file_small_write() {
		let mut fs = new_fs();
		let free = fs.statfs().unwrap().free_blocks;
		let ino = fs.create(ROOT, b"a", 0o644).unwrap();
		assert_eq!(fs.lookup(ROOT, b"a").unwrap(), Some(ino));
		assert_eq!(
			fs.write(ino, 0, OpenFlags::empty(), b"hello").unwrap(),
			5
		);
		let mut buf = [0u8; 5];
		assert_eq!(fs.read(ino, 0, &mut buf).unwrap(), 5);
		assert_eq!(&buf, b"hello");
		let stat = fs.stat(ino).unwrap();
		assert_eq!(stat.size, 5);
		assert_eq!(stat.blocks, 1);
		assert_eq!(stat.mode, 0o644);
		// One block for the root directory's first entry, one for the file
		assert_eq!(fs.statfs().unwrap().free_blocks, free - 2);
	}

	#[test]
	fn append_across_block_boundary() {
		let mut fs = new_fs();
		let ino = fs.create(ROOT, b"a", 0o644).unwrap();
		fs.write(ino, 0, OpenFlags::empty(), b"hello").unwrap();
		let chunk = [b'x'; 1024];
		fs.write(ino, 5, OpenFlags::empty(), &chunk).unwrap();
		let stat = fs.stat(ino).unwrap();
		assert_eq!(stat.size, 1029);
		assert_eq!(stat.blocks, 2);
		let mut buf = [0u8; 5];
		assert_eq!(fs.read(ino, 1024, &mut buf).unwrap(), 5);
		assert_eq!(&buf, b"xxxxx");
	}

	#[test]
	fn append_flag_ignores_offset() {
		let mut fs = new_fs();
		let ino = fs.create(ROOT, b"a", 0o644).unwrap();
		fs.write(ino, 0, OpenFlags::empty(), b"abc").unwrap();
		fs.write(ino, 0, OpenFlags::APPEND, b"def").unwrap();
		let mut buf = [0u8; 6];
		assert_eq!(fs.read(ino, 0, &mut buf).unwrap(), 6);
		assert_eq!(&buf, b"abcdef");
	}

	#[test]
	fn read_clamps_to_size() {
		let mut fs = new_fs();
		let ino = fs.create(ROOT, b"a", 0o644).unwrap();
		fs.write(ino, 0, OpenFlags::empty(), b"hello").unwrap();
		let mut buf = [0u8; 16];
		assert_eq!(fs.read(ino, 0, &mut buf).unwrap(), 5);
		assert_eq!(fs.read(ino, 3, &mut buf).unwrap(), 2);
		assert_eq!(&buf[..2], b"lo");
		// Reading at or past the end yields nothing
		assert_eq!(fs.read(ino, 5, &mut buf).unwrap(), 0);
		assert_eq!(fs.read(ino, 100, &mut buf).unwrap(), 0);
	}

	#[test]
	fn cross_indirect_boundary() {
		let mut fs = new_fs();
		let ino = fs.create(ROOT, b"big", 0o644).unwrap();
		fs.notify_change(
			ino,
			&StatSet {
				size: Some(ND * BLOCK_SIZE + 1),
				..Default::default()
			},
		)
		.unwrap();
		let stat = fs.stat(ino).unwrap();
		assert_eq!(stat.size, ND * BLOCK_SIZE + 1);
		assert_eq!(stat.blocks, ND + 1);
		// The 11th block is reached through the first entry of the indirect
		// block
		let inode = Inode::read(ino, &fs.sp, &fs.img).unwrap();
		assert_ne!(inode.indirect, 0);
		assert_eq!(
			inode.translate_blk_off(ND, &fs.sp, &fs.img).unwrap(),
			Some(fs.img.entry(inode.indirect, 0).unwrap())
		);
		// New blocks read as zeros
		let mut buf = [1u8; 8];
		assert_eq!(fs.read(ino, (ND * BLOCK_SIZE) as u64 - 4, &mut buf).unwrap(), 5);
		assert_eq!(&buf[..5], &[0; 5]);
	}

	#[test]
	fn no_space_rollback() {
		let mut fs = ImgFs::mount(mkfs::format(32, 16).unwrap()).unwrap();
		let f = fs.create(ROOT, b"f", 0o644).unwrap();
		fs.notify_change(
			f,
			&StatSet {
				size: Some(ND * BLOCK_SIZE),
				..Default::default()
			},
		)
		.unwrap();
		// Fill the rest of the disk down to two free blocks: 14 data blocks
		// plus g's own indirect block
		let g = fs.create(ROOT, b"g", 0o644).unwrap();
		fs.notify_change(
			g,
			&StatSet {
				size: Some(14 * BLOCK_SIZE),
				..Default::default()
			},
		)
		.unwrap();
		assert_eq!(fs.statfs().unwrap().free_blocks, 2);
		// Growing by two data blocks also needs an indirect block: three in
		// total, which must fail and leave everything unchanged
		let res = fs.notify_change(
			f,
			&StatSet {
				size: Some((ND + 2) * BLOCK_SIZE),
				..Default::default()
			},
		);
		assert_eq!(res, Err(errno::ENOSPC));
		assert_eq!(fs.stat(f).unwrap().size, ND * BLOCK_SIZE);
		assert_eq!(fs.stat(f).unwrap().blocks, ND);
		assert_eq!(fs.statfs().unwrap().free_blocks, 2);
		assert_eq!(fs.stat(g).unwrap().size, 14 * BLOCK_SIZE);
		// Growing by one data block plus the indirect block fits exactly
		fs.notify_change(
			f,
			&StatSet {
				size: Some((ND + 1) * BLOCK_SIZE),
				..Default::default()
			},
		)
		.unwrap();
		assert_eq!(fs.statfs().unwrap().free_blocks, 0);
	}

	#[test]
	fn hard_link_semantics() {
		let mut fs = new_fs();
		let f = fs.create(ROOT, b"f", 0o600).unwrap();
		fs.write(f, 0, OpenFlags::empty(), b"data").unwrap();
		fs.link(f, ROOT, b"g").unwrap();
		assert_eq!(fs.lookup(ROOT, b"g").unwrap(), Some(f));
		assert_eq!(fs.stat(f).unwrap().nlink, 2);
		fs.unlink(ROOT, b"f").unwrap();
		assert_eq!(fs.lookup(ROOT, b"f").unwrap(), None);
		assert_eq!(fs.lookup(ROOT, b"g").unwrap(), Some(f));
		assert_eq!(fs.stat(f).unwrap().nlink, 1);
		// The content is still reachable through the remaining link
		let mut buf = [0u8; 4];
		fs.read(f, 0, &mut buf).unwrap();
		assert_eq!(&buf, b"data");
	}

	#[test]
	fn conditional_symlink() {
		let mut fs = new_fs();
		let ino = fs.symlink(ROOT, b"cfg", b"root?/etc/a:/home/u/a").unwrap();
		assert_eq!(fs.lookup(ROOT, b"cfg").unwrap(), Some(ino));
		assert_eq!(fs.follow_link(ino, 0).unwrap(), b"/etc/a");
		assert_eq!(fs.follow_link(ino, 1000).unwrap(), b"/home/u/a");
		let stat = fs.stat(ino).unwrap();
		assert_eq!(stat.file_type, FileType::Link);
		assert_eq!(stat.size, 21);
		assert_eq!(stat.blocks, 0);
		// A plain link resolves to its text for everyone
		let plain = fs.symlink(ROOT, b"sh", b"/bin/sh").unwrap();
		assert_eq!(fs.follow_link(plain, 1000).unwrap(), b"/bin/sh");
		// Following a non-link is invalid
		let f = fs.create(ROOT, b"f", 0o644).unwrap();
		assert_eq!(fs.follow_link(f, 0).err(), Some(errno::EINVAL));
	}

	#[test]
	fn write_read_round_trip() {
		let mut fs = new_fs();
		let ino = fs.create(ROOT, b"f", 0o644).unwrap();
		let data: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
		fs.write(ino, 1000, OpenFlags::empty(), &data).unwrap();
		assert_eq!(fs.stat(ino).unwrap().size, 3000);
		let mut buf = vec![0u8; 2000];
		assert_eq!(fs.read(ino, 1000, &mut buf).unwrap(), 2000);
		assert_eq!(buf, data);
		// The gap below the written range reads as zeros
		let mut head = [1u8; 1000];
		fs.read(ino, 0, &mut head).unwrap();
		assert!(head.iter().all(|b| *b == 0));
	}

	#[test]
	fn create_unlink_round_trip() {
		let mut fs = new_fs();
		let before = fs.statfs().unwrap();
		let ino = fs.create(ROOT, b"tmp", 0o644).unwrap();
		fs.write(ino, 0, OpenFlags::empty(), &[7u8; 3000]).unwrap();
		fs.unlink(ROOT, b"tmp").unwrap();
		// The inode slot is free again and the blocks are back, except the
		// root directory's own block which is kept for slot reuse
		assert_eq!(fs.stat(ino).err(), Some(errno::ENOENT));
		let after = fs.statfs().unwrap();
		assert_eq!(after.free_inodes, before.free_inodes);
		assert_eq!(after.free_blocks, before.free_blocks - 1);
		assert_eq!(list(&fs, ROOT), vec![b".".to_vec(), b"..".to_vec()]);
		// Creating again reuses both the inode and the slot
		let ino2 = fs.create(ROOT, b"tmp2", 0o644).unwrap();
		assert_eq!(ino2, ino);
		assert_eq!(fs.stat(ROOT).unwrap().size, DIRENT_SIZE as u32);
	}

	#[test]
	fn grow_shrink_round_trip() {
		let mut fs = new_fs();
		let ino = fs.create(ROOT, b"f", 0o644).unwrap();
		fs.write(ino, 0, OpenFlags::empty(), b"hello").unwrap();
		let inode_before = Inode::read(ino, &fs.sp, &fs.img).unwrap();
		let free_before = fs.statfs().unwrap().free_blocks;
		// Across the doubly indirect boundary and back
		let big = (ND + NI + 2) * BLOCK_SIZE;
		fs.notify_change(
			ino,
			&StatSet {
				size: Some(big),
				..Default::default()
			},
		)
		.unwrap();
		assert!(fs.statfs().unwrap().free_blocks < free_before);
		fs.notify_change(
			ino,
			&StatSet {
				size: Some(5),
				..Default::default()
			},
		)
		.unwrap();
		let inode_after = Inode::read(ino, &fs.sp, &fs.img).unwrap();
		assert_eq!(fs.statfs().unwrap().free_blocks, free_before);
		assert_eq!(inode_after.direct, inode_before.direct);
		assert_eq!(inode_after.indirect, 0);
		assert_eq!(inode_after.indirect2, 0);
		assert_eq!(inode_after.size, 5);
		// The content written before growing survived
		let mut buf = [0u8; 5];
		fs.read(ino, 0, &mut buf).unwrap();
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn readdir_cursor() {
		let mut fs = new_fs();
		for name in [&b"a"[..], b"b", b"c"] {
			fs.create(ROOT, name, 0o644).unwrap();
		}
		assert_eq!(
			list(&fs, ROOT),
			vec![
				b".".to_vec(),
				b"..".to_vec(),
				b"a".to_vec(),
				b"b".to_vec(),
				b"c".to_vec()
			]
		);
		// Stop after two entries, then resume from the returned position
		let mut seen = Vec::new();
		let pos = fs
			.readdir(ROOT, ROOT, 0, |e| {
				seen.push(e.name.to_vec());
				seen.len() < 2
			})
			.unwrap();
		assert_eq!(seen, vec![b".".to_vec(), b"..".to_vec()]);
		let pos = fs
			.readdir(ROOT, ROOT, pos + 1, |e| {
				seen.push(e.name.to_vec());
				true
			})
			.unwrap();
		assert_eq!(seen.len(), 5);
		assert_eq!(pos, 5);
		// Unlinked entries are skipped
		fs.unlink(ROOT, b"b").unwrap();
		assert_eq!(
			list(&fs, ROOT),
			vec![
				b".".to_vec(),
				b"..".to_vec(),
				b"a".to_vec(),
				b"c".to_vec()
			]
		);
	}

	#[test]
	fn directory_fills_last_block() {
		let mut fs = new_fs();
		let per_block = (BLOCK_SIZE as usize / DIRENT_SIZE) as u32;
		for i in 0..per_block {
			let name = format!("f{i}");
			fs.create(ROOT, name.as_bytes(), 0o644).unwrap();
		}
		// The directory exactly fills one block
		let stat = fs.stat(ROOT).unwrap();
		assert_eq!(stat.size, BLOCK_SIZE);
		assert_eq!(stat.blocks, 1);
		// One more entry spills into a second block
		fs.create(ROOT, b"overflow", 0o644).unwrap();
		let stat = fs.stat(ROOT).unwrap();
		assert_eq!(stat.size, BLOCK_SIZE + DIRENT_SIZE as u32);
		assert_eq!(stat.blocks, 2);
		assert!(fs.lookup(ROOT, b"overflow").unwrap().is_some());
	}

	#[test]
	fn namespace_errors() {
		let mut fs = new_fs();
		let f = fs.create(ROOT, b"f", 0o644).unwrap();
		// Duplicates
		assert_eq!(fs.create(ROOT, b"f", 0o644).err(), Some(errno::EEXIST));
		assert_eq!(fs.link(f, ROOT, b"f").err(), Some(errno::EEXIST));
		assert_eq!(
			fs.symlink(ROOT, b"f", b"/x").err(),
			Some(errno::EEXIST)
		);
		// Name length
		let long = [b'x'; NAME_MAX + 1];
		assert_eq!(
			fs.create(ROOT, &long, 0o644).err(),
			Some(errno::ENAMETOOLONG)
		);
		assert_eq!(fs.lookup(ROOT, &long).err(), Some(errno::ENAMETOOLONG));
		// Symlink target length
		let target = [b'x'; crate::inode::SYMLINK_MAX + 1];
		assert_eq!(
			fs.symlink(ROOT, b"l", &target).err(),
			Some(errno::ENAMETOOLONG)
		);
		// Directory restrictions
		assert_eq!(fs.link(ROOT, ROOT, b"d").err(), Some(errno::EPERM));
		assert_eq!(fs.unlink(ROOT, b"missing").err(), Some(errno::ENOENT));
		// Operations on the wrong file type
		assert_eq!(fs.lookup(f, b"x").err(), Some(errno::ENOTDIR));
		assert_eq!(fs.create(f, b"x", 0o644).err(), Some(errno::ENOTDIR));
		let mut buf = [0u8; 4];
		assert_eq!(fs.read(ROOT, 0, &mut buf).err(), Some(errno::EISDIR));
		assert_eq!(
			fs.write(ROOT, 0, OpenFlags::empty(), b"x").err(),
			Some(errno::EISDIR)
		);
	}

	#[test]
	fn notify_change_rules() {
		let mut fs = new_fs();
		let f = fs.create(ROOT, b"f", 0o644).unwrap();
		// Directory resize is denied
		assert_eq!(
			fs.notify_change(
				ROOT,
				&StatSet {
					size: Some(0),
					..Default::default()
				}
			)
			.err(),
			Some(errno::EPERM)
		);
		// Symlink resize is invalid
		let l = fs.symlink(ROOT, b"l", b"/x").unwrap();
		assert_eq!(
			fs.notify_change(
				l,
				&StatSet {
					size: Some(0),
					..Default::default()
				}
			)
			.err(),
			Some(errno::EINVAL)
		);
		// Mode changes are recorded
		fs.notify_change(
			f,
			&StatSet {
				mode: Some(0o600),
				..Default::default()
			},
		)
		.unwrap();
		assert_eq!(fs.stat(f).unwrap().mode, 0o600);
		// Shrinking a file truncates its content
		fs.write(f, 0, OpenFlags::empty(), &[9u8; 2048]).unwrap();
		fs.notify_change(
			f,
			&StatSet {
				size: Some(1),
				..Default::default()
			},
		)
		.unwrap();
		let stat = fs.stat(f).unwrap();
		assert_eq!(stat.size, 1);
		assert_eq!(stat.blocks, 1);
	}

	#[test]
	fn unlink_symlink() {
		let mut fs = new_fs();
		let before = fs.statfs().unwrap().free_blocks;
		fs.symlink(ROOT, b"l", b"/somewhere").unwrap();
		// Inline target: only the root directory's block was taken
		assert_eq!(fs.statfs().unwrap().free_blocks, before - 1);
		fs.unlink(ROOT, b"l").unwrap();
		assert_eq!(fs.lookup(ROOT, b"l").unwrap(), None);
		assert_eq!(fs.statfs().unwrap().free_blocks, before - 1);
	}

	#[test]
	fn inode_exhaustion() {
		let mut fs = ImgFs::mount(mkfs::format(64, 4).unwrap()).unwrap();
		// Inode 0 is reserved and inode 1 is the root: two inodes remain
		fs.create(ROOT, b"a", 0o644).unwrap();
		fs.create(ROOT, b"b", 0o644).unwrap();
		assert_eq!(fs.create(ROOT, b"c", 0o644).err(), Some(errno::ENOSPC));
		// Releasing one makes creation possible again
		fs.unlink(ROOT, b"a").unwrap();
		fs.create(ROOT, b"c", 0o644).unwrap();
	}
}
