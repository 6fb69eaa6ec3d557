//! An inode represents a file in the filesystem.
//!
//! The name of the file is not included in the inode but in the directory
//! entry associated with it, since several entries can refer to the same
//! inode (hard links).
//!
//! The access to an inode's content is divided into three parts, each
//! overflowing on the next when full:
//! - Direct block pointers: each inode has 10 of them
//! - Indirect block pointer: a pointer to a block dedicated to storing a list
//!   of more blocks to store the inode's content
//! - Doubly indirect block pointer: a pointer to a block storing pointers to
//!   indirect blocks, each storing pointers to more blocks
//!
//! For symbolic links the pointer area is reused to store the link's target
//! text inline.

use crate::bitmap;
use crate::bytes;
use crate::bytes::AnyRepr;
use crate::errno;
use crate::errno::EResult;
use crate::file::FileType;
use crate::img::BLOCK_SIZE;
use crate::img::Image;
use crate::superblock::Superblock;
use core::mem::offset_of;
use core::mem::size_of;
use static_assertions::const_assert_eq;

/// The number of direct block pointers in each inode.
pub const DIRECT_BLOCKS_COUNT: usize = 10;
/// The number of block-number entries in an index block.
pub const ENTRIES_PER_BLOCK: usize = (BLOCK_SIZE as usize) / size_of::<u32>();

/// The size of an inode record in bytes.
pub const INODE_SIZE: usize = 64;
/// The number of inodes in each block of the inode table.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE as usize / INODE_SIZE;

/// The inode of the root directory.
///
/// Inode 0 is reserved.
pub const ROOT_DIRECTORY_INODE: u32 = 1;

/// The maximum number of content blocks a file can have.
pub const MAX_FILE_BLOCKS: u32 =
	(DIRECT_BLOCKS_COUNT + ENTRIES_PER_BLOCK + ENTRIES_PER_BLOCK * ENTRIES_PER_BLOCK) as u32;

/// The maximum length of a symbolic link's target, stored inline in the
/// inode's pointer area, null byte excluded.
pub const SYMLINK_MAX: usize = INODE_SIZE - LINK_TEXT_OFFSET - 1;

/// The offset of the inline link text inside the inode record.
const LINK_TEXT_OFFSET: usize = 16;

/// An inode record in the inode table.
///
/// An inode is free if and only if `nlink` is zero.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Inode {
	/// The type of the file. The raw codes are those of [`FileType`].
	pub ftype: u32,
	/// The number of hard links to this inode.
	pub nlink: u32,
	/// The size of the file in bytes.
	pub size: u32,
	/// The file's permissions.
	pub mode: u32,

	/// Direct block pointers.
	pub direct: [u32; DIRECT_BLOCKS_COUNT],
	/// Indirect block pointer.
	pub indirect: u32,
	/// Doubly indirect block pointer.
	pub indirect2: u32,
}

const_assert_eq!(size_of::<Inode>(), INODE_SIZE);
const_assert_eq!(offset_of!(Inode, direct), LINK_TEXT_OFFSET);

unsafe impl AnyRepr for Inode {}

/// Returns the number of blocks required to hold `size` bytes of content.
pub fn size_to_blocks(size: u32) -> u32 {
	size.div_ceil(BLOCK_SIZE)
}

/// Returns the slot of the doubly indirect pointer used to reach the file
/// block `b`.
///
/// There is only one doubly indirect block, so the function returns `Some(0)`
/// when it is involved and `None` when it is not.
pub fn indir2_index(b: u32) -> Option<usize> {
	if (b as usize) < DIRECT_BLOCKS_COUNT + ENTRIES_PER_BLOCK {
		None
	} else {
		Some(0)
	}
}

/// Returns the index of the indirect block used to reach the file block `b`.
///
/// Return value:
/// - `None`: `b` is one of the file's direct blocks
/// - `Some(0)`: `b` is located under the file's indirect block
/// - otherwise, the slot of the relevant indirect block within the doubly
///   indirect block
pub fn indir_index(b: u32) -> Option<usize> {
	let b = b as usize;
	if b < DIRECT_BLOCKS_COUNT {
		None
	} else if b < DIRECT_BLOCKS_COUNT + ENTRIES_PER_BLOCK {
		Some(0)
	} else {
		Some((b - DIRECT_BLOCKS_COUNT - ENTRIES_PER_BLOCK) / ENTRIES_PER_BLOCK)
	}
}

/// Returns the index of the file block `b` in its containing table: the
/// direct pointer array, the indirect block or the relevant second-level
/// indirect block.
pub fn direct_index(b: u32) -> usize {
	let b = b as usize;
	if b < DIRECT_BLOCKS_COUNT {
		b
	} else if b < DIRECT_BLOCKS_COUNT + ENTRIES_PER_BLOCK {
		b - DIRECT_BLOCKS_COUNT
	} else {
		(b - DIRECT_BLOCKS_COUNT - ENTRIES_PER_BLOCK) % ENTRIES_PER_BLOCK
	}
}

/// Checks a block number read from the index tree.
///
/// Zero means the block is absent and yields `None`. A number beyond the end
/// of the filesystem is a structural error.
pub fn check_blk_off(blk: u32, sp: &Superblock) -> EResult<Option<u32>> {
	if blk >= sp.total_blocks {
		return Err(errno::EIO);
	}
	Ok((blk != 0).then_some(blk))
}

impl Inode {
	/// Returns the byte offset of the inode `ino` in the image.
	///
	/// Inode 0 is reserved and inodes beyond the table are invalid.
	fn offset(ino: u32, sp: &Superblock) -> EResult<u64> {
		if ino == 0 || ino >= sp.total_inodes {
			return Err(errno::EINVAL);
		}
		Ok(sp.first_inode_block as u64 * BLOCK_SIZE as u64 + ino as u64 * INODE_SIZE as u64)
	}

	/// Reads the inode `ino` from the image.
	pub fn read(ino: u32, sp: &Superblock, img: &Image) -> EResult<Self> {
		img.read_obj::<Self>(Self::offset(ino, sp)?)
	}

	/// Writes the inode at slot `ino` on the image.
	pub fn write(&self, ino: u32, sp: &Superblock, img: &mut Image) -> EResult<()> {
		img.write_obj::<Self>(self, Self::offset(ino, sp)?)
	}

	/// Returns the type of the file, or `None` if the record is corrupted.
	pub fn get_type(&self) -> Option<FileType> {
		FileType::from_raw(self.ftype)
	}

	/// Tells whether the inode slot is free.
	pub fn is_free(&self) -> bool {
		self.nlink == 0
	}

	/// Returns the link's target text.
	///
	/// If the file is not a symbolic link, the content is garbage.
	pub fn link_target(&self) -> &[u8] {
		let len = (self.size as usize).min(SYMLINK_MAX);
		&bytes::as_bytes(self)[LINK_TEXT_OFFSET..(LINK_TEXT_OFFSET + len)]
	}

	/// Stores `target` as the link's target text and updates the size.
	///
	/// `target` must fit in [`SYMLINK_MAX`] bytes; the caller is responsible
	/// for checking it beforehand.
	pub fn set_link_target(&mut self, target: &[u8]) {
		let buf = &mut bytes::as_bytes_mut(self)[LINK_TEXT_OFFSET..];
		buf.fill(0);
		buf[..target.len()].copy_from_slice(target);
		self.size = target.len() as u32;
	}

	/// Translates the file block offset `b` to a device block number.
	///
	/// If the block does not exist, the function returns `None`.
	pub fn translate_blk_off(&self, b: u32, sp: &Superblock, img: &Image) -> EResult<Option<u32>> {
		if b >= MAX_FILE_BLOCKS {
			return Err(errno::EOVERFLOW);
		}
		match indir_index(b) {
			None => check_blk_off(self.direct[direct_index(b)], sp),
			Some(slot) => {
				let i1 = if indir2_index(b).is_some() {
					let Some(d2) = check_blk_off(self.indirect2, sp)? else {
						return Ok(None);
					};
					let Some(i1) = check_blk_off(img.entry(d2, slot)?, sp)? else {
						return Ok(None);
					};
					i1
				} else {
					let Some(i1) = check_blk_off(self.indirect, sp)? else {
						return Ok(None);
					};
					i1
				};
				check_blk_off(img.entry(i1, direct_index(b))?, sp)
			}
		}
	}

	/// Adds one content block at the end of the file, allocating indirect and
	/// doubly indirect blocks as necessary.
	///
	/// Every required block is allocated up front: on an out-of-space
	/// failure, the blocks already taken by this call are released and the
	/// inode is left unchanged. New blocks are zeroed and linked children
	/// first, so no reachable pointer ever designates an unpopulated block.
	///
	/// On success, the inode's size is set to the new block capacity; the
	/// caller is expected to set the exact byte size afterwards.
	pub fn add_block(&mut self, sp: &Superblock, img: &mut Image) -> EResult<()> {
		// Index of the block to add
		let n = size_to_blocks(self.size);
		if n >= MAX_FILE_BLOCKS {
			return Err(errno::EOVERFLOW);
		}
		// The number of blocks to allocate along with the data block
		let required = if n == 0 {
			1
		} else if indir2_index(n) != indir2_index(n - 1) {
			// First block reached through the doubly indirect block
			3
		} else if indir_index(n) != indir_index(n - 1) {
			// First block of a new indirect block
			2
		} else {
			1
		};
		let mut allocated = [0u32; 3];
		for i in 0..required {
			match bitmap::alloc_block(img, sp) {
				Ok(blk) => allocated[i] = blk,
				Err(e) => {
					for blk in &allocated[..i] {
						bitmap::free_block(img, sp, *blk)?;
					}
					return Err(e);
				}
			}
		}
		for blk in &allocated[..required] {
			img.zero_block(*blk)?;
		}
		let data = allocated[0];
		match required {
			3 => {
				img.set_entry(allocated[1], 0, data)?;
				img.set_entry(allocated[2], 0, allocated[1])?;
				self.indirect2 = allocated[2];
			}
			2 => {
				img.set_entry(allocated[1], 0, data)?;
				if let Some(slot) = indir2_index(n).and(indir_index(n)) {
					let d2 = check_blk_off(self.indirect2, sp)?.ok_or(errno::EIO)?;
					img.set_entry(d2, slot, allocated[1])?;
				} else {
					self.indirect = allocated[1];
				}
			}
			_ => match indir_index(n) {
				None => self.direct[direct_index(n)] = data,
				Some(slot) => {
					let i1 = if indir2_index(n).is_some() {
						let d2 = check_blk_off(self.indirect2, sp)?.ok_or(errno::EIO)?;
						check_blk_off(img.entry(d2, slot)?, sp)?.ok_or(errno::EIO)?
					} else {
						check_blk_off(self.indirect, sp)?.ok_or(errno::EIO)?
					};
					img.set_entry(i1, direct_index(n), data)?;
				}
			},
		}
		self.size = (n + 1) * BLOCK_SIZE;
		Ok(())
	}

	/// Removes the last content block of the file, freeing the indirect and
	/// doubly indirect blocks its removal leaves empty.
	///
	/// Freed slots are zeroed in the surviving parent so no pointer to a
	/// deallocated block remains. On success, the inode's size is set to the
	/// remaining block capacity.
	///
	/// If an index block that should exist is missing, the function returns
	/// [`errno::EIO`]; the file may then be left partially shrunk.
	pub fn remove_block(&mut self, sp: &Superblock, img: &mut Image) -> EResult<()> {
		let n = size_to_blocks(self.size);
		// Index of the block to remove
		let Some(b) = n.checked_sub(1) else {
			return Ok(());
		};
		match indir_index(b) {
			None => {
				let i = direct_index(b);
				let data = check_blk_off(self.direct[i], sp)?.ok_or(errno::EIO)?;
				bitmap::free_block(img, sp, data)?;
				self.direct[i] = 0;
			}
			Some(slot) if indir2_index(b).is_some() => {
				let d2 = check_blk_off(self.indirect2, sp)?.ok_or(errno::EIO)?;
				let i1 = check_blk_off(img.entry(d2, slot)?, sp)?.ok_or(errno::EIO)?;
				let di = direct_index(b);
				let data = check_blk_off(img.entry(i1, di)?, sp)?.ok_or(errno::EIO)?;
				bitmap::free_block(img, sp, data)?;
				img.set_entry(i1, di, 0)?;
				if di == 0 {
					// The removed block was the only one under this indirect
					// block
					bitmap::free_block(img, sp, i1)?;
					img.set_entry(d2, slot, 0)?;
					if slot == 0 {
						bitmap::free_block(img, sp, d2)?;
						self.indirect2 = 0;
					}
				}
			}
			Some(_) => {
				let i1 = check_blk_off(self.indirect, sp)?.ok_or(errno::EIO)?;
				let di = direct_index(b);
				let data = check_blk_off(img.entry(i1, di)?, sp)?.ok_or(errno::EIO)?;
				bitmap::free_block(img, sp, data)?;
				img.set_entry(i1, di, 0)?;
				if di == 0 {
					bitmap::free_block(img, sp, i1)?;
					self.indirect = 0;
				}
			}
		}
		self.size = b * BLOCK_SIZE;
		Ok(())
	}

	/// Frees all the content blocks of the inode and resets its size to zero.
	///
	/// Symbolic links store their content inline and own no block.
	pub fn free_content(&mut self, sp: &Superblock, img: &mut Image) -> EResult<()> {
		if self.get_type() != Some(FileType::Link) {
			while size_to_blocks(self.size) > 0 {
				self.remove_block(sp, img)?;
			}
		}
		self.size = 0;
		Ok(())
	}
}
