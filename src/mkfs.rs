//! Creation of a blank filesystem on a fresh image.
//!
//! Packing a host directory tree into the image is left to external tooling;
//! the formatter only lays out the metadata and an empty root directory.

use crate::bitmap;
use crate::errno::EResult;
use crate::file::FileType;
use crate::file::Mode;
use crate::img::Image;
use crate::inode::Inode;
use crate::inode::ROOT_DIRECTORY_INODE;
use crate::superblock::Superblock;
use log::info;

/// The root directory's default mode.
pub const ROOT_DIRECTORY_DEFAULT_MODE: Mode = 0o755;

/// Creates a filesystem of `nblocks` blocks and `ninodes` inodes on a fresh
/// image.
///
/// The resulting image contains the boot block, the superblock, the
/// free-block bitmap with the whole metadata region marked in use, a zeroed
/// inode table and an empty root directory.
pub fn format(nblocks: u32, ninodes: u32) -> EResult<Image> {
	let sp = Superblock::new(nblocks, ninodes);
	sp.check(nblocks)?;
	let mut img = Image::new(nblocks);
	sp.write(&mut img)?;
	// The image starts zeroed, which marks every block in use: release the
	// data region
	for blk in sp.first_data_block()..nblocks {
		bitmap::free_block(&mut img, &sp, blk)?;
	}
	let root = Inode {
		ftype: FileType::Directory.to_raw(),
		nlink: 1,
		mode: ROOT_DIRECTORY_DEFAULT_MODE,
		..Default::default()
	};
	root.write(ROOT_DIRECTORY_INODE, &sp, &mut img)?;
	info!(
		"formatted filesystem: {nblocks} blocks, {ninodes} inodes, first data block {}",
		sp.first_data_block()
	);
	Ok(img)
}
