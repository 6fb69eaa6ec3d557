//! imgfs is a Unix-style filesystem whose whole state lives in a fixed-size
//! in-memory block image.
//!
//! The image is divided into several substructures:
//! - Block 0: the boot sector, left opaque
//! - Block 1: the superblock, describing the filesystem's geometry
//! - Free-block bitmap: one bit per block, `1` meaning free
//! - Inode table: a packed array of fixed-size inode records
//! - Data blocks: file and directory content
//!
//! The access to an inode's content is divided into three parts, each
//! overflowing on the next when full:
//! - Direct block pointers: each inode has 10 of them
//! - Indirect block pointer: a pointer to a block dedicated to storing a list
//!   of more blocks to store the inode's content. A block stores 256 of them.
//! - Doubly indirect block pointer: a pointer to a block storing pointers to
//!   indirect blocks, each storing pointers to more blocks
//!
//! Directories are regular files holding a packed array of fixed-size
//! entries; symbolic links store their target text inline in the inode,
//! including conditional targets of the form `root?A:B` which resolve
//! depending on the caller's identity.
//!
//! The filesystem is created by [`mkfs::format`], mounted with
//! [`ImgFs::mount`] and then driven through the operations of [`ImgFs`].

mod bitmap;
mod bytes;
mod dirent;
mod fs;
mod img;
mod inode;
mod mkfs;
mod superblock;
mod symlink;

pub mod errno;
pub mod file;

pub use dirent::DIRENT_SIZE;
pub use dirent::NAME_MAX;
pub use fs::ImgFs;
pub use img::BLOCK_SIZE;
pub use img::Image;
pub use inode::DIRECT_BLOCKS_COUNT;
pub use inode::ENTRIES_PER_BLOCK;
pub use inode::INODES_PER_BLOCK;
pub use inode::INODE_SIZE;
pub use inode::MAX_FILE_BLOCKS;
pub use inode::ROOT_DIRECTORY_INODE;
pub use inode::SYMLINK_MAX;
pub use mkfs::ROOT_DIRECTORY_DEFAULT_MODE;
pub use mkfs::format;
pub use superblock::IMGFS_MAGIC;
pub use superblock::Superblock;
