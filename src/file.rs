//! Types describing files as seen from the filesystem's surface.

use bitflags::bitflags;

/// Type representing a file mode, which is the set of permissions bits of a
/// file.
///
/// The filesystem records mode bits but does not enforce them.
pub type Mode = u32;

/// Type representing a user ID.
///
/// The caller's identity is only consulted when resolving conditional
/// symbolic links.
pub type Uid = u32;

/// The root user ID.
pub const ROOT_UID: Uid = 0;

bitflags! {
	/// Flags of an open file description, as relevant to the filesystem.
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct OpenFlags: u32 {
		/// Writes are performed at the end of the file, wherever the given
		/// offset points.
		const APPEND = 0o2000;
	}
}

/// Enumeration of file types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
	/// A regular file.
	Regular,
	/// A directory.
	Directory,
	/// A symbolic link.
	Link,
}

impl FileType {
	/// Returns the type corresponding to the on-image code `raw`.
	///
	/// If the code is not a valid file type, the function returns `None`.
	pub fn from_raw(raw: u32) -> Option<Self> {
		match raw {
			0 => Some(Self::Regular),
			1 => Some(Self::Directory),
			2 => Some(Self::Link),
			_ => None,
		}
	}

	/// Returns the on-image code for the type.
	pub fn to_raw(self) -> u32 {
		match self {
			Self::Regular => 0,
			Self::Directory => 1,
			Self::Link => 2,
		}
	}
}

/// The status of a file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stat {
	/// The type of the file.
	pub file_type: FileType,
	/// The file's permissions.
	pub mode: Mode,
	/// The number of hard links to the file.
	pub nlink: u32,
	/// The size of the file in bytes.
	pub size: u32,
	/// The number of content blocks used by the file.
	pub blocks: u32,
}

/// A set of attributes to change on a file.
///
/// Fields left to `None` are not modified.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatSet {
	/// The new size of the file.
	pub size: Option<u32>,
	/// The new mode of the file.
	pub mode: Option<Mode>,
}

/// The status of the whole filesystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Statfs {
	/// The size of a block in bytes.
	pub block_size: u32,
	/// The total number of blocks.
	pub total_blocks: u32,
	/// The number of free blocks.
	pub free_blocks: u32,
	/// The total number of inodes.
	pub total_inodes: u32,
	/// The number of free inodes.
	pub free_inodes: u32,
}

/// A directory entry as emitted by `readdir`.
#[derive(Clone, Copy, Debug)]
pub struct DirEntry<'n> {
	/// The inode the entry points to.
	pub inode: u32,
	/// The type of the target.
	pub entry_type: FileType,
	/// The name of the entry.
	pub name: &'n [u8],
	/// The directory cursor position of the entry.
	pub off: u64,
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn file_type_codes() {
		for t in [FileType::Regular, FileType::Directory, FileType::Link] {
			assert_eq!(FileType::from_raw(t.to_raw()), Some(t));
		}
		assert_eq!(FileType::from_raw(3), None);
	}
}
