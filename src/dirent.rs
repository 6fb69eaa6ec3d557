//! A directory entry associates a name with an inode.
//!
//! A directory's content is a packed array of fixed-size entries. An entry
//! with inode 0 is a free slot: unlinking never compacts a directory, it only
//! clears the slot for later reuse. The `.` and `..` entries are synthesized
//! by the namespace layer and never stored.

use crate::bytes::AnyRepr;
use crate::errno;
use crate::errno::EResult;
use core::mem::size_of;
use static_assertions::const_assert_eq;

/// The size of a directory entry in bytes.
pub const DIRENT_SIZE: usize = 128;
/// The maximum length of a name in a directory entry, null byte excluded.
pub const NAME_MAX: usize = 56;

/// A directory entry.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirectoryEntry {
	/// The entry's inode. Zero means the slot is free.
	pub inode: u32,
	/// The entry's name, null-terminated.
	name: [u8; NAME_MAX + 1],

	/// Structure padding.
	_padding: [u8; DIRENT_SIZE - size_of::<u32>() - (NAME_MAX + 1)],
}

impl Default for DirectoryEntry {
	fn default() -> Self {
		Self {
			inode: 0,
			name: [0; NAME_MAX + 1],
			_padding: [0; DIRENT_SIZE - size_of::<u32>() - (NAME_MAX + 1)],
		}
	}
}

const_assert_eq!(size_of::<DirectoryEntry>(), DIRENT_SIZE);

unsafe impl AnyRepr for DirectoryEntry {}

impl DirectoryEntry {
	/// Creates a new entry pointing to `inode` with the given name.
	///
	/// If the name is longer than [`NAME_MAX`], the function returns
	/// [`errno::ENAMETOOLONG`].
	pub fn new(inode: u32, name: &[u8]) -> EResult<Self> {
		let mut entry = Self {
			inode,
			..Default::default()
		};
		entry.set_name(name)?;
		Ok(entry)
	}

	/// Tells whether the slot is free.
	pub fn is_free(&self) -> bool {
		self.inode == 0
	}

	/// Returns the entry's name.
	pub fn name(&self) -> &[u8] {
		let len = self
			.name
			.iter()
			.position(|b| *b == 0)
			.unwrap_or(NAME_MAX);
		&self.name[..len]
	}

	/// Sets the entry's name.
	pub fn set_name(&mut self, name: &[u8]) -> EResult<()> {
		if name.len() > NAME_MAX {
			return Err(errno::ENAMETOOLONG);
		}
		self.name.fill(0);
		self.name[..name.len()].copy_from_slice(name);
		Ok(())
	}
}
