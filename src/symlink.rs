//! Interpretation of symbolic link targets.
//!
//! A link target starting with the literal `root?` is a conditional link of
//! the form `root?A:B`: it resolves to `A` for the superuser and to `B` for
//! everyone else. Any other target is returned unchanged.

use crate::errno;
use crate::errno::EResult;
use crate::file::ROOT_UID;
use crate::file::Uid;

/// The prefix marking a conditional link target.
const CONDITIONAL_PREFIX: &[u8] = b"root?";

/// Resolves the link target `target` for the user `uid`.
///
/// A conditional target missing its `:` separator is rejected with
/// [`errno::EINVAL`].
pub fn resolve(target: &[u8], uid: Uid) -> EResult<&[u8]> {
	let Some(cond) = target.strip_prefix(CONDITIONAL_PREFIX) else {
		return Ok(target);
	};
	let sep = cond
		.iter()
		.position(|b| *b == b':')
		.ok_or(errno::EINVAL)?;
	if uid == ROOT_UID {
		Ok(&cond[..sep])
	} else {
		Ok(&cond[(sep + 1)..])
	}
}
