//! Path parsing and resolution, independent of any on-disk state.

use crate::error::{Error, Result};

/// Whether `p` is an absolute path (starts with `/`).
pub fn is_absolute(p: &str) -> bool {
	p.starts_with('/')
}

/// Splits `p` on `/`, dropping empty components while preserving order. `.` and `..`
/// are returned as regular tokens; the caller decides how to interpret them.
pub fn parse(p: &str) -> Vec<&str> {
	p.split('/').filter(|c| !c.is_empty()).collect()
}

/// Recomposes an absolute path from a current absolute path and a relative (or absolute)
/// path `rel`, resolving `.` and `..` components. Popping `..` past the root is a no-op.
pub fn make_absolute(current_abs: &str, rel: &str) -> String {
	let mut stack: Vec<&str> = if is_absolute(rel) {
		Vec::new()
	} else {
		parse(current_abs)
	};
	for tok in parse(rel) {
		match tok {
			"." => {}
			".." => {
				stack.pop();
			}
			_ => stack.push(tok),
		}
	}
	format!("/{}", stack.join("/"))
}

/// Splits `p` into its parent directory path and its final component.
///
/// The parent is absolute only if `p` itself is absolute; for a relative `p` the parent is
/// itself relative (empty when `p` is a single component, meaning "the current directory").
///
/// Fails with [`Error::InvalidPath`] if `p` has no leaf component (e.g. `/` or `""`).
pub fn split_parent_leaf(p: &str) -> Result<(String, &str)> {
	let tokens = parse(p);
	let leaf = *tokens.last().ok_or(Error::InvalidPath)?;
	let parent_tokens = &tokens[..tokens.len() - 1];
	let parent = if is_absolute(p) {
		format!("/{}", parent_tokens.join("/"))
	} else {
		parent_tokens.join("/")
	};
	Ok((parent, leaf))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn absolute_classification() {
		assert!(is_absolute("/a/b"));
		assert!(!is_absolute("a/b"));
		assert!(!is_absolute(""));
	}

	#[test]
	fn parse_drops_empty_tokens() {
		assert_eq!(parse("/a//b/"), vec!["a", "b"]);
		assert_eq!(parse("a/b"), vec!["a", "b"]);
		assert_eq!(parse("/"), Vec::<&str>::new());
	}

	#[test]
	fn make_absolute_relative_descent() {
		assert_eq!(make_absolute("/a/b", "c"), "/a/b/c");
	}

	#[test]
	fn make_absolute_dot_is_noop() {
		assert_eq!(make_absolute("/a/b", "."), "/a/b");
		assert_eq!(make_absolute("/a/b", "./c"), "/a/b/c");
	}

	#[test]
	fn make_absolute_dotdot_pops() {
		assert_eq!(make_absolute("/a/b", ".."), "/a");
		assert_eq!(make_absolute("/a/b", "../c"), "/a/c");
	}

	#[test]
	fn make_absolute_dotdot_at_root_is_noop() {
		assert_eq!(make_absolute("/", ".."), "/");
		assert_eq!(make_absolute("/a", "../.."), "/");
	}

	#[test]
	fn make_absolute_absolute_rel_ignores_current() {
		assert_eq!(make_absolute("/a/b", "/x/y"), "/x/y");
	}

	#[test]
	fn split_parent_leaf_basic() {
		let (parent, leaf) = split_parent_leaf("/a/b/c").unwrap();
		assert_eq!(parent, "/a/b");
		assert_eq!(leaf, "c");
	}

	#[test]
	fn split_parent_leaf_top_level() {
		let (parent, leaf) = split_parent_leaf("/f").unwrap();
		assert_eq!(parent, "/");
		assert_eq!(leaf, "f");
	}

	#[test]
	fn split_parent_leaf_relative_single_component_is_current_dir() {
		let (parent, leaf) = split_parent_leaf("f").unwrap();
		assert_eq!(parent, "");
		assert!(!is_absolute(&parent));
		assert_eq!(leaf, "f");
	}

	#[test]
	fn split_parent_leaf_relative_multi_component_stays_relative() {
		let (parent, leaf) = split_parent_leaf("sub/f").unwrap();
		assert_eq!(parent, "sub");
		assert!(!is_absolute(&parent));
		assert_eq!(leaf, "f");
	}

	#[test]
	fn split_parent_leaf_root_fails() {
		assert!(matches!(split_parent_leaf("/"), Err(Error::InvalidPath)));
	}
}
