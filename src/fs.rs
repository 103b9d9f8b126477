//! The [`Filesystem`] facade: the one type the shell and the CLI entry point talk to.
//!
//! Every public method opens the backing file and loads both bitmaps fresh on entry, and
//! lets them drop at the end of the call — no handle or bitmap is held across operations.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::bitmap::Bitmap;
use crate::data_service::DataService;
use crate::error::{Error, Result};
use crate::inode_service::InodeService;
use crate::path;
use crate::records::{DirectoryItem, Inode, Superblock, DIRECT_LINKS_COUNT, EMPTY_LINK, INDIRECT_LINKS_COUNT};

/// Whether the backing file currently holds a valid layout.
enum MountState {
	Unformatted,
	Mounted(Superblock),
}

/// Output of [`Filesystem::stat`].
#[derive(Debug, Clone)]
pub struct Stat {
	pub name: String,
	pub size: u32,
	pub id: i32,
	pub is_dir: bool,
	pub direct: [i32; DIRECT_LINKS_COUNT],
	pub indirect: [i32; INDIRECT_LINKS_COUNT],
}

/// A single entry of [`Filesystem::ls`].
#[derive(Debug, Clone)]
pub struct Entry {
	pub name: String,
	pub inode_id: i32,
	pub is_dir: bool,
}

/// Output of [`Filesystem::check`]: `(inode id, recorded size, actual size)` triples for
/// mismatches, and the ids of inodes no directory item reaches.
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
	pub size_mismatches: Vec<(u32, u32, u32)>,
	pub orphan_inodes: Vec<u32>,
}

/// A mounted (or not-yet-formatted) primitive filesystem backed by a single host file.
pub struct Filesystem {
	backing_path: PathBuf,
	state: MountState,
	current_id: i32,
	current_path: String,
}

impl Filesystem {
	/// Opens `backing_path`. A missing file is not an error: the filesystem starts
	/// `unformatted` and `format` must be called before other operations succeed.
	pub fn mount(backing_path: impl AsRef<Path>) -> Result<Self> {
		let backing_path = backing_path.as_ref().to_path_buf();
		let state = if backing_path.exists() {
			let mut file = OpenOptions::new().read(true).write(true).open(&backing_path)?;
			MountState::Mounted(Superblock::load(&mut file)?)
		} else {
			MountState::Unformatted
		};
		Ok(Self {
			backing_path,
			state,
			current_id: 0,
			current_path: "/".to_string(),
		})
	}

	/// (Re)initialises the backing file with a fresh layout sized `size_mb` megabytes, and
	/// mounts it. Destructive; legal regardless of the current mount state.
	pub fn format(&mut self, size_mb: u32) -> Result<()> {
		let sb = Superblock::compute(size_mb);
		let total_len = sb.data_area_offset as u64 + sb.cluster_capacity as u64 * crate::records::CLUSTER_SIZE as u64;

		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(&self.backing_path)?;
		file.set_len(total_len)?;
		sb.save(&mut file)?;

		let mut inode_bitmap = Bitmap::new(sb.inode_bitmap_size());
		let mut data_bitmap = Bitmap::new(sb.data_bitmap_size());
		inode_bitmap.save(&mut file, sb.inode_bitmap_offset as u64)?;
		data_bitmap.save(&mut file, sb.data_bitmap_offset as u64)?;

		let mut root = {
			let isvc = InodeService::new(&mut file, &sb, &mut inode_bitmap);
			isvc.create(true, 0)?
		};
		{
			let mut dsvc = DataService::new(&mut file, &sb, &mut data_bitmap);
			dsvc.insert_directory_item(DirectoryItem::new(".", root.id), &mut root)?;
			dsvc.insert_directory_item(DirectoryItem::new("..", root.id), &mut root)?;
		}
		{
			let mut isvc = InodeService::new(&mut file, &sb, &mut inode_bitmap);
			isvc.save(&root)?;
		}

		self.state = MountState::Mounted(sb);
		self.current_id = root.id;
		self.current_path = "/".to_string();
		Ok(())
	}

	fn sb(&self) -> Result<Superblock> {
		match self.state {
			MountState::Mounted(sb) => Ok(sb),
			MountState::Unformatted => Err(Error::Uninitialised),
		}
	}

	fn open_file(&self) -> Result<File> {
		Ok(OpenOptions::new().read(true).write(true).open(&self.backing_path)?)
	}

	fn bitmaps(&self, file: &mut File, sb: &Superblock) -> Result<(Bitmap, Bitmap)> {
		let mut inode_bitmap = Bitmap::new(sb.inode_bitmap_size());
		inode_bitmap.load(file, sb.inode_bitmap_offset as u64)?;
		let mut data_bitmap = Bitmap::new(sb.data_bitmap_size());
		data_bitmap.load(file, sb.data_bitmap_offset as u64)?;
		Ok((inode_bitmap, data_bitmap))
	}

	/// Resolves `path` to its inode, starting at the root if absolute or the current
	/// directory otherwise. Every component but the last must be a directory.
	fn resolve(
		&self,
		file: &mut File,
		sb: &Superblock,
		inode_bitmap: &mut Bitmap,
		data_bitmap: &mut Bitmap,
		p: &str,
	) -> Result<Inode> {
		let mut current = if path::is_absolute(p) {
			InodeService::new(file, sb, inode_bitmap).load_root()?
		} else {
			InodeService::new(file, sb, inode_bitmap).load(self.current_id)?
		};
		for tok in path::parse(p) {
			if !current.is_directory() {
				return Err(Error::NotADirectory);
			}
			let item = DataService::new(file, sb, data_bitmap).find_directory_item(tok, &current)?;
			current = InodeService::new(file, sb, inode_bitmap).load({ item.inode_id })?;
		}
		Ok(current)
	}

	/// Changes the current directory to `p`.
	///
	/// Fails with [`Error::NotFound`] if any component does not exist, [`Error::NotADirectory`]
	/// if an intermediate component (or the resolved target) is not a directory.
	pub fn cd(&mut self, p: &str) -> Result<()> {
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;
		let target = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, p)?;
		if !target.is_directory() {
			return Err(Error::NotADirectory);
		}
		self.current_id = target.id;
		self.current_path = path::make_absolute(&self.current_path, p);
		Ok(())
	}

	/// The current absolute path.
	pub fn pwd(&self) -> &str {
		&self.current_path
	}

	/// Lists the entries of `p`, restoring the cursor afterward regardless of outcome.
	pub fn ls(&mut self, p: &str) -> Result<Vec<Entry>> {
		let saved_id = self.current_id;
		let saved_path = self.current_path.clone();
		let result = (|| {
			self.cd(p)?;
			let sb = self.sb()?;
			let mut file = self.open_file()?;
			let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;
			let dir = InodeService::new(&mut file, &sb, &mut ibm).load(self.current_id)?;
			let items = DataService::new(&mut file, &sb, &mut dbm).list_directory(&dir)?;
			let mut entries = Vec::with_capacity(items.len());
			for item in items {
				let id = item.inode_id;
				let is_dir = InodeService::new(&mut file, &sb, &mut ibm).load(id)?.is_directory();
				entries.push(Entry { name: item.name_str(), inode_id: id, is_dir });
			}
			Ok(entries)
		})();
		self.current_id = saved_id;
		self.current_path = saved_path;
		result
	}

	/// Creates a new, empty directory at `p`.
	///
	/// Fails with [`Error::Exists`] if `p` already names an item, [`Error::NotFound`] or
	/// [`Error::NotADirectory`] if the parent cannot be resolved.
	pub fn mkdir(&mut self, p: &str) -> Result<()> {
		let (parent_path, leaf) = path::split_parent_leaf(p)?;
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;

		let mut parent = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, &parent_path)?;
		if !parent.is_directory() {
			return Err(Error::NotADirectory);
		}
		if DataService::new(&mut file, &sb, &mut dbm).find_directory_item(leaf, &parent).is_ok() {
			return Err(Error::Exists);
		}

		let mut new_dir = {
			let isvc = InodeService::new(&mut file, &sb, &mut ibm);
			isvc.create(true, 0)?
		};
		{
			let mut dsvc = DataService::new(&mut file, &sb, &mut dbm);
			dsvc.insert_directory_item(DirectoryItem::new(leaf, new_dir.id), &mut parent)?;
			dsvc.insert_directory_item(DirectoryItem::new(".", new_dir.id), &mut new_dir)?;
			dsvc.insert_directory_item(DirectoryItem::new("..", parent.id), &mut new_dir)?;
		}
		let mut isvc = InodeService::new(&mut file, &sb, &mut ibm);
		isvc.save(&new_dir)?;
		isvc.save(&parent)?;
		Ok(())
	}

	/// Removes an empty directory at `p`.
	///
	/// Fails with [`Error::NotFound`], [`Error::NotADirectory`], or [`Error::NotEmpty`] if
	/// anything but `.`/`..` remains.
	pub fn rmdir(&mut self, p: &str) -> Result<()> {
		let (parent_path, leaf) = path::split_parent_leaf(p)?;
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;

		let mut parent = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, &parent_path)?;
		let mut target = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, p)?;
		if !target.is_directory() {
			return Err(Error::NotADirectory);
		}
		if !self.is_empty_directory(&mut file, &sb, &target)? {
			return Err(Error::NotEmpty);
		}

		{
			let mut dsvc = DataService::new(&mut file, &sb, &mut dbm);
			dsvc.delete_directory_item(leaf, &mut parent)?;
			dsvc.clear_inode_data(&mut target)?;
		}
		let mut isvc = InodeService::new(&mut file, &sb, &mut ibm);
		isvc.save(&parent)?;
		isvc.remove(&target)?;
		Ok(())
	}

	fn is_empty_directory(&self, file: &mut File, sb: &Superblock, dir: &Inode) -> Result<bool> {
		let direct = dir.direct;
		let indirect = dir.indirect;
		if direct[1..].iter().any(|&v| v != EMPTY_LINK) {
			return Ok(false);
		}
		if indirect.iter().any(|&v| v != EMPTY_LINK) {
			return Ok(false);
		}
		let first_cluster = crate::records::read_item_cluster(file, sb, direct[0])?;
		Ok(first_cluster.iter().position(|it| it.is_free()) == Some(2))
	}

	/// Creates a regular file at `p` with content `bytes`.
	///
	/// Fails with [`Error::NameTooLong`], [`Error::Exists`], or the parent-resolution errors
	/// of [`resolve`](Self::resolve).
	pub fn create_file(&mut self, p: &str, bytes: &[u8]) -> Result<()> {
		let (parent_path, leaf) = path::split_parent_leaf(p)?;
		if !DirectoryItem::fits(leaf) {
			return Err(Error::NameTooLong);
		}
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;

		let mut parent = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, &parent_path)?;
		if !parent.is_directory() {
			return Err(Error::NotADirectory);
		}
		if DataService::new(&mut file, &sb, &mut dbm).find_directory_item(leaf, &parent).is_ok() {
			return Err(Error::Exists);
		}

		let mut new_file = {
			let isvc = InodeService::new(&mut file, &sb, &mut ibm);
			isvc.create(false, bytes.len() as u32)?
		};
		{
			let mut dsvc = DataService::new(&mut file, &sb, &mut dbm);
			dsvc.write_file_data(&mut new_file, bytes)?;
			dsvc.insert_directory_item(DirectoryItem::new(leaf, new_file.id), &mut parent)?;
		}
		{
			let mut isvc = InodeService::new(&mut file, &sb, &mut ibm);
			isvc.save(&new_file)?;
			isvc.save(&parent)?;
		}
		self.propagate_size(&mut file, &sb, &mut ibm, &mut dbm, parent, bytes.len() as i64)
	}

	/// Removes the regular file at `p`.
	///
	/// Fails with [`Error::NotFound`] or [`Error::IsADirectory`].
	pub fn remove_file(&mut self, p: &str) -> Result<()> {
		let (parent_path, leaf) = path::split_parent_leaf(p)?;
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;

		let mut parent = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, &parent_path)?;
		let mut target = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, p)?;
		if target.is_directory() {
			return Err(Error::IsADirectory);
		}
		let old_size = target.file_size;

		{
			let mut dsvc = DataService::new(&mut file, &sb, &mut dbm);
			dsvc.delete_directory_item(leaf, &mut parent)?;
			dsvc.clear_inode_data(&mut target)?;
		}
		{
			let mut isvc = InodeService::new(&mut file, &sb, &mut ibm);
			isvc.save(&parent)?;
			isvc.remove(&target)?;
		}
		self.propagate_size(&mut file, &sb, &mut ibm, &mut dbm, parent, -(old_size as i64))
	}

	/// Walks from `start` up to (and including) the root, applying `delta` to `file_size`.
	fn propagate_size(
		&self,
		file: &mut File,
		sb: &Superblock,
		ibm: &mut Bitmap,
		dbm: &mut Bitmap,
		mut current: Inode,
		delta: i64,
	) -> Result<()> {
		loop {
			current.file_size = (current.file_size as i64 + delta).max(0) as u32;
			InodeService::new(file, sb, ibm).save(&current)?;
			if current.id == 0 {
				return Ok(());
			}
			let parent_item = DataService::new(file, sb, dbm).find_directory_item("..", &current)?;
			current = InodeService::new(file, sb, ibm).load({ parent_item.inode_id })?;
		}
	}

	/// Reads the full content of the regular file at `p`.
	///
	/// Fails with [`Error::NotFound`] or [`Error::IsADirectory`].
	pub fn cat(&mut self, p: &str) -> Result<Vec<u8>> {
		self.read_file(p)
	}

	fn read_file(&mut self, p: &str) -> Result<Vec<u8>> {
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;
		let inode = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, p)?;
		if inode.is_directory() {
			return Err(Error::IsADirectory);
		}
		DataService::new(&mut file, &sb, &mut dbm).read_file(&inode)
	}

	/// Copies the file at `src` to a new file at `dst`.
	pub fn cp(&mut self, src: &str, dst: &str) -> Result<()> {
		let bytes = self.read_file(src)?;
		self.create_file(dst, &bytes)
	}

	/// Moves the file at `src` to `dst` (copy, then remove the source).
	pub fn mv(&mut self, src: &str, dst: &str) -> Result<()> {
		self.cp(src, dst)?;
		self.remove_file(src)
	}

	/// Describes the inode at `p`.
	pub fn stat(&mut self, p: &str) -> Result<Stat> {
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;
		let inode = self.resolve(&mut file, &sb, &mut ibm, &mut dbm, p)?;
		let name = if path::is_absolute(p) && path::parse(p).is_empty() {
			"/".to_string()
		} else {
			path::split_parent_leaf(p)?.1.to_string()
		};
		Ok(Stat {
			name,
			size: inode.file_size,
			id: inode.id,
			is_dir: inode.is_directory(),
			direct: inode.direct,
			indirect: inode.indirect,
		})
	}

	/// Audits the filesystem: verifies every regular file's recorded size against its actual
	/// content length, and flags every non-root inode no directory item reaches.
	pub fn check(&mut self) -> Result<CheckReport> {
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;

		let all = InodeService::new(&mut file, &sb, &mut ibm).all_inodes()?;
		let root = InodeService::new(&mut file, &sb, &mut ibm).load_root()?;

		let mut referenced = HashSet::new();
		let mut stack = vec![root];
		while let Some(dir) = stack.pop() {
			for item in DataService::new(&mut file, &sb, &mut dbm).list_directory(&dir)? {
				let name = item.name_str();
				if name == "." || name == ".." {
					continue;
				}
				referenced.insert(item.inode_id);
				if let Ok(child) = InodeService::new(&mut file, &sb, &mut ibm).load({ item.inode_id }) {
					if child.is_directory() {
						stack.push(child);
					}
				}
			}
		}

		let mut report = CheckReport::default();
		for inode in &all {
			if inode.id == 0 {
				continue;
			}
			if !inode.is_directory() {
				let actual = DataService::new(&mut file, &sb, &mut dbm).read_file(inode)?.len() as u32;
				if actual != inode.file_size {
					report.size_mismatches.push((inode.id as u32, inode.file_size, actual));
				}
			}
			let id = inode.id;
			if !referenced.contains(&id) {
				report.orphan_inodes.push(inode.id as u32);
			}
		}
		Ok(report)
	}

	/// Testing hook: detaches every non-`.`/`..` entry from the root directory and wipes the
	/// link arrays of the inodes they used to name, without freeing their bitmap bits or
	/// updating their recorded size. Exists only to give [`check`](Self::check) something to
	/// report.
	pub fn break_fs(&mut self) -> Result<()> {
		let sb = self.sb()?;
		let mut file = self.open_file()?;
		let (mut ibm, mut dbm) = self.bitmaps(&mut file, &sb)?;

		let mut root = InodeService::new(&mut file, &sb, &mut ibm).load_root()?;
		let items = DataService::new(&mut file, &sb, &mut dbm).list_directory(&root)?;
		let victims: Vec<(String, i32)> = items
			.iter()
			.map(|it| (it.name_str(), { it.inode_id }))
			.filter(|(name, _)| name != "." && name != "..")
			.collect();

		for (_, id) in &victims {
			if let Ok(mut child) = InodeService::new(&mut file, &sb, &mut ibm).load(*id) {
				child.direct = [EMPTY_LINK; DIRECT_LINKS_COUNT];
				child.indirect = [EMPTY_LINK; INDIRECT_LINKS_COUNT];
				InodeService::new(&mut file, &sb, &mut ibm).save(&child)?;
			}
		}
		for (name, _) in &victims {
			DataService::new(&mut file, &sb, &mut dbm).delete_directory_item(name, &mut root)?;
		}
		InodeService::new(&mut file, &sb, &mut ibm).save(&root)?;
		Ok(())
	}
}
