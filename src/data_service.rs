//! Allocation and traversal of data clusters: directory items, indirect lists and file content.
//!
//! All cluster-level I/O for both directories and regular files funnels through here; the
//! [`crate::fs::Filesystem`] facade only ever deals in paths, names and byte buffers.

use std::fs::File;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::records::{
	ceil_division, read_indirect_list, read_item_cluster, write_indirect_list,
	write_item_cluster, DirectoryItem, Inode, Superblock, CLUSTER_SIZE, DIRECT_LINKS_COUNT,
	EMPTY_LINK, INDIRECT_LINKS_COUNT, ITEMS_PER_CLUSTER, LINKS_IN_INDIRECT,
};

/// Maximum file content size addressable with one level of indirection.
pub const MAX_FILE_SIZE: u64 =
	(DIRECT_LINKS_COUNT as u64 + (INDIRECT_LINKS_COUNT * LINKS_IN_INDIRECT) as u64) * CLUSTER_SIZE as u64;

/// Allocates and traverses data clusters on behalf of the facade.
pub struct DataService<'a> {
	file: &'a mut File,
	sb: &'a Superblock,
	bitmap: &'a mut Bitmap,
}

impl<'a> DataService<'a> {
	/// Builds a service bound to the given file, superblock and (mutable, in-memory) bitmap.
	pub fn new(file: &'a mut File, sb: &'a Superblock, bitmap: &'a mut Bitmap) -> Self {
		Self { file, sb, bitmap }
	}

	/// Finds `n` free cluster indices without allocating them.
	pub fn cluster_index_for(&self, n: usize) -> Result<Vec<i32>> {
		self.bitmap
			.find_free(n)
			.map(|v| v.into_iter().map(|i| i as i32).collect())
			.map_err(|_| Error::NoFreeCluster)
	}

	fn alloc_cluster(&mut self) -> Result<i32> {
		let idx = self.cluster_index_for(1)?[0];
		self.bitmap.set(idx as usize);
		Ok(idx)
	}

	fn persist_bitmap(&mut self) -> Result<()> {
		self.bitmap.save(self.file, self.sb.data_bitmap_offset as u64)
	}

	fn zero_cluster(&mut self, idx: i32) -> Result<()> {
		self.file.seek(SeekFrom::Start(self.sb.cluster_offset(idx)))?;
		self.file.write_all(&[0u8; CLUSTER_SIZE])?;
		Ok(())
	}

	/// Collects the indices of every directory-item cluster reachable from `dir`, in the
	/// direct-then-indirect traversal order (Invariant A).
	fn item_cluster_indices(&mut self, dir: &Inode) -> Result<Vec<i32>> {
		let mut out = Vec::new();
		for d in dir.direct {
			if d == EMPTY_LINK {
				break;
			}
			out.push(d);
		}
		for ind in dir.indirect {
			if ind == EMPTY_LINK {
				break;
			}
			let list = read_indirect_list(self.file, self.sb, ind)?;
			for &entry in &list {
				if entry == EMPTY_LINK {
					break;
				}
				out.push(entry);
			}
		}
		Ok(out)
	}

	/// Lists every occupied slot across `dir`'s item clusters.
	pub fn list_directory(&mut self, dir: &Inode) -> Result<Vec<DirectoryItem>> {
		let mut out = Vec::new();
		for idx in self.item_cluster_indices(dir)? {
			let cluster = read_item_cluster(self.file, self.sb, idx)?;
			out.extend(cluster.into_iter().filter(|it| !it.is_free()));
		}
		Ok(out)
	}

	/// Finds the first item named `name` inside `dir`.
	///
	/// Fails with [`Error::NotFound`] if no such item exists.
	pub fn find_directory_item(&mut self, name: &str, dir: &Inode) -> Result<DirectoryItem> {
		self.list_directory(dir)?
			.into_iter()
			.find(|it| it.name_is(name))
			.ok_or(Error::NotFound)
	}

	fn alloc_item_cluster(&mut self, item: DirectoryItem) -> Result<i32> {
		let idx = self.alloc_cluster()?;
		let mut items = [DirectoryItem::empty(); ITEMS_PER_CLUSTER];
		items[0] = item;
		write_item_cluster(self.file, self.sb, idx, &items)?;
		Ok(idx)
	}

	/// Appends `item` into `dir`, allocating clusters and indirect lists as needed (§4.E).
	///
	/// Fails with [`Error::DirectoryFull`] once both indirect links are exhausted.
	pub fn insert_directory_item(&mut self, item: DirectoryItem, dir: &mut Inode) -> Result<()> {
		self.insert_inner(item, dir)?;
		self.persist_bitmap()
	}

	fn insert_inner(&mut self, item: DirectoryItem, dir: &mut Inode) -> Result<()> {
		// Step 1: no direct links allocated at all.
		if dir.direct[0] == EMPTY_LINK {
			dir.direct[0] = self.alloc_item_cluster(item)?;
			return Ok(());
		}

		// Step 2: try the last direct-referenced cluster's free slots.
		let direct = dir.direct;
		let k = direct.iter().rposition(|&v| v != EMPTY_LINK).unwrap();
		let k_idx = dir.direct[k];
		let mut items = read_item_cluster(self.file, self.sb, k_idx)?;
		if let Some(slot) = items.iter().position(|it| it.is_free()) {
			items[slot] = item;
			write_item_cluster(self.file, self.sb, k_idx, &items)?;
			return Ok(());
		}

		// Step 3: another direct link is still free.
		if k + 1 < DIRECT_LINKS_COUNT {
			dir.direct[k + 1] = self.alloc_item_cluster(item)?;
			return Ok(());
		}

		// Steps 4-6: indirect insertion.
		self.insert_into_indirect(item, dir)
	}

	fn insert_into_indirect(&mut self, item: DirectoryItem, dir: &mut Inode) -> Result<()> {
		let indirect = dir.indirect;
		let Some(j) = indirect.iter().rposition(|&v| v != EMPTY_LINK) else {
			// Step 4: no indirect link used yet.
			let data_idx = self.alloc_item_cluster(item)?;
			let mut list = [EMPTY_LINK; LINKS_IN_INDIRECT];
			list[0] = data_idx;
			let list_idx = self.alloc_cluster()?;
			write_indirect_list(self.file, self.sb, list_idx, &list)?;
			dir.indirect[0] = list_idx;
			return Ok(());
		};

		let list_idx = dir.indirect[j];
		let mut list = read_indirect_list(self.file, self.sb, list_idx)?;
		let last_entry = list.iter().rposition(|&v| v != EMPTY_LINK);
		let full = last_entry == Some(LINKS_IN_INDIRECT - 1);

		if !full {
			// Step 5: the indirect-list cluster is not full.
			if let Some(lp) = last_entry {
				let last_item_idx = list[lp];
				let mut items = read_item_cluster(self.file, self.sb, last_item_idx)?;
				if let Some(slot) = items.iter().position(|it| it.is_free()) {
					items[slot] = item;
					write_item_cluster(self.file, self.sb, last_item_idx, &items)?;
					return Ok(());
				}
			}
			let data_idx = self.alloc_item_cluster(item)?;
			let next_pos = last_entry.map(|p| p + 1).unwrap_or(0);
			list[next_pos] = data_idx;
			write_indirect_list(self.file, self.sb, list_idx, &list)?;
			return Ok(());
		}

		// Step 6: this indirect-list cluster is full; try the next indirect link.
		if j + 1 < INDIRECT_LINKS_COUNT {
			let data_idx = self.alloc_item_cluster(item)?;
			let mut new_list = [EMPTY_LINK; LINKS_IN_INDIRECT];
			new_list[0] = data_idx;
			let new_list_idx = self.alloc_cluster()?;
			write_indirect_list(self.file, self.sb, new_list_idx, &new_list)?;
			dir.indirect[j + 1] = new_list_idx;
			Ok(())
		} else {
			Err(Error::DirectoryFull)
		}
	}

	/// Removes the item named `name` from `dir`, freeing any cluster or indirect-list cluster
	/// that becomes entirely empty as a result.
	///
	/// Fails with [`Error::NotFound`] if no such item exists.
	pub fn delete_directory_item(&mut self, name: &str, dir: &mut Inode) -> Result<DirectoryItem> {
		if let Some(removed) = self.delete_from_direct(name, dir)? {
			self.persist_bitmap()?;
			return Ok(removed);
		}
		if let Some(removed) = self.delete_from_indirect(name, dir)? {
			self.persist_bitmap()?;
			return Ok(removed);
		}
		Err(Error::NotFound)
	}

	fn delete_from_direct(&mut self, name: &str, dir: &mut Inode) -> Result<Option<DirectoryItem>> {
		for k in 0..DIRECT_LINKS_COUNT {
			let idx = dir.direct[k];
			if idx == EMPTY_LINK {
				break;
			}
			let mut items = read_item_cluster(self.file, self.sb, idx)?;
			let Some(slot) = items.iter().position(|it| !it.is_free() && it.name_is(name)) else {
				continue;
			};
			let removed = items[slot];
			items[slot] = DirectoryItem::empty();
			write_item_cluster(self.file, self.sb, idx, &items)?;
			if items.iter().all(|it| it.is_free()) {
				self.bitmap.clear(idx as usize);
				for m in k..DIRECT_LINKS_COUNT - 1 {
					dir.direct[m] = dir.direct[m + 1];
				}
				dir.direct[DIRECT_LINKS_COUNT - 1] = EMPTY_LINK;
			}
			return Ok(Some(removed));
		}
		Ok(None)
	}

	fn delete_from_indirect(&mut self, name: &str, dir: &mut Inode) -> Result<Option<DirectoryItem>> {
		for j in 0..INDIRECT_LINKS_COUNT {
			let list_idx = dir.indirect[j];
			if list_idx == EMPTY_LINK {
				break;
			}
			let mut list = read_indirect_list(self.file, self.sb, list_idx)?;
			for m in 0..LINKS_IN_INDIRECT {
				let item_idx = list[m];
				if item_idx == EMPTY_LINK {
					break;
				}
				let mut items = read_item_cluster(self.file, self.sb, item_idx)?;
				let Some(slot) = items.iter().position(|it| !it.is_free() && it.name_is(name))
				else {
					continue;
				};
				let removed = items[slot];
				items[slot] = DirectoryItem::empty();
				write_item_cluster(self.file, self.sb, item_idx, &items)?;

				let mut list_changed = false;
				if items.iter().all(|it| it.is_free()) {
					self.bitmap.clear(item_idx as usize);
					for mm in m..LINKS_IN_INDIRECT - 1 {
						list[mm] = list[mm + 1];
					}
					list[LINKS_IN_INDIRECT - 1] = EMPTY_LINK;
					write_indirect_list(self.file, self.sb, list_idx, &list)?;
					list_changed = true;
				}
				if list_changed && list.iter().all(|&v| v == EMPTY_LINK) {
					self.bitmap.clear(list_idx as usize);
					for jj in j..INDIRECT_LINKS_COUNT - 1 {
						dir.indirect[jj] = dir.indirect[jj + 1];
					}
					dir.indirect[INDIRECT_LINKS_COUNT - 1] = EMPTY_LINK;
				}
				return Ok(Some(removed));
			}
		}
		Ok(None)
	}

	/// Zeroes and frees every data cluster and indirect-list cluster referenced by `inode`,
	/// then clears its link arrays.
	pub fn clear_inode_data(&mut self, inode: &mut Inode) -> Result<()> {
		for d in inode.direct {
			if d == EMPTY_LINK {
				break;
			}
			self.zero_cluster(d)?;
			self.bitmap.clear(d as usize);
		}
		for ind in inode.indirect {
			if ind == EMPTY_LINK {
				break;
			}
			let list = read_indirect_list(self.file, self.sb, ind)?;
			for entry in list {
				if entry == EMPTY_LINK {
					break;
				}
				self.zero_cluster(entry)?;
				self.bitmap.clear(entry as usize);
			}
			self.zero_cluster(ind)?;
			self.bitmap.clear(ind as usize);
		}
		inode.direct = [EMPTY_LINK; DIRECT_LINKS_COUNT];
		inode.indirect = [EMPTY_LINK; INDIRECT_LINKS_COUNT];
		self.persist_bitmap()
	}

	/// Reads the full content of a regular file, truncated to `inode.file_size`.
	pub fn read_file(&mut self, inode: &Inode) -> Result<Vec<u8>> {
		let target = inode.file_size as usize;
		let mut out = Vec::with_capacity(target);
		'read: {
			for d in inode.direct {
				if d == EMPTY_LINK {
					break;
				}
				out.extend_from_slice(&self.read_cluster(d)?);
				if out.len() >= target {
					break 'read;
				}
			}
			for ind in inode.indirect {
				if ind == EMPTY_LINK {
					break;
				}
				let list = read_indirect_list(self.file, self.sb, ind)?;
				for entry in list {
					if entry == EMPTY_LINK {
						break;
					}
					out.extend_from_slice(&self.read_cluster(entry)?);
					if out.len() >= target {
						break 'read;
					}
				}
			}
		}
		out.truncate(target);
		Ok(out)
	}

	fn read_cluster(&mut self, idx: i32) -> Result<[u8; CLUSTER_SIZE]> {
		use std::io::Read;
		let mut buf = [0u8; CLUSTER_SIZE];
		self.file.seek(SeekFrom::Start(self.sb.cluster_offset(idx)))?;
		self.file.read_exact(&mut buf)?;
		Ok(buf)
	}

	/// Allocates clusters for `bytes` and writes them into `inode`'s direct and indirect
	/// links, interleaving indirect-list clusters per the allocation plan of §4.E.
	///
	/// Fails with [`Error::NoFreeCluster`] if `bytes` exceeds [`MAX_FILE_SIZE`] or the bitmap
	/// cannot satisfy the allocation plan.
	pub fn write_file_data(&mut self, inode: &mut Inode, bytes: &[u8]) -> Result<()> {
		if bytes.len() as u64 > MAX_FILE_SIZE {
			return Err(Error::NoFreeCluster);
		}
		let data_clusters = ceil_division(bytes.len() as i64, CLUSTER_SIZE as i64) as usize;
		if data_clusters == 0 {
			return Ok(());
		}
		let indirect_lists = if data_clusters > DIRECT_LINKS_COUNT {
			ceil_division(
				(data_clusters - DIRECT_LINKS_COUNT) as i64,
				LINKS_IN_INDIRECT as i64,
			) as usize
		} else {
			0
		};
		let required = data_clusters + indirect_lists;
		let indices = self.cluster_index_for(required)?;
		for &idx in &indices {
			self.bitmap.set(idx as usize);
		}

		let mut idx_iter = indices.into_iter();
		let mut chunk_iter = bytes.chunks(CLUSTER_SIZE);

		let direct_count = data_clusters.min(DIRECT_LINKS_COUNT);
		for i in 0..direct_count {
			let idx = idx_iter.next().expect("allocation plan accounted for direct clusters");
			self.write_cluster_chunk(idx, chunk_iter.next().unwrap())?;
			inode.direct[i] = idx;
		}

		let mut remaining = data_clusters - direct_count;
		let mut indirect_slot = 0;
		while remaining > 0 {
			let list_idx = idx_iter.next().expect("allocation plan accounted for indirect-list clusters");
			let take = remaining.min(LINKS_IN_INDIRECT);
			let mut list = [EMPTY_LINK; LINKS_IN_INDIRECT];
			for slot in list.iter_mut().take(take) {
				let data_idx = idx_iter.next().expect("allocation plan accounted for indirect data clusters");
				self.write_cluster_chunk(data_idx, chunk_iter.next().unwrap())?;
				*slot = data_idx;
			}
			write_indirect_list(self.file, self.sb, list_idx, &list)?;
			inode.indirect[indirect_slot] = list_idx;
			remaining -= take;
			indirect_slot += 1;
		}

		self.persist_bitmap()
	}

	fn write_cluster_chunk(&mut self, idx: i32, chunk: &[u8]) -> Result<()> {
		let mut buf = [0u8; CLUSTER_SIZE];
		buf[..chunk.len()].copy_from_slice(chunk);
		self.file.seek(SeekFrom::Start(self.sb.cluster_offset(idx)))?;
		self.file.write_all(&buf)?;
		Ok(())
	}
}

/// Number of data-bitmap bits a file of `len` bytes consumes, per the allocation plan of §4.E.
/// Exposed for tests and for [`crate::fs::Filesystem::check`].
pub fn clusters_for_len(len: u64) -> usize {
	let data_clusters = ceil_division(len as i64, CLUSTER_SIZE as i64) as usize;
	if data_clusters <= DIRECT_LINKS_COUNT {
		data_clusters
	} else {
		let indirect_lists = ceil_division(
			(data_clusters - DIRECT_LINKS_COUNT) as i64,
			LINKS_IN_INDIRECT as i64,
		) as usize;
		data_clusters + indirect_lists
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::records::Superblock;
	use std::fs::File;

	fn scratch(sb: &Superblock) -> File {
		let path = std::env::temp_dir().join(format!(
			"pfs-data-service-test-{}-{:?}",
			std::process::id(),
			std::thread::current().id()
		));
		let f = File::options()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(&path)
			.unwrap();
		std::fs::remove_file(&path).unwrap();
		f.set_len(sb.data_area_offset as u64 + sb.cluster_capacity as u64 * CLUSTER_SIZE as u64)
			.unwrap();
		f
	}

	#[test]
	fn insert_and_find_directory_item() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut dir = Inode::new(0, true, 0);

		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);
		svc.insert_directory_item(DirectoryItem::new(".", 0), &mut dir).unwrap();
		svc.insert_directory_item(DirectoryItem::new("..", 0), &mut dir).unwrap();
		svc.insert_directory_item(DirectoryItem::new("a", 1), &mut dir).unwrap();

		let found = svc.find_directory_item("a", &dir).unwrap();
		assert_eq!({ found.inode_id }, 1);
		assert_eq!(svc.list_directory(&dir).unwrap().len(), 3);
	}

	#[test]
	fn insert_overflows_into_second_direct_cluster() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut dir = Inode::new(0, true, 0);
		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);

		for i in 0..ITEMS_PER_CLUSTER {
			svc.insert_directory_item(DirectoryItem::new(&format!("f{i}"), i as i32), &mut dir)
				.unwrap();
		}
		assert_ne!({ dir.direct[0] }, EMPTY_LINK);
		assert_ne!({ dir.direct[1] }, EMPTY_LINK);
		assert_eq!(svc.list_directory(&dir).unwrap().len(), ITEMS_PER_CLUSTER);
	}

	#[test]
	fn delete_frees_cluster_when_empty() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut dir = Inode::new(0, true, 0);
		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);

		svc.insert_directory_item(DirectoryItem::new("only", 1), &mut dir).unwrap();
		let cluster = dir.direct[0];
		assert!(bitmap.is_set(cluster as usize));

		svc.delete_directory_item("only", &mut dir).unwrap();
		assert_eq!({ dir.direct[0] }, EMPTY_LINK);
		assert!(!bitmap.is_set(cluster as usize));
	}

	#[test]
	fn delete_missing_name_is_not_found() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut dir = Inode::new(0, true, 0);
		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);
		assert!(matches!(svc.delete_directory_item("nope", &mut dir), Err(Error::NotFound)));
	}

	#[test]
	fn write_and_read_small_file() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut inode = Inode::new(1, false, 0);
		let content = b"hello world";

		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);
		svc.write_file_data(&mut inode, content).unwrap();
		inode.file_size = content.len() as u32;
		assert_eq!(svc.read_file(&inode).unwrap(), content);
		assert_eq!(dir_cluster_count(&bitmap), 1);
	}

	#[test]
	fn write_exact_direct_capacity_uses_no_indirect_list() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut inode = Inode::new(1, false, 0);
		let content = vec![7u8; CLUSTER_SIZE * DIRECT_LINKS_COUNT];

		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);
		svc.write_file_data(&mut inode, &content).unwrap();
		inode.file_size = content.len() as u32;

		assert_eq!(dir_cluster_count(&bitmap), DIRECT_LINKS_COUNT);
		assert_eq!({ inode.indirect }, [EMPTY_LINK; INDIRECT_LINKS_COUNT]);
		assert_eq!(svc.read_file(&inode).unwrap(), content);
	}

	#[test]
	fn write_one_past_direct_capacity_allocates_one_indirect_list() {
		let sb = Superblock::compute(10);
		let mut file = scratch(&sb);
		let mut bitmap = Bitmap::new(sb.data_bitmap_size());
		let mut inode = Inode::new(1, false, 0);
		let content = vec![7u8; CLUSTER_SIZE * (DIRECT_LINKS_COUNT + 1)];

		let mut svc = DataService::new(&mut file, &sb, &mut bitmap);
		svc.write_file_data(&mut inode, &content).unwrap();
		inode.file_size = content.len() as u32;

		// D direct clusters + 1 indirect-list cluster + 1 indirect data cluster = D + 2 bits.
		assert_eq!(dir_cluster_count(&bitmap), DIRECT_LINKS_COUNT + 2);
		assert_ne!({ inode.indirect[0] }, EMPTY_LINK);
		assert_eq!({ inode.indirect[1] }, EMPTY_LINK);
		assert_eq!(svc.read_file(&inode).unwrap(), content);
	}

	#[test]
	fn clusters_for_len_matches_boundary_scenarios() {
		let c = CLUSTER_SIZE as u64;
		let d = DIRECT_LINKS_COUNT as u64;
		let l = LINKS_IN_INDIRECT as u64;
		assert_eq!(clusters_for_len(0), 0);
		assert_eq!(clusters_for_len(c * d), d as usize);
		assert_eq!(clusters_for_len(c * (d + 1)), (d + 2) as usize);
		assert_eq!(clusters_for_len(c * (d + l)), (d + l + 1) as usize);
		assert_eq!(clusters_for_len(c * (d + l + 1)), (d + l + 1 + 2) as usize);
	}

	fn dir_cluster_count(bitmap: &Bitmap) -> usize {
		(0..bitmap.capacity()).filter(|&i| bitmap.is_set(i)).count()
	}
}
