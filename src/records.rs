//! On-disk record layouts: [`Superblock`], [`Inode`] and [`DirectoryItem`].
//!
//! Every record is `#[repr(C, packed)]` and is read or written as a whole via
//! [`as_bytes`]/[`as_bytes_mut`] so that its binary layout on disk is exactly
//! its in-memory layout, with no framing or length prefix.

use std::fs::File;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::mem::size_of;
use std::slice;

use crate::error::Result;

/// Size in bytes of a data cluster.
pub const CLUSTER_SIZE: usize = 1024;
/// Number of direct links held by an inode.
pub const DIRECT_LINKS_COUNT: usize = 5;
/// Number of indirect links held by an inode.
pub const INDIRECT_LINKS_COUNT: usize = 2;
/// Number of cluster indices that fit in one indirect-list cluster.
pub const LINKS_IN_INDIRECT: usize = CLUSTER_SIZE / size_of::<i32>();
/// Sentinel marking an empty direct/indirect link.
pub const EMPTY_LINK: i32 = -1;
/// Sentinel marking a free inode id.
pub const FREE_INODE_ID: i32 = -1;
/// Maximum length of a directory item name, including the NUL terminator.
pub const DIR_ITEM_NAME_LENGTH: usize = 12;
/// Maximum number of usable bytes in a filename (the terminator is not counted).
pub const MAX_FILENAME_LEN: usize = DIR_ITEM_NAME_LENGTH - 1;

const SIGNATURE_LENGTH: usize = 10;
const VOLUME_DESC_LENGTH: usize = 20;
const SIGNATURE: &[u8; SIGNATURE_LENGTH] = b"primitive\0";
const VOLUME_DESCRIPTION: &[u8; VOLUME_DESC_LENGTH] = b"Primitive file system\0\0\0\0\0\0";

/// Reinterprets a `#[repr(C, packed)]` value as its raw byte representation.
///
/// # Safety
/// `T` must be a type with no padding-sensitive invariants (a packed POD struct); the
/// returned slice borrows `value` and must not outlive it.
unsafe fn as_bytes<T>(value: &T) -> &[u8] {
	slice::from_raw_parts(value as *const T as *const u8, size_of::<T>())
}

/// Reinterprets a `#[repr(C, packed)]` value as a mutable raw byte buffer, for use as the
/// destination of a `read_exact` call.
///
/// # Safety
/// See [`as_bytes`].
unsafe fn as_bytes_mut<T>(value: &mut T) -> &mut [u8] {
	slice::from_raw_parts_mut(value as *mut T as *mut u8, size_of::<T>())
}

/// The filesystem's superblock, written once at offset 0 and immutable after `format`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct Superblock {
	/// Author/volume signature.
	pub signature: [u8; SIGNATURE_LENGTH],
	/// Human-readable volume description.
	pub description: [u8; VOLUME_DESC_LENGTH],
	/// Size of the backing file in bytes.
	pub disk_size: i32,
	/// Maximum number of inodes.
	pub inode_capacity: i32,
	/// Maximum number of data clusters.
	pub cluster_capacity: i32,
	/// Byte offset of the inode bitmap.
	pub inode_bitmap_offset: i32,
	/// Byte offset of the data bitmap.
	pub data_bitmap_offset: i32,
	/// Byte offset of the inode table.
	pub inode_table_offset: i32,
	/// Byte offset of the data area.
	pub data_area_offset: i32,
}

impl Superblock {
	/// Computes the geometry for a freshly formatted filesystem of `size_mb` megabytes.
	pub fn compute(size_mb: u32) -> Self {
		let disk_size = size_mb as i64 * 1_000_000;
		let inode_capacity = (disk_size / 1000) as i32;

		let inode_bitmap_offset = size_of::<Superblock>() as i32;
		let inode_bitmap_size = ceil_division(inode_capacity as i64, 8) as i32;
		let data_bitmap_offset = inode_bitmap_offset + inode_bitmap_size;
		let inode_table_offset_base = data_bitmap_offset; // + data_bitmap_size, computed below

		// The data bitmap's own size depends on the cluster count, which depends on how much
		// space is left after the bitmap and the inode table. Start from an upper bound and
		// shrink until the layout fits.
		let fixed_overhead = inode_table_offset_base as i64
			+ inode_capacity as i64 * size_of::<Inode>() as i64;
		let mut cluster_capacity = ((disk_size - fixed_overhead) / CLUSTER_SIZE as i64).max(0);
		loop {
			let data_bitmap_size = ceil_division(cluster_capacity, 8);
			let used = fixed_overhead + data_bitmap_size + cluster_capacity * CLUSTER_SIZE as i64;
			if used <= disk_size || cluster_capacity == 0 {
				break;
			}
			cluster_capacity -= 1;
		}
		let data_bitmap_size = ceil_division(cluster_capacity, 8) as i32;
		let inode_table_offset = data_bitmap_offset + data_bitmap_size;
		let data_area_offset =
			inode_table_offset + inode_capacity * size_of::<Inode>() as i32;

		Self {
			signature: *SIGNATURE,
			description: *VOLUME_DESCRIPTION,
			disk_size: disk_size as i32,
			inode_capacity,
			cluster_capacity: cluster_capacity as i32,
			inode_bitmap_offset,
			data_bitmap_offset,
			inode_table_offset,
			data_area_offset,
		}
	}

	/// Size in bytes of the inode bitmap.
	pub fn inode_bitmap_size(&self) -> usize {
		ceil_division(self.inode_capacity as i64, 8) as usize
	}

	/// Size in bytes of the data bitmap.
	pub fn data_bitmap_size(&self) -> usize {
		ceil_division(self.cluster_capacity as i64, 8) as usize
	}

	/// Byte offset of the `id`th inode in the inode table.
	pub fn inode_offset(&self, id: i32) -> u64 {
		self.inode_table_offset as u64 + id as u64 * size_of::<Inode>() as u64
	}

	/// Byte offset of the `idx`th data cluster.
	pub fn cluster_offset(&self, idx: i32) -> u64 {
		self.data_area_offset as u64 + idx as u64 * CLUSTER_SIZE as u64
	}

	/// Writes the superblock at offset 0.
	pub fn save(&self, file: &mut File) -> Result<()> {
		file.seek(SeekFrom::Start(0))?;
		file.write_all(unsafe { as_bytes(self) })?;
		Ok(())
	}

	/// Reads the superblock from offset 0.
	pub fn load(file: &mut File) -> Result<Self> {
		let mut sb: Self = unsafe { std::mem::zeroed() };
		file.seek(SeekFrom::Start(0))?;
		file.read_exact(unsafe { as_bytes_mut(&mut sb) })?;
		Ok(sb)
	}
}

/// Rounds `a / b` up to the nearest integer.
pub fn ceil_division(a: i64, b: i64) -> i64 {
	(a + b - 1) / b
}

/// A fixed-size record describing one file or directory.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct Inode {
	/// Id of this inode; position in the inode table. `-1` marks a free slot.
	pub id: i32,
	/// `1` if this inode is a directory, `0` if it is a regular file.
	pub is_dir: u8,
	/// Number of references to this inode (always `1`; hard links are a non-goal).
	pub references: u8,
	/// Size of the file's content in bytes.
	pub file_size: u32,
	/// Direct links to data clusters.
	pub direct: [i32; DIRECT_LINKS_COUNT],
	/// Indirect links to indirect-list clusters.
	pub indirect: [i32; INDIRECT_LINKS_COUNT],
}

impl Inode {
	/// Builds a fresh, unsaved inode with all links empty.
	pub fn new(id: i32, is_dir: bool, file_size: u32) -> Self {
		Self {
			id,
			is_dir: is_dir as u8,
			references: 1,
			file_size,
			direct: [EMPTY_LINK; DIRECT_LINKS_COUNT],
			indirect: [EMPTY_LINK; INDIRECT_LINKS_COUNT],
		}
	}

	/// A zeroed, free-slot inode record (used to wipe a removed slot).
	pub fn free_slot() -> Self {
		Self {
			id: FREE_INODE_ID,
			is_dir: 0,
			references: 0,
			file_size: 0,
			direct: [EMPTY_LINK; DIRECT_LINKS_COUNT],
			indirect: [EMPTY_LINK; INDIRECT_LINKS_COUNT],
		}
	}

	/// Whether this inode represents a directory.
	pub fn is_directory(&self) -> bool {
		self.is_dir != 0
	}

	/// Writes this inode at its table slot (`superblock.inode_offset(self.id)`).
	pub fn save(&self, file: &mut File, sb: &Superblock) -> Result<()> {
		file.seek(SeekFrom::Start(sb.inode_offset(self.id)))?;
		file.write_all(unsafe { as_bytes(self) })?;
		Ok(())
	}

	/// Reads the inode at table slot `id`.
	pub fn load(file: &mut File, sb: &Superblock, id: i32) -> Result<Self> {
		let mut inode: Self = unsafe { std::mem::zeroed() };
		file.seek(SeekFrom::Start(sb.inode_offset(id)))?;
		file.read_exact(unsafe { as_bytes_mut(&mut inode) })?;
		Ok(inode)
	}
}

/// A 16-byte record mapping a name to an inode id, stored packed inside directory clusters.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct DirectoryItem {
	/// Id of the inode this item refers to.
	pub inode_id: i32,
	/// NUL-padded name, at most [`MAX_FILENAME_LEN`] usable bytes.
	pub name: [u8; DIR_ITEM_NAME_LENGTH],
}

impl DirectoryItem {
	/// Builds a new directory item. Panics if `name` exceeds [`MAX_FILENAME_LEN`] bytes; callers
	/// must validate with [`DirectoryItem::fits`] beforehand (the facade raises `NameTooLong`).
	pub fn new(name: &str, inode_id: i32) -> Self {
		assert!(Self::fits(name));
		let mut buf = [0u8; DIR_ITEM_NAME_LENGTH];
		buf[..name.len()].copy_from_slice(name.as_bytes());
		Self {
			inode_id,
			name: buf,
		}
	}

	/// Whether `name` is short enough to be stored in a directory item.
	pub fn fits(name: &str) -> bool {
		name.len() <= MAX_FILENAME_LEN
	}

	/// An all-zero record, used to mark a free slot.
	pub fn empty() -> Self {
		Self {
			inode_id: FREE_INODE_ID,
			name: [0; DIR_ITEM_NAME_LENGTH],
		}
	}

	/// Whether this slot is free (Invariant B: the first byte of the name field is `0`).
	pub fn is_free(&self) -> bool {
		self.name[0] == 0
	}

	/// The item's name, with trailing NUL bytes stripped.
	pub fn name_str(&self) -> String {
		let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		String::from_utf8_lossy(&self.name[..end]).into_owned()
	}

	/// Whether this item's name equals `other`.
	pub fn name_is(&self, other: &str) -> bool {
		self.name_str() == other
	}

	/// Serializes this item to its packed 16-byte form.
	pub fn to_bytes(self) -> [u8; size_of::<DirectoryItem>()] {
		let mut out = [0u8; size_of::<DirectoryItem>()];
		out.copy_from_slice(unsafe { as_bytes(&self) });
		out
	}

	/// Deserializes an item from a packed 16-byte slice.
	pub fn from_bytes(bytes: &[u8]) -> Self {
		assert_eq!(bytes.len(), size_of::<DirectoryItem>());
		let mut item: Self = unsafe { std::mem::zeroed() };
		unsafe { as_bytes_mut(&mut item) }.copy_from_slice(bytes);
		item
	}
}

/// Number of [`DirectoryItem`] slots that fit in one cluster.
pub const ITEMS_PER_CLUSTER: usize = CLUSTER_SIZE / size_of::<DirectoryItem>();

/// Number of 32-bit cluster indices that fit in one cluster (same as [`LINKS_IN_INDIRECT`]).
pub const INDICES_PER_CLUSTER: usize = LINKS_IN_INDIRECT;

/// Reads an indirect-list cluster (an array of `LINKS_IN_INDIRECT` little-endian `i32`s) at
/// data-area index `idx`.
pub fn read_indirect_list(file: &mut File, sb: &Superblock, idx: i32) -> Result<[i32; LINKS_IN_INDIRECT]> {
	let mut buf = [0u8; CLUSTER_SIZE];
	file.seek(SeekFrom::Start(sb.cluster_offset(idx)))?;
	file.read_exact(&mut buf)?;
	let mut out = [0i32; LINKS_IN_INDIRECT];
	for (i, chunk) in buf.chunks_exact(4).enumerate() {
		out[i] = i32::from_le_bytes(chunk.try_into().unwrap());
	}
	Ok(out)
}

/// Writes an indirect-list cluster at data-area index `idx`.
pub fn write_indirect_list(
	file: &mut File,
	sb: &Superblock,
	idx: i32,
	list: &[i32; LINKS_IN_INDIRECT],
) -> Result<()> {
	let mut buf = [0u8; CLUSTER_SIZE];
	for (i, v) in list.iter().enumerate() {
		buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
	}
	file.seek(SeekFrom::Start(sb.cluster_offset(idx)))?;
	file.write_all(&buf)?;
	Ok(())
}

/// Reads a cluster of [`DirectoryItem`]s at data-area index `idx`.
pub fn read_item_cluster(
	file: &mut File,
	sb: &Superblock,
	idx: i32,
) -> Result<[DirectoryItem; ITEMS_PER_CLUSTER]> {
	let mut buf = [0u8; CLUSTER_SIZE];
	file.seek(SeekFrom::Start(sb.cluster_offset(idx)))?;
	file.read_exact(&mut buf)?;
	let mut out = [DirectoryItem::empty(); ITEMS_PER_CLUSTER];
	for (i, chunk) in buf.chunks_exact(size_of::<DirectoryItem>()).enumerate() {
		out[i] = DirectoryItem::from_bytes(chunk);
	}
	Ok(out)
}

/// Writes a cluster of [`DirectoryItem`]s at data-area index `idx`.
pub fn write_item_cluster(
	file: &mut File,
	sb: &Superblock,
	idx: i32,
	items: &[DirectoryItem; ITEMS_PER_CLUSTER],
) -> Result<()> {
	let mut buf = [0u8; CLUSTER_SIZE];
	for (i, item) in items.iter().enumerate() {
		buf[i * size_of::<DirectoryItem>()..(i + 1) * size_of::<DirectoryItem>()]
			.copy_from_slice(&item.to_bytes());
	}
	file.seek(SeekFrom::Start(sb.cluster_offset(idx)))?;
	file.write_all(&buf)?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn inode_record_size_is_stable() {
		// 4 + 1 + 1 + 4 + 5*4 + 2*4 = 38 bytes; pinned here so a field change is caught.
		assert_eq!(size_of::<Inode>(), 38);
	}

	#[test]
	fn directory_item_record_size_is_stable() {
		assert_eq!(size_of::<DirectoryItem>(), 16);
		assert_eq!(ITEMS_PER_CLUSTER, 64);
	}

	#[test]
	fn superblock_geometry_10mb() {
		let sb = Superblock::compute(10);
		assert_eq!({ sb.disk_size }, 10_000_000);
		assert_eq!({ sb.inode_capacity }, 10_000);
		assert_eq!(sb.inode_bitmap_offset as usize, size_of::<Superblock>());
		assert_eq!(
			{ sb.data_bitmap_offset },
			sb.inode_bitmap_offset + sb.inode_bitmap_size() as i32
		);
		assert_eq!(
			{ sb.inode_table_offset },
			sb.data_bitmap_offset + sb.data_bitmap_size() as i32
		);
		assert_eq!(
			{ sb.data_area_offset },
			sb.inode_table_offset + sb.inode_capacity * size_of::<Inode>() as i32
		);
		// Geometry must fit inside the disk.
		let used = sb.data_area_offset as i64 + sb.cluster_capacity as i64 * CLUSTER_SIZE as i64;
		assert!(used <= sb.disk_size as i64);
	}

	#[test]
	fn directory_item_free_slot_detection() {
		assert!(DirectoryItem::empty().is_free());
		assert!(!DirectoryItem::new("a", 0).is_free());
	}

	#[test]
	fn directory_item_name_round_trips() {
		let item = DirectoryItem::new("hello.txt", 3);
		let bytes = item.to_bytes();
		let back = DirectoryItem::from_bytes(&bytes);
		assert_eq!(back.name_str(), "hello.txt");
		assert_eq!({ back.inode_id }, 3);
	}

	#[test]
	fn name_too_long_is_rejected_by_fits() {
		assert!(DirectoryItem::fits("12345678901"));
		assert!(!DirectoryItem::fits("123456789012"));
	}
}
