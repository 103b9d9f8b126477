//! Allocating, persisting and loading [`Inode`] records through the inode bitmap.

use std::fs::File;

use crate::bitmap::Bitmap;
use crate::error::{Error, Result};
use crate::records::{Inode, Superblock};

/// Allocates, loads and frees inodes against the inode bitmap and inode table.
pub struct InodeService<'a> {
	file: &'a mut File,
	sb: &'a Superblock,
	bitmap: &'a mut Bitmap,
}

impl<'a> InodeService<'a> {
	/// Builds a service bound to the given file, superblock and (mutable, in-memory) bitmap.
	pub fn new(file: &'a mut File, sb: &'a Superblock, bitmap: &'a mut Bitmap) -> Self {
		Self { file, sb, bitmap }
	}

	/// Allocates a free inode id from the bitmap, without persisting anything.
	///
	/// Fails with [`Error::NoFreeInode`] if the bitmap is full.
	pub fn alloc_id(&self) -> Result<i32> {
		self.bitmap
			.first_free()
			.map(|i| i as i32)
			.map_err(|_| Error::NoFreeInode)
	}

	/// Allocates an id and builds a new, unsaved inode of the given kind and size.
	pub fn create(&self, is_dir: bool, size: u32) -> Result<Inode> {
		let id = self.alloc_id()?;
		Ok(Inode::new(id, is_dir, size))
	}

	/// Persists `inode` at its table slot and marks its id allocated in the bitmap.
	pub fn save(&mut self, inode: &Inode) -> Result<()> {
		inode.save(self.file, self.sb)?;
		self.bitmap.set(inode.id as usize);
		self.bitmap.save(self.file, self.sb.inode_bitmap_offset as u64)?;
		Ok(())
	}

	/// Loads the inode at table slot `id`.
	///
	/// Fails with [`Error::NotFound`] if the loaded record's id does not match `id` (a free
	/// or corrupted slot).
	pub fn load(&mut self, id: i32) -> Result<Inode> {
		let inode = Inode::load(self.file, self.sb, id)?;
		if inode.id != id {
			return Err(Error::NotFound);
		}
		Ok(inode)
	}

	/// Frees `inode`'s table slot (zeroing the record) and clears its bitmap bit.
	pub fn remove(&mut self, inode: &Inode) -> Result<()> {
		let mut blank = Inode::free_slot();
		blank.id = inode.id;
		blank.save(self.file, self.sb)?;
		self.bitmap.clear(inode.id as usize);
		self.bitmap.save(self.file, self.sb.inode_bitmap_offset as u64)?;
		Ok(())
	}

	/// Loads the root inode (id `0`).
	pub fn load_root(&mut self) -> Result<Inode> {
		self.load(0)
	}

	/// Enumerates every allocated inode, in ascending id order.
	pub fn all_inodes(&mut self) -> Result<Vec<Inode>> {
		let mut out = Vec::new();
		for id in 0..self.sb.inode_capacity {
			if self.bitmap.is_set(id as usize) {
				out.push(self.load(id)?);
			}
		}
		Ok(out)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Seek;
	use std::io::SeekFrom;
	use std::io::Write;

	fn scratch_file(sb: &Superblock) -> File {
		let mut f = tempfile().unwrap();
		f.set_len(sb.data_area_offset as u64).unwrap();
		f
	}

	// A tiny stand-in for `tempfile::tempfile` (not a dependency of this crate): an unlinked
	// anonymous file, good enough to back a `File` for the duration of one test.
	fn tempfile() -> std::io::Result<File> {
		let path = std::env::temp_dir().join(format!(
			"pfs-inode-service-test-{}-{:?}",
			std::process::id(),
			std::thread::current().id()
		));
		let f = File::options()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(&path)?;
		std::fs::remove_file(&path)?;
		Ok(f)
	}

	#[test]
	fn create_save_load_round_trip() {
		let sb = Superblock::compute(10);
		let mut file = scratch_file(&sb);
		let mut bitmap = Bitmap::new(sb.inode_bitmap_size());

		let inode = {
			let svc = InodeService::new(&mut file, &sb, &mut bitmap);
			svc.create(true, 0).unwrap()
		};
		assert_eq!({ inode.id }, 0);

		{
			let mut svc = InodeService::new(&mut file, &sb, &mut bitmap);
			svc.save(&inode).unwrap();
		}
		assert!(bitmap.is_set(0));

		let loaded = {
			let mut svc = InodeService::new(&mut file, &sb, &mut bitmap);
			svc.load(0).unwrap()
		};
		assert_eq!({ loaded.id }, 0);
		assert!(loaded.is_directory());
	}

	#[test]
	fn remove_frees_bitmap_bit() {
		let sb = Superblock::compute(10);
		let mut file = scratch_file(&sb);
		let mut bitmap = Bitmap::new(sb.inode_bitmap_size());

		let inode = Inode::new(0, false, 0);
		{
			let mut svc = InodeService::new(&mut file, &sb, &mut bitmap);
			svc.save(&inode).unwrap();
			svc.remove(&inode).unwrap();
		}
		assert!(!bitmap.is_set(0));
	}

	#[test]
	fn load_mismatched_id_is_not_found() {
		let sb = Superblock::compute(10);
		let mut file = scratch_file(&sb);
		// Write zero bytes (id == FREE_INODE_ID == -1) at slot 3, then try to load id 3.
		file.seek(SeekFrom::Start(sb.inode_offset(3))).unwrap();
		file.write_all(&[0u8; 38]).unwrap();

		let mut bitmap = Bitmap::new(sb.inode_bitmap_size());
		let mut svc = InodeService::new(&mut file, &sb, &mut bitmap);
		assert!(matches!(svc.load(3), Err(Error::NotFound)));
	}
}
