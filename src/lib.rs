//! A primitive Unix-style inode filesystem stored in a single backing file: fixed-size
//! superblock, inode and data bitmaps, an inode table and a cluster-addressed data area,
//! wrapped in a [`fs::Filesystem`] facade and an interactive [`shell`].

pub mod bitmap;
pub mod data_service;
pub mod error;
pub mod fs;
pub mod inode_service;
pub mod path;
pub mod records;
pub mod shell;
