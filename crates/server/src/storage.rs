//! Block persistence.
//!
//! Each block is stored on its own under a key derived from its position:
//! `sectors/<xxxx><zzzz>/<yyyy>` with the coordinates as 16-bit hex. The
//! payload is the block's disk serialization, zlib-compressed. Writes go to
//! a temporary file that is renamed over the target, so a block file is
//! either the old or the new version, never a mix.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use voxmap_engine::MapError;
use voxmap_engine::world::{BlockPos, MapBlock, SectorPos};

const META_FILE: &str = "map_meta.json";

/// Map-wide settings stored next to the blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapMeta {
    pub seed: u64,
}

/// Raw byte storage for blocks and the map meta.
pub trait BlockStorage: Send {
    /// The stored bytes of `pos`, or `None` if nothing was ever saved.
    fn read(&self, pos: BlockPos) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the stored bytes of `pos` as a whole.
    fn write(&self, pos: BlockPos, data: &[u8]) -> io::Result<()>;

    fn read_meta(&self) -> io::Result<Option<Vec<u8>>>;

    fn write_meta(&self, data: &[u8]) -> io::Result<()>;
}

/// What a storage lookup produced.
#[derive(Debug)]
pub enum LoadOutcome {
    Absent,
    /// Something was stored but could not be read back.
    Corrupt(String),
    Present(MapBlock),
}

/// Serializes and compresses `block`. Dummies cannot be encoded.
pub fn encode_block(block: &MapBlock) -> Result<Vec<u8>, MapError> {
    let raw = block.serialize_for_disk()?;
    let mut enc = ZlibEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::fast());
    enc.write_all(&raw)?;
    Ok(enc.finish()?)
}

pub fn decode_block(pos: BlockPos, data: &[u8]) -> Result<MapBlock, MapError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(|e| MapError::corrupt(format!("zlib: {e}")))?;
    MapBlock::deserialize_from_disk(pos, &raw)
}

/// Reads and decodes `pos`. Read errors are reported as corruption: the
/// caller regenerates either way.
pub fn load_block(storage: &dyn BlockStorage, pos: BlockPos) -> LoadOutcome {
    match storage.read(pos) {
        Ok(None) => LoadOutcome::Absent,
        Ok(Some(data)) => match decode_block(pos, &data) {
            Ok(block) => LoadOutcome::Present(block),
            Err(e) => LoadOutcome::Corrupt(e.to_string()),
        },
        Err(e) => LoadOutcome::Corrupt(format!("read failed: {e}")),
    }
}

// ── On-disk storage ─────────────────────────────────────────────────

/// Block files under a world directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sector_dir(&self, p: SectorPos) -> PathBuf {
        self.root
            .join("sectors")
            .join(format!("{:04x}{:04x}", p.x as u16, p.z as u16))
    }

    pub fn block_path(&self, p: BlockPos) -> PathBuf {
        self.sector_dir(p.sector()).join(format!("{:04x}", p.y as u16))
    }

    fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)
    }

    fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl BlockStorage for FileStorage {
    fn read(&self, pos: BlockPos) -> io::Result<Option<Vec<u8>>> {
        Self::read_optional(&self.block_path(pos))
    }

    fn write(&self, pos: BlockPos, data: &[u8]) -> io::Result<()> {
        Self::write_atomic(&self.block_path(pos), data)
    }

    fn read_meta(&self) -> io::Result<Option<Vec<u8>>> {
        Self::read_optional(&self.root.join(META_FILE))
    }

    fn write_meta(&self, data: &[u8]) -> io::Result<()> {
        Self::write_atomic(&self.root.join(META_FILE), data)
    }
}

// ── In-memory storage ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    blocks: Mutex<HashMap<BlockPos, Vec<u8>>>,
    meta: Mutex<Option<Vec<u8>>>,
    fail_writes: AtomicBool,
}

/// Storage kept in memory. Clones share the same contents, so a test can
/// hand one clone to a map and inspect another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.inner.blocks.lock().contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.inner.blocks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrites the stored bytes directly, bypassing failure injection.
    pub fn put_raw(&self, pos: BlockPos, data: Vec<u8>) {
        self.inner.blocks.lock().insert(pos, data);
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.inner.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::other("write failure injected"));
        }
        Ok(())
    }
}

impl BlockStorage for MemoryStorage {
    fn read(&self, pos: BlockPos) -> io::Result<Option<Vec<u8>>> {
        Ok(self.inner.blocks.lock().get(&pos).cloned())
    }

    fn write(&self, pos: BlockPos, data: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        self.inner.blocks.lock().insert(pos, data.to_vec());
        Ok(())
    }

    fn read_meta(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.inner.meta.lock().clone())
    }

    fn write_meta(&self, data: &[u8]) -> io::Result<()> {
        self.check_writable()?;
        *self.inner.meta.lock() = Some(data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxmap_engine::world::node::content;
    use voxmap_engine::world::{MapNode, NodePos};

    fn sample_block(pos: BlockPos) -> MapBlock {
        let mut block = MapBlock::filled(pos, MapNode::new(content::STONE));
        block.set_node(NodePos::new(1, 2, 3), MapNode::new(content::TORCH)).unwrap();
        block
    }

    #[test]
    fn block_paths_use_hex_coordinates() {
        let storage = FileStorage::new("/w");
        assert_eq!(
            storage.block_path(BlockPos::new(1, -1, 255)),
            PathBuf::from("/w/sectors/000100ff/ffff")
        );
    }

    #[test]
    fn file_storage_round_trips_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let pos = BlockPos::new(-3, 2, 7);

        assert!(matches!(load_block(&storage, pos), LoadOutcome::Absent));
        storage.write(pos, &encode_block(&sample_block(pos)).unwrap()).unwrap();

        let LoadOutcome::Present(block) = load_block(&storage, pos) else {
            panic!("block not loaded back");
        };
        assert_eq!(block.pos(), pos);
        assert_eq!(block.get_node(NodePos::new(1, 2, 3)).unwrap().content, content::TORCH);
        assert!(!storage.block_path(pos).with_extension("tmp").exists());
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let storage = MemoryStorage::new();
        let pos = BlockPos::new(0, 0, 0);
        storage.put_raw(pos, b"definitely not zlib".to_vec());
        assert!(matches!(load_block(&storage, pos), LoadOutcome::Corrupt(_)));

        let mut data = encode_block(&sample_block(pos)).unwrap();
        data.truncate(data.len() / 2);
        storage.put_raw(pos, data);
        assert!(matches!(load_block(&storage, pos), LoadOutcome::Corrupt(_)));
    }

    #[test]
    fn dummies_are_not_encoded() {
        assert!(encode_block(&MapBlock::new_dummy(BlockPos::new(0, 0, 0))).is_err());
    }

    #[test]
    fn injected_write_failures_leave_contents_alone() {
        let storage = MemoryStorage::new();
        let pos = BlockPos::new(0, 0, 0);
        storage.set_fail_writes(true);
        assert!(storage.write(pos, b"x").is_err());
        assert!(storage.is_empty());
        storage.set_fail_writes(false);
        storage.write(pos, b"x").unwrap();
        assert!(storage.contains(pos));
    }
}
