//! Per-node metadata containers.
//!
//! Payload types (signs, chests, furnaces, ...) live outside the engine. The
//! map only stores them by position, routes `step` calls and carries their
//! serialized bytes to and from disk.

use std::collections::BTreeMap;
use std::fmt::Debug;

use super::codec::{ByteReader, ByteWriter};
use super::position::{MAP_BLOCKSIZE, NodePos};
use crate::error::MapError;

/// A metadata payload attached to one node.
pub trait NodeMetadata: Debug + Send + Sync {
    /// Type tag written in front of the payload on disk.
    fn kind(&self) -> u16;

    fn serialize_body(&self, out: &mut Vec<u8>);

    /// Advances time-dependent state. Returns true if the payload changed.
    fn step(&mut self, _dtime: f32) -> bool {
        false
    }

    fn info_text(&self) -> String {
        String::new()
    }
}

/// Payload read back from disk. Kept as bytes until someone who knows the
/// type replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNodeMetadata {
    pub kind: u16,
    pub body: Vec<u8>,
}

impl NodeMetadata for RawNodeMetadata {
    fn kind(&self) -> u16 {
        self.kind
    }

    fn serialize_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.body);
    }
}

/// Metadata of all nodes in one block, keyed by block-local position.
#[derive(Debug, Default)]
pub struct NodeMetadataList {
    entries: BTreeMap<u16, Box<dyn NodeMetadata>>,
}

fn local_key(p: NodePos) -> u16 {
    let s = MAP_BLOCKSIZE;
    (p.z * s * s + p.y * s + p.x) as u16
}

fn key_to_local(key: u16) -> NodePos {
    let s = MAP_BLOCKSIZE;
    let k = key as i32;
    NodePos::new(k % s, (k / s) % s, k / (s * s))
}

impl NodeMetadataList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, local: NodePos) -> Option<&dyn NodeMetadata> {
        self.entries.get(&local_key(local)).map(|m| m.as_ref())
    }

    pub fn get_mut(&mut self, local: NodePos) -> Option<&mut (dyn NodeMetadata + 'static)> {
        self.entries.get_mut(&local_key(local)).map(|m| m.as_mut())
    }

    pub fn set(&mut self, local: NodePos, meta: Box<dyn NodeMetadata>) {
        self.entries.insert(local_key(local), meta);
    }

    pub fn remove(&mut self, local: NodePos) -> Option<Box<dyn NodeMetadata>> {
        self.entries.remove(&local_key(local))
    }

    /// Steps every payload; true if any of them changed.
    pub fn step(&mut self, dtime: f32) -> bool {
        let mut changed = false;
        for meta in self.entries.values_mut() {
            changed |= meta.step(dtime);
        }
        changed
    }

    pub fn positions(&self) -> impl Iterator<Item = NodePos> + '_ {
        self.entries.keys().map(|&k| key_to_local(k))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn serialize(&self, w: &mut ByteWriter) {
        w.u16(self.entries.len() as u16);
        let mut body = Vec::new();
        for (&key, meta) in &self.entries {
            body.clear();
            meta.serialize_body(&mut body);
            w.u16(key);
            w.u16(meta.kind());
            w.bytes32(&body);
        }
    }

    pub(crate) fn deserialize(r: &mut ByteReader<'_>) -> Result<Self, MapError> {
        let count = r.u16()?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = r.u16()?;
            if key as i32 >= MAP_BLOCKSIZE * MAP_BLOCKSIZE * MAP_BLOCKSIZE {
                return Err(MapError::corrupt(format!("metadata key {key} out of range")));
            }
            let kind = r.u16()?;
            let body = r.bytes32()?.to_vec();
            entries.insert(key, Box::new(RawNodeMetadata { kind, body }) as Box<dyn NodeMetadata>);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Furnace {
        fuel: u8,
    }

    impl NodeMetadata for Furnace {
        fn kind(&self) -> u16 {
            3
        }

        fn serialize_body(&self, out: &mut Vec<u8>) {
            out.push(self.fuel);
        }

        fn step(&mut self, _dtime: f32) -> bool {
            if self.fuel == 0 {
                return false;
            }
            self.fuel -= 1;
            true
        }
    }

    #[test]
    fn step_reports_changes() {
        let mut list = NodeMetadataList::new();
        list.set(NodePos::new(1, 2, 3), Box::new(Furnace { fuel: 1 }));
        assert!(list.step(1.0));
        assert!(!list.step(1.0));
    }

    #[test]
    fn serialized_payloads_come_back_as_raw_bytes() {
        let mut list = NodeMetadataList::new();
        list.set(NodePos::new(15, 0, 7), Box::new(Furnace { fuel: 9 }));

        let mut w = ByteWriter::new();
        list.serialize(&mut w);
        let bytes = w.into_inner();
        let back = NodeMetadataList::deserialize(&mut ByteReader::new(&bytes)).unwrap();

        let positions: Vec<_> = back.positions().collect();
        assert_eq!(positions, vec![NodePos::new(15, 0, 7)]);
        let meta = back.get(NodePos::new(15, 0, 7)).unwrap();
        assert_eq!(meta.kind(), 3);
        let mut body = Vec::new();
        meta.serialize_body(&mut body);
        assert_eq!(body, vec![9]);
    }
}
