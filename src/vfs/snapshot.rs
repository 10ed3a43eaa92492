//! Binary serialization of the node tree.
//!
//! The format is self-describing and deterministic: a magic byte and
//! a version byte, then a pre-order traversal of the tree. Per node:
//! tag byte, u32 name length + UTF-8 name (empty for the root), u32
//! mode, four u64 timestamps (atime, mtime, ctime, birthtime), then
//! the variant payload --- file: u64 byte length + bytes; dir: u32
//! child count + children in insertion order; symlink: u32 target
//! length + UTF-8 target. All integers are little-endian. Inodes are
//! not serialized; deserialization allocates fresh ones, so
//! serializing a deserialized tree reproduces the input bytes.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};

use crate::error::{ErrorKind, Result, RuntimeError};

use super::node::{Meta, Node};

/// First byte of every snapshot.
pub const MAGIC: u8 = 0xB7;
/// Current format version.
pub const VERSION: u8 = 1;

/// Node variant discriminants on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
enum NodeTag {
    File = 1,
    Dir = 2,
    Symlink = 3,
}

fn parse_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Parse, message).with_context("snapshot")
}

/// Serializes the tree rooted at `root` into snapshot bytes.
pub fn serialize(root: &Node) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(MAGIC);
    out.push(VERSION);
    write_node(&mut out, "", root).expect("writing to a Vec cannot fail");
    out
}

/// Reconstructs a tree from snapshot bytes. The top-level node must
/// be a directory (the root).
pub fn deserialize(bytes: &[u8]) -> Result<Node> {
    let mut src = Cursor::new(bytes);
    let magic = src.read_u8().map_err(|_| parse_error("snapshot is empty"))?;
    if magic != MAGIC {
        return Err(parse_error(format!("bad magic byte {magic:#04x}")));
    }
    let version = src.read_u8().map_err(|_| parse_error("snapshot truncated at version"))?;
    if version != VERSION {
        return Err(parse_error(format!("unsupported snapshot version {version}")));
    }
    let (name, node) = read_node(&mut src)?;
    if !name.is_empty() {
        return Err(parse_error("root node must have an empty name"));
    }
    if !node.is_dir() {
        return Err(parse_error("root node must be a directory"));
    }
    Ok(node)
}

fn write_node(dest: &mut dyn Write, name: &str, node: &Node) -> std::io::Result<()> {
    let tag = match node {
        Node::File(_) => NodeTag::File,
        Node::Dir(_) => NodeTag::Dir,
        Node::Symlink(_) => NodeTag::Symlink,
    };
    dest.write_u8(num_traits::ToPrimitive::to_u8(&tag).expect("tag fits in a byte"))?;
    write_string(dest, name)?;
    write_meta(dest, node.meta())?;
    match node {
        Node::File(file) => {
            dest.write_u64::<LittleEndian>(file.data.len() as u64)?;
            dest.write_all(&file.data)
        }
        Node::Dir(dir) => {
            dest.write_u32::<LittleEndian>(dir.children.len() as u32)?;
            for (child_name, child) in &dir.children {
                write_node(dest, child_name, child)?;
            }
            Ok(())
        }
        Node::Symlink(link) => write_string(dest, &link.target),
    }
}

fn write_string(dest: &mut dyn Write, value: &str) -> std::io::Result<()> {
    dest.write_u32::<LittleEndian>(value.len() as u32)?;
    dest.write_all(value.as_bytes())
}

fn write_meta(dest: &mut dyn Write, meta: &Meta) -> std::io::Result<()> {
    dest.write_u32::<LittleEndian>(meta.mode)?;
    dest.write_u64::<LittleEndian>(meta.atime)?;
    dest.write_u64::<LittleEndian>(meta.mtime)?;
    dest.write_u64::<LittleEndian>(meta.ctime)?;
    dest.write_u64::<LittleEndian>(meta.birthtime)
}

fn read_node(src: &mut impl Read) -> Result<(String, Node)> {
    let raw_tag = src.read_u8().map_err(|_| parse_error("snapshot truncated at node tag"))?;
    let tag: NodeTag = num_traits::FromPrimitive::from_u8(raw_tag)
        .ok_or_else(|| parse_error(format!("unknown node tag {raw_tag}")))?;
    let name = read_string(src, "node name")?;
    let (mode, times) = read_meta(src)?;
    let node = match tag {
        NodeTag::File => {
            let len = src
                .read_u64::<LittleEndian>()
                .map_err(|_| parse_error("snapshot truncated at file length"))?;
            let mut data = vec![0u8; len as usize];
            src.read_exact(&mut data).map_err(|_| parse_error("snapshot truncated in file data"))?;
            let mut node = Node::file(data);
            apply_meta(&mut node, mode, times);
            node
        }
        NodeTag::Dir => {
            let count = src
                .read_u32::<LittleEndian>()
                .map_err(|_| parse_error("snapshot truncated at child count"))?;
            let mut node = Node::dir();
            apply_meta(&mut node, mode, times);
            for _ in 0..count {
                let (child_name, child) = read_node(src)?;
                if child_name.is_empty() || child_name.contains('/') {
                    return Err(parse_error(format!("illegal child name {child_name:?}")));
                }
                match &mut node {
                    Node::Dir(dir) => {
                        if dir.children.insert(child_name.clone(), child).is_some() {
                            return Err(parse_error(format!("duplicate child name {child_name:?}")));
                        }
                    }
                    _ => unreachable!("tag was Dir"),
                }
            }
            node
        }
        NodeTag::Symlink => {
            let target = read_string(src, "symlink target")?;
            let mut node = Node::symlink(target);
            apply_meta(&mut node, mode, times);
            node
        }
    };
    Ok((name, node))
}

fn read_string(src: &mut impl Read, what: &str) -> Result<String> {
    let len = src
        .read_u32::<LittleEndian>()
        .map_err(|_| parse_error(format!("snapshot truncated at {what} length")))?;
    let mut buf = vec![0u8; len as usize];
    src.read_exact(&mut buf).map_err(|_| parse_error(format!("snapshot truncated in {what}")))?;
    String::from_utf8(buf).map_err(|_| parse_error(format!("{what} is not valid UTF-8")))
}

fn read_meta(src: &mut impl Read) -> Result<(u32, [u64; 4])> {
    let mode =
        src.read_u32::<LittleEndian>().map_err(|_| parse_error("snapshot truncated at mode"))?;
    let mut times = [0u64; 4];
    for slot in &mut times {
        *slot = src
            .read_u64::<LittleEndian>()
            .map_err(|_| parse_error("snapshot truncated at timestamps"))?;
    }
    Ok((mode, times))
}

fn apply_meta(node: &mut Node, mode: u32, times: [u64; 4]) {
    let meta = node.meta_mut();
    meta.mode = mode;
    meta.atime = times[0];
    meta.mtime = times[1];
    meta.ctime = times[2];
    meta.birthtime = times[3];
}
