//! graph6 decoding for the undirected simple graphs `geng` emits.
//!
//! A graph6 line is a size header followed by the upper triangle of the
//! adjacency matrix, column by column (`(0,1), (0,2), (1,2), (0,3), ...`),
//! packed six bits per byte, big end first, each byte offset by 63.

use petgraph::graphmap::UnGraphMap;
use thiserror::Error;

/// Largest vertex count the four-byte header form can carry.
pub const MAX_VERTICES: u32 = 258_047;

const OFFSET: u8 = 63;
const LONG_HEADER: u8 = 126;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Graph6Error {
    #[error("empty line")]
    Empty,
    #[error("byte {byte:#04x} at offset {offset} is outside the graph6 range")]
    BadByte { offset: usize, byte: u8 },
    #[error("header is truncated or uses the unsupported 8-byte form")]
    BadHeader,
    #[error("graph has {actual} vertices, expected {expected}")]
    WrongVertexCount { expected: u32, actual: u32 },
    #[error("payload is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

/// Vertex count and header length of a graph6 line.
pub fn header(line: &[u8]) -> Result<(u32, usize), Graph6Error> {
    let first = *line.first().ok_or(Graph6Error::Empty)?;
    check_byte(0, first)?;
    if first != LONG_HEADER {
        return Ok((u32::from(first - OFFSET), 1));
    }
    if line.len() < 4 || line[1] == LONG_HEADER {
        return Err(Graph6Error::BadHeader);
    }
    let mut n = 0u32;
    for (offset, &byte) in line.iter().enumerate().take(4).skip(1) {
        check_byte(offset, byte)?;
        n = (n << 6) | u32::from(byte - OFFSET);
    }
    Ok((n, 4))
}

/// Bytes needed to hold the upper triangle of an `n`-vertex adjacency matrix.
pub fn payload_len(n: u32) -> usize {
    let bits = u64::from(n) * u64::from(n.saturating_sub(1)) / 2;
    bits.div_ceil(6) as usize
}

/// Check that `line` is a well-formed graph6 string for exactly `expected` vertices.
pub fn validate(line: &[u8], expected: u32) -> Result<(), Graph6Error> {
    let (n, header_len) = header(line)?;
    if n != expected {
        return Err(Graph6Error::WrongVertexCount {
            expected,
            actual: n,
        });
    }
    let payload = &line[header_len..];
    let want = payload_len(n);
    if payload.len() != want {
        return Err(Graph6Error::WrongLength {
            expected: want,
            actual: payload.len(),
        });
    }
    for (i, &byte) in payload.iter().enumerate() {
        check_byte(header_len + i, byte)?;
    }
    Ok(())
}

/// Decode a graph6 line. Every vertex `0..n` is present in the result, isolated or not.
pub fn decode(line: &[u8]) -> Result<(u32, UnGraphMap<u32, ()>), Graph6Error> {
    let (n, header_len) = header(line)?;
    validate(line, n)?;

    let mut g = UnGraphMap::<u32, ()>::with_capacity(n as usize, 0);
    for v in 0..n {
        g.add_node(v);
    }

    let payload = &line[header_len..];
    let mut bit = 0usize;
    for v in 1..n {
        for u in 0..v {
            let byte = payload[bit / 6] - OFFSET;
            if (byte >> (5 - bit % 6)) & 1 == 1 {
                g.add_edge(u, v, ());
            }
            bit += 1;
        }
    }
    Ok((n, g))
}

fn check_byte(offset: usize, byte: u8) -> Result<(), Graph6Error> {
    if (OFFSET..=LONG_HEADER).contains(&byte) {
        Ok(())
    } else {
        Err(Graph6Error::BadByte { offset, byte })
    }
}
