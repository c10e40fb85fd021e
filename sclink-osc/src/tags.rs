//! Byte-level pass over the type-tag strings of an encoded packet.
//!
//! The `rosc` decoder rejects a packet outright on a tag it does not know and
//! has no symbol (`S`) tag. This pass runs before decoding and rewrites the tag
//! strings in place so the rest of the packet still decodes, recording what
//! was changed so the decoded arguments can be corrected afterwards.

use log::warn;

use crate::error::CodecError;

const BUNDLE_TAG: &[u8] = b"#bundle\0";
const BUNDLE_HEADER_LEN: usize = 16;
const KNOWN_TAGS: &[u8] = b"ihfdsScTFNItrmb[]";
/// Bundles nested deeper than this are rejected before anything recurses.
const MAX_BUNDLE_DEPTH: usize = 64;

/// What the tag pass changed for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TagFixup {
    /// Argument indices that were tagged `S` on the wire.
    pub symbols: Vec<usize>,
    /// Number of flattened arguments to keep after an unknown tag.
    pub keep: Option<usize>,
}

/// Calls `visit` with the address and mutable type-tag bytes (without the
/// leading comma) of every message in `buf`, depth-first.
pub(crate) fn for_each_message<F>(buf: &mut [u8], visit: &mut F) -> Result<(), CodecError>
where
    F: FnMut(&str, &mut [u8]) -> Result<(), CodecError>,
{
    walk(buf, 0, visit)
}

fn walk<F>(buf: &mut [u8], depth: usize, visit: &mut F) -> Result<(), CodecError>
where
    F: FnMut(&str, &mut [u8]) -> Result<(), CodecError>,
{
    if buf.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(CodecError::Malformed("bundle nesting too deep"));
        }
        if buf.len() < BUNDLE_HEADER_LEN {
            return Err(CodecError::Malformed("truncated bundle header"));
        }
        let mut pos = BUNDLE_HEADER_LEN;
        while pos < buf.len() {
            let size = read_size(buf, pos)?;
            let start = pos + 4;
            let end = start
                .checked_add(size)
                .filter(|&end| end <= buf.len())
                .ok_or(CodecError::Malformed("bundle element overruns packet"))?;
            walk(&mut buf[start..end], depth + 1, visit)?;
            pos = end;
        }
        return Ok(());
    }

    let addr_len = padded_string_len(buf).ok_or(CodecError::Malformed("unterminated address"))?;
    let (head, rest) = buf.split_at_mut(addr_len);
    let addr = String::from_utf8_lossy(until_nul(head)).into_owned();
    if rest.first() != Some(&b',') {
        return visit(&addr, &mut []);
    }
    let tag_end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::Malformed("unterminated type tag string"))?;
    visit(&addr, &mut rest[1..tag_end])
}

/// Rewrites `S` to `s` and neutralizes the first unknown tag.
///
/// An unknown tag at argument index `i` with `d` arrays still open becomes
/// `d` closing brackets followed by `N` for every remaining position. The
/// message keeps its first `i + d` flattened arguments.
pub(crate) fn normalize(addr: &str, tags: &mut [u8]) -> Result<TagFixup, CodecError> {
    let mut fixup = TagFixup::default();
    let mut depth = 0usize;
    for i in 0..tags.len() {
        match tags[i] {
            b'S' => {
                tags[i] = b's';
                fixup.symbols.push(i);
            }
            b'[' => depth += 1,
            b']' => depth = depth.saturating_sub(1),
            tag if KNOWN_TAGS.contains(&tag) => {}
            tag => {
                if tags.len() - i < depth {
                    return Err(CodecError::UnrecoverableTag {
                        addr: addr.to_string(),
                        tag: tag as char,
                    });
                }
                warn!(
                    target: "osc::codec",
                    "{addr}: unknown type tag '{}', dropping {} trailing argument(s)",
                    tag as char,
                    tags.len() - i
                );
                for slot in &mut tags[i..i + depth] {
                    *slot = b']';
                }
                for slot in &mut tags[i + depth..] {
                    *slot = b'N';
                }
                fixup.keep = Some(i + depth);
                break;
            }
        }
    }
    Ok(fixup)
}

fn read_size(buf: &[u8], pos: usize) -> Result<usize, CodecError> {
    let bytes = buf
        .get(pos..pos + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .ok_or(CodecError::Malformed("truncated bundle element size"))?;
    Ok(u32::from_be_bytes(bytes) as usize)
}

/// Length of the NUL-terminated string at the start of `buf`, padded to 4.
fn padded_string_len(buf: &[u8]) -> Option<usize> {
    let nul = buf.iter().position(|&b| b == 0)?;
    let padded = (nul + 4) & !3;
    (padded <= buf.len()).then_some(padded)
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}
