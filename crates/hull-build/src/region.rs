// SPDX-License-Identifier: MIT OR Apache-2.0
//! The embedded asset-region codec.
//!
//! Layout, all integers little-endian `u32`, offsets relative to the
//! region start so the binary stays position-independent:
//!
//! ```text
//! magic "HULLIDX1"
//! count
//! count × (name_offset, name_len, data_offset, data_len)
//! name blob
//! data blob
//! ```

use crate::BuildError;
use crate::assets::Asset;

/// Magic prefix of an encoded region.
pub const REGION_MAGIC: &[u8; 8] = b"HULLIDX1";

/// Encode assets into a self-contained region.
#[must_use]
pub fn encode(assets: &[Asset]) -> Vec<u8> {
    let header_len = 8 + 4 + assets.len() * 16;
    let names_len: usize = assets.iter().map(|a| a.logical_name.len()).sum();

    let mut out = Vec::with_capacity(
        header_len + names_len + assets.iter().map(|a| a.bytes.len()).sum::<usize>(),
    );
    out.extend_from_slice(REGION_MAGIC);
    out.extend_from_slice(&u32::try_from(assets.len()).unwrap_or(u32::MAX).to_le_bytes());

    let mut name_offset = header_len;
    let mut data_offset = header_len + names_len;
    for asset in assets {
        for field in [
            name_offset,
            asset.logical_name.len(),
            data_offset,
            asset.bytes.len(),
        ] {
            out.extend_from_slice(&u32::try_from(field).unwrap_or(u32::MAX).to_le_bytes());
        }
        name_offset += asset.logical_name.len();
        data_offset += asset.bytes.len();
    }
    for asset in assets {
        out.extend_from_slice(asset.logical_name.as_bytes());
    }
    for asset in assets {
        out.extend_from_slice(&asset.bytes);
    }
    out
}

/// Decode a region back into its assets.
///
/// # Errors
///
/// [`BuildError::Layout`] for a bad magic, truncated index, or
/// out-of-range offsets.
pub fn decode(region: &[u8]) -> Result<Vec<Asset>, BuildError> {
    if region.len() < 12 || &region[..8] != REGION_MAGIC {
        return Err(BuildError::Layout("missing region magic".into()));
    }
    let count = read_u32(region, 8)? as usize;
    let mut assets = Vec::with_capacity(count);
    for i in 0..count {
        let record = 12 + i * 16;
        let name_offset = read_u32(region, record)? as usize;
        let name_len = read_u32(region, record + 4)? as usize;
        let data_offset = read_u32(region, record + 8)? as usize;
        let data_len = read_u32(region, record + 12)? as usize;

        let name_bytes = region
            .get(name_offset..name_offset + name_len)
            .ok_or_else(|| BuildError::Layout(format!("name range of entry {i} escapes region")))?;
        let data = region
            .get(data_offset..data_offset + data_len)
            .ok_or_else(|| BuildError::Layout(format!("data range of entry {i} escapes region")))?;
        let logical_name = std::str::from_utf8(name_bytes)
            .map_err(|_| BuildError::Layout(format!("entry {i} name is not UTF-8")))?
            .to_string();
        assets.push(Asset {
            logical_name,
            bytes: data.to_vec(),
        });
    }
    Ok(assets)
}

/// Find an embedded region appended to arbitrary binary bytes.
///
/// Scans for the last occurrence of the magic; the region runs to the end
/// of the binary.
#[must_use]
pub fn find_in_binary(binary: &[u8]) -> Option<&[u8]> {
    let pos = binary
        .windows(REGION_MAGIC.len())
        .rposition(|window| window == REGION_MAGIC)?;
    Some(&binary[pos..])
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, BuildError> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| BuildError::Layout("truncated region index".into()))?;
    Ok(u32::from_le_bytes(raw))
}
