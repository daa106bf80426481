//! Cluster allocation table (CAT) bitmap management.
//!
//! Grounded on `mdos_diskio.c` (`mdos_alloc_space`) and `mdos_dir.c`'s
//! cluster-freeing loop in `mdos_unlink`.

use crate::error::{MdosError, Result};
use crate::rib::Rib;
use crate::sector::{Mount, SECTOR_CAT, SECTOR_SIZE};

/// Total clusters trackable by one CAT sector's bitmap (128 bytes * 8 bits).
pub const TOTAL_CLUSTERS: usize = SECTOR_SIZE * 8;
/// Maximum clusters describable by a single SDW's 5-bit count field.
const MAX_SEGMENT_CLUSTERS: u16 = 32;
/// Usable SDW slots, one of the 57 always reserved for the end marker.
const MAX_SEGMENTS: usize = 56;

fn bit_set(cat: &[u8; SECTOR_SIZE], cluster: usize) -> bool {
    cat[cluster >> 3] & (1 << (7 - (cluster & 7))) != 0
}

fn set_bit(cat: &mut [u8; SECTOR_SIZE], cluster: usize, value: bool) {
    let mask = 1 << (7 - (cluster & 7));
    if value {
        cat[cluster >> 3] |= mask;
    } else {
        cat[cluster >> 3] &= !mask;
    }
}

/// Allocates enough clusters to hold `sector_count` sectors (including the
/// RIB sector itself), filling in the RIB's SDW chain in place.
///
/// Each segment re-scans the CAT from cluster 0, exactly like
/// `mdos_alloc_space`'s outer `for (x = 0; x < MDOS_SECTOR_SIZE * 8; ++x)`
/// loop: a free run only counts toward the segment if it is still being
/// accumulated when it reaches `req_remaining` or the 32-cluster cap. A run
/// that is interrupted by a busy cluster first is discarded in full — the
/// scan resets `start`/`found` and keeps going rather than keeping the
/// partial run — so short free gaps can be permanently skipped over. This
/// is the reference's literal behavior, preserved here for byte-compatible
/// allocation output.
pub fn alloc_segments(mount: &mut Mount, rib: &mut Rib, sector_count: u32) -> Result<()> {
    let clusters_needed = sector_count.div_ceil(crate::sector::CLUSTER_SECTORS as u32);
    if clusters_needed == 0 {
        rib.append_end_marker(0, 0)?;
        return Ok(());
    }

    let mut cat = mount.read_sector(SECTOR_CAT)?;
    let mut remaining = clusters_needed;
    let mut seg_index = 0usize;

    while remaining > 0 {
        if seg_index >= MAX_SEGMENTS {
            return Err(MdosError::NoSpace);
        }

        let mut start: Option<usize> = None;
        let mut found: u16 = 0;

        for cluster in 0..TOTAL_CLUSTERS {
            if bit_set(&cat, cluster) {
                start = None;
                found = 0;
                continue;
            }
            if start.is_none() {
                start = Some(cluster);
            }
            found += 1;
            if found as u32 >= remaining || found >= MAX_SEGMENT_CLUSTERS {
                break;
            }
        }

        if found == 0 {
            return Err(MdosError::NoSpace);
        }

        let run_start = start.unwrap() as u16;
        for c in run_start..run_start + found {
            set_bit(&mut cat, c as usize, true);
        }
        rib.append_segment(seg_index, run_start, found)?;
        remaining -= found as u32;
        seg_index += 1;
    }

    rib.append_end_marker(seg_index, (sector_count - 1) as u16)?;

    mount.write_sector(SECTOR_CAT, &cat)
}

/// Clears every cluster bit referenced by `rib`'s SDW chain.
pub fn free_chain(mount: &mut Mount, rib: &Rib) -> Result<()> {
    let mut cat = mount.read_sector(SECTOR_CAT)?;
    rib.free_chain(&mut cat);
    mount.write_sector(SECTOR_CAT, &cat)
}

/// Bytes of unallocated space remaining on the mount, per spec §6's
/// `free_space` operation.
pub fn free_space(mount: &mut Mount) -> Result<u64> {
    let cat = mount.read_sector(SECTOR_CAT)?;
    let mut free_clusters = 0u64;
    for cluster in 0..TOTAL_CLUSTERS {
        if !bit_set(&cat, cluster) {
            free_clusters += 1;
        }
    }
    Ok(free_clusters * crate::sector::CLUSTER_SECTORS as u64 * SECTOR_SIZE as u64)
}
