//! Directory service: filename normalization, lookup, insertion, and
//! enumeration over the 20-sector directory region.
//!
//! Grounded on `mdos_utils.c` (`mdos_normalize_filename`, `mdos_find_file`,
//! `mdos_write_directory_entry`, `mdos_hash_filename`) and `mdos_dir.c`
//! (`mdos_readdir`).

use log::warn;

use crate::error::{MdosError, Result};
use crate::rib::FileType;
use crate::sector::{Mount, DIRENTS_PER_SECTOR, DIRENT_SIZE, SECTOR_DIR, SECTOR_SIZE};
use crate::sector::DIR_REGION_SECTORS;

/// One decoded directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Normalized `NAME.EXT` (or `NAME`), lowercased.
    pub name: String,
    pub file_type: FileType,
    pub attributes: u8,
    pub rib_sector: u32,
}

/// Uppercases and validates a user-supplied filename into MDOS `NAME.EXT`
/// form (≤8 alnum name chars, optional `.` plus ≤2 alnum extension chars).
pub fn normalize(input: &str) -> Result<String> {
    let ext_pos = input.rfind('.');
    let (name_part, ext_part) = match ext_pos {
        Some(pos) => (&input[..pos], &input[pos + 1..]),
        None => (input, ""),
    };

    if name_part.is_empty() || name_part.len() > 8 || !name_part.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MdosError::Invalid);
    }
    if ext_part.len() > 2 || !ext_part.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(MdosError::Invalid);
    }

    let mut out = name_part.to_ascii_uppercase();
    if !ext_part.is_empty() {
        out.push('.');
        out.push_str(&ext_part.to_ascii_uppercase());
    }
    Ok(out)
}

fn raw_name_from_bytes(name: &[u8; 8], suffix: &[u8; 2]) -> String {
    let mut out = String::new();
    for &b in name {
        if b != b' ' {
            out.push((b as char).to_ascii_lowercase());
        }
    }
    out.push('.');
    for &b in suffix {
        if b != b' ' {
            out.push((b as char).to_ascii_lowercase());
        }
    }
    out
}

fn entry_slot(buf: &[u8; SECTOR_SIZE], slot: usize) -> &[u8] {
    &buf[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE]
}

fn entry_slot_mut(buf: &mut [u8; SECTOR_SIZE], slot: usize) -> &mut [u8] {
    &mut buf[slot * DIRENT_SIZE..(slot + 1) * DIRENT_SIZE]
}

/// Locates `filename`'s directory entry and returns its RIB sector and type.
/// When `delete_entry` is set, the slot is tombstoned (`name[0] = name[1] =
/// 0xFF`) before returning, matching `mdos_find_file`'s combined
/// find-and-delete behavior.
pub fn find(mount: &mut Mount, filename: &str, delete_entry: bool) -> Result<(u32, FileType)> {
    let normalized = normalize(filename)?;

    for sect in SECTOR_DIR..SECTOR_DIR + DIR_REGION_SECTORS {
        let mut buf = mount.read_sector(sect)?;
        for slot in 0..DIRENTS_PER_SECTOR {
            let entry = entry_slot(&buf, slot);
            if entry[0] == 0 || entry[0] == 0xFF {
                continue;
            }
            let name: [u8; 8] = entry[0..8].try_into().unwrap();
            let suffix: [u8; 2] = entry[8..10].try_into().unwrap();
            let built = raw_name_from_bytes(&name, &suffix).to_ascii_uppercase();
            if built == normalized {
                let rib_sector = ((entry[10] as u32) << 8) | entry[11] as u32;
                let file_type = FileType::from_code(entry[12]);
                if delete_entry {
                    let slot_mut = entry_slot_mut(&mut buf, slot);
                    slot_mut[0] = 0xFF;
                    slot_mut[1] = 0xFF;
                    mount.write_sector(sect, &buf)?;
                }
                return Ok((rib_sector, file_type));
            }
        }
    }
    Err(MdosError::NotFound)
}

/// Like `find`, but returns the full directory entry including the raw
/// attribute byte. Grounded on `mdos_stat`'s entry re-scan.
pub fn find_entry(mount: &mut Mount, filename: &str) -> Result<DirEntry> {
    let normalized = normalize(filename)?;

    for sect in SECTOR_DIR..SECTOR_DIR + DIR_REGION_SECTORS {
        let buf = mount.read_sector(sect)?;
        for slot in 0..DIRENTS_PER_SECTOR {
            let entry = entry_slot(&buf, slot);
            if entry[0] == 0 || entry[0] == 0xFF {
                continue;
            }
            let name: [u8; 8] = entry[0..8].try_into().unwrap();
            let suffix: [u8; 2] = entry[8..10].try_into().unwrap();
            let built = raw_name_from_bytes(&name, &suffix);
            if built.to_ascii_uppercase() == normalized {
                return Ok(DirEntry {
                    name: built,
                    file_type: FileType::from_code(entry[12]),
                    attributes: entry[12],
                    rib_sector: ((entry[10] as u32) << 8) | entry[11] as u32,
                });
            }
        }
    }
    Err(MdosError::NotFound)
}

/// Writes a new directory entry into the first empty or tombstoned slot.
/// Grounded on `mdos_write_directory_entry`.
pub fn insert(mount: &mut Mount, filename: &str, rib_sector: u32, file_type: FileType) -> Result<()> {
    let normalized = normalize(filename)?;
    let (name_part, ext_part) = match normalized.find('.') {
        Some(pos) => (&normalized[..pos], &normalized[pos + 1..]),
        None => (normalized.as_str(), ""),
    };

    let mut entry = [0u8; DIRENT_SIZE];
    entry[0..8].copy_from_slice(b"        ");
    for (i, b) in name_part.bytes().enumerate() {
        entry[i] = b;
    }
    entry[8..10].copy_from_slice(b"  ");
    for (i, b) in ext_part.bytes().enumerate() {
        entry[8 + i] = b;
    }
    entry[10] = (rib_sector >> 8) as u8;
    entry[11] = (rib_sector & 0xFF) as u8;
    entry[12] = file_type.code();
    entry[13] = 0;

    for sect in SECTOR_DIR..SECTOR_DIR + DIR_REGION_SECTORS {
        let mut buf = mount.read_sector(sect)?;
        for slot in 0..DIRENTS_PER_SECTOR {
            let existing = entry_slot(&buf, slot);
            if existing[0] == 0 || existing[0] == 0xFF {
                entry_slot_mut(&mut buf, slot).copy_from_slice(&entry);
                mount.write_sector(sect, &buf)?;
                return Ok(());
            }
        }
    }
    Err(MdosError::NoSpace)
}

/// Lists every live directory entry. Malformed entries (an empty normalized
/// name) are skipped and logged rather than aborting the whole listing.
pub fn enumerate(mount: &mut Mount) -> Result<Vec<DirEntry>> {
    let mut out = Vec::new();
    for sect in SECTOR_DIR..SECTOR_DIR + DIR_REGION_SECTORS {
        let buf = mount.read_sector(sect)?;
        for slot in 0..DIRENTS_PER_SECTOR {
            let entry = entry_slot(&buf, slot);
            if entry[0] == 0 || entry[0] == 0xFF {
                continue;
            }
            let name: [u8; 8] = entry[0..8].try_into().unwrap();
            let suffix: [u8; 2] = entry[8..10].try_into().unwrap();
            let built = raw_name_from_bytes(&name, &suffix);
            if built.trim_matches('.').is_empty() {
                warn!("skipping malformed directory entry in sector {sect} slot {slot}");
                continue;
            }
            out.push(DirEntry {
                name: built,
                file_type: FileType::from_code(entry[12]),
                attributes: entry[12],
                rib_sector: ((entry[10] as u32) << 8) | entry[11] as u32,
            });
        }
    }
    Ok(out)
}

/// The reference MDOS hash used to pre-bucket directory lookups. Implemented
/// for completeness but not wired into `find`/`insert`, which stay linear —
/// matches the reference tool's own declared-but-unused hash.
pub fn hash_filename(name: &str) -> u8 {
    let normalized = normalize(name).unwrap_or_else(|_| name.to_ascii_uppercase());
    let mut filename = [b' '; 10];
    let (name_part, ext_part) = match normalized.find('.') {
        Some(pos) => (&normalized[..pos], &normalized[pos + 1..]),
        None => (normalized.as_str(), ""),
    };
    for (i, b) in name_part.bytes().take(8).enumerate() {
        filename[i] = b;
    }
    for (i, b) in ext_part.bytes().take(2).enumerate() {
        filename[8 + i] = b;
    }

    let mut b: u32 = 0;
    for &byte in &filename {
        let mut a = byte as u32;
        a = if a >= 0x25 { a - 0x25 } else { 0 };
        b = (b & 0xFF) + a + (b >> 8);
        b = ((b << 1) + (b >> 8)) & 0x1FF;
    }
    b = ((b >> 1) + (b << 8)) & 0x1FF;
    let mut a = b;
    for _ in 0..4 {
        a = ((a >> 1) + (a << 8)) & 0x1FF;
    }
    a = (a & 0xFF) + (b & 0xFF);
    b = a;
    b &= 0x1F;
    if b >= 20 {
        b -= 20;
        if b < 10 {
            b = (b << 1) + (a & 1);
        }
    }
    b as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::create_image;
    use tempfile::tempdir;

    #[test]
    fn normalize_uppercases_and_splits_extension() {
        assert_eq!(normalize("hello.tx").unwrap(), "HELLO.TX");
        assert_eq!(normalize("readme").unwrap(), "README");
    }

    #[test]
    fn normalize_rejects_overlong_name() {
        assert_eq!(normalize("toolongname.t").unwrap_err(), MdosError::Invalid);
    }

    #[test]
    fn normalize_rejects_non_alnum() {
        assert_eq!(normalize("bad name.t").unwrap_err(), MdosError::Invalid);
    }

    #[test]
    fn insert_then_find_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();

        insert(&mut mount, "hello.tx", 42, FileType::Ascii).unwrap();
        let (rib_sector, file_type) = find(&mut mount, "HELLO.TX", false).unwrap();
        assert_eq!(rib_sector, 42);
        assert_eq!(file_type, FileType::Ascii);
    }

    #[test]
    fn find_missing_returns_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();
        assert_eq!(find(&mut mount, "nope.t", false).unwrap_err(), MdosError::NotFound);
    }

    #[test]
    fn find_with_delete_tombstones_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();

        insert(&mut mount, "hello.tx", 42, FileType::Ascii).unwrap();
        find(&mut mount, "hello.tx", true).unwrap();
        assert_eq!(find(&mut mount, "hello.tx", false).unwrap_err(), MdosError::NotFound);
    }

    #[test]
    fn enumerate_lists_inserted_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();

        insert(&mut mount, "a.tx", 10, FileType::Ascii).unwrap();
        insert(&mut mount, "b.ob", 20, FileType::Object).unwrap();
        let entries = enumerate(&mut mount).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn hash_filename_is_within_bucket_range() {
        let h = hash_filename("readme.tx");
        assert!(h < 20);
    }
}
