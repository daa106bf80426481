//! File engine: the per-mount open-file table and POSIX-like read/write/seek
//! operations, including MDOS ASCII record transcoding.
//!
//! Grounded on `mdos_file.c` in full and `mdos_tools.c`'s
//! `convert_ascii_data` for the import-side transform.

use crate::cat::{alloc_segments, free_chain};
use crate::dir;
use crate::error::{MdosError, Result};
use crate::rib::{FileType, Rib};
use crate::sector::{Mount, MAX_OPEN_FILES, SECTOR_SIZE};

/// Open-mode flags, matching `MDOS_O_*` bit-for-bit.
pub mod open_flags {
    pub const RDONLY: u32 = 0x01;
    pub const WRONLY: u32 = 0x02;
    pub const RDWR: u32 = 0x03;
    pub const CREAT: u32 = 0x04;
    pub const TRUNC: u32 = 0x08;
}

/// `lseek` whence values, matching `MDOS_SEEK_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// State for one open file descriptor. Grounded on `mdos_file_t`.
pub struct OpenFile {
    pub name: String,
    pub flags: u32,
    pub file_type: FileType,
    pub rib_sector: u32,
    pub rib: Rib,
    pub file_size: u32,
    pub position: u32,
}

fn readable(flags: u32) -> bool {
    flags & open_flags::RDONLY != 0 || flags & open_flags::RDWR != 0
}

fn writable(flags: u32) -> bool {
    flags & open_flags::WRONLY != 0 || flags & open_flags::RDWR != 0
}

/// Opens `filename`, optionally creating it empty when `O_CREAT` is set and
/// it doesn't already exist. Returns the allocated descriptor index.
pub fn open(mount: &mut Mount, filename: &str, flags: u32, requested_type: FileType) -> Result<usize> {
    let fd = (0..MAX_OPEN_FILES)
        .find(|&i| mount.open_files[i].is_none())
        .ok_or(MdosError::TooManyOpen)?;

    let found = dir::find(mount, filename, false);
    let (rib_sector, file_type) = match found {
        Ok(pair) => pair,
        Err(MdosError::NotFound) => {
            if flags & open_flags::CREAT == 0 {
                return Err(MdosError::NotFound);
            }
            create_file(mount, filename, requested_type, &[])?;
            dir::find(mount, filename, false)?
        }
        Err(e) => return Err(e),
    };

    let rib_data = mount.read_sector(rib_sector)?;
    let rib = Rib::from_bytes(rib_data);
    let file_size = rib.byte_size(file_type);

    mount.open_files[fd] = Some(OpenFile {
        name: filename.to_string(),
        flags,
        file_type,
        rib_sector,
        rib,
        file_size,
        position: 0,
    });
    Ok(fd)
}

pub fn close(mount: &mut Mount, fd: usize) -> Result<()> {
    if fd >= MAX_OPEN_FILES || mount.open_files[fd].is_none() {
        return Err(MdosError::BadFd);
    }
    mount.open_files[fd] = None;
    Ok(())
}

fn handle(mount: &Mount, fd: usize) -> Result<&OpenFile> {
    if fd >= MAX_OPEN_FILES {
        return Err(MdosError::BadFd);
    }
    mount.open_files[fd].as_ref().ok_or(MdosError::BadFd)
}

/// Reads up to `buf.len()` bytes, applying MDOS ASCII record decoding
/// (space-run expansion, CR→LF, LF/NUL dropped) for `FileType::Ascii` files.
pub fn read(mount: &mut Mount, fd: usize, buf: &mut [u8]) -> Result<usize> {
    {
        let file = handle(mount, fd)?;
        if !readable(file.flags) {
            return Err(MdosError::Permission);
        }
    }

    let (file_type, file_size) = {
        let file = handle(mount, fd)?;
        (file.file_type, file.file_size)
    };

    if file_type != FileType::Ascii {
        return read_raw(mount, fd, buf);
    }

    let mut written = 0usize;
    loop {
        let (position, rib_ptr) = {
            let file = handle(mount, fd)?;
            if written >= buf.len() || file.position >= file_size {
                break;
            }
            (file.position, file.rib.clone())
        };

        let sector_offset = position / SECTOR_SIZE as u32;
        let byte_offset = (position % SECTOR_SIZE as u32) as usize;
        let physical = match rib_ptr.lsn_to_psn(sector_offset + 1) {
            Some(p) => p,
            None => break,
        };
        let sector = mount.read_sector(physical)?;

        let file = mount.open_files[fd].as_mut().unwrap();
        let mut i = byte_offset;
        while i < SECTOR_SIZE && written < buf.len() && file.position < file_size {
            let c = sector[i];
            if c & 0x80 != 0 {
                let count = (c & 0x7F) as usize;
                for _ in 0..count {
                    if written >= buf.len() {
                        break;
                    }
                    buf[written] = b' ';
                    written += 1;
                }
            } else if c == 13 {
                buf[written] = b'\n';
                written += 1;
            } else if c == 10 || c == 0 || c == 0x7F || (c < 0x20 && c != 0x09) {
                // dropped: MDOS uses CR for line endings; NUL, DEL, and other
                // control characters (tab excepted) carry no text content
            } else {
                buf[written] = c;
                written += 1;
            }
            file.position += 1;
            i += 1;
        }
    }
    Ok(written)
}

/// Reads up to `buf.len()` bytes with no transcoding, regardless of type.
pub fn read_raw(mount: &mut Mount, fd: usize, buf: &mut [u8]) -> Result<usize> {
    {
        let file = handle(mount, fd)?;
        if !readable(file.flags) {
            return Err(MdosError::Permission);
        }
    }

    let mut written = 0usize;
    loop {
        let (position, file_size, rib_ptr) = {
            let file = handle(mount, fd)?;
            if written >= buf.len() || file.position >= file.file_size {
                break;
            }
            (file.position, file.file_size, file.rib.clone())
        };

        let sector_offset = position / SECTOR_SIZE as u32;
        let byte_offset = (position % SECTOR_SIZE as u32) as usize;
        let physical = match rib_ptr.lsn_to_psn(sector_offset + 1) {
            Some(p) => p,
            None => break,
        };
        let sector = mount.read_sector(physical)?;

        let remaining_in_sector = SECTOR_SIZE - byte_offset;
        let remaining_request = buf.len() - written;
        let remaining_file = (file_size - position) as usize;
        let chunk = remaining_in_sector.min(remaining_request).min(remaining_file);

        buf[written..written + chunk].copy_from_slice(&sector[byte_offset..byte_offset + chunk]);
        written += chunk;

        let file = mount.open_files[fd].as_mut().unwrap();
        file.position += chunk as u32;
    }
    Ok(written)
}

/// In-place write to an already-open file. Grounded on `mdos_write`, which
/// validates the descriptor, the mount's read-only flag, and the
/// write-capable open flags, then reports the operation as unimplemented —
/// extending a file or overwriting its middle requires reallocating and
/// re-threading its SDW chain, which this core only performs wholesale via
/// `create_file`. This stub exists so the descriptor/permission checks (and
/// the `NotImplemented` outcome) are reachable through the same entry point
/// the public interface lists, rather than leaving `write` absent entirely.
pub fn write(mount: &mut Mount, fd: usize, _buf: &[u8]) -> Result<usize> {
    if mount.is_read_only() {
        return Err(MdosError::Permission);
    }
    let file = handle(mount, fd)?;
    if !writable(file.flags) {
        return Err(MdosError::Permission);
    }
    Err(MdosError::NotImplemented)
}

/// Repositions the file offset. Matches `mdos_lseek`'s whence semantics;
/// negative results are rejected.
pub fn lseek(mount: &mut Mount, fd: usize, offset: i64, whence: Whence) -> Result<u32> {
    let file = mount.open_files.get_mut(fd).and_then(|f| f.as_mut()).ok_or(MdosError::BadFd)?;
    let base: i64 = match whence {
        Whence::Set => 0,
        Whence::Cur => file.position as i64,
        Whence::End => file.file_size as i64,
    };
    let new_pos = base + offset;
    if new_pos < 0 {
        return Err(MdosError::Invalid);
    }
    file.position = new_pos as u32;
    Ok(file.position)
}

/// Creates a new file from `data`, allocating clusters, writing the RIB and
/// data sectors, then the directory entry, then committing the CAT.
///
/// Writes the CAT update before the directory entry — the reverse of the
/// reference C order — so a crash between the two steps leaves an
/// unreachable-but-not-double-allocated file rather than a directory entry
/// pointing at clusters another file can still claim.
pub fn create_file(mount: &mut Mount, filename: &str, file_type: FileType, data: &[u8]) -> Result<()> {
    if mount.is_read_only() {
        return Err(MdosError::Permission);
    }
    if dir::find(mount, filename, false).is_ok() {
        return Err(MdosError::Exists);
    }

    let data_sectors = data.len().div_ceil(SECTOR_SIZE) as u32;
    let total_sectors = data_sectors + 1;

    let mut rib = Rib::zeroed();
    alloc_segments(mount, &mut rib, total_sectors)?;

    let last_size = if data.len() % SECTOR_SIZE == 0 && !data.is_empty() {
        SECTOR_SIZE as u8
    } else {
        (data.len() % SECTOR_SIZE) as u8
    };
    rib.set_last_size(last_size);
    rib.set_sector_count(data_sectors as u16);
    rib.set_load_addr(0);
    rib.set_entry_addr(0);

    let rib_sector = rib.lsn_to_psn(0).ok_or(MdosError::Io)?;
    mount.write_sector(rib_sector, &rib.data)?;

    for i in 0..data_sectors {
        let physical = rib.lsn_to_psn(i + 1).ok_or(MdosError::Io)?;
        let mut sector_buf = [0u8; SECTOR_SIZE];
        let start = (i as usize) * SECTOR_SIZE;
        let end = (start + SECTOR_SIZE).min(data.len());
        sector_buf[..end - start].copy_from_slice(&data[start..end]);
        mount.write_sector(physical, &sector_buf)?;
    }

    mount.sync()?;
    dir::insert(mount, filename, rib_sector, file_type)?;
    Ok(())
}

/// Deletes a file: tombstones its directory entry, then frees its clusters.
///
/// Frees clusters after the directory entry is gone, the reverse of the
/// reference order, so a crash mid-unlink never leaves a directory entry
/// pointing at clusters that a concurrent allocation has already reused.
pub fn unlink(mount: &mut Mount, filename: &str) -> Result<()> {
    if mount.is_read_only() {
        return Err(MdosError::Permission);
    }
    let (rib_sector, _file_type) = dir::find(mount, filename, true)?;
    let rib_data = mount.read_sector(rib_sector)?;
    let rib = Rib::from_bytes(rib_data);
    free_chain(mount, &rib)
}

/// Encodes a byte buffer into MDOS ASCII record form for import: runs of
/// ≥2 spaces collapse to a `0x80 | count` byte (max run 127), LF becomes CR.
/// Grounded on `mdos_tools.c`'s `convert_ascii_data`.
pub fn ascii_encode_for_import(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let c = input[i];
        if c == b' ' {
            let mut run = 0usize;
            while i < input.len() && input[i] == b' ' && run < 127 {
                run += 1;
                i += 1;
            }
            if run >= 2 {
                out.push(0x80 | run as u8);
            } else {
                out.push(b' ');
            }
        } else if c == b'\n' {
            out.push(13);
            i += 1;
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::create_image;
    use tempfile::tempdir;

    fn fresh_mount() -> (tempfile::TempDir, Mount) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mount = Mount::mount(&path).unwrap();
        (dir, mount)
    }

    #[test]
    fn create_then_read_back_object_file() {
        let (_dir, mut mount) = fresh_mount();
        create_file(&mut mount, "hello.ob", FileType::Object, b"hi there").unwrap();

        let fd = open(&mut mount, "hello.ob", open_flags::RDONLY, FileType::Object).unwrap();
        let mut buf = [0u8; 8];
        let n = read_raw(&mut mount, fd, &mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, b"hi there");
    }

    #[test]
    fn open_create_flag_makes_empty_file() {
        let (_dir, mut mount) = fresh_mount();
        let fd = open(&mut mount, "new.ob", open_flags::RDWR | open_flags::CREAT, FileType::Object).unwrap();
        let mut buf = [0u8; 8];
        let n = read_raw(&mut mount, fd, &mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn write_on_writable_descriptor_reports_not_implemented() {
        let (_dir, mut mount) = fresh_mount();
        let fd = open(&mut mount, "new.ob", open_flags::RDWR | open_flags::CREAT, FileType::Object).unwrap();
        assert_eq!(write(&mut mount, fd, b"x").unwrap_err(), MdosError::NotImplemented);
    }

    #[test]
    fn write_on_rdonly_descriptor_fails_with_permission() {
        let (_dir, mut mount) = fresh_mount();
        create_file(&mut mount, "a.ob", FileType::Object, b"x").unwrap();
        let fd = open(&mut mount, "a.ob", open_flags::RDONLY, FileType::Object).unwrap();
        assert_eq!(write(&mut mount, fd, b"y").unwrap_err(), MdosError::Permission);
    }

    #[test]
    fn open_missing_without_creat_fails() {
        let (_dir, mut mount) = fresh_mount();
        assert_eq!(
            open(&mut mount, "nope.ob", open_flags::RDONLY, FileType::Object).unwrap_err(),
            MdosError::NotFound
        );
    }

    #[test]
    fn create_existing_fails_with_exists() {
        let (_dir, mut mount) = fresh_mount();
        create_file(&mut mount, "a.ob", FileType::Object, b"x").unwrap();
        assert_eq!(
            create_file(&mut mount, "a.ob", FileType::Object, b"y").unwrap_err(),
            MdosError::Exists
        );
    }

    #[test]
    fn unlink_then_open_fails() {
        let (_dir, mut mount) = fresh_mount();
        create_file(&mut mount, "a.ob", FileType::Object, b"x").unwrap();
        unlink(&mut mount, "a.ob").unwrap();
        assert_eq!(
            open(&mut mount, "a.ob", open_flags::RDONLY, FileType::Object).unwrap_err(),
            MdosError::NotFound
        );
    }

    #[test]
    fn lseek_end_then_cur() {
        let (_dir, mut mount) = fresh_mount();
        create_file(&mut mount, "a.ob", FileType::Object, b"12345678").unwrap();
        let fd = open(&mut mount, "a.ob", open_flags::RDONLY, FileType::Object).unwrap();
        let pos = lseek(&mut mount, fd, -4, Whence::End).unwrap();
        assert_eq!(pos, 4);
        let mut buf = [0u8; 4];
        read_raw(&mut mount, fd, &mut buf).unwrap();
        assert_eq!(&buf, b"5678");
    }

    #[test]
    fn ascii_decode_expands_compressed_spaces_and_converts_cr() {
        let (_dir, mut mount) = fresh_mount();
        let encoded = vec![b'h', b'i', 0x80 | 3, b'x', 13];
        create_file(&mut mount, "a.tx", FileType::Ascii, &encoded).unwrap();

        let fd = open(&mut mount, "a.tx", open_flags::RDONLY, FileType::Ascii).unwrap();
        let mut buf = [0u8; 16];
        let n = read(&mut mount, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi   x\n");
    }

    #[test]
    fn ascii_decode_drops_control_chars_and_del_but_keeps_tab() {
        let (_dir, mut mount) = fresh_mount();
        let encoded = vec![b'a', 0x01, 0x09, b'b', 0x7F, b'c'];
        create_file(&mut mount, "a.tx", FileType::Ascii, &encoded).unwrap();

        let fd = open(&mut mount, "a.tx", open_flags::RDONLY, FileType::Ascii).unwrap();
        let mut buf = [0u8; 16];
        let n = read(&mut mount, fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"a\tbc");
    }

    #[test]
    fn ascii_encode_for_import_round_trips_spaces_and_newlines() {
        let encoded = ascii_encode_for_import(b"hi   x\n");
        assert_eq!(encoded, vec![b'h', b'i', 0x80 | 3, b'x', 13]);
    }
}
