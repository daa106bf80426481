//! CLI-facing convenience layer: directory listings, cat/export, file info,
//! and seek diagnostics built on top of the core filesystem operations.
//!
//! Grounded on `mdos_tools.c` (`mdos_list_files`, `mdos_cat_file`,
//! `mdos_export_file`, `determine_file_type`, `mdos_test_seek`,
//! `mdos_file_info`).

use std::collections::HashMap;
use std::fs::File as LocalFile;
use std::io::Write as IoWrite;

use serde::Deserialize;

use crate::cat::free_space;
use crate::dir::{self, DirEntry};
use crate::error::{MdosError, Result};
use crate::file::{self, open_flags, Whence};
use crate::rib::{FileType, Rib};
use crate::sector::Mount;

/// Detailed information about one file, mirroring `mdos_file_info_t`.
pub struct FileInfo {
    pub name: String,
    pub file_type: FileType,
    pub size: u32,
    pub sectors: u32,
    pub load_addr: u16,
    pub start_addr: u16,
    pub attributes: u8,
    pub rib_sector: u32,
}

fn load_info(mount: &mut Mount, entry: &DirEntry) -> Result<FileInfo> {
    let rib_data = mount.read_sector(entry.rib_sector)?;
    let rib = Rib::from_bytes(rib_data);
    Ok(FileInfo {
        name: entry.name.clone(),
        file_type: entry.file_type,
        size: rib.byte_size(entry.file_type),
        sectors: rib.corrected_sector_count(),
        load_addr: rib.load_addr(),
        start_addr: rib.entry_addr(),
        attributes: entry.attributes,
        rib_sector: entry.rib_sector,
    })
}

/// File attribute bit flags, matching `MDOS_ATTR_*`.
pub mod attr {
    pub const WRITE_PROTECT: u8 = 0x80;
    pub const DELETE_PROTECT: u8 = 0x40;
    pub const SYSTEM: u8 = 0x20;
    pub const CONT: u8 = 0x10;
    pub const COMPR: u8 = 0x08;
}

fn attr_string(attributes: u8) -> String {
    let chars: [(u8, char); 5] = [
        (attr::WRITE_PROTECT, 'W'),
        (attr::DELETE_PROTECT, 'D'),
        (attr::SYSTEM, 'S'),
        (attr::CONT, 'C'),
        (attr::COMPR, 'Z'),
    ];
    chars
        .iter()
        .map(|(bit, ch)| if attributes & bit != 0 { *ch } else { '-' })
        .collect()
}

/// Looks up full metadata for `filename`, equivalent to `mdos_stat`.
pub fn stat(mount: &mut Mount, filename: &str) -> Result<FileInfo> {
    let entry = dir::find_entry(mount, filename)?;
    load_info(mount, &entry)
}

/// Writes a directory listing followed by free space, matching
/// `mdos_list_files`'s table layout.
pub fn list_files(mount: &mut Mount, out: &mut impl IoWrite) -> Result<()> {
    writeln!(out, "{:<12} {:>8} {:>6} {}", "Name", "Size", "Type", "Attributes").map_err(|_| MdosError::Io)?;
    writeln!(out, "----------------------------------------").map_err(|_| MdosError::Io)?;

    let entries = dir::enumerate(mount)?;
    for entry in &entries {
        let info = load_info(mount, entry)?;
        writeln!(
            out,
            "{:<12} {:>8} {:>6} {}",
            info.name,
            info.size,
            info.file_type.code(),
            attr_string(info.attributes)
        )
        .map_err(|_| MdosError::Io)?;
    }

    let free = free_space(mount)?;
    writeln!(out, "\nFree space: {free} bytes").map_err(|_| MdosError::Io)
}

/// Writes `filename`'s contents to `out`, decoded unless `raw_mode` is set.
pub fn cat_file(mount: &mut Mount, filename: &str, out: &mut impl IoWrite, raw_mode: bool) -> Result<()> {
    let fd = file::open(mount, filename, open_flags::RDONLY, FileType::UserDefined)?;
    let mut buffer = [0u8; 1024];
    loop {
        let n = if raw_mode {
            file::read_raw(mount, fd, &mut buffer)?
        } else {
            file::read(mount, fd, &mut buffer)?
        };
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n]).map_err(|_| MdosError::Io)?;
    }
    file::close(mount, fd)
}

/// Copies `mdos_name` out to a local file, returning the byte count written.
pub fn export_file(mount: &mut Mount, mdos_name: &str, local_path: &str) -> Result<u64> {
    let fd = file::open(mount, mdos_name, open_flags::RDONLY, FileType::UserDefined)?;
    let mut local = LocalFile::create(local_path).map_err(|_| MdosError::Io)?;

    let mut total = 0u64;
    let mut buffer = [0u8; 1024];
    loop {
        let n = file::read(mount, fd, &mut buffer)?;
        if n == 0 {
            break;
        }
        local.write_all(&buffer[..n]).map_err(|_| MdosError::Io)?;
        total += n as u64;
    }
    file::close(mount, fd)?;
    Ok(total)
}

/// Extension-to-file-type table, overridable via a TOML config (spec's
/// ambient configuration layer). `determine_file_type` falls back to this
/// table's built-in defaults when no config was loaded.
#[derive(Debug, Deserialize, Default)]
pub struct TypeMap {
    #[serde(default)]
    pub image_extensions: Vec<String>,
    #[serde(default)]
    pub ascii_extensions: Vec<String>,
}

impl TypeMap {
    pub fn from_toml_str(s: &str) -> Result<TypeMap> {
        toml::from_str(s).map_err(|_| MdosError::Invalid)
    }

    fn defaults() -> TypeMap {
        TypeMap {
            image_extensions: vec!["bin".into(), "obj".into()],
            ascii_extensions: vec!["txt".into(), "sa".into(), "cm".into(), "asm".into()],
        }
    }

    fn extension_lookup(&self) -> HashMap<&str, FileType> {
        let mut map = HashMap::new();
        for ext in &self.image_extensions {
            map.insert(ext.as_str(), FileType::Image);
        }
        for ext in &self.ascii_extensions {
            map.insert(ext.as_str(), FileType::Ascii);
        }
        map
    }
}

/// Chooses a file type from `filename`'s extension, defaulting to ASCII when
/// the extension is absent or unrecognized. Grounded on
/// `determine_file_type`.
pub fn determine_file_type(filename: &str, overrides: Option<&TypeMap>) -> FileType {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return FileType::Ascii,
    };

    let defaults = TypeMap::defaults();
    let lookup = overrides.unwrap_or(&defaults).extension_lookup();
    let defaults_lookup = defaults.extension_lookup();

    lookup
        .get(ext.as_str())
        .or_else(|| defaults_lookup.get(ext.as_str()))
        .copied()
        .unwrap_or(FileType::Ascii)
}

/// Exercises seek-then-read at the start, middle, and end of a file, writing
/// a human-readable trace to `out`. Grounded on `mdos_test_seek`.
pub fn test_seek(mount: &mut Mount, filename: &str, out: &mut impl IoWrite) -> Result<()> {
    writeln!(out, "Testing seek operations on {filename}...").map_err(|_| MdosError::Io)?;
    let fd = file::open(mount, filename, open_flags::RDONLY, FileType::UserDefined)?;

    let size = file::lseek(mount, fd, 0, Whence::End)?;
    writeln!(out, "File size: {size} bytes").map_err(|_| MdosError::Io)?;

    file::lseek(mount, fd, 0, Whence::Set)?;
    let mut buf = [0u8; 10];
    let n = file::read_raw(mount, fd, &mut buf)?;
    if n > 0 {
        write_hex_line(out, "First 10 bytes: ", &buf[..n])?;
    }

    let mid = file::lseek(mount, fd, size as i64 / 2, Whence::Set)?;
    writeln!(out, "Seeked to position: {mid}").map_err(|_| MdosError::Io)?;
    let n = file::read_raw(mount, fd, &mut buf)?;
    if n > 0 {
        write_hex_line(out, "10 bytes from middle: ", &buf[..n])?;
    }

    if size >= 10 {
        let pos = file::lseek(mount, fd, -10, Whence::End)?;
        writeln!(out, "Seeked to 10 bytes before end: {pos}").map_err(|_| MdosError::Io)?;
        let n = file::read_raw(mount, fd, &mut buf)?;
        if n > 0 {
            write_hex_line(out, "Last bytes: ", &buf[..n])?;
        }
    }

    file::close(mount, fd)
}

fn write_hex_line(out: &mut impl IoWrite, label: &str, data: &[u8]) -> Result<()> {
    write!(out, "{label}").map_err(|_| MdosError::Io)?;
    for b in data {
        write!(out, "{b:02X} ").map_err(|_| MdosError::Io)?;
    }
    writeln!(out).map_err(|_| MdosError::Io)
}

/// Writes a detailed, human-readable report for one file. Grounded on
/// `mdos_file_info`.
pub fn file_info(mount: &mut Mount, filename: &str, out: &mut impl IoWrite) -> Result<()> {
    let info = stat(mount, filename)?;
    writeln!(out, "File information for '{filename}':").map_err(|_| MdosError::Io)?;
    writeln!(out, "  Size: {} bytes ({} sectors)", info.size, info.sectors).map_err(|_| MdosError::Io)?;
    writeln!(out, "  Type: {}", info.file_type.code()).map_err(|_| MdosError::Io)?;
    writeln!(out, "  Load address: ${:04X}", info.load_addr).map_err(|_| MdosError::Io)?;
    writeln!(out, "  Start address: ${:04X}", info.start_addr).map_err(|_| MdosError::Io)?;
    writeln!(out, "  RIB sector: {}", info.rib_sector).map_err(|_| MdosError::Io)?;

    write!(out, "  Attributes: ").map_err(|_| MdosError::Io)?;
    if info.attributes == 0 {
        write!(out, "None").map_err(|_| MdosError::Io)?;
    } else {
        if info.attributes & attr::WRITE_PROTECT != 0 {
            write!(out, "Write-Protected ").map_err(|_| MdosError::Io)?;
        }
        if info.attributes & attr::DELETE_PROTECT != 0 {
            write!(out, "Delete-Protected ").map_err(|_| MdosError::Io)?;
        }
        if info.attributes & attr::SYSTEM != 0 {
            write!(out, "System ").map_err(|_| MdosError::Io)?;
        }
        if info.attributes & attr::CONT != 0 {
            write!(out, "Continuous ").map_err(|_| MdosError::Io)?;
        }
        if info.attributes & attr::COMPR != 0 {
            write!(out, "Compressed ").map_err(|_| MdosError::Io)?;
        }
    }
    writeln!(out).map_err(|_| MdosError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::create_image;
    use tempfile::tempdir;

    #[test]
    fn determine_file_type_uses_extension() {
        assert_eq!(determine_file_type("a.bin", None), FileType::Image);
        assert_eq!(determine_file_type("a.txt", None), FileType::Ascii);
        assert_eq!(determine_file_type("a.zzz", None), FileType::Ascii);
        assert_eq!(determine_file_type("noext", None), FileType::Ascii);
    }

    #[test]
    fn determine_file_type_honors_overrides() {
        let map = TypeMap {
            image_extensions: vec!["dat".into()],
            ascii_extensions: vec![],
        };
        assert_eq!(determine_file_type("a.dat", Some(&map)), FileType::Image);
    }

    #[test]
    fn type_map_parses_from_toml() {
        let toml_src = "image_extensions = [\"dat\"]\nascii_extensions = [\"log\"]\n";
        let map = TypeMap::from_toml_str(toml_src).unwrap();
        assert_eq!(map.image_extensions, vec!["dat"]);
    }

    #[test]
    fn list_files_reports_created_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();
        crate::file::create_file(&mut mount, "a.ob", FileType::Object, b"hello").unwrap();

        let mut out = Vec::new();
        list_files(&mut mount, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("a.ob"));
        assert!(text.contains("Free space"));
    }

    #[test]
    fn cat_file_writes_decoded_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();
        crate::file::create_file(&mut mount, "a.ob", FileType::Object, b"hello").unwrap();

        let mut out = Vec::new();
        cat_file(&mut mount, "a.ob", &mut out, true).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn file_info_reports_stat_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dsk");
        create_image(&path, 1).unwrap();
        let mut mount = Mount::mount(&path).unwrap();
        crate::file::create_file(&mut mount, "a.ob", FileType::Object, b"hello").unwrap();

        let mut out = Vec::new();
        file_info(&mut mount, "a.ob", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("RIB sector"));
    }
}
