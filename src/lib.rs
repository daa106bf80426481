/*
 * MDOS Filesystem Toolkit
 * =======================
 *
 * A POSIX-like file I/O layer over the MDOS filesystem used on Motorola
 * EXORciser systems, plus a codec for the ImageDisk (IMD) archive format
 * those disk images are commonly distributed in.
 *
 * Components:
 * ----------
 * - Sector store and disk image formatting (`sector`)
 * - Cluster allocation table management (`cat`)
 * - Record Information Block / segment chain decoding (`rib`)
 * - Directory service (`dir`)
 * - File engine: open/read/write/seek, ASCII transcoding (`file`)
 * - IMD archive codec (`imd`)
 * - CLI-facing convenience operations (`tools`)
 */

pub mod cat;
pub mod dir;
pub mod error;
pub mod file;
pub mod imd;
pub mod rib;
pub mod sector;
pub mod tools;

pub use error::{MdosError, Result};
pub use rib::FileType;
pub use sector::Mount;
