//! Save states and battery-backed save RAM.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::SerializeError;
use crate::loader::FunctionTable;

const BATTERY_EXTENSION: &str = "srm";
const LEGACY_BATTERY_EXTENSION: &str = "sav";

/// `<saves_dir>/<rom stem>.srm`.
pub fn battery_save_path(saves_dir: &Path, rom: &Path) -> Option<PathBuf> {
    let mut name = rom.file_stem()?.to_os_string();
    name.push(".");
    name.push(BATTERY_EXTENSION);
    Some(saves_dir.join(name))
}

/// The core-owned memory region `id`, if the core exposes a non-empty one.
///
/// # Safety
///
/// The returned slice aliases core memory; it must not outlive the next call
/// into the core.
unsafe fn memory_region<'a>(table: &FunctionTable, id: u32) -> Option<&'a mut [u8]> {
    let get_size = table.get_memory_size?;
    let get_data = table.get_memory_data?;
    // SAFETY: both entry points were bound from the core.
    let size = unsafe { get_size(id) };
    if size == 0 {
        return None;
    }
    let data = unsafe { get_data(id) };
    if data.is_null() {
        tracing::warn!("core reports {} bytes of memory {} but no pointer", size, id);
        return None;
    }
    // SAFETY: the core guarantees `data` is valid for `size` bytes while loaded.
    Some(unsafe { std::slice::from_raw_parts_mut(data.cast::<u8>(), size) })
}

/// Copies save RAM from `path` (or its legacy `.sav` sibling) into the core.
///
/// Returns the number of bytes restored, `None` when there is no region or no file.
pub fn load_battery_save(
    table: &FunctionTable,
    ram_id: u32,
    path: &Path,
) -> io::Result<Option<usize>> {
    // SAFETY: the region is only used before returning.
    let Some(region) = (unsafe { memory_region(table, ram_id) }) else {
        return Ok(None);
    };

    let legacy = path.with_extension(LEGACY_BATTERY_EXTENSION);
    let source = [path, legacy.as_path()].into_iter().find(|p| p.is_file());
    let Some(source) = source else {
        return Ok(None);
    };

    let bytes = std::fs::read(source)?;
    if bytes.len() > region.len() {
        tracing::warn!(
            "save RAM file {:?} is {} bytes, core region is {}; truncating",
            source,
            bytes.len(),
            region.len()
        );
    }
    let copied = bytes.len().min(region.len());
    region[..copied].copy_from_slice(&bytes[..copied]);
    tracing::info!("Loaded save RAM from {:?} ({} bytes)", source, copied);
    Ok(Some(copied))
}

/// Writes exactly the core's save RAM region to `path`.
///
/// Returns the number of bytes written, `None` when the core has no save RAM.
pub fn write_battery_save(
    table: &FunctionTable,
    ram_id: u32,
    path: &Path,
) -> io::Result<Option<usize>> {
    // SAFETY: the region is only used before returning.
    let Some(region) = (unsafe { memory_region(table, ram_id) }) else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &*region)?;
    tracing::info!("Saved save RAM to {:?} ({} bytes)", path, region.len());
    Ok(Some(region.len()))
}

/// Serializes the running game into a fresh blob of `serialize_size` bytes.
pub fn save_state(table: &FunctionTable) -> Result<Vec<u8>, SerializeError> {
    let (Some(serialize_size), Some(serialize)) = (table.serialize_size, table.serialize) else {
        return Err(SerializeError::Unsupported);
    };
    // SAFETY: bound from the core.
    let size = unsafe { serialize_size() };
    if size == 0 {
        return Err(SerializeError::Unsupported);
    }
    let mut blob = vec![0u8; size];
    // SAFETY: `blob` is writable for `size` bytes.
    if unsafe { serialize(blob.as_mut_ptr().cast(), size) } {
        Ok(blob)
    } else {
        Err(SerializeError::Rejected)
    }
}

/// Restores a blob previously produced by [`save_state`].
pub fn load_state(table: &FunctionTable, blob: &[u8]) -> Result<(), SerializeError> {
    let Some(unserialize) = table.unserialize else {
        return Err(SerializeError::Unsupported);
    };
    // SAFETY: `blob` is readable for its length; the core only reads it.
    if unsafe { unserialize(blob.as_ptr().cast(), blob.len()) } {
        Ok(())
    } else {
        Err(SerializeError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_path_uses_rom_stem() {
        let path = battery_save_path(Path::new("/data/saves/snes"), Path::new("/roms/Zelda (USA).sfc"));
        assert_eq!(path, Some(PathBuf::from("/data/saves/snes/Zelda (USA).srm")));
        let dotted = battery_save_path(Path::new("/s"), Path::new("/roms/game.v1.nes"));
        assert_eq!(dotted, Some(PathBuf::from("/s/game.v1.srm")));
        assert_eq!(battery_save_path(Path::new("/x"), Path::new("/")), None);
    }
}
