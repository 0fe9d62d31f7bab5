use fs_err as fs;
use rom_patcher::buffer::{self, ByteBuffer};
use std::path::Path;

/// Reads a whole file into a buffer named after it.
pub fn read_buffer(path: &Path) -> Result<ByteBuffer, buffer::Error> {
  let bytes = fs::read(path)?;
  let name = path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_default();
  Ok(ByteBuffer::from_named_vec(name, bytes))
}

pub fn write_buffer(path: &Path, buffer: &ByteBuffer) -> Result<(), buffer::Error> {
  Ok(fs::write(path, buffer.bytes())?)
}
