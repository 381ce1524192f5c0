use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use relocate_core::DumpCompression;

pub trait DumpTool {
    fn dump(&self, dest: &Path) -> Result<()>;

    fn restore(&self, src: &Path) -> Result<()>;
}

pub fn open_dump_reader(path: &Path) -> Result<Box<dyn Read>> {
    let compression = DumpCompression::detect(path)?;
    let file =
        File::open(path).with_context(|| format!("failed to open dump: {}", path.display()))?;
    let reader = BufReader::new(file);
    Ok(match compression {
        DumpCompression::Gzip => Box::new(MultiGzDecoder::new(reader)),
        DumpCompression::None => Box::new(reader),
    })
}

pub(crate) fn decompress_to(path: &Path, dest: &Path) -> Result<u64> {
    let mut reader = open_dump_reader(path)?;
    let mut out = File::create(dest)
        .with_context(|| format!("failed to create {}", dest.display()))?;
    io::copy(&mut reader, &mut out)
        .with_context(|| format!("failed to decompress {} into {}", path.display(), dest.display()))
}
