use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use learner::{ModelState, WeightStore};
use log::{debug, info};

use crate::{
    Header,
    error::{RegressorErr, Result},
};

/// A model read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub header: Header,
    /// `(logical index, primary weight)` for every non-zero weight.
    pub records: Vec<(u32, f32)>,
}

impl Model {
    /// Picks the bit width a run loading this model must use.
    ///
    /// # Errors
    /// `BitsMismatch` if a width was configured and the file disagrees.
    pub fn resolve_bits(&self, configured: Option<u32>) -> Result<u32> {
        match configured {
            Some(configured) if configured != self.header.num_bits => {
                Err(RegressorErr::BitsMismatch {
                    configured,
                    found: self.header.num_bits,
                })
            }
            _ => Ok(self.header.num_bits),
        }
    }

    /// Writes every record into the primary slots of `store`.
    pub fn apply(&self, store: &mut WeightStore) -> Result<()> {
        if store.num_bits() != self.header.num_bits {
            return Err(RegressorErr::BitsMismatch {
                configured: store.num_bits(),
                found: self.header.num_bits,
            });
        }

        let capacity = store.len();
        for &(index, value) in &self.records {
            let index = index as usize;
            if index >= capacity {
                return Err(RegressorErr::Malformed(format!(
                    "weight index {index} out of a table of {capacity} weights"
                )));
            }
            store.set_primary(index, value);
        }

        debug!(records = self.records.len(); "applied model weights");
        Ok(())
    }
}

/// Reads the binary model at `path`.
pub fn read_model(path: &Path) -> Result<Model> {
    let mut r = BufReader::new(File::open(path)?);
    let header = Header::read_binary(&mut r)?;

    let mut records = Vec::new();
    while let Some(record) = read_record(&mut r)? {
        records.push(record);
    }

    info!(
        bits = header.num_bits,
        records = records.len();
        "loaded model {} version {}", path.display(), header.version
    );
    Ok(Model { header, records })
}

/// Reads one `(u32 index, f32 weight)` record, `None` on a clean end of file.
fn read_record<R: Read>(r: &mut R) -> Result<Option<(u32, f32)>> {
    let mut bytes = [0u8; 8];
    let mut filled = 0;
    while filled < bytes.len() {
        match r.read(&mut bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(RegressorErr::Malformed(
                    "truncated weight record at end of file".into(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let [i0, i1, i2, i3, w0, w1, w2, w3] = bytes;
    Ok(Some((
        u32::from_le_bytes([i0, i1, i2, i3]),
        f32::from_le_bytes([w0, w1, w2, w3]),
    )))
}

fn header_of(state: &ModelState<'_>, options: &str) -> Header {
    Header::new(
        state.weights.num_bits(),
        state.min_label,
        state.max_label,
        state.pairs,
    )
    .with_options(options)
}

/// Writes the binary model: the header followed by every non-zero primary weight.
pub fn save(path: &Path, state: &ModelState<'_>, options: &str) -> Result<()> {
    write_replacing(path, |w| {
        header_of(state, options).write_binary(w)?;
        for (index, value) in state.weights.primary_weights() {
            w.write_all(&index.to_le_bytes())?;
            w.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    })?;

    info!("saved model to {}", path.display());
    Ok(())
}

/// Writes the human readable dump of the model.
pub fn save_text(path: &Path, state: &ModelState<'_>, options: &str) -> Result<()> {
    write_replacing(path, |w| {
        header_of(state, options).write_text(w)?;
        for (index, value) in state.weights.primary_weights() {
            writeln!(w, "{index}:{value:.6}")?;
        }
        Ok(())
    })?;

    info!("saved readable model to {}", path.display());
    Ok(())
}

/// Writes into `<path>.writing` and only then moves it over `path`.
fn write_replacing<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let mut staging = PathBuf::from(path).into_os_string();
    staging.push(".writing");
    let staging = PathBuf::from(staging);

    let mut w = BufWriter::new(File::create(&staging)?);
    write(&mut w)?;
    w.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }
    fs::rename(&staging, path)?;
    Ok(())
}
