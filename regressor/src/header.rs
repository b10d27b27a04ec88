use std::io::{self, Read, Write};

use crate::{
    Version,
    error::{RegressorErr, Result},
    version::{CURRENT_VERSION, LAST_COMPATIBLE_VERSION},
};

/// Everything a model file carries before its weight records.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: Version,
    pub min_label: f32,
    pub max_label: f32,
    pub num_bits: u32,
    pub pairs: Vec<(u8, u8)>,
    pub triples: Vec<[u8; 3]>,
    pub rank: u64,
    pub lda: u64,
    pub ngram: u64,
    pub skips: u64,
    /// Free form description of the options the model was trained with.
    pub options: String,
}

impl Header {
    /// Creates a header stamped with the current format version.
    pub fn new(num_bits: u32, min_label: f32, max_label: f32, pairs: &[(u8, u8)]) -> Self {
        Self {
            version: CURRENT_VERSION,
            min_label,
            max_label,
            num_bits,
            pairs: pairs.to_vec(),
            triples: Vec::new(),
            rank: 0,
            lda: 0,
            ngram: 0,
            skips: 0,
            options: String::new(),
        }
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = options.into();
        self
    }

    /// Writes the binary header, every integer little endian.
    pub fn write_binary<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_cstr(w, &self.version.to_string())?;
        w.write_all(&self.min_label.to_le_bytes())?;
        w.write_all(&self.max_label.to_le_bytes())?;
        w.write_all(&u64::from(self.num_bits).to_le_bytes())?;

        w.write_all(&(self.pairs.len() as i32).to_le_bytes())?;
        for &(a, b) in &self.pairs {
            w.write_all(&[a, b])?;
        }

        w.write_all(&(self.triples.len() as i32).to_le_bytes())?;
        for triple in &self.triples {
            w.write_all(triple)?;
        }

        for value in [self.rank, self.lda, self.ngram, self.skips] {
            w.write_all(&value.to_le_bytes())?;
        }
        write_cstr(w, &self.options)
    }

    /// Reads a binary header, rejecting files older than the last compatible version.
    pub fn read_binary<R: Read>(r: &mut R) -> Result<Self> {
        let version: Version = read_cstr(r)?.parse()?;
        if version < LAST_COMPATIBLE_VERSION {
            return Err(RegressorErr::IncompatibleVersion {
                found: version,
                oldest: LAST_COMPATIBLE_VERSION,
            });
        }

        let min_label = f32::from_le_bytes(read_array(r)?);
        let max_label = f32::from_le_bytes(read_array(r)?);

        let num_bits = read_u64(r)?;
        let num_bits = u32::try_from(num_bits)
            .ok()
            .filter(|bits| (1..=32).contains(bits))
            .ok_or_else(|| RegressorErr::Malformed(format!("invalid bit width {num_bits}")))?;

        let pairs = (0..read_count(r)?)
            .map(|_| read_array::<_, 2>(r).map(|[a, b]| (a, b)))
            .collect::<io::Result<_>>()?;
        let triples = (0..read_count(r)?)
            .map(|_| read_array::<_, 3>(r))
            .collect::<io::Result<_>>()?;

        let rank = read_u64(r)?;
        let lda = read_u64(r)?;
        let ngram = read_u64(r)?;
        let skips = read_u64(r)?;

        Ok(Self {
            version,
            min_label,
            max_label,
            num_bits,
            pairs,
            triples,
            rank,
            lda,
            ngram,
            skips,
            options: read_cstr(r)?,
        })
    }

    /// Writes the human readable rendition of the header.
    pub fn write_text<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Version {}", self.version)?;
        writeln!(
            w,
            "Min label:{:.6} max label:{:.6}",
            self.min_label, self.max_label
        )?;
        writeln!(w, "bits:{}", self.num_bits)?;

        if !self.pairs.is_empty() {
            for &(a, b) in &self.pairs {
                write!(w, "{}{} ", a as char, b as char)?;
            }
            writeln!(w)?;
        }
        if !self.triples.is_empty() {
            for &[a, b, c] in &self.triples {
                write!(w, "{}{}{} ", a as char, b as char, c as char)?;
            }
            writeln!(w)?;
        }

        writeln!(w, "ngram:{} skips:{}", self.ngram, self.skips)?;
        writeln!(w, "index:weight pairs:")?;
        writeln!(w, "rank:{}", self.rank)?;
        writeln!(w, "lda:{}", self.lda)?;
        writeln!(w, "options:{}", self.options)
    }
}

/// Writes a length prefixed, NUL terminated string, the length counting the NUL.
fn write_cstr<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(&(s.len() as u64 + 1).to_le_bytes())?;
    w.write_all(s.as_bytes())?;
    w.write_all(&[0])
}

fn read_cstr<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u64(r)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len > 0 && len <= MAX_STRING_LEN)
        .ok_or_else(|| RegressorErr::Malformed(format!("invalid string length {len}")))?;

    let mut bytes = vec![0; len];
    r.read_exact(&mut bytes)?;
    if bytes.pop() != Some(0) {
        return Err(RegressorErr::Malformed("unterminated string".into()));
    }

    String::from_utf8(bytes).map_err(|e| RegressorErr::Malformed(e.to_string()))
}

const MAX_STRING_LEN: usize = 1 << 20;

fn read_count<R: Read>(r: &mut R) -> Result<usize> {
    let count = i32::from_le_bytes(read_array(r)?);
    usize::try_from(count).map_err(|_| RegressorErr::Malformed(format!("negative count {count}")))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    read_array(r).map(u64::from_le_bytes)
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0; N];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}
