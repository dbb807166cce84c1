//! Text files as ordered line sequences.
//!
//! Both the release cache and the kubeconfig staging area persist through
//! here. Writes always replace the whole file.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Read `path` as a list of lines, without line terminators.
pub fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let file = fs::File::open(path)?;
    BufReader::new(file).lines().collect()
}

/// Write `lines` to `path`, one per line, replacing any prior content.
pub fn write_lines<S: AsRef<str>>(path: &Path, lines: &[S]) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{}", line.as_ref())?;
    }
    writer.flush()
}
