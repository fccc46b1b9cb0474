//! The sequence interchange format and per-worker scratch files.
//!
//! External mutation simulators exchange alignments as fixed-width text:
//! one sequence per line, a leading taxon label padded to a common column.
//! Scratch files carry these alignments across the process boundary; they
//! get a unique name per worker and are removed on every exit path,
//! including failure, by their RAII guard.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::spectrum::Alignment;

/// Writes an alignment in the interchange format.
///
/// `labels` must hold one taxon label per sequence; labels may not
/// contain whitespace.
pub fn write_alignment<W: Write>(
    writer: &mut W,
    labels: &[String],
    alignment: &Alignment,
) -> io::Result<()> {
    if labels.len() != alignment.sample_size() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} labels for {} sequences",
                labels.len(),
                alignment.sample_size()
            ),
        ));
    }

    if let Some(label) = labels.iter().find(|l| l.chars().any(char::is_whitespace)) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("taxon label {:?} contains whitespace", label),
        ));
    }

    let width = labels.iter().map(|l| l.len()).max().unwrap_or(0) + 2;

    for (label, sequence) in labels.iter().zip(alignment.sequences()) {
        writeln!(writer, "{:<width$}{}", label, sequence, width = width)?;
    }

    Ok(())
}

/// Reads an alignment in the interchange format.
///
/// Blank lines are skipped; each remaining line is a taxon label followed
/// by its sequence.
pub fn read_alignment<R: BufRead>(reader: R) -> io::Result<(Vec<String>, Alignment)> {
    let mut labels = Vec::new();
    let mut sequences = Vec::new();

    for line in reader.lines() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();

        let label = fields.next().map(str::to_string).unwrap_or_default();
        let sequence: String = fields.collect();

        if sequence.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("no sequence after taxon label {:?}", label),
            ));
        }

        labels.push(label);
        sequences.push(sequence);
    }

    let alignment = Alignment::new(sequences)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    Ok((labels, alignment))
}

/// A uniquely named scratch file holding one alignment.
///
/// Concurrent workers each create their own; the file is deleted when the
/// guard drops, whether the replicate succeeded or not.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    /// Writes the alignment to a fresh uniquely named file.
    pub fn create(labels: &[String], alignment: &Alignment) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("esfmc-seq-")
            .suffix(".txt")
            .tempfile()?;

        write_alignment(&mut file, labels, alignment)?;
        file.flush()?;

        Ok(Self { file })
    }

    /// The path handed to the external simulator.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Reads the alignment back, typically after an external tool rewrote
    /// the file in place.
    pub fn read_back(&self) -> io::Result<(Vec<String>, Alignment)> {
        read_alignment(BufReader::new(File::open(self.file.path())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alignment() -> (Vec<String>, Alignment) {
        let labels = vec!["taxon_1".to_string(), "t2".to_string(), "t3".to_string()];
        let alignment = Alignment::new(vec![
            "ACGTACGT".to_string(),
            "ACGAACGT".to_string(),
            "ACGTACGA".to_string(),
        ])
        .unwrap();

        (labels, alignment)
    }

    #[test]
    fn alignments_survive_a_round_trip() {
        let (labels, original) = alignment();

        let mut buffer = Vec::new();
        write_alignment(&mut buffer, &labels, &original).unwrap();

        let (read_labels, read) = read_alignment(buffer.as_slice()).unwrap();

        assert_eq!(read_labels, labels);
        assert_eq!(read, original);
    }

    #[test]
    fn labels_are_padded_to_a_common_column() {
        let (labels, original) = alignment();

        let mut buffer = Vec::new();
        write_alignment(&mut buffer, &labels, &original).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let columns: Vec<usize> = text
            .lines()
            .map(|line| line.find("AC").unwrap())
            .collect();

        assert_eq!(columns, vec![9, 9, 9]);
    }

    #[test]
    fn mismatched_labels_and_whitespace_labels_are_rejected() {
        let (_, original) = alignment();

        let mut buffer = Vec::new();
        assert!(write_alignment(&mut buffer, &["one".to_string()], &original).is_err());

        let bad = vec!["a".to_string(), "b c".to_string(), "d".to_string()];
        assert!(write_alignment(&mut buffer, &bad, &original).is_err());
    }

    #[test]
    fn ragged_input_is_reported_as_invalid_data() {
        let text = "t1  ACGT\nt2  ACG\n";
        let err = read_alignment(text.as_bytes()).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn scratch_files_are_unique_and_removed_on_drop() {
        let (labels, original) = alignment();

        let first = ScratchFile::create(&labels, &original).unwrap();
        let second = ScratchFile::create(&labels, &original).unwrap();
        assert_ne!(first.path(), second.path());

        let (_, read) = first.read_back().unwrap();
        assert_eq!(read, original);

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
    }
}
