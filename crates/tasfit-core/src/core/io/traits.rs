use crate::core::models::scan::Scan;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Defines the interface for reading measured scans from a file format.
///
/// Implementors handle format-specific parsing; the fit engine only ever
/// sees the resulting [`Scan`]. Readers carry their own options (column
/// names and the like), so the methods take `&self`.
pub trait ScanReader {
    /// The error type for read operations.
    type Error: Error + From<io::Error>;

    /// Reads a scan from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or the reader fails.
    fn read_from(&self, reader: &mut impl BufRead) -> Result<Scan, Self::Error>;

    /// Reads a scan from a file path and records the path as its source.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsing fails.
    fn read_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Scan, Self::Error> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let scan = self.read_from(&mut reader)?;
        Ok(scan.with_source(path.as_ref()))
    }
}
