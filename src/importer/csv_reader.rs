//! Forward-only CSV row source with rewind support.
//!
//! Rows are ordered sequences of raw strings: no header handling and no type
//! coercion. Invalid UTF-8 is replaced lossily and ragged rows are passed through
//! untouched so arity checks happen in one place (the statement builder).

use crate::importer::error::{ImportError, ImportResult};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// One CSV record.
pub type Row = Vec<String>;

pub struct CsvBatchReader {
    reader: csv::Reader<File>,
    record: csv::ByteRecord,
}

impl CsvBatchReader {
    /// Open a CSV file, mapping a missing file to [`ImportError::FileNotFound`].
    pub fn open(path: &Path) -> ImportResult<Self> {
        let file = File::open(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ImportError::FileNotFound(path.to_path_buf()),
            _ => ImportError::Io(err),
        })?;

        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        Ok(Self {
            reader,
            record: csv::ByteRecord::new(),
        })
    }

    /// Next row, or `None` at end of stream.
    pub fn next_row(&mut self) -> ImportResult<Option<Row>> {
        if !self.reader.read_byte_record(&mut self.record)? {
            return Ok(None);
        }

        Ok(Some(
            self.record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        ))
    }

    /// Reset the stream to the first row.
    ///
    /// Uses a raw seek: `csv::Reader::seek` refuses positions before the
    /// current record once a row has been read.
    pub fn rewind(&mut self) -> ImportResult<()> {
        self.reader.seek_raw(SeekFrom::Start(0), csv::Position::new())?;
        Ok(())
    }

    /// Read at most `limit` rows from the start, then rewind.
    pub fn preview(&mut self, limit: usize) -> ImportResult<Vec<Row>> {
        self.rewind()?;

        let mut rows = Vec::with_capacity(limit.min(1024));
        while rows.len() < limit {
            match self.next_row()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }

        self.rewind()?;
        Ok(rows)
    }

    /// Advisory line count computed from a second raw pass over the file.
    ///
    /// Counts `\n` terminators plus a trailing unterminated line. Quoted fields
    /// spanning several lines are counted once per physical line. The stream is
    /// rewound afterwards.
    pub fn count_lines(&mut self) -> ImportResult<usize> {
        let file = self.reader.get_mut();
        file.seek(SeekFrom::Start(0))?;

        let mut raw = BufReader::new(file);
        let mut count = 0;
        let mut last_byte = None;

        loop {
            let chunk = raw.fill_buf()?;
            if chunk.is_empty() {
                break;
            }
            count += chunk.iter().filter(|byte| **byte == b'\n').count();
            last_byte = chunk.last().copied();
            let consumed = chunk.len();
            raw.consume(consumed);
        }

        if matches!(last_byte, Some(byte) if byte != b'\n') {
            count += 1;
        }

        drop(raw);
        self.rewind()?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn csv_file(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn drain(reader: &mut CsvBatchReader) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.csv");
        assert!(matches!(
            CsvBatchReader::open(&path),
            Err(ImportError::FileNotFound(p)) if p == path
        ));
    }

    #[test]
    fn rows_are_raw_strings_without_header() {
        let file = csv_file(b"1,Paris\n2,\"Lyon, France\"\n3,\n");
        let mut reader = CsvBatchReader::open(file.path()).unwrap();

        assert_eq!(
            drain(&mut reader),
            vec![
                vec!["1".to_string(), "Paris".to_string()],
                vec!["2".to_string(), "Lyon, France".to_string()],
                vec!["3".to_string(), String::new()],
            ]
        );
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn ragged_rows_are_passed_through() {
        let file = csv_file(b"1,Paris\n3,Berlin,extra\n4\n");
        let mut reader = CsvBatchReader::open(file.path()).unwrap();
        let lengths: Vec<usize> = drain(&mut reader).iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![2, 3, 1]);
    }

    #[test]
    fn unbalanced_quote_does_not_abort_the_stream() {
        let file = csv_file(b"1,Paris\n2,\"Lyon\n");
        let mut reader = CsvBatchReader::open(file.path()).unwrap();
        let rows = drain(&mut reader);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["1", "Paris"]);
        assert_eq!(rows[1][0], "2");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let file = csv_file(b"1,caf\xe9\n");
        let mut reader = CsvBatchReader::open(file.path()).unwrap();
        let row = reader.next_row().unwrap().unwrap();
        assert_eq!(row[1], "caf\u{FFFD}");
    }

    #[test]
    fn preview_and_count_rewind_the_stream() {
        let file = csv_file(b"a,1\nb,2\nc,3");
        let mut reader = CsvBatchReader::open(file.path()).unwrap();

        assert_eq!(reader.next_row().unwrap().unwrap(), vec!["a", "1"]);
        assert_eq!(reader.preview(2).unwrap().len(), 2);
        assert_eq!(reader.count_lines().unwrap(), 3);

        assert_eq!(drain(&mut reader).len(), 3);
    }

    #[test]
    fn rewind_after_reading_to_the_end_restarts_at_the_first_row() {
        let file = csv_file(b"a,1\nb,2\n");
        let mut reader = CsvBatchReader::open(file.path()).unwrap();

        assert_eq!(drain(&mut reader).len(), 2);
        reader.rewind().unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap(), vec!["a", "1"]);

        assert_eq!(reader.preview(1).unwrap(), vec![vec!["a", "1"]]);
        assert_eq!(reader.next_row().unwrap().unwrap(), vec!["a", "1"]);
        assert_eq!(reader.next_row().unwrap().unwrap(), vec!["b", "2"]);
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn line_count_handles_terminators() {
        let cases: [(&[u8], usize); 4] = [
            (b"", 0),
            (b"1,Paris\n2,Lyon\n", 2),
            (b"1,Paris\r\n2,Lyon", 2),
            (b"x\n\n", 2),
        ];

        for (contents, expected) in cases {
            let file = csv_file(contents);
            let mut reader = CsvBatchReader::open(file.path()).unwrap();
            assert_eq!(reader.count_lines().unwrap(), expected);
        }
    }
}
