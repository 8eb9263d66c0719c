use std::fs::File;
use std::io::Write;
use std::path::Path;

use error_stack::{Report, ResultExt};

use crate::aggregate::NodeStat;
use crate::error::{MigrationError, Result};

/// Output columns, in `NodeStat` field order.
pub const COLUMNS: [&str; 16] = [
    "reach_id", "node_id",
    "ADiff", "EDiff", "t1_mask", "t2_mask", "t1_bankLen", "t2_bankLen",
    "noisyADiff", "noisyEDiff", "ARate", "ERate",
    "ADir", "ADirR", "EDir", "EDirR",
];

/// Destination of per-node records.
pub trait RecordSink: Send {
    fn write_rows(&mut self, rows: &[NodeStat]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Comma separated rows with a header line.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    pub rows_written: usize,
}

impl CsvSink<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .change_context(MigrationError::Io)
            .attach_printable_lazy(|| format!("creating {}", path.display()))?;
        CsvSink::new(file)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(COLUMNS)
            .change_context(MigrationError::Io)?;
        Ok(CsvSink { writer, rows_written: 0 })
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner()
            .map_err(|e| Report::new(MigrationError::Io)
                .attach_printable(format!("flushing csv output: {}", e.error())))
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn write_rows(&mut self, rows: &[NodeStat]) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)
                .change_context(MigrationError::Io)
                .attach_printable_lazy(|| format!("node {} of reach {}", row.node_id, row.reach_id))?;
        }
        self.rows_written += rows.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().change_context(MigrationError::Io)
    }
}

/// Keeps rows in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<NodeStat>,
}

impl RecordSink for MemorySink {
    fn write_rows(&mut self, rows: &[NodeStat]) -> Result<()> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_sentinel_row() {
        let mut sink = CsvSink::new(Vec::new()).unwrap();
        sink.write_rows(&[NodeStat::sentinel(7, 42)]).unwrap();
        assert_eq!(sink.rows_written, 1);
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "7,42,-1.0,-1.0,-1.0,-1.0,-1.0,-1.0,-1.0,-1.0,-1.0,-1.0,-9999.0,-1.0,-9999.0,-1.0");
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_header_written_without_rows() {
        let sink = CsvSink::new(Vec::new()).unwrap();
        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(text.trim_end(), COLUMNS.join(","));
    }

    #[test]
    fn test_rows_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.csv");
        let mut row = NodeStat::sentinel(1, 2);
        row.a_diff = 1800.0;
        row.a_dir = -1.5707963;
        {
            let mut sink = CsvSink::create(&path).unwrap();
            sink.write_rows(&[row.clone(), NodeStat::sentinel(1, 3)]).unwrap();
            sink.flush().unwrap();
        }
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let back: Vec<NodeStat> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(back, vec![row, NodeStat::sentinel(1, 3)]);
    }
}
