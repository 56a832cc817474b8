//! Plain text readers and writers for responses, angles, and result tables.
use std::fs;
use std::io;
use std::io::prelude::*;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::pipeline::{ChunkSink, ResponseMatrix};
use crate::table::{chunk_file_stem, ResultTable};

fn parse_values(line: &str, line_number: usize) -> io::Result<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Line {line_number}: could not parse {token:?} as a number: {e}"),
                )
            })
        })
        .collect()
}

fn content_lines<R: BufRead>(reader: R) -> impl Iterator<Item = io::Result<(usize, String)>> {
    reader
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|l| (i + 1, l)))
        .filter(|res| match res {
            Ok((_, line)) => {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            }
            Err(_) => true,
        })
}

/// Read a neurons-by-trials response matrix, one whitespace separated row per neuron.
///
/// Blank lines and lines starting with `#` are ignored.
pub fn read_response_matrix<R: BufRead>(reader: R) -> io::Result<ResponseMatrix> {
    let mut rows = Vec::new();
    for line in content_lines(reader) {
        let (line_number, line) = line?;
        rows.push(parse_values(&line, line_number)?);
    }
    ResponseMatrix::from_rows(&rows)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Read stimulus angles in radians, in any whitespace separated layout
pub fn read_angles<R: BufRead>(reader: R) -> io::Result<Vec<f64>> {
    let mut angles = Vec::new();
    for line in content_lines(reader) {
        let (line_number, line) = line?;
        angles.extend(parse_values(&line, line_number)?);
    }
    Ok(angles)
}

pub fn load_response_matrix<P: AsRef<Path>>(path: P) -> io::Result<ResponseMatrix> {
    let reader = io::BufReader::new(fs::File::open(path)?);
    read_response_matrix(reader)
}

pub fn load_angles<P: AsRef<Path>>(path: P) -> io::Result<Vec<f64>> {
    let reader = io::BufReader::new(fs::File::open(path)?);
    read_angles(reader)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Run `write` against a staging file next to `path`, then link the finished
/// file to `path`. The staging file is always removed, and `path` is never
/// replaced if it already exists.
fn write_new_file<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut io::BufWriter<fs::File>) -> io::Result<()>,
{
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    let staging = staging_path(path);
    let result = fs::File::create(&staging)
        .and_then(|file| {
            let mut writer = io::BufWriter::new(file);
            write(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()
        })
        .and_then(|()| fs::hard_link(&staging, path));
    if let Err(err) = fs::remove_file(&staging) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {err}", staging.display());
        }
    }
    result
}

/// Write `table` to a new file at `path`, refusing to replace an existing file.
///
/// A write that fails part way leaves nothing at `path`.
pub fn to_file<P: AsRef<Path>>(table: &ResultTable, path: P) -> io::Result<()> {
    write_new_file(path.as_ref(), |writer| table.write_tsv(writer))
}

/// Persist each chunk as `<directory>/fitted_params_neurons_<start>-<end>.tsv`.
///
/// Files are only ever created, never overwritten, and a chunk whose file already
/// exists counts as persisted.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    directory: PathBuf,
}

impl DirectorySink {
    /// Use `directory`, creating it if needed
    pub fn new<P: AsRef<Path>>(directory: P) -> io::Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, range: &Range<usize>) -> PathBuf {
        self.directory
            .join(format!("{}.tsv", chunk_file_stem(range)))
    }
}

impl ChunkSink for DirectorySink {
    fn is_persisted(&self, range: &Range<usize>) -> bool {
        self.path_for(range).exists()
    }

    fn persist(&mut self, table: &ResultTable) -> io::Result<()> {
        let path = self.path_for(&table.neuron_range());
        log::debug!("Writing {}", path.display());
        to_file(table, path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arrayops::angle_grid;
    use crate::pipeline::{BatchDriver, TuningPipeline};
    use crate::table::{FitRecord, FitStatus};

    #[test]
    fn test_read_response_matrix() {
        let text = "# neurons by trials\n1 2 3\n\n4\t5\t6\n";
        let matrix = read_response_matrix(text.as_bytes()).unwrap();
        assert_eq!(matrix.shape(), (2, 3));
        assert_eq!(matrix.row(1), &[4.0, 5.0, 6.0]);

        let err = read_response_matrix("1 2 3\n4 5\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err = read_response_matrix("1 x 3\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Line 1"), "{err}");
    }

    #[test]
    fn test_read_angles() {
        let angles = read_angles("0.0 0.5\n1.0\n# done\n".as_bytes()).unwrap();
        assert_eq!(angles, vec![0.0, 0.5, 1.0]);
    }

    #[test_log::test]
    fn test_directory_sink_never_overwrites() {
        let dir = std::env::temp_dir().join(format!("vmtuning-sink-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut sink = DirectorySink::new(&dir).unwrap();

        let table = ResultTable::new(10, vec![FitRecord::failed(FitStatus::FitFailure, 0); 2]);
        assert!(!sink.is_persisted(&(10..12)));
        sink.persist(&table).unwrap();
        assert!(sink.is_persisted(&(10..12)));
        assert!(dir.join("fitted_params_neurons_10-12.tsv").exists());

        let err = sink.persist(&table).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let text = fs::read_to_string(sink.path_for(&(10..12))).unwrap();
        assert_eq!(text.lines().count(), 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test_log::test]
    fn test_failed_write_leaves_no_chunk() {
        let dir = std::env::temp_dir().join(format!("vmtuning-partial-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut sink = DirectorySink::new(&dir).unwrap();
        let path = sink.path_for(&(0..2));

        let err = write_new_file(&path, |writer| {
            writer.write_all(b"A0\tA1")?;
            writer.flush()?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(!path.exists());
        assert!(!staging_path(&path).exists());
        assert!(!sink.is_persisted(&(0..2)));

        // A staging file left behind by a crash does not count as persisted
        fs::write(staging_path(&path), "A0").unwrap();
        assert!(!sink.is_persisted(&(0..2)));

        let table = ResultTable::new(0, vec![FitRecord::failed(FitStatus::FitFailure, 0); 2]);
        sink.persist(&table).unwrap();
        assert!(sink.is_persisted(&(0..2)));
        assert!(!staging_path(&path).exists());
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_run_into_directory() {
        let dir = std::env::temp_dir().join(format!("vmtuning-run-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let mut sink = DirectorySink::new(&dir).unwrap();

        let angles = angle_grid(16);
        let rows: Vec<Vec<f64>> = (0..5)
            .map(|i| angles.iter().map(|t| 1.0 + (t - i as f64).cos()).collect())
            .collect();
        let matrix = ResponseMatrix::from_rows(&rows).unwrap();
        let driver = BatchDriver::new(TuningPipeline::default(), 2);
        let summary = driver.run(&matrix, &angles, &mut sink).unwrap();
        assert_eq!(summary.chunks_written, 3);

        for stem in ["0-2", "2-4", "4-5"] {
            let path = dir.join(format!("fitted_params_neurons_{stem}.tsv"));
            assert!(path.exists(), "{} is missing", path.display());
        }

        let summary = driver.run(&matrix, &angles, &mut sink).unwrap();
        assert_eq!(summary.chunks_skipped, 3);
        fs::remove_dir_all(&dir).unwrap();
    }
}
