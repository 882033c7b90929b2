//! Per-run CSV logs: one headered, semicolon-delimited file per component
//! per run.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

pub struct RunLog {
    file: File,
    path: PathBuf,
}

impl RunLog {
    /// Creates `<dir>/<component>-<YYYYMMDD-HHMMSS>.csv` and writes the
    /// header row.
    pub fn create(dir: &Path, component: &str, header: &[&str]) -> io::Result<RunLog> {
        fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("{component}-{stamp}.csv"));
        let mut file = File::create(&path)?;
        writeln!(file, "{}", header.join(";"))?;
        file.flush()?;
        Ok(RunLog { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row and flushes, so a crash never loses more than the
    /// current row.
    pub fn write_row(&mut self, columns: &[String]) -> io::Result<()> {
        writeln!(self.file, "{}", columns.join(";"))?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_headered_semicolon_file() {
        let dir = std::env::temp_dir().join(format!("rover-runlog-{}", std::process::id()));
        let mut log = RunLog::create(&dir, "fusion", &["ts", "lat", "lon"]).unwrap();
        log.write_row(&["1.0".into(), "50.0".into(), "14.0".into()])
            .unwrap();
        log.write_row(&["2.0".into(), "50.1".into(), "14.1".into()])
            .unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "ts;lat;lon");
        assert_eq!(lines[1], "1.0;50.0;14.0");
        assert_eq!(lines.len(), 3);

        fs::remove_dir_all(&dir).ok();
    }
}
