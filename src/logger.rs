use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Prints progress to stdout and mirrors every line into a log file.
///
/// Shared by reference across the batch workers, so the sink sits behind a mutex.
pub struct Logger {
    sink: Mutex<Box<dyn Write + Send>>,
    echo: bool,
}

impl Logger {
    /// Open (or create) `path` in append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file: File = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            sink: Mutex::new(Box::new(file)),
            echo: true,
        })
    }

    /// Log into an arbitrary writer without echoing to stdout.
    pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Box::new(writer)),
            echo: false,
        }
    }

    /// A logger that discards everything.
    pub fn silent() -> Self {
        Self::to_writer(io::sink())
    }

    pub fn step(&self, message: &str) {
        self.line(&format!("[STEP] {message}"));
    }

    pub fn info(&self, message: &str) {
        self.line(&format!("  -> {message}"));
    }

    pub fn setting(&self, message: &str) {
        self.line(&format!("[LOG] {message}"));
    }

    pub fn error(&self, message: &str) {
        if self.echo {
            eprintln!("ERROR: {message}");
        }
        self.write_line(&format!("ERROR: {message}"));
    }

    fn line(&self, message: &str) {
        if self.echo {
            println!("{message}");
        }
        self.write_line(message);
    }

    // A failed log write must not abort a protein's run.
    fn write_line(&self, message: &str) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        if let Ok(mut sink) = self.sink.lock() {
            let _ = writeln!(sink, "[{timestamp}] {message}");
            let _ = sink.flush();
        }
    }
}

pub const BYTES_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";
pub const COUNT_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta})";

/// Progress bar in the house style; falls back to the default bar if the
/// template is rejected.
pub fn progress_bar(len: u64, template: &str) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(template)
        .map(|s| s.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn prefixes_and_timestamps_each_line() {
        let buffer = Shared::default();
        let logger = Logger::to_writer(buffer.clone());
        logger.step("Parsing variant table");
        logger.info("Parsed 3 records");
        logger.error("P12345: no data");

        let text = String::from_utf8(buffer.0.lock().expect("lock").clone()).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("[STEP] Parsing variant table"));
        assert!(lines[1].ends_with("  -> Parsed 3 records"));
        assert!(lines[2].ends_with("ERROR: P12345: no data"));
    }
}
