use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;

/// Logs a message to a file with timestamp
///
/// # Arguments
///
/// * `log_dir` - Directory for log files, created if missing
/// * `filename` - The name of the log file inside `log_dir`
/// * `message` - The message to log
///
/// # Returns
///
/// * `io::Result<()>` - Success or error result
pub fn log_to_file(log_dir: &Path, filename: &str, message: &str) -> io::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(filename))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

    writeln!(file, "\n--- Log entry at {} ---", timestamp)?;
    writeln!(file, "{}", message)?;
    writeln!(file, "--- End of entry ---\n")?;

    file.flush()?;

    Ok(())
}

/// Logs a message to a file with a detailed formatted header
///
/// # Arguments
///
/// * `log_dir` - Directory for log files
/// * `filename` - The name of the log file
/// * `header` - A descriptive header for this log entry
/// * `message` - The message to log
pub fn log_with_header(log_dir: &Path, filename: &str, header: &str, message: &str) -> io::Result<()> {
    let formatted_message = format!(
        "===== {} =====\n{}\n====================",
        header, message
    );
    log_to_file(log_dir, filename, &formatted_message)
}

/// Appends a row to a CSV file, writing headers if the file is new
///
/// # Arguments
///
/// * `log_dir` - Directory for log files
/// * `filename` - The name of the CSV file
/// * `headers` - Column headers (only written if file is new)
/// * `data` - Row of data to append
pub fn log_csv(log_dir: &Path, filename: &str, headers: &[&str], data: &[&str]) -> io::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let path = log_dir.join(filename);
    let file_exists = path.exists();

    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut writer = csv::Writer::from_writer(file);

    if !file_exists && !headers.is_empty() {
        writer.write_record(headers).map_err(io::Error::from)?;
    }
    writer.write_record(data).map_err(io::Error::from)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        log_csv(&logs, "run.csv", &["channel", "spikes"], &["A-000", "12"]).unwrap();
        log_csv(&logs, "run.csv", &["channel", "spikes"], &["A-001", "3"]).unwrap();

        let text = std::fs::read_to_string(logs.join("run.csv")).unwrap();
        assert_eq!(text, "channel,spikes\nA-000,12\nA-001,3\n");
    }

    #[test]
    fn entries_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        log_with_header(dir.path(), "run.log", "Session", "first").unwrap();
        log_to_file(dir.path(), "run.log", "second").unwrap();

        let text = std::fs::read_to_string(dir.path().join("run.log")).unwrap();
        assert!(text.contains("===== Session =====\nfirst"));
        assert!(text.find("first").unwrap() < text.find("second").unwrap());
        assert_eq!(text.matches("--- Log entry at").count(), 2);
    }
}
