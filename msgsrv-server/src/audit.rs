//! Login audit log.
//!
//! One tab-separated line per successful connect. Failing to write is logged
//! and otherwise ignored; it never affects the connection.

use std::io;
use std::path::Path;

use chrono::{DateTime, Local};
use msgsrv_common::flag;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Fields recorded for one login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub name: String,
    pub db_host: String,
    pub db_name: String,
    pub ssl: bool,
    pub version: u32,
}

impl LoginRecord {
    /// `timestamp \t name \t dbHost \t dbName \t ssl \t version \n`
    pub fn to_line(&self, at: DateTime<Local>) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            at.format("%Y-%m-%d %H:%M:%S"),
            self.name,
            self.db_host,
            self.db_name,
            flag(self.ssl),
            self.version
        )
    }
}

/// Appends `record` to `path`, swallowing any error.
pub async fn append(path: &Path, record: &LoginRecord) {
    let line = record.to_line(Local::now());
    if let Err(err) = write_line(path, &line).await {
        warn!(path = %path.display(), %err, "failed to write login log");
    }
}

async fn write_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> LoginRecord {
        LoginRecord {
            name: "Alice".into(),
            db_host: "H".into(),
            db_name: "N".into(),
            ssl: true,
            version: 320,
        }
    }

    #[test]
    fn formats_tab_separated_line() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 9, 8, 7).unwrap();
        assert_eq!(
            record().to_line(at),
            "2024-03-05 09:08:07\tAlice\tH\tN\tTRUE\t320\n"
        );
    }

    #[tokio::test]
    async fn appends_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logins.txt");
        append(&path, &record()).await;
        append(&path, &record()).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().all(|l| l.ends_with("\tAlice\tH\tN\tTRUE\t320")));
    }

    #[tokio::test]
    async fn unwritable_path_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending.
        append(dir.path(), &record()).await;
    }
}
