//! Run timestamp formatting and report file writing.

use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Formats a timestamp as `YYYYMMDD_HHMMSS`, the run directory name.
#[must_use]
pub fn compact_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Returns the `HHMMSS` suffix used to make resource names unique.
#[must_use]
pub fn time_of_day_suffix(at: &DateTime<Utc>) -> String {
    at.format("%H%M%S").to_string()
}

/// Writes `contents` to `path` through a sibling temporary file and a rename,
/// so readers never observe a half-written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_compact_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 2, 20, 14, 5, 9).unwrap();
        assert_eq!(compact_timestamp(&at), "20260220_140509");
        assert_eq!(time_of_day_suffix(&at), "140509");
    }

    #[tokio::test]
    async fn test_write_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        write_atomic(&path, b"{\"a\":1}").await.unwrap();
        write_atomic(&path, b"{\"a\":2}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":2}");
        assert!(!dir.path().join("report.tmp").exists());
    }
}
