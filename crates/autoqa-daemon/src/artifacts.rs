//! CI artifact selection and report extraction.
//!
//! GitHub Actions hands artifacts out as zip archives. A run can upload
//! many; only those whose name mentions a report keyword are downloaded, and
//! only their `*.xml` members are ingested.

use std::io::{Cursor, Read};

use autoqa_core::forge::Artifact;
use autoqa_core::ingest::INGEST_CLASSNAME;
use autoqa_core::model::{OutcomeStatus, TestOutcome};
use thiserror::Error;

/// Artifact names containing any of these (case-insensitive) are treated as
/// test reports.
pub const REPORT_ARTIFACT_KEYWORDS: &[&str] = &["autoqa", "test-report", "junit"];

/// Largest uncompressed report member accepted.
pub const MAX_REPORT_BYTES: u64 = 32 * 1024 * 1024;

/// Name of the synthetic outcome for an unreadable artifact archive.
pub const ARCHIVE_ERROR_NAME: &str = "artifact_archive_error";

/// Why an artifact archive could not be read.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArtifactError {
    /// The archive is not a readable zip file.
    #[error("artifact is not a readable zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A member could not be read.
    #[error("failed to read archive member {name}: {source}")]
    Member {
        /// Member path.
        name: String,
        /// Read failure.
        #[source]
        source: std::io::Error,
    },

    /// A member exceeds [`MAX_REPORT_BYTES`].
    #[error("archive member {name} is {size} bytes, over the {max} byte limit")]
    TooLarge {
        /// Member path.
        name: String,
        /// Uncompressed size.
        size: u64,
        /// Limit.
        max: u64,
    },
}

/// Whether `artifact` should be downloaded as a test report.
#[must_use]
pub fn is_report_artifact(artifact: &Artifact) -> bool {
    if artifact.expired {
        return false;
    }
    let name = artifact.name.to_ascii_lowercase();
    REPORT_ARTIFACT_KEYWORDS
        .iter()
        .any(|keyword| name.contains(keyword))
}

/// Extracts every `*.xml` member of a zip archive, in archive order.
///
/// # Errors
///
/// Returns an error if the archive or one of its XML members cannot be read,
/// or a member is larger than [`MAX_REPORT_BYTES`].
pub fn extract_reports(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ArtifactError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut reports = Vec::new();
    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let name = member.name().to_string();
        if member.is_dir() || !name.to_ascii_lowercase().ends_with(".xml") {
            continue;
        }
        if member.size() > MAX_REPORT_BYTES {
            return Err(ArtifactError::TooLarge {
                name,
                size: member.size(),
                max: MAX_REPORT_BYTES,
            });
        }

        let mut content = Vec::new();
        // The declared size can lie; never read past the limit.
        if let Err(source) = (&mut member)
            .take(MAX_REPORT_BYTES + 1)
            .read_to_end(&mut content)
        {
            return Err(ArtifactError::Member { name, source });
        }
        if content.len() as u64 > MAX_REPORT_BYTES {
            return Err(ArtifactError::TooLarge {
                name,
                size: content.len() as u64,
                max: MAX_REPORT_BYTES,
            });
        }
        reports.push((name, content));
    }
    Ok(reports)
}

/// Synthetic outcome for an artifact whose archive could not be read.
#[must_use]
pub fn archive_error_outcome(artifact_name: &str, error: &ArtifactError) -> TestOutcome {
    TestOutcome::new(
        format!("{INGEST_CLASSNAME}/{artifact_name}"),
        ARCHIVE_ERROR_NAME,
        OutcomeStatus::Error,
    )
    .with_message(error.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use autoqa_core::ingest::is_ingest_diagnostic;
    use zip::write::SimpleFileOptions;

    use super::*;

    fn zip_of(members: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn artifact(name: &str, expired: bool) -> Artifact {
        Artifact {
            id: 1,
            name: name.to_string(),
            size_in_bytes: 10,
            expired,
        }
    }

    #[test]
    fn test_report_artifact_selection() {
        assert!(is_report_artifact(&artifact("AutoQA-results", false)));
        assert!(is_report_artifact(&artifact("junit-linux", false)));
        assert!(is_report_artifact(&artifact("test-report", false)));
        assert!(!is_report_artifact(&artifact("coverage", false)));
        assert!(!is_report_artifact(&artifact("junit-linux", true)));
    }

    #[test]
    fn test_extracts_only_xml_members() {
        let bytes = zip_of(&[
            ("reports/unit.xml", "<testsuite/>"),
            ("reports/coverage.lcov", "TN:"),
            ("E2E.XML", "<testsuites/>"),
        ]);
        let reports = extract_reports(&bytes).unwrap();
        let names: Vec<&str> = reports.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["reports/unit.xml", "E2E.XML"]);
        assert_eq!(reports[0].1, b"<testsuite/>");
    }

    #[test]
    fn test_unreadable_archive_becomes_diagnostic() {
        let error = extract_reports(b"not a zip").unwrap_err();
        assert!(matches!(error, ArtifactError::Archive(_)));

        let outcome = archive_error_outcome("junit", &error);
        assert!(is_ingest_diagnostic(&outcome));
        assert_eq!(outcome.key.classname, "autoqa.ingest/junit");
        assert!(outcome.failure_message.is_some());
    }
}
