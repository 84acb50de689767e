//! JUnit XML test reports to normalized outcomes.
//!
//! Ingestion is total: [`ingest_report`] and [`ingest_reports`] never fail.
//! A report that cannot be read becomes one synthetic outcome with status
//! [`OutcomeStatus::Error`] and a diagnostic message, so a broken CI artifact
//! shows up in the compliance report instead of aborting it.
//!
//! # Classification
//!
//! ```text
//! <testcase>                      -> passed
//! <testcase><skipped/>            -> skipped
//! <testcase><failure message=..>  -> failed (message captured)
//! <testcase><error>text</error>   -> failed (text captured)
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};
use thiserror::Error;

use crate::model::{CiRunResults, MatchKey, OutcomeStatus, TestOutcome};

/// Classname of synthetic outcomes produced by ingestion itself.
pub const INGEST_CLASSNAME: &str = "autoqa.ingest";

/// Name of the synthetic outcome for an unreadable report.
pub const PARSE_ERROR_NAME: &str = "report_parse_error";

/// Name of the synthetic outcome for a run without any report.
pub const MISSING_REPORT_NAME: &str = "missing_report";

/// `<property>` names whose values are explicit manifest or checklist ids.
pub const EXPLICIT_ID_PROPERTIES: &[&str] = &["autoqa_id", "autoqa.id", "test_id", "checklist_id"];

/// Why a report could not be parsed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IngestError {
    /// The report is not UTF-8.
    #[error("report is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// The report is not well-formed XML.
    #[error("report is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The document is XML but not a JUnit report.
    #[error("unrecognized report root <{root}> without test cases")]
    UnrecognizedRoot {
        /// Root element name.
        root: String,
    },
}

/// Parses one JUnit XML report.
///
/// Roots may be `<testsuites>`, `<testsuite>`, or any element with
/// `<testcase>` descendants. A recognized report without test cases yields
/// an empty list. Duplicate match keys are kept; see [`collapse_duplicates`].
///
/// # Errors
///
/// Returns an error when the bytes are not a readable JUnit document.
pub fn parse_junit(bytes: &[u8]) -> Result<Vec<TestOutcome>, IngestError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let document = Document::parse(text)?;
    let root = document.root_element();

    let outcomes: Vec<TestOutcome> = root
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == "testcase")
        .map(parse_case)
        .collect();

    let root_name = root.tag_name().name();
    if outcomes.is_empty() && root_name != "testsuites" && root_name != "testsuite" {
        return Err(IngestError::UnrecognizedRoot {
            root: root_name.to_string(),
        });
    }
    Ok(outcomes)
}

fn parse_case(case: Node<'_, '_>) -> TestOutcome {
    let classname = case
        .attribute("classname")
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| enclosing_suite_name(case))
        .unwrap_or_default();
    let name = case.attribute("name").unwrap_or_default();

    let mut outcome = TestOutcome::new(classname, name, OutcomeStatus::Passed);
    outcome.duration_secs = case
        .attribute("time")
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0);

    let mut skipped = false;
    for child in case.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "failure" | "error" if !outcome.status.is_failure() => {
                outcome.status = OutcomeStatus::Failed;
                outcome.failure_message = marker_message(child);
            },
            "skipped" => skipped = true,
            "properties" => collect_explicit_ids(child, &mut outcome.explicit_ids),
            _ => {},
        }
    }
    if skipped && !outcome.status.is_failure() {
        outcome.status = OutcomeStatus::Skipped;
    }
    outcome
}

fn enclosing_suite_name(case: Node<'_, '_>) -> Option<String> {
    case.ancestors()
        .filter(|node| node.is_element() && node.tag_name().name() == "testsuite")
        .find_map(|suite| suite.attribute("name").filter(|name| !name.is_empty()))
        .map(str::to_string)
}

fn marker_message(marker: Node<'_, '_>) -> Option<String> {
    marker
        .attribute("message")
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
        .or_else(|| {
            let text: String = marker
                .descendants()
                .filter(Node::is_text)
                .filter_map(|node| node.text())
                .collect();
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
}

fn collect_explicit_ids(properties: Node<'_, '_>, ids: &mut Vec<String>) {
    for property in properties
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "property")
    {
        let Some(name) = property.attribute("name") else {
            continue;
        };
        if !EXPLICIT_ID_PROPERTIES.contains(&name) {
            continue;
        }
        let value = property
            .attribute("value")
            .or_else(|| property.text())
            .unwrap_or_default();
        for id in value.split(|c: char| c == ',' || c.is_whitespace()) {
            let id = id.trim();
            if !id.is_empty() && !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
    }
}

/// Keeps one outcome per match key: the last occurrence, at the position of
/// the first.
#[must_use]
pub fn collapse_duplicates(outcomes: Vec<TestOutcome>) -> Vec<TestOutcome> {
    let mut positions: HashMap<MatchKey, usize> = HashMap::new();
    let mut collapsed: Vec<TestOutcome> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        if let Some(&position) = positions.get(&outcome.key) {
            collapsed[position] = outcome;
        } else {
            positions.insert(outcome.key.clone(), collapsed.len());
            collapsed.push(outcome);
        }
    }
    collapsed
}

/// Synthetic outcome for a report that could not be read.
#[must_use]
pub fn parse_error_outcome(source: Option<&str>, error: &IngestError) -> TestOutcome {
    let classname = source.map_or_else(
        || INGEST_CLASSNAME.to_string(),
        |source| format!("{INGEST_CLASSNAME}/{source}"),
    );
    TestOutcome::new(classname, PARSE_ERROR_NAME, OutcomeStatus::Error)
        .with_message(error.to_string())
}

/// Synthetic outcome for a CI run that produced no report.
#[must_use]
pub fn missing_report_outcome(detail: &str) -> TestOutcome {
    TestOutcome::new(INGEST_CLASSNAME, MISSING_REPORT_NAME, OutcomeStatus::Error)
        .with_message(detail)
}

/// Whether an outcome was synthesized by ingestion rather than reported.
#[must_use]
pub fn is_ingest_diagnostic(outcome: &TestOutcome) -> bool {
    outcome.status == OutcomeStatus::Error
        && (outcome.key.classname == INGEST_CLASSNAME
            || outcome
                .key
                .classname
                .starts_with(&format!("{INGEST_CLASSNAME}/")))
}

/// Ingests one report; never fails.
#[must_use]
pub fn ingest_report(bytes: &[u8]) -> Vec<TestOutcome> {
    match parse_junit(bytes) {
        Ok(outcomes) => collapse_duplicates(outcomes),
        Err(error) => {
            tracing::warn!(error = %error, "unreadable test report");
            vec![parse_error_outcome(None, &error)]
        },
    }
}

/// Ingests every report file of one CI run together; never fails.
///
/// Each unreadable file contributes its own synthetic error outcome.
/// Duplicates are collapsed across files in the order given.
#[must_use]
pub fn ingest_reports<'a, I>(reports: I) -> Vec<TestOutcome>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut outcomes = Vec::new();
    let mut files = 0usize;
    for (source, bytes) in reports {
        files += 1;
        match parse_junit(bytes) {
            Ok(parsed) => outcomes.extend(parsed),
            Err(error) => {
                tracing::warn!(source, error = %error, "unreadable test report");
                outcomes.push(parse_error_outcome(Some(source), &error));
            },
        }
    }
    if files == 0 {
        outcomes.push(missing_report_outcome("no test report artifact"));
    }
    collapse_duplicates(outcomes)
}

/// Binds ingested outcomes to the head commit they ran against.
#[must_use]
pub fn bind_results(
    repo: &str,
    pr_number: u64,
    head_commit: &str,
    run_id: Option<u64>,
    outcomes: Vec<TestOutcome>,
    ingested_at: DateTime<Utc>,
) -> CiRunResults {
    CiRunResults {
        repo: repo.to_string(),
        pr_number,
        head_commit: head_commit.to_string(),
        run_id,
        outcomes,
        ingested_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
  <testsuite name="signup" tests="4">
    <testcase classname="signup.spec" name="test_confirmSignup_autoqa" time="0.25"/>
    <testcase name="rejects bad email" time="n/a">
      <failure message="expected 400" type="AssertionError">stack</failure>
    </testcase>
    <testcase classname="signup.spec" name="crashes">
      <error>Boom
      </error>
    </testcase>
    <testcase classname="signup.spec" name="later">
      <skipped message="flaky"/>
    </testcase>
  </testsuite>
</testsuites>
"#;

    #[test]
    fn test_classifies_cases() {
        let outcomes = parse_junit(REPORT.as_bytes()).unwrap();
        assert_eq!(outcomes.len(), 4);

        assert_eq!(outcomes[0].key, MatchKey::new("signup.spec", "test_confirmSignup_autoqa"));
        assert_eq!(outcomes[0].status, OutcomeStatus::Passed);
        assert_eq!(outcomes[0].duration_secs, Some(0.25));

        assert_eq!(outcomes[1].key.classname, "signup");
        assert_eq!(outcomes[1].status, OutcomeStatus::Failed);
        assert_eq!(outcomes[1].failure_message.as_deref(), Some("expected 400"));
        assert_eq!(outcomes[1].duration_secs, None);

        assert_eq!(outcomes[2].status, OutcomeStatus::Failed);
        assert_eq!(outcomes[2].failure_message.as_deref(), Some("Boom"));

        assert_eq!(outcomes[3].status, OutcomeStatus::Skipped);
        assert_eq!(outcomes[3].failure_message, None);
    }

    #[test]
    fn test_single_suite_root_and_properties() {
        let report = r#"<testsuite name="s">
  <testcase name="covers login">
    <properties>
      <property name="autoqa_id" value="T3, C1"/>
      <property name="owner" value="T9"/>
    </properties>
  </testcase>
</testsuite>"#;
        let outcomes = parse_junit(report.as_bytes()).unwrap();
        assert_eq!(outcomes[0].explicit_ids, vec!["T3", "C1"]);
    }

    #[test]
    fn test_empty_suite_is_not_an_error() {
        assert!(parse_junit(b"<testsuites/>").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_report_yields_synthetic_error() {
        let outcomes = ingest_report(b"<testsuite><testcase name=\"x\">");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].key, MatchKey::new(INGEST_CLASSNAME, PARSE_ERROR_NAME));
        assert_eq!(outcomes[0].status, OutcomeStatus::Error);
        assert!(outcomes[0].failure_message.is_some());
        assert!(is_ingest_diagnostic(&outcomes[0]));

        let outcomes = ingest_report(b"<html><body/></html>");
        assert!(
            outcomes[0]
                .failure_message
                .as_deref()
                .unwrap()
                .contains("<html>")
        );
        assert!(is_ingest_diagnostic(&ingest_report(&[0xff, 0xfe])[0]));
    }

    #[test]
    fn test_duplicates_collapse_to_last_at_first_position() {
        let report = r#"<testsuite name="s">
  <testcase name="a"><failure/></testcase>
  <testcase name="b"/>
  <testcase name="a"/>
</testsuite>"#;
        let outcomes = ingest_report(report.as_bytes());
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].name(), "a");
        assert_eq!(outcomes[0].status, OutcomeStatus::Passed);
        assert_eq!(outcomes[1].name(), "b");
    }

    #[test]
    fn test_multiple_reports_and_missing() {
        let good = br#"<testsuite name="s"><testcase name="a"/></testsuite>"#;
        let outcomes = ingest_reports([
            ("unit.xml", good.as_slice()),
            ("broken.xml", b"<oops".as_slice()),
        ]);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].key.classname, "autoqa.ingest/broken.xml");
        assert!(is_ingest_diagnostic(&outcomes[1]));

        let outcomes = ingest_reports(std::iter::empty::<(&str, &[u8])>());
        assert_eq!(outcomes[0].name(), MISSING_REPORT_NAME);
        assert!(is_ingest_diagnostic(&outcomes[0]));
    }

    #[test]
    fn test_reported_error_status_is_not_diagnostic() {
        let outcome = TestOutcome::new(INGEST_CLASSNAME, "x", OutcomeStatus::Failed);
        assert!(!is_ingest_diagnostic(&outcome));
    }
}
