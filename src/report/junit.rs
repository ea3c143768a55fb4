//! JUnit XML report generation.
//!
//! Every job becomes one `<testcase>`: the mode is the class name and the
//! test id the case name, so CI dashboards group builds by mode.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" time="12.345">
//!   <testsuite name="rtbuild" tests="3" failures="1" errors="0" skipped="1" time="12.345">
//!     <testcase classname="host" name="001-HelloWorld" time="3.100"/>
//!     <testcase classname="host" name="002-sleep" time="4.200">
//!       <failure message="exit code 1" type="BuildFailure">javac: error ...</failure>
//!     </testcase>
//!     <testcase classname="jvm" name="001-HelloWorld" time="0.000">
//!       <skipped message="known build failure"/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! Jobs that had not reported when a fail-fast run stopped are not listed.

use std::path::PathBuf;

use async_trait::async_trait;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::Reporter;
use crate::job::{JobFailure, JobId, JobOutcome};
use crate::orchestrator::{Plan, RunReport};

/// Reporter that writes a JUnit XML file when the run completes.
///
/// Parent directories are created automatically if they don't exist.
pub struct JUnitReporter {
    output_path: PathBuf,
    testsuite_name: String,
}

impl JUnitReporter {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "rtbuild".to_string(),
        }
    }

    /// Sets the test suite name in the XML output. Default: `"rtbuild"`.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Generate JUnit XML content from a run report.
    pub fn generate_xml(&self, report: &RunReport) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let build_failures = report
            .failures
            .iter()
            .filter(|f| matches!(f, JobFailure::Build(_)))
            .count();
        let errors = report.failures.len() - build_failures;
        let skipped = report.skipped.len() + report.suppressed.len();
        let tests = report.completed.len() + errors + skipped;
        let time = format!("{:.3}", report.duration.as_secs_f64());

        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", tests.to_string().as_str()));
        testsuites.push_attribute(("failures", build_failures.to_string().as_str()));
        testsuites.push_attribute(("errors", errors.to_string().as_str()));
        testsuites.push_attribute(("time", time.as_str()));
        writer.write_event(Event::Start(testsuites))?;

        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", self.testsuite_name.as_str()));
        testsuite.push_attribute(("tests", tests.to_string().as_str()));
        testsuite.push_attribute(("failures", build_failures.to_string().as_str()));
        testsuite.push_attribute(("errors", errors.to_string().as_str()));
        testsuite.push_attribute(("skipped", skipped.to_string().as_str()));
        testsuite.push_attribute(("time", time.as_str()));
        testsuite.push_attribute((
            "timestamp",
            report.started_at.format("%Y-%m-%dT%H:%M:%S").to_string().as_str(),
        ));
        writer.write_event(Event::Start(testsuite))?;

        for result in &report.completed {
            let time = result.duration.as_secs_f64();
            if result.success() {
                writer.write_event(Event::Empty(testcase(&result.job, time)))?;
            } else {
                let message = format!("exit code {}", result.exit_code);
                write_child(&mut writer, &result.job, time, "failure", &message, Some(&result.output))?;
            }
        }

        for failure in &report.failures {
            if matches!(failure, JobFailure::Build(_)) {
                continue;
            }
            write_child(
                &mut writer,
                failure.job(),
                0.0,
                "error",
                &failure.to_string(),
                None,
            )?;
        }

        for job in &report.skipped {
            write_child(&mut writer, job, 0.0, "skipped", "known build failure", None)?;
        }
        for job in &report.suppressed {
            write_child(&mut writer, job, 0.0, "skipped", "an earlier mode failed", None)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        Ok(String::from_utf8(writer.into_inner())?)
    }
}

fn testcase(job: &JobId, time: f64) -> BytesStart<'static> {
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", job.mode.as_str()));
    testcase.push_attribute(("name", job.test.as_str()));
    testcase.push_attribute(("time", format!("{:.3}", time).as_str()));
    testcase
}

/// Writes a `<testcase>` holding one `<failure>`, `<error>` or `<skipped>`.
fn write_child<W: std::io::Write>(
    writer: &mut Writer<W>,
    job: &JobId,
    time: f64,
    kind: &str,
    message: &str,
    body: Option<&str>,
) -> anyhow::Result<()> {
    writer.write_event(Event::Start(testcase(job, time)))?;

    let mut child = BytesStart::new(kind);
    child.push_attribute(("message", sanitize(message).as_str()));
    match kind {
        "failure" => child.push_attribute(("type", "BuildFailure")),
        "error" => child.push_attribute(("type", "Error")),
        _ => {}
    }

    match body {
        Some(text) => {
            writer.write_event(Event::Start(child))?;
            writer.write_event(Event::Text(BytesText::new(&sanitize(text))))?;
            writer.write_event(Event::End(BytesEnd::new(kind)))?;
        }
        None => writer.write_event(Event::Empty(child))?,
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Drops characters that XML 1.0 cannot represent. Escaping is done by the
/// writer.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}

#[async_trait]
impl Reporter for JUnitReporter {
    async fn on_plan(&self, _plan: &Plan) {}

    async fn on_job_start(&self, _job: &JobId) {}

    async fn on_job_complete(&self, _outcome: &JobOutcome) {}

    async fn on_run_complete(&self, report: &RunReport) {
        match self.generate_xml(report) {
            Ok(xml) => {
                if let Some(parent) = self.output_path.parent()
                    && !parent.as_os_str().is_empty()
                    && !parent.exists()
                    && let Err(e) = std::fs::create_dir_all(parent)
                {
                    tracing::error!("Failed to create output directory: {}", e);
                    return;
                }

                if let Err(e) = std::fs::write(&self.output_path, xml) {
                    tracing::error!("Failed to write JUnit XML: {}", e);
                } else {
                    tracing::info!("JUnit XML written to: {}", self.output_path.display());
                }
            }
            Err(e) => {
                tracing::error!("Failed to generate JUnit XML: {}", e);
            }
        }
    }
}
