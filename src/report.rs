//! Run reporting.
//!
//! Reporters observe a run through four events: the plan, each job start,
//! each job outcome (in completion order) and the final [`RunReport`].

pub mod junit;

use async_trait::async_trait;

use crate::job::{JobFailure, JobId, JobOutcome};
use crate::orchestrator::{Plan, RunReport};

pub use junit::JUnitReporter;

/// Receives events during a run.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once the jobs of the run are known.
    async fn on_plan(&self, plan: &Plan);

    /// Called when a worker picks up a job.
    async fn on_job_start(&self, job: &JobId);

    /// Called when a job reaches its outcome.
    async fn on_job_complete(&self, outcome: &JobOutcome);

    /// Called when the run stops.
    async fn on_run_complete(&self, report: &RunReport);
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_plan(&self, _plan: &Plan) {}
    async fn on_job_start(&self, _job: &JobId) {}
    async fn on_job_complete(&self, _outcome: &JobOutcome) {}
    async fn on_run_complete(&self, _report: &RunReport) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_plan(&self, plan: &Plan) {
        for reporter in &self.reporters {
            reporter.on_plan(plan).await;
        }
    }

    async fn on_job_start(&self, job: &JobId) {
        for reporter in &self.reporters {
            reporter.on_job_start(job).await;
        }
    }

    async fn on_job_complete(&self, outcome: &JobOutcome) {
        for reporter in &self.reporters {
            reporter.on_job_complete(outcome).await;
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        for reporter in &self.reporters {
            reporter.on_run_complete(report).await;
        }
    }
}

/// Console reporter showing a progress bar and a final summary.
pub struct ConsoleReporter {
    progress: std::sync::Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: std::sync::Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        match self.progress.lock().ok().as_deref().and_then(Option::as_ref) {
            Some(pb) => pb.println(line),
            None => println!("{}", line),
        }
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_plan(&self, plan: &Plan) {
        println!(
            "Planned {} builds ({} skipped as known failures)",
            plan.jobs.len(),
            plan.skipped.len()
        );

        let pb = indicatif::ProgressBar::new(plan.jobs.len() as u64);
        let style = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
        pb.set_style(style);

        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    async fn on_job_start(&self, job: &JobId) {
        if self.verbose {
            self.println(format!("Building: {}", job));
        }
    }

    async fn on_job_complete(&self, outcome: &JobOutcome) {
        let (status, show) = match outcome {
            JobOutcome::Built(result) if result.success() => {
                (console::style("PASS").green(), self.verbose)
            }
            JobOutcome::Built(_) => (console::style("FAIL").red(), true),
            JobOutcome::Failed(_) => (console::style("ERR ").red().bold(), true),
            JobOutcome::Excluded(_) | JobOutcome::Suppressed(_) => {
                (console::style("SKIP").yellow(), self.verbose)
            }
        };

        if show {
            self.println(format!("{} {}", status, outcome.job()));
        }
        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.inc(1);
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }

        println!();
        println!("Build Results:");
        println!("  Scheduled:  {}", report.scheduled);
        println!("  Passed:     {}", console::style(report.passed()).green());
        println!("  Failed:     {}", console::style(report.failures.len()).red());
        println!("  Skipped:    {}", console::style(report.skipped.len()).yellow());
        if !report.suppressed.is_empty() {
            println!("  Suppressed: {}", console::style(report.suppressed.len()).yellow());
        }
        if report.not_reported() > 0 {
            println!(
                "  Not built:  {}",
                console::style(report.not_reported()).red().bold()
            );
        }
        println!("  Duration:   {:?}", report.duration);

        println!();
        if report.success() {
            println!("{}", console::style("All builds passed!").green().bold());
            return;
        }

        if report.failures.is_empty() {
            println!(
                "{}",
                console::style("Some builds did not report a result.").red().bold()
            );
            return;
        }

        println!("{}", console::style("Build failed.").red().bold());
        println!();
        for failure in &report.failures {
            print_failure(failure);
        }
    }
}

fn print_failure(failure: &JobFailure) {
    match failure {
        JobFailure::Build(result) => {
            println!(
                "  - {} (exit code {})",
                console::style(&result.job).bold(),
                result.exit_code
            );
            for line in result.output.lines() {
                println!("      {}", line);
            }
        }
        other => {
            println!("  - {}", console::style(other.job()).bold());
            println!("    {}", console::style(other.to_string()).dim());
        }
    }
}
