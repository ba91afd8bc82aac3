//! Daily SEO content-generation job. The workflow itself is an external
//! script; this module launches it, captures its output and reports the exit
//! status.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::NaiveTime;
use serde::Serialize;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AvaBotError, Result};
use crate::interfaces::scheduler::{Schedule, ScheduledJob};

pub const JOB_NAME: &str = "seo_workflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowRun {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct SeoWorkflow {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    run_at: NaiveTime,
    run_on_start: bool,
}

impl SeoWorkflow {
    pub fn new(command: impl Into<String>, args: Vec<String>, run_at: NaiveTime) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
            run_at,
            run_on_start: false,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let seo = config.seo.clone().unwrap_or_default();
        let command = seo
            .command
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| AvaBotError::Config("seo.command is not configured".to_string()))?;
        let mut workflow = Self::new(command, seo.args.unwrap_or_default(), config.seo_run_at()?)
            .with_run_on_start(seo.run_on_start.unwrap_or(true));
        if let Some(dir) = seo.working_dir {
            workflow = workflow.with_working_dir(dir);
        }
        Ok(workflow)
    }

    pub fn is_enabled(config: &Config) -> bool {
        config
            .seo
            .as_ref()
            .and_then(|seo| seo.enabled)
            .unwrap_or(false)
    }

    /// Launches the script and waits for it. A non-zero exit is reported in
    /// the returned run, not as an error.
    pub async fn execute(&self) -> Result<WorkflowRun> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        info!(command = %self.command, args = ?self.args, "running seo workflow");
        let output = command.output().await.map_err(|e| {
            AvaBotError::Runtime(format!("failed to launch {}: {e}", self.command))
        })?;

        let run = WorkflowRun {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        info!(exit_code = ?run.exit_code, "seo workflow exited");
        if !run.stdout.trim().is_empty() {
            info!(stdout = %run.stdout.trim(), "seo workflow output");
        }
        if !run.stderr.trim().is_empty() {
            warn!(stderr = %run.stderr.trim(), "seo workflow stderr");
        }
        if !run.success {
            error!(exit_code = ?run.exit_code, "seo workflow failed");
        }
        Ok(run)
    }
}

#[async_trait]
impl ScheduledJob for SeoWorkflow {
    fn name(&self) -> &str {
        JOB_NAME
    }

    fn schedule(&self) -> Schedule {
        Schedule::DailyAt(self.run_at)
    }

    fn run_on_start(&self) -> bool {
        self.run_on_start
    }

    async fn run(&self) -> Result<()> {
        let run = self.execute().await?;
        if run.success {
            Ok(())
        } else {
            Err(AvaBotError::Runtime(format!(
                "seo workflow exited with {:?}",
                run.exit_code
            )))
        }
    }
}
