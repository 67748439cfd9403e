//! Slurm batch scheduler backend.
//!
//! The wrapper invocation is submitted with `sbatch --wrap`; the handle is
//! the job id. Input reaches the command through the entry's FIFO, which
//! requires the job to run where the metadata root is a local filesystem.

use super::{run_tool, run_tool_output, write_fifo_line, Invocation, SessionBackend, StdinMode, Termination};
use crate::error::{Result, SpmiError};
use crate::metadata::MetadataEntry;
use tracing::{info, warn};

const SBATCH: &str = "sbatch";
const SQUEUE: &str = "squeue";
const SCANCEL: &str = "scancel";

#[derive(Debug, Clone, Default)]
pub struct SlurmBackend {
    options: Vec<String>,
}

impl SlurmBackend {
    pub fn new(options: Vec<String>) -> Self {
        Self { options }
    }

    fn submit_args(&self, id: &str, invocation: &Invocation) -> Vec<String> {
        let mut args = vec![
            "--parsable".to_string(),
            "-J".to_string(),
            format!("spmi-{}", id),
            "-o".to_string(),
            "/dev/null".to_string(),
        ];
        args.extend(self.options.iter().cloned());
        args.push("--wrap".to_string());
        args.push(invocation.shell_line());
        args
    }
}

impl SessionBackend for SlurmBackend {
    fn kind(&self) -> &'static str {
        "slurm"
    }

    fn input_mode(&self) -> StdinMode {
        StdinMode::Fifo
    }

    fn spawn(&self, id: &str, _entry: &MetadataEntry, invocation: &Invocation) -> Result<String> {
        let args = self.submit_args(id, invocation);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let stdout = run_tool(SBATCH, &args)?;
        let job_id = parse_job_id(&stdout).ok_or_else(|| SpmiError::BackendUnavailable {
            tool: SBATCH.to_string(),
            message: format!("unexpected output: {}", stdout.trim()),
        })?;

        info!("Submitted slurm job {}", job_id);
        Ok(job_id)
    }

    fn is_alive(&self, handle: &str) -> Result<bool> {
        let output = run_tool_output(SQUEUE, &["-h", "-j", handle, "-o", "%A"])?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            return Ok(stdout.lines().any(|line| line.trim() == handle));
        }

        // Finished jobs drop out of the controller and squeue rejects the id
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Invalid job id") {
            return Ok(false);
        }

        Err(SpmiError::BackendUnavailable {
            tool: SQUEUE.to_string(),
            message: stderr.trim().to_string(),
        })
    }

    fn send_input(&self, _handle: &str, entry: &MetadataEntry, line: &str) -> Result<()> {
        write_fifo_line(entry, line)
    }

    fn terminate(&self, handle: &str, _wrapper_pid: Option<u32>, mode: Termination) -> Result<()> {
        match mode {
            Termination::Graceful => {
                run_tool(SCANCEL, &["--signal=TERM", "--full", handle]).map(drop)
            }
            Termination::Forced => {
                run_tool(SCANCEL, &["--signal=HUP", "--full", handle])?;
                if let Err(e) = run_tool(SCANCEL, &[handle]) {
                    warn!("scancel {} after HUP failed: {}", handle, e);
                }
                Ok(())
            }
        }
    }
}

/// `sbatch --parsable` prints `<jobid>` or `<jobid>;<cluster>`.
fn parse_job_id(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let job_id = line.split(';').next()?.trim();

    (!job_id.is_empty() && job_id.chars().all(|c| c.is_ascii_digit() || c == '_'))
        .then(|| job_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id("12345\n").as_deref(), Some("12345"));
        assert_eq!(parse_job_id("12345;cluster-a\n").as_deref(), Some("12345"));
        assert_eq!(parse_job_id("\n  778\n").as_deref(), Some("778"));
        assert_eq!(parse_job_id(""), None);
        assert_eq!(parse_job_id("sbatch: error: Batch job submission failed"), None);
    }

    #[test]
    fn test_submit_args() {
        let backend = SlurmBackend::new(vec!["-p".into(), "gpu".into()]);
        let invocation = Invocation {
            program: "/opt/spmi".into(),
            args: vec!["wrap".into(), "/data/.spmi/train".into()],
        };

        let args = backend.submit_args("train", &invocation);
        assert_eq!(
            args,
            vec![
                "--parsable",
                "-J",
                "spmi-train",
                "-o",
                "/dev/null",
                "-p",
                "gpu",
                "--wrap",
                "'/opt/spmi' 'wrap' '/data/.spmi/train'",
            ]
        );
    }
}
