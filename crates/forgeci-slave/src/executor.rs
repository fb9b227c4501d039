//! runs one recipe step: each of its shell commands in order, in the
//! step's working directory, and turns the outcome into the `step`
//! message the client reports back to the master.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use chrono::Utc;

use forgeci_data::build::StepResult;
use forgeci_data::message::{ErrorElement, LogElement, MessageElement, StepMessage};

use crate::recipe::RecipeStep;

/// executes every shell command of `step` under `work_dir`, stopping at
/// the first failing command; the declared reports are emitted verbatim
/// regardless of outcome, matching the narrowed, non-pluggable step
/// vocabulary this slave supports
pub fn run_step(step: &RecipeStep, work_dir: &Path) -> StepMessage {
    let start = Instant::now();
    let time = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();

    let mut logs = Vec::new();
    let mut errors = Vec::new();
    let mut result = StepResult::Success;

    for shell in &step.shell {
        let dir = if shell.dir.is_empty() { work_dir.to_path_buf() } else { work_dir.join(&shell.dir) };

        let output = Command::new("sh").arg("-c").arg(&shell.command).current_dir(&dir).output();

        match output {
            Ok(output) => {
                let mut messages = Vec::new();
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    messages.push(MessageElement { text: line.to_string() });
                }
                for line in String::from_utf8_lossy(&output.stderr).lines() {
                    messages.push(MessageElement { text: line.to_string() });
                }
                logs.push(LogElement { generator: shell.command.clone(), messages });

                if !output.status.success() {
                    errors.push(ErrorElement { message: format!("command '{}' exited with {}", shell.command, output.status) });
                    result = StepResult::Failure;
                    break;
                }
            }
            Err(e) => {
                errors.push(ErrorElement { message: format!("failed to run '{}': {e}", shell.command) });
                result = StepResult::Failure;
                break;
            }
        }
    }

    StepMessage {
        id: step.id.clone(),
        description: step.description.clone(),
        time,
        duration: start.elapsed().as_secs_f64(),
        result,
        logs,
        reports: step.reports.clone(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::ShellCommand;

    #[test]
    fn successful_command_yields_success_result() {
        let step = RecipeStep {
            id: "echo".into(),
            description: "say hi".into(),
            shell: vec![ShellCommand { command: "echo hi".into(), dir: String::new() }],
            reports: vec![],
        };

        let message = run_step(&step, Path::new("."));
        assert_eq!(message.result, StepResult::Success);
        assert_eq!(message.logs[0].messages[0].text, "hi");
    }

    #[test]
    fn failing_command_yields_failure_result_and_error() {
        let step = RecipeStep {
            id: "fail".into(),
            description: "always fails".into(),
            shell: vec![ShellCommand { command: "exit 1".into(), dir: String::new() }],
            reports: vec![],
        };

        let message = run_step(&step, Path::new("."));
        assert_eq!(message.result, StepResult::Failure);
        assert_eq!(message.errors.len(), 1);
    }
}
