use std::io::{self, Read};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};

use crate::MigrationError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

pub fn run_command(command: &mut Command, context_message: &str) -> Result<CommandOutput> {
    log::debug!("running {}", describe_command(command));
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    check_output(command, output).context(context_message.to_string())
}

pub fn run_command_with_stdin(
    command: &mut Command,
    input: &mut dyn Read,
    context_message: &str,
) -> Result<CommandOutput> {
    log::debug!("running {} with piped stdin", describe_command(command));
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("{context_message}: command failed to start"))?;

    let copy_result = match child.stdin.take() {
        Some(mut stdin) => io::copy(input, &mut stdin).map(|_| ()),
        None => Ok(()),
    };
    let output = child
        .wait_with_output()
        .with_context(|| format!("{context_message}: failed waiting for command"))?;

    // A child that dies early closes its stdin; its own exit status explains why.
    let checked = check_output(command, output).context(context_message.to_string())?;
    copy_result.with_context(|| format!("{context_message}: failed streaming input"))?;
    Ok(checked)
}

fn check_output(command: &Command, output: Output) -> Result<CommandOutput> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if output.status.success() {
        return Ok(CommandOutput { stdout, stderr });
    }

    let status = match output.status.code() {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".to_string(),
    };
    Err(MigrationError::Subprocess {
        program: command.get_program().to_string_lossy().into_owned(),
        status,
        stdout,
        stderr,
    }
    .into())
}

pub fn describe_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    for arg in command.get_args() {
        let arg = arg.to_string_lossy();
        if arg.starts_with("--password") {
            parts.push("--password=***".to_string());
        } else {
            parts.push(arg.into_owned());
        }
    }
    parts.join(" ")
}
