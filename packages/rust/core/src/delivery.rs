//! External converter and transport adapters.
//!
//! Both are plain programs run through `tokio::process`. Arguments are
//! templates: `{input}`/`{output}` for the converter, `{attachment}`,
//! `{subject}` and `{recipients}` for the transport.

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, instrument};

use feeddigest_shared::{ConvertConfig, DeliveryConfig, DigestError, Result};

/// Turns a document into the delivery format.
pub trait Converter: Send + Sync {
    /// Convert `input`, returning the path of the produced file.
    fn convert(&self, input: &Path) -> impl Future<Output = Result<PathBuf>> + Send;
}

/// Sends a file to a set of recipients.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        recipients: &[String],
        attachment: &Path,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Runs a conversion program such as `ebook-convert`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    config: ConvertConfig,
}

impl CommandConverter {
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    /// Where the converted file for `input` ends up.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        input.with_extension(&self.config.extension)
    }
}

impl Converter for CommandConverter {
    #[instrument(skip_all, fields(program = %self.config.program, input = %input.display()))]
    async fn convert(&self, input: &Path) -> Result<PathBuf> {
        let output = self.output_path(input);
        if output == input {
            return Err(DigestError::Conversion(format!(
                "conversion output {} would overwrite its input",
                output.display()
            )));
        }

        // A leftover from an earlier run must not pass for this run's output.
        match tokio::fs::remove_file(&output).await {
            Ok(()) => debug!(output = %output.display(), "removed stale conversion output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DigestError::io(&output, e)),
        }

        let input_arg = input.to_string_lossy();
        let output_arg = output.to_string_lossy();

        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input_arg)
                    .replace("{output}", &output_arg)
            })
            .collect();

        run(&self.config.program, &args)
            .await
            .map_err(DigestError::Conversion)?;

        if !output.exists() {
            return Err(DigestError::Conversion(format!(
                "{} exited successfully but produced no {}",
                self.config.program,
                output.display()
            )));
        }

        info!(output = %output.display(), "document converted");
        Ok(output)
    }
}

/// Runs a mail program such as `mutt`.
#[derive(Debug, Clone)]
pub struct CommandTransport {
    config: DeliveryConfig,
}

impl CommandTransport {
    pub fn new(config: DeliveryConfig) -> Self {
        Self { config }
    }
}

impl Transport for CommandTransport {
    #[instrument(skip_all, fields(program = %self.config.program, recipients = recipients.len()))]
    async fn send(&self, recipients: &[String], attachment: &Path) -> Result<()> {
        if recipients.is_empty() {
            return Err(DigestError::Delivery("no recipients given".into()));
        }

        let args = expand_delivery_args(
            &self.config.args,
            recipients,
            &attachment.to_string_lossy(),
            &self.config.subject,
        );

        run(&self.config.program, &args)
            .await
            .map_err(DigestError::Delivery)?;

        info!(attachment = %attachment.display(), "digest delivered");
        Ok(())
    }
}

/// Expand transport argument templates. A bare `{recipients}` argument
/// becomes one argument per recipient.
pub fn expand_delivery_args(
    templates: &[String],
    recipients: &[String],
    attachment: &str,
    subject: &str,
) -> Vec<String> {
    let mut args = Vec::with_capacity(templates.len() + recipients.len());
    for template in templates {
        if template == "{recipients}" {
            args.extend(recipients.iter().cloned());
        } else {
            args.push(
                template
                    .replace("{attachment}", attachment)
                    .replace("{subject}", subject),
            );
        }
    }
    args
}

/// Run `program` to completion. The error is a readable description.
async fn run(program: &str, args: &[String]) -> std::result::Result<(), String> {
    debug!(program, ?args, "running external program");

    let output = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    Err(if stderr.is_empty() {
        format!("{program} exited with {}", output.status)
    } else {
        format!("{program} exited with {}: {stderr}", output.status)
    })
}
