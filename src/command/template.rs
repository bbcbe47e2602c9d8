use crate::command::shell_quote;
use crate::config::TemplateConfig;

/// Renders the full shell line the scheduler runs for one job.
///
/// The line changes into the working directory and hands the payload to the
/// `exec` harness tagged with the job's own id and its dependents, so the
/// worker reports markers under the right identity.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    config: TemplateConfig,
}

impl CommandTemplate {
    pub fn new(config: TemplateConfig) -> Self {
        Self { config }
    }

    pub fn render(
        &self,
        id: &str,
        dependent_ids: &[String],
        command: &str,
        switches: &str,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(prefix) = self.config.prefix.as_deref().filter(|p| !p.trim().is_empty()) {
            parts.push(prefix.trim().to_string());
        }

        parts.push(format!(
            "cd {}",
            shell_quote(&self.config.working_dir.to_string_lossy())
        ));

        let mut harness = format!("{} exec --id {}", shell_quote(&self.config.harness_program), id);
        if !dependent_ids.is_empty() {
            harness.push_str(" --dependents ");
            harness.push_str(&dependent_ids.join(","));
        }
        harness.push_str(" -- ");
        harness.push_str(&shell_quote(&payload(command, switches)));
        parts.push(harness);

        parts.join("; ")
    }
}

fn payload(command: &str, switches: &str) -> String {
    let command = command.trim();
    let switches = switches.trim();
    if switches.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, switches)
    }
}
