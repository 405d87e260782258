//! Prompt construction for the command-running agent.
//!
//! The system prompt defines the assistant's behavior and embeds a snapshot
//! of the host (OS, architecture, working directory, user, shell) so the
//! model picks commands that fit the machine it is actually driving.

/// Template for the system prompt. `{system_info}` and `{max_retries}` are
/// substituted by [`system_prompt`].
const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are Shex, a command line assistant. The user describes what they want in natural language; you accomplish it by executing shell commands with the execute_command tool.

System information:
{system_info}

Guidelines:
1. Break the request into concrete shell commands and execute them one at a time with the tool.
2. Inspect each command's output before deciding the next step.
3. Mark a command as dangerous (is_dangerous=true) when it can destroy data or change the system: deleting files, overwriting disks, killing processes, changing system settings. The user will be asked to confirm it.
4. Prefer commands native to the user's platform and shell.
5. If a command fails, read the error and try a different approach; you have at most {max_retries} consecutive attempts.
6. When the task is done, reply with a short summary in plain text and no further tool calls."#;

/// Build the system prompt for one agent session.
pub fn system_prompt(max_retries: usize) -> String {
    SYSTEM_PROMPT_TEMPLATE
        .replace("{system_info}", &system_info())
        .replace("{max_retries}", &max_retries.to_string())
}

/// One `- key: value` line per fact about the host.
pub fn system_info() -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let shell = std::env::var("SHELL")
        .or_else(|_| std::env::var("COMSPEC"))
        .unwrap_or_else(|_| "unknown".to_string());

    [
        format!("- os: {}", std::env::consts::OS),
        format!("- architecture: {}", std::env::consts::ARCH),
        format!("- cwd: {}", cwd),
        format!("- user: {}", user),
        format!("- shell: {}", shell),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_substitutes_placeholders() {
        let prompt = system_prompt(30);
        assert!(!prompt.contains("{system_info}"));
        assert!(!prompt.contains("{max_retries}"));
        assert!(prompt.contains("30 consecutive attempts"));
        assert!(prompt.contains("execute_command"));
    }

    #[test]
    fn test_system_info_lists_host_facts() {
        let info = system_info();
        assert!(info.contains(&format!("- os: {}", std::env::consts::OS)));
        assert!(info.contains("- cwd: "));
    }
}
