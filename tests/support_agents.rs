use std::path::Path;

/// Writes the four lifecycle scripts into `script_dir`. Each appends its name
/// and environment to `calls.log` next to the scripts; `failing` names scripts
/// that should exit non-zero instead.
pub fn write_agent_scripts(script_dir: &Path, failing: &[&str]) -> Result<(), String> {
    std::fs::create_dir_all(script_dir)
        .map_err(|err| format!("create script dir failed: {}", err))?;
    let log = script_dir.join("calls.log");
    for name in [
        "install-server-agent.sh",
        "start-server-agent.sh",
        "stop-server-agent.sh",
        "remove-server-agent.sh",
    ] {
        let exit_code = if failing.contains(&name) { 1 } else { 0 };
        let body = format!(
            "echo \"{name} port=${{TCP_PORT:-}} dir=${{AGENT_WORK_DIR:-}} flag=${{AUTO_SHUTDOWN:-}}\" >> '{log}'\n\
echo \"{name} finished\"\n\
exit {exit_code}\n",
            name = name,
            log = log.display(),
            exit_code = exit_code
        );
        std::fs::write(script_dir.join(name), body)
            .map_err(|err| format!("write {} failed: {}", name, err))?;
    }
    Ok(())
}

pub fn read_calls(script_dir: &Path) -> String {
    std::fs::read_to_string(script_dir.join("calls.log")).unwrap_or_default()
}
