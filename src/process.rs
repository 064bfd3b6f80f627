use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::error::CellError;

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

pub fn run_capture(program: &Path, args: &[String]) -> Result<Output, std::io::Error> {
    Command::new(program).args(args).output()
}

pub fn failure_message(program: &Path, output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        match output.status.code() {
            Some(code) => format!("{} exited with status {code}", program.display()),
            None => format!("{} terminated by signal", program.display()),
        }
    } else {
        stderr
    }
}

pub fn require_tool(path: Option<&PathBuf>, name: &str) -> Result<PathBuf, CellError> {
    path.cloned()
        .ok_or_else(|| CellError::MissingTool(name.to_string()))
}
