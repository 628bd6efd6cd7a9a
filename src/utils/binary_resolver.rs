use anyhow::Result;
use std::path::PathBuf;

/// Find an external tool: next to the executable (`resources/binaries/`),
/// then the install directory (`~/.meetbot/bin`), then `PATH`.
pub fn find_binary(name: &str) -> Result<PathBuf> {
    let mut checked_paths = Vec::new();

    for candidate in bundled_candidates(name).into_iter().chain(install_candidate(name)) {
        if candidate.is_file() {
            return Ok(candidate);
        }
        checked_paths.push(candidate.display().to_string());
    }

    if let Ok(path) = which::which(name) {
        return Ok(path);
    }
    checked_paths.push("$PATH".to_string());

    Err(anyhow::anyhow!(
        "Could not find binary '{}'. Checked:\n{}",
        name,
        checked_paths.join("\n")
    ))
}

fn bundled_candidates(name: &str) -> Vec<PathBuf> {
    let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
    else {
        return Vec::new();
    };
    vec![
        exe_dir.join("resources").join("binaries").join(name),
        exe_dir.join(name),
    ]
}

fn install_candidate(name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".meetbot").join("bin").join(name))
}

pub fn find_ffmpeg() -> Result<PathBuf> {
    find_binary("ffmpeg")
}

pub fn find_pactl() -> Result<PathBuf> {
    find_binary("pactl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_lists_checked_paths() {
        let err = find_binary("meetbot-definitely-missing-tool").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("meetbot-definitely-missing-tool"));
        assert!(message.contains("$PATH"));
    }

    #[cfg(unix)]
    #[test]
    fn test_finds_tool_on_path() {
        assert!(find_binary("sh").is_ok());
    }
}
