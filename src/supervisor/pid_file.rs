use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// `<dir>/<service>.pid`
pub fn pid_path(dir: &Path, service: &str) -> PathBuf {
    dir.join(format!("{service}.pid"))
}

/// What a service's pid file says right now. The file belongs to the service
/// itself, so a missing file is an answer ("not running"), not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PidFileState {
    Missing,
    /// Present but not a decimal process id.
    Invalid(String),
    Pid(u32),
}

impl PidFileState {
    pub fn pid(&self) -> Option<u32> {
        match self {
            PidFileState::Pid(pid) => Some(*pid),
            PidFileState::Missing | PidFileState::Invalid(_) => None,
        }
    }
}

pub async fn read_pid_file(path: &Path) -> PidFileState {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Pid file unreadable, treating as absent");
            } else {
                trace!(path = %path.display(), "No pid file");
            }
            return PidFileState::Missing;
        }
    };

    parse_pid(&content)
}

pub fn parse_pid(content: &str) -> PidFileState {
    let text = content.trim();
    match text.parse::<u32>() {
        Ok(pid) if pid > 0 => PidFileState::Pid(pid),
        _ => PidFileState::Invalid(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trimmed_decimal() {
        assert_eq!(parse_pid("4321"), PidFileState::Pid(4321));
        assert_eq!(parse_pid(" 4321\r\n"), PidFileState::Pid(4321));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_pid(""), PidFileState::Invalid(String::new()));
        assert_eq!(parse_pid("12ab"), PidFileState::Invalid("12ab".into()));
        assert_eq!(parse_pid("-5"), PidFileState::Invalid("-5".into()));
        assert_eq!(parse_pid("0"), PidFileState::Invalid("0".into()));
    }

    #[tokio::test]
    async fn missing_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let state = read_pid_file(&pid_path(dir.path(), "gpms")).await;
        assert_eq!(state, PidFileState::Missing);
        assert_eq!(state.pid(), None);
    }

    #[tokio::test]
    async fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = pid_path(dir.path(), "relay");
        std::fs::write(&path, "987\n").unwrap();
        assert_eq!(read_pid_file(&path).await.pid(), Some(987));
    }

    #[test]
    fn path_convention() {
        assert_eq!(
            pid_path(Path::new("/tmp"), "gpms"),
            PathBuf::from("/tmp/gpms.pid")
        );
    }
}
