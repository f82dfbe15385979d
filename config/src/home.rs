use dirs::home_dir;
use std::path::PathBuf;

/// Returns the wikihist home directory, which can be specified by the
/// `WIKIHIST_HOME` environment variable. If not set, defaults to
/// `~/.wikihist`.
///
/// - If `WIKIHIST_HOME` is set, the value must exist and be a directory. The
///   value will be canonicalized and this function will Err otherwise.
/// - If `WIKIHIST_HOME` is not set, this function does not verify that the
///   directory exists.
pub fn find_wikihist_home() -> std::io::Result<PathBuf> {
    let home_env = std::env::var("WIKIHIST_HOME")
        .ok()
        .filter(|val| !val.is_empty());
    find_wikihist_home_from_env(home_env.as_deref())
}

fn find_wikihist_home_from_env(home_env: Option<&str>) -> std::io::Result<PathBuf> {
    match home_env {
        Some(val) => {
            let path = PathBuf::from(val);
            let metadata = std::fs::metadata(&path).map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("WIKIHIST_HOME points to {val:?}, but that path does not exist"),
                ),
                _ => std::io::Error::new(
                    err.kind(),
                    format!("failed to read WIKIHIST_HOME {val:?}: {err}"),
                ),
            })?;

            if !metadata.is_dir() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("WIKIHIST_HOME points to {val:?}, but that path is not a directory"),
                ));
            }
            path.canonicalize().map_err(|err| {
                std::io::Error::new(
                    err.kind(),
                    format!("failed to canonicalize WIKIHIST_HOME {val:?}: {err}"),
                )
            })
        }
        None => {
            let mut path = home_dir().ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not find home directory",
                )
            })?;
            path.push(".wikihist");
            Ok(path)
        }
    }
}
