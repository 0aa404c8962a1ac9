use crate::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Loads cookies from a directory holding one `<domain>.txt` file per domain, each
/// containing `;`-separated `name=value` pairs. A missing directory yields no cookies.
pub fn load_cookie_dir(dir: &Path) -> Result<Vec<CookieSpec>> {
    if !dir.is_dir() {
        tracing::debug!("Cookie directory {} not found, skipping", dir.display());
        return Ok(Vec::new());
    }

    let mut entries = std::fs::read_dir(dir)
        .map_err(|e| ScanError::CookieError(format!("{}: {}", dir.display(), e)))?
        .flatten()
        .filter(|entry| entry.path().is_file())
        .collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.file_name());

    let mut cookies = Vec::new();
    for entry in entries {
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(domain) = file_name.strip_suffix(".txt") else {
            tracing::warn!("Skipping cookie file without .txt suffix: {}", file_name);
            continue;
        };

        let content = std::fs::read_to_string(entry.path())
            .map_err(|e| ScanError::CookieError(format!("{}: {}", file_name, e)))?;
        cookies.extend(parse_cookie_line(&content, domain));
    }

    tracing::debug!("Loaded {} cookies from {}", cookies.len(), dir.display());
    Ok(cookies)
}

pub fn parse_cookie_line(content: &str, domain: &str) -> Vec<CookieSpec> {
    content
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let Some((name, value)) = pair.split_once('=') else {
                tracing::debug!("Ignoring malformed cookie pair '{}' for {}", pair, domain);
                return None;
            };
            Some(CookieSpec {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
                domain: domain.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_cookie_line() {
        let cookies = parse_cookie_line("id=abc; session = x=y ;;flag", ".example.com");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "id");
        assert_eq!(cookies[0].value, "abc");
        assert_eq!(cookies[1].name, "session");
        assert_eq!(cookies[1].value, "x=y");
        assert!(cookies.iter().all(|c| c.domain == ".example.com"));
    }

    #[test]
    fn test_load_cookie_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ads.example.com.txt"), "a=1;b=2").unwrap();
        std::fs::write(dir.path().join(".tracker.net.txt"), "uid=42\n").unwrap();
        std::fs::write(dir.path().join("README"), "ignored").unwrap();

        let cookies = load_cookie_dir(dir.path()).unwrap();
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies[0].domain, ".tracker.net");
        assert_eq!(cookies[0].value, "42");
        assert_eq!(cookies[1].domain, "ads.example.com");
    }

    #[test]
    fn test_missing_cookie_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let cookies = load_cookie_dir(&dir.path().join("nope")).unwrap();
        assert!(cookies.is_empty());
    }
}
