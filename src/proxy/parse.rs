//! Proxy list parsing.

use std::path::Path;

use crate::error_handling::ProxyError;

use super::Proxy;

/// Parses a proxy list, one proxy per line.
///
/// Accepted forms are `host:port` and `host:port:user:pass` (the password may
/// itself contain colons). Blank lines and lines starting with `#` are skipped.
pub fn parse_proxy_list(text: &str) -> Result<Vec<Proxy>, ProxyError> {
    let mut proxies = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        proxies.push(parse_proxy_line(line).ok_or_else(|| ProxyError::Malformed {
            line: index + 1,
            content: line.to_string(),
        })?);
    }
    Ok(proxies)
}

/// Reads and parses a proxy list file.
pub async fn load_proxy_file(path: &Path) -> Result<Vec<Proxy>, ProxyError> {
    let text = tokio::fs::read_to_string(path).await?;
    let proxies = parse_proxy_list(&text)?;
    log::debug!("Parsed {} proxies from {}", proxies.len(), path.display());
    Ok(proxies)
}

fn parse_proxy_line(line: &str) -> Option<Proxy> {
    let mut parts = line.splitn(4, ':');
    let host = parts.next().filter(|h| !h.is_empty())?;
    let port = parts.next()?.parse::<u16>().ok().filter(|p| *p != 0)?;
    match (parts.next(), parts.next()) {
        (None, None) => Some(Proxy::new(host, port)),
        (Some(user), Some(pass)) if !user.is_empty() => {
            Some(Proxy::new(host, port).with_credentials(user, pass))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_authenticated() {
        let proxies = parse_proxy_list(
            "# residential\n10.0.0.1:8080\n\nproxy.example.net:3128:alice:s3:cr3t\n",
        )
        .unwrap();
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].address(), "10.0.0.1:8080");
        assert!(proxies[0].credentials().is_none());

        let creds = proxies[1].credentials().unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3:cr3t");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse_proxy_list("10.0.0.1:8080\nnot-a-proxy\n").unwrap_err();
        match err {
            ProxyError::Malformed { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "not-a-proxy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_port_and_half_credentials() {
        assert!(parse_proxy_list("host:notaport").is_err());
        assert!(parse_proxy_list("host:0").is_err());
        assert!(parse_proxy_list("host:8080:useronly").is_err());
        assert!(parse_proxy_list(":8080").is_err());
    }

    #[tokio::test]
    async fn test_load_proxy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "127.0.0.1:9000\n127.0.0.1:9001:u:p\n").unwrap();

        let proxies = load_proxy_file(&path).await.unwrap();
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[1].port(), 9001);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = load_proxy_file(Path::new("/definitely/not/here.txt")).await;
        assert!(matches!(result, Err(ProxyError::Io(_))));
    }
}
