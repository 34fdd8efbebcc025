//! endpoint 工具函数

use http::Uri;

use crate::error::{DiscoveryError, Result};

/// 安全传输时在协议名后追加 `s`（`grpc` -> `grpcs`）
pub fn scheme(scheme: &str, is_secure: bool) -> String {
    if is_secure {
        format!("{}s", scheme)
    } else {
        scheme.to_string()
    }
}

/// 拼接 endpoint，如 `grpc://127.0.0.1:9000`
pub fn new_endpoint(scheme: &str, host: &str) -> String {
    format!("{}://{}", scheme, host)
}

/// 取出第一个协议为 `scheme` 的 endpoint 的 `host:port`
///
/// 任一 endpoint 无法解析时返回错误；没有匹配的协议时返回 `None`。
pub fn parse_endpoint(endpoints: &[String], scheme: &str) -> Result<Option<String>> {
    for endpoint in endpoints {
        let uri: Uri = endpoint
            .parse()
            .map_err(|e| DiscoveryError::invalid_endpoint(endpoint, e))?;
        if uri.scheme_str() == Some(scheme) {
            let authority = uri
                .authority()
                .map(|a| a.as_str().to_string())
                .filter(|a| !a.is_empty())
                .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing authority"))?;
            return Ok(Some(authority));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme() {
        assert_eq!(scheme("grpc", true), "grpcs");
        assert_eq!(scheme("grpc", false), "grpc");
    }

    #[test]
    fn test_new_endpoint() {
        assert_eq!(new_endpoint("http", "127.0.0.1:8000"), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_parse_endpoint() {
        let endpoints = vec![
            "http://127.0.0.1:8000".to_string(),
            "grpc://127.0.0.1:9000".to_string(),
        ];
        assert_eq!(
            parse_endpoint(&endpoints, "grpc").unwrap(),
            Some("127.0.0.1:9000".to_string())
        );
        assert_eq!(parse_endpoint(&endpoints, "grpcs").unwrap(), None);
        assert_eq!(parse_endpoint(&[], "grpc").unwrap(), None);
    }

    #[test]
    fn test_parse_endpoint_rejects_malformed() {
        let endpoints = vec!["grpc://bad host:9000".to_string()];
        assert!(matches!(
            parse_endpoint(&endpoints, "grpc"),
            Err(DiscoveryError::InvalidEndpoint { .. })
        ));
    }
}
