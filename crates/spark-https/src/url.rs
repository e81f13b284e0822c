use std::fmt;

use crate::error::HttpsError;

/// 门面支持的 URL 方案。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub const fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// 解析后的请求目标。
///
/// # 契约（What）
/// - `host` 不含 IPv6 方括号，可直接交给 [`spark_transport::Connection::connect`]；
/// - `target` 为 origin-form（路径加查询串），至少为 `/`，片段 `#...` 被丢弃；
/// - 不支持 `user:pass@` 形式的用户信息；含空白或控制字符的输入被拒绝，请求行不会被拆开。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Url {
    scheme: Scheme,
    host: String,
    port: u16,
    target: String,
}

impl Url {
    pub fn parse(input: &str) -> Result<Self, HttpsError> {
        let invalid = |reason| HttpsError::InvalidUrl {
            url: input.to_owned(),
            reason,
        };
        let trimmed = input.trim();
        if trimmed.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(invalid("contains whitespace or control characters"));
        }
        let (scheme, rest) = trimmed.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = if scheme.eq_ignore_ascii_case("https") {
            Scheme::Https
        } else if scheme.eq_ignore_ascii_case("http") {
            Scheme::Http
        } else {
            return Err(HttpsError::UnsupportedScheme(scheme.to_owned()));
        };

        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
        let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, target) = rest.split_at(authority_end);
        if authority.contains('@') {
            return Err(invalid("userinfo is not supported"));
        }

        let (host, port) = split_host_port(authority).ok_or_else(|| invalid("malformed authority"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => scheme.default_port(),
        };
        let target = match target {
            "" => "/".to_owned(),
            query if query.starts_with('?') => format!("/{query}"),
            path => path.to_owned(),
        };

        Ok(Self {
            scheme,
            host: host.to_owned(),
            port,
            target,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// `Host` 头的取值：非默认端口时附带端口，IPv6 地址恢复方括号。
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme.as_str(), self.host_header(), self.target)
    }
}

fn split_host_port(authority: &str) -> Option<(&str, Option<&str>)> {
    if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']')?;
        return match after {
            "" => Some((host, None)),
            port => Some((host, Some(port.strip_prefix(':')?))),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Some((host, Some(port))),
        Some(_) => None,
        None => Some((authority, None)),
    }
}
