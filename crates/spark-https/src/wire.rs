//! HTTP/1.1 报文编解码。
//!
//! 解析函数全部作用于 `&[u8]`，返回偏移量或借用切片；读取循环位于 [`crate::response`]。

use crate::error::HttpsError;
use crate::message::{FORM_CONTENT_TYPE, Headers, Method, Request};
use crate::url::Url;

/// 状态行与头部。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

/// 响应体的定界方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilEof,
}

impl BodyFraming {
    /// `HEAD`、1xx、204 与 304 没有响应体；`chunked` 优先于 `Content-Length`。
    pub fn of(method: Method, head: &ResponseHead) -> Result<Self, HttpsError> {
        if method == Method::Head || (100..200).contains(&head.status) || matches!(head.status, 204 | 304) {
            return Ok(BodyFraming::Empty);
        }
        if let Some(encoding) = head.headers.get("Transfer-Encoding") {
            let last = encoding.rsplit(',').next().map(str::trim).unwrap_or_default();
            return Ok(if last.eq_ignore_ascii_case("chunked") {
                BodyFraming::Chunked
            } else {
                BodyFraming::UntilEof
            });
        }
        match head.headers.get("Content-Length") {
            Some(value) => {
                let length = parse_decimal_usize(value.trim().as_bytes())
                    .ok_or(HttpsError::Protocol("invalid content-length"))?;
                Ok(if length == 0 {
                    BodyFraming::Empty
                } else {
                    BodyFraming::Length(length)
                })
            }
            None => Ok(BodyFraming::UntilEof),
        }
    }
}

/// 编码请求行与头部，并在方法允许时附带请求体。
///
/// 头部顺序：`Host`、表单 `Content-Type` 默认值、调用方头部（可覆盖前者）、
/// 缺省的 `User-Agent`、`Connection: close`，最后是由请求体长度决定的 `Content-Length`。
/// 任一头部名不是合法 token、或值含 CR/LF/NUL 时返回 [`HttpsError::InvalidHeader`]，不产出任何字节。
pub(crate) fn encode_request(request: &Request, url: &Url, user_agent: &str) -> Result<Vec<u8>, HttpsError> {
    let method = request.effective_method();
    let mut headers = Headers::new();
    headers.insert("Host", url.host_header());
    if !request.postdata.is_empty() {
        headers.insert("Content-Type", FORM_CONTENT_TYPE);
    }
    for (name, value) in request.headers.iter() {
        headers.insert(name, value);
    }
    if !headers.contains("User-Agent") && !user_agent.is_empty() {
        headers.insert("User-Agent", user_agent);
    }
    if !headers.contains("Connection") {
        headers.insert("Connection", "close");
    }
    let body: &[u8] = if method.sends_body() { &request.postdata } else { &[] };
    if method.sends_body() {
        headers.insert("Content-Length", body.len().to_string());
    } else {
        headers.remove("Content-Length");
    }

    for (name, value) in headers.iter() {
        validate_header(name, value)?;
    }

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(url.target().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    Ok(out)
}

fn validate_header(name: &str, value: &str) -> Result<(), HttpsError> {
    let invalid = |reason| HttpsError::InvalidHeader {
        name: name.escape_debug().to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if !name.bytes().all(is_token_byte) {
        return Err(invalid("name is not a token"));
    }
    if value.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0')) {
        return Err(invalid("value contains CR, LF or NUL"));
    }
    Ok(())
}

/// RFC 9110 `tchar`。
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// 查找头部结束标记 `\r\n\r\n`，返回其后的偏移量。
pub(crate) fn find_end_of_headers(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// 查找 `\r\n`，返回 `\r` 的偏移量。
pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// 解析完整的头部区（含结尾空行）。同名头部后出现者生效。
pub(crate) fn parse_head(buf: &[u8]) -> Result<ResponseHead, HttpsError> {
    let line_end = find_crlf(buf).ok_or(HttpsError::Protocol("missing status line"))?;
    let status = parse_status_line(&buf[..line_end])?;

    let mut headers = Headers::new();
    let mut rest = &buf[line_end + 2..];
    loop {
        let end = find_crlf(rest).ok_or(HttpsError::Protocol("unterminated header line"))?;
        if end == 0 {
            break;
        }
        let (name, value) = parse_header_line(&rest[..end])?;
        headers.insert(name, value);
        rest = &rest[end + 2..];
    }
    Ok(ResponseHead { status, headers })
}

/// `HTTP/1.x SP STATUS [SP REASON]`
fn parse_status_line(line: &[u8]) -> Result<u16, HttpsError> {
    if !line.starts_with(b"HTTP/1.") {
        return Err(HttpsError::Protocol("unsupported http version"));
    }
    let sp = memchr(b' ', line).ok_or(HttpsError::Protocol("malformed status line"))?;
    let rest = &line[sp + 1..];
    if rest.len() < 3 || (rest.len() > 3 && rest[3] != b' ') {
        return Err(HttpsError::Protocol("malformed status line"));
    }
    match parse_decimal_u16(&rest[..3]) {
        Some(status) if status >= 100 => Ok(status),
        _ => Err(HttpsError::Protocol("invalid status code")),
    }
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), HttpsError> {
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(HttpsError::Protocol("obsolete header folding"));
    }
    let colon = memchr(b':', line).ok_or(HttpsError::Protocol("header without colon"))?;
    let name = &line[..colon];
    if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(HttpsError::Protocol("invalid header name"));
    }
    let value = trim_ows(&line[colon + 1..]);
    Ok((
        String::from_utf8_lossy(name).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    ))
}

/// `HEX_SIZE [; ext]`，不含行尾 CRLF。
pub(crate) fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpsError> {
    let hex_end = line
        .iter()
        .position(|&b| b == b';' || b == b' ' || b == b'\t')
        .unwrap_or(line.len());
    let hex = &line[..hex_end];
    if hex.is_empty() {
        return Err(HttpsError::Protocol("empty chunk size"));
    }
    parse_hex(hex).ok_or(HttpsError::Protocol("invalid chunk size"))
}

fn memchr(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

fn trim_ows(buf: &[u8]) -> &[u8] {
    let start = buf.iter().position(|&b| b != b' ' && b != b'\t').unwrap_or(buf.len());
    let end = buf
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(start, |i| i + 1);
    &buf[start..end]
}

fn parse_decimal_u16(buf: &[u8]) -> Option<u16> {
    let value = parse_decimal_usize(buf)?;
    u16::try_from(value).ok()
}

fn parse_decimal_usize(buf: &[u8]) -> Option<usize> {
    if buf.is_empty() {
        return None;
    }
    buf.iter().try_fold(0usize, |acc, &b| {
        let digit = b.wrapping_sub(b'0');
        if digit > 9 {
            return None;
        }
        acc.checked_mul(10)?.checked_add(usize::from(digit))
    })
}

fn parse_hex(buf: &[u8]) -> Option<usize> {
    buf.iter().try_fold(0usize, |acc, &b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => return None,
        };
        acc.checked_mul(16)?.checked_add(usize::from(digit))
    })
}
