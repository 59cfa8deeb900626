use percent_encoding::percent_decode_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

/// A parsed request line. `raw_path` keeps the percent-encoded form for
/// building redirect targets, `path` is the decoded form used for file
/// resolution. Query string and fragment are dropped from both.
#[derive(Debug, PartialEq)]
pub struct Request {
    pub method: Method,
    pub raw_path: String,
    pub path: String,
}

#[derive(Debug, PartialEq)]
pub enum ParseError {
    Malformed,
    UnsupportedMethod(String),
    BadEncoding,
}

pub fn parse(head: &str) -> Result<Request, ParseError> {
    let request_line = head.lines().next().ok_or(ParseError::Malformed)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(ParseError::Malformed)?;
    let target = parts.next().ok_or(ParseError::Malformed)?;

    let method = match method {
        "GET" => Method::Get,
        "HEAD" => Method::Head,
        other => return Err(ParseError::UnsupportedMethod(other.to_string())),
    };

    let raw_path = target.split(&['?', '#'][..]).next().unwrap_or("");
    if !raw_path.starts_with('/') {
        return Err(ParseError::Malformed);
    }

    let path = percent_decode_str(raw_path)
        .decode_utf8()
        .map_err(|_| ParseError::BadEncoding)?
        .into_owned();

    Ok(Request {
        method,
        raw_path: raw_path.to_string(),
        path,
    })
}
