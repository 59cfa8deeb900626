use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::http_status::HttpStatus;
use super::listing;
use super::request::{self, Method, ParseError};

const READ_TIMEOUT: Duration = Duration::from_secs(30);

static MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("mjs", "application/javascript"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("pdf", "application/pdf"),
    ("xml", "application/xml"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("woff2", "font/woff2"),
];

static INDEX_FILES: &[&str] = &["index.html", "index.htm"];

/// Where a request target landed after path policy checks.
#[derive(Debug, PartialEq)]
pub enum Target {
    File(PathBuf),
    Listing(PathBuf),
    Redirect(String),
}

pub fn handle_client(mut stream: TcpStream, root: &Path, max_request_size: usize) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => "unknown".to_string(),
    };

    debug!("Handling request from {}", peer_addr);

    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        error!("Failed to set read timeout for {}: {}", peer_addr, e);
        return;
    }

    let head = match read_request_head(&mut stream, max_request_size) {
        Ok(HeadRead::Complete(head)) => head,
        Ok(HeadRead::TooLarge) => {
            warn!(
                "Request head over {} bytes from {}",
                max_request_size, peer_addr
            );
            send_error(&mut stream, HttpStatus::PayloadTooLarge);
            return;
        }
        Ok(HeadRead::Closed) => {
            debug!("Connection closed by client {}", peer_addr);
            return;
        }
        Err(e) => {
            error!("Error reading from {}: {}", peer_addr, e);
            return;
        }
    };

    let head = String::from_utf8_lossy(&head);
    let req = match request::parse(&head) {
        Ok(req) => req,
        Err(ParseError::UnsupportedMethod(method)) => {
            warn!("Unsupported method from {}: {}", peer_addr, method);
            send_error(&mut stream, HttpStatus::MethodNotAllowed);
            return;
        }
        Err(ParseError::BadEncoding) => {
            warn!("Undecodable request target from {}", peer_addr);
            send_error(&mut stream, HttpStatus::BadRequest);
            return;
        }
        Err(ParseError::Malformed) => {
            debug!("Malformed request from {}", peer_addr);
            send_error(&mut stream, HttpStatus::BadRequest);
            return;
        }
    };

    debug!("Request from {}: {:?} {}", peer_addr, req.method, req.raw_path);

    let is_head = req.method == Method::Head;
    match resolve_target(root, &req.path, &req.raw_path) {
        Ok(Target::File(path)) => serve_file(&mut stream, &path, is_head, &peer_addr),
        Ok(Target::Listing(dir)) => {
            serve_listing(&mut stream, &req.path, &dir, is_head, &peer_addr)
        }
        Ok(Target::Redirect(location)) => {
            info!("Redirecting {} to {}", peer_addr, location);
            send_redirect(&mut stream, &location);
        }
        Err(status) => send_error(&mut stream, status),
    }
}

/// Maps a decoded URL path onto the served root. Traversal is rejected
/// before the filesystem is touched; the canonicalized result must stay
/// inside the root, so a symlink pointing elsewhere reads as absent.
pub fn resolve_target(root: &Path, path: &str, raw_path: &str) -> Result<Target, HttpStatus> {
    let joined = root.join(sanitize(path)?);

    let full = match joined.canonicalize() {
        Ok(full) => full,
        Err(e) => {
            return Err(match e.kind() {
                io::ErrorKind::NotFound => {
                    info!("File not found: {:?}", joined);
                    HttpStatus::NotFound
                }
                io::ErrorKind::PermissionDenied => {
                    warn!("Permission denied: {:?}", joined);
                    HttpStatus::Forbidden
                }
                _ => {
                    error!("Error resolving {:?}: {}", joined, e);
                    HttpStatus::InternalServerError
                }
            });
        }
    };

    if !full.starts_with(root) {
        warn!("Resolved path escapes served root: {:?}", full);
        return Err(HttpStatus::NotFound);
    }

    let metadata = match fs::metadata(&full) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Error getting metadata for {:?}: {}", full, e);
            return Err(HttpStatus::InternalServerError);
        }
    };

    if metadata.is_dir() {
        if !path.ends_with('/') {
            return Ok(Target::Redirect(format!("{}/", raw_path)));
        }

        for index in INDEX_FILES {
            let candidate = full.join(index);
            if candidate.is_file() {
                return Ok(Target::File(candidate));
            }
        }

        return Ok(Target::Listing(full));
    }

    if metadata.is_file() {
        Ok(Target::File(full))
    } else {
        warn!("Refusing non-regular file: {:?}", full);
        Err(HttpStatus::Forbidden)
    }
}

fn sanitize(path: &str) -> Result<PathBuf, HttpStatus> {
    if path.contains('\0') {
        warn!("NUL byte in request path");
        return Err(HttpStatus::Forbidden);
    }

    let mut rel = PathBuf::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                warn!("Path traversal attempt: {}", path);
                return Err(HttpStatus::Forbidden);
            }
            segment => rel.push(segment),
        }
    }

    Ok(rel)
}

fn serve_file(stream: &mut TcpStream, path: &Path, is_head: bool, peer_addr: &str) {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!("Error getting metadata for {:?}: {}", path, e);
            send_error(stream, HttpStatus::InternalServerError);
            return;
        }
    };

    let mut headers = format!(
        "{}Content-Type: {}\r\nContent-Length: {}\r\n",
        HttpStatus::Ok.as_response_line(),
        content_type_for(path),
        metadata.len()
    );
    if let Ok(modified) = metadata.modified() {
        headers.push_str(&format!(
            "Last-Modified: {}\r\n",
            httpdate::fmt_http_date(modified)
        ));
    }
    headers.push_str("Connection: close\r\n\r\n");

    if is_head {
        if let Err(e) = stream.write_all(headers.as_bytes()) {
            error!("Error sending HEAD response to {}: {}", peer_addr, e);
            return;
        }
    } else {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                error!("Error opening file {:?} for {}: {}", path, peer_addr, e);
                send_error(stream, HttpStatus::InternalServerError);
                return;
            }
        };

        let mut reader = BufReader::new(file);
        let mut writer = BufWriter::new(&mut *stream);

        if let Err(e) = writer.write_all(headers.as_bytes()) {
            error!("Error sending headers to {}: {}", peer_addr, e);
            return;
        }

        let mut buffer = [0u8; 8192];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = writer.write_all(&buffer[..n]) {
                        error!("Error sending file data to {}: {}", peer_addr, e);
                        return;
                    }
                }
                Err(e) => {
                    error!("Error reading file for {}: {}", peer_addr, e);
                    return;
                }
            }
        }

        if let Err(e) = writer.flush() {
            error!("Error flushing stream for {}: {}", peer_addr, e);
            return;
        }
    }

    info!(
        "Served {:?} to {} ({} bytes)",
        path,
        peer_addr,
        metadata.len()
    );
}

fn serve_listing(
    stream: &mut TcpStream,
    url_path: &str,
    dir: &Path,
    is_head: bool,
    peer_addr: &str,
) {
    let body = match listing::render(url_path, dir) {
        Ok(body) => body,
        Err(e) => {
            error!("Error listing {:?}: {}", dir, e);
            send_error(stream, HttpStatus::InternalServerError);
            return;
        }
    };

    let headers = format!(
        "{}Content-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        HttpStatus::Ok.as_response_line(),
        body.len()
    );

    let result = if is_head {
        stream.write_all(headers.as_bytes())
    } else {
        stream
            .write_all(headers.as_bytes())
            .and_then(|_| stream.write_all(body.as_bytes()))
    };

    match result {
        Ok(()) => info!("Served listing of {:?} to {}", dir, peer_addr),
        Err(e) => error!("Error sending listing to {}: {}", peer_addr, e),
    }
}

fn send_redirect(stream: &mut TcpStream, location: &str) {
    let body = format!(
        "<html><body><h1>301 Moved Permanently</h1><p><a href=\"{}\">{}</a></p></body></html>",
        location,
        listing::html_escape(location)
    );

    let response = format!(
        "{}Location: {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        HttpStatus::MovedPermanently.as_response_line(),
        location,
        body.len(),
        body
    );

    if let Err(e) = stream.write_all(response.as_bytes()) {
        error!("Error sending redirect: {}", e);
    }
}

fn send_error(stream: &mut TcpStream, status: HttpStatus) {
    let body = format!(
        "<html><body><h1>{} {}</h1></body></html>",
        status.code(),
        status.text()
    );

    let allow = if status == HttpStatus::MethodNotAllowed {
        "Allow: GET, HEAD\r\n"
    } else {
        ""
    };

    let response = format!(
        "{}Content-Type: text/html\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_response_line(),
        allow,
        body.len(),
        body
    );

    if let Err(e) = stream.write_all(response.as_bytes()) {
        error!("Error sending response: {}", e);
    }
}

enum HeadRead {
    Complete(Vec<u8>),
    TooLarge,
    Closed,
}

fn read_request_head(stream: &mut TcpStream, max_request_size: usize) -> io::Result<HeadRead> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        match stream.read(&mut chunk)? {
            0 => {
                return Ok(if head.is_empty() {
                    HeadRead::Closed
                } else {
                    HeadRead::Complete(head)
                });
            }
            n => head.extend_from_slice(&chunk[..n]),
        }

        if contains_blank_line(&head) {
            return Ok(HeadRead::Complete(head));
        }
        if head.len() > max_request_size {
            return Ok(HeadRead::TooLarge);
        }
    }
}

fn contains_blank_line(head: &[u8]) -> bool {
    head.windows(4).any(|w| w == b"\r\n\r\n") || head.windows(2).any(|w| w == b"\n\n")
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "servedir-handler-{}-{}",
            std::process::id(),
            tag
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir.canonicalize().unwrap()
    }

    #[test]
    fn sanitize_rejects_traversal_and_nul() {
        assert_eq!(sanitize("/../etc/passwd"), Err(HttpStatus::Forbidden));
        assert_eq!(sanitize("/a/../../b"), Err(HttpStatus::Forbidden));
        assert_eq!(sanitize("/a/\0b"), Err(HttpStatus::Forbidden));
    }

    #[test]
    fn sanitize_drops_empty_and_dot_segments() {
        assert_eq!(sanitize("//a/./b/").unwrap(), PathBuf::from("a/b"));
        assert_eq!(sanitize("/").unwrap(), PathBuf::new());
    }

    #[test]
    fn resolves_existing_file() {
        let root = scratch_dir("file");
        fs::write(root.join("hello.txt"), "hi").unwrap();

        match resolve_target(&root, "/hello.txt", "/hello.txt") {
            Ok(Target::File(path)) => assert_eq!(path, root.join("hello.txt")),
            other => panic!("unexpected target: {:?}", other),
        }

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_file_is_not_found() {
        let root = scratch_dir("missing");

        assert_eq!(
            resolve_target(&root, "/nope.txt", "/nope.txt"),
            Err(HttpStatus::NotFound)
        );

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn directory_without_slash_redirects() {
        let root = scratch_dir("redirect");
        fs::create_dir(root.join("sub")).unwrap();

        assert_eq!(
            resolve_target(&root, "/sub", "/sub"),
            Ok(Target::Redirect("/sub/".to_string()))
        );

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn directory_with_index_serves_index() {
        let root = scratch_dir("index");
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("index.html"), "<html></html>").unwrap();

        assert_eq!(
            resolve_target(&root, "/sub/", "/sub/"),
            Ok(Target::File(root.join("sub").join("index.html")))
        );

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn directory_without_index_lists() {
        let root = scratch_dir("listing");
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("data.bin"), [0u8; 4]).unwrap();

        assert_eq!(
            resolve_target(&root, "/sub/", "/sub/"),
            Ok(Target::Listing(root.join("sub")))
        );

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn symlink_escaping_root_reads_as_absent() {
        let outside = scratch_dir("symlink-outside");
        fs::write(outside.join("secret.txt"), "secret").unwrap();

        let root = scratch_dir("symlink-root");
        std::os::unix::fs::symlink(outside.join("secret.txt"), root.join("link.txt")).unwrap();

        assert_eq!(
            resolve_target(&root, "/link.txt", "/link.txt"),
            Err(HttpStatus::NotFound)
        );

        fs::remove_dir_all(&root).unwrap();
        fs::remove_dir_all(&outside).unwrap();
    }

    #[test]
    fn symlink_inside_root_is_followed() {
        let root = scratch_dir("symlink-inside");
        fs::write(root.join("real.txt"), "data").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("alias.txt")).unwrap();

        assert_eq!(
            resolve_target(&root, "/alias.txt", "/alias.txt"),
            Ok(Target::File(root.join("real.txt")))
        );

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a.html")), "text/html");
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.tar.gz")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn blank_line_detection() {
        assert!(contains_blank_line(b"GET / HTTP/1.1\r\n\r\n"));
        assert!(contains_blank_line(b"GET /\n\n"));
        assert!(!contains_blank_line(b"GET / HTTP/1.1\r\nHost: x\r\n"));
    }
}
