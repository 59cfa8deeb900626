use chrono::{DateTime, Utc};
use log::warn;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::fs;
use std::io;
use std::path::Path;

/// Bytes escaped in generated hrefs on top of the control set.
const HREF_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'#')
    .add(b'?')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'/');

struct Entry {
    name: String,
    is_dir: bool,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Renders a directory listing page for `dir`, shown under `url_path`.
/// Entries are sorted case-insensitively; unreadable entries are skipped.
pub fn render(url_path: &str, dir: &Path) -> io::Result<String> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping unreadable entry {:?}: {}", entry.path(), e);
                continue;
            }
        };

        entries.push(Entry {
            name,
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

    let title = format!("Directory listing for {}", html_escape(url_path));

    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str(&format!("<title>{}</title>\n", title));
    html.push_str("</head>\n<body>\n");
    html.push_str(&format!("<h1>{}</h1>\n<hr>\n", title));
    html.push_str("<table>\n");
    html.push_str(
        "<tr><th align=\"left\">Name</th><th align=\"right\">Size</th><th align=\"left\">Modified</th></tr>\n",
    );

    for entry in &entries {
        let mut href = utf8_percent_encode(&entry.name, HREF_ENCODE_SET).to_string();
        let mut label = html_escape(&entry.name);
        if entry.is_dir {
            href.push('/');
            label.push('/');
        }

        let size = if entry.is_dir {
            "-".to_string()
        } else {
            entry.size.to_string()
        };
        let modified = entry
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        html.push_str(&format!(
            "<tr><td><a href=\"{}\">{}</a></td><td align=\"right\">{}</td><td>{}</td></tr>\n",
            href, label, size, modified
        ));
    }

    html.push_str("</table>\n<hr>\n</body>\n</html>\n");
    Ok(html)
}

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "servedir-listing-{}-{}",
            std::process::id(),
            tag
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn lists_entries_sorted_case_insensitively() {
        let dir = scratch_dir("sorted");
        fs::write(dir.join("b.txt"), "b").unwrap();
        fs::write(dir.join("Alpha.txt"), "a").unwrap();
        fs::create_dir(dir.join("zdir")).unwrap();

        let html = render("/", &dir).unwrap();
        let alpha = html.find("Alpha.txt").unwrap();
        let b = html.find("b.txt").unwrap();
        let z = html.find("zdir/").unwrap();
        assert!(alpha < b && b < z, "unexpected order in: {}", html);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn directories_get_trailing_slash_and_no_size() {
        let dir = scratch_dir("dirs");
        fs::create_dir(dir.join("sub")).unwrap();

        let html = render("/", &dir).unwrap();
        assert!(html.contains("<a href=\"sub/\">sub/</a>"));
        assert!(html.contains("<td align=\"right\">-</td>"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn names_are_encoded_in_hrefs_and_escaped_in_labels() {
        let dir = scratch_dir("escape");
        fs::write(dir.join("a b<c>&.txt"), "x").unwrap();

        let html = render("/", &dir).unwrap();
        assert!(html.contains("href=\"a%20b%3Cc%3E%26.txt\""), "html: {}", html);
        assert!(html.contains(">a b&lt;c&gt;&amp;.txt</a>"), "html: {}", html);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn title_reflects_request_path() {
        let dir = scratch_dir("title");

        let html = render("/sub/", &dir).unwrap();
        assert!(html.contains("<title>Directory listing for /sub/</title>"));
        assert!(html.contains("<h1>Directory listing for /sub/</h1>"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = scratch_dir("gone");
        fs::remove_dir_all(&dir).unwrap();

        assert!(render("/", &dir).is_err());
    }

    #[test]
    fn escapes_html_metacharacters() {
        assert_eq!(html_escape("a&b<c>\"d\""), "a&amp;b&lt;c&gt;&quot;d&quot;");
        assert_eq!(html_escape("plain"), "plain");
    }
}
