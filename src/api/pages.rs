//! HTML pages served by the web app.

use crate::upload::MediaKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Page {
    Index,
    Camera,
    Photo,
    Video,
}

impl Page {
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Page::Index),
            "/camera" => Some(Page::Camera),
            "/photo" => Some(Page::Photo),
            "/video" => Some(Page::Video),
            _ => None,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Page::Index => "Face Veil",
            Page::Camera => "Live camera",
            Page::Photo => "Anonymize a photo",
            Page::Video => "Anonymize a video",
        }
    }

    fn content(self) -> String {
        match self {
            Page::Index => r#"<ul>
  <li><a href="/camera">Live camera</a></li>
  <li><a href="/photo">Photo upload</a></li>
  <li><a href="/video">Video upload</a></li>
</ul>"#
                .to_string(),
            Page::Camera => r#"<div class="feeds">
  <figure><img src="/video_feed_raw" alt="raw camera feed"><figcaption>Original</figcaption></figure>
  <figure><img src="/video_feed_processed" alt="anonymized camera feed"><figcaption>Anonymized</figcaption></figure>
</div>
<p><a href="/shutdown_camera">Stop camera</a></p>"#
                .to_string(),
            Page::Photo => upload_form("/process_photo", "photo", MediaKind::Image),
            Page::Video => upload_form("/process_video", "video", MediaKind::Video),
        }
    }
}

fn upload_form(action: &str, field: &str, kind: MediaKind) -> String {
    format!(
        r#"<form action="{action}" method="post" enctype="multipart/form-data">
  <input type="file" name="{field}" accept="{accept}" required>
  <button type="submit">Anonymize</button>
</form>"#,
        accept = kind.accept_attr()
    )
}

/// Render `page`, showing `flash` once if present.
pub(crate) fn render(page: Page, flash: Option<&str>) -> String {
    let flash = flash
        .map(|message| format!("<p class=\"flash\">{}</p>\n", escape(message)))
        .unwrap_or_default();
    let nav = if page == Page::Index {
        ""
    } else {
        "<p><a href=\"/\">Home</a></p>\n"
    };
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n{flash}{content}\n{nav}</body>\n</html>\n",
        title = page.title(),
        content = page.content(),
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_is_escaped() {
        let html = render(Page::Photo, Some("<b>bad</b>"));
        assert!(html.contains("&lt;b&gt;bad&lt;/b&gt;"));
        assert!(!html.contains("<b>bad"));
    }

    #[test]
    fn upload_pages_post_to_their_handlers() {
        let photo = render(Page::Photo, None);
        assert!(photo.contains(r#"action="/process_photo""#));
        assert!(photo.contains(r#"name="photo""#));
        let video = render(Page::Video, None);
        assert!(video.contains(r#"action="/process_video""#));
        assert!(video.contains(".mp4,.mov,.avi"));
        assert!(!video.contains("class=\"flash\""));
    }

    #[test]
    fn camera_page_embeds_both_feeds() {
        let html = render(Page::Camera, None);
        assert!(html.contains("/video_feed_raw"));
        assert!(html.contains("/video_feed_processed"));
        assert!(html.contains("/shutdown_camera"));
    }

    #[test]
    fn unknown_paths_have_no_page() {
        assert_eq!(Page::from_path("/"), Some(Page::Index));
        assert_eq!(Page::from_path("/admin"), None);
    }
}
