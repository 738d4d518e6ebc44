//! Server-rendered homepage with one notice slot per form.

use axum::response::{Html, IntoResponse, Response};

use crate::records::FileRecord;

const TEMPLATE: &str = include_str!("../assets/homepage.html");

/// Form section a notice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Upload,
    Download,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        let class = match self.kind {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
        };
        format!(
            r#"<p class="notice {class}">{}</p>"#,
            escape_html(&self.text)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct HomePage {
    upload: Option<Notice>,
    download: Option<Notice>,
    delete: Option<Notice>,
    file: Option<FileRecord>,
}

impl HomePage {
    pub fn with_notice(mut self, panel: Panel, notice: Notice) -> Self {
        let slot = match panel {
            Panel::Upload => &mut self.upload,
            Panel::Download => &mut self.download,
            Panel::Delete => &mut self.delete,
        };
        *slot = Some(notice);
        self
    }

    pub fn with_file(mut self, record: FileRecord) -> Self {
        self.file = Some(record);
        self
    }

    /// Fills every `{{slot}}` in one pass; inserted values are never rescanned.
    pub fn render(&self) -> String {
        let mut html = String::with_capacity(TEMPLATE.len() + 512);
        let mut rest = TEMPLATE;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let key = &rest[start + 2..start + 2 + len];
            html.push_str(&rest[..start]);
            match key {
                "upload_notice" => html.push_str(&render_slot(self.upload.as_ref())),
                "file_details" => html.push_str(&self.render_file()),
                "download_notice" => html.push_str(&render_slot(self.download.as_ref())),
                "delete_notice" => html.push_str(&render_slot(self.delete.as_ref())),
                _ => html.push_str(&rest[start..start + len + 4]),
            }
            rest = &rest[start + len + 4..];
        }
        html.push_str(rest);
        html
    }

    // The storage name stays server-side.
    fn render_file(&self) -> String {
        let Some(record) = &self.file else {
            return String::new();
        };
        format!(
            "<dl>\
             <dt>Name</dt><dd>{}</dd>\
             <dt>Size</dt><dd>{} bytes</dd>\
             <dt>Type</dt><dd>{}</dd>\
             <dt>Uploaded</dt><dd>{}</dd>\
             <dt>Uploader</dt><dd>{}</dd>\
             </dl>",
            escape_html(&record.original_name),
            record.size_bytes,
            escape_html(&record.mime_type),
            record.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            escape_html(record.uploader.as_deref().unwrap_or_default()),
        )
    }
}

impl IntoResponse for HomePage {
    fn into_response(self) -> Response {
        Html(self.render()).into_response()
    }
}

fn render_slot(notice: Option<&Notice>) -> String {
    notice.map(Notice::render).unwrap_or_default()
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
