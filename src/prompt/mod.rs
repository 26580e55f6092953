//! Criterion prompt rendering.
//!
//! Templates use `##placeholder##` markers. The full placeholder set is the
//! submission itself plus the task and course context of the feedback the
//! criterion belongs to. Rendering is pure: no I/O, freely repeatable.

use crate::error::TemplateError;

/// Context values a template may reference. Absent optional values render
/// as empty strings; a marker that matches none of these keys fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptContext<'a> {
    pub submission: &'a str,
    pub task_title: &'a str,
    pub task_description: &'a str,
    pub task_context: &'a str,
    pub course_name: &'a str,
    pub course_context: &'a str,
}

impl PromptContext<'_> {
    fn lookup(&self, key: &str) -> Option<&str> {
        match key {
            "submission" => Some(self.submission),
            "task_title" => Some(self.task_title),
            "task_description" => Some(self.task_description),
            "task_context" => Some(self.task_context),
            "course_name" => Some(self.course_name),
            "course_context" => Some(self.course_context),
            _ => None,
        }
    }
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Render `template` against `context`.
///
/// A `##key##` pair whose key looks like a placeholder but matches no
/// context value is a [`TemplateError`]. Marker pairs that don't look like
/// placeholders (say, a Markdown heading) pass through literally.
pub fn render(template: &str, context: &PromptContext<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("##") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("##") else {
            // Unpaired marker; keep the tail verbatim.
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let key = &after[..end];
        if is_placeholder_key(key) {
            match context.lookup(key) {
                Some(value) => {
                    out.push_str(value);
                    rest = &after[end + 2..];
                }
                None => {
                    return Err(TemplateError {
                        name: key.to_string(),
                    });
                }
            }
        } else {
            out.push_str("##");
            rest = after;
        }
    }

    out.push_str(rest);
    Ok(out)
}
