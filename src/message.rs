//! Templates for the four kinds of mail and the substitution of values into them.
//!
//! Templates use `{key}` placeholders. Substitution is a single pass over the
//! template, values are inserted as is and never scanned for placeholders
//! themselves. Unknown keys are left in place.

use std::{borrow::Cow, collections::BTreeMap, fmt::Display};

use crate::{config::Config, mailer::Email, report::Report, utils::escape_html};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Start,
    Report,
    Interruption,
    Completed,
}

impl Display for MailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MailKind::Start => "start",
            MailKind::Report => "report",
            MailKind::Interruption => "interruption",
            MailKind::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Html,
}

struct Template {
    subject: &'static str,
    lines: &'static [&'static str],
}

const FOOTER: &[&str] = &[
    "",
    "Sent by task_mailer for {username}@{hostname} from {pwd} on {now}.",
];

const HTML_LAYOUT: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>{subject}</title></head>
<body>
{body_html}
</body>
</html>
";

impl MailKind {
    fn template(&self) -> Template {
        match self {
            MailKind::Start => Template {
                subject: "[{task_name}] Started on {hostname}",
                lines: &[
                    "Your task {task_name} has started on {hostname}.",
                    "It is running as {username} in {pwd}.",
                    "Reports will be sent at most every {report_timeout} {report_timeout_unit_name} while rows are being added.",
                ],
            },
            MailKind::Report => Template {
                subject: "[{task_name}] Report after {elapsed}",
                lines: &[
                    "Your task {task_name} has been running on {hostname} for {elapsed}.",
                    "{report}",
                ],
            },
            MailKind::Interruption => Template {
                subject: "[{task_name}] Failed after {elapsed}",
                lines: &[
                    "Your task {task_name} on {hostname} stopped with an error after {elapsed}.",
                    "{interrupt}",
                    "{report}",
                ],
            },
            MailKind::Completed => Template {
                subject: "[{task_name}] Completed in {elapsed}",
                lines: &[
                    "Your task {task_name} on {hostname} completed successfully after {elapsed}.",
                    "{report}",
                ],
            },
        }
    }
}

/// Values available to the templates
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Context {
    values: BTreeMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Adds every setting, under the same names as in the cache file
    pub fn with_config(&mut self, config: &Config) -> &mut Self {
        self.set("email", &config.email)
            .set("task_name", &config.task_name)
            .set("recipients", &config.recipients)
            .set("report_timeout_unit", config.report_timeout_unit.to_string())
            .set("report_timeout_unit_name", config.report_timeout_unit.name())
            .set("report_timeout", config.report_timeout.to_string())
            .set("port", config.port.to_string())
            .set("smtp_server", &config.smtp_server)
    }

    pub fn with_report(&mut self, report: &Report) -> &mut Self {
        let (txt, html) = if report.is_empty() {
            (String::new(), String::new())
        } else {
            let tail = report.tail(5);
            (
                format!("Latest report rows:\n{}", tail.to_pipe_table()),
                format!("<p>Latest report rows:</p>{}", tail.to_html()),
            )
        };
        self.set("report_txt", txt).set("report_html", html)
    }

    /// `description` is plain text, possibly spanning several lines
    pub fn with_interruption(&mut self, description: Option<&str>) -> &mut Self {
        let txt = description.unwrap_or_default();
        let html = escape_html(txt).replace('\n', "<br>");
        self.set("interrupt_txt", txt).set("interrupt_html", html)
    }

    /// Looks up `key` as seen from a template written in `format`
    ///
    /// `report` and `interrupt` resolve to their `_txt` or `_html` variant.
    /// Other values are escaped for HTML unless their name ends in `_html`.
    fn lookup(&self, key: &str, format: Format) -> Option<Cow<str>> {
        let suffix = match format {
            Format::Text => "txt",
            Format::Html => "html",
        };
        let key: Cow<str> = match key {
            "report" | "interrupt" => Cow::Owned(format!("{key}_{suffix}")),
            other => Cow::Borrowed(other),
        };
        let value = self.get(&key)?;
        if format == Format::Html && !key.ends_with("_html") {
            Some(escape_html(value))
        } else {
            Some(Cow::Borrowed(value))
        }
    }
}

/// Replaces every `{key}` in `template` that `context` has a value for
pub fn render(template: &str, context: &Context) -> String {
    render_as(template, context, Format::Text)
}

fn render_as(template: &str, context: &Context, format: Format) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(['}', '{']) {
            Some(close) if after.as_bytes()[close] == b'}' => {
                let key = &after[..close];
                match context.lookup(key, format) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Builds the mail of `kind`, template lines that render empty are dropped
pub fn compose(kind: MailKind, context: &Context) -> Email {
    let template = kind.template();
    let body = |format: Format, separator: &str| -> String {
        template
            .lines
            .iter()
            .chain(FOOTER)
            .filter_map(|line| {
                let rendered = render_as(line, context, format);
                (line.is_empty() || !rendered.is_empty()).then_some(rendered)
            })
            .collect::<Vec<_>>()
            .join(separator)
    };

    let subject = render_as(template.subject, context, Format::Text);
    let text = body(Format::Text, "\n");
    let mut layout = Context::new();
    layout
        .set("subject", subject.clone())
        .set("body_html", body(Format::Html, "<br>"));
    let html = render_as(HTML_LAYOUT, &layout, Format::Html);

    Email {
        subject,
        text,
        html,
    }
}
