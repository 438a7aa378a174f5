//! Notification message templates.
//!
//! The template language is a small Go-template flavoured subset:
//! `{{.Field}}`, `{{.}}`, `{{if ...}}`/`{{range ...}}` blocks with an optional
//! `{{else}}`, string literals, and pipelines into the functions `urlquery`,
//! `date "<strftime>"`, `upper` and `lower`. `{{-` and `-}}` trim the
//! whitespace next to an action.
use chrono::format::{Item as FormatItem, StrftimeItems};
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::warn;

use crate::model::TaskInfo;

/// Used when `notification_message` is empty.
pub const DEFAULT_MESSAGE: &str = r#"🔔 Task Reminder: {{.Description}}
🆔 ID: {{.ID}}
📁 Project: {{.Project}}
🏷️ Tags: {{range .Tags}}{{.}} {{end}}
⏰ Due: {{if .Due}}{{.Due | date "%Y-%m-%d %H:%M"}}{{else}}N/A{{end}}
📅 Notification: {{if .NotificationDate}}{{.NotificationDate | date "%Y-%m-%d %H:%M"}}{{else}}N/A{{end}}"#;

const FUNCTIONS: [&str; 4] = ["urlquery", "date", "upper", "lower"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template parse error: {0}")]
    Parse(String),
    #[error("template exec error: {0}")]
    Exec(String),
}

/// Render `template` (or the default template when empty) against `info`.
pub fn render(info: &TaskInfo, template: &str) -> Result<String, TemplateError> {
    let source = if template.is_empty() {
        DEFAULT_MESSAGE
    } else {
        template
    };
    Template::parse(source)?.execute(info)
}

/// Like [`render`], but never fails: a broken template yields
/// `"<description> (<id>)"`.
pub fn render_or_fallback(info: &TaskInfo, template: &str) -> String {
    match render(info, template) {
        Ok(message) => message,
        Err(err) => {
            warn!(%err, uuid = %info.uuid, "failed to render notification template; using fallback");
            fallback_message(info)
        }
    }
}

pub fn fallback_message(info: &TaskInfo) -> String {
    format!("{} ({})", info.description, info.id)
}

/// A parsed template, reusable across tasks.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut parser = Parser {
            items: lex(source)?,
            pos: 0,
        };
        let (nodes, stop) = parser.parse_block()?;
        match stop {
            Stop::Eof => Ok(Self { nodes }),
            Stop::Else => Err(TemplateError::Parse("unexpected {{else}}".into())),
            Stop::End => Err(TemplateError::Parse("unexpected {{end}}".into())),
        }
    }

    pub fn execute(&self, info: &TaskInfo) -> Result<String, TemplateError> {
        let mut exec = Exec {
            root: info,
            out: String::new(),
        };
        exec.run(&self.nodes, &Value::Root)?;
        Ok(exec.out)
    }
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        over: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
struct Pipeline(Vec<Command>);

#[derive(Debug, Clone)]
enum Command {
    Value(Arg),
    Call { name: String, args: Vec<Arg> },
}

#[derive(Debug, Clone)]
enum Arg {
    Field(Option<String>),
    Literal(String),
}

#[derive(Debug)]
enum Item {
    Text(String),
    Action(String),
}

fn lex(source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut trim_leading = false;

    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_leading {
            text = text.trim_start();
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| TemplateError::Parse("unclosed action".into()))?;
        let mut inner = &after[..end];

        if let Some(stripped) = inner.strip_prefix('-') {
            if stripped.starts_with(char::is_whitespace) {
                text = text.trim_end();
                inner = stripped;
            }
        }
        trim_leading = false;
        if let Some(stripped) = inner.strip_suffix('-') {
            if stripped.ends_with(char::is_whitespace) {
                trim_leading = true;
                inner = stripped;
            }
        }

        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }
        items.push(Item::Action(inner.trim().to_string()));
        rest = &after[end + 2..];
    }

    let tail = if trim_leading { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        items.push(Item::Text(tail.to_string()));
    }
    Ok(items)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Option<String>),
    Literal(String),
    Ident(String),
    Pipe,
}

fn tokenize(action: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = action.chars().peekable();

    while let Some(c) = chars.peek().copied() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '.' => {
                chars.next();
                let mut name = String::new();
                while let Some(c) = chars.peek().copied() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Field((!name.is_empty()).then_some(name)));
            }
            '"' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => literal.push('\n'),
                            Some('t') => literal.push('\t'),
                            Some(other) => literal.push(other),
                            None => break,
                        },
                        other => literal.push(other),
                    }
                }
                if !closed {
                    return Err(TemplateError::Parse(format!(
                        "unterminated string in {{{{{action}}}}}"
                    )));
                }
                tokens.push(Token::Literal(literal));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(c) = chars.peek().copied() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(TemplateError::Parse(format!(
                    "unexpected {other:?} in {{{{{action}}}}}"
                )))
            }
        }
    }
    Ok(tokens)
}

fn to_arg(token: &Token) -> Result<Arg, TemplateError> {
    match token {
        Token::Field(name) => Ok(Arg::Field(name.clone())),
        Token::Literal(value) => Ok(Arg::Literal(value.clone())),
        Token::Ident(name) => Err(TemplateError::Parse(format!(
            "function {name} cannot be used as an argument"
        ))),
        Token::Pipe => Err(TemplateError::Parse("unexpected |".into())),
    }
}

fn parse_pipeline(tokens: &[Token]) -> Result<Pipeline, TemplateError> {
    if tokens.is_empty() {
        return Err(TemplateError::Parse("missing value in action".into()));
    }
    let mut commands = Vec::new();
    for (idx, segment) in tokens.split(|t| *t == Token::Pipe).enumerate() {
        let command = match segment {
            [] => return Err(TemplateError::Parse("empty command in pipeline".into())),
            [Token::Ident(name), args @ ..] => {
                if !FUNCTIONS.contains(&name.as_str()) {
                    return Err(TemplateError::Parse(format!("function {name:?} not defined")));
                }
                Command::Call {
                    name: name.clone(),
                    args: args.iter().map(to_arg).collect::<Result<_, _>>()?,
                }
            }
            [single] if idx == 0 => Command::Value(to_arg(single)?),
            _ => return Err(TemplateError::Parse("unexpected operand in pipeline".into())),
        };
        commands.push(command);
    }
    Ok(Pipeline(commands))
}

enum Stop {
    Eof,
    Else,
    End,
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
}

impl Parser {
    fn parse_block(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();
        while self.pos < self.items.len() {
            let action = match &self.items[self.pos] {
                Item::Text(text) => {
                    nodes.push(Node::Text(text.clone()));
                    self.pos += 1;
                    continue;
                }
                Item::Action(action) => action.clone(),
            };
            self.pos += 1;

            let tokens = tokenize(&action)?;
            match tokens.first() {
                Some(Token::Ident(kw)) if kw == "end" => return Ok((nodes, Stop::End)),
                Some(Token::Ident(kw)) if kw == "else" => return Ok((nodes, Stop::Else)),
                Some(Token::Ident(kw)) if kw == "if" || kw == "range" => {
                    let pipeline = parse_pipeline(&tokens[1..])?;
                    let (body, stop) = self.parse_block()?;
                    let otherwise = match stop {
                        Stop::End => Vec::new(),
                        Stop::Else => match self.parse_block()? {
                            (otherwise, Stop::End) => otherwise,
                            _ => {
                                return Err(TemplateError::Parse(format!(
                                    "missing {{{{end}}}} for {{{{{kw}}}}}"
                                )))
                            }
                        },
                        Stop::Eof => {
                            return Err(TemplateError::Parse(format!(
                                "missing {{{{end}}}} for {{{{{kw}}}}}"
                            )))
                        }
                    };
                    nodes.push(if kw == "if" {
                        Node::If {
                            cond: pipeline,
                            then: body,
                            otherwise,
                        }
                    } else {
                        Node::Range {
                            over: pipeline,
                            body,
                            otherwise,
                        }
                    });
                }
                _ => nodes.push(Node::Output(parse_pipeline(&tokens)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }
}

#[derive(Debug, Clone)]
enum Value {
    Root,
    Str(String),
    List(Vec<String>),
    Time(DateTime<Local>),
    Nil,
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Root | Value::Time(_) => true,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Nil => false,
        }
    }

    fn print(&self) -> Result<String, TemplateError> {
        match self {
            Value::Root => Err(TemplateError::Exec("cannot print the task itself".into())),
            Value::Str(s) => Ok(s.clone()),
            Value::List(items) => Ok(format!("[{}]", items.join(" "))),
            Value::Time(t) => Ok(t.format("%Y-%m-%d %H:%M").to_string()),
            Value::Nil => Ok(String::new()),
        }
    }
}

struct Exec<'a> {
    root: &'a TaskInfo,
    out: String,
}

impl Exec<'_> {
    fn run(&mut self, nodes: &[Node], dot: &Value) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Output(pipeline) => {
                    let value = self.eval_pipeline(pipeline, dot)?;
                    let printed = value.print()?;
                    self.out.push_str(&printed);
                }
                Node::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval_pipeline(cond, dot)?.truthy() {
                        self.run(then, dot)?;
                    } else {
                        self.run(otherwise, dot)?;
                    }
                }
                Node::Range {
                    over,
                    body,
                    otherwise,
                } => match self.eval_pipeline(over, dot)? {
                    Value::List(items) if !items.is_empty() => {
                        for item in items {
                            self.run(body, &Value::Str(item))?;
                        }
                    }
                    Value::List(_) | Value::Nil => self.run(otherwise, dot)?,
                    _ => return Err(TemplateError::Exec("range can't iterate over value".into())),
                },
            }
        }
        Ok(())
    }

    fn field(&self, dot: &Value, name: &str) -> Result<Value, TemplateError> {
        if !matches!(dot, Value::Root) {
            return Err(TemplateError::Exec(format!(
                "can't evaluate field {name} outside the task"
            )));
        }
        let info = self.root;
        let value = match name {
            "ID" => Value::Str(info.id.clone()),
            "UUID" => Value::Str(info.uuid.clone()),
            "Description" => Value::Str(info.description.clone()),
            "Project" => Value::Str(info.project.clone()),
            "Priority" => Value::Str(info.priority.clone()),
            "Tags" => Value::List(info.tags.clone()),
            "Due" => info.due.map_or(Value::Nil, Value::Time),
            "NotificationDate" => info.notification_date.map_or(Value::Nil, Value::Time),
            other => return Err(TemplateError::Exec(format!("can't evaluate field {other}"))),
        };
        Ok(value)
    }

    fn eval_arg(&self, arg: &Arg, dot: &Value) -> Result<Value, TemplateError> {
        match arg {
            Arg::Field(None) => Ok(dot.clone()),
            Arg::Field(Some(name)) => self.field(dot, name),
            Arg::Literal(value) => Ok(Value::Str(value.clone())),
        }
    }

    fn eval_pipeline(&self, pipeline: &Pipeline, dot: &Value) -> Result<Value, TemplateError> {
        let mut piped: Option<Value> = None;
        for command in &pipeline.0 {
            let value = match command {
                Command::Value(arg) => self.eval_arg(arg, dot)?,
                Command::Call { name, args } => {
                    let mut values = args
                        .iter()
                        .map(|a| self.eval_arg(a, dot))
                        .collect::<Result<Vec<_>, _>>()?;
                    if let Some(prev) = piped.take() {
                        values.push(prev);
                    }
                    call(name, values)?
                }
            };
            piped = Some(value);
        }
        Ok(piped.unwrap_or(Value::Nil))
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "urlquery" => {
            let joined = args
                .iter()
                .map(Value::print)
                .collect::<Result<Vec<_>, _>>()?
                .concat();
            Ok(Value::Str(url_query_escape(&joined)))
        }
        "upper" | "lower" => {
            let [value] = <[Value; 1]>::try_from(args)
                .map_err(|_| TemplateError::Exec(format!("{name} takes one argument")))?;
            let printed = value.print()?;
            Ok(Value::Str(if name == "upper" {
                printed.to_uppercase()
            } else {
                printed.to_lowercase()
            }))
        }
        "date" => {
            let [layout, value] = <[Value; 2]>::try_from(args)
                .map_err(|_| TemplateError::Exec("date takes a layout and a value".into()))?;
            let layout = layout.print()?;
            let instant = match value {
                Value::Nil => return Ok(Value::Str(String::new())),
                Value::Time(t) => t,
                Value::Str(s) => crate::due::parse_notification_date(&s)
                    .ok_or_else(|| TemplateError::Exec(format!("date: cannot parse {s:?}")))?,
                _ => return Err(TemplateError::Exec("date: value is not a date".into())),
            };
            format_date(instant, &layout).map(Value::Str)
        }
        other => Err(TemplateError::Exec(format!("function {other:?} not defined"))),
    }
}

fn format_date(instant: DateTime<Local>, layout: &str) -> Result<String, TemplateError> {
    if StrftimeItems::new(layout).any(|item| matches!(item, FormatItem::Error)) {
        return Err(TemplateError::Exec(format!("date: invalid layout {layout:?}")));
    }
    let mut out = String::new();
    write!(out, "{}", instant.format(layout))
        .map_err(|_| TemplateError::Exec(format!("date: cannot format with {layout:?}")))?;
    Ok(out)
}

/// Query-string escaping: space becomes `+`, reserved bytes are percent-encoded.
pub fn url_query_escape(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> TaskInfo {
        let at = Local.with_ymd_and_hms(2025, 8, 31, 15, 0, 0).unwrap();
        TaskInfo {
            id: "1".into(),
            uuid: "u1".into(),
            description: "do things".into(),
            tags: vec!["a".into(), "b".into()],
            project: "proj".into(),
            priority: "H".into(),
            due: Some(at),
            notification_date: Some(at),
        }
    }

    #[test]
    fn default_template_contains_fields_in_order() {
        let msg = render(&sample(), "").unwrap();
        assert!(msg.contains("do things"));
        assert!(msg.contains("Project: proj"));
        assert!(msg.contains("Tags: a b "));
        assert!(msg.contains("Due: 2025-08-31 15:00"));
        assert!(msg.contains("Notification: 2025-08-31 15:00"));
    }

    #[test]
    fn default_template_without_dates_prints_na() {
        let mut info = sample();
        info.due = None;
        info.notification_date = None;
        let msg = render(&info, "").unwrap();
        assert!(msg.contains("Due: N/A"));
        assert!(msg.contains("Notification: N/A"));
    }

    #[test]
    fn custom_template_with_range_and_date() {
        let tmpl = r#"{{.Description}}|{{.ID}}|{{.Project}}|{{range .Tags}}{{.}};{{end}}|{{if .Due}}{{.Due | date "%Y-%m-%d"}}{{end}}"#;
        assert_eq!(render(&sample(), tmpl).unwrap(), "do things|1|proj|a;b;|2025-08-31");
    }

    #[test]
    fn range_else_on_empty_tags() {
        let mut info = sample();
        info.tags.clear();
        info.project.clear();
        let tmpl = "{{.Project}}|{{range .Tags}}{{.}}{{else}}(no-tags){{end}}";
        assert_eq!(render(&info, tmpl).unwrap(), "|(no-tags)");
    }

    #[test]
    fn text_is_copied_verbatim() {
        let mut info = sample();
        info.description = "line1\nline2 & <special>".into();
        info.tags = vec!["b".into(), "a".into()];
        let got = render(&info, "{{.Description}}|{{range .Tags}}{{.}};{{end}}").unwrap();
        assert_eq!(got, "line1\nline2 & <special>|b;a;");
    }

    #[test]
    fn urlquery_escapes_slash_and_space() {
        let mut info = sample();
        info.uuid = "u/with spaces".into();
        let got = render(&info, "https://example.com/task/{{.UUID | urlquery}}").unwrap();
        assert_eq!(got, "https://example.com/task/u%2Fwith+spaces");
        let direct = render(&info, "{{urlquery .UUID}}").unwrap();
        assert_eq!(direct, "u%2Fwith+spaces");
    }

    #[test]
    fn trim_markers_remove_adjacent_whitespace() {
        let got = render(&sample(), "a   {{- .ID -}}   b").unwrap();
        assert_eq!(got, "a1b");
    }

    #[test]
    fn upper_and_lower() {
        assert_eq!(render(&sample(), "{{.Project | upper}}").unwrap(), "PROJ");
        assert_eq!(render(&sample(), r#"{{lower "ABC"}}"#).unwrap(), "abc");
    }

    #[test]
    fn malformed_templates_error() {
        assert!(matches!(render(&sample(), "{{.Description"), Err(TemplateError::Parse(_))));
        assert!(matches!(render(&sample(), "{{if .Due}}x"), Err(TemplateError::Parse(_))));
        assert!(matches!(render(&sample(), "{{end}}"), Err(TemplateError::Parse(_))));
        assert!(matches!(render(&sample(), "{{.ID | shout}}"), Err(TemplateError::Parse(_))));
        assert!(matches!(render(&sample(), "{{.Nope}}"), Err(TemplateError::Exec(_))));
        assert!(matches!(
            render(&sample(), r#"{{.Due | date "%Q"}}"#),
            Err(TemplateError::Exec(_))
        ));
    }

    #[test]
    fn fallback_on_broken_template() {
        assert_eq!(render_or_fallback(&sample(), "{{.Description"), "do things (1)");
        assert_eq!(render_or_fallback(&sample(), "{{.Description}}"), "do things");
    }
}
