// src/message.rs
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::rabbitmq::errors::{BoxError, PublishError, TemplateError};

/// What an action produced for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<R> {
    Nothing,
    One(R),
    Many(Vec<R>),
}

impl<R> From<Option<R>> for Outcome<R> {
    fn from(value: Option<R>) -> Self {
        value.map_or(Outcome::Nothing, Outcome::One)
    }
}

impl<R> From<Vec<R>> for Outcome<R> {
    fn from(value: Vec<R>) -> Self {
        Outcome::Many(value)
    }
}

/// Structured serialization capability. Messages exposing it are published
/// with a type-qualified content-type instead of their text form.
pub trait Serializable {
    fn type_name(&self) -> String;
    fn media_type(&self) -> &str;
    fn to_bytes(&self) -> Result<Vec<u8>, BoxError>;
}

/// A value that can be published to the outbound exchange.
pub trait OutboundMessage: Send + Sync + 'static {
    /// Text form, used for `{}` placeholders and as the body of
    /// non-structured messages.
    fn text(&self) -> String;

    /// Named field for `{name}` placeholders. Dotted paths are allowed.
    fn field(&self, _name: &str) -> Option<String> {
        None
    }

    fn as_serializable(&self) -> Option<&dyn Serializable> {
        None
    }

    /// Empty single results are not published.
    fn is_empty(&self) -> bool {
        self.text().is_empty()
    }
}

impl OutboundMessage for String {
    fn text(&self) -> String {
        self.clone()
    }
}

impl OutboundMessage for Value {
    fn text(&self) -> String {
        value_text(self)
    }

    fn field(&self, name: &str) -> Option<String> {
        lookup_path(self, name).map(value_text)
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Publishes `T` as `application/json; class="<type>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> Serializable for Json<T> {
    fn type_name(&self) -> String {
        std::any::type_name::<T>().to_string()
    }

    fn media_type(&self) -> &str {
        "application/json"
    }

    fn to_bytes(&self) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(&self.0)?)
    }
}

impl<T> OutboundMessage for Json<T>
where
    T: Serialize + Send + Sync + 'static,
{
    fn text(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    fn field(&self, name: &str) -> Option<String> {
        let value = serde_json::to_value(&self.0).ok()?;
        lookup_path(&value, name).map(value_text)
    }

    fn as_serializable(&self) -> Option<&dyn Serializable> {
        Some(self)
    }
}

/// Body and metadata of one outbound message, ready for the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    pub body: Vec<u8>,
    pub content_type: String,
    pub message_type: Option<String>,
}

pub fn encode<R: OutboundMessage + ?Sized>(
    message: &R,
    default_content_type: &Template,
) -> Result<Encoded, PublishError> {
    match message.as_serializable() {
        Some(structured) => {
            let type_name = structured.type_name();
            Ok(Encoded {
                body: structured.to_bytes().map_err(PublishError::Serialization)?,
                content_type: format!("{}; class=\"{}\"", structured.media_type(), type_name),
                message_type: Some(type_name),
            })
        }
        None => Ok(Encoded {
            body: message.text().into_bytes(),
            content_type: default_content_type.render(message)?,
            message_type: None,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Whole,
    Field(String),
}

/// Brace template applied to outbound messages: `{}`/`{0}` for the text form,
/// `{0.name}`/`{name}` for a field, `{{`/`}}` for literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::Unbalanced(pos, source.to_string())),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, '{')) | None => {
                                return Err(TemplateError::Unbalanced(pos, source.to_string()))
                            }
                            Some((_, ch)) => name.push(ch),
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(placeholder(&name)?);
                }
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render<R: OutboundMessage + ?Sized>(&self, message: &R) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Whole => out.push_str(&message.text()),
                Segment::Field(name) => {
                    let value = message
                        .field(name)
                        .ok_or_else(|| TemplateError::MissingField(name.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn placeholder(name: &str) -> Result<Segment, TemplateError> {
    let name = name.trim();
    let field = match name {
        "" | "0" => return Ok(Segment::Whole),
        _ => name.strip_prefix("0.").unwrap_or(name),
    };

    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if valid {
        Ok(Segment::Field(field.to_string()))
    } else {
        Err(TemplateError::Placeholder(name.to_string()))
    }
}

/// Converter for UTF-8 text payloads.
pub fn utf8_text(body: &[u8]) -> Result<String, BoxError> {
    Ok(std::str::from_utf8(body)?.to_string())
}

/// Converter deserializing JSON payloads into `T`.
pub fn json<T>() -> impl Fn(&[u8]) -> Result<T, BoxError> + Send + Sync + 'static
where
    T: DeserializeOwned + 'static,
{
    |body: &[u8]| -> Result<T, BoxError> { Ok(serde_json::from_slice(body)?) }
}
