//! XML via `quick-xml`.
//!
//! Every value is an element named after its type:
//!
//! ```text
//! <object>
//!   <member name="id"><integer>7</integer></member>
//!   <member name="tags"><array><string>a</string><null/></array></member>
//! </object>
//! ```

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Error, Result};
use crate::message::codec::{ValueReader, ValueWriter};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

const MEMBER: &str = "member";
const NAME_ATTR: &str = "name";

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::codec(format!("xml: {}", e))
}

impl ValueWriter for XmlCodec {
    fn write_value(&self, value: &Value, out: &mut dyn Write) -> Result<()> {
        let mut writer = Writer::new(out);
        emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        write_node(&mut writer, value)
    }
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<()> {
    writer.write_event(event).map_err(xml_err)
}

fn write_node<W: Write>(writer: &mut Writer<W>, value: &Value) -> Result<()> {
    let tag = value.type_name();
    match value {
        Value::Null => emit(writer, Event::Empty(BytesStart::new(tag))),
        Value::List(items) if items.is_empty() => emit(writer, Event::Empty(BytesStart::new(tag))),
        Value::Map(members) if members.is_empty() => emit(writer, Event::Empty(BytesStart::new(tag))),
        Value::List(items) => {
            emit(writer, Event::Start(BytesStart::new(tag)))?;
            for item in items {
                write_node(writer, item)?;
            }
            emit(writer, Event::End(BytesEnd::new(tag)))
        }
        Value::Map(members) => {
            emit(writer, Event::Start(BytesStart::new(tag)))?;
            for (key, member) in members {
                let start = BytesStart::new(MEMBER).with_attributes([(NAME_ATTR, key.as_str())]);
                emit(writer, Event::Start(start))?;
                write_node(writer, member)?;
                emit(writer, Event::End(BytesEnd::new(MEMBER)))?;
            }
            emit(writer, Event::End(BytesEnd::new(tag)))
        }
        scalar => {
            let text = scalar.to_scalar_string().unwrap_or_default();
            if text.is_empty() {
                return emit(writer, Event::Empty(BytesStart::new(tag)));
            }
            emit(writer, Event::Start(BytesStart::new(tag)))?;
            emit(writer, Event::Text(BytesText::new(&text)))?;
            emit(writer, Event::End(BytesEnd::new(tag)))
        }
    }
}

impl ValueReader for XmlCodec {
    fn read_value(&self, input: &mut dyn Read) -> Result<Value> {
        let mut parser = Parser {
            reader: Reader::from_reader(BufReader::new(input)),
            buf: Vec::new(),
        };
        match parser.next_element()? {
            Node::Eof => Err(Error::codec("xml: empty document")),
            root => parser.value_from(root),
        }
    }
}

/// Owned view of the events the value grammar cares about.
#[derive(Debug)]
enum Node {
    Open(String, Option<String>),
    Leaf(String, Option<String>),
    Close(String),
    Text(String),
    Eof,
}

struct Parser<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

fn element_parts(e: &BytesStart<'_>) -> Result<(String, Option<String>)> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let name = if tag == MEMBER {
        match e.try_get_attribute(NAME_ATTR).map_err(xml_err)? {
            Some(attr) => Some(attr.unescape_value().map_err(xml_err)?.into_owned()),
            None => None,
        }
    } else {
        None
    };
    Ok((tag, name))
}

impl<R: BufRead> Parser<R> {
    fn next(&mut self) -> Result<Node> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf).map_err(xml_err)?;
            return Ok(match event {
                Event::Start(e) => {
                    let (tag, name) = element_parts(&e)?;
                    Node::Open(tag, name)
                }
                Event::Empty(e) => {
                    let (tag, name) = element_parts(&e)?;
                    Node::Leaf(tag, name)
                }
                Event::End(e) => Node::Close(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
                Event::Text(e) => Node::Text(e.unescape().map_err(xml_err)?.into_owned()),
                Event::CData(e) => Node::Text(String::from_utf8_lossy(&e).into_owned()),
                Event::Eof => Node::Eof,
                // declarations, comments, processing instructions, doctype
                _ => continue,
            });
        }
    }

    /// Next node that is not whitespace between elements.
    fn next_element(&mut self) -> Result<Node> {
        loop {
            match self.next()? {
                Node::Text(t) if t.trim().is_empty() => continue,
                node => return Ok(node),
            }
        }
    }

    fn text_until(&mut self, tag: &str) -> Result<String> {
        let mut text = String::new();
        loop {
            match self.next()? {
                Node::Text(t) => text.push_str(&t),
                Node::Close(t) if t == tag => return Ok(text),
                other => return Err(unexpected(tag, &other)),
            }
        }
    }

    fn value_from(&mut self, node: Node) -> Result<Value> {
        match node {
            Node::Leaf(tag, _) => match tag.as_str() {
                "null" => Ok(Value::Null),
                "string" => Ok(Value::String(String::new())),
                "array" => Ok(Value::List(Vec::new())),
                "object" => Ok(Value::Map(BTreeMap::new())),
                other => Err(Error::codec(format!("xml: <{}/> carries no value", other))),
            },
            Node::Open(tag, _) => match tag.as_str() {
                "null" => {
                    let text = self.text_until("null")?;
                    if !text.trim().is_empty() {
                        return Err(Error::codec("xml: <null> must be empty"));
                    }
                    Ok(Value::Null)
                }
                "boolean" | "integer" | "double" | "string" => {
                    let text = self.text_until(&tag)?;
                    parse_scalar(&tag, text)
                }
                "array" => self.array(),
                "object" => self.object(),
                other => Err(Error::codec(format!("xml: unknown element <{}>", other))),
            },
            other => Err(unexpected("value", &other)),
        }
    }

    fn array(&mut self) -> Result<Value> {
        let mut items = Vec::new();
        loop {
            match self.next_element()? {
                Node::Close(t) if t == "array" => return Ok(Value::List(items)),
                node @ (Node::Open(..) | Node::Leaf(..)) => items.push(self.value_from(node)?),
                other => return Err(unexpected("array", &other)),
            }
        }
    }

    fn object(&mut self) -> Result<Value> {
        let mut members = BTreeMap::new();
        loop {
            match self.next_element()? {
                Node::Close(t) if t == "object" => return Ok(Value::Map(members)),
                Node::Open(t, Some(name)) if t == MEMBER => {
                    let value = match self.next_element()? {
                        node @ (Node::Open(..) | Node::Leaf(..)) => self.value_from(node)?,
                        other => return Err(unexpected(MEMBER, &other)),
                    };
                    match self.next_element()? {
                        Node::Close(t) if t == MEMBER => {}
                        other => return Err(unexpected(MEMBER, &other)),
                    }
                    members.insert(name, value);
                }
                other => return Err(unexpected("object", &other)),
            }
        }
    }
}

fn unexpected(context: &str, node: &Node) -> Error {
    Error::codec(format!("xml: unexpected {:?} in <{}>", node, context))
}

fn parse_scalar(tag: &str, text: String) -> Result<Value> {
    let bad = |what: &str| Error::codec(format!("xml: {:?} is not a valid {}", text, what));
    match tag {
        "boolean" => match text.trim() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(bad("boolean")),
        },
        "integer" => text.trim().parse().map(Value::Int).map_err(|_| bad("integer")),
        "double" => text.trim().parse().map(Value::Float).map_err(|_| bad("double")),
        _ => Ok(Value::String(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        let mut out = Vec::new();
        XmlCodec.write_value(value, &mut out).unwrap();
        XmlCodec.read_value(&mut &out[..]).unwrap()
    }

    #[test]
    fn typed_values_survive() {
        let value = Value::map([
            ("n", Value::Null),
            ("b", Value::from(true)),
            ("i", Value::from(-17i64)),
            ("f", Value::from(2.5)),
            ("s", Value::from("a < b & \"c\"")),
            ("empty", Value::from("")),
            ("spaced", Value::from("  padded  ")),
            ("list", Value::list(vec![Value::from(1), Value::list(vec![]), Value::map::<String, _>([])])),
        ]);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn writes_member_elements() {
        let mut out = Vec::new();
        XmlCodec
            .write_value(&Value::map([("k", Value::from(1))]), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with(r#"<object><member name="k"><integer>1</integer></member></object>"#));
    }

    #[test]
    fn accepts_indented_documents() {
        let doc = "<?xml version=\"1.0\"?>\n<!-- c -->\n<array>\n  <string>x</string>\n  <null/>\n</array>\n";
        let value = XmlCodec.read_value(&mut doc.as_bytes()).unwrap();
        assert_eq!(value, Value::list(vec![Value::from("x"), Value::Null]));
    }

    #[test]
    fn rejects_unknown_elements() {
        assert!(matches!(
            XmlCodec.read_value(&mut &b"<thing>1</thing>"[..]),
            Err(Error::Codec(_))
        ));
        assert!(matches!(
            XmlCodec.read_value(&mut &b"<integer>x</integer>"[..]),
            Err(Error::Codec(_))
        ));
        assert!(matches!(XmlCodec.read_value(&mut &b""[..]), Err(Error::Codec(_))));
    }
}
