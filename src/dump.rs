//! Text dump/undump — a canonical, indented textual rendering of a
//! decoded [`Value`] tree, and its exact inverse.
//!
//! ```text
//! kind "name" value
//! kind "name" { kind "name" value ... }
//! ```
//! Scalars render bare (`int "x" 3`); strings and hex-encoded bytes are
//! quoted; groups, lists, hashes, unions, and opaque variants render as
//! braced blocks of nested fields. Round-trip law: `undump(dump(x)) == x`
//! byte-for-byte for any `x` decoded by `data_codec::decode`.

use crate::data_codec::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DumpError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unterminated quoted string")]
    UnterminatedString,
    #[error("expected {0}, found {1:?}")]
    Expected(&'static str, String),
    #[error("unknown kind tag {0:?}")]
    UnknownKind(String),
    #[error("malformed number: {0}")]
    BadNumber(String),
    #[error("malformed hex: {0}")]
    BadHex(String),
    #[error("union/opaque block missing required field {0:?}")]
    MissingField(&'static str),
}

pub fn dump(value: &Value) -> Result<String, DumpError> {
    let mut out = String::new();
    render_field(&mut out, "root", value, 0)?;
    Ok(out)
}

pub fn undump(text: &str) -> Result<Value, DumpError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let (_, value) = parser.parse_field()?;
    Ok(value)
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn render_field(out: &mut String, name: &str, value: &Value, depth: usize) -> Result<(), DumpError> {
    indent(out, depth);
    match value {
        Value::Char(v) => out.push_str(&format!("char {} {v}\n", quote(name))),
        Value::UChar(v) => out.push_str(&format!("uchar {} {v}\n", quote(name))),
        Value::Short(v) => out.push_str(&format!("short {} {v}\n", quote(name))),
        Value::UShort(v) => out.push_str(&format!("ushort {} {v}\n", quote(name))),
        Value::Int(v) => out.push_str(&format!("int {} {v}\n", quote(name))),
        Value::UInt(v) => out.push_str(&format!("uint {} {v}\n", quote(name))),
        Value::LongLong(v) => out.push_str(&format!("long_long {} {v}\n", quote(name))),
        Value::ULongLong(v) => out.push_str(&format!("ulong_long {} {v}\n", quote(name))),
        Value::Float(v) => out.push_str(&format!("float {} {v}\n", quote(name))),
        Value::Double(v) => out.push_str(&format!("double {} {v}\n", quote(name))),
        Value::F32P32(v) => out.push_str(&format!("f32p32 {} {v}\n", quote(name))),
        Value::F16P16(v) => out.push_str(&format!("f16p16 {} {v}\n", quote(name))),
        Value::F8P24(v) => out.push_str(&format!("f8p24 {} {v}\n", quote(name))),
        Value::Null => out.push_str(&format!("null {} null\n", quote(name))),
        Value::Str(s) => out.push_str(&format!("string {} {}\n", quote(name), quote(s))),
        Value::Record(fields) => {
            out.push_str(&format!("group {} {{\n", quote(name)));
            for (field_name, field_value) in fields {
                render_field(out, field_name, field_value, depth + 1)?;
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Value::List(items) => {
            out.push_str(&format!("list {} {{\n", quote(name)));
            for item in items {
                render_field(out, "", item, depth + 1)?;
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Value::Hash(entries) => {
            out.push_str(&format!("hash {} {{\n", quote(name)));
            for (key, entry_value) in entries {
                render_field(out, key, entry_value, depth + 1)?;
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        Value::Union { variant, value } => {
            out.push_str(&format!("union {} {{\n", quote(name)));
            render_field(out, "variant", &Value::Str(variant.clone()), depth + 1)?;
            render_field(out, "payload", value, depth + 1)?;
            indent(out, depth);
            out.push_str("}\n");
        }
        Value::Opaque { tag, bytes } => {
            out.push_str(&format!("opaque {} {{\n", quote(name)));
            render_field(out, "tag", &Value::Str(tag.clone()), depth + 1)?;
            render_field(out, "data", &Value::Str(hex::encode(bytes)), depth + 1)?;
            indent(out, depth);
            out.push_str("}\n");
        }
    }
    Ok(())
}

// ── Tokenizing ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    LBrace,
    RBrace,
}

fn tokenize(text: &str) -> Result<Vec<Token>, DumpError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    if i >= chars.len() {
                        return Err(DumpError::UnterminatedString);
                    }
                    match chars[i] {
                        '"' => {
                            i += 1;
                            break;
                        }
                        '\\' if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        other => {
                            s.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '{' && chars[i] != '}' && chars[i] != '"' {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
        }
    }
    Ok(tokens)
}

// ── Parsing ──────────────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&Token, DumpError> {
        let token = self.tokens.get(self.pos).ok_or(DumpError::UnexpectedEof)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect_ident(&mut self) -> Result<String, DumpError> {
        match self.next()? {
            Token::Ident(s) => Ok(s.clone()),
            other => Err(DumpError::Expected("identifier", format!("{other:?}"))),
        }
    }

    fn expect_str(&mut self) -> Result<String, DumpError> {
        match self.next()? {
            Token::Str(s) => Ok(s.clone()),
            other => Err(DumpError::Expected("quoted string", format!("{other:?}"))),
        }
    }

    fn expect_lbrace(&mut self) -> Result<(), DumpError> {
        match self.next()? {
            Token::LBrace => Ok(()),
            other => Err(DumpError::Expected("{", format!("{other:?}"))),
        }
    }

    fn parse_fields_until_rbrace(&mut self) -> Result<Vec<(String, Value)>, DumpError> {
        let mut fields = Vec::new();
        loop {
            match self.peek() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    break;
                }
                Some(_) => fields.push(self.parse_field()?),
                None => return Err(DumpError::UnexpectedEof),
            }
        }
        Ok(fields)
    }

    fn parse_field(&mut self) -> Result<(String, Value), DumpError> {
        let kind = self.expect_ident()?;
        let name = self.expect_str()?;
        let value = self.parse_value(&kind)?;
        Ok((name, value))
    }

    fn parse_value(&mut self, kind: &str) -> Result<Value, DumpError> {
        match kind {
            "group" => {
                self.expect_lbrace()?;
                Ok(Value::Record(self.parse_fields_until_rbrace()?))
            }
            "list" => {
                self.expect_lbrace()?;
                let fields = self.parse_fields_until_rbrace()?;
                Ok(Value::List(fields.into_iter().map(|(_, v)| v).collect()))
            }
            "hash" => {
                self.expect_lbrace()?;
                Ok(Value::Hash(self.parse_fields_until_rbrace()?))
            }
            "union" => {
                self.expect_lbrace()?;
                let fields = self.parse_fields_until_rbrace()?;
                let variant = take_str_field(&fields, "variant")?;
                let payload = take_field(fields, "payload").ok_or(DumpError::MissingField("payload"))?;
                Ok(Value::Union { variant, value: Box::new(payload) })
            }
            "opaque" => {
                self.expect_lbrace()?;
                let fields = self.parse_fields_until_rbrace()?;
                let tag = take_str_field(&fields, "tag")?;
                let hex_data = take_str_field(&fields, "data")?;
                let bytes = hex::decode(&hex_data).map_err(|e| DumpError::BadHex(e.to_string()))?;
                Ok(Value::Opaque { tag, bytes })
            }
            "string" => Ok(Value::Str(self.expect_str()?)),
            "null" => {
                let _ = self.next()?;
                Ok(Value::Null)
            }
            "char" => Ok(Value::Char(parse_num(self.expect_ident()?)?)),
            "uchar" => Ok(Value::UChar(parse_num(self.expect_ident()?)?)),
            "short" => Ok(Value::Short(parse_num(self.expect_ident()?)?)),
            "ushort" => Ok(Value::UShort(parse_num(self.expect_ident()?)?)),
            "int" => Ok(Value::Int(parse_num(self.expect_ident()?)?)),
            "uint" => Ok(Value::UInt(parse_num(self.expect_ident()?)?)),
            "long_long" => Ok(Value::LongLong(parse_num(self.expect_ident()?)?)),
            "ulong_long" => Ok(Value::ULongLong(parse_num(self.expect_ident()?)?)),
            "float" => Ok(Value::Float(parse_num(self.expect_ident()?)?)),
            "double" => Ok(Value::Double(parse_num(self.expect_ident()?)?)),
            "f32p32" => Ok(Value::F32P32(parse_num(self.expect_ident()?)?)),
            "f16p16" => Ok(Value::F16P16(parse_num(self.expect_ident()?)?)),
            "f8p24" => Ok(Value::F8P24(parse_num(self.expect_ident()?)?)),
            other => Err(DumpError::UnknownKind(other.to_string())),
        }
    }
}

fn take_field(fields: Vec<(String, Value)>, name: &str) -> Option<Value> {
    fields.into_iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn take_str_field(fields: &[(String, Value)], name: &'static str) -> Result<String, DumpError> {
    match fields.iter().find(|(n, _)| n == name) {
        Some((_, Value::Str(s))) => Ok(s.clone()),
        _ => Err(DumpError::MissingField(name)),
    }
}

fn parse_num<T: std::str::FromStr>(s: String) -> Result<T, DumpError> {
    s.parse::<T>().map_err(|_| DumpError::BadNumber(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let value = Value::Record(vec![("x".into(), Value::Int(42)), ("name".into(), Value::Str("hi".into()))]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn nested_group_and_list_roundtrip() {
        let value = Value::Record(vec![
            ("point".into(), Value::Record(vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))])),
            ("values".into(), Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn hash_roundtrip() {
        let value = Value::Record(vec![(
            "map".into(),
            Value::Hash(vec![("a".into(), Value::Int(1)), ("b".into(), Value::Int(2))]),
        )]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn union_roundtrip() {
        let value = Value::Record(vec![(
            "body".into(),
            Value::Union {
                variant: "circle".into(),
                value: Box::new(Value::Record(vec![("radius".into(), Value::Int(5))])),
            },
        )]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn opaque_roundtrip() {
        let value = Value::Record(vec![(
            "body".into(),
            Value::Opaque { tag: "mystery".into(), bytes: vec![0xde, 0xad, 0xbe, 0xef] },
        )]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn string_with_quotes_and_backslashes_escapes_correctly() {
        let value = Value::Record(vec![("s".into(), Value::Str("a \"quoted\" \\thing\\".into()))]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn float_roundtrips_exact_bits() {
        let value = Value::Record(vec![("d".into(), Value::Double(1.0 / 3.0))]);
        let text = dump(&value).unwrap();
        let back = undump(&text).unwrap();
        match (&value, &back) {
            (Value::Record(a), Value::Record(b)) => {
                let (_, Value::Double(x)) = &a[0] else { panic!() };
                let (_, Value::Double(y)) = &b[0] else { panic!() };
                assert_eq!(x.to_bits(), y.to_bits());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn unknown_kind_tag_errors() {
        assert!(undump("bogus \"x\" 1").is_err());
    }
}
