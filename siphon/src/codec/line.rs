use super::Decoder;
use crate::{FieldValue, Fields, Record, Tags, errors::DecodeError};
use time::OffsetDateTime;

/// 行协议解码器
///
/// `measurement[,tag=v...] field=v[,field=v...] [timestamp]`，时间戳为 Unix 纳秒。
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDecoder;

impl Decoder for LineDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let text = std::str::from_utf8(payload)?;
        let now = OffsetDateTime::now_utc();
        let mut records = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let record = parse_line(line, now).map_err(|message| DecodeError::Line {
                line: index + 1,
                message,
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

fn parse_line(line: &str, now: OffsetDateTime) -> Result<Record, String> {
    // 名称与标签中的引号不成对，只有字段部分按引号分组
    let (key, rest) = split_key(line).ok_or_else(|| "缺少字段".to_string())?;
    let sections: Vec<&str> = split(rest, ' ', true)
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let (fields, timestamp) = match sections.as_slice() {
        [fields] => (*fields, None),
        [fields, ts] => (*fields, Some(*ts)),
        [] => return Err("缺少字段".to_string()),
        _ => return Err("多余的内容".to_string()),
    };

    let mut parts = split(key, ',', false).into_iter();
    let name = unescape(parts.next().unwrap_or_default());
    if name.is_empty() {
        return Err("缺少名称".to_string());
    }
    let mut tags = Tags::new();
    for part in parts {
        let (k, v) = pair(part)?;
        tags.insert(unescape(k), unescape(v));
    }

    let mut values = Fields::new();
    for part in split(fields, ',', true) {
        let (k, v) = pair(part)?;
        values.insert(unescape(k), value(v)?);
    }

    let timestamp = match timestamp {
        Some(ts) => {
            let ns: i128 = ts.parse().map_err(|_| format!("非法时间戳 {ts}"))?;
            OffsetDateTime::from_unix_timestamp_nanos(ns).map_err(|_| format!("时间戳 {ts} 越界"))?
        }
        None => now,
    };

    Ok(Record::new(name, values, tags, timestamp))
}

fn split_key(line: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ' ' {
            return Some((&line[..i], &line[i + 1..]));
        }
    }
    None
}

fn split(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if quotes && c == '"' {
            quoted = !quoted;
        } else if c == sep && !quoted {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

fn pair(s: &str) -> Result<(&str, &str), String> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' {
            let (k, v) = (&s[..i], &s[i + 1..]);
            if k.is_empty() || v.is_empty() {
                break;
            }
            return Ok((k, v));
        }
    }
    Err(format!("非法的键值对 {s}"))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, ',' | ' ' | '=' | '"' | '\\') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

fn value(raw: &str) -> Result<FieldValue, String> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Ok(FieldValue::String(unescape(&raw[1..raw.len() - 1])));
    }
    match raw {
        "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
        "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
        _ => {}
    }
    if let Some(n) = raw.strip_suffix('i') {
        return n
            .parse()
            .map(FieldValue::Integer)
            .map_err(|_| format!("非法整数 {raw}"));
    }
    if let Some(n) = raw.strip_suffix('u') {
        return n
            .parse()
            .map(FieldValue::Unsigned)
            .map_err(|_| format!("非法无符号整数 {raw}"));
    }
    raw.parse()
        .map(FieldValue::Float)
        .map_err(|_| format!("非法字段值 {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_line() {
        let payload = b"cpu,host=a,region=us-west usage=0.64,count=3i,up=true,note=\"ok go\" 1465839830100400200";

        let records = LineDecoder.decode(payload).unwrap();

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.name, "cpu");
        assert_eq!(r.tags["host"], "a");
        assert_eq!(r.tags["region"], "us-west");
        assert_eq!(r.fields["usage"], FieldValue::Float(0.64));
        assert_eq!(r.fields["count"], FieldValue::Integer(3));
        assert_eq!(r.fields["up"], FieldValue::Boolean(true));
        assert_eq!(r.fields["note"], FieldValue::String("ok go".to_string()));
        assert_eq!(r.timestamp.unix_timestamp_nanos(), 1465839830100400200);
    }

    #[test]
    fn handles_escapes_and_comments() {
        let payload = b"# comment\n\nmy\\ metric,tag\\=k=v\\,1 val=7u\n";

        let records = LineDecoder.decode(payload).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "my metric");
        assert_eq!(records[0].tags["tag=k"], "v,1");
        assert_eq!(records[0].fields["val"], FieldValue::Unsigned(7));
    }

    #[test]
    fn quote_in_tag_value() {
        let payload = b"disk,path=C:\\\"x\" used=1i,label=\"a b\" 1465839830100400200";

        let records = LineDecoder.decode(payload).unwrap();

        let r = &records[0];
        assert_eq!(r.tags["path"], "C:\"x\"");
        assert_eq!(r.fields["used"], FieldValue::Integer(1));
        assert_eq!(r.fields["label"], FieldValue::String("a b".to_string()));
        assert_eq!(r.timestamp.unix_timestamp_nanos(), 1465839830100400200);

        let records = LineDecoder.decode(b"m,tag=a\"b v=1i").unwrap();
        assert_eq!(records[0].tags["tag"], "a\"b");
    }

    #[test]
    fn multiple_lines_keep_order() {
        let records = LineDecoder.decode(b"a x=1\nb x=2\nc x=3").unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn one_bad_line_fails_payload() {
        let result = LineDecoder.decode(b"a x=1\nb\nc x=3");

        assert!(matches!(result, Err(DecodeError::Line { line: 2, .. })));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(LineDecoder.decode(b"a x=abc").is_err());
        assert!(LineDecoder.decode(b"a x=1.5i").is_err());
        assert!(LineDecoder.decode(b"a x=1 notatime").is_err());
        assert!(LineDecoder.decode(&[0xff, 0xfe]).is_err());
    }
}
