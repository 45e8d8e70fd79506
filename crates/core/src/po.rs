//! Reader and writer for gettext PO/POT files.
//!
//! Only the parts of the format the sync needs are modelled: the metadata
//! header, ordered entries with context, plural forms, translator and
//! extracted comments, references and flags. Obsolete (`#~`) entries and
//! previous-msgid (`#|`) comments are dropped on parse.

use std::collections::HashSet;
use std::fmt::Write as _;

use tracing::debug;

use crate::errors::CodecError;

/// One translatable message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoEntry {
    pub msgctxt: Option<String>,
    pub msgid: String,
    pub msgid_plural: Option<String>,
    pub msgstr: String,
    /// `msgstr[1..]` for plural entries; `msgstr` holds `msgstr[0]`.
    pub msgstr_plural: Vec<String>,
    pub translator_comments: Vec<String>,
    pub extracted_comments: Vec<String>,
    pub references: Vec<String>,
    pub flags: Vec<String>,
}

impl PoEntry {
    pub fn new(msgid: impl Into<String>, msgstr: impl Into<String>) -> Self {
        Self {
            msgid: msgid.into(),
            msgstr: msgstr.into(),
            ..Default::default()
        }
    }

    /// Identity used when diffing two versions of a file.
    pub fn key(&self) -> (&str, &str) {
        (&self.msgid, &self.msgstr)
    }
}

/// A parsed PO or POT file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoFile {
    /// Comment lines above the header entry, without the leading `# `.
    pub header_comments: Vec<String>,
    /// Header fields in file order.
    pub metadata: Vec<(String, String)>,
    pub entries: Vec<PoEntry>,
}

impl PoFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw file bytes. Empty input is an empty file.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let text = String::from_utf8(bytes.to_vec())?;
        Self::parse(&text)
    }

    pub fn parse(content: &str) -> Result<Self, CodecError> {
        let mut parser = Parser::default();
        for (index, raw) in content.lines().enumerate() {
            parser.line(index + 1, raw.trim())?;
        }
        parser.finish_entry()?;
        debug!(
            entries = parser.file.entries.len(),
            metadata = parser.file.metadata.len(),
            "parsed PO file"
        );
        Ok(parser.file)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a header field, keeping its position if it already exists.
    pub fn set_metadata(&mut self, key: &str, value: &str) {
        match self.metadata.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.metadata.push((key.to_string(), value.to_string())),
        }
    }

    /// Entries of `self` whose `(msgid, msgstr)` pair does not occur in
    /// `old`, in `self`'s order.
    pub fn changed_entries<'a>(&'a self, old: &PoFile) -> Vec<&'a PoEntry> {
        let previous: HashSet<(&str, &str)> = old.entries.iter().map(PoEntry::key).collect();
        self.entries
            .iter()
            .filter(|entry| !previous.contains(&entry.key()))
            .collect()
    }

    /// Serialize, wrapping long strings at `width` columns.
    pub fn to_string_wrapped(&self, width: usize) -> String {
        let mut out = String::new();

        if !self.metadata.is_empty() || !self.header_comments.is_empty() {
            for comment in &self.header_comments {
                write_comment(&mut out, "#", comment);
            }
            let header: String = self
                .metadata
                .iter()
                .map(|(k, v)| format!("{k}: {v}\n"))
                .collect();
            write_field(&mut out, "msgid", "", width);
            write_field(&mut out, "msgstr", &header, width);
        }

        for entry in &self.entries {
            if !out.is_empty() {
                out.push('\n');
            }
            for comment in &entry.translator_comments {
                write_comment(&mut out, "#", comment);
            }
            for comment in &entry.extracted_comments {
                write_comment(&mut out, "#.", comment);
            }
            if !entry.references.is_empty() {
                let _ = writeln!(out, "#: {}", entry.references.join(" "));
            }
            if !entry.flags.is_empty() {
                let _ = writeln!(out, "#, {}", entry.flags.join(", "));
            }
            if let Some(ctxt) = &entry.msgctxt {
                write_field(&mut out, "msgctxt", ctxt, width);
            }
            write_field(&mut out, "msgid", &entry.msgid, width);
            match &entry.msgid_plural {
                Some(plural) => {
                    write_field(&mut out, "msgid_plural", plural, width);
                    write_field(&mut out, "msgstr[0]", &entry.msgstr, width);
                    for (i, form) in entry.msgstr_plural.iter().enumerate() {
                        write_field(&mut out, &format!("msgstr[{}]", i + 1), form, width);
                    }
                }
                None => write_field(&mut out, "msgstr", &entry.msgstr, width),
            }
        }

        out
    }
}

impl std::fmt::Display for PoFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_string_wrapped(78))
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Ctxt,
    Id,
    IdPlural,
    Str(usize),
}

#[derive(Default)]
struct Parser {
    file: PoFile,
    entry: PoEntry,
    /// Raw `msgstr[n]` values, index 0 included.
    plural_forms: Vec<String>,
    has_msgid: bool,
    has_keyword: bool,
    current: Option<Field>,
    seen_header: bool,
}

impl Parser {
    fn line(&mut self, line_no: usize, line: &str) -> Result<(), CodecError> {
        if line.is_empty() {
            return self.finish_entry();
        }

        if line.starts_with("#~") || line.starts_with("#|") {
            return Ok(());
        }

        if let Some(comment) = line.strip_prefix('#') {
            if self.has_keyword {
                self.finish_entry()?;
            }
            if let Some(rest) = comment.strip_prefix(':') {
                self.entry
                    .references
                    .extend(rest.split_whitespace().map(str::to_string));
            } else if let Some(rest) = comment.strip_prefix(',') {
                self.entry.flags.extend(
                    rest.split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(str::to_string),
                );
            } else if let Some(rest) = comment.strip_prefix('.') {
                self.entry
                    .extracted_comments
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else {
                self.entry
                    .translator_comments
                    .push(comment.strip_prefix(' ').unwrap_or(comment).to_string());
            }
            return Ok(());
        }

        if line.starts_with('"') {
            let value = unquote(line_no, line)?;
            let field = self.current.ok_or_else(|| CodecError::Syntax {
                line: line_no,
                detail: "string continuation without a keyword".into(),
            })?;
            self.append(field, &value);
            return Ok(());
        }

        let (keyword, rest) = line.split_once(char::is_whitespace).ok_or_else(|| {
            CodecError::Syntax {
                line: line_no,
                detail: format!("expected keyword and string, found '{line}'"),
            }
        })?;
        let value = unquote(line_no, rest.trim())?;

        let field = match keyword {
            "msgctxt" => {
                if self.has_msgid {
                    self.finish_entry()?;
                }
                Field::Ctxt
            }
            "msgid" => {
                if self.has_msgid {
                    self.finish_entry()?;
                }
                self.has_msgid = true;
                Field::Id
            }
            "msgid_plural" => Field::IdPlural,
            "msgstr" => Field::Str(0),
            other => match other
                .strip_prefix("msgstr[")
                .and_then(|s| s.strip_suffix(']'))
                .and_then(|n| n.parse::<usize>().ok())
            {
                Some(n) => Field::Str(n),
                None => {
                    return Err(CodecError::Syntax {
                        line: line_no,
                        detail: format!("unknown keyword '{other}'"),
                    })
                }
            },
        };

        self.has_keyword = true;
        self.current = Some(field);
        if let Field::Ctxt = field {
            self.entry.msgctxt = Some(String::new());
        }
        self.append(field, &value);
        Ok(())
    }

    fn append(&mut self, field: Field, value: &str) {
        match field {
            Field::Ctxt => self
                .entry
                .msgctxt
                .get_or_insert_with(String::new)
                .push_str(value),
            Field::Id => self.entry.msgid.push_str(value),
            Field::IdPlural => self
                .entry
                .msgid_plural
                .get_or_insert_with(String::new)
                .push_str(value),
            Field::Str(n) => {
                if self.plural_forms.len() <= n {
                    self.plural_forms.resize(n + 1, String::new());
                }
                self.plural_forms[n].push_str(value);
            }
        }
    }

    fn finish_entry(&mut self) -> Result<(), CodecError> {
        let mut entry = std::mem::take(&mut self.entry);
        let mut forms = std::mem::take(&mut self.plural_forms);
        let has_msgid = std::mem::replace(&mut self.has_msgid, false);
        self.has_keyword = false;
        self.current = None;

        if !has_msgid {
            // Comments with no entry: keep them as header comments if nothing
            // has been read yet.
            if !self.seen_header && self.file.entries.is_empty() {
                self.file
                    .header_comments
                    .extend(entry.translator_comments.drain(..));
            }
            return Ok(());
        }

        if !forms.is_empty() {
            entry.msgstr = forms.remove(0);
            entry.msgstr_plural = forms;
        }

        let is_header = entry.msgid.is_empty()
            && entry.msgctxt.is_none()
            && !self.seen_header
            && self.file.entries.is_empty();
        if is_header {
            self.seen_header = true;
            self.file
                .header_comments
                .extend(entry.translator_comments.drain(..));
            self.file.metadata = parse_metadata(&entry.msgstr);
            return Ok(());
        }

        self.file.entries.push(entry);
        Ok(())
    }
}

fn parse_metadata(header: &str) -> Vec<(String, String)> {
    header
        .split('\n')
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn unquote(line_no: usize, quoted: &str) -> Result<String, CodecError> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| quoted.len() >= 2)
        .ok_or_else(|| CodecError::Syntax {
            line: line_no,
            detail: format!("expected a quoted string, found '{quoted}'"),
        })?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            if c == '"' {
                return Err(CodecError::Syntax {
                    line: line_no,
                    detail: "unescaped quote inside string".into(),
                });
            }
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(CodecError::Syntax {
                    line: line_no,
                    detail: format!("unknown escape sequence '\\{other}'"),
                })
            }
            None => {
                return Err(CodecError::Syntax {
                    line: line_no,
                    detail: "string ends with a backslash".into(),
                })
            }
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn write_comment(out: &mut String, marker: &str, comment: &str) {
    if comment.is_empty() {
        let _ = writeln!(out, "{marker}");
    } else {
        let _ = writeln!(out, "{marker} {comment}");
    }
}

fn write_field(out: &mut String, keyword: &str, value: &str, width: usize) {
    let escaped = escape(value);
    let single = keyword.len() + escaped.chars().count() + 3;
    let inner_newline = value.trim_end_matches('\n').contains('\n');

    if single <= width && !inner_newline {
        let _ = writeln!(out, "{keyword} \"{escaped}\"");
        return;
    }

    let _ = writeln!(out, "{keyword} \"\"");
    for line in value.split_inclusive('\n') {
        for chunk in wrap(&escape(line), width.saturating_sub(2).max(1)) {
            let _ = writeln!(out, "\"{chunk}\"");
        }
    }
}

/// Greedy wrap that breaks after spaces. Words longer than `width` are kept
/// whole.
fn wrap(escaped: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in escaped.split_inclusive(' ') {
        if !current.is_empty() && current.chars().count() + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# French translation of the about page
msgid ""
msgstr ""
"Project-Id-Version: site 1.0\n"
"Last-Translator: Alice <alice@example.com>\n"
"Language: fr\n"
"Content-Type: text/plain; charset=utf-8\n"

#. heading
#: pages/about:1
msgid "About us"
msgstr "À propos"

#, fuzzy
msgctxt "button"
msgid "Read more"
msgstr "Lire "
"la suite"

msgid "One item"
msgid_plural "%d items"
msgstr[0] "Un élément"
msgstr[1] "%d éléments"

#~ msgid "Obsolete"
#~ msgstr "Obsolète"
"#;

    #[test]
    fn test_parse_header_and_entries() {
        let po = PoFile::parse(SAMPLE).unwrap();
        assert_eq!(po.header_comments, vec!["French translation of the about page"]);
        assert_eq!(
            po.metadata_value("Last-Translator"),
            Some("Alice <alice@example.com>")
        );
        assert_eq!(po.metadata_value("Language"), Some("fr"));
        assert_eq!(po.entries.len(), 3);

        let about = &po.entries[0];
        assert_eq!(about.msgid, "About us");
        assert_eq!(about.msgstr, "À propos");
        assert_eq!(about.extracted_comments, vec!["heading"]);
        assert_eq!(about.references, vec!["pages/about:1"]);

        let more = &po.entries[1];
        assert_eq!(more.msgctxt.as_deref(), Some("button"));
        assert_eq!(more.msgstr, "Lire la suite");
        assert_eq!(more.flags, vec!["fuzzy"]);

        let plural = &po.entries[2];
        assert_eq!(plural.msgid_plural.as_deref(), Some("%d items"));
        assert_eq!(plural.msgstr, "Un élément");
        assert_eq!(plural.msgstr_plural, vec!["%d éléments"]);
    }

    #[test]
    fn test_empty_input_is_empty_file() {
        let po = PoFile::parse_bytes(b"").unwrap();
        assert!(po.entries.is_empty());
        assert!(po.metadata.is_empty());
    }

    #[test]
    fn test_serialized_output_parses_back() {
        let po = PoFile::parse(SAMPLE).unwrap();
        let text = po.to_string_wrapped(200);
        assert!(text.contains("\"Last-Translator: Alice <alice@example.com>\\n\""));
        assert!(!text.contains("Obsolete"));
        assert_eq!(PoFile::parse(&text).unwrap(), po);
    }

    #[test]
    fn test_escapes() {
        let mut po = PoFile::new();
        po.entries
            .push(PoEntry::new("Say \"hi\"\tnow\\", "Dis \"salut\""));
        let text = po.to_string_wrapped(200);
        assert!(text.contains(r#"msgid "Say \"hi\"\tnow\\""#));
        assert_eq!(PoFile::parse(&text).unwrap().entries, po.entries);
    }

    #[test]
    fn test_long_strings_wrap_at_width() {
        let long = "word ".repeat(40);
        let mut po = PoFile::new();
        po.entries.push(PoEntry::new(long.trim_end(), ""));
        let text = po.to_string_wrapped(40);
        assert!(text.lines().all(|l| l.chars().count() <= 40), "{text}");
        assert!(text.starts_with("msgid \"\"\n"));
        assert_eq!(PoFile::parse(&text).unwrap().entries[0].msgid, long.trim_end());
    }

    #[test]
    fn test_multiline_values_split_on_newlines() {
        let mut po = PoFile::new();
        po.entries.push(PoEntry::new("line one\nline two", ""));
        let text = po.to_string_wrapped(200);
        assert!(text.contains("\"line one\\n\"\n\"line two\"\n"), "{text}");
    }

    #[test]
    fn test_changed_entries_compare_full_pairs() {
        let old = PoFile::parse("msgid \"Hello\"\nmsgstr \"\"\n\nmsgid \"Bye\"\nmsgstr \"Au revoir\"\n").unwrap();
        let new = PoFile::parse(
            "msgid \"Hello\"\nmsgstr \"Bonjour\"\n\nmsgid \"Bye\"\nmsgstr \"Au revoir\"\n\nmsgid \"New\"\nmsgstr \"Nouveau\"\n",
        )
        .unwrap();
        let changed: Vec<_> = new.changed_entries(&old).into_iter().map(|e| e.key()).collect();
        assert_eq!(changed, vec![("Hello", "Bonjour"), ("New", "Nouveau")]);
    }

    #[test]
    fn test_syntax_errors_report_line() {
        let err = PoFile::parse("msgid \"ok\"\nmsgstr \"unterminated\n").unwrap_err();
        assert!(matches!(err, CodecError::Syntax { line: 2, .. }));

        let err = PoFile::parse("\"orphan\"\n").unwrap_err();
        assert!(matches!(err, CodecError::Syntax { line: 1, .. }));

        let err = PoFile::parse_bytes(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8(_)));
    }

    #[test]
    fn test_set_metadata_keeps_position() {
        let mut po = PoFile::parse(SAMPLE).unwrap();
        po.set_metadata("Language", "fr-CA");
        po.set_metadata("X-Generator", "gitlocalize");
        assert_eq!(po.metadata[2], ("Language".to_string(), "fr-CA".to_string()));
        assert_eq!(po.metadata.last().unwrap().0, "X-Generator");
    }
}
