// crates/muninn-server/src/context/format.rs
// Context block emitters. The XML shape is bit-stable wire format; the
// native format is the compact bracketed encoding with backslash escapes
// and a parser for round-trips.

use super::scoring::Scored;
use crate::utils::xml_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Xml,
    Markdown,
    Native,
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Format {
        match s {
            "markdown" => Format::Markdown,
            "native" => Format::Native,
            "json" => Format::Json,
            _ => Format::Xml,
        }
    }

    /// Wrapper overhead charged against the token budget.
    pub fn overhead_tokens(&self) -> usize {
        match self {
            Format::Xml => 100,
            _ => 50,
        }
    }

    /// Default budget when the caller doesn't set one.
    pub fn default_budget(&self) -> usize {
        match self {
            Format::Xml | Format::Markdown => 2000,
            Format::Native => 800,
            Format::Json => 4000,
        }
    }
}

/// Render the packed memories.
pub fn render(
    format: Format,
    app: &str,
    scope: Option<&str>,
    token_count: usize,
    included: &[Scored],
) -> String {
    match format {
        Format::Xml => render_xml(app, scope, token_count, included),
        Format::Markdown => render_markdown(included),
        Format::Native => render_native(included),
        Format::Json => render_json(included),
    }
}

/// `<muninn-context app="A" [scope="S"] tokens="N">` then one line per
/// memory, all text XML-escaped for & < > ".
fn render_xml(app: &str, scope: Option<&str>, token_count: usize, included: &[Scored]) -> String {
    let mut out = String::new();
    match scope {
        Some(scope) => out.push_str(&format!(
            "<muninn-context app=\"{}\" scope=\"{}\" tokens=\"{}\">\n",
            xml_escape(app),
            xml_escape(scope),
            token_count
        )),
        None => out.push_str(&format!(
            "<muninn-context app=\"{}\" tokens=\"{}\">\n",
            xml_escape(app),
            token_count
        )),
    }
    for item in included {
        let c = &item.candidate;
        let subtype = c
            .subtype
            .as_deref()
            .map(|s| format!(" subtype=\"{}\"", xml_escape(s)))
            .unwrap_or_default();
        out.push_str(&format!(
            "  <{}{} confidence=\"{:.2}\">{}</{}>\n",
            c.source_type,
            subtype,
            c.confidence,
            xml_escape(&c.content),
            c.source_type
        ));
    }
    out.push_str("</muninn-context>");
    out
}

fn render_markdown(included: &[Scored]) -> String {
    let mut out = String::from("## Relevant Context\n\n");
    for item in included {
        let c = &item.candidate;
        let type_label = match &c.subtype {
            Some(subtype) => format!("{}.{}", c.source_type, subtype),
            None => c.source_type.to_string(),
        };
        out.push_str(&format!(
            "- **[{}, {:.2}]** {}\n",
            type_label, c.confidence, c.content
        ));
    }
    out
}

/// Native record: `K[type|ent:a,b|title|conf:N]` with `\ | [ ]` escaped.
fn render_native(included: &[Scored]) -> String {
    included
        .iter()
        .map(|item| {
            let c = &item.candidate;
            let entities = c.subtype.as_deref().unwrap_or("");
            format!(
                "K[{}|ent:{}|{}|conf:{:.2}]",
                native_escape(c.source_type),
                native_escape(entities),
                native_escape(&c.title),
                c.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_json(included: &[Scored]) -> String {
    let memories: Vec<serde_json::Value> = included
        .iter()
        .map(|item| {
            let c = &item.candidate;
            serde_json::json!({
                "id": c.id,
                "type": c.source_type,
                "subtype": c.subtype,
                "title": c.title,
                "content": c.content,
                "confidence": c.confidence,
                "score": item.score,
            })
        })
        .collect();
    serde_json::to_string(&memories).unwrap_or_else(|_| "[]".to_string())
}

/// Escape `\`, `|`, `[`, `]` in a native-format field.
pub fn native_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '|' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A parsed native record.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRecord {
    pub record_type: String,
    pub entities: String,
    pub title: String,
    pub confidence: String,
}

/// Parse one native record back into its fields (round-trip contract).
pub fn parse_native(record: &str) -> Option<NativeRecord> {
    let inner = record.strip_prefix("K[")?.strip_suffix(']')?;

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '|' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    if fields.len() != 4 {
        return None;
    }
    Some(NativeRecord {
        record_type: fields[0].clone(),
        entities: fields[1].strip_prefix("ent:")?.to_string(),
        title: fields[2].clone(),
        confidence: fields[3].strip_prefix("conf:")?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::retrieval::Candidate;

    fn scored(source_type: &'static str, subtype: Option<&str>, title: &str, content: &str) -> Scored {
        Scored {
            score: 0.5,
            candidate: Candidate {
                id: 1,
                source_type,
                subtype: subtype.map(str::to_string),
                title: title.to_string(),
                content: content.to_string(),
                confidence: 0.8,
                created_at: "2026-07-01 00:00:00".to_string(),
                similarity: 0.5,
            },
        }
    }

    #[test]
    fn test_xml_shape_is_stable() {
        let items = vec![scored("decision", Some("pending"), "t", "choose <sqlite> & \"fts\"")];
        let xml = render(Format::Xml, "muninn", Some("project"), 42, &items);
        assert!(xml.starts_with("<muninn-context app=\"muninn\" scope=\"project\" tokens=\"42\">"));
        assert!(xml.ends_with("</muninn-context>"));
        assert!(xml.contains(
            "  <decision subtype=\"pending\" confidence=\"0.80\">choose &lt;sqlite&gt; &amp; &quot;fts&quot;</decision>"
        ));
    }

    #[test]
    fn test_xml_without_scope_omits_attribute() {
        let xml = render(Format::Xml, "muninn", None, 0, &[]);
        assert!(xml.starts_with("<muninn-context app=\"muninn\" tokens=\"0\">"));
        assert!(!xml.contains("scope="));
    }

    #[test]
    fn test_markdown_lines() {
        let items = vec![scored("learning", Some("testing"), "t", "always run vitest")];
        let md = render(Format::Markdown, "muninn", None, 0, &items);
        assert!(md.starts_with("## Relevant Context"));
        assert!(md.contains("- **[learning.testing, 0.80]** always run vitest"));
    }

    #[test]
    fn test_native_round_trip_with_special_chars() {
        let title = r"weird [title] with \ and | pipe";
        let items = vec![scored("learning", Some("a,b"), title, "c")];
        let native = render(Format::Native, "muninn", None, 0, &items);

        let parsed = parse_native(&native).unwrap();
        assert_eq!(parsed.record_type, "learning");
        assert_eq!(parsed.entities, "a,b");
        assert_eq!(parsed.title, title, "escaped fields round-trip without loss");
        assert_eq!(parsed.confidence, "0.80");
    }

    #[test]
    fn test_native_parse_rejects_malformed() {
        assert!(parse_native("K[only|two]").is_none());
        assert!(parse_native("not a record").is_none());
    }

    #[test]
    fn test_json_is_verbatim_array() {
        let items = vec![scored("issue", None, "t", "c")];
        let json = render(Format::Json, "muninn", None, 0, &items);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["type"], "issue");
        assert_eq!(parsed[0]["id"], 1);
    }
}
