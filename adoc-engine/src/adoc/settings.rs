//! Engine configuration
//!
//! [`EngineConfig`] is everything the engine consumes besides the document
//! itself: processing settings, pre-seeded attributes, the syntax
//! definitions recognized by the dispatcher, macro definitions, template
//! sections and the inline substitution tables.
//!
//! The built-in defaults describe a small HTML flavoured vocabulary so the
//! engine can be exercised without any configuration file. The `adoc-config`
//! crate layers TOML files on top of these defaults.
//!
//! All regular expressions use Rust `regex` syntax. Replacement strings use
//! `$name` / `${1}` group references.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub settings: Settings,
    pub attributes: BTreeMap<String, String>,
    pub syntax: Syntax,
    pub macros: Vec<MacroEntry>,
    /// Template sections by name (`image-inlinemacro`, …). Names are case
    /// insensitive.
    pub sections: BTreeMap<String, Vec<String>>,
    pub specialcharacters: Vec<SpecialCharacter>,
    /// Quote definitions, applied in order. A tag name starting with `#`
    /// marks an unconstrained quote.
    pub quotes: Vec<QuoteEntry>,
    /// Tag name to `start|end` pair.
    pub tags: BTreeMap<String, String>,
    pub replacements: Vec<Replacement>,
    pub replacements2: Vec<Replacement>,
    pub replacements3: Vec<Replacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Tab expansion width for top level sources; 0 disables expansion.
    pub tabsize: usize,
    pub max_include_depth: usize,
    /// Line separator joining multi-line inline results.
    pub newline: String,
    /// Refuse shell execution, expression evaluation and out of tree includes.
    pub safe: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tabsize: 8,
            max_include_depth: 10,
            newline: "\n".to_string(),
            safe: false,
        }
    }
}

/// Patterns and element definitions driving the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Syntax {
    /// Must define `attrname` and may define `attrname2` and `attrvalue`.
    pub attribute_entry: String,
    /// May define `attrlist` plus any other named groups (`id`, `reftext`).
    pub attribute_list: String,
    /// Must define `title`.
    pub block_title: String,
    /// Pattern for the text line of two line titles. Empty disables them.
    pub section_title: String,
    /// One line title patterns for levels 0-4.
    pub single_line_titles: Vec<String>,
    /// Two character underlines for levels 0-4.
    pub underlines: Vec<String>,
    pub title_subs: Vec<String>,
    pub subs_normal: Vec<String>,
    pub subs_verbatim: Vec<String>,
    pub paragraphs: Vec<BlockDef>,
    pub lists: Vec<ListDef>,
    pub blocks: Vec<BlockDef>,
    pub tables: Vec<TableDef>,
    pub legacy_tables: Vec<LegacyTableDef>,
}

/// A paragraph or delimited block definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockDef {
    pub name: String,
    pub delimiter: String,
    pub options: Vec<String>,
    pub subs: Vec<String>,
    pub postsubs: Vec<String>,
    pub style: String,
    pub posattrs: Vec<String>,
    /// Shell command the body is piped through.
    pub filter: String,
    pub styles: BTreeMap<String, StyleDef>,
}

/// Per-style overrides of a block definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleDef {
    pub subs: Option<Vec<String>>,
    pub postsubs: Option<Vec<String>>,
    pub options: Option<Vec<String>>,
    pub filter: Option<String>,
    pub posattrs: Option<Vec<String>>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListDef {
    pub name: String,
    /// `bulleted`, `numbered` or `labeled`.
    #[serde(rename = "type")]
    pub list_type: String,
    /// Item patterns; `text` holds the item text, `label` the labeled list
    /// term and `index` the explicit item number.
    pub delimiters: Vec<String>,
    pub subs: Vec<String>,
    pub style: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDef {
    pub name: String,
    pub delimiter: String,
    /// `psv`, `csv` or `dsv`.
    pub format: String,
    pub separator: String,
    pub subs: Vec<String>,
}

/// Deprecated ruler delimited tables.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyTableDef {
    pub name: String,
    pub fillchar: String,
    /// `fixed`, `csv` or `dsv`.
    pub format: String,
    pub subs: Vec<String>,
}

/// One `[macros]` entry: `pattern` plus a definition of the form
/// `[+|#][name][[subs]]`. A missing definition deletes the macro with the
/// same pattern.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroEntry {
    pub pattern: String,
    pub definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialCharacter {
    pub character: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteEntry {
    /// Quote characters; `left|right` for asymmetric quotes.
    pub quote: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Replacement {
    pub pattern: String,
    pub replacement: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn replacement(pattern: &str, replacement: &str) -> Replacement {
    Replacement {
        pattern: pattern.to_string(),
        replacement: replacement.to_string(),
    }
}

fn macro_entry(pattern: &str, definition: &str) -> MacroEntry {
    MacroEntry {
        pattern: pattern.to_string(),
        definition: Some(definition.to_string()),
    }
}

fn block(name: &str, delimiter: &str, subs: &[&str], options: &[&str]) -> BlockDef {
    BlockDef {
        name: name.to_string(),
        delimiter: delimiter.to_string(),
        subs: strings(subs),
        options: strings(options),
        ..BlockDef::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let attributes = [
            ("amp", "&"),
            ("lt", "<"),
            ("gt", ">"),
            ("brvbar", "|"),
            ("nbsp", "&#160;"),
            ("zwsp", "&#8203;"),
            ("wj", "&#8288;"),
            ("deg", "&#176;"),
            ("backslash", "\\"),
            ("two-colons", "::"),
            ("two-semicolons", ";;"),
            ("plus", "&#43;"),
            ("empty", ""),
            ("sp", " "),
            ("startsb", "["),
            ("endsb", "]"),
            ("caret", "^"),
            ("asterisk", "*"),
            ("tilde", "~"),
            ("apostrophe", "'"),
            ("encoding", "utf-8"),
            ("attributeentry-subs", "specialcharacters,attributes"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let sections = [
            ("http-inlinemacro", vec![r#"<a href="{name}:{target}">{0={name}:{target}}</a>"#]),
            ("https-inlinemacro", vec![r#"<a href="{name}:{target}">{0={name}:{target}}</a>"#]),
            ("ftp-inlinemacro", vec![r#"<a href="{name}:{target}">{0={name}:{target}}</a>"#]),
            ("file-inlinemacro", vec![r#"<a href="{name}:{target}">{0={name}:{target}}</a>"#]),
            ("mailto-inlinemacro", vec![r#"<a href="mailto:{target}">{0={target}}</a>"#]),
            ("link-inlinemacro", vec![r#"<a href="{target}">{0={target}}</a>"#]),
            (
                "image-inlinemacro",
                vec![r#"<span class="image"><img src="{target}" alt="{alt={target}}"{width? width="{width}"}{height? height="{height}"} /></span>"#],
            ),
            ("anchor-inlinemacro", vec![r#"<a id="{target}"></a>"#]),
            ("anchor2-inlinemacro", vec![r#"<a id="{1}"></a>"#]),
            ("xref-inlinemacro", vec![r##"<a href="#{target}">{0=[{target}]}</a>"##]),
            ("xref2-inlinemacro", vec![r##"<a href="#{1}">{2=[{1}]}</a>"##]),
            ("pass-inlinemacro", vec!["{passtext}"]),
            (
                "image-blockmacro",
                vec![
                    r#"<div class="imageblock"{id? id="{id}"}>"#,
                    r#"<div class="content">"#,
                    r#"<img src="{target}" alt="{alt={target}}"{width? width="{width}"}{height? height="{height}"} />"#,
                    "</div>",
                    r#"<div class="title">{title}</div>"#,
                    "</div>",
                ],
            ),
            ("ruler-blockmacro", vec!["<hr />"]),
            (
                "pagebreak-blockmacro",
                vec![r#"<div style="page-break-after:always"></div>"#],
            ),
            (
                "comment-blockmacro",
                vec![r#"{showcomments#<p><span class="comment">{passtext}</span></p>}"#],
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), strings(&v)))
        .collect();

        let macros = vec![
            macro_entry(
                r"(?s)\\?\b(?P<name>http|https|ftp|file|mailto|image|link|anchor|xref):(?P<target>\S*?)\[(?P<attrlist>(?:\\.|[^\\\]])*)\]",
                "",
            ),
            macro_entry(r#"(?s)\\?\[\[(?P<attrlist>[\w"_:][^\]]*)\]\]"#, "anchor2"),
            macro_entry(r#"(?s)\\?&lt;&lt;(?P<attrlist>[\w"_:].*?)&gt;&gt;"#, "xref2"),
            macro_entry(
                r"(?s)\\?(?P<name>pass):(?P<subslist>\S*?)\[(?P<passtext>(?:\\.|[^\\\]])*)\]",
                "[]",
            ),
            macro_entry(r"(?s)\\?\+\+\+(?P<passtext>.*?)\+\+\+", "pass[]"),
            macro_entry(r"(?s)\\?\$\$(?P<passtext>.*?)\$\$", "pass[specialcharacters]"),
            macro_entry(
                r"^(?P<name>image)::(?P<target>\S*?)(\[(?P<attrlist>.*?)\])$",
                "#",
            ),
            macro_entry(r"^'{3,}$", "#ruler"),
            macro_entry(r"^<{3,}$", "#pagebreak"),
            macro_entry(r"^//(?P<passtext>[^/].*|)$", "#comment[normal]"),
        ];

        let specialcharacters = [("&", "&amp;"), ("<", "&lt;"), (">", "&gt;")]
            .into_iter()
            .map(|(c, r)| SpecialCharacter {
                character: c.to_string(),
                replacement: r.to_string(),
            })
            .collect();

        let quotes = [
            ("**", "#strong"),
            ("*", "strong"),
            ("``|''", "doublequoted"),
            ("'", "emphasis"),
            ("`|'", "singlequoted"),
            ("`", "monospaced"),
            ("+++", "#unquoted"),
            ("$$", "#unquoted"),
            ("++", "#monospaced"),
            ("+", "monospaced"),
            ("__", "#emphasis"),
            ("_", "emphasis"),
            ("##", "#unquoted"),
            ("#", "unquoted"),
            ("^", "#superscript"),
            ("~", "#subscript"),
        ]
        .into_iter()
        .map(|(q, t)| QuoteEntry {
            quote: q.to_string(),
            tag: t.to_string(),
        })
        .collect();

        let tags = [
            ("emphasis", "<em>|</em>"),
            ("strong", "<strong>|</strong>"),
            ("monospaced", "<code>|</code>"),
            ("superscript", "<sup>|</sup>"),
            ("subscript", "<sub>|</sub>"),
            ("doublequoted", "&#8220;|&#8221;"),
            ("singlequoted", "&#8216;|&#8217;"),
            ("unquoted", r#"{1?<span class="{1}">}|{1?</span>}"#),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let replacements = vec![
            replacement(r"(^|[^\\])\(C\)", "${1}&#169;"),
            replacement(r"\\\(C\)", "(C)"),
            replacement(r"(^|[^\\])\(R\)", "${1}&#174;"),
            replacement(r"\\\(R\)", "(R)"),
            replacement(r"(^|[^\\])\(TM\)", "${1}&#8482;"),
            replacement(r"\\\(TM\)", "(TM)"),
            replacement(r"(^-- )|( -- )|( --$)", "&#8201;&#8212;&#8201;"),
            replacement(r"(\w)--(\w)", "${1}&#8212;${2}"),
            replacement(r"(^|[^\\])\.\.\.", "${1}&#8230;"),
            replacement(r"\\\.\.\.", "..."),
            replacement(r"(^|[^\\])-&gt;", "${1}&#8594;"),
            replacement(r"(^|[^\\])=&gt;", "${1}&#8658;"),
            replacement(r"(^|[^\\])&lt;-", "${1}&#8592;"),
            replacement(r"(^|[^\\])&lt;=", "${1}&#8656;"),
        ];

        let replacements2 = vec![replacement(r"(?m)^(.*?)\s\+$", "${1}<br />")];

        Self {
            settings: Settings::default(),
            attributes,
            syntax: Syntax::default(),
            macros,
            sections,
            specialcharacters,
            quotes,
            tags,
            replacements,
            replacements2,
            replacements3: Vec::new(),
        }
    }
}

impl Default for Syntax {
    fn default() -> Self {
        let normal = strings(&[
            "specialcharacters",
            "quotes",
            "attributes",
            "replacements",
            "macros",
            "replacements2",
        ]);

        let mut admonition = BlockDef {
            name: "admonition".to_string(),
            delimiter: r"(?s)^\s*(?P<style>NOTE|TIP|IMPORTANT|WARNING|CAUTION):\s+(?P<text>.+)"
                .to_string(),
            ..BlockDef::default()
        };
        admonition.subs = normal.clone();

        let paragraphs = vec![
            BlockDef {
                name: "literal".to_string(),
                delimiter: r"(?s)(?P<text>\s+.*)".to_string(),
                options: strings(&["listelement"]),
                posattrs: strings(&["style"]),
                style: "literal".to_string(),
                subs: strings(&["verbatim"]),
                ..BlockDef::default()
            },
            admonition,
            BlockDef {
                name: "default".to_string(),
                delimiter: r"(?s)(?P<text>\S.*)".to_string(),
                posattrs: strings(&["style"]),
                style: "normal".to_string(),
                subs: normal.clone(),
                styles: [
                    ("normal".to_string(), StyleDef::default()),
                    (
                        "literal".to_string(),
                        StyleDef {
                            subs: Some(strings(&["verbatim"])),
                            ..StyleDef::default()
                        },
                    ),
                    (
                        "verse".to_string(),
                        StyleDef {
                            subs: Some(normal.clone()),
                            ..StyleDef::default()
                        },
                    ),
                ]
                .into_iter()
                .collect(),
                ..BlockDef::default()
            },
        ];

        let lists = vec![
            ListDef {
                name: "bulleted".to_string(),
                list_type: "bulleted".to_string(),
                delimiters: strings(&[r"^\s*- +(?P<text>.+)$", r"^\s*\*{1,5} +(?P<text>.+)$"]),
                subs: normal.clone(),
                ..ListDef::default()
            },
            ListDef {
                name: "numbered".to_string(),
                list_type: "numbered".to_string(),
                delimiters: strings(&[
                    r"^\s*(?P<index>\d+\.) +(?P<text>.+)$",
                    r"^\s*(?P<index>[a-z]\.) +(?P<text>.+)$",
                    r"^\s*(?P<index>[A-Z]\.) +(?P<text>.+)$",
                    r"^\s*(?P<index>[ivx]+\)) +(?P<text>.+)$",
                    r"^\s*(?P<index>[IVX]+\)) +(?P<text>.+)$",
                    r"^\s*\.{1,5} +(?P<text>.+)$",
                ]),
                subs: normal.clone(),
                style: "arabic".to_string(),
            },
            ListDef {
                name: "labeled".to_string(),
                list_type: "labeled".to_string(),
                delimiters: strings(&[r"^\s*(?P<label>.*[^:])::(?:\s+(?P<text>.+))?$"]),
                subs: normal.clone(),
                ..ListDef::default()
            },
        ];

        let blocks = vec![
            block("comment", r"^/{4,}$", &[], &["skip"]),
            block("sidebar", r"^\*{4,}$", &[], &["sectionbody"]),
            block("open", r"^--$", &[], &["sectionbody"]),
            block("pass", r"^\+{4,}$", &["attributes", "macros"], &[]),
            block("listing", r"^-{4,}$", &["verbatim"], &[]),
            block("literal", r"^\.{4,}$", &["verbatim"], &[]),
            block("quote", r"^_{4,}$", &[], &["sectionbody"]),
            block("example", r"^={4,}$", &[], &["sectionbody"]),
        ];

        let tables = vec![TableDef {
            name: "default".to_string(),
            delimiter: r"^\|={3,}$".to_string(),
            format: "psv".to_string(),
            separator: String::new(),
            subs: normal.clone(),
        }];

        let legacy_tables = vec![LegacyTableDef {
            name: "default".to_string(),
            fillchar: "-".to_string(),
            format: "fixed".to_string(),
            subs: normal.clone(),
        }];

        Self {
            attribute_entry: r"^:(?P<attrname>\w[^.]*?)(\.(?P<attrname2>.*?))?:(\s+(?P<attrvalue>.*))?$"
                .to_string(),
            attribute_list:
                r"(^\[\[(?P<id>[\w_:][\w_:.-]*)(,(?P<reftext>.*?))?\]\]$)|(^\[(?P<attrlist>.*)\]$)"
                    .to_string(),
            block_title: r"^\.(?P<title>([^.\s].*)|(\.[^.\s].*))$".to_string(),
            section_title: r"^(?P<title>.*?)$".to_string(),
            single_line_titles: strings(&[
                r"^= +(?P<title>\S.*?)( +=)?$",
                r"^== +(?P<title>\S.*?)( +==)?$",
                r"^=== +(?P<title>\S.*?)( +===)?$",
                r"^==== +(?P<title>\S.*?)( +====)?$",
                r"^===== +(?P<title>\S.*?)( +=====)?$",
            ]),
            underlines: strings(&["==", "--", "~~", "^^", "++"]),
            title_subs: normal.clone(),
            subs_normal: normal,
            subs_verbatim: strings(&["specialcharacters"]),
            paragraphs,
            lists,
            blocks,
            tables,
            legacy_tables,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_a_default_paragraph_last() {
        let config = EngineConfig::default();
        let last = config.syntax.paragraphs.last().unwrap();
        assert_eq!(last.name, "default");
        assert_eq!(config.settings.max_include_depth, 10);
        assert_eq!(config.settings.tabsize, 8);
    }

    #[test]
    fn test_default_patterns_compile() {
        let config = EngineConfig::default();
        let syntax = &config.syntax;
        let mut patterns = vec![
            syntax.attribute_entry.clone(),
            syntax.attribute_list.clone(),
            syntax.block_title.clone(),
            syntax.section_title.clone(),
        ];
        patterns.extend(syntax.single_line_titles.iter().cloned());
        patterns.extend(config.macros.iter().map(|m| m.pattern.clone()));
        patterns.extend(config.replacements.iter().map(|r| r.pattern.clone()));
        patterns.extend(syntax.lists.iter().flat_map(|l| l.delimiters.clone()));
        patterns.extend(syntax.blocks.iter().map(|b| b.delimiter.clone()));
        for p in patterns {
            assert!(regex::Regex::new(&p).is_ok(), "{}", p);
        }
    }
}
