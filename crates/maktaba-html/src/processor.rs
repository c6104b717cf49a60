//! HTML page processing: from extractor output to the processed
//! metadata document.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use ego_tree::NodeRef;
use maktaba::types::{PageRecord, ProcessedBook, TocEntry};
use maktaba::{Error, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::info;

use crate::text::arabic_to_english_digits;

static PAGE_NUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"ص:\s*([٠-٩0-9]+)").unwrap()
});
static INLINE_PAGE_MARK_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"⦗ص:\s*[٠-٩0-9]+⦘").unwrap()
});
static PAREN_FOOTNOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"\([0-9]+\)").unwrap()
});
static BRACKET_FOOTNOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Static pattern is always valid
    Regex::new(r"\[[0-9]+\]").unwrap()
});

#[allow(clippy::unwrap_used)] // Static CSS selectors are always valid
fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// Arabic front-matter labels and the metadata fields they map to.
const BIBLIO_LABELS: &[(&str, BiblioField)] = &[
    ("المحقق", BiblioField::Editor),
    ("الطبعة", BiblioField::Edition),
    ("الناشر", BiblioField::Publisher),
    ("عدد الأجزاء", BiblioField::NumVolumes),
    ("عدد الصفحات", BiblioField::NumPages),
    ("تاريخ النشر بالشاملة", BiblioField::ShamelaPubDate),
    ("المؤلف", BiblioField::AuthorFull),
];

#[derive(Debug, Clone, Copy)]
enum BiblioField {
    Editor,
    Edition,
    Publisher,
    NumVolumes,
    NumPages,
    ShamelaPubDate,
    AuthorFull,
}

/// The book's catalogue identity, carried into the processed document.
#[derive(Debug, Clone, Default)]
pub struct BookIdentity {
    pub book_id: i64,
    pub book_name: String,
    pub author_name: Option<String>,
    pub category_name: Option<String>,
    pub table_of_contents: Option<Vec<TocEntry>>,
}

/// Process the ordered HTML pages of one exported book into the
/// canonical metadata document.
///
/// A page counts as content when its page head carries a page-number
/// span and it yields non-empty cleaned text; other pages are only
/// examined for the optional bibliographic fields. A book with no
/// content pages at all fails the export.
pub fn process_book_html(html_contents: &[String], identity: BookIdentity) -> Result<ProcessedBook> {
    let main_sel = selector("div.Main");
    let page_sel = selector("div.PageText");
    let head_sel = selector("div.PageHead");
    let page_num_sel = selector("span.PageNumber");
    let part_name_sel = selector("span.PartName");

    let mut book = ProcessedBook {
        book_id: identity.book_id,
        book_name: identity.book_name,
        author: identity.author_name,
        category: identity.category_name,
        table_of_contents: identity.table_of_contents,
        parts: Vec::new(),
        pages: BTreeMap::new(),
        ..Default::default()
    };

    let mut biblio_found = false;
    let mut page_id = 0i64;

    for html in html_contents {
        let doc = Html::parse_document(html);
        let Some(main) = doc.select(&main_sel).next() else {
            continue;
        };

        for page in main.select(&page_sel) {
            let page_head = page.select(&head_sel).next();
            let is_content = page_head
                .map(|head| head.select(&page_num_sel).next().is_some())
                .unwrap_or(false);

            if !is_content {
                if !biblio_found {
                    biblio_found = extract_biblio_fields(page, &mut book);
                }
                continue;
            }

            let cleaned_text = extract_page_text(page);
            if cleaned_text.is_empty() {
                continue;
            }

            let part_title = page_head
                .and_then(|head| head.select(&part_name_sel).next())
                .map(|span| span.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            let page_num = page_head
                .and_then(|head| head.select(&page_num_sel).next())
                .and_then(|span| parse_page_num(&span.text().collect::<String>()));

            page_id += 1;
            if !book.parts.contains(&part_title) {
                book.parts.push(part_title.clone());
            }
            book.pages
                .entry(part_title.clone())
                .or_default()
                .push(PageRecord {
                    page_id,
                    page_num,
                    part_title,
                    cleaned_text,
                    display_elem: page.html(),
                });
        }
    }

    if page_id == 0 {
        return Err(Error::api(format!(
            "book {} contains no content pages",
            book.book_id
        )));
    }

    info!(
        book_id = book.book_id,
        total_parts = book.parts.len(),
        total_pages = book.page_count(),
        "Processed book HTML"
    );
    Ok(book)
}

/// Parse `ص: <digits>` (Arabic-Indic or ASCII) from a page-number span.
fn parse_page_num(text: &str) -> Option<i64> {
    let normalized = arabic_to_english_digits(text);
    PAGE_NUM_RE
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract a page's cleaned text: drop the page head, footnote divs,
/// and superscripts; strip inline footnote markers; wrap title spans in
/// `**…**`; keep paragraph breaks.
fn extract_page_text(page: ElementRef<'_>) -> String {
    let mut content = String::new();
    for child in page.children() {
        process_node(child, &mut content);
    }
    content.trim().to_string()
}

fn process_node(node: NodeRef<'_, Node>, content: &mut String) {
    match node.value() {
        Node::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return;
            }
            let cleaned = strip_inline_markers(trimmed);
            if !cleaned.trim().is_empty() {
                content.push_str(&cleaned);
                content.push(' ');
            }
        }
        Node::Element(element) => {
            let name = element.name();
            if name == "sup" || name == "sub" {
                return;
            }
            if name == "div"
                && element
                    .classes()
                    .any(|class| class == "footnote" || class == "PageHead")
            {
                return;
            }
            if name == "span" && element.classes().any(|class| class == "title") {
                if let Some(span) = ElementRef::wrap(node) {
                    let text = span.text().collect::<String>();
                    let text = text.trim();
                    if !text.is_empty() {
                        content.push_str("**");
                        content.push_str(text);
                        content.push_str("** ");
                    }
                }
                return;
            }
            if name == "p" {
                content.push_str("\n\n");
            }
            for child in node.children() {
                process_node(child, content);
            }
        }
        _ => {}
    }
}

/// Remove `(n)`, `[n]`, and `⦗ص: n⦘` markers. The parenthesised forms
/// are kept when they open the text node, so footnote bodies that start
/// with their own number survive.
fn strip_inline_markers(text: &str) -> String {
    let text = INLINE_PAGE_MARK_RE.replace_all(text, "");
    let text = strip_unless_leading(&PAREN_FOOTNOTE_RE, &text);
    strip_unless_leading(&BRACKET_FOOTNOTE_RE, &text)
}

fn strip_unless_leading(re: &Regex, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for m in re.find_iter(text) {
        if m.start() == 0 {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Pull the labelled bibliographic fields out of a front-matter page.
/// Returns whether anything was recognized.
fn extract_biblio_fields(page: ElementRef<'_>, book: &mut ProcessedBook) -> bool {
    let p_sel = selector("p");
    let title_sel = selector("span.title");
    let mut found = false;

    for paragraph in page.select(&p_sel) {
        let Some(title_span) = paragraph.select(&title_sel).next() else {
            continue;
        };
        let label = title_span
            .text()
            .collect::<String>()
            .trim()
            .replace(':', "");
        let Some((_, field)) = BIBLIO_LABELS.iter().find(|(ar, _)| *ar == label) else {
            continue;
        };

        let value = paragraph_text_without(paragraph, title_span);
        if value.is_empty() {
            continue;
        }
        found = true;
        match field {
            BiblioField::Editor => book.editor = Some(value),
            BiblioField::Edition => book.edition = Some(value),
            BiblioField::Publisher => book.publisher = Some(value),
            BiblioField::NumVolumes => book.num_volumes = Some(value),
            BiblioField::NumPages => book.num_pages = Some(value),
            BiblioField::ShamelaPubDate => book.shamela_pub_date = Some(value),
            BiblioField::AuthorFull => book.author_full = Some(value),
        }
    }

    found
}

/// The text of a paragraph with one child element excluded; used to
/// read a labelled value without its label.
fn paragraph_text_without(paragraph: ElementRef<'_>, excluded: ElementRef<'_>) -> String {
    let mut out = String::new();
    for child in paragraph.children() {
        if child.id() == excluded.id() {
            continue;
        }
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    out.push_str(&element.text().collect::<String>());
                }
            }
            _ => {}
        }
    }
    out.trim().trim_start_matches(':').trim().to_string()
}
