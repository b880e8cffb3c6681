//! Split long text into bounded pages.
//!
//! Paragraphs (blank-line separated) are packed greedily. A paragraph that
//! cannot fit on a page by itself is broken at sentence terminators
//! (`. ! ? 。！？`), and a sentence that still does not fit is cut at character
//! boundaries, so nothing is ever dropped.
//!
//! Every [`Page`] carries two views of its slice of the source:
//! * `text`: what gets rendered, without the blank lines or inter-sentence
//!   whitespace at page boundaries;
//! * `span`: a byte range into the source. Spans are contiguous and cover
//!   the whole input, so joining them reproduces the source exactly.

use crate::error::ShareImageError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// One or more blank lines (lines holding only spaces/tabs count as blank),
/// LF or CRLF.
static RE_PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r?\n(?:[ \t]*\r?\n)+").unwrap());

/// A run of sentence terminators, ASCII and full-width.
static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?。！？]+").unwrap());

/// One bounded segment of the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    /// 0-based position in the page sequence.
    pub index: usize,
    /// Display text.
    pub text: String,
    /// Byte range of the source this page accounts for, boundary
    /// whitespace included.
    pub span: Range<usize>,
}

impl Page {
    /// A single page holding all of `text`.
    pub fn whole(text: &str) -> Self {
        Self {
            index: 0,
            text: text.to_string(),
            span: 0..text.len(),
        }
    }

    /// Length of the display text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Split `text` into pages of at most `max_chars_per_page` characters.
///
/// # Errors
/// `InvalidConfig` when `max_chars_per_page` is 0, since a zero bound can
/// never be satisfied.
///
/// # Example
/// ```rust
/// use share_image::paginate;
///
/// let pages = paginate("A\n\nB\n\nC", 3).unwrap();
/// let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
/// assert_eq!(texts, ["A", "B", "C"]);
/// ```
pub fn paginate(text: &str, max_chars_per_page: usize) -> Result<Vec<Page>, ShareImageError> {
    if max_chars_per_page == 0 {
        return Err(ShareImageError::InvalidConfig(
            "max chars per page must be ≥ 1".into(),
        ));
    }
    if text.trim().is_empty() {
        return Ok(vec![Page::whole(text)]);
    }

    let mut packer = Packer {
        source: text,
        max: max_chars_per_page,
        current: None,
        pieces: Vec::new(),
    };

    for para in paragraphs(text) {
        if char_len(&text[para.clone()]) <= max_chars_per_page {
            packer.push(para);
            continue;
        }
        // An oversized paragraph always starts on a fresh page; its last
        // piece may still absorb the paragraphs that follow.
        packer.flush();
        for sentence in sentences(text, para) {
            if char_len(&text[sentence.clone()]) <= max_chars_per_page {
                packer.push(sentence);
            } else {
                for chunk in hard_split(text, sentence, max_chars_per_page) {
                    packer.push(chunk);
                }
            }
        }
    }
    packer.flush();

    Ok(assemble(text, packer.pieces))
}

/// Paginate only when multi-page mode is on; otherwise the whole text is
/// one page.
pub fn paginate_if(
    enabled: bool,
    text: &str,
    max_chars_per_page: usize,
) -> Result<Vec<Page>, ShareImageError> {
    if enabled {
        paginate(text, max_chars_per_page)
    } else {
        Ok(vec![Page::whole(text)])
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

/// Greedy accumulator of content ranges into pages.
struct Packer<'a> {
    source: &'a str,
    max: usize,
    current: Option<Range<usize>>,
    pieces: Vec<Range<usize>>,
}

impl Packer<'_> {
    /// Append `unit` to the current page if the page (separator included)
    /// stays within the bound, otherwise close the page and start a new one.
    fn push(&mut self, unit: Range<usize>) {
        match self.current.take() {
            None => self.current = Some(unit),
            Some(cur) => {
                if char_len(&self.source[cur.start..unit.end]) <= self.max {
                    self.current = Some(cur.start..unit.end);
                } else {
                    self.pieces.push(cur);
                    self.current = Some(unit);
                }
            }
        }
    }

    fn flush(&mut self) {
        if let Some(cur) = self.current.take() {
            self.pieces.push(cur);
        }
    }
}

/// Content ranges of non-blank paragraphs.
fn paragraphs(text: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in RE_PARAGRAPH_BREAK.find_iter(text) {
        push_trimmed_lines(text, start..m.start(), &mut out);
        start = m.end();
    }
    push_trimmed_lines(text, start..text.len(), &mut out);
    out
}

/// Push `range` unless it is whitespace-only. Leading/trailing newlines are
/// left to the separators.
fn push_trimmed_lines(text: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    if slice.trim().is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start_matches(is_line_break).len();
    let trail = slice.len() - slice.trim_end_matches(is_line_break).len();
    out.push(range.start + lead..range.end - trail);
}

/// Sentence ranges within `para`. Each sentence ends after its terminator
/// run; the whitespace that follows belongs to the gap before the next one.
fn sentences(text: &str, para: Range<usize>) -> Vec<Range<usize>> {
    let slice = &text[para.clone()];
    let mut out = Vec::new();
    let mut start = 0;
    for m in RE_SENTENCE_END.find_iter(slice) {
        if m.end() > start {
            out.push(para.start + start..para.start + m.end());
        }
        start = m.end() + (slice.len() - m.end() - slice[m.end()..].trim_start().len());
    }
    if start < slice.len() {
        out.push(para.start + start..para.end);
    }
    out
}

/// Cut `range` into consecutive runs of at most `max` characters. Line
/// breaks at a cut stay in the gap between runs, so no run starts or ends
/// with one.
fn hard_split(text: &str, range: Range<usize>, max: usize) -> Vec<Range<usize>> {
    let slice = &text[range.clone()];
    let mut out = Vec::new();
    let mut push = |start: usize, end: usize| {
        let run = slice[start..end].trim_end_matches(is_line_break);
        out.push(range.start + start..range.start + start + run.len());
    };
    // (byte offset, chars so far) of the run being built.
    let mut current: Option<(usize, usize)> = None;
    for (byte_idx, ch) in slice.char_indices() {
        current = match current {
            None if is_line_break(ch) => None,
            None => Some((byte_idx, 1)),
            Some((start, count)) if count == max => {
                push(start, byte_idx);
                (!is_line_break(ch)).then_some((byte_idx, 1))
            }
            Some((start, count)) => Some((start, count + 1)),
        };
    }
    if let Some((start, _)) = current {
        push(start, slice.len());
    }
    out
}

/// Turn content ranges into pages whose spans tile the whole source.
fn assemble(text: &str, pieces: Vec<Range<usize>>) -> Vec<Page> {
    let count = pieces.len();
    pieces
        .iter()
        .enumerate()
        .map(|(index, content)| {
            let span_start = if index == 0 { 0 } else { content.start };
            let span_end = if index + 1 == count {
                text.len()
            } else {
                pieces[index + 1].start
            };
            Page {
                index,
                text: text[content.clone()].to_string(),
                span: span_start..span_end,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(pages: &[Page]) -> Vec<&str> {
        pages.iter().map(|p| p.text.as_str()).collect()
    }

    fn rejoin(source: &str, pages: &[Page]) -> String {
        pages.iter().map(|p| &source[p.span.clone()]).collect()
    }

    #[test]
    fn blank_line_paragraphs_one_per_page() {
        let pages = paginate("A\n\nB\n\nC", 3).unwrap();
        assert_eq!(texts(&pages), ["A", "B", "C"]);
        assert_eq!(rejoin("A\n\nB\n\nC", &pages), "A\n\nB\n\nC");
        assert_eq!(
            pages.iter().map(|p| p.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn paragraphs_pack_with_separator_counted() {
        // "A\n\nB" is 4 chars
        let pages = paginate("A\n\nB\n\nC", 4).unwrap();
        assert_eq!(texts(&pages), ["A\n\nB", "C"]);
    }

    #[test]
    fn short_text_is_a_single_page() {
        let text = "Hello world. Second sentence!";
        let pages = paginate(text, text.chars().count()).unwrap();
        assert_eq!(texts(&pages), [text]);
    }

    #[test]
    fn empty_text_returns_itself() {
        assert_eq!(texts(&paginate("", 10).unwrap()), [""]);
        assert_eq!(texts(&paginate("  \n\n ", 10).unwrap()), ["  \n\n "]);
    }

    #[test]
    fn zero_bound_is_invalid_config() {
        let err = paginate("abc", 0).unwrap_err();
        assert!(matches!(err, ShareImageError::InvalidConfig(_)));
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let text = "One two. Three four! Five six?";
        let pages = paginate(text, 12).unwrap();
        assert_eq!(texts(&pages), ["One two.", "Three four!", "Five six?"]);
        assert_eq!(rejoin(text, &pages), text);
    }

    #[test]
    fn full_width_terminators_split() {
        let text = "第一句话。第二句话！第三句话？";
        let pages = paginate(text, 5).unwrap();
        assert_eq!(texts(&pages), ["第一句话。", "第二句话！", "第三句话？"]);
    }

    #[test]
    fn overlong_sentence_is_hard_split_without_loss() {
        let text = "abcdefghij";
        let pages = paginate(text, 4).unwrap();
        assert_eq!(texts(&pages), ["abcd", "efgh", "ij"]);
        assert_eq!(rejoin(text, &pages), text);
    }

    #[test]
    fn hard_split_respects_multibyte_boundaries() {
        let text = "ééééé";
        let pages = paginate(text, 2).unwrap();
        assert_eq!(texts(&pages), ["éé", "éé", "é"]);
    }

    #[test]
    fn last_piece_of_long_paragraph_absorbs_next_paragraph() {
        let text = "abcdefg\n\nx";
        let pages = paginate(text, 5).unwrap();
        assert_eq!(texts(&pages), ["abcde", "fg\n\nx"]);
    }

    #[test]
    fn no_page_exceeds_bound_and_spans_tile_source() {
        let text = "Lorem ipsum dolor sit amet. Consectetur adipiscing elit!\n\n\
                    Sed do eiusmod tempor.\n\nUt enim ad minim veniam, quis nostrud exercitation \
                    ullamco laboris nisi ut aliquip ex ea commodo consequat.\n\n\n\nDuis aute.";
        for n in 1..40 {
            let pages = paginate(text, n).unwrap();
            assert_eq!(rejoin(text, &pages), text, "n={n}");
            for p in &pages {
                assert!(p.char_len() <= n, "n={n} page={:?}", p.text);
                assert!(!p.text.is_empty());
            }
        }
    }

    #[test]
    fn paginating_a_page_again_is_identity() {
        let text = "First paragraph here.\n\nSecond one, a bit longer. With two sentences.";
        for page in paginate(text, 30).unwrap() {
            let again = paginate(&page.text, 30).unwrap();
            assert_eq!(texts(&again), [page.text.as_str()]);
        }
    }

    #[test]
    fn crlf_blank_lines_separate_paragraphs() {
        let text = "A\r\n\r\nB\r\n\r\nC";
        let pages = paginate(text, 3).unwrap();
        assert_eq!(texts(&pages), ["A", "B", "C"]);
        assert_eq!(rejoin(text, &pages), text);

        let packed = paginate("one\r\n\r\ntwo\r\n \r\nthree", 100).unwrap();
        assert_eq!(texts(&packed), ["one\r\n\r\ntwo\r\n \r\nthree"]);
    }

    #[test]
    fn hard_split_leaves_line_breaks_between_pages() {
        let text = "abcd\nefg";
        let pages = paginate(text, 4).unwrap();
        assert_eq!(texts(&pages), ["abcd", "efg"]);
        assert_eq!(rejoin(text, &pages), text);

        let crlf = "abcd\r\nefgh\r\nij";
        let pages = paginate(crlf, 4).unwrap();
        assert_eq!(texts(&pages), ["abcd", "efgh", "ij"]);
        assert_eq!(rejoin(crlf, &pages), crlf);
        for page in &pages {
            let again = paginate(&page.text, 4).unwrap();
            assert_eq!(texts(&again), [page.text.as_str()]);
        }
    }

    #[test]
    fn disabled_pagination_returns_whole_text() {
        let pages = paginate_if(false, "A\n\nB", 1).unwrap();
        assert_eq!(texts(&pages), ["A\n\nB"]);
    }
}
