use core::fmt;

use pagemark::ViewportConfig;
use quick_xml::events::Event;

use crate::markup::{local_tag_name, markup_reader, token_offset};

/// Layout measurement collaborator.
///
/// Given a resource's raw content and the viewport, report the byte offsets at
/// which each page starts. Offsets must be strictly increasing and the first
/// one must be `0`; the pagination engine normalizes minor deviations and
/// rejects the rest.
pub trait LayoutMeasurer: Send + Sync {
    fn measure(&self, content: &[u8], viewport: &ViewportConfig) -> Result<Vec<usize>, LayoutError>;
}

/// Measurement failure reported by a [`LayoutMeasurer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutError {
    pub reason: String,
}

impl LayoutError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layout measurement failed: {}", self.reason)
    }
}

impl std::error::Error for LayoutError {}

/// Typography metrics used by [`TextFlowMeasurer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowMetrics {
    /// Font size at `font_scale == 1.0`.
    pub base_font_px: f32,
    /// Advance of a narrow glyph in ems. Wide (CJK) glyphs take two advances.
    pub glyph_advance_em: f32,
    /// Line height in ems at `line_height_scale == 1.0`.
    pub base_line_height: f32,
    /// Margin applied on every side of the viewport.
    pub margin_px: u32,
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self {
            base_font_px: 16.0,
            glyph_advance_em: 0.5,
            base_line_height: 1.4,
            margin_px: 16,
        }
    }
}

impl FlowMetrics {
    /// Narrow-glyph slots per line and lines per page for `viewport`.
    pub fn grid(&self, viewport: &ViewportConfig) -> (usize, usize) {
        let (inline_px, block_px) = if viewport.progression.is_vertical() {
            (viewport.height_px, viewport.width_px)
        } else {
            (viewport.width_px, viewport.height_px)
        };
        let margins = self.margin_px.saturating_mul(2);
        let inline_px = inline_px.saturating_sub(margins).max(1) as f32;
        let block_px = block_px.saturating_sub(margins).max(1) as f32;

        let font_px = (self.base_font_px * viewport.font_scale).max(1.0);
        let advance_px = (font_px * self.glyph_advance_em).max(0.5);
        let line_px = (font_px * self.base_line_height * viewport.line_height_scale).max(1.0);

        let slots = (inline_px / advance_px).floor().max(1.0) as usize;
        let lines = (block_px / line_px).floor().max(1.0) as usize;
        (slots, lines)
    }
}

/// Estimating measurer for reflowable XHTML or plain text.
///
/// Greedy word wrap over a fixed glyph grid driven by markup events. Only
/// text and character data are laid out; block tags end the current line,
/// entity references count as one glyph, runs of whitespace collapse, and CJK
/// glyphs occupy two slots and may break anywhere. Good enough to give stable page boundaries when no platform
/// renderer is available to report real ones.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextFlowMeasurer {
    metrics: FlowMetrics,
}

impl TextFlowMeasurer {
    pub fn new(metrics: FlowMetrics) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> FlowMetrics {
        self.metrics
    }
}

impl LayoutMeasurer for TextFlowMeasurer {
    fn measure(&self, content: &[u8], viewport: &ViewportConfig) -> Result<Vec<usize>, LayoutError> {
        viewport
            .validate()
            .map_err(|err| LayoutError::new(err.to_string()))?;
        let (slots, lines) = self.metrics.grid(viewport);
        let mut flow = FlowState::new(slots, lines);

        let mut reader = markup_reader(content);
        let mut buf = Vec::with_capacity(64);
        let mut skip_depth = 0usize;
        loop {
            let start = token_offset(&reader);
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let tag = local_tag_name(e.name().as_ref());
                    if SKIPPED_TAGS.contains(&tag.as_slice()) {
                        skip_depth += 1;
                    } else if skip_depth == 0 && BLOCK_TAGS.contains(&tag.as_slice()) {
                        flow.block_boundary();
                    }
                }
                Ok(Event::Empty(e)) => {
                    let tag = local_tag_name(e.name().as_ref());
                    if skip_depth == 0 && BLOCK_TAGS.contains(&tag.as_slice()) {
                        flow.block_boundary();
                    }
                }
                Ok(Event::End(e)) => {
                    let tag = local_tag_name(e.name().as_ref());
                    if SKIPPED_TAGS.contains(&tag.as_slice()) {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else if skip_depth == 0 && BLOCK_TAGS.contains(&tag.as_slice()) {
                        flow.block_boundary();
                    }
                }
                Ok(Event::Text(e)) if skip_depth == 0 => {
                    let text = e
                        .decode()
                        .map_err(|err| markup_error(start, &err))?;
                    flow.text(start, &text);
                }
                Ok(Event::CData(e)) if skip_depth == 0 => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| markup_error(start, &err))?;
                    flow.text(start + CDATA_OPEN.len(), &text);
                }
                Ok(Event::GeneralRef(_)) if skip_depth == 0 => flow.glyph(start, 1, false),
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(markup_error(token_offset(&reader), &err)),
            }
            buf.clear();
        }

        Ok(flow.breaks)
    }
}

fn markup_error(offset: usize, err: &dyn fmt::Display) -> LayoutError {
    LayoutError::new(format!("malformed markup near byte {offset}: {err}"))
}

struct FlowState {
    slots: usize,
    lines_per_page: usize,
    breaks: Vec<usize>,
    line_units: usize,
    line_has_content: bool,
    lines_on_page: usize,
    pending_space: bool,
    force_new_line: bool,
    /// Offset of the current word's first glyph and the line units before it.
    word_start: Option<(usize, usize)>,
    break_after_glyph: bool,
}

impl FlowState {
    fn new(slots: usize, lines_per_page: usize) -> Self {
        let mut breaks = Vec::with_capacity(16);
        breaks.push(0);
        Self {
            slots: slots.max(1),
            lines_per_page: lines_per_page.max(1),
            breaks,
            line_units: 0,
            line_has_content: false,
            lines_on_page: 0,
            pending_space: false,
            force_new_line: false,
            word_start: None,
            break_after_glyph: false,
        }
    }

    fn text(&mut self, offset: usize, text: &str) {
        for (idx, ch) in text.char_indices() {
            if ch.is_whitespace() {
                self.space();
            } else if is_wide(ch) {
                self.glyph(offset + idx, 2, true);
            } else {
                self.glyph(offset + idx, 1, false);
            }
        }
    }

    fn space(&mut self) {
        if self.line_has_content {
            self.pending_space = true;
        }
    }

    fn block_boundary(&mut self) {
        if self.line_has_content {
            self.force_new_line = true;
        }
        self.pending_space = false;
    }

    fn new_line(&mut self, start: usize, carried_units: usize) {
        self.lines_on_page += 1;
        if self.lines_on_page >= self.lines_per_page {
            if self.breaks.last().is_some_and(|last| start > *last) {
                self.breaks.push(start);
            }
            self.lines_on_page = 0;
        }
        self.line_units = carried_units;
        self.line_has_content = carried_units > 0;
        self.pending_space = false;
        self.force_new_line = false;
    }

    fn glyph(&mut self, offset: usize, units: usize, wide: bool) {
        if self.force_new_line && self.line_has_content {
            self.new_line(offset, 0);
            self.word_start = None;
        }

        let starts_word =
            !self.line_has_content || self.pending_space || wide || self.break_after_glyph;
        let space_units = usize::from(self.pending_space && self.line_has_content);

        if self.line_has_content && self.line_units + space_units + units > self.slots {
            match self.word_start {
                _ if starts_word => {
                    self.new_line(offset, 0);
                }
                Some((word_offset, units_before)) if units_before > 0 => {
                    let carried = self.line_units - units_before;
                    self.new_line(word_offset, carried);
                    self.word_start = Some((word_offset, 0));
                }
                _ => {
                    self.new_line(offset, 0);
                    self.word_start = Some((offset, 0));
                }
            }
        }

        if self.pending_space && self.line_has_content {
            self.line_units += 1;
        }
        self.pending_space = false;
        if starts_word || !self.line_has_content {
            self.word_start = Some((offset, self.line_units));
        }
        self.line_units += units;
        self.line_has_content = true;
        self.break_after_glyph = wide;
    }
}

const BLOCK_TAGS: &[&[u8]] = &[
    b"p",
    b"div",
    b"br",
    b"li",
    b"ul",
    b"ol",
    b"h1",
    b"h2",
    b"h3",
    b"h4",
    b"h5",
    b"h6",
    b"section",
    b"article",
    b"blockquote",
    b"pre",
    b"tr",
    b"hr",
    b"table",
    b"figure",
    b"body",
];

const SKIPPED_TAGS: &[&[u8]] = &[b"head", b"style", b"script", b"title"];

const CDATA_OPEN: &str = "<![CDATA[";

fn is_wide(ch: char) -> bool {
    matches!(
        ch as u32,
        0x1100..=0x115f
            | 0x2e80..=0xa4cf
            | 0xac00..=0xd7a3
            | 0xf900..=0xfaff
            | 0xfe30..=0xfe4f
            | 0xff00..=0xff60
            | 0xffe0..=0xffe6
            | 0x20000..=0x3fffd
    )
}
