//! Position values shared by every layer: locators, viewport configuration
//! and the reading-direction model.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::{digest32, to_hex};

/// Clamp a progression value into `[0.0, 1.0]`; non-finite input maps to `0.0`.
pub fn normalize_progression(progression: f64) -> f64 {
    if progression.is_finite() {
        return progression.clamp(0.0, 1.0);
    }
    0.0
}

/// Publication reading progression.
///
/// Affects only how on-screen gestures map to logical page turns; pagination
/// itself is direction-agnostic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingProgression {
    #[default]
    Ltr,
    Rtl,
    /// Vertical writing, columns flow right to left.
    Ttb,
    Btt,
}

impl ReadingProgression {
    /// Parse a host-supplied progression name (`ltr`, `rtl`, `ttb`, `btt`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ltr" => Some(Self::Ltr),
            "rtl" => Some(Self::Rtl),
            "ttb" | "vertical" => Some(Self::Ttb),
            "btt" => Some(Self::Btt),
            _ => None,
        }
    }

    /// Whether this progression lays text out in vertical columns.
    pub fn is_vertical(self) -> bool {
        matches!(self, Self::Ttb | Self::Btt)
    }

    /// Map a tapped screen edge to a logical page-turn direction.
    ///
    /// Returns `None` for edges that do not turn pages in this progression.
    pub fn direction_for_edge(self, edge: ScreenEdge) -> Option<Direction> {
        use Direction::{Backward, Forward};
        use ScreenEdge::{Bottom, Left, Right, Top};
        match (self, edge) {
            (Self::Ltr, Right) | (Self::Ltr, Bottom) => Some(Forward),
            (Self::Ltr, Left) | (Self::Ltr, Top) => Some(Backward),
            (Self::Rtl, Left) | (Self::Rtl, Bottom) => Some(Forward),
            (Self::Rtl, Right) | (Self::Rtl, Top) => Some(Backward),
            (Self::Ttb, Left) | (Self::Ttb, Bottom) => Some(Forward),
            (Self::Ttb, Right) | (Self::Ttb, Top) => Some(Backward),
            (Self::Btt, Top) => Some(Forward),
            (Self::Btt, Bottom) => Some(Backward),
            (Self::Btt, Left) | (Self::Btt, Right) => None,
        }
    }
}

impl fmt::Display for ReadingProgression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ltr => "ltr",
            Self::Rtl => "rtl",
            Self::Ttb => "ttb",
            Self::Btt => "btt",
        };
        f.write_str(name)
    }
}

/// Logical page-turn direction in reading order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

/// Screen edge a host reports for tap/swipe page turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScreenEdge {
    Left,
    Right,
    Top,
    Bottom,
}

/// Color theme. Does not affect layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Sepia,
}

impl Theme {
    /// Parse a host-supplied theme name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            "sepia" => Some(Self::Sepia),
            _ => None,
        }
    }
}

/// Stable fingerprint of all layout-affecting viewport settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayoutProfileId(pub [u8; 32]);

impl LayoutProfileId {
    /// Build a deterministic profile id from arbitrary payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(digest32(bytes))
    }

    /// Lowercase hex form, used in storage keys.
    pub fn to_hex(&self) -> String {
        to_hex(&self.0)
    }
}

/// Rejected viewport configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewportError {
    ZeroDimension { width_px: u32, height_px: u32 },
    InvalidScale { field: &'static str, value: f32 },
}

impl fmt::Display for ViewportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDimension {
                width_px,
                height_px,
            } => write!(f, "viewport has zero dimension ({}x{})", width_px, height_px),
            Self::InvalidScale { field, value } => {
                write!(f, "viewport {} must be finite and positive (got {})", field, value)
            }
        }
    }
}

impl std::error::Error for ViewportError {}

/// Rendering viewport and typography settings.
///
/// Two configs with the same [`LayoutProfileId`] paginate identically; theme
/// and reading progression are carried for the host but never trigger
/// re-measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportConfig {
    pub width_px: u32,
    pub height_px: u32,
    /// Font size multiplier (`1.0` = publication default).
    pub font_scale: f32,
    /// Line height multiplier (`1.0` = publication default).
    pub line_height_scale: f32,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub progression: ReadingProgression,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self::for_display(480, 800)
    }
}

impl ViewportConfig {
    /// Config for a display size with default typography.
    pub fn for_display(width_px: u32, height_px: u32) -> Self {
        Self {
            width_px,
            height_px,
            font_scale: 1.0,
            line_height_scale: 1.0,
            theme: Theme::Light,
            progression: ReadingProgression::Ltr,
        }
    }

    pub fn with_font_scale(mut self, font_scale: f32) -> Self {
        self.font_scale = font_scale;
        self
    }

    pub fn with_line_height_scale(mut self, line_height_scale: f32) -> Self {
        self.line_height_scale = line_height_scale;
        self
    }

    pub fn with_theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn with_progression(mut self, progression: ReadingProgression) -> Self {
        self.progression = progression;
        self
    }

    /// Reject configurations no measurer can lay out.
    pub fn validate(&self) -> Result<(), ViewportError> {
        if self.width_px == 0 || self.height_px == 0 {
            return Err(ViewportError::ZeroDimension {
                width_px: self.width_px,
                height_px: self.height_px,
            });
        }
        for (field, value) in [
            ("font_scale", self.font_scale),
            ("line_height_scale", self.line_height_scale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ViewportError::InvalidScale { field, value });
            }
        }
        Ok(())
    }

    /// Fingerprint of the settings that change page breaks.
    pub fn layout_profile_id(&self) -> LayoutProfileId {
        let payload = format!(
            "{}x{}|{:?}|{:?}|{}",
            self.width_px,
            self.height_px,
            self.font_scale.to_bits(),
            self.line_height_scale.to_bits(),
            self.progression.is_vertical()
        );
        LayoutProfileId::from_bytes(payload.as_bytes())
    }

    /// Whether `other` paginates identically to `self`.
    pub fn same_layout(&self, other: &ViewportConfig) -> bool {
        self.width_px == other.width_px
            && self.height_px == other.height_px
            && self.font_scale.to_bits() == other.font_scale.to_bits()
            && self.line_height_scale.to_bits() == other.line_height_scale.to_bits()
            && self.progression.is_vertical() == other.progression.is_vertical()
    }
}

/// Position within a publication, independent of rendering technology.
///
/// Locators are immutable: every position change produces a new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locator {
    href: String,
    media_type: String,
    chapter_progression: f64,
    total_progression: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fragment_anchor: Option<String>,
}

impl Locator {
    /// Locator at the start of `href`.
    pub fn new(href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            media_type: media_type.into(),
            chapter_progression: 0.0,
            total_progression: 0.0,
            page_index: None,
            fragment_anchor: None,
        }
    }

    /// Return a copy with `chapter_progression` clamped into `[0, 1]`.
    pub fn with_chapter_progression(mut self, progression: f64) -> Self {
        self.chapter_progression = normalize_progression(progression);
        self
    }

    /// Return a copy with `total_progression` clamped into `[0, 1]`.
    pub fn with_total_progression(mut self, progression: f64) -> Self {
        self.total_progression = normalize_progression(progression);
        self
    }

    pub fn with_page_index(mut self, page_index: Option<usize>) -> Self {
        self.page_index = page_index;
        self
    }

    /// Return a copy carrying `anchor`; empty anchors are dropped.
    pub fn with_fragment_anchor(mut self, anchor: Option<String>) -> Self {
        self.fragment_anchor = anchor
            .map(|value| value.trim_start_matches('#').to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn chapter_progression(&self) -> f64 {
        self.chapter_progression
    }

    pub fn total_progression(&self) -> f64 {
        self.total_progression
    }

    pub fn page_index(&self) -> Option<usize> {
        self.page_index
    }

    pub fn fragment_anchor(&self) -> Option<&str> {
        self.fragment_anchor.as_deref()
    }

    /// Host-facing JSON form in the Readium locator shape.
    ///
    /// `locations.position` is 1-based, as readers display it.
    pub fn to_json_value(&self) -> serde_json::Value {
        let wire = LocatorWire {
            href: self.href.clone(),
            media_type: self.media_type.clone(),
            locations: LocationsWire {
                progression: Some(self.chapter_progression),
                total_progression: Some(self.total_progression),
                position: self.page_index.map(|index| index.saturating_add(1)),
                fragments: self.fragment_anchor.iter().cloned().collect(),
            },
        };
        serde_json::to_value(wire).unwrap_or(serde_json::Value::Null)
    }

    /// Parse the host-facing JSON form.
    ///
    /// Missing progressions default to `0.0`; a fragment embedded in `href`
    /// is used when `locations.fragments` is absent.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, LocatorJsonError> {
        let wire: LocatorWire = serde_json::from_value(value.clone())
            .map_err(|err| LocatorJsonError::Malformed(err.to_string()))?;
        let (base, href_fragment) = crate::href::split_href_fragment(&wire.href);
        if base.is_empty() {
            return Err(LocatorJsonError::MissingHref);
        }
        let anchor = wire
            .locations
            .fragments
            .into_iter()
            .next()
            .or_else(|| href_fragment.map(ToOwned::to_owned));
        Ok(Locator::new(base, wire.media_type)
            .with_chapter_progression(wire.locations.progression.unwrap_or(0.0))
            .with_total_progression(wire.locations.total_progression.unwrap_or(0.0))
            .with_page_index(
                wire.locations
                    .position
                    .filter(|position| *position > 0)
                    .map(|position| position - 1),
            )
            .with_fragment_anchor(anchor))
    }
}

/// Host JSON could not be turned into a [`Locator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocatorJsonError {
    MissingHref,
    Malformed(String),
}

impl fmt::Display for LocatorJsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHref => write!(f, "locator is missing href"),
            Self::Malformed(reason) => write!(f, "malformed locator: {}", reason),
        }
    }
}

impl std::error::Error for LocatorJsonError {}

#[derive(Serialize, Deserialize)]
struct LocatorWire {
    href: String,
    #[serde(rename = "type", default)]
    media_type: String,
    #[serde(default)]
    locations: LocationsWire,
}

#[derive(Default, Serialize, Deserialize)]
struct LocationsWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    progression: Option<f64>,
    #[serde(
        rename = "totalProgression",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    total_progression: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fragments: Vec<String>,
}

/// Concrete page a locator resolved to under the current viewport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewportPosition {
    /// Index of the resource in reading order.
    pub resource_index: usize,
    /// Resource href as listed in reading order.
    pub href: String,
    /// Page within the resource (0-based).
    pub page_index: usize,
    /// Pages in the resource under the current viewport.
    pub page_count: usize,
}
