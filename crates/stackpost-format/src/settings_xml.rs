//! XML settings tree.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <stackpost>
//!     <lucy-richardson sigma="1.3000" iterations="50" deringing="false"/>
//!     <unsharp_mask adaptive="false" sigma="1.3000" amount_min="1.0000"
//!                   amount_max="1.0000" amount_threshold="0.0100" amount_width="0.0100"/>
//!     <tone_curve smooth="true" is_gamma="false">0.0000;0.0000;1.0000;1.0000;</tone_curve>
//!     <normalization enabled="false" min="0.0000" max="1.0000"/>
//! </stackpost>
//! ```
//!
//! All four sections are optional and independent. The root element
//! name is not checked, so files written by other tools using the same
//! section layout load too. Unknown elements are ignored. A malformed
//! value in a present section fails the whole load.
//!
//! Numbers are written with [`FLOAT_PRECISION`] decimal digits and
//! booleans as `true` / `false`. The tone curve's control points are the
//! element's text: `x;y;x;y;...`. The `gamma` attribute is written only
//! in gamma mode.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use stackpost_pipeline::{
    CurvePoint, LucyRichardson, Normalization, ProcessingSettings, ToneCurve, ToneCurveError,
    UnsharpMask,
};

/// Decimal digits written for floating-point values.
pub const FLOAT_PRECISION: usize = 4;

const ROOT: &str = "stackpost";
const INDENT: usize = 4;

mod name {
    pub const LUCY_RICHARDSON: &str = "lucy-richardson";
    pub const LR_SIGMA: &str = "sigma";
    pub const LR_ITERATIONS: &str = "iterations";
    pub const LR_DERINGING: &str = "deringing";

    pub const UNSHARP_MASK: &str = "unsharp_mask";
    pub const UNSH_ADAPTIVE: &str = "adaptive";
    pub const UNSH_SIGMA: &str = "sigma";
    pub const UNSH_AMOUNT_MIN: &str = "amount_min";
    pub const UNSH_AMOUNT_MAX: &str = "amount_max";
    pub const UNSH_THRESHOLD: &str = "amount_threshold";
    pub const UNSH_WIDTH: &str = "amount_width";

    pub const TONE_CURVE: &str = "tone_curve";
    pub const TC_SMOOTH: &str = "smooth";
    pub const TC_IS_GAMMA: &str = "is_gamma";
    pub const TC_GAMMA: &str = "gamma";

    pub const NORMALIZATION: &str = "normalization";
    pub const NORM_ENABLED: &str = "enabled";
    pub const NORM_MIN: &str = "min";
    pub const NORM_MAX: &str = "max";
}

/// Errors reading or writing a settings tree.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("failed to write XML: {0}")]
    Write(#[from] std::io::Error),

    #[error("settings text is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("<{section}> is missing attribute `{attribute}`")]
    MissingAttribute {
        section: &'static str,
        attribute: &'static str,
    },

    #[error("<{section}> attribute `{attribute}` has invalid value {value:?}")]
    InvalidValue {
        section: &'static str,
        attribute: &'static str,
        value: String,
    },

    #[error("<tone_curve> point list {0:?} is malformed")]
    InvalidPointList(String),

    #[error("<tone_curve> is invalid: {0}")]
    ToneCurve(#[from] ToneCurveError),
}

/// Which sections a settings tree contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadedSections {
    pub lucy_richardson: bool,
    pub unsharp_mask: bool,
    pub tone_curve: bool,
    pub normalization: bool,
}

/// Result of [`parse_settings`].
///
/// `settings` holds defaults for sections that were absent; use
/// [`apply_to`](Self::apply_to) to merge only the loaded sections into
/// existing settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSettings {
    pub settings: ProcessingSettings,
    pub loaded: LoadedSections,
}

impl LoadedSettings {
    /// Overwrite the sections of `target` that were present in the file.
    pub fn apply_to(&self, target: &mut ProcessingSettings) {
        if self.loaded.lucy_richardson {
            target.lucy_richardson = self.settings.lucy_richardson;
        }
        if self.loaded.unsharp_mask {
            target.unsharp_mask = self.settings.unsharp_mask;
        }
        if self.loaded.tone_curve {
            target.tone_curve = self.settings.tone_curve.clone();
        }
        if self.loaded.normalization {
            target.normalization = self.settings.normalization;
        }
    }
}

/// Serialize settings into an XML settings tree with every section.
///
/// # Errors
///
/// Returns [`SettingsError::Write`] or [`SettingsError::Xml`] if the
/// XML writer fails; writing into memory does not fail in practice.
pub fn to_settings_xml(settings: &ProcessingSettings) -> Result<String, SettingsError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(ROOT)))?;

    let lr = &settings.lucy_richardson;
    writer
        .create_element(name::LUCY_RICHARDSON)
        .with_attributes([
            (name::LR_SIGMA, format_float(lr.sigma).as_str()),
            (name::LR_ITERATIONS, lr.iterations.to_string().as_str()),
            (name::LR_DERINGING, format_bool(lr.deringing)),
        ])
        .write_empty()?;

    let unsh = &settings.unsharp_mask;
    writer
        .create_element(name::UNSHARP_MASK)
        .with_attributes([
            (name::UNSH_ADAPTIVE, format_bool(unsh.adaptive)),
            (name::UNSH_SIGMA, format_float(unsh.sigma).as_str()),
            (name::UNSH_AMOUNT_MIN, format_float(unsh.amount_min).as_str()),
            (name::UNSH_AMOUNT_MAX, format_float(unsh.amount_max).as_str()),
            (name::UNSH_THRESHOLD, format_float(unsh.threshold).as_str()),
            (name::UNSH_WIDTH, format_float(unsh.width).as_str()),
        ])
        .write_empty()?;

    let curve = &settings.tone_curve;
    let gamma = format_float(curve.gamma());
    let mut attributes = vec![
        (name::TC_SMOOTH, format_bool(curve.is_smooth())),
        (name::TC_IS_GAMMA, format_bool(curve.is_gamma_mode())),
    ];
    if curve.is_gamma_mode() {
        attributes.push((name::TC_GAMMA, gamma.as_str()));
    }
    let points: String = curve
        .points()
        .iter()
        .map(|p| format!("{};{};", format_float(p.x), format_float(p.y)))
        .collect();
    writer
        .create_element(name::TONE_CURVE)
        .with_attributes(attributes)
        .write_text_content(BytesText::new(&points))?;

    let norm = &settings.normalization;
    writer
        .create_element(name::NORMALIZATION)
        .with_attributes([
            (name::NORM_ENABLED, format_bool(norm.enabled)),
            (name::NORM_MIN, format_float(norm.min).as_str()),
            (name::NORM_MAX, format_float(norm.max).as_str()),
        ])
        .write_empty()?;

    writer.write_event(Event::End(BytesEnd::new(ROOT)))?;
    Ok(String::from_utf8(writer.into_inner())?)
}

/// Parse an XML settings tree.
///
/// # Errors
///
/// Returns [`SettingsError::Xml`] for malformed XML and one of the
/// value errors for a malformed section. A single bad section fails the
/// whole load.
pub fn parse_settings(xml: &str) -> Result<LoadedSettings, SettingsError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut settings = ProcessingSettings::default();
    let mut loaded = LoadedSections::default();

    // Element nesting depth; sections are children of the root (depth 1).
    let mut depth = 0usize;
    // Attributes of an open <tone_curve>, waiting for its text content.
    let mut open_curve: Option<(HashMap<String, String>, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if depth == 1 && e.name().as_ref() == name::TONE_CURVE.as_bytes() {
                    open_curve = Some((attributes(&e)?, String::new()));
                } else if depth == 1 {
                    parse_section(&e, &mut settings, &mut loaded)?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if depth == 1 {
                    if e.name().as_ref() == name::TONE_CURVE.as_bytes() {
                        settings.tone_curve = parse_tone_curve(&attributes(&e)?, "")?;
                        loaded.tone_curve = true;
                    } else {
                        parse_section(&e, &mut settings, &mut loaded)?;
                    }
                }
            }
            Event::Text(t) => {
                if let Some((_, text)) = open_curve.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1
                    && let Some((attrs, text)) = open_curve.take()
                {
                    settings.tone_curve = parse_tone_curve(&attrs, &text)?;
                    loaded.tone_curve = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(LoadedSettings { settings, loaded })
}

/// Parse one attribute-only section into `settings`.
fn parse_section(
    element: &BytesStart<'_>,
    settings: &mut ProcessingSettings,
    loaded: &mut LoadedSections,
) -> Result<(), SettingsError> {
    let element_name = element.name();
    let attrs = attributes(element)?;
    match element_name.as_ref() {
        n if n == name::LUCY_RICHARDSON.as_bytes() => {
            let s = Section::new(name::LUCY_RICHARDSON, &attrs);
            settings.lucy_richardson = LucyRichardson {
                sigma: s.float(name::LR_SIGMA)?,
                iterations: s.parse(name::LR_ITERATIONS)?,
                deringing: s.boolean(name::LR_DERINGING)?,
            };
            loaded.lucy_richardson = true;
        }
        n if n == name::UNSHARP_MASK.as_bytes() => {
            let s = Section::new(name::UNSHARP_MASK, &attrs);
            settings.unsharp_mask = UnsharpMask {
                adaptive: s.boolean(name::UNSH_ADAPTIVE)?,
                sigma: s.float(name::UNSH_SIGMA)?,
                amount_min: s.float(name::UNSH_AMOUNT_MIN)?,
                amount_max: s.float(name::UNSH_AMOUNT_MAX)?,
                threshold: s.float(name::UNSH_THRESHOLD)?,
                width: s.float(name::UNSH_WIDTH)?,
            };
            loaded.unsharp_mask = true;
        }
        n if n == name::NORMALIZATION.as_bytes() => {
            let s = Section::new(name::NORMALIZATION, &attrs);
            settings.normalization = Normalization {
                enabled: s.boolean(name::NORM_ENABLED)?,
                min: s.float(name::NORM_MIN)?,
                max: s.float(name::NORM_MAX)?,
            };
            loaded.normalization = true;
        }
        _ => {}
    }
    Ok(())
}

fn parse_tone_curve(
    attrs: &HashMap<String, String>,
    points_text: &str,
) -> Result<ToneCurve, SettingsError> {
    let s = Section::new(name::TONE_CURVE, attrs);
    let smooth = s.boolean(name::TC_SMOOTH)?;
    let gamma_mode = s.boolean(name::TC_IS_GAMMA)?;
    let gamma = if gamma_mode {
        Some(s.float(name::TC_GAMMA)?)
    } else {
        None
    };

    let values = points_text
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::parse::<f32>)
        .collect::<Result<Vec<f32>, _>>()
        .map_err(|_| SettingsError::InvalidPointList(points_text.to_owned()))?;
    if values.len() % 2 != 0 {
        return Err(SettingsError::InvalidPointList(points_text.to_owned()));
    }

    let points = values
        .chunks_exact(2)
        .map(|xy| CurvePoint::new(xy[0], xy[1]))
        .collect();
    let mut curve = ToneCurve::new(points)?;
    curve.set_smooth(smooth);
    curve.set_gamma_mode(gamma_mode);
    if let Some(gamma) = gamma {
        curve.set_gamma(gamma)?;
    }
    Ok(curve)
}

/// Attribute lookup for one section, with typed accessors.
struct Section<'a> {
    name: &'static str,
    attrs: &'a HashMap<String, String>,
}

impl<'a> Section<'a> {
    const fn new(name: &'static str, attrs: &'a HashMap<String, String>) -> Self {
        Self { name, attrs }
    }

    fn raw(&self, attribute: &'static str) -> Result<&'a str, SettingsError> {
        self.attrs
            .get(attribute)
            .map(String::as_str)
            .ok_or(SettingsError::MissingAttribute {
                section: self.name,
                attribute,
            })
    }

    fn invalid(&self, attribute: &'static str, value: &str) -> SettingsError {
        SettingsError::InvalidValue {
            section: self.name,
            attribute,
            value: value.to_owned(),
        }
    }

    fn parse<T: std::str::FromStr>(&self, attribute: &'static str) -> Result<T, SettingsError> {
        let value = self.raw(attribute)?;
        value
            .trim()
            .parse()
            .map_err(|_| self.invalid(attribute, value))
    }

    fn float(&self, attribute: &'static str) -> Result<f32, SettingsError> {
        let value: f32 = self.parse(attribute)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(self.invalid(attribute, self.raw(attribute)?))
        }
    }

    fn boolean(&self, attribute: &'static str) -> Result<bool, SettingsError> {
        match self.raw(attribute)? {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(self.invalid(attribute, other)),
        }
    }
}

fn attributes(element: &BytesStart<'_>) -> Result<HashMap<String, String>, SettingsError> {
    let mut map = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn format_float(value: f32) -> String {
    format!("{value:.prec$}", prec = FLOAT_PRECISION)
}

const fn format_bool(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn custom_settings() -> ProcessingSettings {
        let mut curve = ToneCurve::new(vec![
            CurvePoint::new(0.0, 0.05),
            CurvePoint::new(0.25, 0.5),
            CurvePoint::new(1.0, 0.95),
        ])
        .unwrap();
        curve.set_smooth(false);
        ProcessingSettings {
            normalization: Normalization {
                enabled: true,
                min: 0.1,
                max: 0.9,
            },
            lucy_richardson: LucyRichardson {
                sigma: 1.75,
                iterations: 42,
                deringing: true,
            },
            unsharp_mask: UnsharpMask {
                adaptive: true,
                sigma: 2.5,
                amount_min: 0.5,
                amount_max: 3.25,
                threshold: 0.15,
                width: 0.05,
            },
            tone_curve: curve,
        }
    }

    #[test]
    fn round_trip_preserves_settings() {
        let settings = custom_settings();
        let xml = to_settings_xml(&settings).unwrap();
        let loaded = parse_settings(&xml).unwrap();
        assert_eq!(loaded.settings, settings);
        assert_eq!(
            loaded.loaded,
            LoadedSections {
                lucy_richardson: true,
                unsharp_mask: true,
                tone_curve: true,
                normalization: true,
            }
        );
    }

    #[test]
    fn gamma_mode_round_trips() {
        let mut settings = ProcessingSettings::default();
        settings.tone_curve.set_gamma_mode(true);
        settings.tone_curve.set_gamma(2.2).unwrap();
        let xml = to_settings_xml(&settings).unwrap();
        assert!(xml.contains(r#"gamma="2.2000""#), "{xml}");
        let loaded = parse_settings(&xml).unwrap();
        assert_eq!(loaded.settings, settings);
    }

    #[test]
    fn writer_uses_fixed_precision_and_section_names() {
        let xml = to_settings_xml(&ProcessingSettings::default()).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(r#"<lucy-richardson sigma="1.3000" iterations="0" deringing="false"/>"#), "{xml}");
        assert!(xml.contains("<unsharp_mask "));
        assert!(xml.contains("amount_threshold=\"0.0100\""));
        assert!(xml.contains("0.0000;0.0000;1.0000;1.0000;"), "{xml}");
        assert!(!xml.contains("gamma=\""), "gamma is written only in gamma mode");
    }

    #[test]
    fn missing_sections_are_reported_and_defaulted() {
        let xml = r#"<settings><unsharp_mask adaptive="false" sigma="2.0000" amount_min="1.0000"
            amount_max="1.5000" amount_threshold="0.0100" amount_width="0.0100"/></settings>"#;
        let loaded = parse_settings(xml).unwrap();
        assert!(loaded.loaded.unsharp_mask);
        assert!(!loaded.loaded.lucy_richardson);
        assert!(!loaded.loaded.tone_curve);
        assert!(!loaded.loaded.normalization);
        assert!((loaded.settings.unsharp_mask.amount_max - 1.5).abs() < f32::EPSILON);
        assert_eq!(loaded.settings.lucy_richardson, LucyRichardson::default());
    }

    #[test]
    fn apply_to_merges_only_loaded_sections() {
        let xml = r#"<x><normalization enabled="true" min="0.2000" max="0.8000"/></x>"#;
        let loaded = parse_settings(xml).unwrap();
        let mut target = custom_settings();
        let before = target.clone();
        loaded.apply_to(&mut target);
        assert!(target.normalization.enabled);
        assert!((target.normalization.min - 0.2).abs() < f32::EPSILON);
        assert_eq!(target.unsharp_mask, before.unsharp_mask);
        assert_eq!(target.tone_curve, before.tone_curve);
    }

    #[test]
    fn tone_curve_with_one_point_fails_the_load() {
        let xml = r#"<x>
            <lucy-richardson sigma="1.0000" iterations="10" deringing="false"/>
            <tone_curve smooth="true" is_gamma="false">0.5000;0.5000;</tone_curve>
        </x>"#;
        let err = parse_settings(xml).unwrap_err();
        assert!(matches!(err, SettingsError::ToneCurve(ToneCurveError::TooFewPoints(1))), "{err}");
    }

    #[test]
    fn odd_point_list_is_rejected() {
        let xml = r#"<x><tone_curve smooth="true" is_gamma="false">0;0;1;</tone_curve></x>"#;
        assert!(matches!(
            parse_settings(xml).unwrap_err(),
            SettingsError::InvalidPointList(_)
        ));
    }

    #[test]
    fn bad_boolean_fails_the_load() {
        let xml = r#"<x><normalization enabled="yes" min="0" max="1"/></x>"#;
        let err = parse_settings(xml).unwrap_err();
        assert!(
            matches!(
                err,
                SettingsError::InvalidValue {
                    attribute: "enabled",
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn missing_attribute_fails_the_load() {
        let xml = r#"<x><lucy-richardson sigma="1.0" deringing="false"/></x>"#;
        let err = parse_settings(xml).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::MissingAttribute {
                attribute: "iterations",
                ..
            }
        ));
    }

    #[test]
    fn gamma_mode_requires_gamma() {
        let xml = r#"<x><tone_curve smooth="true" is_gamma="true">0;0;1;1;</tone_curve></x>"#;
        assert!(matches!(
            parse_settings(xml).unwrap_err(),
            SettingsError::MissingAttribute { attribute: "gamma", .. }
        ));
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let xml = r#"<x><window width="3"/><nested><normalization enabled="true" min="0" max="1"/></nested></x>"#;
        let loaded = parse_settings(xml).unwrap();
        assert_eq!(loaded.loaded, LoadedSections::default(), "nested sections are not top-level");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let xml = r#"<x><normalization enabled="true" min="0" max="1"></y></x>"#;
        assert!(matches!(parse_settings(xml).unwrap_err(), SettingsError::Xml(_)));
    }
}
